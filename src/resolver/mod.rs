//! Key/TTL resolution: maps a logical request to a cache key, a TTL, and
//! the upstream request that would populate it.
//!
//! Resolution is pure: it validates parameters, builds the key and the URL,
//! and never touches the network. Two requests that would make the same
//! upstream call always resolve to the same key; changing any forwarded
//! parameter changes the key.
//!
//! ```
//! use pitchside::resolver::{Params, Resolver, RouteId, TtlPolicy};
//!
//! let resolver = Resolver::new("https://v3.football.api-sports.io", "key", TtlPolicy::default());
//! let params = Params::from([("date".to_owned(), "2024-05-01".to_owned())]);
//! let descriptor = resolver.resolve(RouteId::FixturesByDate, &params).unwrap();
//!
//! assert_eq!(descriptor.cache_key, "fixtures-date-2024-05-01");
//! assert!(descriptor.upstream_url.ends_with("fixtures?date=2024-05-01"));
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::NaiveDate;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use thiserror::Error;

use crate::http::Headers;

pub mod routes;
pub mod ttl;

pub use routes::{ParamKind, ParamSpec, ROUTES, RouteId, RouteSpec, UnknownRoute, WILDCARD_PARAM};
pub use ttl::{TtlOverrideError, TtlPolicy};

/// Header carrying the upstream API credential.
pub const CREDENTIAL_HEADER: &str = "x-apisports-key";

/// Separator between the key tag and each parameter value.
pub const KEY_SEPARATOR: char = '-';

/// Key component used for an absent optional parameter.
///
/// Optional parameters are ids or seasons, which are digits only, so an
/// explicit value can never equal this token.
pub const ABSENT_TOKEN: &str = "all";

/// Characters escaped in forwarded passthrough query components.
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Named request parameters, gathered from path captures and the query string.
pub type Params = BTreeMap<String, String>;

/// Errors produced while resolving a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// A required parameter is missing or empty, or a value has the wrong shape.
    #[error("invalid parameters for `{route}`: {reason}")]
    InvalidParameters { route: RouteId, reason: String },
}

/// Everything needed to serve one logical request through the cache.
///
/// Transient: produced per inbound request and never stored.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub route: RouteId,
    pub cache_key: String,
    pub ttl: Duration,
    pub upstream_url: String,
    pub headers: Headers,
}

// Header values carry the API credential and must not reach the logs.
impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<_> = self.headers.iter().map(|(name, _)| name).collect();
        f.debug_struct("RequestDescriptor")
            .field("route", &self.route)
            .field("cache_key", &self.cache_key)
            .field("ttl", &self.ttl)
            .field("upstream_url", &self.upstream_url)
            .field("headers", &header_names)
            .finish()
    }
}

/// Builds a cache key from a route tag and its ordered parameter values.
///
/// ```
/// use pitchside::resolver::build_cache_key;
///
/// assert_eq!(build_cache_key("standings", ["39", "2023"]), "standings-39-2023");
/// assert_eq!(build_cache_key("fixtures-live", [] as [&str; 0]), "fixtures-live");
/// ```
pub fn build_cache_key<I, S>(tag: &str, parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut key = String::from(tag);
    for part in parts {
        key.push(KEY_SEPARATOR);
        key.push_str(part.as_ref());
    }
    key
}

/// Resolves logical requests against the route table.
#[derive(Clone)]
pub struct Resolver {
    base_url: String,
    headers: Headers,
    ttl: TtlPolicy,
}

impl Resolver {
    /// Creates a resolver for the upstream at `base_url`, authenticating with `api_key`.
    pub fn new(base_url: impl Into<String>, api_key: &str, ttl: TtlPolicy) -> Self {
        let mut headers = Headers::with_capacity(1);
        headers.insert(CREDENTIAL_HEADER, api_key);
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            headers,
            ttl,
        }
    }

    /// Resolves `route` with `params` into a [`RequestDescriptor`].
    ///
    /// Parameters the route does not declare are ignored, except on the
    /// passthrough route, where they are forwarded to the upstream and
    /// therefore take part in the key.
    ///
    /// # Errors
    ///
    /// [`ResolveError::InvalidParameters`] when a required parameter is
    /// missing or blank, or any value fails its kind's validation.
    pub fn resolve(
        &self,
        route: RouteId,
        params: &Params,
    ) -> Result<RequestDescriptor, ResolveError> {
        let spec = route.spec();
        let values = spec
            .params
            .iter()
            .map(|param| {
                let raw = params.get(param.name).map(|v| v.trim()).filter(|v| !v.is_empty());
                match raw {
                    Some(raw) => normalize(param, raw)
                        .map(|value| (param.name, Some(value)))
                        .map_err(|reason| invalid(route, reason)),
                    None if param.required => Err(invalid(
                        route,
                        format!("missing parameter `{}`", param.name),
                    )),
                    None => Ok((param.name, None)),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let relative = render(spec.upstream, &values);
        let (cache_key, relative) = if route == RouteId::Passthrough {
            let forwarded = forwarded_params(params);
            let cache_key = self
                .modeled_key(&relative, &forwarded)
                .unwrap_or_else(|| {
                    build_cache_key(spec.key_tag, [&append_forwarded_query(relative.clone(), &forwarded)])
                });
            (cache_key, append_forwarded_query(relative, &forwarded))
        } else {
            let parts = values.iter().map(|(_, v)| v.as_deref().unwrap_or(ABSENT_TOKEN));
            (build_cache_key(spec.key_tag, parts), relative)
        };

        Ok(RequestDescriptor {
            route,
            cache_key,
            ttl: self.ttl.ttl_for(route),
            upstream_url: format!("{}/{}", self.base_url, relative),
            headers: self.headers.clone(),
        })
    }
}

impl Resolver {
    /// Key of the modeled route that makes exactly this passthrough request.
    ///
    /// A modeled route matches when its template yields the same upstream
    /// path and the same set of query pairs once its parameters are read back
    /// out of the forwarded query.
    fn modeled_key(&self, path: &str, forwarded: &Params) -> Option<String> {
        ROUTES
            .iter()
            .filter(|spec| spec.id != RouteId::Passthrough)
            .find_map(|spec| {
                let extracted = unrender(spec.upstream, path, forwarded)?;
                let descriptor = self.resolve(spec.id, &extracted).ok()?;
                let relative = descriptor
                    .upstream_url
                    .strip_prefix(self.base_url.as_str())?
                    .strip_prefix('/')?;
                let (modeled_path, modeled_query) = relative.split_once('?').unwrap_or((relative, ""));
                let modeled_pairs: BTreeMap<&str, &str> = modeled_query
                    .split('&')
                    .filter(|pair| !pair.is_empty())
                    .filter_map(|pair| pair.split_once('='))
                    .collect();
                let forwarded_pairs: BTreeMap<&str, &str> = forwarded
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.as_str()))
                    .collect();
                (modeled_path == path && modeled_pairs == forwarded_pairs)
                    .then_some(descriptor.cache_key)
            })
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("base_url", &self.base_url)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

fn invalid(route: RouteId, reason: String) -> ResolveError {
    ResolveError::InvalidParameters { route, reason }
}

/// Validates `raw` against the parameter's kind and returns its canonical form.
fn normalize(param: &ParamSpec, raw: &str) -> Result<String, String> {
    let name = param.name;
    match param.kind {
        ParamKind::Id => {
            if raw.bytes().all(|b| b.is_ascii_digit()) {
                Ok(raw.to_owned())
            } else {
                Err(format!("`{name}` must be numeric, got `{raw}`"))
            }
        }
        ParamKind::Season => {
            if raw.len() == 4 && raw.bytes().all(|b| b.is_ascii_digit()) {
                Ok(raw.to_owned())
            } else {
                Err(format!("`{name}` must be a four-digit year, got `{raw}`"))
            }
        }
        ParamKind::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(|date| date.format("%Y-%m-%d").to_string())
            .map_err(|_| format!("`{name}` must be a date as YYYY-MM-DD, got `{raw}`")),
        ParamKind::Path => {
            let path = raw.trim_matches('/');
            let well_formed = !path.is_empty()
                && path
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'/' | b'-' | b'_'))
                && path.split('/').all(|segment| !segment.is_empty());
            if well_formed {
                Ok(path.to_owned())
            } else {
                Err(format!("`{name}` is not a valid upstream path: `{raw}`"))
            }
        }
    }
}

/// Fills `{name}` placeholders in an upstream template.
///
/// Query pairs that reference an absent value are dropped.
fn render(template: &str, values: &[(&str, Option<String>)]) -> String {
    let (path, query) = template.split_once('?').unwrap_or((template, ""));
    let mut rendered = substitute(path, values).unwrap_or_else(|| path.to_owned());
    let pairs: Vec<String> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| substitute(pair, values))
        .collect();
    if !pairs.is_empty() {
        rendered.push('?');
        rendered.push_str(&pairs.join("&"));
    }
    rendered
}

fn substitute(fragment: &str, values: &[(&str, Option<String>)]) -> Option<String> {
    let mut out = fragment.to_owned();
    for (name, value) in values {
        let placeholder = format!("{{{name}}}");
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, value.as_deref()?);
        }
    }
    Some(out)
}

/// Every parameter except the wildcard path, as forwarded to the upstream.
fn forwarded_params(params: &Params) -> Params {
    params
        .iter()
        .filter(|(name, _)| name.as_str() != WILDCARD_PARAM)
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Reads a template's parameters back out of an upstream path and query.
///
/// Only the template's own query names are consulted; whether the result is
/// an exact match is left to the caller.
fn unrender(template: &str, path: &str, forwarded: &Params) -> Option<Params> {
    let (template_path, template_query) = template.split_once('?').unwrap_or((template, ""));
    if template_path != path {
        return None;
    }
    let mut extracted = Params::new();
    for pair in template_query.split('&').filter(|pair| !pair.is_empty()) {
        let (name, pattern) = pair.split_once('=')?;
        if let Some(value) = forwarded.get(name) {
            capture(pattern, value, &mut extracted)?;
        }
    }
    Some(extracted)
}

/// Matches `value` against a pattern such as `{team1}-{team2}` or `all`.
fn capture(pattern: &str, value: &str, out: &mut Params) -> Option<()> {
    let (mut pattern, mut value) = (pattern, value);
    while !pattern.is_empty() {
        if let Some(after) = pattern.strip_prefix('{') {
            let (name, tail) = after.split_once('}')?;
            let literal_end = tail.find('{').unwrap_or(tail.len());
            let literal = &tail[..literal_end];
            let (captured, rest) = if literal.is_empty() {
                (value, "")
            } else {
                value.split_once(literal)?
            };
            if captured.is_empty() {
                return None;
            }
            out.insert(name.to_owned(), captured.to_owned());
            pattern = &tail[literal_end..];
            value = rest;
        } else {
            let literal_end = pattern.find('{').unwrap_or(pattern.len());
            value = value.strip_prefix(&pattern[..literal_end])?;
            pattern = &pattern[literal_end..];
        }
    }
    value.is_empty().then_some(())
}

/// Appends the forwarded parameters, sorted by name and escaped.
fn append_forwarded_query(mut relative: String, forwarded: &Params) -> String {
    let forwarded: Vec<String> = forwarded
        .iter()
        .map(|(name, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(name, QUERY_ESCAPE),
                utf8_percent_encode(value, QUERY_ESCAPE)
            )
        })
        .collect();
    if !forwarded.is_empty() {
        relative.push('?');
        relative.push_str(&forwarded.join("&"));
    }
    relative
}
