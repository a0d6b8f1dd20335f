//! TTL policy: the route table's defaults plus startup overrides.

use std::collections::HashMap;
use std::time::Duration;

use super::routes::{RouteId, UnknownRoute};

/// Errors from parsing a `route:secs,...` override list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TtlOverrideError {
    #[error(transparent)]
    UnknownRoute(#[from] UnknownRoute),

    #[error("malformed TTL override `{0}`, expected `route:seconds`")]
    Malformed(String),

    #[error("TTL override for `{route}` must be a positive number of seconds, got `{value}`")]
    InvalidSeconds { route: String, value: String },
}

/// Resolves the TTL for a route.
///
/// Lookups are pure: the same route always yields the same duration for the
/// lifetime of a policy.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use pitchside::resolver::{RouteId, TtlPolicy};
///
/// let policy = TtlPolicy::default().with_override(RouteId::Leagues, Duration::from_secs(86_400));
/// assert_eq!(policy.ttl_for(RouteId::Leagues), Duration::from_secs(86_400));
/// assert_eq!(policy.ttl_for(RouteId::FixturesLive), Duration::from_secs(60));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TtlPolicy {
    overrides: HashMap<RouteId, Duration>,
}

impl TtlPolicy {
    /// Replaces the TTL for `route`.
    #[must_use]
    pub fn with_override(mut self, route: RouteId, ttl: Duration) -> Self {
        self.overrides.insert(route, ttl);
        self
    }

    /// Parses `fixtures-today:1800,leagues:86400` into a policy.
    ///
    /// Blank input yields the default policy.
    pub fn parse_overrides(raw: &str) -> Result<Self, TtlOverrideError> {
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(Self::default(), |policy, part| {
                let (route, value) = part
                    .split_once(':')
                    .ok_or_else(|| TtlOverrideError::Malformed(part.to_owned()))?;
                let (route, value) = (route.trim(), value.trim());
                let id: RouteId = route.parse()?;
                let seconds = value
                    .parse::<u64>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| TtlOverrideError::InvalidSeconds {
                        route: route.to_owned(),
                        value: value.to_owned(),
                    })?;
                Ok(policy.with_override(id, Duration::from_secs(seconds)))
            })
    }

    pub fn ttl_for(&self, route: RouteId) -> Duration {
        self.overrides
            .get(&route)
            .copied()
            .unwrap_or(route.spec().default_ttl)
    }
}
