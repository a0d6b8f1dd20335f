//! Per-request context handed through middleware and into handlers.

use std::collections::HashMap;
use std::collections::btree_map::Entry;

use thiserror::Error;

use crate::Request;
use crate::resolver::Params;

/// Path parameters captured by the matched route pattern.
#[derive(Default, Debug, Clone)]
pub struct PathParams {
    map: HashMap<String, String>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: String, value: String) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A parameter name supplied more than once, in the query or in both the
/// query and the path.
#[derive(Debug, Error)]
#[error("parameter `{name}` is given more than once")]
pub struct DuplicateParameter {
    pub name: String,
}

/// The request plus whatever routing has learned about it.
#[derive(Debug)]
pub struct Context {
    request: Request,
    params: PathParams,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            params: PathParams::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Path captures only.
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub(crate) fn set_params(&mut self, params: PathParams) {
        self.params = params;
    }

    /// Every query parameter and path capture in one map.
    ///
    /// Each name may appear once across both sources.
    pub fn all_params(&self) -> Result<Params, DuplicateParameter> {
        let mut merged = Params::new();
        for (k, v) in self.params.iter().chain(self.request.query_params()) {
            match merged.entry(k.to_owned()) {
                Entry::Vacant(slot) => {
                    slot.insert(v.to_owned());
                }
                Entry::Occupied(_) => {
                    return Err(DuplicateParameter { name: k.to_owned() });
                }
            }
        }
        Ok(merged)
    }
}
