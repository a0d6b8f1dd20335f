//! Process configuration, read once from the environment at startup.
//!
//! A `.env` file in the working directory is loaded first when present.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;
use thiserror::Error;

use crate::cache::DEFAULT_UPSTREAM_TIMEOUT;
use crate::resolver::{TtlOverrideError, TtlPolicy};

pub const DEFAULT_BASE_URL: &str = "https://v3.football.api-sports.io";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_HOST: &str = "0.0.0.0";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable `{0}` is not set")]
    Missing(&'static str),

    #[error("environment variable `{var}` has an invalid value `{value}`")]
    Invalid { var: &'static str, value: String },

    #[error("invalid `CACHE_TTL_OVERRIDES`: {0}")]
    TtlOverrides(#[from] TtlOverrideError),
}

#[derive(Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    /// Carried so the environment surface stays complete; the proxy core does not use it.
    pub news_api_key: Option<String>,
    pub host: String,
    pub port: u16,
    pub access_code: Option<String>,
    pub upstream_timeout: Duration,
    /// Offset used to decide what "today" means for fixture lists.
    pub utc_offset: FixedOffset,
    pub ttl_policy: TtlPolicy,
    /// Interval of the optional background sweep of expired entries.
    pub cache_sweep: Option<Duration>,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    ///
    /// Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| {
            lookup(var)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        let api_key = get("API_KEY").ok_or(ConfigError::Missing("API_KEY"))?;
        let utc_offset_hours: i32 = parse_or(&get, "UTC_OFFSET_HOURS", 0)?;
        let utc_offset = utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError::Invalid {
                var: "UTC_OFFSET_HOURS",
                value: utc_offset_hours.to_string(),
            })?;

        let timeout_secs: u64 =
            parse_or(&get, "UPSTREAM_TIMEOUT_SECS", DEFAULT_UPSTREAM_TIMEOUT.as_secs())?;
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "UPSTREAM_TIMEOUT_SECS",
                value: "0".to_owned(),
            });
        }

        let cache_sweep = match get("CACHE_SWEEP_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "CACHE_SWEEP_SECS",
                        value: raw,
                    });
                }
            },
            None => None,
        };

        let ttl_policy = match get("CACHE_TTL_OVERRIDES") {
            Some(raw) => TtlPolicy::parse_overrides(&raw)?,
            None => TtlPolicy::default(),
        };

        Ok(Self {
            api_key,
            base_url: get("API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
            news_api_key: get("NEWS_API_KEY"),
            host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_owned()),
            port: parse_or(&get, "PORT", DEFAULT_PORT)?,
            access_code: get("ACCESS_CODE"),
            upstream_timeout: Duration::from_secs(timeout_secs),
            utc_offset,
            ttl_policy,
            cache_sweep,
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
        None => Ok(default),
    }
}

// Secrets are reported as present/absent only.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("news_api_key", &self.news_api_key.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("access_code", &self.access_code.as_ref().map(|_| "<redacted>"))
            .field("upstream_timeout", &self.upstream_timeout)
            .field("utc_offset", &self.utc_offset)
            .field("ttl_policy", &self.ttl_policy)
            .field("cache_sweep", &self.cache_sweep)
            .finish()
    }
}
