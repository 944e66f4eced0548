use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::hazemon::RangeOrder;

pub const DEFAULT_API_ROOT: &str = "https://hazemon.in.th/api/time_aggr/hazemon";
pub const DEFAULT_DATABASE_URL: &str = "./pm25.sqlite3";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_MONTHLY_LOOKBACK_DAYS: i64 = 120;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Where and how to reach Hazemon.
#[derive(Clone, Debug, PartialEq)]
pub struct HazemonConfig {
    /// Full base URL used verbatim when set.
    pub direct_url: Option<String>,
    pub api_root: String,
    pub node_id: Option<String>,
    pub aggr_minutes: Option<i64>,
    pub range_order: RangeOrder,
    pub monthly_lookback_days: i64,
    pub latest_timeout: Duration,
    pub fetch_timeout: Duration,
}

impl Default for HazemonConfig {
    fn default() -> Self {
        HazemonConfig {
            direct_url: None,
            api_root: DEFAULT_API_ROOT.to_string(),
            node_id: None,
            aggr_minutes: None,
            range_order: RangeOrder::BeforeAfter,
            monthly_lookback_days: DEFAULT_MONTHLY_LOOKBACK_DAYS,
            latest_timeout: Duration::from_secs(4),
            fetch_timeout: Duration::from_secs(8),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub hazemon: HazemonConfig,
    pub cron_secret: Option<String>,
    pub database_url: String,
    pub bind_addr: String,
}

impl Config {
    /// Reads the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable lookup, so tests never touch the real environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let range_order = match var("HAZEMON_RANGE_ORDER") {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "HAZEMON_RANGE_ORDER",
                value,
                reason: "expected before_after or after_before",
            })?,
            None => RangeOrder::BeforeAfter,
        };

        let aggr_minutes = match var("HAZEMON_AGGR_MINUTES") {
            Some(value) => Some(parse_positive("HAZEMON_AGGR_MINUTES", value)?),
            None => None,
        };

        let monthly_lookback_days = match var("HAZEMON_MONTHLY_LOOKBACK_DAYS") {
            Some(value) => parse_positive("HAZEMON_MONTHLY_LOOKBACK_DAYS", value)?,
            None => DEFAULT_MONTHLY_LOOKBACK_DAYS,
        };

        Ok(Config {
            hazemon: HazemonConfig {
                direct_url: var("HAZEMON_URL"),
                api_root: var("HAZEMON_API_ROOT").unwrap_or_else(|| DEFAULT_API_ROOT.to_string()),
                node_id: var("HAZEMON_NODE_ID"),
                aggr_minutes,
                range_order,
                monthly_lookback_days,
                ..HazemonConfig::default()
            },
            cron_secret: var("CRON_SECRET"),
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            bind_addr: var("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        })
    }
}

fn parse_positive(name: &'static str, value: String) -> Result<i64, ConfigError> {
    match value.parse::<i64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Invalid {
            name,
            value,
            reason: "expected a positive integer",
        }),
    }
}
