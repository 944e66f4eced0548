//! URL construction for the Hazemon `time_aggr` API.
//!
//! Hazemon addresses a node as `<root>/<node>` and a time range as two extra
//! path segments. Which of the two bounds comes first is not documented and
//! has been observed both ways, so the order is an explicit [`RangeOrder`]
//! and callers that need data retry with [`RangeOrder::swapped`].

use std::fmt;
use std::str::FromStr;

use crate::config::HazemonConfig;

pub const LEGACY_URL: &str = "https://hazemon.in.th/api/time_aggr/hazemon/TH-NRT-%E0%B8%AA.%E0%B8%84%E0%B8%A7%E0%B8%9A%E0%B8%84%E0%B8%B8%E0%B8%A1%E0%B9%84%E0%B8%9F%E0%B8%9B%E0%B9%88%E0%B8%B2%E0%B8%9E%E0%B8%A3%E0%B8%B8%E0%B8%84%E0%B8%A7%E0%B8%99%E0%B9%80%E0%B8%84%E0%B8%A3%E0%B9%87%E0%B8%87-5068";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RangeOrder {
    /// `<base>/<before>/<after>`
    #[default]
    BeforeAfter,
    /// `<base>/<after>/<before>`
    AfterBefore,
}

impl RangeOrder {
    pub fn swapped(self) -> Self {
        match self {
            RangeOrder::BeforeAfter => RangeOrder::AfterBefore,
            RangeOrder::AfterBefore => RangeOrder::BeforeAfter,
        }
    }
}

impl FromStr for RangeOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before_after" => Ok(RangeOrder::BeforeAfter),
            "after_before" => Ok(RangeOrder::AfterBefore),
            other => Err(format!("unknown range order {:?}", other)),
        }
    }
}

impl fmt::Display for RangeOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeOrder::BeforeAfter => write!(f, "before_after"),
            RangeOrder::AfterBefore => write!(f, "after_before"),
        }
    }
}

/// A closed time window. `before` is the upper bound, `after` the lower one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RangeQuery {
    pub before: i64,
    pub after: i64,
    pub aggr_minutes: Option<i64>,
    pub order: RangeOrder,
}

impl RangeQuery {
    pub fn with_order(self, order: RangeOrder) -> Self {
        RangeQuery { order, ..self }
    }
}

fn strip_trailing_slashes(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// Resolves node base URLs from configuration.
#[derive(Clone, Debug)]
pub struct HazemonUrls {
    direct_url: Option<String>,
    api_root: String,
    node_id: Option<String>,
}

impl HazemonUrls {
    pub fn new(config: &HazemonConfig) -> Self {
        HazemonUrls {
            direct_url: config.direct_url.clone(),
            api_root: config.api_root.clone(),
            node_id: config.node_id.clone(),
        }
    }

    /// Direct URL, else `<api_root>/<node>` with `node` falling back to the
    /// configured node, else the legacy node URL.
    pub fn base_url(&self, node: Option<&str>) -> String {
        if let Some(direct) = &self.direct_url {
            return strip_trailing_slashes(direct).to_string();
        }

        let node = node
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .or(self.node_id.as_deref());

        match node {
            // Node slugs routinely contain Thai characters
            Some(node) => format!(
                "{}/{}",
                strip_trailing_slashes(&self.api_root),
                urlencoding::encode(node)
            ),
            None => LEGACY_URL.to_string(),
        }
    }
}

pub fn build_range_url(base: &str, range: &RangeQuery) -> String {
    let base = strip_trailing_slashes(base);
    let path = match range.order {
        RangeOrder::BeforeAfter => format!("{}/{}/{}", base, range.before, range.after),
        RangeOrder::AfterBefore => format!("{}/{}/{}", base, range.after, range.before),
    };

    match range.aggr_minutes {
        Some(minutes) => format!("{}/{}", path, minutes),
        None => path,
    }
}
