//! Hazemon upstream: node URLs, payload normalisation and the HTTP client.

pub mod client;
pub mod parse;
pub mod url;

pub use client::{HazemonClient, UpstreamError};
pub use parse::parse_latest;
pub use url::{build_range_url, HazemonUrls, RangeOrder, RangeQuery};
