use serde::{Deserialize, Serialize};

/// One PM observation of a Hazemon node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub node_id: i64,
    pub node_name: Option<String>,
    /// Epoch seconds
    pub timestamp: i64,
    /// "YYYY-MM-DD HH:mm:ss" at UTC+7, as reported by Hazemon
    pub datetime_local: Option<String>,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub pm1: Option<f64>,
    pub raw: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DailyAverage {
    pub date: String,
    pub avg: Option<i64>,
    pub count: i64,
}

impl DailyAverage {
    pub fn empty(date: String) -> Self {
        DailyAverage { date, avg: None, count: 0 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonthlyAverage {
    pub key: String,
    pub avg: i64,
    pub count: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub timestamp: i64,
    pub datetime_local: Option<String>,
    pub pm25: f64,
    pub count: i64,
}

/// Where a response was answered from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Hazemon,
    Store,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Hazemon => write!(f, "hazemon"),
            Source::Store => write!(f, "store"),
        }
    }
}
