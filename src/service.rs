//! Read side: latest reading, daily/monthly history and time series.
//!
//! Every query walks a ranked list of [`Pm25Source`]s (Hazemon first, the
//! local store second). The first source that produces usable data answers
//! and the response is tagged with its [`Source`]. Upstream failures are
//! logged and fall through to the next source.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::try_join_all;
use log::{debug, warn};
use serde::Serialize;
use thiserror::Error;

use crate::aggregate::{
    bangkok_today, daily_averages, day_bounds, downsample, keep_latest, last_n_days, monthly_averages,
    pad_days, series_points, SECONDS_PER_DAY,
};
use crate::config::HazemonConfig;
use crate::database::{run_blocking, Database, DatabaseError};
use crate::hazemon::{parse_latest, HazemonClient, HazemonUrls, RangeQuery, UpstreamError};
use crate::reading::{DailyAverage, MonthlyAverage, Reading, Source, TimeSeriesPoint};

pub const DAYS_RANGE: (i64, i64, i64) = (1, 31, 7);
pub const MONTHS_RANGE: (i64, i64, i64) = (1, 24, 12);
pub const HOURS_RANGE: (i64, i64, i64) = (1, 72, 24);
pub const STEP_RANGE: (i64, i64, i64) = (0, 6 * 60 * 60, 15 * 60);
pub const LIMIT_RANGE: (i64, i64, i64) = (10, 5000, 2000);

/// Clamps to `[min, max]`, or `default` when absent.
pub fn clamp_param(value: Option<i64>, (min, max, default): (i64, i64, i64)) -> i64 {
    value.map_or(default, |v| v.clamp(min, max))
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Store(#[from] DatabaseError),
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("no data")]
    NotFound,
    #[error(transparent)]
    Store(DatabaseError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryWindow {
    pub days: u32,
    pub months: u32,
    pub today: NaiveDate,
    pub now: i64,
    pub node: Option<String>,
    pub aggr_minutes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesWindow {
    pub from: i64,
    pub to: i64,
    pub step: i64,
    pub limit: usize,
    pub node: Option<String>,
    pub aggr_minutes: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct History {
    pub daily: Vec<DailyAverage>,
    pub monthly: Vec<MonthlyAverage>,
    /// Hazemon URLs requested while building the answer.
    pub upstream_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub source: Source,
    pub data: T,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryAnswer {
    pub source: Source,
    pub days: i64,
    pub months: i64,
    pub daily: Vec<DailyAverage>,
    pub monthly: Vec<MonthlyAverage>,
    #[serde(skip)]
    pub upstream_urls: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesAnswer {
    pub source: Source,
    pub from: i64,
    pub to: i64,
    pub step: i64,
    pub limit: i64,
    pub points: Vec<TimeSeriesPoint>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryRequest {
    pub days: Option<i64>,
    pub months: Option<i64>,
    pub node: Option<String>,
    pub aggr_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesRequest {
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub hours: Option<i64>,
    pub step: Option<i64>,
    pub limit: Option<i64>,
    pub node: Option<String>,
    pub aggr_minutes: Option<i64>,
}

/// A place PM2.5 data can be read from. `Ok(None)` means "nothing usable
/// here", letting the next source answer.
#[async_trait(?Send)]
pub trait Pm25Source {
    fn source(&self) -> Source;

    async fn latest(&self, node: Option<&str>) -> Result<Option<Reading>, SourceError>;

    async fn history(&self, window: &HistoryWindow) -> Result<Option<History>, SourceError>;

    async fn timeseries(&self, window: &SeriesWindow) -> Result<Option<Vec<TimeSeriesPoint>>, SourceError>;
}

pub struct HazemonSource {
    client: HazemonClient,
    urls: HazemonUrls,
    config: HazemonConfig,
}

impl HazemonSource {
    pub fn new(client: HazemonClient, config: &HazemonConfig) -> Self {
        HazemonSource {
            client,
            urls: HazemonUrls::new(config),
            config: config.clone(),
        }
    }

    fn range(&self, after: i64, before: i64, aggr_minutes: Option<i64>) -> RangeQuery {
        RangeQuery {
            before,
            after,
            aggr_minutes: aggr_minutes.or(self.config.aggr_minutes),
            order: self.config.range_order,
        }
    }
}

#[async_trait(?Send)]
impl Pm25Source for HazemonSource {
    fn source(&self) -> Source {
        Source::Hazemon
    }

    async fn latest(&self, node: Option<&str>) -> Result<Option<Reading>, SourceError> {
        let url = self.urls.base_url(node);
        let response = self.client.fetch(&url, self.config.latest_timeout).await?;
        if !response.ok {
            return Err(UpstreamError::Status(response.status).into());
        }
        Ok(parse_latest(&response.body))
    }

    /// Daily figures come from one request per Bangkok day because Hazemon
    /// silently truncates long ranges. The day requests run concurrently and
    /// the first failure cancels the rest. Monthly figures come from a single
    /// request bounded by `monthly_lookback_days`, so months older than that
    /// are under-represented.
    async fn history(&self, window: &HistoryWindow) -> Result<Option<History>, SourceError> {
        let base = self.urls.base_url(window.node.as_deref());

        let days = last_n_days(window.today, window.days).into_iter().map(|date| {
            let (start, end) = day_bounds(date);
            self.client
                .fetch_series(&base, self.range(start, end, window.aggr_minutes), self.config.fetch_timeout)
        });
        let fetched_days = try_join_all(days).await?;

        let mut upstream_urls = Vec::new();
        let mut readings = Vec::new();
        for fetched in fetched_days {
            upstream_urls.extend(fetched.urls);
            readings.extend(fetched.readings);
        }

        let daily = daily_averages(&readings);
        if daily.is_empty() {
            debug!("Hazemon had no daily data for the last {} days", window.days);
            return Ok(None);
        }

        let since = window.now - self.config.monthly_lookback_days * SECONDS_PER_DAY;
        let fetched = self
            .client
            .fetch_series(&base, self.range(since, window.now, window.aggr_minutes), self.config.fetch_timeout)
            .await?;
        upstream_urls.extend(fetched.urls);

        Ok(Some(History {
            daily: pad_days(daily, window.today, window.days),
            monthly: monthly_averages(&fetched.readings, window.months as usize),
            upstream_urls,
        }))
    }

    async fn timeseries(&self, window: &SeriesWindow) -> Result<Option<Vec<TimeSeriesPoint>>, SourceError> {
        let base = self.urls.base_url(window.node.as_deref());
        let fetched = self
            .client
            .fetch_series(&base, self.range(window.from, window.to, window.aggr_minutes), self.config.fetch_timeout)
            .await?;

        let points = series_points(&fetched.readings, window.to);
        if points.is_empty() {
            return Ok(None);
        }
        Ok(Some(keep_latest(downsample(points, window.step), window.limit)))
    }
}

/// The local store. Always answers history and series queries, with
/// empty data when nothing is stored. A numeric `node` narrows every query
/// to that node id; Hazemon slugs are not node ids and leave it unfiltered.
pub struct StoreSource<D> {
    db: D,
}

impl<D> StoreSource<D> {
    pub fn new(db: D) -> Self {
        StoreSource { db }
    }
}

fn store_node_id(node: Option<&str>) -> Option<i64> {
    node.and_then(|n| n.trim().parse::<i64>().ok())
}

#[async_trait(?Send)]
impl<D: Database + Clone + Send + 'static> Pm25Source for StoreSource<D> {
    fn source(&self) -> Source {
        Source::Store
    }

    async fn latest(&self, node: Option<&str>) -> Result<Option<Reading>, SourceError> {
        let node_id = store_node_id(node);
        match run_blocking(&self.db, move |db| db.latest_reading(node_id)).await {
            Ok(reading) => Ok(Some(reading)),
            Err(DatabaseError::NotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn history(&self, window: &HistoryWindow) -> Result<Option<History>, SourceError> {
        let days = window.days;
        let months = window.months as i64;
        let first_day = last_n_days(window.today, days)
            .first()
            .copied()
            .unwrap_or(window.today);
        let daily_since = day_bounds(first_day).0;
        // Rough window; grouping takes care of month boundaries
        let monthly_since = window.now - months * 32 * SECONDS_PER_DAY;
        let node_id = store_node_id(window.node.as_deref());

        let (daily, monthly) = run_blocking(&self.db, move |db| {
            Ok((
                db.daily_averages(daily_since, days as i64, node_id)?,
                db.monthly_averages(monthly_since, months, node_id)?,
            ))
        })
        .await?;

        Ok(Some(History {
            daily: pad_days(daily, window.today, window.days),
            monthly,
            upstream_urls: Vec::new(),
        }))
    }

    async fn timeseries(&self, window: &SeriesWindow) -> Result<Option<Vec<TimeSeriesPoint>>, SourceError> {
        let (from, to) = (window.from, window.to);
        let node_id = store_node_id(window.node.as_deref());
        let readings = run_blocking(&self.db, move |db| db.readings_between(from, to, node_id)).await?;
        let points = series_points(&readings, window.to);
        Ok(Some(keep_latest(downsample(points, window.step), window.limit)))
    }
}

type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<Option<T>, SourceError>> + 'a>>;

pub struct QueryService {
    sources: Vec<Box<dyn Pm25Source>>,
}

impl QueryService {
    /// Sources are tried in the given order.
    pub fn new(sources: Vec<Box<dyn Pm25Source>>) -> Self {
        QueryService { sources }
    }

    /// Hazemon first, then the store.
    pub fn with_store<D: Database + Clone + Send + 'static>(client: HazemonClient, config: &HazemonConfig, db: D) -> Self {
        QueryService::new(vec![
            Box::new(HazemonSource::new(client, config)),
            Box::new(StoreSource::new(db)),
        ])
    }

    async fn first_available<'a, T, F>(&'a self, operation: &str, call: F) -> Result<Sourced<T>, QueryError>
    where
        F: Fn(&'a dyn Pm25Source) -> SourceFuture<'a, T>,
    {
        let mut last_error = None;
        for source in &self.sources {
            match call(source.as_ref()).await {
                Ok(Some(data)) => {
                    return Ok(Sourced {
                        source: source.source(),
                        data,
                    })
                }
                Ok(None) => debug!("{}: {} had no usable data", operation, source.source()),
                Err(err) => {
                    warn!("{}: {} failed: {}", operation, source.source(), err);
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(SourceError::Store(err)) => Err(QueryError::Store(err)),
            _ => Err(QueryError::NotFound),
        }
    }

    pub async fn get_latest(&self, node: Option<&str>) -> Result<Sourced<Reading>, QueryError> {
        self.first_available("latest", |source| source.latest(node)).await
    }

    pub async fn get_history(&self, request: &HistoryRequest, now: DateTime<Utc>) -> Result<HistoryAnswer, QueryError> {
        let days = clamp_param(request.days, DAYS_RANGE);
        let months = clamp_param(request.months, MONTHS_RANGE);
        let window = HistoryWindow {
            days: days as u32,
            months: months as u32,
            today: bangkok_today(now),
            now: now.timestamp(),
            node: request.node.clone(),
            aggr_minutes: request.aggr_minutes,
        };

        let answer = self.first_available("history", |source| source.history(&window)).await?;
        Ok(HistoryAnswer {
            source: answer.source,
            days,
            months,
            daily: answer.data.daily,
            monthly: answer.data.monthly,
            upstream_urls: answer.data.upstream_urls,
        })
    }

    pub async fn get_timeseries(&self, request: &SeriesRequest, now: DateTime<Utc>) -> Result<SeriesAnswer, QueryError> {
        let now = now.timestamp();
        let (from, to) = match (request.from, request.to) {
            (Some(from), Some(to)) => (from.min(to), from.max(to)),
            (None, None) => {
                let hours = clamp_param(request.hours, HOURS_RANGE);
                (now - hours * 60 * 60, now)
            }
            _ => {
                return Err(QueryError::InvalidRequest(
                    "Provide both ?from=<epoch_seconds>&to=<epoch_seconds> or use ?hours=<n>".to_string(),
                ))
            }
        };
        let step = clamp_param(request.step, STEP_RANGE);
        let limit = clamp_param(request.limit, LIMIT_RANGE);

        let window = SeriesWindow {
            from,
            to,
            step,
            limit: limit as usize,
            node: request.node.clone(),
            aggr_minutes: request.aggr_minutes,
        };

        let answer = self.first_available("timeseries", |source| source.timeseries(&window)).await?;
        Ok(SeriesAnswer {
            source: answer.source,
            from,
            to,
            step,
            limit,
            points: answer.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_database::SqliteDatabase;
    use crate::test_support::{spawn_stub, StubReply};
    use serde_json::{json, Value};
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    // 2024-03-10 05:00:00 UTC, 12:00 in Bangkok
    const NOW: i64 = 1_710_046_800;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(NOW, 0).unwrap()
    }

    fn reading(timestamp: i64, local: &str, pm25: f64) -> Reading {
        Reading {
            node_id: 42,
            node_name: None,
            timestamp,
            datetime_local: Some(local.to_string()),
            pm25: Some(pm25),
            pm10: None,
            pm1: None,
            raw: Value::Null,
        }
    }

    /// Scripted source recording how often it was asked.
    struct Scripted {
        source: Source,
        fail: bool,
        latest: Option<Reading>,
        points: Option<Vec<TimeSeriesPoint>>,
        calls: Rc<Cell<u32>>,
    }

    impl Scripted {
        fn new(source: Source) -> Self {
            Scripted {
                source,
                fail: false,
                latest: None,
                points: None,
                calls: Rc::new(Cell::new(0)),
            }
        }

        fn answer(&self) -> Result<(), SourceError> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                Err(match self.source {
                    Source::Hazemon => SourceError::Upstream(UpstreamError::Timeout(Duration::from_secs(4))),
                    Source::Store => SourceError::Store(DatabaseError::Busy),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait(?Send)]
    impl Pm25Source for Scripted {
        fn source(&self) -> Source {
            self.source
        }

        async fn latest(&self, _node: Option<&str>) -> Result<Option<Reading>, SourceError> {
            self.answer()?;
            Ok(self.latest.clone())
        }

        async fn history(&self, window: &HistoryWindow) -> Result<Option<History>, SourceError> {
            self.answer()?;
            Ok(Some(History {
                daily: pad_days(Vec::new(), window.today, window.days),
                ..History::default()
            }))
        }

        async fn timeseries(&self, _window: &SeriesWindow) -> Result<Option<Vec<TimeSeriesPoint>>, SourceError> {
            self.answer()?;
            Ok(self.points.clone())
        }
    }

    #[test]
    fn clamps_parameters() {
        assert_eq!(clamp_param(None, DAYS_RANGE), 7);
        assert_eq!(clamp_param(Some(0), DAYS_RANGE), 1);
        assert_eq!(clamp_param(Some(90), DAYS_RANGE), 31);
        assert_eq!(clamp_param(Some(100), MONTHS_RANGE), 24);
        assert_eq!(clamp_param(Some(-5), STEP_RANGE), 0);
        assert_eq!(clamp_param(Some(1), LIMIT_RANGE), 10);
        assert_eq!(clamp_param(None, HOURS_RANGE), 24);
    }

    #[actix_web::test]
    async fn upstream_answer_wins() {
        let mut upstream = Scripted::new(Source::Hazemon);
        upstream.latest = Some(reading(200, "2024-03-10 11:55:00", 40.1));
        let store = Scripted::new(Source::Store);
        let store_calls = store.calls.clone();

        let service = QueryService::new(vec![Box::new(upstream), Box::new(store)]);
        let latest = service.get_latest(None).await.unwrap();

        assert_eq!(latest.source, Source::Hazemon);
        assert_eq!(latest.data.timestamp, 200);
        assert_eq!(store_calls.get(), 0);
    }

    #[actix_web::test]
    async fn falls_back_when_upstream_fails_or_is_empty() {
        let mut failing = Scripted::new(Source::Hazemon);
        failing.fail = true;
        let mut store = Scripted::new(Source::Store);
        store.latest = Some(reading(100, "2024-03-10 11:00:00", 12.0));

        let service = QueryService::new(vec![Box::new(failing), Box::new(store)]);
        assert_eq!(service.get_latest(None).await.unwrap().source, Source::Store);

        let empty = Scripted::new(Source::Hazemon);
        let mut store = Scripted::new(Source::Store);
        store.latest = Some(reading(100, "2024-03-10 11:00:00", 12.0));

        let service = QueryService::new(vec![Box::new(empty), Box::new(store)]);
        assert_eq!(service.get_latest(None).await.unwrap().source, Source::Store);
    }

    #[actix_web::test]
    async fn reports_not_found_and_store_failures() {
        let service = QueryService::new(vec![
            Box::new(Scripted::new(Source::Hazemon)),
            Box::new(Scripted::new(Source::Store)),
        ]);
        assert!(matches!(service.get_latest(None).await, Err(QueryError::NotFound)));

        let mut upstream = Scripted::new(Source::Hazemon);
        upstream.fail = true;
        let mut store = Scripted::new(Source::Store);
        store.fail = true;
        let service = QueryService::new(vec![Box::new(upstream), Box::new(store)]);
        assert!(matches!(
            service.get_latest(None).await,
            Err(QueryError::Store(DatabaseError::Busy))
        ));
    }

    #[actix_web::test]
    async fn timeseries_requires_both_bounds() {
        let service = QueryService::new(vec![Box::new(Scripted::new(Source::Store))]);
        let request = SeriesRequest {
            from: Some(100),
            ..SeriesRequest::default()
        };
        assert!(matches!(
            service.get_timeseries(&request, now()).await,
            Err(QueryError::InvalidRequest(_))
        ));
    }

    #[actix_web::test]
    async fn timeseries_window_defaults_and_swaps() {
        let mut store = Scripted::new(Source::Store);
        store.points = Some(Vec::new());
        let service = QueryService::new(vec![Box::new(store)]);

        let answer = service.get_timeseries(&SeriesRequest::default(), now()).await.unwrap();
        assert_eq!((answer.from, answer.to), (NOW - 24 * 3_600, NOW));
        assert_eq!((answer.step, answer.limit), (900, 2000));

        let request = SeriesRequest {
            from: Some(500),
            to: Some(100),
            hours: Some(1),
            step: Some(100_000),
            limit: Some(1),
            ..SeriesRequest::default()
        };
        let answer = service.get_timeseries(&request, now()).await.unwrap();
        assert_eq!((answer.from, answer.to), (100, 500));
        assert_eq!((answer.step, answer.limit), (21_600, 10));
    }

    #[actix_web::test]
    async fn history_is_padded_to_the_requested_days() {
        let service = QueryService::new(vec![Box::new(Scripted::new(Source::Store))]);
        let request = HistoryRequest {
            days: Some(7),
            ..HistoryRequest::default()
        };
        let answer = service.get_history(&request, now()).await.unwrap();

        assert_eq!(answer.days, 7);
        assert_eq!(answer.months, 12);
        assert_eq!(answer.daily.len(), 7);
        let dates: Vec<NaiveDate> = answer
            .daily
            .iter()
            .map(|d| NaiveDate::parse_from_str(&d.date, "%Y-%m-%d").unwrap())
            .collect();
        assert!(dates.windows(2).all(|w| w[1] - w[0] == chrono::Duration::days(1)));
        assert_eq!(answer.daily.last().unwrap().date, "2024-03-10");
    }

    fn one_reading(timestamp: i64, local: &str, pm25: &str) -> Value {
        json!({"time_aggr": {"42": {
            timestamp.to_string(): {"PM2.5": [pm25], "datetime(UTC+7)": [local]}
        }}})
    }

    /// Hazemon stub with data for today and for the monthly range only.
    async fn hazemon_with_one_day() -> crate::test_support::Stub {
        let (today_start, today_end) = day_bounds(bangkok_today(now()));
        let today_path = format!("/node/{}/{}", today_end, today_start);
        let monthly_prefix = format!("/node/{}/", NOW);
        spawn_stub(move |path| {
            if path == today_path {
                StubReply::json(200, one_reading(today_start + 60, "2024-03-10 00:01:00", "25"))
            } else if path.starts_with(&monthly_prefix) {
                StubReply::json(200, one_reading(NOW - 3_600, "2024-02-20 08:00:00", "31"))
            } else {
                StubReply::json(200, json!({"time_aggr": {"42": {}}}))
            }
        })
        .await
    }

    #[actix_web::test]
    async fn hazemon_history_fans_out_per_day() {
        let stub = hazemon_with_one_day().await;
        let config = HazemonConfig {
            direct_url: Some(stub.url("/node")),
            ..HazemonConfig::default()
        };
        let service = QueryService::new(vec![Box::new(HazemonSource::new(HazemonClient::new(), &config))]);

        let request = HistoryRequest {
            days: Some(3),
            months: Some(6),
            ..HistoryRequest::default()
        };
        let answer = service.get_history(&request, now()).await.unwrap();

        assert_eq!(answer.source, Source::Hazemon);
        let daily: Vec<(&str, Option<i64>)> = answer.daily.iter().map(|d| (d.date.as_str(), d.avg)).collect();
        assert_eq!(daily, vec![("2024-03-08", None), ("2024-03-09", None), ("2024-03-10", Some(25))]);
        assert_eq!(
            answer.monthly,
            vec![MonthlyAverage {
                key: "2024-02".to_string(),
                avg: 31,
                count: 1
            }]
        );

        // two empty days are retried with swapped bounds, today answers first try
        let day_requests = stub.hits().iter().filter(|p| !p.starts_with(&format!("/node/{}/", NOW))).count();
        assert_eq!(day_requests, 5);
        assert_eq!(answer.upstream_urls.len(), stub.hits().len());
    }

    #[actix_web::test]
    async fn hazemon_history_uses_node_and_aggr_overrides() {
        let (today_start, _) = day_bounds(bangkok_today(now()));
        let stub = spawn_stub(move |_| {
            StubReply::json(200, one_reading(today_start + 60, "2024-03-10 00:01:00", "25"))
        })
        .await;
        let config = HazemonConfig {
            direct_url: None,
            api_root: stub.url("/root"),
            node_id: Some("configured".to_string()),
            ..HazemonConfig::default()
        };
        let service = QueryService::new(vec![Box::new(HazemonSource::new(HazemonClient::new(), &config))]);

        let request = HistoryRequest {
            days: Some(2),
            node: Some("อบต".to_string()),
            aggr_minutes: Some(60),
            ..HistoryRequest::default()
        };
        let answer = service.get_history(&request, now()).await.unwrap();

        assert_eq!(answer.source, Source::Hazemon);
        let hits = stub.hits();
        assert!(!hits.is_empty());
        for path in hits {
            assert!(path.starts_with("/root/%E0%B8%AD%E0%B8%9A%E0%B8%95/"), "{}", path);
            assert!(path.ends_with("/60"), "{}", path);
        }
    }

    fn store_with_today() -> SqliteDatabase {
        let db = SqliteDatabase::new(":memory:").unwrap();
        db.insert_reading(&reading(NOW - 300, "2024-03-10 11:55:00", 21.0)).unwrap();
        db
    }

    #[actix_web::test]
    async fn store_narrows_to_a_numeric_node() {
        let db = store_with_today();
        let mut other = reading(NOW - 200, "2024-03-10 11:56:40", 90.0);
        other.node_id = 43;
        db.insert_reading(&other).unwrap();
        let store = StoreSource::new(db);

        let window = SeriesWindow {
            from: NOW - 3_600,
            to: NOW,
            step: 0,
            limit: 100,
            node: Some("43".to_string()),
            aggr_minutes: None,
        };
        let points = store.timeseries(&window).await.unwrap().unwrap();
        assert_eq!(points.iter().map(|p| p.pm25).collect::<Vec<_>>(), vec![90.0]);

        // a Hazemon slug is not a node id
        let window = SeriesWindow {
            node: Some("TH-NRT-5068".to_string()),
            ..window
        };
        assert_eq!(store.timeseries(&window).await.unwrap().unwrap().len(), 2);

        let history = HistoryWindow {
            days: 1,
            months: 1,
            today: bangkok_today(now()),
            now: NOW,
            node: Some("42".to_string()),
            aggr_minutes: None,
        };
        let history = store.history(&history).await.unwrap().unwrap();
        assert_eq!(history.daily[0].avg, Some(21));
    }

    #[actix_web::test]
    async fn empty_hazemon_history_falls_back_to_the_store() {
        let stub = spawn_stub(|_| StubReply::json(200, json!({"time_aggr": {"42": {}}}))).await;
        let config = HazemonConfig {
            direct_url: Some(stub.url("/node")),
            ..HazemonConfig::default()
        };
        let service = QueryService::with_store(HazemonClient::new(), &config, store_with_today());

        let history = service.get_history(&HistoryRequest::default(), now()).await.unwrap();

        assert_eq!(history.source, Source::Store);
        assert_eq!(history.daily[6].avg, Some(21));
        // every day asked in both orders, no monthly request
        assert_eq!(stub.hits().len(), 14);
    }

    #[actix_web::test]
    async fn partial_hazemon_history_is_not_mixed_with_the_store() {
        let (today_start, today_end) = day_bounds(bangkok_today(now()));
        let today_path = format!("/node/{}/{}", today_end, today_start);
        let stub = spawn_stub(move |path| {
            if path == today_path {
                StubReply::json(200, one_reading(today_start + 60, "2024-03-10 00:01:00", "99"))
            } else {
                StubReply::json(500, json!({}))
            }
        })
        .await;
        let config = HazemonConfig {
            direct_url: Some(stub.url("/node")),
            ..HazemonConfig::default()
        };
        let service = QueryService::with_store(HazemonClient::new(), &config, store_with_today());

        let history = service.get_history(&HistoryRequest::default(), now()).await.unwrap();

        assert_eq!(history.source, Source::Store);
        assert_eq!(history.daily.len(), 7);
        assert_eq!(history.daily[6].avg, Some(21));
        assert!(history.daily[..6].iter().all(|d| d.avg.is_none()));
        assert_eq!(history.monthly.len(), 1);
        assert_eq!(history.monthly[0].avg, 21);
    }

    #[actix_web::test]
    async fn hazemon_failure_falls_back_to_the_store() {
        let stub = spawn_stub(|_| StubReply::json(500, json!({}))).await;
        let config = HazemonConfig {
            direct_url: Some(stub.url("/node")),
            ..HazemonConfig::default()
        };
        let db = SqliteDatabase::new(":memory:").unwrap();
        db.insert_reading(&reading(NOW - 600, "2024-03-10 11:50:00", 18.0)).unwrap();
        db.insert_reading(&reading(NOW - 300, "2024-03-10 11:55:00", 21.0)).unwrap();

        let service = QueryService::with_store(HazemonClient::new(), &config, db);

        let latest = service.get_latest(None).await.unwrap();
        assert_eq!(latest.source, Source::Store);
        assert_eq!(latest.data.timestamp, NOW - 300);

        let history = service.get_history(&HistoryRequest::default(), now()).await.unwrap();
        assert_eq!(history.source, Source::Store);
        assert_eq!(history.daily.len(), 7);
        assert_eq!(history.daily[6].avg, Some(20));
        assert_eq!(history.daily[6].count, 2);
        assert_eq!(history.monthly.len(), 1);

        let series = service
            .get_timeseries(
                &SeriesRequest {
                    hours: Some(1),
                    step: Some(0),
                    ..SeriesRequest::default()
                },
                now(),
            )
            .await
            .unwrap();
        assert_eq!(series.source, Source::Store);
        let values: Vec<f64> = series.points.iter().map(|p| p.pm25).collect();
        assert_eq!(values, vec![18.0, 21.0]);

        // failures are never retried with swapped bounds
        let hits = stub.hits();
        let mut unique = hits.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), hits.len());
        assert!(hits.iter().all(|p| !p.starts_with(&format!("/node/{}/{}", NOW - 3_600, NOW))));
    }

    #[actix_web::test]
    async fn hazemon_timeseries_is_bucketed_and_limited() {
        let from = NOW - 3 * 3_600;
        let series = json!({"time_aggr": {"42": {
            (from - 60).to_string(): {"PM2.5": ["99"]},
            (from + 60).to_string(): {"PM2.5": ["10"]},
            (from + 120).to_string(): {"PM2.5": ["12"]},
            (from + 3_700).to_string(): {"PM2.5": ["20"]},
            (from + 7_300).to_string(): {"PM2.5": ["30"]},
            (from + 7_400).to_string(): {"PM2.5": ["x"]}
        }}});
        let stub = spawn_stub(move |_| StubReply::json(200, series.clone())).await;
        let config = HazemonConfig {
            direct_url: Some(stub.url("/node")),
            ..HazemonConfig::default()
        };
        let service = QueryService::new(vec![Box::new(HazemonSource::new(HazemonClient::new(), &config))]);

        let request = SeriesRequest {
            hours: Some(3),
            step: Some(3_600),
            limit: Some(10),
            ..SeriesRequest::default()
        };
        let answer = service.get_timeseries(&request, now()).await.unwrap();

        assert_eq!(answer.source, Source::Hazemon);
        let values: Vec<f64> = answer.points.iter().map(|p| p.pm25).collect();
        assert_eq!(values, vec![11.0, 20.0, 30.0]);
        assert_eq!(stub.hits(), vec![format!("/node/{}/{}", NOW, from)]);
    }
}
