//! Daily/monthly PM2.5 averages and time-series down-sampling.
//!
//! All calendar arithmetic happens at the fixed Asia/Bangkok offset (UTC+7,
//! no daylight saving). Upstream readings are grouped by the date part of
//! their reported local time instead of re-deriving it from the timestamp,
//! which is only used when no local time was reported.
//!
//! Averages are rounded half away from zero, so the mean of 10 and 11 is 11.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};

use crate::reading::{DailyAverage, MonthlyAverage, Reading, TimeSeriesPoint};

pub const BANGKOK_OFFSET_SECS: i32 = 7 * 60 * 60;
pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

pub fn bangkok() -> FixedOffset {
    FixedOffset::east_opt(BANGKOK_OFFSET_SECS).expect("UTC+7 is a valid offset")
}

pub fn round_pm(value: f64) -> i64 {
    value.round() as i64
}

pub fn bangkok_today(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&bangkok()).date_naive()
}

/// Bangkok calendar date of an epoch timestamp.
pub fn bangkok_date(epoch: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(epoch, 0).map(bangkok_today)
}

/// First and last epoch second of a Bangkok calendar day.
pub fn day_bounds(date: NaiveDate) -> (i64, i64) {
    let start = date.and_time(NaiveTime::default()).and_utc().timestamp() - BANGKOK_OFFSET_SECS as i64;
    (start, start + SECONDS_PER_DAY - 1)
}

/// The `days` calendar days ending with `today`, oldest first.
pub fn last_n_days(today: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (0..days as i64)
        .rev()
        .filter_map(|back| today.checked_sub_signed(Duration::days(back)))
        .collect()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Reported local date; derived from the timestamp only when none was reported.
fn local_date(reading: &Reading) -> Option<NaiveDate> {
    match reading.datetime_local.as_deref() {
        Some(local) => NaiveDate::parse_from_str(local.get(..10)?, "%Y-%m-%d").ok(),
        None => bangkok_date(reading.timestamp),
    }
}

#[derive(Default)]
struct Accumulator {
    sum: f64,
    count: i64,
}

impl Accumulator {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(&self) -> Option<i64> {
        if self.count == 0 {
            None
        } else {
            Some(round_pm(self.sum / self.count as f64))
        }
    }
}

fn group_pm25<K, F>(readings: &[Reading], key: F) -> BTreeMap<K, Accumulator>
where
    K: Ord,
    F: Fn(&Reading) -> Option<K>,
{
    let mut groups: BTreeMap<K, Accumulator> = BTreeMap::new();
    for reading in readings {
        let value = match reading.pm25 {
            Some(value) if value.is_finite() => value,
            _ => continue,
        };
        if let Some(key) = key(reading) {
            groups.entry(key).or_default().add(value);
        }
    }
    groups
}

/// One row per local day that has at least one PM2.5 value, oldest first.
pub fn daily_averages(readings: &[Reading]) -> Vec<DailyAverage> {
    group_pm25(readings, local_date)
        .into_iter()
        .map(|(date, acc)| DailyAverage {
            date: format_date(date),
            avg: acc.mean(),
            count: acc.count,
        })
        .collect()
}

/// Exactly `days` rows ending at `today`; days without a row become
/// `{avg: null, count: 0}`.
pub fn pad_days(rows: Vec<DailyAverage>, today: NaiveDate, days: u32) -> Vec<DailyAverage> {
    let mut by_date: BTreeMap<String, DailyAverage> =
        rows.into_iter().map(|row| (row.date.clone(), row)).collect();

    last_n_days(today, days)
        .into_iter()
        .map(format_date)
        .map(|date| by_date.remove(&date).unwrap_or_else(|| DailyAverage::empty(date)))
        .collect()
}

/// Newest `months` rows, returned oldest first.
pub fn limit_months(mut rows: Vec<MonthlyAverage>, months: usize) -> Vec<MonthlyAverage> {
    rows.sort_by(|a, b| b.key.cmp(&a.key));
    rows.truncate(months);
    rows.reverse();
    rows
}

pub fn monthly_averages(readings: &[Reading], months: usize) -> Vec<MonthlyAverage> {
    let rows = group_pm25(readings, |r| local_date(r).map(|d| d.format("%Y-%m").to_string()))
        .into_iter()
        .filter_map(|(key, acc)| {
            acc.mean().map(|avg| MonthlyAverage {
                key,
                avg,
                count: acc.count,
            })
        })
        .collect();
    limit_months(rows, months)
}

/// Readings up to `to` that carry a finite PM2.5 value.
pub fn series_points(readings: &[Reading], to: i64) -> Vec<TimeSeriesPoint> {
    readings
        .iter()
        .filter(|r| r.timestamp <= to)
        .filter_map(|r| match r.pm25 {
            Some(pm25) if pm25.is_finite() => Some(TimeSeriesPoint {
                timestamp: r.timestamp,
                datetime_local: r.datetime_local.clone(),
                pm25,
                count: 1,
            }),
            _ => None,
        })
        .collect()
}

/// Averages points into `step`-second buckets aligned to the epoch.
/// A step of zero returns the points unchanged.
pub fn downsample(points: Vec<TimeSeriesPoint>, step: i64) -> Vec<TimeSeriesPoint> {
    if step <= 0 {
        return points;
    }

    struct Bucket {
        acc: Accumulator,
        datetime_local: Option<String>,
    }

    let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();
    for point in points {
        let bucket_ts = point.timestamp.div_euclid(step) * step;
        let bucket = buckets.entry(bucket_ts).or_insert_with(|| Bucket {
            acc: Accumulator::default(),
            datetime_local: None,
        });
        if point.pm25.is_finite() {
            bucket.acc.add(point.pm25);
        }
        if point.datetime_local.is_some() {
            bucket.datetime_local = point.datetime_local;
        }
    }

    buckets
        .into_iter()
        .filter_map(|(timestamp, bucket)| {
            bucket.acc.mean().map(|avg| TimeSeriesPoint {
                timestamp,
                datetime_local: bucket.datetime_local,
                pm25: avg as f64,
                count: bucket.acc.count,
            })
        })
        .collect()
}

/// The most recent `limit` points of an ascending series.
pub fn keep_latest(mut points: Vec<TimeSeriesPoint>, limit: usize) -> Vec<TimeSeriesPoint> {
    if points.len() > limit {
        points.drain(..points.len() - limit);
    }
    points
}
