use thiserror::Error;

use crate::reading::{DailyAverage, MonthlyAverage, Reading};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DatabaseError {
    #[error("database is busy")]
    Busy,
    #[error("not found")]
    NotFound,
    #[error("conflicting row")]
    Conflict,
    #[error("{0}")]
    Other(String),
}

/// Outcome of an insert keyed by (node_id, timestamp).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The row already existed and was left untouched.
    Duplicate,
}

/// Durable, deduplicating reading storage.
pub trait Database {
    fn insert_reading(&self, reading: &Reading) -> Result<InsertOutcome, DatabaseError>;

    /// Most recent reading, optionally restricted to one node.
    fn latest_reading(&self, node_id: Option<i64>) -> Result<Reading, DatabaseError>;

    /// Readings with `from <= timestamp <= to`, ascending. `node_id` restricts
    /// this and the averages below to one node.
    fn readings_between(&self, from: i64, to: i64, node_id: Option<i64>) -> Result<Vec<Reading>, DatabaseError>;

    /// Per Bangkok day averages of readings since `since`, newest `limit` days, ascending.
    fn daily_averages(&self, since: i64, limit: i64, node_id: Option<i64>) -> Result<Vec<DailyAverage>, DatabaseError>;

    /// Per Bangkok month averages of readings since `since`, newest `limit` months, ascending.
    fn monthly_averages(&self, since: i64, limit: i64, node_id: Option<i64>) -> Result<Vec<MonthlyAverage>, DatabaseError>;
}

/// Runs a store call on the blocking thread pool.
pub async fn run_blocking<D, R, F>(db: &D, f: F) -> Result<R, DatabaseError>
where
    D: Database + Clone + Send + 'static,
    F: FnOnce(&D) -> Result<R, DatabaseError> + Send + 'static,
    R: Send + 'static,
{
    let db = db.clone();
    actix_web::web::block(move || f(&db))
        .await
        .map_err(|err| DatabaseError::Other(err.to_string()))?
}
