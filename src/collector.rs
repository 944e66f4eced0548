use std::time::Duration;

use log::{error, info, warn};
use thiserror::Error;

use crate::config::HazemonConfig;
use crate::database::{run_blocking, Database, DatabaseError, InsertOutcome};
use crate::hazemon::{parse_latest, HazemonClient, HazemonUrls, UpstreamError};
use crate::reading::Reading;

#[derive(Debug, Clone, PartialEq)]
pub enum CollectOutcome {
    Saved(Reading),
    /// Already stored by an earlier run.
    Duplicate(Reading),
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("Hazemon returned no readings")]
    NoData,
    #[error("storing the reading failed: {0}")]
    Store(#[from] DatabaseError),
}

/// Fetches the newest Hazemon reading and stores it once per (node, timestamp).
#[derive(Clone)]
pub struct Collector<D: Database> {
    client: HazemonClient,
    url: String,
    timeout: Duration,
    db: D,
}

impl<D: Database + Clone + Send + 'static> Collector<D> {
    pub fn new(client: HazemonClient, config: &HazemonConfig, db: D) -> Self {
        Collector {
            client,
            url: HazemonUrls::new(config).base_url(None),
            timeout: config.fetch_timeout,
            db,
        }
    }

    pub async fn collect(&self) -> Result<CollectOutcome, CollectError> {
        let result = self.try_collect().await;
        match &result {
            Ok(CollectOutcome::Saved(reading)) => info!(
                "Collected node={} timestamp={} pm25={:?} datetime_local={:?}",
                reading.node_id, reading.timestamp, reading.pm25, reading.datetime_local
            ),
            Ok(CollectOutcome::Duplicate(reading)) => info!(
                "Reading node={} timestamp={} already stored",
                reading.node_id, reading.timestamp
            ),
            Err(CollectError::Store(err)) => error!("Collect failed to store reading: {}", err),
            Err(err) => warn!("Collect failed: {}", err),
        }
        result
    }

    async fn try_collect(&self) -> Result<CollectOutcome, CollectError> {
        let response = self.client.fetch(&self.url, self.timeout).await?;
        if !response.ok {
            return Err(UpstreamError::Status(response.status).into());
        }

        let latest = parse_latest(&response.body).ok_or(CollectError::NoData)?;

        let row = latest.clone();
        match run_blocking(&self.db, move |db| db.insert_reading(&row)).await? {
            InsertOutcome::Inserted => Ok(CollectOutcome::Saved(latest)),
            InsertOutcome::Duplicate => Ok(CollectOutcome::Duplicate(latest)),
        }
    }
}
