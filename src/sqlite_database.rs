use std::time::Instant;

use chrono::Utc;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2;
use diesel::result::DatabaseErrorKind;
use diesel::sql_types::{BigInt, Nullable};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, info};

use crate::aggregate::{limit_months, round_pm, BANGKOK_OFFSET_SECS};
use crate::database::{Database, DatabaseError, InsertOutcome};
use crate::reading::{DailyAverage, MonthlyAverage, Reading};
use crate::schema::{self, pm_readings};

type DbPool = r2d2::Pool<r2d2::ConnectionManager<SqliteConnection>>;
type DbConnection = r2d2::PooledConnection<r2d2::ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations/");

#[derive(Debug)]
struct ConnectionOptions;

impl r2d2::CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        // Concurrent collectors wait for the writer instead of failing with "database is locked"
        conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;")
            .map_err(r2d2::Error::QueryError)
    }
}

#[derive(Clone)]
pub struct SqliteDatabase {
    pool: DbPool,
}

impl SqliteDatabase {
    pub fn new(path: &str) -> Result<Self, DatabaseError> {
        let db_manager = r2d2::ConnectionManager::<SqliteConnection>::new(path);
        // Every connection to :memory: is its own database
        let max_size = if path == ":memory:" { 1 } else { 8 };
        let db_pool = r2d2::Pool::builder()
            .max_size(max_size)
            .connection_customizer(Box::new(ConnectionOptions))
            .build(db_manager)
            .map_err(|err| DatabaseError::Other(format!("Could not create database pool: {}", err)))?;

        {
            let mut migration_connection = db_pool.get().map_err(|_| DatabaseError::Busy)?;
            let applied = migration_connection
                .run_pending_migrations(MIGRATIONS)
                .map_err(|err| DatabaseError::Other(format!("Migration failed: {}", err)))?;
            for version in applied {
                info!("Applied migration {}", version);
            }
        }

        info!("Database {} connected", path);
        Ok(SqliteDatabase { pool: db_pool })
    }

    fn connection_or_busy(&self) -> Result<DbConnection, DatabaseError> {
        self.pool.get().map_err(|_| DatabaseError::Busy)
    }

    fn to_reading(dto: schema::ReadingDTO) -> Reading {
        let raw = serde_json::from_str(&dto.raw).unwrap_or(serde_json::Value::String(dto.raw));
        Reading {
            node_id: dto.node_id,
            node_name: dto.node_name,
            timestamp: dto.timestamp,
            datetime_local: dto.datetime_local,
            pm25: dto.pm25,
            pm10: dto.pm10,
            pm1: dto.pm1,
            raw,
        }
    }

    fn sql_error_to_db_error(err: diesel::result::Error) -> DatabaseError {
        match err {
            diesel::result::Error::NotFound => DatabaseError::NotFound,
            diesel::result::Error::AlreadyInTransaction => DatabaseError::Busy,
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => DatabaseError::Conflict,
            diesel::result::Error::DatabaseError(_, _) => {
                let lowercase_err = err.to_string().to_lowercase();
                if lowercase_err.contains("database is locked") {
                    DatabaseError::Busy
                } else {
                    DatabaseError::Other(format!("{:?}", err))
                }
            }
            err => DatabaseError::Other(err.to_string()),
        }
    }

    /// Groups non-null PM2.5 values by a Bangkok-local `strftime` format.
    fn grouped_averages(
        &self,
        format: &str,
        since: i64,
        limit: i64,
        node_id: Option<i64>,
    ) -> Result<Vec<schema::AverageDTO>, DatabaseError> {
        let started = Instant::now();
        let query = format!(
            "SELECT strftime('{}', timestamp + {}, 'unixepoch') AS bucket, \
                    AVG(pm25) AS avg, COUNT(*) AS count \
             FROM pm_readings \
             WHERE timestamp >= ? AND pm25 IS NOT NULL \
               AND (? IS NULL OR node_id = ?) \
             GROUP BY bucket \
             ORDER BY bucket DESC \
             LIMIT ?",
            format, BANGKOK_OFFSET_SECS
        );

        let mut conn = self.connection_or_busy()?;
        let rows = diesel::sql_query(query)
            .bind::<BigInt, _>(since)
            .bind::<Nullable<BigInt>, _>(node_id)
            .bind::<Nullable<BigInt>, _>(node_id)
            .bind::<BigInt, _>(limit)
            .load::<schema::AverageDTO>(&mut conn)
            .map_err(Self::sql_error_to_db_error)?;

        debug!(
            "Grouping by {} took {}ms for {} buckets",
            format,
            started.elapsed().as_millis(),
            rows.len()
        );
        Ok(rows)
    }
}

impl Database for SqliteDatabase {
    fn insert_reading(&self, reading: &Reading) -> Result<InsertOutcome, DatabaseError> {
        let mut conn = self.connection_or_busy()?;
        let row = schema::AddReadingDTO {
            node_id: reading.node_id,
            node_name: reading.node_name.as_deref(),
            timestamp: reading.timestamp,
            datetime_local: reading.datetime_local.as_deref(),
            pm25: reading.pm25,
            pm10: reading.pm10,
            pm1: reading.pm1,
            raw: reading.raw.to_string(),
            created_at: Utc::now().timestamp(),
        };

        match diesel::insert_into(pm_readings::table)
            .values(&row)
            .execute(&mut conn)
            .map_err(Self::sql_error_to_db_error)
        {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(DatabaseError::Conflict) => Ok(InsertOutcome::Duplicate),
            Err(err) => Err(err),
        }
    }

    fn latest_reading(&self, node_id: Option<i64>) -> Result<Reading, DatabaseError> {
        let mut conn = self.connection_or_busy()?;
        let mut query = pm_readings::table
            .select(schema::ReadingDTO::as_select())
            .into_boxed();
        if let Some(node_id) = node_id {
            query = query.filter(pm_readings::node_id.eq(node_id));
        }

        query
            .order_by(pm_readings::timestamp.desc())
            .first::<schema::ReadingDTO>(&mut conn)
            .map(Self::to_reading)
            .map_err(Self::sql_error_to_db_error)
    }

    fn readings_between(&self, from: i64, to: i64, node_id: Option<i64>) -> Result<Vec<Reading>, DatabaseError> {
        let mut conn = self.connection_or_busy()?;
        let mut query = pm_readings::table
            .select(schema::ReadingDTO::as_select())
            .into_boxed();
        if let Some(node_id) = node_id {
            query = query.filter(pm_readings::node_id.eq(node_id));
        }

        query
            .filter(pm_readings::timestamp.ge(from))
            .filter(pm_readings::timestamp.le(to))
            .order_by(pm_readings::timestamp.asc())
            .load::<schema::ReadingDTO>(&mut conn)
            .map(|rows| rows.into_iter().map(Self::to_reading).collect())
            .map_err(Self::sql_error_to_db_error)
    }

    fn daily_averages(&self, since: i64, limit: i64, node_id: Option<i64>) -> Result<Vec<DailyAverage>, DatabaseError> {
        let mut rows: Vec<DailyAverage> = self
            .grouped_averages("%Y-%m-%d", since, limit, node_id)?
            .into_iter()
            .map(|row| DailyAverage {
                date: row.bucket,
                avg: Some(round_pm(row.avg)),
                count: row.count,
            })
            .collect();
        rows.reverse();
        Ok(rows)
    }

    fn monthly_averages(&self, since: i64, limit: i64, node_id: Option<i64>) -> Result<Vec<MonthlyAverage>, DatabaseError> {
        let rows = self
            .grouped_averages("%Y-%m", since, limit, node_id)?
            .into_iter()
            .map(|row| MonthlyAverage {
                key: row.bucket,
                avg: round_pm(row.avg),
                count: row.count,
            })
            .collect();
        Ok(limit_months(rows, limit.max(0) as usize))
    }
}
