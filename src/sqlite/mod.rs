// =====================================================
// SQLITE ADAPTER
// Row cursor out, one parameterized INSERT per record in
// =====================================================

use crate::codec::{Record, RecordReader, RecordWriter};
use crate::driver::{
    normalize_statement, normalize_table, Driver, DriverParameters, DriverState, Parameters,
    RecordInput, RecordOutput,
};
use crate::error::{DriverError, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::ConnectOptions;
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;

pub const DRIVER_NAME: &str = "sqlite";

/// Address that selects a private in-memory database.
pub const MEMORY_ADDRESS: &str = ":memory:";

const ACQUIRE_TIMEOUT_SECS: u64 = 10;

pub struct SqliteDriver {
    params: DriverParameters,
    pool: Option<Pool<Sqlite>>,
    state: DriverState,
}

impl SqliteDriver {
    pub fn new(params: DriverParameters) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            pool: None,
            state: DriverState::Unopened,
        })
    }

    pub fn from_parameters(parameters: &Parameters) -> Result<Box<dyn Driver>> {
        let params = DriverParameters::from_parameters(parameters)?;
        Ok(Box::new(Self::new(params)?))
    }

    /// The underlying pool, once the driver has been opened.
    pub fn pool(&self) -> Option<&Pool<Sqlite>> {
        self.pool.as_ref()
    }

    fn connected_pool(&self, operation: &'static str) -> Result<&Pool<Sqlite>> {
        self.state.ensure_open(operation)?;
        self.pool.as_ref().ok_or(DriverError::Usage {
            operation,
            state: self.state,
        })
    }
}

fn build_connect_options(db_path: &str) -> Result<SqliteConnectOptions> {
    let options = if db_path == MEMORY_ADDRESS {
        SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DriverError::config(format!("Invalid SQLite address: {}", e)))?
    } else {
        SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
    };

    Ok(options.log_statements(log::LevelFilter::Debug))
}

async fn create_pool(params: &DriverParameters) -> Result<Pool<Sqlite>> {
    let db_path = params.address.trim();
    let options = build_connect_options(db_path)?;

    // Every connection to ":memory:" opens its own empty database, and that
    // database lives only as long as the connection.
    let max_connections = if db_path == MEMORY_ADDRESS {
        1
    } else {
        params.max_connections
    };

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
        .idle_timeout(None::<Duration>)
        .max_lifetime(None::<Duration>)
        .connect_with(options)
        .await
        .map_err(|e| {
            DriverError::Connectivity(format!(
                "Failed to connect to SQLite database '{}': {}",
                db_path, e
            ))
        })
}

fn read_record(row: &SqliteRow, column_limit: usize) -> Result<Record> {
    let columns = row.len();
    if columns > column_limit {
        return Err(DriverError::WidthViolation {
            columns,
            limit: column_limit,
        });
    }

    // Unchecked so that INTEGER and REAL columns come back as their text form.
    (0..columns)
        .map(|index| {
            row.try_get_unchecked::<Option<String>, _>(index)
                .map_err(|e| DriverError::stream(format!("Failed to read column {}: {}", index, e)))
        })
        .collect()
}

fn insert_statement(table: &str, columns: usize) -> String {
    format!(
        "INSERT INTO {} VALUES ({})",
        table,
        vec!["?"; columns].join(", ")
    )
}

#[async_trait]
impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn state(&self) -> DriverState {
        self.state
    }

    async fn open(&mut self) -> Result<()> {
        self.state.ensure_openable()?;

        if self.pool.is_none() {
            self.pool = Some(create_pool(&self.params).await?);
        }

        if let Some(pool) = &self.pool {
            sqlx::query("SELECT 1")
                .fetch_one(pool)
                .await
                .map_err(|e| DriverError::Connectivity(format!("Query failed: {}", e)))?;
        }

        info!("SQLite database '{}' is open", self.params.address.trim());
        self.state = DriverState::Open;
        Ok(())
    }

    async fn copy_from(&self, input: RecordInput, table: &str) -> Result<u64> {
        let pool = self.connected_pool("copy into")?;
        let table = normalize_table(table)?;

        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| DriverError::stream(format!("Failed to acquire SQLite connection: {}", e)))?;
        let mut reader = RecordReader::new(input, self.params.column_limit);
        let mut statement: Option<String> = None;
        let mut rows = 0u64;

        // Each row commits on its own: a failure leaves exactly the rows
        // inserted before it.
        while let Some(record) = reader.next_record().await? {
            let sql = statement.get_or_insert_with(|| insert_statement(table, record.len()));
            let mut insert = sqlx::query(sql.as_str());
            for field in record {
                insert = insert.bind(field);
            }
            insert.execute(&mut *conn).await.map_err(|e| {
                DriverError::stream(format!(
                    "Failed to insert row {} into {}: {}",
                    rows + 1,
                    table,
                    e
                ))
            })?;
            rows += 1;
        }

        debug!("Inserted {} rows into SQLite table {}", rows, table);
        Ok(rows)
    }

    async fn copy_to(&self, output: RecordOutput, query: &str) -> Result<u64> {
        let pool = self.connected_pool("copy to")?;
        let statement = normalize_statement(query)?;
        let column_limit = self.params.column_limit;

        let mut rows = sqlx::query(statement).fetch(pool);
        let mut writer = RecordWriter::new(output, column_limit);

        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| DriverError::stream(format!("SQLite query failed: {}", e)))?
        {
            let record = read_record(&row, column_limit)?;
            writer.write_record(&record).await?;
        }

        writer.finish().await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        self.state = DriverState::Closed;
        Ok(())
    }
}
