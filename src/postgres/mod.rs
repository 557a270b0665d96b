// =====================================================
// POSTGRESQL ADAPTER
// COPY ... TO STDOUT / COPY ... FROM STDIN in CSV format
// =====================================================

use crate::codec::{encode, RecordReader, RecordWriter};
use crate::driver::{
    normalize_statement, normalize_table, Driver, DriverParameters, DriverState, Parameters,
    RecordInput, RecordOutput,
};
use crate::error::{DriverError, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use log::{debug, info, warn};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::ConnectOptions;
use sqlx::{Pool, Postgres};
use std::io;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

pub const DRIVER_NAME: &str = "postgres";

const DEFAULT_PORT: u16 = 5432;
const ACQUIRE_TIMEOUT_SECS: u64 = 10;
const SEND_BUFFER_SIZE: usize = 64 * 1024;

pub struct PostgresDriver {
    params: DriverParameters,
    pool: Option<Pool<Postgres>>,
    state: DriverState,
}

impl PostgresDriver {
    pub fn new(params: DriverParameters) -> Result<Self> {
        params.validate()?;
        split_address(&params.address)?;
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

    pub fn pool(&self) -> Option<&Pool<Postgres>> {
        self.pool.as_ref()
    }

    fn connected_pool(&self, operation: &'static str) -> Result<&Pool<Postgres>> {
        self.state.ensure_open(operation)?;
        self.pool.as_ref().ok_or(DriverError::Usage {
            operation,
            state: self.state,
        })
    }
}

fn split_address(address: &str) -> Result<(&str, u16)> {
    let address = address.trim();
    match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|e| {
                DriverError::config(format!("Invalid port in address '{}': {}", address, e))
            })?;
            Ok((host, port))
        }
        None => Ok((address, DEFAULT_PORT)),
    }
}

fn build_connect_options(params: &DriverParameters) -> Result<PgConnectOptions> {
    let (host, port) = split_address(&params.address)?;
    let mut options = PgConnectOptions::new()
        .host(host)
        .port(port)
        .username(&params.username);

    if let Some(pwd) = &params.password {
        options = options.password(pwd);
    }

    if let Some(db) = params.normalized_database() {
        options = options.database(db);
    }

    Ok(options.log_statements(log::LevelFilter::Debug))
}

async fn create_pool(params: &DriverParameters) -> Result<Pool<Postgres>> {
    let options = build_connect_options(params)?;

    PgPoolOptions::new()
        .max_connections(params.max_connections)
        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
        .connect_with(options)
        .await
        .map_err(|e| {
            let err_msg = e.to_string();
            if err_msg.contains("connection refused") {
                return DriverError::Connectivity(format!(
                    "Connection refused, check if PostgreSQL is running on {}",
                    params.address.trim()
                ));
            }
            DriverError::Connectivity(format!("Connection failed: {}", e))
        })
}

// COPY csv output writes a row whose only column is NULL as an empty line.
fn copy_out_reader<R: AsyncRead + Unpin>(input: R, column_limit: usize) -> RecordReader<R> {
    RecordReader::new(input, column_limit).with_blank_as_null()
}

async fn next_line<R: AsyncRead + Unpin>(
    reader: &mut RecordReader<R>,
    column_limit: usize,
) -> Result<Option<Vec<u8>>> {
    match reader.next_record().await? {
        Some(record) => encode(&record, column_limit).map(Some),
        None => Ok(None),
    }
}

#[async_trait]
impl Driver for PostgresDriver {
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

        info!("PostgreSQL at {} is open", self.params.address.trim());
        self.state = DriverState::Open;
        Ok(())
    }

    async fn copy_from(&self, input: RecordInput, table: &str) -> Result<u64> {
        let pool = self.connected_pool("copy into")?;
        let table = normalize_table(table)?;
        let column_limit = self.params.column_limit;

        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| DriverError::stream(format!("Failed to acquire PostgreSQL connection: {}", e)))?;
        let statement = format!("COPY {} FROM STDIN WITH (FORMAT csv)", table);
        let mut copy_in = conn
            .copy_in_raw(&statement)
            .await
            .map_err(|e| DriverError::stream(format!("PostgreSQL COPY failed: {}", e)))?;

        let mut reader = RecordReader::new(input, column_limit);
        let mut buffer = Vec::with_capacity(SEND_BUFFER_SIZE);

        loop {
            let line = match next_line(&mut reader, column_limit).await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("Aborting COPY into {}: {}", table, e);
                    if let Err(abort_err) = copy_in.abort(e.to_string()).await {
                        warn!("Failed to abort COPY into {}: {}", table, abort_err);
                    }
                    return Err(e);
                }
            };

            buffer.extend_from_slice(&line);
            if buffer.len() >= SEND_BUFFER_SIZE {
                copy_in
                    .send(buffer.as_slice())
                    .await
                    .map_err(|e| DriverError::stream(format!("PostgreSQL COPY failed: {}", e)))?;
                buffer.clear();
            }
        }

        if !buffer.is_empty() {
            copy_in
                .send(buffer.as_slice())
                .await
                .map_err(|e| DriverError::stream(format!("PostgreSQL COPY failed: {}", e)))?;
        }

        let rows = copy_in
            .finish()
            .await
            .map_err(|e| DriverError::stream(format!("PostgreSQL COPY failed: {}", e)))?;
        debug!("Copied {} rows into PostgreSQL table {}", rows, table);
        Ok(rows)
    }

    async fn copy_to(&self, output: RecordOutput, query: &str) -> Result<u64> {
        let pool = self.connected_pool("copy to")?;
        let statement = format!(
            "COPY ({}) TO STDOUT WITH (FORMAT csv)",
            normalize_statement(query)?
        );
        let column_limit = self.params.column_limit;

        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| DriverError::stream(format!("Failed to acquire PostgreSQL connection: {}", e)))?;
        let chunks = conn
            .copy_out_raw(&statement)
            .await
            .map_err(|e| DriverError::stream(format!("PostgreSQL COPY failed: {}", e)))?;

        // COPY output is already CSV; it is re-framed so the column limit and
        // the CRLF terminator hold for every backend.
        let mut reader =
            copy_out_reader(StreamReader::new(chunks.map_err(io::Error::other)), column_limit);
        let mut writer = RecordWriter::new(output, column_limit);

        while let Some(record) = reader.next_record().await? {
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
