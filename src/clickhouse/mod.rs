// =====================================================
// ClickHouse ADAPTER (HTTP interface)
// =====================================================

mod cluster;

pub use cluster::{select_active, Cluster, Link};

use crate::codec::{encode, Field, Record, RecordReader, RecordWriter};
use crate::driver::{
    normalize_statement, normalize_table, Driver, DriverParameters, DriverState, Parameters,
    RecordInput, RecordOutput,
};
use crate::error::{DriverError, Result};
use async_trait::async_trait;
use clickhouse::{Client, Compression};
use futures::future::join_all;
use futures::{stream, StreamExt};
use log::{debug, info, warn};
use serde_json::Value;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

pub const DRIVER_NAME: &str = "clickhouse";

const PROBE_TIMEOUT_SECS: u64 = 10;
const ERROR_SNIPPET_LEN: usize = 200;

pub struct ClickHouseDriver {
    params: DriverParameters,
    cluster: Cluster,
    http: reqwest::Client,
    state: DriverState,
}

impl ClickHouseDriver {
    pub fn new(params: DriverParameters) -> Result<Self> {
        params.validate()?;
        let cluster = Cluster::from_address(&params.address)?;

        Ok(Self {
            params,
            cluster,
            http: reqwest::Client::new(),
            state: DriverState::Unopened,
        })
    }

    pub fn from_parameters(parameters: &Parameters) -> Result<Box<dyn Driver>> {
        let params = DriverParameters::from_parameters(parameters)?;
        Ok(Box::new(Self::new(params)?))
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Probes every link and re-selects the active one.
    pub async fn check(&mut self) -> Result<()> {
        let probes = self
            .cluster
            .links()
            .iter()
            .map(|link| probe_link(create_client(&link.url, &self.params)));
        let results = join_all(probes).await;

        let mut failures = Vec::new();
        let health = results
            .into_iter()
            .zip(self.cluster.links())
            .map(|(result, link)| match result {
                Ok(()) => {
                    debug!("ClickHouse link {} is up", link.url);
                    true
                }
                Err(e) => {
                    warn!("ClickHouse link {} is down: {}", link.url, e);
                    failures.push(format!("{}: {}", link.url, e));
                    false
                }
            })
            .collect::<Vec<_>>();

        self.cluster.apply_health(&health);
        match self.cluster.active_link() {
            Some(link) => {
                info!("Using ClickHouse link {}", link.url);
                Ok(())
            }
            None => Err(DriverError::Connectivity(format!(
                "all clickhouse hosts down ({})",
                failures.join("; ")
            ))),
        }
    }

    fn active_url(&self) -> Result<&str> {
        self.cluster
            .active_link()
            .map(|link| link.url.as_str())
            .ok_or_else(|| DriverError::Connectivity("no healthy ClickHouse link".to_string()))
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut rb = self
            .http
            .post(url)
            .query(&[("user", &self.params.username)]);

        if let Some(pwd) = &self.params.password {
            rb = rb.query(&[("password", pwd)]);
        }

        if let Some(db) = self.params.normalized_database() {
            rb = rb.query(&[("database", db)]);
        }

        rb
    }
}

fn create_client(url: &str, params: &DriverParameters) -> Client {
    let mut client = Client::default()
        .with_url(url)
        .with_user(&params.username)
        .with_compression(Compression::None);

    if let Some(pwd) = &params.password {
        client = client.with_password(pwd);
    }

    if let Some(db) = params.normalized_database() {
        client = client.with_database(db);
    }

    client
}

async fn probe_link(client: Client) -> std::result::Result<(), String> {
    let probe = client.query("SELECT 1").fetch_one::<u8>();
    let result = tokio::time::timeout(Duration::from_secs(PROBE_TIMEOUT_SECS), probe)
        .await
        .map_err(|_| format!("no answer within {}s", PROBE_TIMEOUT_SECS))?
        .map_err(|e| format!("ClickHouse connection failed: {}", e))?;

    if result == 1 {
        Ok(())
    } else {
        Err("ClickHouse returned unexpected result during connection test".to_string())
    }
}

// --- Row conversion ---

fn parse_json_row(line: &str) -> Result<Record> {
    let values: Vec<Value> = serde_json::from_str(line).map_err(|_| {
        DriverError::stream(format!("Unexpected ClickHouse output: {}", snippet(line)))
    })?;
    Ok(values.into_iter().map(value_to_field).collect())
}

fn value_to_field(value: Value) -> Field {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn snippet(text: &str) -> &str {
    let text = text.trim();
    match text.char_indices().nth(ERROR_SNIPPET_LEN) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

type InputSlot = Arc<Mutex<Option<RecordReader<RecordInput>>>>;

fn take_reader(slot: &InputSlot) -> Option<RecordReader<RecordInput>> {
    slot.lock().ok().and_then(|mut reader| reader.take())
}

// A reader handed back after the insert was cut off is dropped instead.
fn return_reader(
    slot: &InputSlot,
    cancel: &CancellationToken,
    reader: RecordReader<RecordInput>,
) {
    if let Ok(mut held) = slot.lock() {
        if !cancel.is_cancelled() {
            *held = Some(reader);
        }
    }
}

fn take_failure(slot: &Mutex<Option<DriverError>>) -> Option<DriverError> {
    slot.lock().ok().and_then(|mut failure| failure.take())
}

fn store_failure(slot: &Mutex<Option<DriverError>>, error: DriverError) {
    if let Ok(mut failure) = slot.lock() {
        failure.get_or_insert(error);
    }
}

#[async_trait]
impl Driver for ClickHouseDriver {
    fn name(&self) -> &'static str {
        DRIVER_NAME
    }

    fn state(&self) -> DriverState {
        self.state
    }

    async fn open(&mut self) -> Result<()> {
        self.state.ensure_openable()?;
        self.check().await?;
        self.state = DriverState::Open;
        Ok(())
    }

    async fn copy_from(&self, input: RecordInput, table: &str) -> Result<u64> {
        self.state.ensure_open("copy into")?;
        let table = normalize_table(table)?;
        let url = self.active_url()?;
        let column_limit = self.params.column_limit;

        let rows = Arc::new(AtomicU64::new(0));
        let failure = Arc::new(Mutex::new(None));
        let input: InputSlot = Arc::new(Mutex::new(Some(RecordReader::new(input, column_limit))));
        let cancel = CancellationToken::new();

        // Records are re-encoded one by one as the HTTP body is pulled, so the
        // input is never held in full.
        let state = (
            Arc::clone(&input),
            cancel.clone(),
            Arc::clone(&rows),
            Arc::clone(&failure),
        );
        let body = stream::try_unfold(state, move |(input, cancel, rows, failure)| async move {
            let Some(mut reader) = take_reader(&input) else {
                return Ok(None);
            };
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                next = reader.next_record() => next,
            };
            let line = match next {
                Ok(Some(record)) => encode(&record, column_limit),
                Ok(None) => return Ok(None),
                Err(e) => Err(e),
            };
            match line {
                Ok(line) => {
                    return_reader(&input, &cancel, reader);
                    rows.fetch_add(1, Ordering::Relaxed);
                    Ok(Some((line, (input, cancel, rows, failure))))
                }
                Err(e) => {
                    let message = e.to_string();
                    store_failure(&failure, e);
                    Err(io::Error::other(message))
                }
            }
        });

        let statement = format!("INSERT INTO {} FORMAT CSV", table);
        debug!("ClickHouse insert via {}: {}", url, statement);

        let response = self
            .request(url)
            .query(&[("query", statement.as_str())])
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await;

        // The server may answer before the body is done; the input must close
        // now so the producer is not left writing into a pipe nobody reads.
        cancel.cancel();
        drop(take_reader(&input));

        let input_failure = take_failure(&failure);
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                return Err(input_failure.unwrap_or_else(|| {
                    DriverError::stream(format!("ClickHouse insert failed: {}", e))
                }))
            }
        };
        if let Some(e) = input_failure {
            return Err(e);
        }

        let status = response.status();
        if !status.is_success() {
            let err_body = response.text().await.unwrap_or_default();
            return Err(DriverError::stream(format!(
                "ClickHouse error ({}): {}",
                status,
                snippet(&err_body)
            )));
        }

        Ok(rows.load(Ordering::Relaxed))
    }

    async fn copy_to(&self, output: RecordOutput, query: &str) -> Result<u64> {
        self.state.ensure_open("copy to")?;
        let statement = format!("{} FORMAT JSONCompactEachRow", normalize_statement(query)?);
        let url = self.active_url()?;
        debug!("ClickHouse query via {}: {}", url, statement);

        let response = self
            .request(url)
            .body(statement)
            .send()
            .await
            .map_err(|e| DriverError::stream(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let err_body = response.text().await.unwrap_or_default();
            return Err(DriverError::stream(format!(
                "ClickHouse error ({}): {}",
                status,
                snippet(&err_body)
            )));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other));
        let mut lines = StreamReader::new(Box::pin(body)).lines();
        let mut writer = RecordWriter::new(output, self.params.column_limit);

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| DriverError::from_io(e, "Failed to read ClickHouse response"))?
        {
            if line.trim().is_empty() {
                continue;
            }
            let record = parse_json_row(&line)?;
            writer.write_record(&record).await?;
        }

        writer.finish().await
    }

    async fn close(&mut self) -> Result<()> {
        // HTTP links hold nothing that needs tearing down.
        self.state = DriverState::Closed;
        Ok(())
    }
}
