// =====================================================
// DRIVER CONTRACT
// What every backend adapter exposes to the copy pipeline
// =====================================================

use crate::codec::DEFAULT_COLUMN_LIMIT;
use crate::error::{DriverError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};

const DEFAULT_USERNAME: &str = "default";
const DEFAULT_MAX_CONNECTIONS: u32 = 4;

/// Flat configuration handed to a driver factory.
pub type Parameters = HashMap<String, Value>;

/// Inbound record stream; dropping it tells the producer to stop.
pub type RecordInput = Box<dyn AsyncRead + Send + Unpin>;

/// Outbound record sink; dropping it ends the stream for the consumer.
pub type RecordOutput = Box<dyn AsyncWrite + Send + Unpin>;

#[async_trait]
pub trait Driver: Send + Sync {
    /// Registry name of the backend.
    fn name(&self) -> &'static str;

    fn state(&self) -> DriverState;

    /// Checks that the backend is reachable. Fails when no link answers.
    async fn open(&mut self) -> Result<()>;

    /// Inserts every record of `input` into `table`, consuming the input
    /// incrementally. Returns the number of rows inserted.
    async fn copy_from(&self, input: RecordInput, table: &str) -> Result<u64>;

    /// Runs `query` and writes one record per result row to `output` as rows
    /// arrive. Returns the number of rows written.
    async fn copy_to(&self, output: RecordOutput, query: &str) -> Result<u64>;

    /// Releases connections. Safe to call in any state, any number of times.
    async fn close(&mut self) -> Result<()>;
}

// --- Lifecycle ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverState {
    #[default]
    Unopened,
    Open,
    Closed,
}

impl DriverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverState::Unopened => "unopened",
            DriverState::Open => "open",
            DriverState::Closed => "closed",
        }
    }

    pub fn ensure_open(self, operation: &'static str) -> Result<()> {
        if self == DriverState::Open {
            Ok(())
        } else {
            Err(DriverError::Usage {
                operation,
                state: self,
            })
        }
    }

    /// A closed driver stays closed.
    pub fn ensure_openable(self) -> Result<()> {
        if self == DriverState::Closed {
            Err(DriverError::Usage {
                operation: "open",
                state: self,
            })
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Parameters ---

/// Connection parameters common to all adapters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct DriverParameters {
    #[serde(alias = "Address")]
    pub address: String,
    #[serde(alias = "Username")]
    pub username: String,
    #[serde(alias = "Password")]
    pub password: Option<String>,
    #[serde(alias = "Database")]
    pub database: Option<String>,
    #[serde(alias = "ColumnLimit")]
    pub column_limit: usize,
    #[serde(alias = "MaxConnections")]
    pub max_connections: u32,
}

impl Default for DriverParameters {
    fn default() -> Self {
        Self {
            address: String::new(),
            username: DEFAULT_USERNAME.to_string(),
            password: None,
            database: None,
            column_limit: DEFAULT_COLUMN_LIMIT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl DriverParameters {
    pub fn from_parameters(parameters: &Parameters) -> Result<Self> {
        let object = parameters
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect::<serde_json::Map<String, Value>>();

        let params: DriverParameters = serde_json::from_value(Value::Object(object))
            .map_err(|e| DriverError::config(format!("Invalid driver parameters: {}", e)))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(DriverError::config("address is required"));
        }
        if self.column_limit == 0 {
            return Err(DriverError::config("column_limit must be at least 1"));
        }
        if self.max_connections == 0 {
            return Err(DriverError::config("max_connections must be at least 1"));
        }
        Ok(())
    }

    pub fn normalized_database(&self) -> Option<&str> {
        self.database
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

// --- Shared helpers ---

/// Trims whitespace and trailing semicolons so the statement can be wrapped.
pub fn normalize_statement(query: &str) -> Result<&str> {
    let statement = query.trim().trim_end_matches(';').trim_end();
    if statement.is_empty() {
        return Err(DriverError::config("query is empty"));
    }
    Ok(statement)
}

pub fn normalize_table(table: &str) -> Result<&str> {
    let table = table.trim();
    if table.is_empty() {
        return Err(DriverError::config("destination table name is required"));
    }
    Ok(table)
}
