//! Error kinds shared by the codec, the drivers and the copy pipeline.

use crate::driver::DriverState;
use std::io;
use thiserror::Error;

/// Everything a driver operation can fail with.
///
/// None of these are retried inside the crate; retry policy belongs to
/// whoever wraps the whole copy.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Bad or missing parameters, detected before any connection is made.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No link to the backend answered the liveness check.
    #[error("Connectivity failure: {0}")]
    Connectivity(String),

    /// A row is wider than the column slot limit of the adapter.
    #[error("Record has {columns} columns, exceeding the column slot limit of {limit}")]
    WidthViolation { columns: usize, limit: usize },

    /// Cursor, codec or bulk-insert failure while a copy is in progress.
    #[error("Stream failure: {0}")]
    Stream(String),

    /// The other end of the record pipe went away.
    #[error("Record stream closed by the other side")]
    PipeClosed,

    /// Operation invoked on a driver that is not open.
    #[error("Cannot {operation} a driver that is {state}")]
    Usage {
        operation: &'static str,
        state: DriverState,
    },
}

impl DriverError {
    pub fn stream(message: impl Into<String>) -> Self {
        DriverError::Stream(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        DriverError::Config(message.into())
    }

    /// Classifies an I/O error raised on a record endpoint.
    pub fn from_io(error: io::Error, context: &str) -> Self {
        if error.kind() == io::ErrorKind::BrokenPipe {
            return DriverError::PipeClosed;
        }
        DriverError::Stream(format!("{}: {}", context, error))
    }

    pub fn is_pipe_closed(&self) -> bool {
        matches!(self, DriverError::PipeClosed)
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
