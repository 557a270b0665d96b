// =====================================================
// COPY ORCHESTRATOR
// Pipes one driver's CopyTo into another driver's CopyFrom
// =====================================================

use crate::driver::Driver;
use crate::error::DriverError;
use log::{info, warn};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Bytes the pipe holds before the source is made to wait.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOptions {
    pub pipe_capacity: usize,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopySummary {
    pub rows_read: u64,
    pub rows_written: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopySide {
    Source,
    Destination,
}

impl CopySide {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopySide::Source => "source",
            CopySide::Destination => "destination",
        }
    }
}

impl fmt::Display for CopySide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed copy. `cause` is the authoritative error; `auxiliary` is what the
/// other side reported, if it failed too.
#[derive(Error, Debug)]
#[error("Copy failed on the {side} side: {cause}")]
pub struct CopyError {
    pub side: CopySide,
    pub cause: DriverError,
    pub auxiliary: Option<DriverError>,
}

impl CopyError {
    fn new(side: CopySide, cause: DriverError, auxiliary: Option<DriverError>) -> Self {
        Self {
            side,
            cause,
            auxiliary,
        }
    }
}

/// Streams the result of `query` on `source` into `table` on `destination`.
///
/// Both drivers must already be open. Rows flow through a bounded pipe, so
/// the source waits whenever the destination falls behind. Nothing is
/// retried and nothing is rolled back: on failure the destination keeps
/// whatever it committed before the error.
pub async fn copy(
    source: &dyn Driver,
    destination: &dyn Driver,
    query: &str,
    table: &str,
    options: &CopyOptions,
) -> Result<CopySummary, CopyError> {
    source
        .state()
        .ensure_open("copy from")
        .map_err(|e| CopyError::new(CopySide::Source, e, None))?;
    destination
        .state()
        .ensure_open("copy into")
        .map_err(|e| CopyError::new(CopySide::Destination, e, None))?;
    if options.pipe_capacity == 0 {
        return Err(CopyError::new(
            CopySide::Source,
            DriverError::config("pipe_capacity must be at least 1"),
            None,
        ));
    }

    info!(
        "Copying from {} into {} table {}",
        source.name(),
        destination.name(),
        table
    );
    let started = Instant::now();

    // Each end owns its half of the pipe; when one side returns, its half is
    // dropped, which ends or breaks the stream for the other side.
    let (writer, reader) = tokio::io::duplex(options.pipe_capacity);
    let (produced, consumed) = tokio::join!(
        source.copy_to(Box::new(writer), query),
        destination.copy_from(Box::new(reader), table),
    );

    let result = resolve(produced, consumed, started.elapsed());
    match &result {
        Ok(summary) => {
            if summary.rows_read != summary.rows_written {
                warn!(
                    "Source produced {} rows but destination reported {}",
                    summary.rows_read, summary.rows_written
                );
            }
            info!(
                "Copied {} rows into {} in {:?}",
                summary.rows_written, table, summary.elapsed
            );
        }
        Err(e) => match &e.auxiliary {
            Some(auxiliary) => warn!("{} (other side: {})", e, auxiliary),
            None => warn!("{}", e),
        },
    }
    result
}

fn resolve(
    produced: Result<u64, DriverError>,
    consumed: Result<u64, DriverError>,
    elapsed: Duration,
) -> Result<CopySummary, CopyError> {
    match (produced, consumed) {
        (Ok(rows_read), Ok(rows_written)) => Ok(CopySummary {
            rows_read,
            rows_written,
            elapsed,
        }),
        (Err(cause), Ok(_)) => Err(CopyError::new(CopySide::Source, cause, None)),
        (Ok(_), Err(cause)) => Err(CopyError::new(CopySide::Destination, cause, None)),
        // The destination stopped reading first; the source only saw the
        // broken pipe.
        (Err(source), Err(cause)) if source.is_pipe_closed() => Err(CopyError::new(
            CopySide::Destination,
            cause,
            Some(source),
        )),
        (Err(cause), Err(destination)) => Err(CopyError::new(
            CopySide::Source,
            cause,
            Some(destination),
        )),
    }
}
