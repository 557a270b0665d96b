//! Streams query results from one database into a table of another.
//!
//! Each backend is a [`Driver`]: it can write the result of a query as CSV
//! records ([`Driver::copy_to`]) and insert CSV records into a table
//! ([`Driver::copy_from`]). [`copy`] connects the two through a bounded pipe.

// Record wire format
pub mod codec;
pub mod error;

// Driver contract and backends
pub mod clickhouse;
pub mod driver;
pub mod postgres;
pub mod registry;
pub mod sqlite;

// Copy pipeline
pub mod transfer;

pub use codec::{Field, Record, RecordReader, RecordWriter, DEFAULT_COLUMN_LIMIT};
pub use driver::{Driver, DriverParameters, DriverState, Parameters, RecordInput, RecordOutput};
pub use error::{DriverError, Result};
pub use registry::Registry;
pub use transfer::{copy, CopyError, CopyOptions, CopySide, CopySummary};
