// =====================================================
// RECORD CODEC
// One record per CRLF-terminated CSV line, empty field = NULL
// =====================================================

use crate::error::{DriverError, Result};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Column slot limit used when the configuration does not name one.
pub const DEFAULT_COLUMN_LIMIT: usize = 100;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// A single column value; `None` is NULL.
pub type Field = Option<String>;

/// One row, in column order.
pub type Record = Vec<Field>;

// --- Single records ---

/// Encodes `record` as one CRLF-terminated line.
///
/// NULL and the empty string both come out as an empty field.
pub fn encode(record: &[Field], column_limit: usize) -> Result<Vec<u8>> {
    check_width(record.len(), column_limit)?;

    let mut writer = line_writer();
    write_fields(&mut writer, record)?;
    writer
        .into_inner()
        .map_err(|e| DriverError::stream(format!("Failed to encode record: {}", e.error())))
}

/// Decodes exactly one record from `line`. Empty fields decode as NULL.
pub fn decode(line: &[u8]) -> Result<Record> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line);

    let mut raw = csv::StringRecord::new();
    let found = reader
        .read_record(&mut raw)
        .map_err(|e| DriverError::stream(format!("Failed to decode record: {}", e)))?;
    if !found {
        return Err(DriverError::stream("Line holds no record"));
    }

    let mut trailing = csv::StringRecord::new();
    let more = reader
        .read_record(&mut trailing)
        .map_err(|e| DriverError::stream(format!("Failed to decode record: {}", e)))?;
    if more {
        return Err(DriverError::stream("Line holds more than one record"));
    }

    Ok(raw.iter().map(field_from_text).collect())
}

fn field_from_text(text: &str) -> Field {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn line_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::with_capacity(128))
}

fn write_fields<W: Write>(writer: &mut csv::Writer<W>, record: &[Field]) -> Result<()> {
    writer
        .write_record(record.iter().map(|field| field.as_deref().unwrap_or("")))
        .map_err(|e| DriverError::stream(format!("Failed to encode record: {}", e)))
}

fn check_width(columns: usize, column_limit: usize) -> Result<()> {
    if columns == 0 {
        return Err(DriverError::stream("Record has no columns"));
    }
    if columns > column_limit {
        return Err(DriverError::WidthViolation {
            columns,
            limit: column_limit,
        });
    }
    Ok(())
}

// Records within one stream share a single width.
fn check_homogeneous(width: &mut Option<usize>, columns: usize, position: u64) -> Result<()> {
    match *width {
        Some(expected) if expected != columns => Err(DriverError::stream(format!(
            "Record {} has {} columns, expected {}",
            position, columns, expected
        ))),
        Some(_) => Ok(()),
        None => {
            *width = Some(columns);
            Ok(())
        }
    }
}

// --- Streams ---

/// Encodes records onto an async sink, one write per record.
pub struct RecordWriter<W> {
    inner: W,
    column_limit: usize,
    width: Option<usize>,
    records: u64,
}

impl<W: AsyncWrite + Unpin> RecordWriter<W> {
    pub fn new(inner: W, column_limit: usize) -> Self {
        Self {
            inner,
            column_limit,
            width: None,
            records: 0,
        }
    }

    pub async fn write_record(&mut self, record: &[Field]) -> Result<()> {
        let line = encode(record, self.column_limit)?;
        check_homogeneous(&mut self.width, record.len(), self.records + 1)?;

        self.inner
            .write_all(&line)
            .await
            .map_err(|e| DriverError::from_io(e, "Failed to write record"))?;

        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flushes the sink and returns how many records were written.
    pub async fn finish(mut self) -> Result<u64> {
        self.inner
            .flush()
            .await
            .map_err(|e| DriverError::from_io(e, "Failed to flush records"))?;
        Ok(self.records)
    }
}

/// Reads records back off an async source.
///
/// A record ends at a line terminator that is not inside a quoted field.
/// Both `\r\n` and `\n` are accepted. A stream that ends in the middle of a
/// record is an error rather than a short final row.
pub struct RecordReader<R> {
    inner: BufReader<R>,
    line: Vec<u8>,
    column_limit: usize,
    width: Option<usize>,
    records: u64,
    blank_as_null: bool,
}

impl<R: AsyncRead + Unpin> RecordReader<R> {
    pub fn new(inner: R, column_limit: usize) -> Self {
        Self {
            inner: BufReader::with_capacity(READ_BUFFER_SIZE, inner),
            line: Vec::with_capacity(128),
            column_limit,
            width: None,
            records: 0,
            blank_as_null: false,
        }
    }

    /// Reads a blank line as one row holding a single NULL, the way
    /// PostgreSQL CSV output writes it, instead of skipping it.
    pub fn with_blank_as_null(mut self) -> Self {
        self.blank_as_null = true;
        self
    }

    pub async fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            self.line.clear();
            let mut quotes = 0usize;

            loop {
                let start = self.line.len();
                let read = self
                    .inner
                    .read_until(b'\n', &mut self.line)
                    .await
                    .map_err(|e| DriverError::from_io(e, "Failed to read record"))?;
                if read == 0 {
                    break;
                }
                quotes += self.line[start..].iter().filter(|b| **b == b'"').count();
                if quotes % 2 == 0 {
                    break;
                }
            }

            if self.line.is_empty() {
                return Ok(None);
            }

            let position = self.records + 1;
            if quotes % 2 != 0 {
                return Err(DriverError::stream(format!(
                    "Record {} ends inside a quoted field",
                    position
                )));
            }
            if self.line.last() != Some(&b'\n') {
                return Err(DriverError::stream(format!(
                    "Record {} is missing its line terminator",
                    position
                )));
            }

            let record = if !is_blank(&self.line) {
                decode(&self.line)?
            } else if !self.blank_as_null {
                continue;
            } else if matches!(self.width, None | Some(1)) {
                vec![None]
            } else {
                return Err(DriverError::stream(format!(
                    "Record {} is blank in a stream of {} columns",
                    position,
                    self.width.unwrap_or_default()
                )));
            };
            check_width(record.len(), self.column_limit)?;
            check_homogeneous(&mut self.width, record.len(), position)?;

            self.records = position;
            return Ok(Some(record));
        }
    }

    pub fn records(&self) -> u64 {
        self.records
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| *b == b'\r' || *b == b'\n')
}

#[cfg(test)]
mod tests;
