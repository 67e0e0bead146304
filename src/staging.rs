//! Streaming reader for gzip-compressed CSV staging exports.
//!
//! The file is decompressed and parsed record by record; nothing beyond the
//! current record is held in memory. I/O failures (missing file, corrupt
//! gzip stream) are fatal, while a record the CSV parser rejects is
//! reported as a [`RowParseError`] and reading continues.

use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::{EtlError, Result};
use crate::models::{RowParseError, StagingRow};

pub type GzFileReader = GzDecoder<BufReader<File>>;

pub struct StagingReader<R: Read> {
    path: PathBuf,
    reader: csv::Reader<R>,
    headers: Vec<String>,
    record: csv::StringRecord,
    rows_read: u64,
}

/// Open a `.csv.gz` staging file and read its header row.
pub fn open(path: &Path) -> Result<StagingReader<GzFileReader>> {
    let file = File::open(path).map_err(|e| EtlError::fatal_io(path, e))?;
    let decoder = GzDecoder::new(BufReader::new(file));
    StagingReader::new(path, decoder)
}

/// Count data rows in a staging file (header excluded).
///
/// Used for the optional pre-count pass so progress can be reported as a
/// fraction. Records the parser rejects still count as rows.
pub fn count_rows(path: &Path) -> Result<u64> {
    let mut reader = open(path)?;
    let mut count = 0u64;
    let mut record = csv::ByteRecord::new();
    loop {
        match reader.reader.read_byte_record(&mut record) {
            Ok(true) => count += 1,
            Ok(false) => break,
            Err(e) => match e.into_kind() {
                csv::ErrorKind::Io(io) => return Err(EtlError::fatal_io(path, io)),
                _ => count += 1,
            },
        }
    }
    Ok(count)
}

impl<R: Read> StagingReader<R> {
    pub fn new(path: &Path, source: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(source);

        let headers = match reader.headers() {
            Ok(h) => h.iter().map(|s| s.trim().to_string()).collect::<Vec<_>>(),
            Err(e) => return Err(header_error(path, e)),
        };

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            headers,
            record: csv::StringRecord::new(),
            rows_read: 0,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Read the next record.
    ///
    /// Returns `Ok(None)` at end of file, `Ok(Some(Err(_)))` for a record
    /// the parser rejected, and `Err(_)` when the underlying stream fails.
    pub fn next_row(&mut self) -> Result<Option<std::result::Result<StagingRow, RowParseError>>> {
        match self.reader.read_record(&mut self.record) {
            Ok(false) => Ok(None),
            Ok(true) => {
                self.rows_read += 1;
                let fields: HashMap<String, String> = self
                    .headers
                    .iter()
                    .cloned()
                    .zip(self.record.iter().map(str::to_string))
                    .collect();
                Ok(Some(Ok(StagingRow {
                    row_number: self.rows_read,
                    fields,
                })))
            }
            Err(e) => match e.into_kind() {
                csv::ErrorKind::Io(io) => Err(EtlError::fatal_io(&self.path, io)),
                kind => {
                    self.rows_read += 1;
                    Ok(Some(Err(RowParseError {
                        row: self.rows_read,
                        message: describe(&kind),
                    })))
                }
            },
        }
    }
}

fn header_error(path: &Path, e: csv::Error) -> EtlError {
    match e.into_kind() {
        csv::ErrorKind::Io(io) => EtlError::fatal_io(path, io),
        kind => EtlError::Header {
            path: path.to_path_buf(),
            message: describe(&kind),
        },
    }
}

fn describe(kind: &csv::ErrorKind) -> String {
    match kind {
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => format!("found {} fields, expected {}", len, expected_len),
        csv::ErrorKind::Utf8 { err, .. } => format!("invalid UTF-8: {}", err),
        other => format!("{:?}", other),
    }
}
