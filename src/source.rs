//! Opening an uploaded file for streaming: encoding normalization, delimiter
//! detection, header normalization, then record-by-record reads.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use csv::ByteRecord;
use encoding_rs::Encoding;
use log::debug;

use crate::{error::ImportError, io_utils, keys, mapping::RawRow};

pub struct SourceFile {
    path: PathBuf,
    delimiter: u8,
    encoding: &'static Encoding,
    headers: Vec<String>,
    reader: csv::Reader<Box<dyn Read + Send>>,
    record: ByteRecord,
}

impl SourceFile {
    pub fn open(path: &Path, encoding_label: Option<&str>) -> Result<Self> {
        if !path.exists() {
            return Err(ImportError::MissingFile(path.to_path_buf()).into());
        }
        let encoding = io_utils::resolve_encoding(encoding_label)?;
        let normalized = io_utils::normalize_encoding(path)?;
        let delimiter = io_utils::detect_delimiter(&normalized)?;
        let file = File::open(&normalized)
            .with_context(|| format!("Opening input file {normalized:?}"))?;
        Self::from_reader(normalized, BufReader::new(file), delimiter, encoding)
    }

    /// Streams an already-open, already-normalized source. `path` only names
    /// the source in logs and errors.
    pub fn from_reader(
        path: PathBuf,
        reader: impl Read + Send + 'static,
        delimiter: u8,
        encoding: &'static Encoding,
    ) -> Result<Self> {
        let reader: Box<dyn Read + Send> = Box::new(reader);
        let mut reader = io_utils::open_csv_reader(reader, delimiter);
        let headers = io_utils::reader_headers(&mut reader, encoding)
            .with_context(|| format!("Reading header row of {path:?}"))?;
        let headers = keys::normalize_headers(&headers);
        debug!(
            "Opened {:?} with delimiter '{}' and {} column(s)",
            path,
            io_utils::printable_delimiter(delimiter),
            headers.len()
        );
        Ok(Self {
            path,
            delimiter,
            encoding,
            headers,
            reader,
            record: ByteRecord::new(),
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the next record. Errors here are stream-level: the file can no
    /// longer be read.
    pub fn next_record(&mut self) -> Result<Option<ByteRecord>> {
        let more = self
            .reader
            .read_byte_record(&mut self.record)
            .with_context(|| format!("Reading {:?}", self.path))?;
        Ok(more.then(|| self.record.clone()))
    }

    /// Decodes a record into `(header, value)` pairs.
    pub fn decode(&self, record: &ByteRecord) -> RawRow {
        let values = io_utils::decode_record(record, self.encoding);
        self.headers
            .iter()
            .zip(values)
            .map(|(header, value)| (header.clone(), value))
            .collect()
    }
}
