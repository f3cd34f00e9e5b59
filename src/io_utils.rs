//! I/O utilities for reading uploaded delimited files.
//!
//! Every stage of the import pipeline opens the source file through this
//! module. It provides:
//!
//! - **Encoding normalization**: UTF-16 files carrying a byte-order mark are
//!   transcoded once into a UTF-8 sibling file; everything else is read as-is.
//! - **Delimiter detection**: a scoring heuristic over the first two lines.
//! - **Reader construction**: a flexible `csv` reader so ragged rows never
//!   abort a stream.
//! - **Decoding**: byte records are decoded with the configured 8-bit
//!   encoding (UTF-8 unless overridden). Fields that are not valid UTF-8 are
//!   read as windows-1252, so legacy 8-bit exports never fail to decode.

use std::{
    fs::{self, File},
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};
use log::debug;

pub const DEFAULT_DELIMITER: u8 = b',';
pub const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];
const DETECTION_WINDOW_BYTES: usize = 8 * 1024;
const BYTE_ORDER_MARK: char = '\u{feff}';
const NORMALIZED_SUFFIX: &str = "utf8";

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

/// Returns the 16-bit encoding announced by a byte-order mark, if any.
pub fn sniff_utf16(prefix: &[u8]) -> Option<&'static Encoding> {
    match prefix {
        [0xFF, 0xFE, ..] => Some(UTF_16LE),
        [0xFE, 0xFF, ..] => Some(UTF_16BE),
        _ => None,
    }
}

/// Transcodes a UTF-16 file (detected by its byte-order mark) into a UTF-8
/// sibling and returns the path every later stage should read.
///
/// Files without a 16-bit marker are returned unchanged, which makes the
/// operation idempotent: the sibling it writes carries no marker.
pub fn normalize_encoding(path: &Path) -> Result<PathBuf> {
    let mut prefix = [0u8; 4];
    let read = {
        let mut file =
            File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
        read_prefix(&mut file, &mut prefix)
            .with_context(|| format!("Reading leading bytes of {path:?}"))?
    };
    let Some(encoding) = sniff_utf16(&prefix[..read]) else {
        return Ok(path.to_path_buf());
    };

    let bytes = fs::read(path).with_context(|| format!("Reading input file {path:?}"))?;
    let (text, _) = encoding.decode_with_bom_removal(&bytes);
    let text: String = text.chars().filter(|ch| *ch != BYTE_ORDER_MARK).collect();
    let target = normalized_sibling(path);
    fs::write(&target, text.as_bytes())
        .with_context(|| format!("Writing transcoded file {target:?}"))?;
    debug!(
        "Transcoded {:?} from {} to UTF-8 at {:?}",
        path,
        encoding.name(),
        target
    );
    Ok(target)
}

fn read_prefix(reader: &mut impl Read, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn normalized_sibling(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "import".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{stem}.{NORMALIZED_SUFFIX}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{NORMALIZED_SUFFIX}"),
    };
    path.with_file_name(name)
}

/// Scores the candidate separators against the first two non-empty lines.
pub fn detect_delimiter(path: &Path) -> Result<u8> {
    let mut file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    let mut window = vec![0u8; DETECTION_WINDOW_BYTES];
    let read = read_prefix(&mut file, &mut window)
        .with_context(|| format!("Reading detection window of {path:?}"))?;
    let text = String::from_utf8_lossy(&window[..read]);
    Ok(detect_delimiter_in(&text))
}

pub fn detect_delimiter_in(sample: &str) -> u8 {
    let sample = sample.strip_prefix(BYTE_ORDER_MARK).unwrap_or(sample);
    let mut lines = sample.lines().filter(|line| !line.trim().is_empty());
    let Some(header) = lines.next() else {
        return DEFAULT_DELIMITER;
    };
    let second = lines.next();

    let mut best = DEFAULT_DELIMITER;
    let mut best_score = 0usize;
    for candidate in CANDIDATE_DELIMITERS {
        let header_fields = count_fields(header, candidate);
        if header_fields <= 1 {
            continue;
        }
        let mut score = header_fields;
        if let Some(line) = second
            && count_fields(line, candidate) == header_fields
        {
            score += header_fields * 2;
        }
        if score > best_score {
            best = candidate;
            best_score = score;
        }
    }
    debug!(
        "Detected delimiter '{}' (score {best_score})",
        printable_delimiter(best)
    );
    best
}

/// Counts fields on one line, ignoring separators inside double quotes.
/// An unterminated quote simply swallows the rest of the line.
fn count_fields(line: &str, delimiter: u8) -> usize {
    let mut fields = 1;
    let mut in_quotes = false;
    for byte in line.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
        } else if byte == delimiter && !in_quotes {
            fields += 1;
        }
    }
    fields
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

/// Decodes one field. Malformed UTF-8 is re-read as windows-1252; any other
/// encoding substitutes U+FFFD for bytes it cannot map.
pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _, had_errors) = encoding.decode(bytes);
    if !had_errors || encoding != UTF_8 {
        return text.into_owned();
    }
    debug!("Field is not valid UTF-8; decoding it as {}", WINDOWS_1252.name());
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    text.into_owned()
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Vec<String> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

pub fn reader_headers<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Vec<String>>
where
    R: Read,
{
    let headers = reader.byte_headers()?;
    Ok(decode_record(headers, encoding))
}

pub fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
