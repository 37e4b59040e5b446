//! Encoding resolution and row decoding for input files.
//!
//! Every byte that enters an import flows through this module:
//!
//! - **Charset resolution**: a forced label is looked up with `encoding_rs`;
//!   otherwise a BOM, then strict UTF-8 validity, then `chardetng`'s
//!   statistical guess decide. A charset that cannot encode a plain ASCII
//!   probe string is rejected in favour of UTF-8.
//! - **Structured decode**: strict decode of the whole buffer followed by
//!   comma-delimited, double-quote-escaped CSV parsing.
//! - **Salvage decode**: when the structured path fails, lines are split on
//!   `\n` (a trailing `\r` is dropped, so CRLF is covered), one leading and one
//!   trailing `"` are stripped and the remainder is split on `","`. Each line
//!   is decoded strictly with the resolved charset and then as UTF-8; a line
//!   neither accepts is dropped with a diagnostic.
//! - **Input loading**: a single file, or every file with the configured
//!   extension inside a directory (unreadable ones are skipped).

use std::{
    borrow::Cow,
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use anyhow::{Result, anyhow};
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, REPLACEMENT, UTF_8};
use log::{debug, info, warn};

use crate::error::ImportError;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_EXTENSION: &str = "csv";

const CHARSET_PROBE: &str = "test_real_charset";
const SALVAGE_CELL_SEPARATOR: &str = "\",\"";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub type RawRow = Vec<String>;

/// Rows decoded from one byte stream.
#[derive(Debug, Clone)]
pub struct Decoded {
    pub rows: Vec<RawRow>,
    pub charset: &'static Encoding,
    pub salvaged: bool,
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LoadedFile {
    pub path: PathBuf,
    pub charset: &'static Encoding,
    pub rows: usize,
    pub salvaged: bool,
}

/// Every row read for one run, in file order.
#[derive(Debug, Clone, Default)]
pub struct LoadedInput {
    pub rows: Vec<RawRow>,
    pub files: Vec<LoadedFile>,
    pub diagnostics: Vec<String>,
}

impl LoadedInput {
    pub fn charset_names(&self) -> String {
        let mut names: Vec<&str> = Vec::new();
        for file in &self.files {
            if !names.contains(&file.charset.name()) {
                names.push(file.charset.name());
            }
        }
        names.join(", ")
    }
}

pub fn charset_is_usable(encoding: &'static Encoding) -> bool {
    if encoding == REPLACEMENT {
        return false;
    }
    let (_, _, had_errors) = encoding.encode(CHARSET_PROBE);
    !had_errors
}

pub fn detect_charset(bytes: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return encoding;
    }
    if std::str::from_utf8(bytes).is_ok() {
        return UTF_8;
    }
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true)
}

/// Picks the charset for `bytes`, honouring a forced label when it names a
/// usable encoding. Returns a diagnostic when a fallback was taken.
pub fn resolve_charset(bytes: &[u8], forced: Option<&str>) -> (&'static Encoding, Option<String>) {
    let forced = forced.map(str::trim).filter(|label| !label.is_empty());
    let candidate = match forced {
        Some(label) => match Encoding::for_label(label.as_bytes()) {
            Some(encoding) => encoding,
            None => {
                return (
                    UTF_8,
                    Some(format!("Unknown charset '{label}', assuming utf-8")),
                );
            }
        },
        None => detect_charset(bytes),
    };
    if charset_is_usable(candidate) {
        (candidate, None)
    } else {
        (
            UTF_8,
            Some(format!(
                "Charset {} cannot encode text, assuming utf-8",
                candidate.name()
            )),
        )
    }
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn decode_bytes<'a>(bytes: &'a [u8], encoding: &'static Encoding) -> Result<Cow<'a, str>> {
    let (text, had_errors) = encoding.decode_with_bom_removal(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text)
    }
}

fn decode_structured(bytes: &[u8], encoding: &'static Encoding) -> Result<Vec<RawRow>> {
    let text = decode_bytes(bytes, encoding)?;
    let mut reader = open_csv_reader(text.as_bytes(), DEFAULT_CSV_DELIMITER);
    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|err| anyhow!("Parsing CSV record {}: {err}", idx + 1))?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

fn decode_line(line: &[u8], encoding: &'static Encoding) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(line)
        .or_else(|| UTF_8.decode_without_bom_handling_and_without_replacement(line))
        .map(Cow::into_owned)
}

pub fn split_salvaged_line(line: &str) -> RawRow {
    let body = line.strip_prefix('"').unwrap_or(line);
    let body = body.strip_suffix('"').unwrap_or(body);
    body.split(SALVAGE_CELL_SEPARATOR)
        .map(str::to_string)
        .collect()
}

fn salvage(
    bytes: &[u8],
    encoding: &'static Encoding,
    diagnostics: &mut Vec<String>,
) -> Vec<RawRow> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut rows = Vec::new();
    for (idx, line) in bytes.split(|b| *b == b'\n').enumerate() {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        match decode_line(line, encoding) {
            Some(text) => rows.push(split_salvaged_line(&text)),
            None => diagnostics.push(format!("Failed to parse row {}", idx + 1)),
        }
    }
    rows
}

/// Decodes a raw byte stream into rows. Never fails: structured decoding
/// degrades to the salvage parser.
pub fn decode(bytes: &[u8], forced: Option<&str>) -> Decoded {
    let (charset, fallback) = resolve_charset(bytes, forced);
    let mut diagnostics: Vec<String> = fallback.into_iter().collect();
    match decode_structured(bytes, charset) {
        Ok(rows) => Decoded {
            rows,
            charset,
            salvaged: false,
            diagnostics,
        },
        Err(err) => {
            debug!("Structured decode failed ({err}); falling back to line salvage");
            let rows = salvage(bytes, charset, &mut diagnostics);
            Decoded {
                rows,
                charset,
                salvaged: true,
                diagnostics,
            }
        }
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ImportError> {
    fs::read(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ImportError::InputNotFound {
            path: path.to_path_buf(),
        },
        _ => ImportError::InputUnreadable {
            path: path.to_path_buf(),
            source,
        },
    })
}

pub fn read_file(path: &Path, forced: Option<&str>) -> Result<(Decoded, LoadedFile), ImportError> {
    let bytes = read_bytes(path)?;
    let decoded = decode(&bytes, forced);
    info!(
        "Read {} row(s) from {:?} as {}{}",
        decoded.rows.len(),
        path,
        decoded.charset.name(),
        if decoded.salvaged { " (salvaged)" } else { "" }
    );
    let file = LoadedFile {
        path: path.to_path_buf(),
        charset: decoded.charset,
        rows: decoded.rows.len(),
        salvaged: decoded.salvaged,
    };
    Ok((decoded, file))
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

fn directory_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, ImportError> {
    let entries = fs::read_dir(dir).map_err(|source| ImportError::InputUnreadable {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut files = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && has_extension(path, extension))
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

/// Loads a file or every matching file in a directory.
pub fn load_input(
    path: &Path,
    forced: Option<&str>,
    extension: &str,
) -> Result<LoadedInput, ImportError> {
    if !path.exists() {
        return Err(ImportError::InputNotFound {
            path: path.to_path_buf(),
        });
    }
    let mut input = LoadedInput::default();
    if path.is_dir() {
        for file in directory_files(path, extension)? {
            match read_file(&file, forced) {
                Ok((decoded, loaded)) => {
                    input.rows.extend(decoded.rows);
                    input.diagnostics.extend(decoded.diagnostics);
                    input.files.push(loaded);
                }
                Err(err) => warn!("Skipping {file:?}: {err}"),
            }
        }
        if input.files.is_empty() {
            return Err(ImportError::NoInputFiles {
                path: path.to_path_buf(),
                extension: extension.to_string(),
            });
        }
    } else {
        let (decoded, loaded) = read_file(path, forced)?;
        input.rows = decoded.rows;
        input.diagnostics = decoded.diagnostics;
        input.files.push(loaded);
    }
    Ok(input)
}
