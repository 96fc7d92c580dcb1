/*!
 * Directory reader for pharmacy, claims, and revert files
 *
 * Each record kind is loaded from one or more directories, searched recursively
 * for `.json` and `.csv` files. Formats may be mixed freely within a directory.
 * Rows are normalized to text columns, checked against the kind's schema, and
 * parsed into typed records.
 */

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use serde_json::Value;

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    Result, PipelineError, ErrorContext,
    data_types::*,
    schema::{RawRow, RecordSchema},
    constants::MAX_LOGGED_WARNINGS,
};

/// A normalized row together with where it came from
#[derive(Debug, Clone)]
pub struct SourceRow {
    pub values: RawRow,
    pub context: ErrorContext,
}

impl SourceRow {
    fn field(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    fn required_field(&self, kind: RecordKind, name: &str) -> Result<&str> {
        self.field(name)
            .ok_or_else(|| PipelineError::missing_field(kind, name, self.context.clone()))
    }
}

/// Typed records of one kind plus load bookkeeping
#[derive(Debug, Clone)]
pub struct LoadedTable<T> {
    pub records: Vec<T>,
    pub files_read: usize,
    pub files_skipped: usize,
    pub records_skipped: usize,
}

impl<T> LoadedTable<T> {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Reader for directories of mixed JSON/CSV record files
pub struct RecordReader {
    /// Whether to skip malformed files and records (true) or fail on the first one (false)
    skip_invalid_records: bool,
    /// Whether to show a progress bar over files
    #[cfg(feature = "progress")]
    show_progress_bar: bool,
}

impl Default for RecordReader {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordReader {
    /// Create a reader that skips malformed input with a warning
    pub fn new() -> Self {
        Self {
            skip_invalid_records: true,
            #[cfg(feature = "progress")]
            show_progress_bar: false,
        }
    }

    /// Enable or disable skipping invalid files and records
    pub fn with_skip_invalid_records(mut self, skip: bool) -> Self {
        self.skip_invalid_records = skip;
        self
    }

    #[cfg(feature = "progress")]
    /// Enable or disable the progress bar
    pub fn with_progress_bar(mut self, show: bool) -> Self {
        self.show_progress_bar = show;
        self
    }

    /// Load pharmacy reference data
    pub fn load_pharmacies(&self, dirs: &[PathBuf]) -> Result<LoadedTable<PharmacyRecord>> {
        self.load(RecordSchema::for_kind(RecordKind::Pharmacy), dirs, parse_pharmacy)
    }

    /// Load claim events
    pub fn load_claims(&self, dirs: &[PathBuf]) -> Result<LoadedTable<ClaimRecord>> {
        self.load(RecordSchema::for_kind(RecordKind::Claim), dirs, parse_claim)
    }

    /// Load revert events
    pub fn load_reverts(&self, dirs: &[PathBuf]) -> Result<LoadedTable<RevertRecord>> {
        self.load(RecordSchema::for_kind(RecordKind::Revert), dirs, parse_revert)
    }

    fn load<T>(
        &self,
        schema: &RecordSchema,
        dirs: &[PathBuf],
        parse: fn(&SourceRow) -> Result<T>,
    ) -> Result<LoadedTable<T>> {
        let start_time = Instant::now();
        let files = discover_files(schema.kind, dirs)?;
        log::info!("Reading {} {} file(s) from {} director(ies)", files.len(), schema.kind, dirs.len());

        #[cfg(feature = "progress")]
        let progress_bar = if self.show_progress_bar {
            let pb = ProgressBar::new(files.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb.set_message(schema.kind.to_string());
            Some(pb)
        } else {
            None
        };

        let mut rows = Vec::new();
        let mut files_read = 0;
        let mut files_skipped = 0;
        let mut invalid_count = 0;

        for path in &files {
            match read_file(path) {
                Ok(file_rows) => {
                    files_read += 1;
                    for row in file_rows {
                        match row {
                            Ok(row) => rows.push(SourceRow {
                                values: schema.normalize_row(row.values),
                                context: row.context,
                            }),
                            Err(e) => {
                                invalid_count += 1;
                                self.recover(e, invalid_count)?;
                            }
                        }
                    }
                }
                Err(e) => {
                    files_skipped += 1;
                    if self.skip_invalid_records {
                        log::warn!("Could not read or parse {}: {}. Skipping.", path.display(), e);
                    } else {
                        return Err(e);
                    }
                }
            }

            #[cfg(feature = "progress")]
            if let Some(ref pb) = progress_bar {
                pb.inc(1);
            }
        }

        #[cfg(feature = "progress")]
        if let Some(pb) = progress_bar {
            pb.finish_and_clear();
        }

        schema.validate_columns(rows.iter().map(|r| &r.values))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match parse(row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    invalid_count += 1;
                    self.recover(e, invalid_count)?;
                }
            }
        }

        if invalid_count > 0 {
            log::warn!("Skipped {} invalid {} record(s)", invalid_count, schema.kind);
        }
        log::info!(
            "Loaded {} {} record(s) in {:.2}s",
            records.len(),
            schema.kind,
            start_time.elapsed().as_secs_f64()
        );

        Ok(LoadedTable {
            records,
            files_read,
            files_skipped,
            records_skipped: invalid_count,
        })
    }

    /// Skip a record-level error in lenient mode, propagate it in strict mode
    /// or when the error is not about a single record
    fn recover(&self, error: PipelineError, invalid_count: usize) -> Result<()> {
        if !self.skip_invalid_records || !error.is_recoverable() {
            return Err(error);
        }
        if invalid_count <= MAX_LOGGED_WARNINGS {
            log::warn!("Skipping invalid record: {}", error.user_message());
        } else {
            log::debug!("Skipping invalid record: {}", error.user_message());
        }
        Ok(())
    }
}

/// Find every `.json` and `.csv` file below the given directories
///
/// Paths come back sorted so repeated runs see records in the same order.
pub fn discover_files(kind: RecordKind, dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for dir in dirs {
        if !dir.is_dir() {
            return Err(PipelineError::directory_not_found(kind, dir.clone()));
        }

        // Glob patterns are strings; a lossy conversion would match nothing
        let Some(dir_str) = dir.to_str() else {
            return Err(PipelineError::Configuration {
                message: format!("{} directory path is not valid UTF-8: {}", kind, dir.display()),
                suggestion: Some("Rename the directory using only UTF-8 characters".to_string()),
            });
        };
        let base = glob::Pattern::escape(dir_str);
        for extension in ["json", "csv"] {
            let pattern = format!("{}/**/*.{}", base, extension);
            let entries = glob::glob(&pattern).map_err(|e| PipelineError::Configuration {
                message: format!("Invalid search pattern '{}': {}", pattern, e),
                suggestion: None,
            })?;
            for entry in entries {
                match entry {
                    Ok(path) if path.is_file() => files.push(path),
                    Ok(_) => {}
                    Err(e) => log::warn!("Cannot access {}: {}", e.path().display(), e.error()),
                }
            }
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

/// Read one file into normalized rows
///
/// The outer error means the whole file is unusable; inner errors are single
/// rows that could not be read.
pub fn read_file(path: &Path) -> Result<Vec<Result<SourceRow>>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => read_json_file(path),
        Some("csv") => read_csv_file(path),
        _ => Err(PipelineError::Custom {
            message: format!("Unsupported file type: {}", path.display()),
            suggestion: Some("Input files must end in .json or .csv".to_string()),
        }),
    }
}

/// Read a JSON file holding an array of objects or a single object
pub fn read_json_file(path: &Path) -> Result<Vec<Result<SourceRow>>> {
    let file = File::open(path).map_err(|e| PipelineError::Io {
        message: e.to_string(),
        source: e,
        context: ErrorContext::for_file(path),
    })?;

    let value: Value = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        PipelineError::JsonParse {
            message: e.to_string(),
            context: ErrorContext::for_file(path).at_line(e.line()),
        }
    })?;

    match value {
        Value::Array(items) => Ok(items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                let mut context = ErrorContext::for_file(path);
                context.record_id = Some(format!("#{}", idx));
                match item {
                    Value::Object(map) => Ok(SourceRow {
                        values: object_to_row(map),
                        context,
                    }),
                    other => Err(PipelineError::JsonParse {
                        message: format!("expected an object, found {}", json_type_name(&other)),
                        context,
                    }),
                }
            })
            .collect()),
        Value::Object(map) => Ok(vec![Ok(SourceRow {
            values: object_to_row(map),
            context: ErrorContext::for_file(path),
        })]),
        other => Err(PipelineError::JsonParse {
            message: format!("expected an array of objects, found {}", json_type_name(&other)),
            context: ErrorContext::for_file(path),
        }),
    }
}

/// Read a CSV file with a header row; every value is kept as text
pub fn read_csv_file(path: &Path) -> Result<Vec<Result<SourceRow>>> {
    let file = File::open(path).map_err(|e| PipelineError::Io {
        message: e.to_string(),
        source: e,
        context: ErrorContext::for_file(path),
    })?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(file);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| PipelineError::CsvParse {
            message: e.to_string(),
            line: Some(1),
            context: ErrorContext::for_file(path).at_line(1),
        })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        // +2 for the header and 0-based index
        let line = idx + 2;
        let row = match result {
            Ok(record) => {
                let values = headers
                    .iter()
                    .zip(record.iter())
                    .filter_map(|(header, value)| {
                        normalize_text(value).map(|v| (header.clone(), v))
                    })
                    .collect();
                Ok(SourceRow {
                    values,
                    context: ErrorContext::for_file(path).at_line(line),
                })
            }
            Err(e) => Err(PipelineError::CsvParse {
                message: e.to_string(),
                line: Some(line),
                context: ErrorContext::for_file(path).at_line(line),
            }),
        };
        rows.push(row);
    }

    Ok(rows)
}

fn object_to_row(map: serde_json::Map<String, Value>) -> RawRow {
    map.into_iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::Null => return None,
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                nested => nested.to_string(),
            };
            normalize_text(&text).map(|v| (key.trim().to_string(), v))
        })
        .collect()
}

fn normalize_text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse a finite number; anything else counts as absent
pub fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse the timestamp layouts seen in claim feeds
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt);
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_pharmacy(row: &SourceRow) -> Result<PharmacyRecord> {
    let kind = RecordKind::Pharmacy;
    Ok(PharmacyRecord {
        npi: Npi(row.required_field(kind, "npi")?.to_string()),
        chain: row.required_field(kind, "chain")?.to_string(),
    })
}

fn parse_claim(row: &SourceRow) -> Result<ClaimRecord> {
    let kind = RecordKind::Claim;
    let id = ClaimId(row.required_field(kind, "id")?.to_string());
    let npi = Npi(row.required_field(kind, "npi")?.to_string());
    let ndc = Ndc(row.required_field(kind, "ndc")?.to_string());

    let quantity = row.field("quantity").and_then(parse_number);
    let price = row.field("price").and_then(parse_number);
    if quantity.is_none() || price.is_none() {
        log::debug!("Claim {} has no usable price or quantity ({})", id, row.context);
    }

    Ok(ClaimRecord {
        id,
        npi,
        ndc,
        quantity,
        price,
        timestamp: row.field("timestamp").and_then(parse_timestamp),
    })
}

fn parse_revert(row: &SourceRow) -> Result<RevertRecord> {
    Ok(RevertRecord {
        id: row.field("id").map(str::to_string),
        claim_id: ClaimId(row.required_field(RecordKind::Revert, "claim_id")?.to_string()),
        timestamp: row.field("timestamp").and_then(parse_timestamp),
    })
}
