/*!
 * Error handling for pharmacy claims pipeline operations
 *
 * Provides detailed error types with context, suggestions, and recovery guidance.
 */

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use serde::{Serialize, Deserialize};

use crate::data_types::RecordKind;

/// Pipeline result type
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error types with context and suggestions
#[derive(Error, Debug)]
pub enum PipelineError {
    /// File I/O errors with context
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
        context: ErrorContext,
    },

    /// CSV parsing errors with location information
    #[error("CSV parsing error at line {line:?}: {message}")]
    CsvParse {
        message: String,
        line: Option<usize>,
        context: ErrorContext,
    },

    /// JSON parsing errors for input files
    #[error("JSON parsing error: {message}")]
    JsonParse {
        message: String,
        context: ErrorContext,
    },

    /// A single record that could not be turned into a typed row
    #[error("Invalid {kind} record: {message}")]
    InvalidRecord {
        kind: RecordKind,
        message: String,
        field: Option<String>,
        context: ErrorContext,
    },

    /// Input directory missing
    #[error("{kind} directory not found: {path}")]
    DirectoryNotFound {
        kind: RecordKind,
        path: PathBuf,
        suggestion: String,
    },

    /// Required column absent from every loaded row
    #[error("No {kind} data with a '{column}' column found")]
    MissingColumn {
        kind: RecordKind,
        column: String,
        found_columns: Vec<String>,
    },

    /// Nothing left to aggregate
    #[error("Empty {kind} input: {message}")]
    EmptyInput {
        kind: RecordKind,
        message: String,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        suggestion: Option<String>,
    },

    /// Export errors
    #[error("Export error: {message}")]
    Export {
        message: String,
        format: ExportFormat,
        suggestion: Option<String>,
    },

    /// Generic errors with custom message
    #[error("{message}")]
    Custom {
        message: String,
        suggestion: Option<String>,
    },
}

/// Error context providing additional information
#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    pub file_path: Option<PathBuf>,
    pub line_number: Option<usize>,
    pub column_name: Option<String>,
    pub record_id: Option<String>,
}

impl ErrorContext {
    /// Context pointing at a file
    pub fn for_file(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Same context, narrowed to a line
    pub fn at_line(mut self, line: usize) -> Self {
        self.line_number = Some(line);
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(path) = &self.file_path {
            parts.push(path.display().to_string());
        }
        if let Some(line) = self.line_number {
            parts.push(format!("line {}", line));
        }
        if let Some(column) = &self.column_name {
            parts.push(format!("column '{}'", column));
        }
        if let Some(id) = &self.record_id {
            parts.push(format!("record '{}'", id));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    /// File extension used for report files
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Json => write!(f, "JSON"),
            ExportFormat::Csv => write!(f, "CSV"),
        }
    }
}

impl PipelineError {
    /// Create a directory not found error with a helpful suggestion
    pub fn directory_not_found(kind: RecordKind, path: PathBuf) -> Self {
        let suggestion = format!(
            "Check that '{}' exists and is a directory containing {} JSON or CSV files.",
            path.display(),
            kind
        );
        Self::DirectoryNotFound { kind, path, suggestion }
    }

    /// Create an invalid record error for a missing required field
    pub fn missing_field(kind: RecordKind, field: &str, mut context: ErrorContext) -> Self {
        context.column_name = Some(field.to_string());
        Self::InvalidRecord {
            kind,
            message: format!("missing required field '{}'", field),
            field: Some(field.to_string()),
            context,
        }
    }

    /// Create an empty input error
    pub fn empty_input(kind: RecordKind, message: impl Into<String>) -> Self {
        Self::EmptyInput {
            kind,
            message: message.into(),
        }
    }

    /// Whether the error concerns a single file or record and may be skipped
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CsvParse { .. } | Self::JsonParse { .. } | Self::InvalidRecord { .. }
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::DirectoryNotFound { suggestion, .. } => {
                format!("{}\n\nSuggestion: {}", self, suggestion)
            }
            Self::MissingColumn { found_columns, .. } => {
                if found_columns.is_empty() {
                    format!("{}. Cannot proceed.", self)
                } else {
                    format!("{}. Cannot proceed.\n\nColumns found: {}", self, found_columns.join(", "))
                }
            }
            Self::CsvParse { context, .. }
            | Self::JsonParse { context, .. }
            | Self::InvalidRecord { context, .. } => {
                format!("{} ({})", self, context)
            }
            Self::Configuration { suggestion: Some(sug), .. }
            | Self::Export { suggestion: Some(sug), .. }
            | Self::Custom { suggestion: Some(sug), .. } => {
                format!("{}\n\nSuggestion: {}", self, sug)
            }
            _ => self.to_string(),
        }
    }
}

// Convenience conversions
impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
            context: ErrorContext::default(),
        }
    }
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        let (line, message) = match err.position() {
            Some(pos) => (Some(pos.line() as usize), err.to_string()),
            None => (None, err.to_string()),
        };

        Self::CsvParse {
            message,
            line,
            context: ErrorContext::default(),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Export {
            message: err.to_string(),
            format: ExportFormat::Json,
            suggestion: Some("Check if the report is serializable to JSON.".to_string()),
        }
    }
}
