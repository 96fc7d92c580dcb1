/*!
 * Export functionality for pipeline reports
 *
 * Writes the metrics, recommendation, and quantity reports to an output
 * directory as JSON documents or flattened CSV tables.
 *
 * Every report is rendered in memory and staged as a temporary file next to
 * its destination. Staged files replace the previous reports only once all
 * of them exist; if one cannot be moved into place, the reports already
 * replaced are restored, so the directory holds either the complete new
 * output or what it held before.
 */

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::{NamedTempFile, TempPath};

use crate::{Result, PipelineError, ExportFormat};
use crate::constants::{METRICS_REPORT, QUANTITIES_REPORT, RECOMMENDATIONS_REPORT};
use crate::pipeline::Reports;

/// A rendered report: file stem and file contents
pub type RenderedReport = (&'static str, Vec<u8>);

/// Trait for implementing report exporters
pub trait ReportExporter {
    /// Render every report in memory
    fn render(&self, reports: &Reports) -> Result<Vec<RenderedReport>>;

    /// Get the export format
    fn format(&self) -> ExportFormat;

    /// Path of a report file inside `dir`
    fn report_path(&self, dir: &Path, report: &str) -> PathBuf {
        dir.join(format!("{}.{}", report, self.format().extension()))
    }

    /// Write every report into `dir`, returning the files written
    ///
    /// On error no report file in `dir` has changed.
    fn export(&self, reports: &Reports, dir: &Path) -> Result<Vec<PathBuf>> {
        let format = self.format();
        let rendered = self.render(reports)?;

        prepare_dir(dir, format)?;
        let staged = rendered
            .into_iter()
            .map(|(stem, contents)| stage(dir, self.report_path(dir, stem), &contents, format))
            .collect::<Result<Vec<_>>>()?;

        commit(dir, staged, format)
    }
}

/// Exporter for a configured format
pub fn exporter_for(format: ExportFormat, pretty_print: bool) -> Box<dyn ReportExporter> {
    match format {
        ExportFormat::Json => Box::new(JsonExporter::new().with_pretty_print(pretty_print)),
        ExportFormat::Csv => Box::new(CsvExporter::new()),
    }
}

/// JSON exporter; each report is a single JSON array
pub struct JsonExporter {
    /// Whether to pretty-print the JSON
    pub pretty_print: bool,
}

impl Default for JsonExporter {
    fn default() -> Self {
        Self { pretty_print: true }
    }
}

impl JsonExporter {
    /// Create a new JSON exporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Set pretty printing
    pub fn with_pretty_print(mut self, pretty: bool) -> Self {
        self.pretty_print = pretty;
        self
    }

    fn render_document<T: Serialize>(&self, rows: &T) -> Result<Vec<u8>> {
        let mut buffer = if self.pretty_print {
            serde_json::to_vec_pretty(rows)?
        } else {
            serde_json::to_vec(rows)?
        };
        buffer.push(b'\n');
        Ok(buffer)
    }
}

impl ReportExporter for JsonExporter {
    fn render(&self, reports: &Reports) -> Result<Vec<RenderedReport>> {
        Ok(vec![
            (METRICS_REPORT, self.render_document(&reports.metrics)?),
            (RECOMMENDATIONS_REPORT, self.render_document(&reports.recommendations)?),
            (QUANTITIES_REPORT, self.render_document(&reports.quantities)?),
        ])
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Json
    }
}

/// CSV exporter
///
/// Ranked reports are flattened to one row per entry with a 1-based `rank`.
#[derive(Default)]
pub struct CsvExporter;

impl CsvExporter {
    /// Create a new CSV exporter
    pub fn new() -> Self {
        Self
    }

    fn writer() -> csv::Writer<Vec<u8>> {
        csv::WriterBuilder::new()
            .has_headers(true)
            .from_writer(Vec::new())
    }

    fn finish(writer: csv::Writer<Vec<u8>>, report: &str) -> Result<Vec<u8>> {
        writer.into_inner().map_err(|e| PipelineError::Export {
            message: format!("Cannot render {}: {}", report, e.error()),
            format: ExportFormat::Csv,
            suggestion: None,
        })
    }

    fn render_metrics(reports: &Reports) -> Result<Vec<u8>> {
        let mut writer = Self::writer();
        // serialize() emits the header from the struct's field names
        for row in &reports.metrics {
            writer.serialize(row)?;
        }
        if reports.metrics.is_empty() {
            writer.write_record(["npi", "ndc", "fills", "reverted", "avg_price", "total_price"])?;
        }
        Self::finish(writer, METRICS_REPORT)
    }

    fn render_recommendations(reports: &Reports) -> Result<Vec<u8>> {
        let mut writer = Self::writer();
        writer.write_record(["ndc", "rank", "chain", "avg_price"])?;
        for row in &reports.recommendations {
            for (rank, chain) in row.chain.iter().enumerate() {
                let rank = (rank + 1).to_string();
                let price = chain.avg_price.to_string();
                writer.write_record([row.ndc.as_str(), rank.as_str(), chain.name.as_str(), price.as_str()])?;
            }
        }
        Self::finish(writer, RECOMMENDATIONS_REPORT)
    }

    fn render_quantities(reports: &Reports) -> Result<Vec<u8>> {
        let mut writer = Self::writer();
        writer.write_record(["ndc", "rank", "quantity", "count"])?;
        for row in &reports.quantities {
            for (rank, entry) in row.most_prescribed_quantity.iter().enumerate() {
                let rank = (rank + 1).to_string();
                let quantity = entry.quantity.to_string();
                let count = entry.count.to_string();
                writer.write_record([row.ndc.as_str(), rank.as_str(), quantity.as_str(), count.as_str()])?;
            }
        }
        Self::finish(writer, QUANTITIES_REPORT)
    }
}

impl ReportExporter for CsvExporter {
    fn render(&self, reports: &Reports) -> Result<Vec<RenderedReport>> {
        Ok(vec![
            (METRICS_REPORT, Self::render_metrics(reports)?),
            (RECOMMENDATIONS_REPORT, Self::render_recommendations(reports)?),
            (QUANTITIES_REPORT, Self::render_quantities(reports)?),
        ])
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }
}

/// A report written to a temporary file beside its destination
struct StagedReport {
    target: PathBuf,
    file: NamedTempFile,
}

/// A report moved into place, holding the file it replaced until commit ends
struct PlacedReport {
    target: PathBuf,
    previous: Option<TempPath>,
}

fn stage(dir: &Path, target: PathBuf, contents: &[u8], format: ExportFormat) -> Result<StagedReport> {
    let mut file = NamedTempFile::new_in(dir).map_err(|e| export_io_error(dir, e, format))?;
    file.write_all(contents)
        .and_then(|_| file.flush())
        .map_err(|e| export_io_error(&target, e, format))?;
    Ok(StagedReport { target, file })
}

fn commit(dir: &Path, staged: Vec<StagedReport>, format: ExportFormat) -> Result<Vec<PathBuf>> {
    let mut placed: Vec<PlacedReport> = Vec::with_capacity(staged.len());

    for report in staged {
        let target = report.target.clone();
        match place(dir, report) {
            Ok(done) => placed.push(done),
            Err(e) => {
                roll_back(placed);
                return Err(export_io_error(&target, e, format));
            }
        }
    }

    // Dropping the replaced files' handles deletes them
    Ok(placed.into_iter().map(|p| p.target).collect())
}

fn place(dir: &Path, report: StagedReport) -> std::io::Result<PlacedReport> {
    let StagedReport { target, file } = report;

    let previous = if target.is_file() {
        let backup = tempfile::Builder::new()
            .prefix(".replaced-")
            .tempfile_in(dir)?
            .into_temp_path();
        fs::rename(&target, &backup)?;
        Some(backup)
    } else {
        None
    };

    if let Err(e) = file.persist(&target) {
        if let Some(backup) = &previous {
            if let Err(restore) = fs::rename(backup, &target) {
                log::warn!("Could not restore {}: {}", target.display(), restore);
            }
        }
        return Err(e.error);
    }

    Ok(PlacedReport { target, previous })
}

fn roll_back(placed: Vec<PlacedReport>) {
    for report in placed.into_iter().rev() {
        let restored = match &report.previous {
            Some(backup) => fs::rename(backup, &report.target),
            None => fs::remove_file(&report.target),
        };
        if let Err(e) = restored {
            log::warn!("Could not restore {}: {}", report.target.display(), e);
        }
    }
}

fn prepare_dir(dir: &Path, format: ExportFormat) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| PipelineError::Export {
        message: format!("Cannot create output directory {}: {}", dir.display(), e),
        format,
        suggestion: Some("Check that the output path is writable".to_string()),
    })
}

fn export_io_error(path: &Path, err: std::io::Error, format: ExportFormat) -> PipelineError {
    PipelineError::Export {
        message: format!("Cannot write {}: {}", path.display(), err),
        format,
        suggestion: Some("Check that the output directory is writable".to_string()),
    }
}
