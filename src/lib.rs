/*!
 * # Pharmacy Claims Metrics Library
 *
 * Aggregates pharmacy, claim, and revert records into three reports:
 *
 * - **Claim metrics** per pharmacy (NPI) and drug (NDC): fills, reverts,
 *   average unit price, and total price
 * - **Chain recommendations**: the two cheapest pharmacy chains per drug
 * - **Common quantities**: the five most prescribed quantities per drug
 *
 * ## Quick Start
 *
 * ```no_run
 * use pharmacy_metrics::prelude::*;
 * use std::path::{Path, PathBuf};
 *
 * # fn main() -> Result<()> {
 * let inputs = InputDirs {
 *     pharmacy: vec![PathBuf::from("data/pharmacies")],
 *     claims: vec![PathBuf::from("data/claims")],
 *     reverts: vec![PathBuf::from("data/reverts")],
 * };
 *
 * let summary = pipeline::run(&inputs, Path::new("output"), &PipelineConfig::default())?;
 * summary.statistics.print_summary();
 * # Ok(())
 * # }
 * ```
 *
 * ## Step by Step
 *
 * ```no_run
 * # use pharmacy_metrics::prelude::*;
 * # fn main() -> Result<()> {
 * let dataset = ClaimsDatasetBuilder::new()
 *     .pharmacy_dir("data/pharmacies")
 *     .claims_dir("data/claims")
 *     .reverts_dir("data/reverts")
 *     .build()?;
 *
 * let joined = dataset.join(UnknownPharmacyPolicy::Drop);
 * let analytics = ClaimsAnalytics::new(&joined);
 * let metrics = analytics.claim_metrics();
 * let cheapest = analytics.chain_recommendations(&metrics);
 * # Ok(())
 * # }
 * ```
 *
 * ## Input Files
 *
 * Each record kind is read from one or more directories, searched recursively
 * for `.json` (array of objects, or one object) and `.csv` (header row) files.
 * Pharmacy files may name the identifier `id` or `npi`.
 *
 * | Kind     | Required columns                       | Optional          |
 * |----------|----------------------------------------|-------------------|
 * | pharmacy | `npi` (or `id`), `chain`               |                   |
 * | claims   | `id`, `npi`, `ndc`, `quantity`, `price`| `timestamp`       |
 * | reverts  | `claim_id`                             | `id`, `timestamp` |
 *
 * ## Policies
 *
 * - Reverted claims count as fills but are excluded from prices.
 * - A chain's price is the claim-weighted mean over its pharmacies.
 * - Claims for unknown pharmacies are dropped unless
 *   [`UnknownPharmacyPolicy::Retain`](config::UnknownPharmacyPolicy) is chosen.
 */

// Re-export error types from root
pub use error::{PipelineError, Result, ErrorContext, ExportFormat};

// Public modules
pub mod data_types;
pub mod reader;
pub mod schema;
pub mod error;
pub mod join;
pub mod analytics;
pub mod dataset;
pub mod export;
pub mod config;
pub mod pipeline;

/// Prelude module for convenient imports
///
/// Import everything you need with:
/// ```
/// use pharmacy_metrics::prelude::*;
/// ```
pub mod prelude {
    pub use crate::data_types::*;
    pub use crate::reader::{RecordReader, LoadedTable};
    pub use crate::error::{PipelineError, Result};
    pub use crate::join::{JoinedClaim, JoinedClaims};
    pub use crate::analytics::ClaimsAnalytics;
    pub use crate::dataset::{ClaimsDataset, ClaimsDatasetBuilder, DatasetStatistics};
    pub use crate::export::{ReportExporter, JsonExporter, CsvExporter};
    pub use crate::config::{ConfigBuilder, PipelineConfig, PriceBasis, UnknownPharmacyPolicy};
    pub use crate::pipeline::{self, InputDirs, Reports, RunSummary};
    pub use crate::ExportFormat;
}

/// Pipeline constants
pub mod constants {
    /// Chains kept per drug in the recommendation report
    pub const DEFAULT_TOP_CHAINS: usize = 2;

    /// Quantities kept per drug in the quantity report
    pub const DEFAULT_TOP_QUANTITIES: usize = 5;

    /// Invalid records logged individually before switching to debug level
    pub const MAX_LOGGED_WARNINGS: usize = 10;

    /// Report file stems; the extension follows the export format
    pub const METRICS_REPORT: &str = "goal_2_metrics";
    pub const RECOMMENDATIONS_REPORT: &str = "goal_3_recommendations";
    pub const QUANTITIES_REPORT: &str = "goal_4_common_quantities";
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_record_kind_display() {
        assert_eq!(RecordKind::Pharmacy.to_string(), "pharmacy");
        assert_eq!(RecordKind::Claim.to_string(), "claims");
        assert_eq!(RecordKind::Revert.to_string(), "reverts");
    }

    #[test]
    fn test_export_format_extension() {
        assert_eq!(ExportFormat::Json.extension(), "json");
        assert_eq!(ExportFormat::Csv.extension(), "csv");
    }
}
