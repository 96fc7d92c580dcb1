/*!
 * Unified dataset API for pharmacy claims data
 *
 * Provides a builder for loading the three record kinds from their directories
 * and a dataset type that hands them to the join and analytics stages.
 */

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::{Result, PipelineError};
use crate::config::{PipelineConfig, UnknownPharmacyPolicy};
use crate::data_types::*;
use crate::join::JoinedClaims;
use crate::reader::{LoadedTable, RecordReader};

/// Builder for loading a complete claims dataset
///
/// # Example
/// ```no_run
/// # use pharmacy_metrics::dataset::ClaimsDatasetBuilder;
/// let dataset = ClaimsDatasetBuilder::new()
///     .pharmacy_dir("data/pharmacies")
///     .claims_dir("data/claims")
///     .reverts_dir("data/reverts")
///     .build()?;
/// # Ok::<(), pharmacy_metrics::PipelineError>(())
/// ```
pub struct ClaimsDatasetBuilder {
    pharmacy_dirs: Vec<PathBuf>,
    claims_dirs: Vec<PathBuf>,
    reverts_dirs: Vec<PathBuf>,
    skip_invalid_records: bool,
    #[cfg(feature = "progress")]
    show_progress: bool,
}

impl Default for ClaimsDatasetBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaimsDatasetBuilder {
    /// Create a new dataset builder
    pub fn new() -> Self {
        Self {
            pharmacy_dirs: Vec::new(),
            claims_dirs: Vec::new(),
            reverts_dirs: Vec::new(),
            skip_invalid_records: true,
            #[cfg(feature = "progress")]
            show_progress: false,
        }
    }

    /// Create a builder carrying the loader settings of a configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        let builder = Self::new().skip_invalid_records(config.skip_invalid_records);
        #[cfg(feature = "progress")]
        let builder = builder.show_progress(config.enable_progress_bar);
        builder
    }

    /// Add a directory of pharmacy files
    pub fn pharmacy_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.pharmacy_dirs.push(path.as_ref().to_path_buf());
        self
    }

    /// Add a directory of claims files
    pub fn claims_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.claims_dirs.push(path.as_ref().to_path_buf());
        self
    }

    /// Add a directory of revert files
    pub fn reverts_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.reverts_dirs.push(path.as_ref().to_path_buf());
        self
    }

    pub fn pharmacy_dirs<I, P>(self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        paths.into_iter().fold(self, |b, p| b.pharmacy_dir(p))
    }

    pub fn claims_dirs<I, P>(self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        paths.into_iter().fold(self, |b, p| b.claims_dir(p))
    }

    pub fn reverts_dirs<I, P>(self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        paths.into_iter().fold(self, |b, p| b.reverts_dir(p))
    }

    /// Enable or disable skipping invalid files and records
    pub fn skip_invalid_records(mut self, skip: bool) -> Self {
        self.skip_invalid_records = skip;
        self
    }

    #[cfg(feature = "progress")]
    /// Enable or disable progress bars
    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Build the dataset, loading every configured directory
    ///
    /// Fails when a record kind has no directory, a directory is missing,
    /// a required column is absent, or no pharmacy or claim survives loading.
    pub fn build(self) -> Result<ClaimsDataset> {
        for (kind, dirs) in [
            (RecordKind::Pharmacy, &self.pharmacy_dirs),
            (RecordKind::Claim, &self.claims_dirs),
            (RecordKind::Revert, &self.reverts_dirs),
        ] {
            if dirs.is_empty() {
                return Err(PipelineError::Configuration {
                    message: format!("No {} directory specified", kind),
                    suggestion: Some(format!("Pass at least one {} directory", kind)),
                });
            }
        }

        #[allow(unused_mut)]
        let mut reader = RecordReader::new().with_skip_invalid_records(self.skip_invalid_records);
        #[cfg(feature = "progress")]
        {
            reader = reader.with_progress_bar(self.show_progress);
        }

        // Every directory is checked before any file is parsed
        for (kind, dirs) in [
            (RecordKind::Pharmacy, &self.pharmacy_dirs),
            (RecordKind::Claim, &self.claims_dirs),
            (RecordKind::Revert, &self.reverts_dirs),
        ] {
            if let Some(missing) = dirs.iter().find(|d| !d.is_dir()) {
                return Err(PipelineError::directory_not_found(kind, missing.clone()));
            }
        }

        let pharmacies = reader.load_pharmacies(&self.pharmacy_dirs)?;
        if pharmacies.is_empty() {
            return Err(PipelineError::empty_input(
                RecordKind::Pharmacy,
                "no valid pharmacy records found",
            ));
        }

        let claims = reader.load_claims(&self.claims_dirs)?;
        if claims.is_empty() {
            return Err(PipelineError::empty_input(
                RecordKind::Claim,
                "no valid claim records found",
            ));
        }

        let reverts = reader.load_reverts(&self.reverts_dirs)?;

        log::info!(
            "Loaded {} pharmacies, {} claims and {} reverts",
            pharmacies.len(),
            claims.len(),
            reverts.len()
        );

        Ok(ClaimsDataset::from_tables(pharmacies, claims, reverts))
    }
}

/// File and record counts gathered while loading
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub files_read: usize,
    pub files_skipped: usize,
    pub records_skipped: usize,
}

impl LoadReport {
    fn add<T>(&mut self, table: &LoadedTable<T>) {
        self.files_read += table.files_read;
        self.files_skipped += table.files_skipped;
        self.records_skipped += table.records_skipped;
    }
}

/// The three loaded source tables
#[derive(Debug, Clone)]
pub struct ClaimsDataset {
    pub pharmacies: Vec<PharmacyRecord>,
    pub claims: Vec<ClaimRecord>,
    pub reverts: Vec<RevertRecord>,
    pub load_report: LoadReport,
}

impl ClaimsDataset {
    /// Create a dataset from records already in memory
    pub fn new(
        pharmacies: Vec<PharmacyRecord>,
        claims: Vec<ClaimRecord>,
        reverts: Vec<RevertRecord>,
    ) -> Self {
        Self {
            pharmacies,
            claims,
            reverts,
            load_report: LoadReport::default(),
        }
    }

    fn from_tables(
        pharmacies: LoadedTable<PharmacyRecord>,
        claims: LoadedTable<ClaimRecord>,
        reverts: LoadedTable<RevertRecord>,
    ) -> Self {
        let mut load_report = LoadReport::default();
        load_report.add(&pharmacies);
        load_report.add(&claims);
        load_report.add(&reverts);

        Self {
            pharmacies: pharmacies.records,
            claims: claims.records,
            reverts: reverts.records,
            load_report,
        }
    }

    /// Join the claims with their pharmacies and reverts
    pub fn join(&self, policy: UnknownPharmacyPolicy) -> JoinedClaims<'_> {
        JoinedClaims::build(&self.pharmacies, &self.claims, &self.reverts, policy)
    }

    /// Get dataset statistics
    pub fn statistics(&self, joined: &JoinedClaims<'_>) -> DatasetStatistics {
        DatasetStatistics::from_dataset(self, joined)
    }
}

/// Dataset statistics
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetStatistics {
    pub pharmacies: usize,
    pub chains: usize,
    pub claims_loaded: usize,
    pub claims_joined: usize,
    pub reverts: usize,
    pub reverted_claims: usize,
    pub unmatched_reverts: usize,
    pub unknown_pharmacy_claims: usize,
    pub drugs: usize,
    pub earliest_claim: Option<NaiveDateTime>,
    pub latest_claim: Option<NaiveDateTime>,
    pub load_report: LoadReport,
}

impl DatasetStatistics {
    /// Calculate statistics from a dataset and its join
    pub fn from_dataset(dataset: &ClaimsDataset, joined: &JoinedClaims<'_>) -> Self {
        let chains: HashSet<&str> = joined.chains.values().copied().collect();
        let drugs: HashSet<&Ndc> = joined.claims.iter().map(|c| &c.claim.ndc).collect();
        let timestamps = joined.claims.iter().filter_map(|c| c.claim.timestamp);

        Self {
            pharmacies: joined.chains.len(),
            chains: chains.len(),
            claims_loaded: dataset.claims.len(),
            claims_joined: joined.len(),
            reverts: dataset.reverts.len(),
            reverted_claims: joined.reverted_count(),
            unmatched_reverts: joined.unmatched_reverts,
            unknown_pharmacy_claims: joined.unknown_pharmacy_claims,
            drugs: drugs.len(),
            earliest_claim: timestamps.clone().min(),
            latest_claim: timestamps.max(),
            load_report: dataset.load_report.clone(),
        }
    }

    /// Print a formatted summary of the statistics
    pub fn print_summary(&self) {
        println!("=== Pharmacy Claims Dataset Statistics ===");
        println!("Pharmacies: {} ({} chains)", self.pharmacies, self.chains);
        println!("Claims Loaded: {}", self.claims_loaded);
        println!("Claims After Join: {}", self.claims_joined);
        if self.unknown_pharmacy_claims > 0 {
            println!("  With Unknown Pharmacy: {}", self.unknown_pharmacy_claims);
        }
        println!("Reverts: {}", self.reverts);
        if self.claims_joined > 0 {
            println!(
                "  Reverted Claims: {} ({:.1}%)",
                self.reverted_claims,
                (self.reverted_claims as f64 / self.claims_joined as f64) * 100.0
            );
        }
        if self.unmatched_reverts > 0 {
            println!("  Unmatched Reverts: {}", self.unmatched_reverts);
        }
        println!("Distinct Drugs: {}", self.drugs);
        if let (Some(first), Some(last)) = (self.earliest_claim, self.latest_claim) {
            println!("Claim Period: {} to {}", first, last);
        }
        println!(
            "Files Read: {} (skipped {}), Records Skipped: {}",
            self.load_report.files_read,
            self.load_report.files_skipped,
            self.load_report.records_skipped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Dirs {
        _root: TempDir,
        pharmacies: PathBuf,
        claims: PathBuf,
        reverts: PathBuf,
    }

    fn dirs() -> Dirs {
        let root = TempDir::new().unwrap();
        let pharmacies = root.path().join("pharmacies");
        let claims = root.path().join("claims");
        let reverts = root.path().join("reverts");
        for dir in [&pharmacies, &claims, &reverts] {
            fs::create_dir(dir).unwrap();
        }
        Dirs { _root: root, pharmacies, claims, reverts }
    }

    fn builder(d: &Dirs) -> ClaimsDatasetBuilder {
        ClaimsDatasetBuilder::new()
            .pharmacy_dir(&d.pharmacies)
            .claims_dir(&d.claims)
            .reverts_dir(&d.reverts)
    }

    #[test]
    fn test_build_and_statistics() {
        let d = dirs();
        fs::write(d.pharmacies.join("p.csv"), "chain,npi\nhealth,1\nsaint,2\n").unwrap();
        fs::write(
            d.claims.join("c.json"),
            r#"[
                {"id": "c1", "npi": "1", "ndc": "A", "price": 1, "quantity": 1, "timestamp": "2024-01-02T00:00:00"},
                {"id": "c2", "npi": "3", "ndc": "B", "price": 1, "quantity": 1, "timestamp": "2024-01-01T00:00:00"}
            ]"#,
        )
        .unwrap();
        fs::write(d.reverts.join("r.json"), r#"[{"id": "r1", "claim_id": "c1"}]"#).unwrap();

        let dataset = builder(&d).build().unwrap();
        let joined = dataset.join(UnknownPharmacyPolicy::Drop);
        let stats = dataset.statistics(&joined);

        assert_eq!(stats.pharmacies, 2);
        assert_eq!(stats.chains, 2);
        assert_eq!(stats.claims_loaded, 2);
        assert_eq!(stats.claims_joined, 1);
        assert_eq!(stats.unknown_pharmacy_claims, 1);
        assert_eq!(stats.reverted_claims, 1);
        assert_eq!(stats.drugs, 1);
        assert_eq!(stats.load_report.files_read, 3);
        assert_eq!(stats.earliest_claim, stats.latest_claim);
    }

    #[test]
    fn test_empty_reverts_are_allowed() {
        let d = dirs();
        fs::write(d.pharmacies.join("p.csv"), "npi,chain\n1,health\n").unwrap();
        fs::write(d.claims.join("c.csv"), "id,npi,ndc,price,quantity\nc1,1,A,1,1\n").unwrap();

        let dataset = builder(&d).build().unwrap();
        assert!(dataset.reverts.is_empty());
    }

    #[test]
    fn test_empty_pharmacies_are_fatal() {
        let d = dirs();
        fs::write(d.claims.join("c.csv"), "id,npi,ndc,price,quantity\nc1,1,A,1,1\n").unwrap();

        let result = builder(&d).build();
        assert!(matches!(
            result,
            Err(PipelineError::EmptyInput { kind: RecordKind::Pharmacy, .. })
        ));
    }

    #[test]
    fn test_missing_reverts_directory_fails_before_loading() {
        let d = dirs();
        fs::write(d.pharmacies.join("p.csv"), "npi,chain\n1,health\n").unwrap();
        fs::remove_dir(&d.reverts).unwrap();

        let result = builder(&d).build();
        assert!(matches!(
            result,
            Err(PipelineError::DirectoryNotFound { kind: RecordKind::Revert, .. })
        ));
    }

    #[test]
    fn test_unspecified_directory_is_a_configuration_error() {
        let result = ClaimsDatasetBuilder::new().pharmacy_dir("x").claims_dir("y").build();
        assert!(matches!(result, Err(PipelineError::Configuration { .. })));
    }
}
