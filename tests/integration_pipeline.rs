/*!
 * End-to-end tests for the claims pipeline
 *
 * Each test lays out pharmacy, claims, and revert directories in a temporary
 * directory, runs the pipeline, and inspects the written reports.
 */

use pharmacy_metrics::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Fixture {
    root: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let fixture = Self { root: TempDir::new().expect("temp dir") };
        for dir in ["pharmacies", "claims", "reverts"] {
            fs::create_dir_all(fixture.root.path().join(dir)).expect("create input dir");
        }
        fixture
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }

    fn write(&self, relative: &str, contents: &str) {
        let path = self.root.path().join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("create parent");
        fs::write(path, contents).expect("write fixture");
    }

    fn inputs(&self) -> InputDirs {
        InputDirs {
            pharmacy: vec![self.dir("pharmacies")],
            claims: vec![self.dir("claims")],
            reverts: vec![self.dir("reverts")],
        }
    }

    fn output(&self) -> PathBuf {
        self.dir("output")
    }

    fn run(&self, config: &PipelineConfig) -> Result<RunSummary> {
        pipeline::run(&self.inputs(), &self.output(), config)
    }

    fn report(&self, name: &str) -> Value {
        read_json(&self.output().join(name))
    }

    /// Three chains, two drugs, one revert, one unknown pharmacy
    fn standard() -> Self {
        let fixture = Self::new();
        fixture.write(
            "pharmacies/pharmacies.csv",
            "chain,npi\nhealth,1111111111\nsaint,2222222222\n",
        );
        fixture.write("pharmacies/more/doctor.json", r#"[{"chain": "doctor", "id": "3333333333"}]"#);
        fixture.write(
            "claims/claims_a.json",
            &json!([
                {"id": "c1", "npi": "1111111111", "ndc": "A", "price": 5.0, "quantity": 30, "timestamp": "2024-01-01T10:00:00"},
                {"id": "c2", "npi": "2222222222", "ndc": "A", "price": 3.0, "quantity": 30, "timestamp": "2024-01-02T10:00:00"},
                {"id": "c3", "npi": "3333333333", "ndc": "A", "price": 8.0, "quantity": 60, "timestamp": "2024-01-03T10:00:00"},
                {"id": "c4", "npi": "9999999999", "ndc": "A", "price": 1.0, "quantity": 30, "timestamp": "2024-01-04T10:00:00"}
            ])
            .to_string(),
        );
        fixture.write(
            "claims/claims_b.csv",
            "id,npi,ndc,price,quantity,timestamp\n\
             c5,1111111111,B,2.00,30,2024-02-01 09:00:00\n\
             c6,1111111111,B,4.00,30,2024-02-02 09:00:00\n\
             c7,1111111111,B,9.00,90,2024-02-03 09:00:00\n",
        );
        fixture.write("reverts/reverts.json", r#"[{"id": "r1", "claim_id": "c6", "timestamp": "2024-02-03"}]"#);
        fixture
    }
}

fn read_json(path: &Path) -> Value {
    let contents = fs::read_to_string(path).unwrap_or_else(|e| panic!("read {}: {}", path.display(), e));
    serde_json::from_str(&contents).expect("valid JSON")
}

fn find<'a>(rows: &'a Value, key: &str, value: &str) -> &'a Value {
    rows.as_array()
        .expect("array report")
        .iter()
        .find(|row| row[key] == value)
        .unwrap_or_else(|| panic!("no row with {} = {}", key, value))
}

#[test]
fn test_full_pipeline_reports() {
    let fixture = Fixture::standard();
    let summary = fixture.run(&PipelineConfig::default()).expect("pipeline run");

    assert_eq!(summary.files_written.len(), 3);
    assert_eq!(summary.statistics.pharmacies, 3);
    assert_eq!(summary.statistics.claims_loaded, 7);
    assert_eq!(summary.statistics.claims_joined, 6);
    assert_eq!(summary.statistics.unknown_pharmacy_claims, 1);

    let metrics = fixture.report("goal_2_metrics.json");
    assert_eq!(metrics.as_array().unwrap().len(), 4);

    let b = metrics
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["npi"] == "1111111111" && r["ndc"] == "B")
        .expect("metrics for pharmacy 1, drug B");
    assert_eq!(b["fills"], 3);
    assert_eq!(b["reverted"], 1);
    // c5 and c7 remain: unit prices 2 and 9, totals 60 and 810
    assert_eq!(b["avg_price"], 5.5);
    assert_eq!(b["total_price"], 870.0);

    assert!(metrics.as_array().unwrap().iter().all(|r| r["npi"] != "9999999999"));

    let recommendations = fixture.report("goal_3_recommendations.json");
    let a = find(&recommendations, "ndc", "A");
    assert_eq!(
        a["chain"],
        json!([{"name": "saint", "avg_price": 3.0}, {"name": "health", "avg_price": 5.0}])
    );

    let quantities = fixture.report("goal_4_common_quantities.json");
    let a = find(&quantities, "ndc", "A");
    assert_eq!(
        a["most_prescribed_quantity"],
        json!([{"quantity": 30, "count": 2}, {"quantity": 60, "count": 1}])
    );
    let b = find(&quantities, "ndc", "B");
    assert_eq!(
        b["most_prescribed_quantity"],
        json!([{"quantity": 30, "count": 2}, {"quantity": 90, "count": 1}])
    );
}

#[test]
fn test_identical_inputs_produce_identical_bytes() {
    let fixture = Fixture::standard();
    let config = PipelineConfig::default();

    fixture.run(&config).expect("first run");
    let first: Vec<Vec<u8>> = ["goal_2_metrics.json", "goal_3_recommendations.json", "goal_4_common_quantities.json"]
        .iter()
        .map(|name| fs::read(fixture.output().join(name)).expect("read report"))
        .collect();

    fixture.run(&config).expect("second run");
    let second: Vec<Vec<u8>> = ["goal_2_metrics.json", "goal_3_recommendations.json", "goal_4_common_quantities.json"]
        .iter()
        .map(|name| fs::read(fixture.output().join(name)).expect("read report"))
        .collect();

    assert_eq!(first, second);
}

#[test]
fn test_report_invariants() {
    let fixture = Fixture::standard();
    fixture.run(&PipelineConfig::default()).expect("pipeline run");

    for row in fixture.report("goal_2_metrics.json").as_array().unwrap() {
        assert!(row["reverted"].as_u64().unwrap() <= row["fills"].as_u64().unwrap());
    }

    for row in fixture.report("goal_3_recommendations.json").as_array().unwrap() {
        let prices: Vec<f64> = row["chain"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["avg_price"].as_f64().unwrap())
            .collect();
        assert!(prices.len() <= 2);
        assert!(prices.windows(2).all(|w| w[0] <= w[1]));
    }

    for row in fixture.report("goal_4_common_quantities.json").as_array().unwrap() {
        let counts: Vec<u64> = row["most_prescribed_quantity"]
            .as_array()
            .unwrap()
            .iter()
            .map(|q| q["count"].as_u64().unwrap())
            .collect();
        assert!(counts.len() <= 5);
        assert!(counts.windows(2).all(|w| w[0] >= w[1]));
    }
}

#[test]
fn test_retain_policy_counts_unknown_pharmacy_claims() {
    let fixture = Fixture::standard();
    let config = ConfigBuilder::new()
        .unknown_pharmacy_policy(UnknownPharmacyPolicy::Retain)
        .build();
    fixture.run(&config).expect("pipeline run");

    let metrics = fixture.report("goal_2_metrics.json");
    let unknown = find(&metrics, "npi", "9999999999");
    assert_eq!(unknown["fills"], 1);

    // Cheapest price for A belongs to the unknown pharmacy but it has no chain
    let recommendations = fixture.report("goal_3_recommendations.json");
    let a = find(&recommendations, "ndc", "A");
    assert_eq!(a["chain"][0]["name"], "saint");

    let quantities = fixture.report("goal_4_common_quantities.json");
    let a = find(&quantities, "ndc", "A");
    assert_eq!(a["most_prescribed_quantity"][0], json!({"quantity": 30, "count": 3}));
}

#[test]
fn test_total_price_basis() {
    let fixture = Fixture::new();
    fixture.write("pharmacies/p.csv", "npi,chain\n1,health\n");
    fixture.write("claims/c.csv", "id,npi,ndc,price,quantity\nc1,1,A,300,30\nc2,1,A,100,20\n");

    let config = ConfigBuilder::new().price_basis(PriceBasis::Total).build();
    fixture.run(&config).expect("pipeline run");

    let metrics = fixture.report("goal_2_metrics.json");
    assert_eq!(metrics[0]["avg_price"], 7.5);
    assert_eq!(metrics[0]["total_price"], 400.0);
}

#[test]
fn test_missing_directory_fails_without_output() {
    let fixture = Fixture::standard();
    let mut inputs = fixture.inputs();
    inputs.reverts.push(fixture.dir("does-not-exist"));

    let result = pipeline::run(&inputs, &fixture.output(), &PipelineConfig::default());
    assert!(matches!(result, Err(PipelineError::DirectoryNotFound { .. })));
    assert!(!fixture.output().exists());
}

#[test]
fn test_missing_required_column_fails_without_output() {
    let fixture = Fixture::new();
    fixture.write("pharmacies/p.csv", "npi,chain\n1,health\n");
    fixture.write("claims/c.csv", "id,npi,ndc,quantity\nc1,1,A,30\n");

    let result = fixture.run(&PipelineConfig::default());
    match result {
        Err(PipelineError::MissingColumn { kind, column, .. }) => {
            assert_eq!(kind, RecordKind::Claim);
            assert_eq!(column, "price");
        }
        other => panic!("expected missing column error, got {:?}", other.map(|s| s.files_written)),
    }
    assert!(!fixture.output().exists());
}

#[test]
fn test_claims_for_unknown_pharmacies_only_is_an_error() {
    let fixture = Fixture::new();
    fixture.write("pharmacies/p.csv", "npi,chain\n1,health\n");
    fixture.write("claims/c.csv", "id,npi,ndc,price,quantity\nc1,2,A,1,1\n");

    let result = fixture.run(&PipelineConfig::default());
    assert!(matches!(result, Err(PipelineError::EmptyInput { kind: RecordKind::Claim, .. })));
    assert!(!fixture.output().exists());
}

#[test]
fn test_malformed_files_are_skipped_unless_strict() {
    let fixture = Fixture::standard();
    fixture.write("claims/broken.json", "[{\"id\": \"c99\", ");
    fixture.write("claims/ragged.csv", "id,npi,ndc,price,quantity\nc98,1111111111,A,1,1,extra\n");

    let summary = fixture.run(&PipelineConfig::default()).expect("lenient run");
    assert_eq!(summary.statistics.load_report.files_skipped, 1);
    assert_eq!(summary.statistics.load_report.records_skipped, 1);
    assert_eq!(summary.statistics.claims_loaded, 7);

    let strict = ConfigBuilder::new().skip_invalid_records(false).build();
    assert!(fixture.run(&strict).is_err());
}

#[test]
fn test_existing_reports_are_overwritten() {
    let fixture = Fixture::standard();
    fs::create_dir_all(fixture.output()).unwrap();
    fs::write(fixture.output().join("goal_3_recommendations.json"), "{\"stale\": true}").unwrap();

    fixture.run(&PipelineConfig::default()).expect("pipeline run");
    assert!(fixture.report("goal_3_recommendations.json").is_array());
}

#[test]
fn test_failed_write_keeps_previous_reports() {
    let fixture = Fixture::standard();
    fixture.run(&PipelineConfig::default()).expect("first run");
    let previous_metrics = fs::read(fixture.output().join("goal_2_metrics.json")).unwrap();
    let previous_quantities = fs::read(fixture.output().join("goal_4_common_quantities.json")).unwrap();

    // A directory where a report should go makes the second run fail part way
    fs::remove_file(fixture.output().join("goal_3_recommendations.json")).unwrap();
    fs::create_dir(fixture.output().join("goal_3_recommendations.json")).unwrap();
    fixture.write("claims/late.csv", "id,npi,ndc,price,quantity\nc9,2222222222,C,1,10\n");

    let result = fixture.run(&PipelineConfig::default());
    assert!(matches!(result, Err(PipelineError::Export { .. })));

    assert_eq!(fs::read(fixture.output().join("goal_2_metrics.json")).unwrap(), previous_metrics);
    assert_eq!(fs::read(fixture.output().join("goal_4_common_quantities.json")).unwrap(), previous_quantities);
    assert!(fixture.output().join("goal_3_recommendations.json").is_dir());
    assert_eq!(fs::read_dir(fixture.output()).unwrap().count(), 3);
}

#[test]
fn test_huge_prices_stay_numeric() {
    let fixture = Fixture::new();
    fixture.write("pharmacies/p.csv", "npi,chain\n1,health\n");
    fixture.write("claims/c.csv", "id,npi,ndc,price,quantity\nc1,1,A,1e308,30\nc2,1,A,2,30\n");

    fixture.run(&PipelineConfig::default()).expect("pipeline run");
    let metrics = fixture.report("goal_2_metrics.json");
    assert_eq!(metrics[0]["fills"], 2);
    assert_eq!(metrics[0]["avg_price"], 2.0);
    assert_eq!(metrics[0]["total_price"], 60.0);
}

#[test]
fn test_multiple_directories_per_kind() {
    let fixture = Fixture::standard();
    fixture.write("claims_extra/late.csv", "id,npi,ndc,price,quantity\nc8,2222222222,B,1,15\n");

    let mut inputs = fixture.inputs();
    inputs.claims.push(fixture.dir("claims_extra"));
    let summary = pipeline::run(&inputs, &fixture.output(), &PipelineConfig::default()).expect("pipeline run");
    assert_eq!(summary.statistics.claims_loaded, 8);

    let recommendations = fixture.report("goal_3_recommendations.json");
    let b = find(&recommendations, "ndc", "B");
    assert_eq!(b["chain"][0], json!({"name": "saint", "avg_price": 1.0}));
}

#[test]
fn test_csv_output_format() {
    let fixture = Fixture::standard();
    let config = ConfigBuilder::new().output_format(ExportFormat::Csv).build();
    let summary = fixture.run(&config).expect("pipeline run");

    assert!(summary.files_written.iter().all(|p| p.extension().and_then(|e| e.to_str()) == Some("csv")));
    let recommendations = fs::read_to_string(fixture.output().join("goal_3_recommendations.csv")).unwrap();
    assert!(recommendations.contains("A,1,saint,3"));
}
