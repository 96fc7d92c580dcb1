use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pharmacy_metrics::prelude::*;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pmcli")]
#[command(about = "Pharmacy claims CLI - aggregate claims into pricing and quantity reports", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the inputs, compute the reports, and write them to the output directory
    Run(RunArgs),
    /// Load and join the inputs and print dataset statistics
    Stats(StatsArgs),
}

#[derive(Args)]
struct InputArgs {
    /// Directories holding pharmacy files
    #[arg(long, alias = "pharmacy_dirs", num_args = 1.., required = true)]
    pharmacy_dirs: Vec<PathBuf>,
    /// Directories holding claims files
    #[arg(long, alias = "claims_dirs", num_args = 1.., required = true)]
    claims_dirs: Vec<PathBuf>,
    /// Directories holding revert files
    #[arg(long, alias = "reverts_dirs", num_args = 1.., required = true)]
    reverts_dirs: Vec<PathBuf>,
    /// TOML configuration file (defaults to the user config file, then PHARMA_METRICS_* variables)
    #[arg(long, env = "PHARMA_METRICS_CONFIG")]
    config: Option<PathBuf>,
    /// How the claim price is interpreted
    #[arg(long, value_enum)]
    price_basis: Option<PriceBasisOpt>,
    /// What to do with claims for pharmacies missing from the pharmacy data
    #[arg(long, value_enum)]
    unknown_pharmacies: Option<UnknownPharmaciesOpt>,
    /// Fail on the first malformed file or record instead of skipping it
    #[arg(long)]
    strict: bool,
    /// Show a progress bar while reading files
    #[arg(long)]
    progress: bool,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    inputs: InputArgs,
    /// Directory the reports are written to
    #[arg(long, alias = "output_dir")]
    output_dir: PathBuf,
    /// Report format
    #[arg(long, value_enum)]
    format: Option<FormatOpt>,
    /// Write JSON without indentation
    #[arg(long)]
    compact: bool,
}

#[derive(Args)]
struct StatsArgs {
    #[command(flatten)]
    inputs: InputArgs,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum PriceBasisOpt {
    Unit,
    Total,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum UnknownPharmaciesOpt {
    Drop,
    Retain,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum FormatOpt {
    Json,
    Csv,
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .target(env_logger::Target::Stderr)
        .init();

    let result = match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Stats(args) => cmd_stats(args),
    };

    if let Err(e) = result {
        match e.downcast_ref::<PipelineError>() {
            Some(pipeline_error) => eprintln!("Error: {}", pipeline_error.user_message()),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let config = run_config(&args)?;

    log::info!("Reading data from provided directories...");
    let summary = pipeline::run(&input_dirs(&args.inputs), &args.output_dir, &config)?;

    log::info!(
        "Loaded {} pharmacies and {} reverts; {} of {} claims remain after filtering for known pharmacies",
        summary.statistics.pharmacies,
        summary.statistics.reverts,
        summary.statistics.claims_joined,
        summary.statistics.claims_loaded
    );
    for path in &summary.files_written {
        println!("{}", path.display());
    }
    log::info!("Pipeline finished successfully.");
    Ok(())
}

fn cmd_stats(args: StatsArgs) -> Result<()> {
    let config = load_config(&args.inputs)?;
    let dataset = input_dirs(&args.inputs).load(&config)?;
    let joined = dataset.join(config.unknown_pharmacy_policy);
    dataset.statistics(&joined).print_summary();
    Ok(())
}

/// Config file (explicit or default) or environment, then command-line overrides
fn load_config(args: &InputArgs) -> Result<PipelineConfig> {
    let base = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PipelineConfig::load(),
    };

    let mut builder = ConfigBuilder::from_config(base);
    if let Some(basis) = args.price_basis {
        builder = builder.price_basis(match basis {
            PriceBasisOpt::Unit => PriceBasis::Unit,
            PriceBasisOpt::Total => PriceBasis::Total,
        });
    }
    if let Some(policy) = args.unknown_pharmacies {
        builder = builder.unknown_pharmacy_policy(match policy {
            UnknownPharmaciesOpt::Drop => UnknownPharmacyPolicy::Drop,
            UnknownPharmaciesOpt::Retain => UnknownPharmacyPolicy::Retain,
        });
    }
    if args.strict {
        builder = builder.skip_invalid_records(false);
    }
    if args.progress {
        builder = builder.progress_bar(true);
    }

    let config = builder.build();
    config.validate()?;
    Ok(config)
}

/// Input configuration plus the output options of `run`
fn run_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut builder = ConfigBuilder::from_config(load_config(&args.inputs)?);
    if let Some(format) = args.format {
        builder = builder.output_format(match format {
            FormatOpt::Json => ExportFormat::Json,
            FormatOpt::Csv => ExportFormat::Csv,
        });
    }
    if args.compact {
        builder = builder.pretty_print(false);
    }
    Ok(builder.build())
}

fn input_dirs(args: &InputArgs) -> InputDirs {
    InputDirs {
        pharmacy: args.pharmacy_dirs.clone(),
        claims: args.claims_dirs.clone(),
        reverts: args.reverts_dirs.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn run_args(argv: &[&str]) -> RunArgs {
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Run(args) => args,
            Commands::Stats(_) => panic!("expected run"),
        }
    }

    #[test]
    fn test_underscore_aliases() {
        let args = run_args(&[
            "pmcli", "run",
            "--pharmacy_dirs", "p1", "p2",
            "--claims_dirs", "c",
            "--reverts_dirs", "r",
            "--output_dir", "out",
        ]);
        assert_eq!(args.inputs.pharmacy_dirs, vec![PathBuf::from("p1"), PathBuf::from("p2")]);
        assert_eq!(args.inputs.claims_dirs, vec![PathBuf::from("c")]);
        assert_eq!(args.inputs.reverts_dirs, vec![PathBuf::from("r")]);
        assert_eq!(args.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_value_enums() {
        let args = run_args(&[
            "pmcli", "run",
            "--pharmacy-dirs", "p", "--claims-dirs", "c", "--reverts-dirs", "r",
            "--output-dir", "out",
            "--price-basis", "total",
            "--unknown-pharmacies", "retain",
            "--format", "csv",
        ]);
        assert!(args.inputs.price_basis == Some(PriceBasisOpt::Total));
        assert!(args.inputs.unknown_pharmacies == Some(UnknownPharmaciesOpt::Retain));
        assert!(args.format == Some(FormatOpt::Csv));

        let bad = Cli::try_parse_from([
            "pmcli", "run",
            "--pharmacy-dirs", "p", "--claims-dirs", "c", "--reverts-dirs", "r",
            "--output-dir", "out",
            "--price-basis", "per-pill",
        ]);
        assert!(bad.is_err());
    }

    #[test]
    fn test_input_directories_are_required() {
        let result = Cli::try_parse_from(["pmcli", "stats", "--pharmacy-dirs", "p", "--claims-dirs", "c"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "price_basis = \"total\"\nunknown_pharmacy_policy = \"retain\"\ntop_chains = 3\noutput_format = \"csv\"\n",
        )
        .unwrap();
        let config_path = path.to_str().unwrap();

        // File values hold where no flag is given
        let args = run_args(&[
            "pmcli", "run",
            "--pharmacy-dirs", "p", "--claims-dirs", "c", "--reverts-dirs", "r",
            "--output-dir", "out",
            "--config", config_path,
        ]);
        let config = run_config(&args).unwrap();
        assert_eq!(config.price_basis, PriceBasis::Total);
        assert_eq!(config.unknown_pharmacy_policy, UnknownPharmacyPolicy::Retain);
        assert_eq!(config.top_chains, 3);
        assert_eq!(config.output_format, ExportFormat::Csv);
        assert!(config.skip_invalid_records);
        assert!(config.pretty_print);

        let args = run_args(&[
            "pmcli", "run",
            "--pharmacy-dirs", "p", "--claims-dirs", "c", "--reverts-dirs", "r",
            "--output-dir", "out",
            "--config", config_path,
            "--price-basis", "unit",
            "--unknown-pharmacies", "drop",
            "--format", "json",
            "--strict",
            "--compact",
            "--progress",
        ]);
        let config = run_config(&args).unwrap();
        assert_eq!(config.price_basis, PriceBasis::Unit);
        assert_eq!(config.unknown_pharmacy_policy, UnknownPharmacyPolicy::Drop);
        assert_eq!(config.top_chains, 3);
        assert_eq!(config.output_format, ExportFormat::Json);
        assert!(!config.skip_invalid_records);
        assert!(!config.pretty_print);
        assert!(config.enable_progress_bar);
    }

    #[test]
    fn test_unreadable_config_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        let args = run_args(&[
            "pmcli", "run",
            "--pharmacy-dirs", "p", "--claims-dirs", "c", "--reverts-dirs", "r",
            "--output-dir", "out",
            "--config", path.to_str().unwrap(),
        ]);
        let err = run_config(&args).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to load config"));
    }
}
