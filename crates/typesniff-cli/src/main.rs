//! typesniff CLI - detect the test object type of a directory or web service

mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use typesniff_core::{
    Catalog, DetectorConfig, FileSystem, HttpTransport, LocalResource, RealFileSystem,
    RemoteResource, Resource, TestObjectTypeDetector,
};
use url::Url;

/// Exit code when nothing was detected.
const EXIT_NOT_DETECTED: u8 = 1;
/// Exit code for usage and configuration errors.
const EXIT_ERROR: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "typesniff")]
#[command(version, about = "Detect the test object type of XML directories and web services")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect the type of a local directory or an http(s) endpoint
    Detect(DetectArgs),

    /// List the detectable types of a catalog
    Types(TypesArgs),
}

#[derive(Args, Debug)]
struct DetectArgs {
    /// Directory path or http(s):// URL
    target: String,

    /// Only consider these type ids (repeatable)
    #[arg(short, long = "expect", value_name = "ID")]
    expect: Vec<String>,

    /// Catalog TOML file (built-in catalog when absent)
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// Detector configuration TOML file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(Args, Debug)]
struct TypesArgs {
    /// Catalog TOML file (built-in catalog when absent)
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Command::Detect(args) => detect(args),
        Command::Types(args) => types(args),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_catalog(path: Option<&Path>) -> anyhow::Result<Catalog> {
    match path {
        Some(path) => Catalog::load(path)
            .with_context(|| format!("Failed to load catalog from {}", path.display())),
        None => Ok(Catalog::builtin()),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<DetectorConfig> {
    match path {
        Some(path) => DetectorConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(DetectorConfig::default()),
    }
}

fn resource_for(target: &str, timeout: Option<u64>) -> anyhow::Result<Resource> {
    let lower = target.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        let uri = Url::parse(target).with_context(|| format!("Invalid URL: {target}"))?;
        let transport = HttpTransport::with_timeout(timeout.map(Duration::from_secs))?;
        return Ok(RemoteResource::new(uri, Arc::new(transport)).into());
    }

    let dir = Path::new(target);
    let fs = RealFileSystem;
    if !fs.is_dir(dir) {
        bail!("{target} is not a directory");
    }
    let local = LocalResource::new(dir, Arc::new(fs))
        .with_context(|| format!("Cannot resolve {target}"))?;
    Ok(local.into())
}

fn detect(args: &DetectArgs) -> anyhow::Result<ExitCode> {
    let catalog = load_catalog(args.catalog.as_deref())?;
    let config = load_config(args.config.as_deref())?;
    let mut detector = TestObjectTypeDetector::new(catalog, &config)?;
    detector.init()?;

    let resource = resource_for(&args.target, args.timeout)?;
    debug!(uri = %resource.uri(), expected = args.expect.len(), "detecting");

    let detected = if args.expect.is_empty() {
        detector.detect_type(&resource)?
    } else {
        detector.detect_type_expecting(&resource, &args.expect)?
    };

    match args.format {
        OutputFormat::Text => output::print_detection_text(&args.target, detected.as_ref()),
        OutputFormat::Json => output::print_detection_json(&args.target, detected.as_ref())?,
    }

    Ok(match detected {
        Some(_) => ExitCode::SUCCESS,
        None => ExitCode::from(EXIT_NOT_DETECTED),
    })
}

fn types(args: &TypesArgs) -> anyhow::Result<ExitCode> {
    let catalog = load_catalog(args.catalog.as_deref())?;
    let mut detector = TestObjectTypeDetector::with_catalog(catalog);
    detector.init()?;

    let supported = detector.supported_types()?;
    let skipped = detector.skipped_types()?;
    match args.format {
        OutputFormat::Text => output::print_types_text(&supported, skipped),
        OutputFormat::Json => output::print_types_json(&supported, skipped)?,
    }
    Ok(ExitCode::SUCCESS)
}
