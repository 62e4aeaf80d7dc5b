//! AddonForge CLI - Build driver
//!
//! Commands: build, normalize, sync-manifests, package, repair
//! Outputs JSON to stdout
//! Returns 1 on startup/configuration errors, 2 on build failure

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use addonforge_core::{
    BuildLog, BuildPipeline, ContentDescriptor, ForgeConfig, ManifestManager, NormalizedContent,
    Normalizer, PackKind, Packager, ResponseFileGenerator,
};

#[derive(Parser)]
#[command(name = "addonforge-cli")]
#[command(about = "AddonForge CLI - Add-On Compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project root holding the behavior and resource trees
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize a recorded generator response, sync manifests and package
    Build {
        /// File holding the raw generator response
        #[arg(long)]
        response: PathBuf,

        /// Task description handed to the generator
        #[arg(long, default_value = "")]
        task: String,

        /// Rules document handed to the generator
        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// Normalize one descriptor and print the result without writing
    Normalize {
        /// Relative target path of the descriptor
        #[arg(short, long)]
        path: String,

        /// JSON payload
        #[arg(long)]
        payload: String,
    },

    /// Bump and relink both manifests
    SyncManifests,

    /// Package the current trees at the current manifest version
    Package,

    /// Re-normalize every JSON file already in the trees
    Repair,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).without_time())
        .init();
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => println!(r#"{{"success": false, "error": "{}"}}"#, e),
    }
}

fn failure(error: impl std::fmt::Display, log: &BuildLog) -> ExitCode {
    print_json(&serde_json::json!({
        "success": false,
        "error": error.to_string(),
        "log": log,
    }));
    ExitCode::from(2)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => match ForgeConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!(r#"{{"error": "Failed to load config: {}"}}"#, e);
                return ExitCode::FAILURE;
            }
        },
        None => ForgeConfig::default(),
    };

    let pipeline = match BuildPipeline::new(&cli.root, config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!(r#"{{"error": "{}"}}"#, e);
            return ExitCode::FAILURE;
        }
    };

    let mut log = BuildLog::new();

    match cli.command {
        Commands::Build { response, task, rules } => {
            let rules = match rules {
                Some(path) => match fs::read_to_string(&path) {
                    Ok(text) => text,
                    Err(e) => {
                        eprintln!(r#"{{"error": "Failed to read rules {}: {}"}}"#, path.display(), e);
                        return ExitCode::FAILURE;
                    }
                },
                None => String::new(),
            };
            let generator = ResponseFileGenerator::new(response);

            match pipeline.build_with(&generator, &task, &rules, &mut log) {
                Ok(report) => {
                    print_json(&serde_json::json!({
                        "success": true,
                        "report": report,
                        "log": log,
                    }));
                    ExitCode::SUCCESS
                }
                Err(e) => failure(e, &log),
            }
        }

        Commands::Normalize { path, payload } => {
            let content: serde_json::Value = match serde_json::from_str(&payload) {
                Ok(v) => v,
                Err(e) => {
                    println!(r#"{{"success": false, "error": "Invalid payload: {}"}}"#, e);
                    return ExitCode::FAILURE;
                }
            };
            let normalizer = Normalizer::new(pipeline.config());
            match normalizer.normalize(&ContentDescriptor::new(path, content), &mut log) {
                Ok(normalized) => {
                    let content = match &normalized.content {
                        NormalizedContent::Json(v) => v.clone(),
                        NormalizedContent::Text(t) => serde_json::Value::String(t.clone()),
                        NormalizedContent::Store => serde_json::Value::Null,
                    };
                    print_json(&serde_json::json!({
                        "success": true,
                        "path": normalized.path,
                        "changed": normalized.changed,
                        "content": content,
                        "log": log,
                    }));
                    ExitCode::SUCCESS
                }
                Err(e) => failure(e, &log),
            }
        }

        Commands::SyncManifests => {
            let manager = ManifestManager::new(pipeline.root(), pipeline.config());
            match manager.synchronize(&mut log) {
                Ok(sync) => {
                    print_json(&serde_json::json!({
                        "success": true,
                        "version": sync.version,
                        "behavior": sync.behavior,
                        "resource": sync.resource,
                    }));
                    ExitCode::SUCCESS
                }
                Err(e) => failure(e, &log),
            }
        }

        Commands::Package => {
            let manager = ManifestManager::new(pipeline.root(), pipeline.config());
            let version = match manager.read_prior(PackKind::Resource, &mut log) {
                Ok(prior) => match prior.version {
                    Some(v) => v,
                    None => return failure("resource manifest missing; run sync-manifests first", &log),
                },
                Err(e) => return failure(e, &log),
            };
            let packager = Packager::new(pipeline.root(), pipeline.config());
            match packager.package(&pipeline.config().product_name, version, &mut log) {
                Ok(archive) => {
                    print_json(&serde_json::json!({
                        "success": true,
                        "archive": archive.path,
                        "entries": archive.entries,
                        "removed": archive.removed,
                    }));
                    ExitCode::SUCCESS
                }
                Err(e) => failure(e, &log),
            }
        }

        Commands::Repair => match pipeline.repair_tree(&mut log) {
            Ok(report) => {
                print_json(&serde_json::json!({
                    "success": true,
                    "report": report,
                    "log": log,
                }));
                ExitCode::SUCCESS
            }
            Err(e) => failure(e, &log),
        },
    }
}
