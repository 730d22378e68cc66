#![forbid(unsafe_code)]

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tessel_compiler::{CompilationResult, DiagnosticLevel};
use tessel_config::{EngineSettings, TargetManifest};
use tessel_engine::{ActionReport, ActionResult, DependencyStores, Engine, ProviderStore, TarSource};

type CliResult = Result<(), Box<dyn Error>>;

/// Environment variable holding a `tracing` filter directive.
const LOG_ENV: &str = "TESSEL_LOG";

#[derive(Debug, Parser)]
#[command(name = "tessel", about = "Per-target build orchestration")]
#[command(version)]
struct Cli {
    /// Log at debug level and show raw compiler output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build one target declared in a TARGET.toml
    Run {
        /// Path to the TARGET.toml
        manifest: PathBuf,
        /// Provider store of a dependency (repeatable)
        #[arg(long = "dep-store", value_name = "PATH")]
        dep_stores: Vec<PathBuf>,
        /// Where to write this target's provider store
        /// (defaults to `providers.json` in its intermediate directory)
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
        /// Engine settings file
        #[arg(long, default_value = "tessel.toml")]
        settings: PathBuf,
    },
    /// Print the providers in a provider store
    Inspect {
        /// Path to a provider store written by `tessel run`
        store: PathBuf,
    },
    /// Merge one named entry from several archives into a file
    Aggregate {
        /// Entry name to collect, e.g. `protobuf.meta`
        entry: String,
        /// Merged output; deleted if no archive carries the entry
        #[arg(long)]
        output: PathBuf,
        /// Archives to scan, in merge order
        #[arg(required = true)]
        archives: Vec<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Command::Run {
            manifest,
            dep_stores,
            out,
            settings,
        } => cmd_run(&manifest, &dep_stores, out, &settings, cli.verbose),
        Command::Inspect { store } => cmd_inspect(&store),
        Command::Aggregate {
            entry,
            output,
            archives,
        } => cmd_aggregate(&entry, &output, &archives),
    };

    if let Err(msg) = result {
        eprintln!("error: {msg}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn cmd_run(
    manifest_path: &Path,
    dep_store_paths: &[PathBuf],
    out: Option<PathBuf>,
    settings_path: &Path,
    verbose: bool,
) -> CliResult {
    let settings = EngineSettings::from_path(settings_path)?;
    let manifest = TargetManifest::from_path(manifest_path)?;
    let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    let target = manifest.to_target(base_dir, &settings)?;

    let mut stores = DependencyStores::new();
    for path in dep_store_paths {
        let store = ProviderStore::read(path)?;
        let label = store.label().clone();
        if stores.insert(label.clone(), store).is_some() {
            return Err(format!("provider store for {label} given more than once").into());
        }
    }

    let engine = Engine::from_settings(&settings);
    let outcome = tessel_engine::run_target(&target, &stores, &engine)?;
    print_diagnostics(&outcome.report, verbose);

    match outcome.result {
        ActionResult::Error => {
            if let Some(failure) = outcome.report.failure {
                return Err(failure.into());
            }
            let errors = outcome
                .report
                .compilation
                .as_ref()
                .map_or(0, CompilationResult::error_count);
            return Err(format!("could not build {} ({errors} error(s))", target.label()).into());
        }
        ActionResult::Skipped => {
            eprintln!("    Skipping {} (nothing to build)", target.label());
        }
        ActionResult::Ok => {
            if let Some(primary) = &outcome.report.outputs.primary {
                eprintln!("    Packaged {}", primary.display());
            }
        }
    }

    if let Some(store) = &outcome.providers {
        let out = out.unwrap_or_else(|| target.outputs().intermediate_dir.join("providers.json"));
        store.write(&out)?;
        tracing::debug!(path = %out.display(), "wrote provider store");
    }

    eprintln!(
        "    Finished {} in {:.2}s",
        target.label(),
        outcome.duration.as_secs_f64()
    );
    Ok(())
}

fn cmd_inspect(path: &Path) -> CliResult {
    let store = ProviderStore::read(path)?;
    println!("{}", store.label());
    for kind in store.kinds() {
        let Some(provider) = store.get_any(kind) else {
            continue;
        };
        let value = serde_json::to_string_pretty(provider)?;
        println!("  {kind} ({:?}): {value}", kind.merge_rule());
    }
    Ok(())
}

fn cmd_aggregate(entry: &str, output: &Path, archives: &[PathBuf]) -> CliResult {
    let inputs: Vec<TarSource> = archives.iter().map(TarSource::new).collect();
    let outcome = tessel_engine::aggregate(&inputs, entry, output)?;
    match outcome {
        tessel_engine::AggregateOutcome::Written { bytes, hits } => eprintln!(
            "    Aggregated `{entry}` from {hits} archive(s) into {} ({bytes} bytes)",
            output.display()
        ),
        tessel_engine::AggregateOutcome::RemovedStale => {
            eprintln!("    Removed stale {}", output.display());
        }
        tessel_engine::AggregateOutcome::Absent => {
            eprintln!("    No archive carries `{entry}`");
        }
    }
    Ok(())
}

/// Print structured diagnostics to stderr; raw compiler output too when
/// `verbose`.
fn print_diagnostics(report: &ActionReport, verbose: bool) {
    let Some(result) = &report.compilation else {
        return;
    };
    for diag in &result.diagnostics {
        let prefix = match diag.level {
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Info => "info",
        };
        match (&diag.file, diag.line) {
            (Some(file), Some(line)) => eprintln!("{prefix}: {file}:{line}: {}", diag.message),
            _ => eprintln!("{prefix}: {}", diag.message),
        }
    }

    if verbose {
        if !result.raw_stdout.is_empty() {
            eprintln!("{}", result.raw_stdout);
        }
        if !result.raw_stderr.is_empty() {
            eprintln!("{}", result.raw_stderr);
        }
    }
}
