use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use genie_core::{RunOptions, check_all, generate_all};
use genie_module::ModuleRegistry;
use genie_types::{Event, EventSink, FileStatus, RunEvent, RunSummary, SharedSink};
use genie_validate::{ValidationOptions, run_validation};

#[derive(Parser, Debug)]
#[command(name = "genie", version)]
#[command(about = "Workspace code generation: <target>.genie.ts in, deterministic targets out")]
struct Cli {
    /// Working directory the run is scoped to.
    #[arg(long, default_value = ".")]
    cwd: PathBuf,

    /// Restrict the run to specific generator sources (repeatable).
    #[arg(long = "source")]
    sources: Vec<PathBuf>,

    /// Explicit formatter config path (overrides .oxfmtrc.json / oxfmt.json).
    #[arg(long)]
    formatter_config: Option<PathBuf>,

    /// Append run events as JSONL to this file.
    #[arg(long)]
    events_file: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate every out-of-date target (default mode of operation).
    Generate {
        /// Report what would change without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Generated files end up read-only (mode 0444).
        #[arg(long)]
        read_only: bool,
    },
    /// Verify every target is up to date, without mutating anything.
    Check {
        /// Worker bound (defaults to min(hw parallelism, 12)).
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Print discovered generator sources and their targets.
    List,
    /// Run workspace validation standalone.
    Validate,
}

/// Renders events to stderr and optionally appends them to a JSONL file.
struct CliSink {
    events_file: Option<std::fs::File>,
}

impl CliSink {
    fn new(events_path: Option<&PathBuf>) -> Result<Self> {
        let events_file = match events_path {
            Some(path) => Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("failed to open events file {}", path.display()))?,
            ),
            None => None,
        };
        Ok(Self { events_file })
    }
}

impl EventSink for CliSink {
    fn emit(&mut self, event: Event) {
        match &event {
            Event::FilesDiscovered { count } => {
                eprintln!("[genie] {count} generator source(s)");
            }
            Event::FileStarted { .. } => {}
            Event::FileCompleted {
                path,
                status,
                message,
            } => {
                let suffix = message
                    .as_deref()
                    .map(|m| format!(" {m}"))
                    .unwrap_or_default();
                let mark = match status {
                    FileStatus::Error => "!",
                    _ => " ",
                };
                eprintln!("[genie]{mark}{status} {}{suffix}", path.display());
            }
            Event::Complete { summary } => {
                eprintln!(
                    "[genie] done: {} created, {} updated, {} unchanged, {} skipped, {} failed",
                    summary.created,
                    summary.updated,
                    summary.unchanged,
                    summary.skipped,
                    summary.failed
                );
            }
            Event::Error { message } => {
                eprintln!("[genie] error: {message}");
            }
        }

        if let Some(file) = &mut self.events_file {
            if let Ok(line) = serde_json::to_string(&RunEvent::now(event)) {
                let _ = writeln!(file, "{line}");
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .canonicalize()
        .with_context(|| format!("invalid working directory {}", cli.cwd.display()))?;

    let config = genie_config::load_config(&cwd)?;

    let mut validation = ValidationOptions::from_env();
    validation.exclude = config.validate_exclude().to_vec();

    let mut opts = RunOptions::new(&cwd);
    opts.sources = (!cli.sources.is_empty()).then(|| cli.sources.clone());
    opts.formatter_config = cli
        .formatter_config
        .clone()
        .or_else(|| config.formatter_config().map(PathBuf::from));
    opts.validation = validation;

    let sink: SharedSink = Arc::new(Mutex::new(CliSink::new(cli.events_file.as_ref())?));

    let result: Result<RunSummary, genie_types::GenieError> = match cli.cmd {
        Commands::Generate { dry_run, read_only } => {
            opts.dry_run = dry_run;
            opts.read_only = read_only || config.read_only();
            generate_all(&opts, &sink)
        }
        Commands::Check { concurrency } => {
            opts.concurrency = concurrency;
            check_all(&opts, &sink)
        }
        Commands::List => return list_sources(&opts),
        Commands::Validate => return validate_standalone(&opts),
    };

    match result {
        Ok(_) => Ok(()),
        Err(_) => {
            // The sink already rendered the failure; the exit code carries it.
            std::process::exit(1);
        }
    }
}

fn list_sources(opts: &RunOptions) -> Result<()> {
    let mut sources = genie_discovery::discover_sources(&opts.cwd)?;
    sources.sort();
    for source in sources {
        let target = genie_paths::target_path(&source).unwrap_or_else(|| source.clone());
        println!(
            "{} -> {}",
            genie_paths::display_relative(&source, &opts.cwd),
            genie_paths::display_relative(&target, &opts.cwd)
        );
    }
    Ok(())
}

fn validate_standalone(opts: &RunOptions) -> Result<()> {
    let mut sources = genie_discovery::discover_sources(&opts.cwd)?;
    sources.sort();

    let registry = ModuleRegistry::new();
    match run_validation(
        &opts.cwd,
        &sources,
        &HashMap::new(),
        &registry,
        &opts.validation,
    ) {
        Ok(issues) => {
            for issue in &issues {
                eprintln!(
                    "[genie] {}[{}] {}: {}",
                    issue.severity, issue.rule, issue.package_name, issue.message
                );
            }
            eprintln!("[genie] validation passed");
            Ok(())
        }
        Err(error) => {
            eprintln!("[genie] {error}");
            std::process::exit(1);
        }
    }
}
