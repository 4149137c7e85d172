use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use robotmaestro::backend::{ExecutionBackend, HttpBackend};
use robotmaestro::config::{AppConfig, LoggingConfig};
use robotmaestro::execution::{parse_requirements, BackendJob, JobLifecycle, JobOutcome, RunConfig};
use robotmaestro::logparse::{self, render};

#[derive(Parser)]
#[command(
    name = "robotmaestro",
    about = "Drive Robot Framework runs on a remote execution backend",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to $ROBOTMAESTRO_CONFIG, then ./robotmaestro.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// Bind address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Start a test run and follow it to completion
    Run {
        #[command(subcommand)]
        mode: RunMode,

        /// Print the execution tree when the run finishes
        #[arg(long, global = true)]
        tree: bool,
    },

    /// Ask the backend to cancel whatever it is running
    Stop,

    /// Install Python packages on the backend and follow the install
    Install {
        /// Package to install (repeatable)
        #[arg(long = "package", short = 'p')]
        packages: Vec<String>,

        /// Read package names from a requirements.txt file
        #[arg(long, conflicts_with = "packages")]
        requirements: Option<PathBuf>,
    },

    /// Inspect and manage run history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Rebuild the execution tree of a saved console log
    Parse {
        /// Log file, one runner line per line
        file: PathBuf,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RunMode {
    /// Run tests matching tags
    Tags {
        /// Tags to include
        #[arg(long)]
        include: String,

        /// Tags to exclude
        #[arg(long, default_value = "")]
        exclude: String,
    },

    /// Run one suite
    Suite { name: String },

    /// Run one test case
    Test { name: String },

    /// Data-driven run over a JSON table `{"headers": [...], "rows": [[...]]}`
    Orchestrator { table: PathBuf },

    /// Run every test
    All,
}

#[derive(Subcommand)]
enum HistoryAction {
    /// List recorded runs, oldest first
    List {
        /// Only the latest N runs, newest first
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show one run
    Show {
        id: String,

        /// Print the execution tree instead of the raw log
        #[arg(long)]
        tree: bool,
    },

    /// Remove a run and its artifacts
    Remove { id: String },

    /// Pass rate and average duration
    Stats,

    /// Write all runs to a JSON file
    Export { path: PathBuf },

    /// Append runs from a JSON file written by `export`
    Import { path: PathBuf },
}

#[derive(Deserialize)]
struct OrchestratorTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_or_default(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            tracing::info!(%bind, "Starting robotmaestro server");
            robotmaestro::serve(&config, &bind).await?;
        }
        Commands::Run { mode, tree } => {
            let run_config = run_config(mode)?;
            let state = robotmaestro::open(&config)?;
            let outcome = follow(&state.runs, run_config).await?;

            if tree {
                let record = match &outcome.record_id {
                    Some(id) => state.history.get(id).await,
                    None => None,
                };
                match record {
                    Some(record) => print!("\n{}", render::render(&record.tree())),
                    None => println!("\n(no log recorded)"),
                }
            }
            if let Some(id) = &outcome.record_id {
                println!("Recorded as {}", id);
            }
            if outcome.state != robotmaestro::execution::JobState::Success {
                anyhow::bail!("run finished {}", outcome.state);
            }
        }
        Commands::Stop => {
            let backend =
                HttpBackend::new(&config.backend.url, config.backend.request_timeout())?;
            let message = backend.stop().await?;
            println!("{}", message);
        }
        Commands::Install {
            packages,
            requirements,
        } => {
            let packages = match requirements {
                Some(path) => parse_requirements(&read(&path)?),
                None => packages,
            };
            if packages.is_empty() {
                anyhow::bail!("nothing to install: pass --package or --requirements");
            }
            let state = robotmaestro::open(&config)?;
            let outcome = follow(&state.installs, packages).await?;
            if outcome.state != robotmaestro::execution::JobState::Success {
                anyhow::bail!("install finished {}", outcome.state);
            }
        }
        Commands::History { action } => {
            let state = robotmaestro::open(&config)?;
            let history = &state.history;

            match action {
                HistoryAction::List { limit } => {
                    let records = match limit {
                        Some(n) => history.recent(n).await,
                        None => history.list().await,
                    };
                    if records.is_empty() {
                        println!("No runs recorded.");
                    } else {
                        println!(
                            "{:<36} | {:<25} | {:<8} | {:>9} | {:>4} | {:>4} | Date",
                            "Id", "Suite", "Status", "Duration", "Pass", "Fail"
                        );
                        println!(
                            "{:-<36}-|-{:-<25}-|-{:-<8}-|-{:-<9}-|-{:-<4}-|-{:-<4}-|-{:-<25}",
                            "", "", "", "", "", "", ""
                        );
                        for r in records {
                            println!(
                                "{:<36} | {:<25} | {:<8} | {:>8.2}s | {:>4} | {:>4} | {}",
                                r.id,
                                r.suite,
                                r.status.to_string(),
                                r.duration_secs,
                                r.pass_count,
                                r.fail_count,
                                r.started_at.format("%Y-%m-%d %H:%M:%S")
                            );
                        }
                    }
                }
                HistoryAction::Show { id, tree } => {
                    let record = history
                        .get(&id)
                        .await
                        .with_context(|| format!("no run with id {}", id))?;
                    println!("Suite:    {}", record.suite);
                    println!("Status:   {}", record.status);
                    println!("Date:     {}", record.started_at.to_rfc3339());
                    println!("Duration: {:.2}s", record.duration_secs);
                    println!("Pass:     {}", record.pass_count);
                    println!("Fail:     {}", record.fail_count);
                    for artifact in record.artifacts() {
                        println!("Artifact: {}", artifact);
                    }
                    println!();
                    if tree {
                        print!("{}", render::render(&record.tree()));
                    } else {
                        for line in &record.raw_logs {
                            println!("{}", line);
                        }
                    }
                }
                HistoryAction::Remove { id } => {
                    let report = history.remove(&id).await?;
                    if !report.removed {
                        anyhow::bail!("no run with id {}", id);
                    }
                    println!("Run '{}' removed.", id);
                    for warning in report.artifact_warnings {
                        println!("warning: {}", warning);
                    }
                }
                HistoryAction::Stats => {
                    let stats = history.stats().await;
                    println!("Total runs:   {}", stats.total_runs);
                    println!("Passed runs:  {}", stats.passed_runs);
                    println!("Pass rate:    {:.1}%", stats.pass_rate);
                    println!("Avg duration: {:.2}s", stats.avg_duration_secs);
                }
                HistoryAction::Export { path } => {
                    let count = history.export_json(&path).await?;
                    println!("Exported {} runs to {}", count, path.display());
                }
                HistoryAction::Import { path } => {
                    let count = history.import_json(&path).await?;
                    println!("Imported {} runs from {}", count, path.display());
                }
            }
        }
        Commands::Parse { file, json } => {
            let text = read(&file)?;
            let lines: Vec<&str> = text.lines().collect();
            let tree = logparse::build(&lines);
            if json {
                println!("{}", serde_json::to_string_pretty(&tree)?);
            } else {
                print!("{}", render::render(&tree));
                let (pass, fail) = render::tally(&tree);
                println!("\n{} entries, {} passed, {} failed", tree.len(), pass, fail);
            }
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn run_config(mode: RunMode) -> Result<RunConfig> {
    Ok(match mode {
        RunMode::Tags { include, exclude } => RunConfig::ByTag {
            include_tags: include,
            exclude_tags: exclude,
        },
        RunMode::Suite { name } => RunConfig::BySuite { suite: name },
        RunMode::Test { name } => RunConfig::ByTestCase { testcase: name },
        RunMode::Orchestrator { table } => {
            let table: OrchestratorTable = serde_json::from_str(&read(&table)?)
                .with_context(|| format!("invalid orchestrator table {}", table.display()))?;
            RunConfig::Orchestrator {
                headers: table.headers,
                rows: table.rows,
            }
        }
        RunMode::All => RunConfig::All,
    })
}

/// Start a job and stream its log to stdout until it finishes.
///
/// The first Ctrl-C asks the backend to stop; the job still runs until the
/// backend reports a terminal status.
async fn follow<J: BackendJob>(lifecycle: &JobLifecycle<J>, params: J::Params) -> Result<JobOutcome> {
    let handle = lifecycle.start(params).await?;
    println!("Started {}: {}", handle.job, handle.label);

    let mut logs = lifecycle.watch_logs();
    let mut printed = 0;
    let mut stop_sent = false;
    let wait = handle.wait();
    tokio::pin!(wait);

    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome?,
            Ok(()) = logs.changed() => {
                let state = logs.borrow_and_update();
                // The backend resends the whole log; a shorter one means it restarted.
                if state.logs.len() < printed {
                    printed = 0;
                }
                for line in &state.logs[printed..] {
                    println!("{}", line);
                }
                printed = state.logs.len();
            }
            _ = tokio::signal::ctrl_c(), if !stop_sent => {
                stop_sent = true;
                eprintln!("Stop requested, waiting for the backend to finish...");
                if let Err(e) = lifecycle.stop().await {
                    tracing::warn!(error = %e, "stop request failed");
                }
            }
        }
    };

    println!(
        "\nFinished: {} in {:.2}s ({} passed, {} failed)",
        outcome.state, outcome.duration_secs, outcome.pass_count, outcome.fail_count
    );
    if let Some(error) = &outcome.error {
        println!("Error: {}", error);
    }
    Ok(outcome)
}
