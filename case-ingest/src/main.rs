use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use case_ingest::case::{CaseEventBus, ContentProvider, FilesystemCase};
use case_ingest::config::IngestConfig;
use case_ingest::enrichment::EnrichmentPool;
use case_ingest::ingest::{
    ExecuteCommandModule, HashCalculationModule, IngestEvent, IngestJobOptions,
    IngestJobScheduler, ModuleRegistry, ModuleSelection, register_builtin_modules,
};
use case_ingest::logging;
use case_ingest::node::{DisplayPreferences, FileNode, NodeServices};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "case-ingest", version, about = "Ingest local directories as forensic data sources")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true, env = "CASE_INGEST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest one or more directories and print the final job snapshot.
    Run {
        /// Directories to ingest, one data source each.
        #[arg(required = true)]
        dirs: Vec<PathBuf>,

        /// Shell command to run per file ({path}, {name}, {id}, {data_source}).
        #[arg(long)]
        exec: Option<String>,

        /// Time budget of the exec command, in seconds.
        #[arg(long, requires = "exec")]
        exec_timeout: Option<u64>,

        /// Do not hash files.
        #[arg(long)]
        no_hash: bool,

        /// Do not run the data source summary.
        #[arg(long)]
        no_summary: bool,

        /// Files ingested concurrently; overrides the configuration.
        #[arg(short, long)]
        workers: Option<usize>,

        /// Default time budget for external processes, in seconds.
        #[arg(long)]
        max_process_secs: Option<u64>,

        #[arg(long)]
        skip_unallocated: bool,

        /// Print ingest events as JSON lines while running.
        #[arg(long)]
        events: bool,
    },

    /// List the available ingest modules.
    Modules,

    /// Show the enriched property sheet of every file in a directory.
    Inspect {
        dir: PathBuf,

        /// Show translated names when available.
        #[arg(long)]
        translated_names: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = IngestConfig::load(args.config.as_deref())?;
    let (logging, _guard) = logging::init_logging(&config.log_filter, config.log_dir.as_deref())?;
    config.apply_process_defaults();
    debug!(filter = %logging.get_filter(), "Logging initialized");

    match args.command {
        Commands::Run {
            dirs,
            exec,
            exec_timeout,
            no_hash,
            no_summary,
            workers,
            max_process_secs,
            skip_unallocated,
            events,
        } => {
            let mut config = config;
            if let Some(workers) = workers {
                config.file_workers = workers;
            }

            let case = Arc::new(FilesystemCase::new());
            let data_sources = dirs
                .iter()
                .map(|dir| {
                    case.add_directory(dir)
                        .with_context(|| format!("Failed to add data source {}", dir.display()))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;

            let registry = Arc::new(ModuleRegistry::new());
            register_builtin_modules(&registry, case.clone())?;

            let mut selection = ModuleSelection::new();
            if !no_summary {
                selection = selection.with_data_source_module("summary");
            }
            if !no_hash {
                selection = selection.with_file_module(HashCalculationModule::NAME);
            }
            if let Some(command) = exec {
                registry.configure(
                    ExecuteCommandModule::NAME,
                    serde_json::json!({ "command": command, "timeout_secs": exec_timeout }),
                )?;
                selection = selection.with_file_module(ExecuteCommandModule::NAME);
            }
            if selection.is_empty() {
                bail!("nothing to run: every module is disabled");
            }

            let scheduler = IngestJobScheduler::new(config.scheduler_config(), registry, case);
            let mut event_rx = scheduler.subscribe();
            let job_id = scheduler.submit(
                data_sources,
                selection,
                IngestJobOptions {
                    skip_unallocated_space: skip_unallocated,
                    keep_search_index: false,
                    max_process_run_time_secs: max_process_secs,
                },
            )?;
            info!(job_id = %job_id, "Ingest started, press Ctrl-C to cancel");

            if events {
                tokio::spawn(async move {
                    while let Ok(event) = event_rx.recv().await {
                        if let Ok(line) = serde_json::to_string(&event) {
                            println!("{line}");
                        }
                        if matches!(event, IngestEvent::JobCompleted { .. }) {
                            break;
                        }
                    }
                });
            }

            let snapshot = tokio::select! {
                snapshot = scheduler.wait_for(&job_id) => snapshot?,
                _ = tokio::signal::ctrl_c() => {
                    warn!(job_id = %job_id, "Interrupted, cancelling ingest job");
                    scheduler.cancel(&job_id)?;
                    scheduler.wait_for(&job_id).await?
                }
            };
            scheduler.shutdown().await;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }

        Commands::Modules => {
            let case = Arc::new(FilesystemCase::new());
            let registry = ModuleRegistry::new();
            register_builtin_modules(&registry, case)?;
            for module in registry.enumerate() {
                println!(
                    "{:<10} {:<18} {}",
                    module.name,
                    module.granularity.to_string(),
                    module.description
                );
            }
        }

        Commands::Inspect {
            dir,
            translated_names,
        } => {
            let case = Arc::new(FilesystemCase::new());
            let data_source = case
                .add_directory(&dir)
                .with_context(|| format!("Failed to add data source {}", dir.display()))?;

            let mut display = config.display;
            display.display_translated_names |= translated_names;
            let prefs = Arc::new(DisplayPreferences::from_config(display));
            let provider: Arc<dyn ContentProvider> = case;
            let pool = Arc::new(EnrichmentPool::new(
                config.enrichment_config(),
                Arc::clone(&provider),
                Arc::clone(&prefs),
            ));
            let services = NodeServices {
                provider: Arc::clone(&provider),
                pool: Arc::clone(&pool),
                bus: Arc::new(CaseEventBus::new()),
                prefs,
            };

            let nodes: Vec<_> = provider
                .data_source_files(&data_source)?
                .into_iter()
                .map(|content| FileNode::new(content, services.clone()))
                .collect();

            tokio::time::timeout(Duration::from_secs(60), async {
                loop {
                    let stats = pool.stats();
                    if stats.queued == 0 && stats.in_flight == 0 {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            })
            .await
            .context("Timed out waiting for enrichment")?;

            let sheets: Vec<_> = nodes
                .iter()
                .map(|node| {
                    node.sheet()
                        .snapshot()
                        .into_iter()
                        .map(|p| (p.name().to_string(), p.value().to_string().into()))
                        .collect::<serde_json::Map<String, serde_json::Value>>()
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&sheets)?);
            pool.shutdown().await;
        }
    }

    Ok(())
}
