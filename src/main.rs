//! CLI entry point for the recall pipeline.

use clap::{Parser, Subcommand};
use recall_pipeline::orchestrator::{Orchestrator, OrchestratorOptions};
use recall_pipeline::services::analyzers::{NoteAnalyzer, TaskAnalyzer};
use recall_pipeline::services::catalog::ProjectCatalog;
use recall_pipeline::services::parser::ContentParser;
use recall_pipeline::services::pipeline::{PipelineRunOptions, TranscriptPipeline};
use recall_pipeline::services::record_store::HttpRecordStore;
use recall_pipeline::services::resource_monitor::ResourceMonitor;
use recall_pipeline::services::router::Router;
use recall_pipeline::services::transcription::build_backend_chain;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "recall-pipeline", version, about = "Ingest, transcribe, classify and route voice recordings")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full five-stage orchestrator over the USB backlog.
    Orchestrate {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        verbose: bool,
        /// Comma-separated stage names to skip, e.g. "s1,s2".
        #[arg(long, value_delimiter = ',')]
        skip_steps: Vec<String>,
        #[arg(long)]
        min_duration: Option<f64>,
        #[arg(long)]
        max_duration: Option<f64>,
        #[arg(long)]
        no_duration_filter: bool,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run the transcript pipeline standalone, bypassing the orchestrator.
    Process {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        verbose: bool,
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        input_dir: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config_dir, verbose) = match &cli.command {
        Command::Orchestrate { config, verbose, .. } => (config.clone(), *verbose),
        Command::Process { config, verbose, .. } => (config.clone(), *verbose),
    };
    let log_level = if verbose { "debug" } else { "info" };
    let config_dir_str = config_dir.as_ref().map(|p| p.to_string_lossy().into_owned());

    if let Err(e) = recall_pipeline::init(config_dir_str.as_deref(), Some(log_level)) {
        eprintln!("fatal: failed to initialize: {e}");
        return ExitCode::from(2);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("fatal: failed to start async runtime: {e}");
            return ExitCode::from(2);
        }
    };

    let code = runtime.block_on(run(cli.command));
    let _ = recall_pipeline::cleanup();
    code
}

async fn run(command: Command) -> ExitCode {
    let config = recall_pipeline::get_config();

    match command {
        Command::Orchestrate {
            dry_run,
            skip_steps,
            min_duration,
            max_duration,
            no_duration_filter,
            ..
        } => {
            let catalog = Arc::new(ProjectCatalog::new(config));
            let parser = ContentParser::new(config);
            let llm_client = recall_pipeline::services::analyzers::build_llm_client(config);
            let task_analyzer = TaskAnalyzer::new(llm_client.clone(), config);
            let note_analyzer = NoteAnalyzer::new(llm_client, config);
            let router = Router::new(config, catalog.clone());
            let record_store = Arc::new(HttpRecordStore::new(config));
            let pipeline = TranscriptPipeline::new(
                parser,
                task_analyzer,
                note_analyzer,
                router,
                record_store.clone(),
            );
            let transcription = build_backend_chain(config);
            let resource_monitor = ResourceMonitor::new(config);

            let mut orchestrator = Orchestrator::new(
                config,
                pipeline,
                transcription,
                resource_monitor,
                record_store,
            );

            let cancel = orchestrator.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("received interrupt, finishing in-flight file then stopping...");
                    cancel.store(true, std::sync::atomic::Ordering::SeqCst);
                }
            });

            let options = OrchestratorOptions {
                dry_run,
                skip_steps: skip_steps.into_iter().collect(),
                min_duration_secs: min_duration,
                max_duration_secs: max_duration,
                duration_filter_enabled: !no_duration_filter,
            };

            match orchestrator.run(options).await {
                Ok(summary) => {
                    summary.print_report();
                    if !summary.retained.is_empty() {
                        ExitCode::from(1)
                    } else {
                        ExitCode::from(0)
                    }
                }
                Err(e) if matches!(e, recall_pipeline::PipelineError::Orchestrator(
                    recall_pipeline::core::error::OrchestratorError::UserAborted
                )) => {
                    eprintln!("run aborted: {e}");
                    ExitCode::from(3)
                }
                Err(e) => {
                    eprintln!("fatal: {e}");
                    ExitCode::from(2)
                }
            }
        }
        Command::Process {
            dry_run,
            file,
            input_dir,
            output_dir,
            ..
        } => {
            let catalog = Arc::new(ProjectCatalog::new(config));
            let parser = ContentParser::new(config);
            let llm_client = recall_pipeline::services::analyzers::build_llm_client(config);
            let task_analyzer = TaskAnalyzer::new(llm_client.clone(), config);
            let note_analyzer = NoteAnalyzer::new(llm_client, config);
            let router = Router::new(config, catalog);
            let record_store = Arc::new(HttpRecordStore::new(config));
            let pipeline = TranscriptPipeline::new(
                parser,
                task_analyzer,
                note_analyzer,
                router,
                record_store,
            );

            let options = PipelineRunOptions {
                dry_run,
                file,
                input_dir,
                output_dir,
            };

            match pipeline.run(options).await {
                Ok(summary) => {
                    println!(
                        "processed {} ok, {} failed",
                        summary.ok, summary.failed
                    );
                    if summary.failed > 0 {
                        ExitCode::from(1)
                    } else {
                        ExitCode::from(0)
                    }
                }
                Err(e) => {
                    eprintln!("fatal: {e}");
                    ExitCode::from(2)
                }
            }
        }
    }
}
