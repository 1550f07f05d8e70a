mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{PressroomConfig, API_KEY_ENV};
use pressroom_agents::{DocumentExtractor, StepExecutor};
use pressroom_cache::ResultCache;
use pressroom_gateway::{ModelGateway, OpenAiCompatBackend};
use pressroom_metrics::{JsonFileSink, MetricsExporter, MetricsRegistry, TracingSink};
use pressroom_orchestrator::{
    standard_pipeline, DirectoryScanner, DocumentSource, JsonReportStore, Orchestrator,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pressroom", about = "Pressroom: documents in, publications out")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "pressroom.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every document of the input directory
    Run {
        /// Input directory (overrides config)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Output directory (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Documents processed at the same time (overrides config)
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Print the effective configuration
    Config,
    /// Print the summary of the latest run
    Report {
        /// Output directory (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);
    dotenvy::dotenv().ok();

    let mut config = PressroomConfig::load(&cli.config).await?;
    config.apply_api_key(std::env::var(API_KEY_ENV).ok());

    match cli.command {
        Commands::Run {
            input,
            output,
            concurrency,
        } => {
            if let Some(input) = input {
                config.paths.input_dir = input;
            }
            if let Some(output) = output {
                config.paths.output_dir = output;
            }
            if let Some(concurrency) = concurrency {
                config.engine.max_concurrent_jobs = concurrency;
            }
            config.validate()?;
            run(config).await
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Report { output } => {
            let output = output.unwrap_or(config.paths.output_dir);
            match JsonReportStore::new(output).load_latest().await? {
                Some(report) => print!("{}", report.to_markdown()),
                None => println!("No run report found."),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config: PressroomConfig) -> anyhow::Result<ExitCode> {
    let metrics = Arc::new(MetricsRegistry::new());
    let cancel = CancellationToken::new();

    let exporter = MetricsExporter::new(metrics.clone(), config.engine.metrics_export_interval())
        .with_sink(Arc::new(JsonFileSink::new(config.paths.metrics_dir())))
        .with_sink(Arc::new(TracingSink));
    let exporter_stop = CancellationToken::new();
    let exporter_handle = exporter.spawn(exporter_stop.clone());

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, finishing current steps");
                cancel.cancel();
            }
        });
    }

    let cache = Arc::new(ResultCache::from_config(&config.engine, metrics.clone()));
    let snapshot_path = config.paths.cache_snapshot();
    if config.paths.persist_cache && snapshot_path.exists() {
        match cache.load_snapshot(&snapshot_path).await {
            Ok(loaded) => info!(loaded, "Cache restored"),
            Err(e) => warn!(error = %e, "Ignoring unreadable cache snapshot"),
        }
    }

    let backend = Arc::new(OpenAiCompatBackend::new(config.model.clone()));
    let gateway = Arc::new(ModelGateway::from_config(
        backend,
        &config.engine,
        metrics.clone(),
    ));
    let pipeline = standard_pipeline(gateway, Arc::new(DocumentExtractor::default()))?;
    let executor = Arc::new(StepExecutor::new(
        cache.clone(),
        config.engine.cache_ttl(),
        metrics.clone(),
    ));
    let orchestrator = Orchestrator::from_config(
        pipeline,
        executor,
        config.model.params(),
        &config.engine,
        metrics.clone(),
    )
    .with_report_sink(Arc::new(JsonReportStore::new(&config.paths.output_dir)));

    let documents = DirectoryScanner::new(&config.paths.input_dir)
        .documents()
        .await?;
    if documents.is_empty() {
        warn!(input = %config.paths.input_dir.display(), "No documents to process");
    }

    let outcome = orchestrator
        .run(documents, cancel)
        .await
        .context("run could not be completed")?;

    if config.paths.persist_cache {
        if let Err(e) = cache.save_snapshot(&snapshot_path).await {
            warn!(error = %e, "Cache snapshot not saved");
        }
    }

    exporter_stop.cancel();
    if let Err(e) = exporter_handle.await {
        warn!(error = %e, "Metrics exporter did not stop cleanly");
    }

    let report = &outcome.report;
    println!(
        "Run {}: {} succeeded, {} partial, {} failed, {} not started",
        report.run_id,
        report.succeeded,
        report.partial,
        report.failed,
        report.not_started.len()
    );
    for step in &report.next_steps {
        println!("  - {step}");
    }

    if report.has_failures() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
