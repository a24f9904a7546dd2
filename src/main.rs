use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadplan::config::{CompileStrategy, Config};
use cadplan::error::StageError;
use cadplan::models::DesignId;
use cadplan::pipeline::{BatchOptions, Pipeline};
use cadplan::api;
use cadplan_core::ExportFormat;

#[derive(Parser)]
#[command(name = "cadplan")]
#[command(about = "Turn part descriptions into parametric solids and meshes")]
struct Cli {
    /// Data directory (overrides CADPLAN_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// How plans are compiled into programs
    #[arg(long, global = true, value_enum)]
    strategy: Option<CompileStrategy>,

    /// Mesh format for new designs
    #[arg(long, global = true)]
    format: Option<ExportFormat>,

    /// Do not snapshot plans before refining
    #[arg(long, global = true)]
    no_snapshots: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a design from a description
    Create { description: String },
    /// Apply a change request to a design
    Refine { id: DesignId, request: String },
    /// Compile the current plan into a program
    Compile { id: DesignId },
    /// Re-run the stored program and write the mesh
    Export { id: DesignId },
    /// Show a design's plan, program and mesh
    Show { id: DesignId },
    /// List designs
    List,
    /// Snapshot the current plan
    Snapshot { id: DesignId },
    /// Build several designs; failures do not stop the batch
    Batch {
        /// Check plans and report paths without writing anything
        #[arg(long)]
        simulate: bool,

        #[arg(long)]
        limit: Option<usize>,

        /// Designs to build (default: all)
        ids: Vec<DesignId>,
    },
    /// Start the automation API server
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
}

/// Logs go to stderr; stdout carries command output only.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "cadplan=info,tower_http=info".into()),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::from_env()?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(strategy) = cli.strategy {
        config.compile_strategy = strategy;
    }
    if let Some(format) = cli.format {
        config.export_format = format;
    }
    if cli.no_snapshots {
        config.snapshots = false;
    }
    Ok(config)
}

/// Prints a result as JSON, or the error report and a non-zero exit.
fn emit<T: Serialize>(result: Result<T, StageError>) -> anyhow::Result<()> {
    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => {
            eprintln!("{}", serde_json::to_string_pretty(&err.report())?);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(&cli)?;
    let pipeline = Pipeline::open(config)?;

    match cli.command {
        Commands::Create { description } => emit(pipeline.create(&description).await),
        Commands::Refine { id, request } => emit(pipeline.refine(&id, &request).await),
        Commands::Compile { id } => emit(pipeline.compile(&id).await),
        Commands::Export { id } => emit(pipeline.export(&id).await),
        Commands::Show { id } => emit(pipeline.show(&id)),
        Commands::List => emit(pipeline.list()),
        Commands::Snapshot { id } => emit(pipeline.snapshot(&id)),
        Commands::Batch {
            simulate,
            limit,
            ids,
        } => {
            let options = BatchOptions { simulate, limit };
            let report = pipeline.run_batch(&ids, &options).await;
            let failed = report.as_ref().map(|r| r.failed().count()).unwrap_or(0);
            emit(report)?;
            if failed > 0 {
                std::process::exit(2);
            }
            Ok(())
        }
        Commands::Serve { port } => {
            tracing::info!("Starting cadplan server on port {}", port);

            let app = api::create_router(pipeline);

            let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
            tracing::info!("cadplan server listening on http://127.0.0.1:{}", port);

            axum::serve(listener, app).await?;
            Ok(())
        }
    }
}
