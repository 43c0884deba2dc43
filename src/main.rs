//! AutoTeam - Main Entry Point
//!
//! Serves the pipeline over HTTP, or runs a single job from the command line.

use autoteam::config::AppConfig;
use autoteam::llm::{check_provider, create_provider};
use autoteam::observability::logging::{parse_spans_flag, LogFormat};
use autoteam::observability::{init_default_logging, init_logging};
use autoteam::pipeline::{JobRequest, PipelineEngine, StageGraph, StageInput};
use autoteam::{ApiServer, AutoTeamResult};
use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tracing::{error, info, Level};

/// Multi-agent product team pipeline
#[derive(Parser)]
#[command(name = "autoteam")]
#[command(about = "Multi-agent LLM pipeline that turns an idea into a plan and code")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "AUTOTEAM_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one job to completion and print every stage's output
    Run {
        /// The idea to work on
        #[arg(long)]
        prompt: String,
        /// Project title
        #[arg(long)]
        title: Option<String>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
        /// Build the configured provider and check that it responds
        #[arg(long)]
        check: bool,
    },
    /// Print the stage graph
    Graph,
}

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["autoteam.toml", "config/autoteam.toml"];

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_observability(cli.verbose);

    info!("Starting AutoTeam v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve { port } => serve(config, port).await,
        Commands::Run { prompt, title } => run_once(config, prompt, title).await,
        Commands::Config { show, check } => handle_config_command(&config, show, check).await,
        Commands::Graph => print_graph(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn init_observability(verbose: u8) {
    let level = match verbose {
        0 => return init_default_logging(),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default());
    let spans = parse_spans_flag(&std::env::var("LOG_SPANS").unwrap_or_default());
    init_logging(level, format, spans);
}

fn load_configuration(config_path: Option<&Path>) -> AutoTeamResult<AppConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(AppConfig::load_from_file(path)?);
    }

    for candidate in DEFAULT_CONFIG_PATHS {
        let path = Path::new(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(AppConfig::load_from_file(path)?);
        }
    }

    info!("No configuration file found, using defaults");
    Ok(AppConfig::default())
}

async fn serve(config: AppConfig, port: Option<u16>) -> AutoTeamResult<()> {
    let engine = PipelineEngine::from_config(&config)?;
    let host: IpAddr = config.server.host.parse().map_err(|e| {
        autoteam::AutoTeamError::invalid_input(format!(
            "invalid server host '{}': {e}",
            config.server.host
        ))
    })?;
    let addr = SocketAddr::new(host, port.unwrap_or(config.server.port));

    info!(
        provider = config.llm.provider.as_str(),
        model = %config.llm.model_name(),
        "pipeline ready"
    );

    ApiServer::new(engine).serve(addr, shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}

async fn run_once(config: AppConfig, prompt: String, title: Option<String>) -> AutoTeamResult<()> {
    let engine = PipelineEngine::from_config(&config)?;
    let mut request = JobRequest::new(prompt);
    request.title = title;

    let job = engine.create_job(&request).await?;
    info!(job_id = %job.id, "running job");
    let outcome = engine.run_job(&job).await;

    for result in &outcome.results {
        println!("===== {} =====", result.stage);
        println!("{}\n", result.content);
    }

    if outcome.is_success() {
        println!("Job {} completed ({} stages)", job.id, outcome.results.len());
        Ok(())
    } else {
        Err(autoteam::AutoTeamError::stage_failed(
            outcome_stage(&outcome.status),
            format!("job {} did not complete", job.id),
        ))
    }
}

fn outcome_stage(status: &autoteam::JobStatus) -> String {
    match status {
        autoteam::JobStatus::Failed {
            stage: Some(stage), ..
        } => stage.clone(),
        _ => "pipeline".to_string(),
    }
}

async fn handle_config_command(
    config: &AppConfig,
    show: bool,
    check: bool,
) -> AutoTeamResult<()> {
    if show {
        let rendered = toml::to_string_pretty(config)
            .map_err(|e| autoteam::AutoTeamError::internal_error(e.to_string()))?;
        println!("Current configuration:");
        println!("{rendered}");
    }

    if check {
        let provider = create_provider(&config.llm)?;
        let report = check_provider(provider.as_ref(), &config.llm).await?;
        println!(
            "Provider {} is reachable (model {}{})",
            report.provider,
            report.model,
            if report.model_listed { "" } else { ", not in the known model list" }
        );
    }

    info!("Configuration validation complete");
    Ok(())
}

fn print_graph(config: &AppConfig) -> AutoTeamResult<()> {
    let graph = StageGraph::reference().with_system_overrides(config.role_overrides());
    for (index, stage) in graph.stages().iter().enumerate() {
        let inputs: Vec<&str> = stage
            .inputs
            .iter()
            .map(|input| match input {
                StageInput::Prompt => "prompt",
                StageInput::Stage(name) => name.as_str(),
            })
            .collect();
        println!(
            "{:>2}. {} [{}] <- {}",
            index + 1,
            stage.name,
            stage.role.key(),
            inputs.join(" + ")
        );
    }
    Ok(())
}
