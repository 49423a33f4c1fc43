use agent_telemetry::backend::{BackendConnector, HttpConnector, InMemoryBackend, StaticConnector};
use agent_telemetry::models::TraceContext;
use agent_telemetry::{TelemetryConfig, TelemetryPipeline};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MASK: &str = "********";

#[derive(Parser)]
#[command(name = "agent-telemetry")]
#[command(about = "Telemetry pipeline for AI-agent executions", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to $AGENT_TELEMETRY_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration with secrets masked
    CheckConfig,

    /// Run a backend health check
    Health,

    /// Trace a synthetic unit of work end to end
    EmitTestTrace {
        /// Make the unit of work fail
        #[arg(long)]
        fail: bool,

        /// Deliver to an in-memory backend instead of the configured one
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, thiserror::Error)]
#[error("synthetic failure: {0}")]
struct SyntheticError(String);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TelemetryConfig::load_from(path),
        None => TelemetryConfig::load(),
    }
    .context("Failed to load configuration")?;

    init_logging(&config);

    match cli.command {
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&masked(&config))?);
            if !config.backend.is_configured() {
                eprintln!("note: backend is not configured; delivery is disabled");
            }
        }

        Commands::Health => {
            let pipeline = TelemetryPipeline::start(config)?;
            let status = pipeline.client().health_check().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
            pipeline.shutdown().await?;
            if !status.healthy {
                std::process::exit(1);
            }
        }

        Commands::EmitTestTrace { fail, dry_run } => {
            let (config, connector, memory) = if dry_run {
                let memory = Arc::new(InMemoryBackend::new());
                let mut config = config;
                config.backend.endpoint = Some("memory://dry-run".to_string());
                config.backend.public_key = Some("dry-run".to_string());
                config.backend.secret_key = Some("dry-run".to_string());
                let connector: Arc<dyn BackendConnector> =
                    Arc::new(StaticConnector::new(memory.clone()));
                (config, connector, Some(memory))
            } else {
                let connector: Arc<dyn BackendConnector> = Arc::new(HttpConnector);
                (config, connector, None)
            };

            let pipeline = TelemetryPipeline::with_connector(config, connector)?;
            let context = TraceContext::new()
                .with_session("cli")
                .with_metadata("source", "emit-test-trace");
            let trace_id = context.trace_id.clone();
            let input = json!({
                "query": "synthetic",
                "api_key": "not-a-real-key",
            });

            let result = pipeline
                .tracer()
                .trace_tool("synthetic_tool", context, &input, |_ctx| async move {
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    if fail {
                        Err(SyntheticError("requested with --fail".to_string()))
                    } else {
                        Ok(json!({"answer": 42}))
                    }
                })
                .await;

            let report = pipeline.shutdown().await?;
            let analysis = pipeline.error_store().analyze(None);
            let outcome = match &result {
                Ok(value) => value.clone(),
                Err(e) => json!({ "error": e.to_string() }),
            };
            let backend_calls = memory.map(|m| m.call_count());

            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "trace_id": trace_id,
                    "result": outcome,
                    "flush": report,
                    "errors": analysis,
                    "backend_calls": backend_calls,
                }))?
            );
        }
    }

    Ok(())
}

fn init_logging(config: &TelemetryConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("agent_telemetry={}", config.observability.log_level).into());

    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn masked(config: &TelemetryConfig) -> TelemetryConfig {
    let mut config = config.clone();
    if config.backend.secret_key.is_some() {
        config.backend.secret_key = Some(MASK.to_string());
    }
    if let Some(key) = config.backend.public_key.as_mut() {
        let visible: String = key.chars().take(4).collect();
        *key = format!("{}{}", visible, MASK);
    }
    config
}
