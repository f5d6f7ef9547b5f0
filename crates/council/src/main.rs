use std::io::Read;

use anyhow::{Context, Result};
use clap::Parser;
use council_models::config::LlmBackend;
use council_models::{AnalysisRequest, ResultStatus};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "council", about = "Multi-agent portfolio deliberation")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/council.toml")]
    config: String,

    /// Read AnalysisRequest JSON from a file instead of stdin
    #[arg(short, long)]
    input: Option<String>,

    /// Pretty-print the output JSON
    #[arg(long)]
    pretty: bool,

    /// Use templated agent output instead of the claude CLI
    #[arg(long)]
    offline: bool,

    /// Stream relay envelopes to stderr while the session runs
    #[arg(long)]
    observe: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respects RUST_LOG
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let mut config = council::load_config(&cli.config)?;
    if cli.offline {
        config.llm.backend = LlmBackend::Offline;
        config.llm.demo_mode = true;
    }

    let request_json = if let Some(input_path) = &cli.input {
        std::fs::read_to_string(input_path)
            .with_context(|| format!("Failed to read input: {input_path}"))?
    } else {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read from stdin")?;
        buf
    };
    let request: AnalysisRequest =
        serde_json::from_str(&request_json).context("Failed to parse AnalysisRequest JSON")?;

    let ctx = council::build_context(config).context("Failed to build context")?;

    let observer = cli
        .observe
        .then(|| council::spawn_observer(&ctx.relay, |line| eprintln!("{line}")));

    let orchestrator = council::build_orchestrator(&ctx);
    let result = council::analyze(&orchestrator, request)
        .await
        .map_err(|e| anyhow::anyhow!("Analysis failed: {}", e.public_message()))?;

    // Closing the relay lets the observer flush and exit on its own.
    drop(orchestrator);
    drop(ctx);
    if let Some(observer) = observer {
        council::finish_observer(observer).await;
    }

    let output = if cli.pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };
    println!("{output}");

    if result.status == ResultStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}
