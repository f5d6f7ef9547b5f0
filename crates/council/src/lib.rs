//! Council - a deliberating panel of portfolio agents.
//!
//! A market analyst, a strategist, a risk manager, an executor and an
//! explainer take turns on a shared deliberation state until the risk
//! manager signs off on a rebalancing plan or the round limit is reached.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use council::models::{AnalysisRequest, CouncilConfig};
//!
//! # async fn run(request: AnalysisRequest) -> anyhow::Result<()> {
//! let ctx = council::build_context(CouncilConfig::default())?;
//! let orchestrator = council::build_orchestrator(&ctx);
//! let result = council::analyze(&orchestrator, request).await?;
//! println!("{}", result.message);
//! # Ok(())
//! # }
//! ```

pub use council_agents as agents;
pub use council_models as models;
pub use council_store as store;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use council_agents::{
    select_broker, select_llm, select_market_data, standard_agents, AgentError, AppContext,
    Orchestrator, WsRelay,
};
use council_models::{AnalysisRequest, AnalysisResult, CouncilConfig};
use council_store::RecordStore;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

/// Longest an observer may keep flushing after its session has ended.
const OBSERVER_DRAIN: Duration = Duration::from_secs(5);

/// Read and validate a TOML configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<CouncilConfig, anyhow::Error> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config: CouncilConfig = toml::from_str(&raw).context("Failed to parse config")?;
    config.validate().context("Invalid config")?;
    Ok(config)
}

/// Wire collaborators for `config`.
///
/// A store that cannot be opened degrades the session to running without
/// persistence, unless market data is read from it.
pub fn build_context(config: CouncilConfig) -> Result<AppContext, anyhow::Error> {
    config.validate().context("Invalid config")?;

    let store = match RecordStore::open(&config.store) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!(path = %config.store.sqlite_path, error = %e, "Record store unavailable, results will not be persisted");
            None
        }
    };

    let llm = select_llm(&config.llm);
    let market = select_market_data(&config.market_data, store.clone())
        .context("Failed to select market data source")?;
    let broker = select_broker(&config.broker, Arc::clone(&market));

    Ok(AppContext::new(config, llm, broker, market, store))
}

/// Build an orchestrator over the standard agent panel.
pub fn build_orchestrator(ctx: &AppContext) -> Orchestrator {
    Orchestrator::from_context(ctx, standard_agents(ctx))
}

/// Run one analysis session.
pub async fn analyze(
    orchestrator: &Orchestrator,
    request: AnalysisRequest,
) -> Result<AnalysisResult, AgentError> {
    orchestrator.run(request).await
}

/// Stream relay envelopes to `sink` as JSON lines.
///
/// The task ends once every relay sender is gone, which happens when the
/// context and every orchestrator built from it are dropped. Envelopes
/// queued before that point are still delivered. Resolves to the number of
/// lines written.
pub fn spawn_observer<F>(relay: &WsRelay, mut sink: F) -> JoinHandle<usize>
where
    F: FnMut(String) + Send + 'static,
{
    let mut rx = relay.subscribe();
    tokio::spawn(async move {
        let mut written = 0;
        loop {
            match rx.recv().await {
                Ok(envelope) => match serde_json::to_string(&envelope) {
                    Ok(line) => {
                        sink(line);
                        written += 1;
                    }
                    Err(e) => warn!(error = %e, "Unserializable envelope"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Observer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
        written
    })
}

/// Wait for an observer to flush. Call after dropping its context.
pub async fn finish_observer(observer: JoinHandle<usize>) -> usize {
    match tokio::time::timeout(OBSERVER_DRAIN, observer).await {
        Ok(Ok(written)) => written,
        Ok(Err(e)) => {
            warn!(error = %e, "Observer task failed");
            0
        }
        Err(_) => {
            warn!(timeout = ?OBSERVER_DRAIN, "Observer still draining, giving up");
            0
        }
    }
}
