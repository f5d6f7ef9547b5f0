use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use council_models::config::{LlmConfig, MarketDataConfig};
use council_models::{
    AgentRole, Contribution, ContributionContent, DeliberationState, MarketOutlook,
    MarketSentiment, MarketSnapshot, Portfolio, CASH_SYMBOL,
};
use rust_decimal::Decimal;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::agent::{probe_llm, Agent, LlmMode};
use crate::error::AgentError;
use crate::llm::{CompletionRequest, LlmClient};
use crate::market_data::MarketDataSource;
use crate::parser::{json_object, string_field};
use crate::policy::CORE_SYMBOLS;
use crate::prompts::market_system_prompt;

pub const MARKET_AGENT: &str = "market_analyst";

/// Benchmark move (percent) beyond which the outlook is no longer neutral.
const SENTIMENT_THRESHOLD: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

/// Gathers quotes for the holdings, the core funds and the benchmark.
pub struct MarketAgent {
    market: Arc<dyn MarketDataSource>,
    llm: Arc<dyn LlmClient>,
    llm_config: LlmConfig,
    benchmark: String,
    stale_after: chrono::Duration,
    mode: OnceCell<LlmMode>,
}

impl MarketAgent {
    pub fn new(
        market: Arc<dyn MarketDataSource>,
        llm: Arc<dyn LlmClient>,
        llm_config: LlmConfig,
        market_config: &MarketDataConfig,
    ) -> Self {
        Self {
            market,
            llm,
            llm_config,
            benchmark: market_config.benchmark.clone(),
            stale_after: chrono::Duration::seconds(
                i64::try_from(market_config.stale_after_seconds).unwrap_or(i64::MAX),
            ),
            mode: OnceCell::new(),
        }
    }

    fn universe(&self, portfolio: &Portfolio) -> BTreeSet<String> {
        portfolio
            .holdings
            .iter()
            .map(|h| h.symbol.clone())
            .chain(CORE_SYMBOLS.iter().map(|s| s.to_string()))
            .chain(std::iter::once(self.benchmark.clone()))
            .filter(|s| s != CASH_SYMBOL)
            .collect()
    }

    async fn gather(&self, portfolio: &Portfolio) -> MarketOutlook {
        let now = Utc::now();
        let mut snapshots = Vec::new();
        let mut missing_symbols = Vec::new();
        let mut stale_symbols = Vec::new();

        for symbol in self.universe(portfolio) {
            match self.market.get_snapshot(&symbol).await {
                Ok(Some(snapshot)) => {
                    if snapshot.is_stale(now, self.stale_after) {
                        stale_symbols.push(symbol);
                    }
                    snapshots.push(snapshot);
                }
                Ok(None) => missing_symbols.push(symbol),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Market data lookup failed");
                    missing_symbols.push(symbol);
                }
            }
        }

        let (sentiment, summary) =
            template_outlook(&snapshots, &missing_symbols, &stale_symbols, &self.benchmark);
        MarketOutlook {
            snapshots,
            missing_symbols,
            stale_symbols,
            sentiment,
            summary,
        }
    }

    async fn narrate(&self, outlook: &MarketOutlook) -> Result<(MarketSentiment, String), AgentError> {
        let prompt = serde_json::to_string_pretty(&serde_json::json!({
            "benchmark": self.benchmark,
            "snapshots": outlook.snapshots,
            "missing_symbols": outlook.missing_symbols,
            "stale_symbols": outlook.stale_symbols,
        }))?;
        let raw = self
            .llm
            .complete(&CompletionRequest {
                system_prompt: market_system_prompt(),
                prompt,
                model: self.llm_config.model.clone(),
                max_tokens: self.llm_config.max_tokens,
            })
            .await?;

        let value = json_object(&raw)?;
        let sentiment = string_field(&value, "sentiment")
            .and_then(|s| MarketSentiment::parse(&s))
            .ok_or_else(|| AgentError::Parse("outlook has no valid sentiment".to_string()))?;
        let summary = string_field(&value, "summary")
            .ok_or_else(|| AgentError::Parse("outlook has no summary".to_string()))?;
        Ok((sentiment, summary))
    }
}

/// Deterministic sentiment and summary used when no LLM narration is available.
pub fn template_outlook(
    snapshots: &[MarketSnapshot],
    missing: &[String],
    stale: &[String],
    benchmark: &str,
) -> (MarketSentiment, String) {
    let benchmark_move = snapshots
        .iter()
        .find(|s| s.symbol == benchmark)
        .map(MarketSnapshot::change_percent);

    let sentiment = match benchmark_move {
        Some(pct) if pct > SENTIMENT_THRESHOLD => MarketSentiment::Bullish,
        Some(pct) if pct < -SENTIMENT_THRESHOLD => MarketSentiment::Bearish,
        _ => MarketSentiment::Neutral,
    };

    let mut summary = match benchmark_move {
        Some(pct) => format!("{benchmark} moved {pct}% since the previous close."),
        None => format!("No quote for benchmark {benchmark}."),
    };
    let total = snapshots.len() + missing.len();
    summary.push_str(&format!(" Quotes available for {} of {total} symbols.", snapshots.len()));
    if !missing.is_empty() {
        summary.push_str(&format!(" Missing: {}.", missing.join(", ")));
    }
    if !stale.is_empty() {
        summary.push_str(&format!(" Stale: {}.", stale.join(", ")));
    }
    (sentiment, summary)
}

#[async_trait]
impl Agent for MarketAgent {
    fn name(&self) -> &str {
        MARKET_AGENT
    }

    fn role(&self) -> AgentRole {
        AgentRole::Market
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        self.mode
            .get_or_try_init(|| probe_llm(MARKET_AGENT, &self.llm, self.llm_config.demo_mode))
            .await?;
        Ok(())
    }

    async fn contribute(&self, state: &DeliberationState) -> Result<Contribution, AgentError> {
        let mut outlook = self.gather(&state.portfolio).await;

        if self.mode.get() == Some(&LlmMode::Live) {
            match self.narrate(&outlook).await {
                Ok((sentiment, summary)) => {
                    outlook.sentiment = sentiment;
                    outlook.summary = summary;
                }
                Err(e) => warn!(agent = MARKET_AGENT, error = %e, "LLM outlook failed, using template"),
            }
        }

        debug!(
            quoted = outlook.snapshots.len(),
            missing = outlook.missing_symbols.len(),
            stale = outlook.stale_symbols.len(),
            "Market outlook ready"
        );
        Ok(Contribution::new(
            MARKET_AGENT,
            state.round_number(),
            ContributionContent::MarketOutlook(outlook),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snap(symbol: &str, price: Decimal, change: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            symbol: symbol.to_string(),
            price,
            change,
            volume: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn template_sentiment_follows_benchmark() {
        let up = [snap("SPY", dec!(505), dec!(5))];
        assert_eq!(template_outlook(&up, &[], &[], "SPY").0, MarketSentiment::Bullish);

        let down = [snap("SPY", dec!(495), dec!(-5))];
        assert_eq!(template_outlook(&down, &[], &[], "SPY").0, MarketSentiment::Bearish);

        let flat = [snap("SPY", dec!(500), dec!(1))];
        assert_eq!(template_outlook(&flat, &[], &[], "SPY").0, MarketSentiment::Neutral);
    }

    #[test]
    fn template_mentions_gaps() {
        let (sentiment, summary) = template_outlook(
            &[snap("VTI", dec!(250), dec!(0))],
            &["ZZZ".to_string()],
            &["VTI".to_string()],
            "SPY",
        );
        assert_eq!(sentiment, MarketSentiment::Neutral);
        assert!(summary.contains("No quote for benchmark SPY"));
        assert!(summary.contains("1 of 2"));
        assert!(summary.contains("Missing: ZZZ"));
        assert!(summary.contains("Stale: VTI"));
    }
}
