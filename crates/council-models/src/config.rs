use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Top-level configuration for the council engine.
///
/// Every section and field has a default, so an empty TOML file is a valid
/// (fully offline-capable) configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct CouncilConfig {
    pub store: StoreConfig,
    pub deliberation: DeliberationConfig,
    pub llm: LlmConfig,
    pub broker: BrokerConfig,
    pub market_data: MarketDataConfig,
    pub bus: BusConfig,
}

impl CouncilConfig {
    /// Reject values that would make a session impossible to run.
    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |msg: &str| Err(ModelError::InvalidConfig(msg.to_string()));
        if self.deliberation.max_deliberation_rounds == 0 {
            return invalid("deliberation.max_deliberation_rounds must be at least 1");
        }
        if self.deliberation.max_consecutive_abstentions == 0 {
            return invalid("deliberation.max_consecutive_abstentions must be at least 1");
        }
        if self.deliberation.agent_timeout_seconds == 0 {
            return invalid("deliberation.agent_timeout_seconds must be positive");
        }
        if self.llm.timeout_seconds == 0 {
            return invalid("llm.timeout_seconds must be positive");
        }
        if self.bus.handler_timeout_seconds == 0 {
            return invalid("bus.handler_timeout_seconds must be positive");
        }
        if self.bus.relay_capacity == 0 {
            return invalid("bus.relay_capacity must be at least 1");
        }
        if self.broker.slippage_bps < Decimal::ZERO {
            return invalid("broker.slippage_bps must not be negative");
        }
        if let Some((symbol, _)) = self
            .market_data
            .quotes
            .iter()
            .find(|(_, price)| **price <= Decimal::ZERO)
        {
            return Err(ModelError::InvalidConfig(format!(
                "market_data.quotes.{symbol} must be positive"
            )));
        }
        Ok(())
    }
}

/// Configuration for the record store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite file. `:memory:` keeps everything in process.
    pub sqlite_path: String,
    /// Maximum number of entries in the in-memory moka cache.
    pub memory_max_capacity: u64,
    /// How long a read stays in the memory cache.
    pub memory_ttl_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "data/council.db".to_string(),
            memory_max_capacity: 10_000,
            memory_ttl_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeliberationConfig {
    pub max_deliberation_rounds: u32,
    /// Require an explicit `approve` interjection before any order is placed.
    pub require_user_approval: bool,
    /// Per-contribution timeout. Expiry counts as an abstention.
    pub agent_timeout_seconds: u64,
    /// Consecutive abstentions by one agent before the session errors out.
    pub max_consecutive_abstentions: u32,
    /// How long the approval gate waits for an `approve`/`reject`. 0 = don't wait.
    pub approval_wait_seconds: u64,
}

impl Default for DeliberationConfig {
    fn default() -> Self {
        Self {
            max_deliberation_rounds: 3,
            require_user_approval: false,
            agent_timeout_seconds: 45,
            max_consecutive_abstentions: 3,
            approval_wait_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmBackend {
    #[default]
    ClaudeCli,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    /// Allow agents to fall back to templated output when the LLM is unreachable.
    pub demo_mode: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::ClaudeCli,
            model: "claude-3-5-haiku-latest".to_string(),
            max_tokens: 1024,
            timeout_seconds: 30,
            demo_mode: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BrokerBackend {
    #[default]
    Paper,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub backend: BrokerBackend,
    /// Paper fills move this many basis points against the order.
    pub slippage_bps: Decimal,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BrokerBackend::Paper,
            slippage_bps: Decimal::from(5),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MarketDataSourceKind {
    /// Quotes come from `market_data.quotes`.
    #[default]
    Static,
    /// Quotes come from `quote:{symbol}` records in the store.
    Store,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MarketDataConfig {
    pub source: MarketDataSourceKind,
    /// Snapshots older than this are flagged stale.
    pub stale_after_seconds: u64,
    pub benchmark: String,
    /// Demo quotes for the static source, symbol to price.
    pub quotes: BTreeMap<String, Decimal>,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        let quotes = [
            ("SPY", Decimal::new(50512, 2)),
            ("VTI", Decimal::new(25840, 2)),
            ("VXUS", Decimal::new(6115, 2)),
            ("BND", Decimal::new(7260, 2)),
            ("AAPL", Decimal::new(19000, 2)),
            ("MSFT", Decimal::new(41525, 2)),
            ("TSLA", Decimal::new(17550, 2)),
            ("NVDA", Decimal::new(12080, 2)),
        ]
        .into_iter()
        .map(|(s, p)| (s.to_string(), p))
        .collect();

        Self {
            source: MarketDataSourceKind::Static,
            stale_after_seconds: 900,
            benchmark: "SPY".to_string(),
            quotes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BusConfig {
    /// A handler that runs longer than this is recorded as a delivery failure.
    pub handler_timeout_seconds: u64,
    /// Buffered frames per relay observer before it starts losing messages.
    pub relay_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            handler_timeout_seconds: 30,
            relay_capacity: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn roundtrip_council_config() {
        let config = CouncilConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: CouncilConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn empty_toml_is_default() {
        let config: CouncilConfig = toml::from_str("").unwrap();
        assert_eq!(config, CouncilConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.deliberation.max_deliberation_rounds, 3);
        assert_eq!(config.deliberation.max_consecutive_abstentions, 3);
    }

    #[test]
    fn config_from_toml() {
        let toml_str = r#"
[store]
sqlite_path = "/tmp/council_test.db"

[deliberation]
max_deliberation_rounds = 5
require_user_approval = true

[llm]
backend = "offline"

[broker]
slippage_bps = "0"

[market_data]
source = "store"
stale_after_seconds = 60

[market_data.quotes]
VTI = "250.00"
"#;

        let config: CouncilConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store.sqlite_path, "/tmp/council_test.db");
        assert_eq!(config.store.memory_max_capacity, 10_000);
        assert_eq!(config.deliberation.max_deliberation_rounds, 5);
        assert!(config.deliberation.require_user_approval);
        assert_eq!(config.deliberation.agent_timeout_seconds, 45);
        assert_eq!(config.llm.backend, LlmBackend::Offline);
        assert_eq!(config.broker.slippage_bps, dec!(0));
        assert_eq!(config.market_data.source, MarketDataSourceKind::Store);
        assert_eq!(config.market_data.quotes.len(), 1);
        assert_eq!(config.market_data.quotes["VTI"], dec!(250));
    }

    #[test]
    fn validate_rejects_nonsense() {
        let mut config = CouncilConfig::default();
        config.deliberation.max_deliberation_rounds = 0;
        assert!(config.validate().is_err());

        let mut config = CouncilConfig::default();
        config.bus.relay_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = CouncilConfig::default();
        config.market_data.quotes.insert("BAD".to_string(), dec!(-1));
        assert!(matches!(
            config.validate(),
            Err(ModelError::InvalidConfig(msg)) if msg.contains("BAD")
        ));
    }
}
