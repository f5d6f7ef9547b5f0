use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use council_models::config::{MarketDataConfig, MarketDataSourceKind};
use council_models::MarketSnapshot;
use council_store::RecordStore;
use rust_decimal::Decimal;

use crate::error::{AgentError, MarketDataError};

/// Quote lookup. `Ok(None)` means the source has nothing for the symbol.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn get_snapshot(&self, symbol: &str) -> Result<Option<MarketSnapshot>, MarketDataError>;
}

/// Fixed demo quotes from configuration, always stamped "now".
pub struct StaticMarketData {
    quotes: BTreeMap<String, Decimal>,
}

impl StaticMarketData {
    pub fn new(quotes: BTreeMap<String, Decimal>) -> Self {
        Self { quotes }
    }

    pub fn from_config(config: &MarketDataConfig) -> Self {
        Self::new(config.quotes.clone())
    }
}

#[async_trait]
impl MarketDataSource for StaticMarketData {
    async fn get_snapshot(&self, symbol: &str) -> Result<Option<MarketSnapshot>, MarketDataError> {
        Ok(self.quotes.get(symbol).map(|price| MarketSnapshot {
            symbol: symbol.to_string(),
            price: *price,
            change: Decimal::ZERO,
            volume: 0,
            timestamp: Utc::now(),
        }))
    }
}

/// Reads `quote:{symbol}` records that an external feed keeps current.
pub struct StoreMarketData {
    store: Arc<RecordStore>,
}

impl StoreMarketData {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MarketDataSource for StoreMarketData {
    async fn get_snapshot(&self, symbol: &str) -> Result<Option<MarketSnapshot>, MarketDataError> {
        Ok(self.store.get_quote(symbol).await?)
    }
}

/// Pick the market data source once at startup.
pub fn select_market_data(
    config: &MarketDataConfig,
    store: Option<Arc<RecordStore>>,
) -> Result<Arc<dyn MarketDataSource>, AgentError> {
    match config.source {
        MarketDataSourceKind::Static => Ok(Arc::new(StaticMarketData::from_config(config))),
        MarketDataSourceKind::Store => store
            .map(|s| Arc::new(StoreMarketData::new(s)) as Arc<dyn MarketDataSource>)
            .ok_or_else(|| {
                AgentError::Initialization(
                    "market_data.source = \"store\" requires an open record store".to_string(),
                )
            }),
    }
}
