use std::sync::Arc;
use std::time::Duration;

use council_models::CouncilConfig;
use council_store::RecordStore;

use crate::broker::BrokerClient;
use crate::bus::MessageBus;
use crate::llm::LlmClient;
use crate::market_data::MarketDataSource;
use crate::relay::{RelayForwarder, WsRelay};

/// Everything a session needs, built once at startup and passed explicitly.
#[derive(Clone)]
pub struct AppContext {
    pub config: CouncilConfig,
    pub bus: Arc<MessageBus>,
    pub llm: Arc<dyn LlmClient>,
    pub broker: Arc<dyn BrokerClient>,
    pub market: Arc<dyn MarketDataSource>,
    pub store: Option<Arc<RecordStore>>,
    pub relay: WsRelay,
}

impl AppContext {
    /// Create the bus and relay from `config` and wire the relay forwarder.
    pub fn new(
        config: CouncilConfig,
        llm: Arc<dyn LlmClient>,
        broker: Arc<dyn BrokerClient>,
        market: Arc<dyn MarketDataSource>,
        store: Option<Arc<RecordStore>>,
    ) -> Self {
        let bus = Arc::new(MessageBus::new(Duration::from_secs(
            config.bus.handler_timeout_seconds,
        )));
        let relay = WsRelay::new(config.bus.relay_capacity);
        RelayForwarder::attach(&bus, relay.clone());

        Self {
            config,
            bus,
            llm,
            broker,
            market,
            store,
            relay,
        }
    }
}
