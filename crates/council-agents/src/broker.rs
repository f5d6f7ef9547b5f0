use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use council_models::config::{BrokerBackend, BrokerConfig};
use council_models::{OrderStatus, OrderType, RecommendedTrade, TradeSide};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::error::BrokerError;
use crate::market_data::MarketDataSource;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
}

impl OrderRequest {
    pub fn from_trade(client_order_id: String, trade: &RecommendedTrade) -> Self {
        Self {
            client_order_id,
            symbol: trade.symbol.clone(),
            side: trade.side,
            quantity: trade.quantity,
            order_type: trade.order_type,
            limit_price: trade.limit_price,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_price: Option<Decimal>,
}

/// Order submission collaborator. Mockable for testing.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAck, BrokerError>;

    async fn health_check(&self) -> Result<(), BrokerError>;
}

const BPS_DIVISOR: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// Simulated broker that fills against current market data.
///
/// Market orders and marketable limit orders fill in full at the quote
/// moved `slippage_bps` against the order. Other limit orders rest as
/// `accepted` and never fill.
pub struct PaperBroker {
    market: Arc<dyn MarketDataSource>,
    slippage_bps: Decimal,
    next_order: AtomicU64,
}

impl PaperBroker {
    pub fn new(market: Arc<dyn MarketDataSource>, slippage_bps: Decimal) -> Self {
        Self {
            market,
            slippage_bps,
            next_order: AtomicU64::new(1),
        }
    }

    fn slipped(&self, price: Decimal, side: TradeSide) -> Decimal {
        let factor = self.slippage_bps / BPS_DIVISOR;
        let adjusted = match side {
            TradeSide::Buy => price * (Decimal::ONE + factor),
            TradeSide::Sell => price * (Decimal::ONE - factor),
        };
        adjusted.round_dp(4)
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAck, BrokerError> {
        if order.quantity <= Decimal::ZERO {
            return Err(BrokerError::Rejected(format!(
                "quantity must be positive for {}",
                order.symbol
            )));
        }

        let snapshot = self
            .market
            .get_snapshot(&order.symbol)
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?
            .ok_or_else(|| BrokerError::Rejected(format!("no quote for {}", order.symbol)))?;

        let order_id = format!("paper-{}", self.next_order.fetch_add(1, Ordering::Relaxed));
        let fill = self.slipped(snapshot.price, order.side);

        let (status, filled_price) = match (order.order_type, order.limit_price) {
            (OrderType::Market, _) => (OrderStatus::Filled, Some(fill)),
            (OrderType::Limit, None) => {
                return Err(BrokerError::Rejected(format!(
                    "limit order for {} has no limit price",
                    order.symbol
                )))
            }
            (OrderType::Limit, Some(limit)) => match order.side {
                TradeSide::Buy if limit >= snapshot.price => {
                    (OrderStatus::Filled, Some(fill.min(limit)))
                }
                TradeSide::Sell if limit <= snapshot.price => {
                    (OrderStatus::Filled, Some(fill.max(limit)))
                }
                _ => (OrderStatus::Accepted, None),
            },
        };

        debug!(
            order_id = %order_id,
            symbol = %order.symbol,
            quantity = %order.quantity,
            status = status.as_str(),
            "Paper order processed"
        );

        Ok(OrderAck {
            order_id,
            status,
            filled_price,
        })
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Pick the broker once at startup.
pub fn select_broker(
    config: &BrokerConfig,
    market: Arc<dyn MarketDataSource>,
) -> Arc<dyn BrokerClient> {
    info!(backend = ?config.backend, slippage_bps = %config.slippage_bps, "Selected broker");
    match config.backend {
        BrokerBackend::Paper => Arc::new(PaperBroker::new(market, config.slippage_bps)),
    }
}
