//! Execution layer - turns a trigger firing into orders

pub mod paper;

use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::config::ExecutionConfig;
use crate::core::{
    Error, Market, MetricKind, OrderGateway, OrderRequest, OrderResponse, OrderType, PairKey,
    Result, Side, Symbol,
};
use crate::trigger::DispatchTicket;

pub use paper::PaperGateway;

/// Boundary to order placement. Each call is one at-most-once attempt; retrying
/// is left to the trigger re-firing on a later sample.
#[async_trait]
pub trait ExecutionDispatcher: Send + Sync {
    async fn place_major_execution(
        &self,
        pair: &PairKey,
        leg: &Symbol,
        reference: &Symbol,
        leg_bid: Decimal,
    ) -> Result<()>;

    async fn place_minor_execution(&self, pair: &PairKey, leg: &Symbol, reference: &Symbol) -> Result<()>;
}

/// Everything a dispatch needs, captured when the track fired.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchJob {
    pub ticket: DispatchTicket,
    pub leg: Symbol,
    pub reference: Symbol,
    pub leg_bid: Decimal,
}

impl DispatchJob {
    pub fn metric(&self) -> MetricKind {
        self.ticket.metric
    }

    /// Route the job to the dispatcher call matching its metric.
    pub async fn run(&self, dispatcher: &dyn ExecutionDispatcher) -> Result<()> {
        let pair = &self.ticket.pair;
        match self.ticket.metric {
            MetricKind::Major => {
                dispatcher
                    .place_major_execution(pair, &self.leg, &self.reference, self.leg_bid)
                    .await
            }
            MetricKind::Minor => {
                dispatcher
                    .place_minor_execution(pair, &self.leg, &self.reference)
                    .await
            }
        }
    }
}

/// Dispatcher that sends the two orders of an execution through an `OrderGateway`.
///
/// Major: sell the leg at its bid (limit), then buy the reference at market.
/// Minor: sell the reference at market, then buy the leg at market.
/// The second order is only sent once the first is acknowledged.
pub struct OrderDispatcher<G: OrderGateway> {
    gateway: Arc<G>,
    quantity: Decimal,
    account: Option<String>,
    orders: Arc<RwLock<HashMap<String, OrderResponse>>>,
}

impl<G: OrderGateway> OrderDispatcher<G> {
    pub fn new(gateway: Arc<G>, config: &ExecutionConfig) -> Self {
        Self {
            gateway,
            quantity: Decimal::from(config.quantity),
            account: config.client_code.clone(),
            orders: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    /// Acknowledgement for a client order id, if it was accepted
    pub fn get_order(&self, client_order_id: &str) -> Option<OrderResponse> {
        self.orders.read().get(client_order_id).cloned()
    }

    pub fn orders_placed(&self) -> usize {
        self.orders.read().len()
    }

    fn order(
        &self,
        symbol: &Symbol,
        side: Side,
        order_type: OrderType,
        market: Market,
        price: Option<Decimal>,
        tag: String,
    ) -> OrderRequest {
        OrderRequest {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.clone(),
            side,
            order_type,
            market,
            quantity: self.quantity,
            price,
            account: self.account.clone(),
            tag,
        }
    }

    async fn submit(&self, order: OrderRequest) -> Result<OrderResponse> {
        info!(
            "Placing order: {} {} {} {} @ {:?} [{}]",
            order.side, order.order_type, order.quantity, order.symbol, order.price, order.tag
        );

        let client_order_id = order.client_order_id.clone();
        let response = self.gateway.place_order(order).await.map_err(|e| {
            warn!("{} rejected {}: {}", self.gateway.name(), client_order_id, e);
            e
        })?;

        self.orders.write().insert(client_order_id, response.clone());
        Ok(response)
    }
}

#[async_trait]
impl<G: OrderGateway> ExecutionDispatcher for OrderDispatcher<G> {
    async fn place_major_execution(
        &self,
        pair: &PairKey,
        leg: &Symbol,
        reference: &Symbol,
        leg_bid: Decimal,
    ) -> Result<()> {
        if leg_bid <= Decimal::ZERO {
            return Err(Error::Dispatch(format!("leg bid {} is not a limit price", leg_bid)));
        }
        let price = leg_bid.normalize();
        let tag = format!("{}/{}", pair, MetricKind::Major);

        let sell = self.order(leg, Side::Sell, OrderType::Limit, Market::Futures, Some(price), tag.clone());
        self.submit(sell).await?;

        let buy = self.order(reference, Side::Buy, OrderType::Market, Market::Spot, None, tag);
        self.submit(buy).await?;
        Ok(())
    }

    async fn place_minor_execution(&self, pair: &PairKey, leg: &Symbol, reference: &Symbol) -> Result<()> {
        let tag = format!("{}/{}", pair, MetricKind::Minor);

        let sell = self.order(reference, Side::Sell, OrderType::Market, Market::Spot, None, tag.clone());
        self.submit(sell).await?;

        let buy = self.order(leg, Side::Buy, OrderType::Market, Market::Futures, None, tag);
        self.submit(buy).await?;
        Ok(())
    }
}
