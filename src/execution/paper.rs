//! In-memory order gateway. Acknowledges every order without touching a market.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::core::{Error, OrderGateway, OrderRequest, OrderResponse, OrderStatus, Result};

#[derive(Debug, Default)]
pub struct PaperGateway {
    orders: Mutex<Vec<OrderRequest>>,
    attempts: AtomicU64,
    offline: AtomicBool,
    latency: Option<Duration>,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every acknowledgement by `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// While offline every order is rejected.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// Accepted orders, in submission order.
    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().clone()
    }

    /// Every submission, accepted or not.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place_order(&self, order: OrderRequest) -> Result<OrderResponse> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::Relaxed) {
            return Err(Error::Exchange("paper session offline".into()));
        }

        let response = OrderResponse {
            order_id: format!("paper_{}", uuid::Uuid::new_v4()),
            status: OrderStatus::Filled,
            created_at: chrono::Utc::now().timestamp_millis() as u64,
        };
        tracing::debug!(
            "📝 paper {} {} {} {} -> {}",
            order.side,
            order.order_type,
            order.quantity,
            order.symbol,
            response.order_id
        );
        self.orders.lock().push(order);
        Ok(response)
    }

    fn name(&self) -> &str {
        "paper"
    }
}
