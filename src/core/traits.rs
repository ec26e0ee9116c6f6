//! Core traits - the seams to external collaborators

use async_trait::async_trait;

use crate::core::{OrderRequest, OrderResponse, Result};

/// Order-entry link. The concrete session transport lives outside the core;
/// each call is a single at-most-once submission.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Submit one order and wait for the acknowledgement
    async fn place_order(&self, order: OrderRequest) -> Result<OrderResponse>;

    /// Gateway name for logging
    fn name(&self) -> &str;
}
