use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::OrderId,
    protocol::{OrderDetail, OrderSummary},
    timeline::{derive_timeline, Timeline},
};
use tracing::info;

use crate::{
    api::StorefrontApi,
    error::{ClientError, ClientResult},
};

/// Order history and status tracking for the signed-in customer.
#[derive(Clone)]
pub struct OrderTracker {
    api: Arc<StorefrontApi>,
}

impl OrderTracker {
    pub fn new(api: Arc<StorefrontApi>) -> Self {
        Self { api }
    }

    pub async fn list(&self) -> ClientResult<Vec<OrderSummary>> {
        self.api.list_orders().await
    }

    pub async fn detail(&self, order_id: OrderId) -> ClientResult<OrderDetail> {
        self.api.order_detail(order_id).await
    }

    /// Fetches the order and derives its progress timeline. Steps without a
    /// matching status event are stamped with the current time.
    pub async fn timeline(&self, order_id: OrderId) -> ClientResult<(OrderDetail, Timeline)> {
        let detail = self.detail(order_id).await?;
        let timeline = derive_timeline(&detail.status, Utc::now(), detail.created_at);
        Ok((detail, timeline))
    }

    pub async fn cancel(&self, order_id: OrderId, reason: &str) -> ClientResult<()> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ClientError::Validation(
                "a cancellation reason is required".into(),
            ));
        }
        self.api.cancel_order(order_id, reason).await?;
        info!("orders: cancelled order={order_id}");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/orders_tests.rs"]
mod tests;
