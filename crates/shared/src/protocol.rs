use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{CartLineId, OrderId, ProductId, ReviewId, VariationId, WishlistId},
    error::ApiException,
};

/// Response wrapper shared by every customer endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub status: bool,
    #[serde(default)]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: true,
            message: String::new(),
            data: Some(data),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            status: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn into_result(self) -> Result<Option<T>, ApiException> {
        if self.status {
            Ok(self.data)
        } else {
            Err(ApiException::rejected(self.message))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_detail: Option<String>,
}

impl StatusEvent {
    pub fn new(status: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            status: status.into(),
            created_at,
            cancel_reason: None,
            reason_detail: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSummary {
    pub id: OrderId,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetail {
    pub id: OrderId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: Vec<StatusEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<Decimal>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product: ProductId,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartProduct {
    pub id: ProductId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: Decimal,
}

/// One server-side cart row. The backend assigns `id`; `product.id` is the
/// identity used to reconcile quantities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub id: CartLineId,
    pub product: CartProduct,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<VariationId>,
}

impl CartLine {
    pub fn unit_price(&self) -> Decimal {
        self.product.price
    }

    pub fn subtotal(&self) -> Decimal {
        self.product.price * Decimal::from(self.quantity)
    }
}

/// Body of `POST /customer-api/cart`. Omitting `id` creates a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLineRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CartLineId>,
    pub product: ProductId,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<VariationId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WishlistItem {
    pub product_id: ProductId,
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub seller: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WishlistProduct {
    pub id: ProductId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub seller: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WishlistEntry {
    pub id: WishlistId,
    pub product: WishlistProduct,
}

impl WishlistEntry {
    pub fn item(&self) -> WishlistItem {
        WishlistItem {
            product_id: self.product.id,
            name: self.product.name.clone(),
            price: self.product.price,
            image: self.product.image.clone(),
            seller: self.product.seller.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductReview {
    pub id: ReviewId,
    pub product: ProductId,
    pub rating: u8,
    #[serde(default)]
    pub review: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProductReview {
    pub product: ProductId,
    pub rating: u8,
    pub review: String,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
