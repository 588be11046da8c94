use std::{fmt, time::Duration};

use async_trait::async_trait;
use reqwest::{header::AUTHORIZATION, Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use shared::{
    domain::{CartLineId, OrderId, ProductId, WishlistId},
    protocol::{
        ApiEnvelope, CancelOrderRequest, CartLine, CartLineRequest, NewProductReview, OrderDetail,
        OrderSummary, ProductReview, WishlistEntry,
    },
};
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::error::{ClientError, ClientResult};

/// Scheme literal for the `Authorization` header. Every authenticated call
/// goes through `StorefrontApi::authorized`, so this is the only place the
/// casing is decided.
pub const AUTH_SCHEME: &str = "token";

const CART_PATH: &str = "customer-api/cart";
const REMOVE_CART_PATH: &str = "customer-api/remove-cart";
const MY_ORDERS_PATH: &str = "customer-api/my-orders";
const CANCEL_ORDER_PATH: &str = "customer-api/cancel-order";
const PRODUCT_REVIEW_PATH: &str = "customer-api/product-review";
const WISHLIST_PATH: &str = "customer-api/wishlist";
const ADD_WISHLIST_PATH: &str = "customer-api/add-wishlist";
const REMOVE_WISHLIST_PATH: &str = "customer-api/remove-wishlist";

#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(raw: impl Into<String>) -> ClientResult<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ClientError::Validation("auth token must not be empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn header_value(&self) -> String {
        format!("{AUTH_SCHEME} {}", self.0)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(<redacted>)")
    }
}

/// Cart endpoints the reconciler depends on.
#[async_trait]
pub trait CartBackend: Send + Sync {
    async fn is_authenticated(&self) -> bool;
    async fn fetch_cart(&self) -> ClientResult<Vec<CartLine>>;
    async fn save_cart_line(&self, request: &CartLineRequest) -> ClientResult<()>;
    async fn remove_cart_line(&self, line_id: CartLineId) -> ClientResult<()>;
}

/// Wishlist endpoints mirrored by [`crate::wishlist::WishlistService`].
#[async_trait]
pub trait WishlistBackend: Send + Sync {
    async fn is_authenticated(&self) -> bool;
    async fn wishlist(&self) -> ClientResult<Vec<WishlistEntry>>;
    async fn add_wishlist(&self, product_id: ProductId) -> ClientResult<()>;
    async fn remove_wishlist(&self, wishlist_id: WishlistId) -> ClientResult<()>;
}

/// Backend that is never signed in. Useful for demo catalogs and tests.
pub struct OfflineBackend;

#[async_trait]
impl CartBackend for OfflineBackend {
    async fn is_authenticated(&self) -> bool {
        false
    }

    async fn fetch_cart(&self) -> ClientResult<Vec<CartLine>> {
        Err(ClientError::MissingToken)
    }

    async fn save_cart_line(&self, _request: &CartLineRequest) -> ClientResult<()> {
        Err(ClientError::MissingToken)
    }

    async fn remove_cart_line(&self, _line_id: CartLineId) -> ClientResult<()> {
        Err(ClientError::MissingToken)
    }
}

#[async_trait]
impl WishlistBackend for OfflineBackend {
    async fn is_authenticated(&self) -> bool {
        false
    }

    async fn wishlist(&self) -> ClientResult<Vec<WishlistEntry>> {
        Err(ClientError::MissingToken)
    }

    async fn add_wishlist(&self, _product_id: ProductId) -> ClientResult<()> {
        Err(ClientError::MissingToken)
    }

    async fn remove_wishlist(&self, _wishlist_id: WishlistId) -> ClientResult<()> {
        Err(ClientError::MissingToken)
    }
}

/// Typed client for the customer REST api.
pub struct StorefrontApi {
    http: Client,
    base_url: Url,
    token: RwLock<Option<AuthToken>>,
}

impl StorefrontApi {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> ClientResult<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|source| ClientError::Transport {
            endpoint: "client setup".into(),
            source,
        })?;
        Self::with_client(http, base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> ClientResult<Self> {
        let mut base_url = Url::parse(base_url.trim())?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http,
            base_url,
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn set_token(&self, token: Option<AuthToken>) {
        *self.token.write().await = token;
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    pub async fn fetch_cart(&self) -> ClientResult<Vec<CartLine>> {
        let request = self.request(Method::GET, CART_PATH)?;
        let lines = self.send_authorized(CART_PATH, request).await?;
        // An empty cart may come back without a data field.
        Ok(lines.unwrap_or_default())
    }

    pub async fn save_cart_line(&self, body: &CartLineRequest) -> ClientResult<()> {
        let request = self.request(Method::POST, CART_PATH)?.json(body);
        self.send_authorized::<serde_json::Value>(CART_PATH, request)
            .await?;
        Ok(())
    }

    pub async fn remove_cart_line(&self, line_id: CartLineId) -> ClientResult<()> {
        let path = format!("{REMOVE_CART_PATH}/{line_id}");
        let request = self.request(Method::GET, &path)?;
        self.send_authorized::<serde_json::Value>(&path, request)
            .await?;
        Ok(())
    }

    pub async fn list_orders(&self) -> ClientResult<Vec<OrderSummary>> {
        let request = self.request(Method::GET, MY_ORDERS_PATH)?;
        let orders = self.send_authorized(MY_ORDERS_PATH, request).await?;
        Ok(orders.unwrap_or_default())
    }

    pub async fn order_detail(&self, order_id: OrderId) -> ClientResult<OrderDetail> {
        let path = format!("{MY_ORDERS_PATH}/{order_id}");
        let request = self.request(Method::GET, &path)?;
        let order = self.send_authorized(&path, request).await?;
        require_data(&path, order)
    }

    pub async fn cancel_order(&self, order_id: OrderId, reason: &str) -> ClientResult<()> {
        let path = format!("{CANCEL_ORDER_PATH}/{order_id}");
        let request = self
            .request(Method::POST, &path)?
            .json(&CancelOrderRequest {
                reason: reason.to_string(),
            });
        self.send_authorized::<serde_json::Value>(&path, request)
            .await?;
        Ok(())
    }

    pub async fn product_reviews(&self, product_id: ProductId) -> ClientResult<Vec<ProductReview>> {
        let request = self
            .request(Method::GET, PRODUCT_REVIEW_PATH)?
            .query(&[("product", product_id.0)]);
        let reviews = self.send(PRODUCT_REVIEW_PATH, request).await?;
        Ok(reviews.unwrap_or_default())
    }

    pub async fn post_review(&self, review: &NewProductReview) -> ClientResult<()> {
        if !(1..=5).contains(&review.rating) {
            return Err(ClientError::Validation(format!(
                "rating must be between 1 and 5, got {}",
                review.rating
            )));
        }
        let request = self.request(Method::POST, PRODUCT_REVIEW_PATH)?.json(review);
        self.send_authorized::<serde_json::Value>(PRODUCT_REVIEW_PATH, request)
            .await?;
        Ok(())
    }

    pub async fn wishlist(&self) -> ClientResult<Vec<WishlistEntry>> {
        let request = self.request(Method::GET, WISHLIST_PATH)?;
        let entries = self.send_authorized(WISHLIST_PATH, request).await?;
        Ok(entries.unwrap_or_default())
    }

    pub async fn add_wishlist(&self, product_id: ProductId) -> ClientResult<()> {
        let path = format!("{ADD_WISHLIST_PATH}/{product_id}");
        let request = self.request(Method::POST, &path)?;
        self.send_authorized::<serde_json::Value>(&path, request)
            .await?;
        Ok(())
    }

    pub async fn remove_wishlist(&self, wishlist_id: WishlistId) -> ClientResult<()> {
        let path = format!("{REMOVE_WISHLIST_PATH}/{wishlist_id}");
        let request = self.request(Method::GET, &path)?;
        self.send_authorized::<serde_json::Value>(&path, request)
            .await?;
        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> ClientResult<RequestBuilder> {
        let url = self.base_url.join(path)?;
        Ok(self.http.request(method, url))
    }

    async fn authorized(&self, request: RequestBuilder) -> ClientResult<RequestBuilder> {
        let guard = self.token.read().await;
        let token = guard.as_ref().ok_or(ClientError::MissingToken)?;
        Ok(request.header(AUTHORIZATION, token.header_value()))
    }

    async fn send_authorized<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> ClientResult<Option<T>> {
        let request = self.authorized(request).await?;
        self.send(endpoint, request).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: RequestBuilder,
    ) -> ClientResult<Option<T>> {
        let transport = |source: reqwest::Error| ClientError::Transport {
            endpoint: endpoint.to_string(),
            source,
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;
        debug!("api: {endpoint} status={status} bytes={}", body.len());

        if !status.is_success() {
            let message = serde_json::from_slice::<ApiEnvelope<serde_json::Value>>(&body)
                .ok()
                .map(|envelope| envelope.message)
                .filter(|message| !message.is_empty());
            return Err(ClientError::Status {
                endpoint: endpoint.to_string(),
                status,
                message,
            });
        }

        let envelope: ApiEnvelope<T> =
            serde_json::from_slice(&body).map_err(|source| ClientError::Decode {
                endpoint: endpoint.to_string(),
                source,
            })?;
        Ok(envelope.into_result()?)
    }
}

fn require_data<T>(endpoint: &str, data: Option<T>) -> ClientResult<T> {
    data.ok_or_else(|| ClientError::MissingData {
        endpoint: endpoint.to_string(),
    })
}

#[async_trait]
impl CartBackend for StorefrontApi {
    async fn is_authenticated(&self) -> bool {
        StorefrontApi::is_authenticated(self).await
    }

    async fn fetch_cart(&self) -> ClientResult<Vec<CartLine>> {
        StorefrontApi::fetch_cart(self).await
    }

    async fn save_cart_line(&self, request: &CartLineRequest) -> ClientResult<()> {
        StorefrontApi::save_cart_line(self, request).await
    }

    async fn remove_cart_line(&self, line_id: CartLineId) -> ClientResult<()> {
        StorefrontApi::remove_cart_line(self, line_id).await
    }
}

#[async_trait]
impl WishlistBackend for StorefrontApi {
    async fn is_authenticated(&self) -> bool {
        StorefrontApi::is_authenticated(self).await
    }

    async fn wishlist(&self) -> ClientResult<Vec<WishlistEntry>> {
        StorefrontApi::wishlist(self).await
    }

    async fn add_wishlist(&self, product_id: ProductId) -> ClientResult<()> {
        StorefrontApi::add_wishlist(self, product_id).await
    }

    async fn remove_wishlist(&self, wishlist_id: WishlistId) -> ClientResult<()> {
        StorefrontApi::remove_wishlist(self, wishlist_id).await
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
