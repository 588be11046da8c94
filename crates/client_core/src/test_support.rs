//! In-process stand-in for the customer api, served by axum on a random port.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use shared::{
    domain::{CartLineId, OrderId, ProductId, ReviewId, WishlistId},
    protocol::{
        ApiEnvelope, CancelOrderRequest, CartLine, CartLineRequest, CartProduct, NewProductReview,
        OrderDetail, OrderSummary, ProductReview, StatusEvent, WishlistEntry, WishlistProduct,
    },
};
use tokio::{net::TcpListener, sync::Mutex};

pub const TEST_TOKEN: &str = "test-token-123";

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub cart: Vec<CartLine>,
    pub next_line_id: i64,
    pub wishlist: Vec<WishlistEntry>,
    pub next_wishlist_id: i64,
    pub orders: Vec<OrderDetail>,
    pub reviews: Vec<ProductReview>,
    pub calls: Vec<RecordedCall>,
    pub reject_mutations: bool,
    pub malformed_cart: bool,
}

impl MockState {
    pub fn with_cart(lines: Vec<CartLine>) -> Self {
        let next_line_id = lines.iter().map(|line| line.id.0).max().unwrap_or(0) + 1;
        Self {
            cart: lines,
            next_line_id,
            next_wishlist_id: 500,
            ..Self::default()
        }
    }

    /// Calls other than the cart/wishlist refetches.
    pub fn mutations(&self) -> Vec<&RecordedCall> {
        self.calls
            .iter()
            .filter(|call| {
                !(call.method == Method::GET
                    && (call.path.ends_with("/cart") || call.path.ends_with("/wishlist")))
            })
            .collect()
    }
}

pub type SharedMockState = Arc<Mutex<MockState>>;

pub fn cart_line(id: i64, product_id: i64, quantity: u32) -> CartLine {
    CartLine {
        id: CartLineId(id),
        product: CartProduct {
            id: ProductId(product_id),
            name: format!("Product {product_id}"),
            price: Decimal::new(250, 2),
        },
        quantity,
        variation: None,
    }
}

pub fn order(id: i64, created_at: &str, statuses: &[(&str, &str)]) -> OrderDetail {
    let parse = |raw: &str| -> DateTime<Utc> { raw.parse().expect("rfc3339 timestamp") };
    OrderDetail {
        id: OrderId(id),
        created_at: parse(created_at),
        status: statuses
            .iter()
            .map(|(status, at)| StatusEvent::new(*status, parse(at)))
            .collect(),
        total: Some(Decimal::new(1250, 2)),
        items: Vec::new(),
    }
}

pub async fn spawn_storefront_server(state: MockState) -> (String, SharedMockState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let shared = Arc::new(Mutex::new(state));

    let app = Router::new()
        .route("/customer-api/cart", get(get_cart).post(save_cart_line))
        .route("/customer-api/remove-cart/:id", get(remove_cart_line))
        .route("/customer-api/my-orders", get(list_orders))
        .route("/customer-api/my-orders/:id", get(order_detail))
        .route("/customer-api/cancel-order/:id", post(cancel_order))
        .route(
            "/customer-api/product-review",
            get(list_reviews).post(create_review),
        )
        .route("/customer-api/wishlist", get(get_wishlist))
        .route("/customer-api/add-wishlist/:product", post(add_wishlist))
        .route("/customer-api/remove-wishlist/:id", get(remove_wishlist))
        .with_state(Arc::clone(&shared));

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}/"), shared)
}

fn envelope<T: serde::Serialize>(status: StatusCode, body: ApiEnvelope<T>) -> Response {
    (status, Json(body)).into_response()
}

fn ok<T: serde::Serialize>(data: T) -> Response {
    envelope(StatusCode::OK, ApiEnvelope::ok(data))
}

fn accepted() -> Response {
    envelope(
        StatusCode::OK,
        ApiEnvelope::<Value> {
            status: true,
            message: "ok".into(),
            data: None,
        },
    )
}

/// Records the call and checks the `Authorization: token <TEST_TOKEN>` header.
async fn record(
    state: &SharedMockState,
    method: Method,
    path: String,
    headers: &HeaderMap,
    body: Option<Value>,
    requires_auth: bool,
) -> Result<(), Response> {
    let authorization = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    state.lock().await.calls.push(RecordedCall {
        method,
        path,
        authorization: authorization.clone(),
        body,
    });

    let expected = format!("token {TEST_TOKEN}");
    if requires_auth && authorization.as_deref() != Some(expected.as_str()) {
        return Err(envelope(
            StatusCode::UNAUTHORIZED,
            ApiEnvelope::<Value>::rejected("Invalid token."),
        ));
    }
    Ok(())
}

async fn get_cart(State(state): State<SharedMockState>, headers: HeaderMap) -> Response {
    if let Err(response) = record(
        &state,
        Method::GET,
        "/customer-api/cart".into(),
        &headers,
        None,
        true,
    )
    .await
    {
        return response;
    }
    let guard = state.lock().await;
    if guard.malformed_cart {
        return (StatusCode::OK, "{\"status\": true, \"data\": [").into_response();
    }
    ok(guard.cart.clone())
}

async fn save_cart_line(
    State(state): State<SharedMockState>,
    headers: HeaderMap,
    Json(request): Json<CartLineRequest>,
) -> Response {
    let body = serde_json::to_value(&request).ok();
    if let Err(response) = record(
        &state,
        Method::POST,
        "/customer-api/cart".into(),
        &headers,
        body,
        true,
    )
    .await
    {
        return response;
    }

    let mut guard = state.lock().await;
    if guard.reject_mutations {
        return envelope(StatusCode::OK, ApiEnvelope::<Value>::rejected("Out of stock"));
    }
    match request.id {
        Some(id) => {
            let Some(line) = guard.cart.iter_mut().find(|line| line.id == id) else {
                return envelope(
                    StatusCode::NOT_FOUND,
                    ApiEnvelope::<Value>::rejected("Cart item not found"),
                );
            };
            line.quantity = request.quantity;
        }
        None => {
            let id = guard.next_line_id.max(1);
            guard.next_line_id = id + 1;
            let mut line = cart_line(id, request.product.0, request.quantity);
            line.variation = request.variation;
            guard.cart.push(line);
        }
    }
    accepted()
}

async fn remove_cart_line(
    State(state): State<SharedMockState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Err(response) = record(
        &state,
        Method::GET,
        format!("/customer-api/remove-cart/{id}"),
        &headers,
        None,
        true,
    )
    .await
    {
        return response;
    }
    let mut guard = state.lock().await;
    if guard.reject_mutations {
        return envelope(StatusCode::OK, ApiEnvelope::<Value>::rejected("Locked"));
    }
    guard.cart.retain(|line| line.id != CartLineId(id));
    accepted()
}

async fn list_orders(State(state): State<SharedMockState>, headers: HeaderMap) -> Response {
    if let Err(response) = record(
        &state,
        Method::GET,
        "/customer-api/my-orders".into(),
        &headers,
        None,
        true,
    )
    .await
    {
        return response;
    }
    let guard = state.lock().await;
    let summaries: Vec<OrderSummary> = guard
        .orders
        .iter()
        .map(|order| OrderSummary {
            id: order.id,
            created_at: order.created_at,
            total: order.total,
            current_status: order.status.last().map(|event| event.status.clone()),
        })
        .collect();
    ok(summaries)
}

async fn order_detail(
    State(state): State<SharedMockState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Err(response) = record(
        &state,
        Method::GET,
        format!("/customer-api/my-orders/{id}"),
        &headers,
        None,
        true,
    )
    .await
    {
        return response;
    }
    let guard = state.lock().await;
    match guard.orders.iter().find(|order| order.id == OrderId(id)) {
        Some(order) => ok(order.clone()),
        None => envelope(
            StatusCode::NOT_FOUND,
            ApiEnvelope::<Value>::rejected("Order not found"),
        ),
    }
}

async fn cancel_order(
    State(state): State<SharedMockState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(request): Json<CancelOrderRequest>,
) -> Response {
    let body = serde_json::to_value(&request).ok();
    if let Err(response) = record(
        &state,
        Method::POST,
        format!("/customer-api/cancel-order/{id}"),
        &headers,
        body,
        true,
    )
    .await
    {
        return response;
    }
    let mut guard = state.lock().await;
    let Some(order) = guard.orders.iter_mut().find(|order| order.id == OrderId(id)) else {
        return envelope(
            StatusCode::NOT_FOUND,
            ApiEnvelope::<Value>::rejected("Order not found"),
        );
    };
    let at = order.created_at;
    let mut event = StatusEvent::new("cancelled", at);
    event.cancel_reason = Some(request.reason);
    order.status.push(event);
    accepted()
}

#[derive(Deserialize)]
struct ReviewQuery {
    product: i64,
}

async fn list_reviews(
    State(state): State<SharedMockState>,
    headers: HeaderMap,
    Query(query): Query<ReviewQuery>,
) -> Response {
    if let Err(response) = record(
        &state,
        Method::GET,
        format!("/customer-api/product-review?product={}", query.product),
        &headers,
        None,
        false,
    )
    .await
    {
        return response;
    }
    let guard = state.lock().await;
    let reviews: Vec<ProductReview> = guard
        .reviews
        .iter()
        .filter(|review| review.product == ProductId(query.product))
        .cloned()
        .collect();
    ok(reviews)
}

async fn create_review(
    State(state): State<SharedMockState>,
    headers: HeaderMap,
    Json(review): Json<NewProductReview>,
) -> Response {
    let body = serde_json::to_value(&review).ok();
    if let Err(response) = record(
        &state,
        Method::POST,
        "/customer-api/product-review".into(),
        &headers,
        body,
        true,
    )
    .await
    {
        return response;
    }
    let mut guard = state.lock().await;
    let id = ReviewId(i64::try_from(guard.reviews.len()).unwrap_or(0) + 1);
    guard.reviews.push(ProductReview {
        id,
        product: review.product,
        rating: review.rating,
        review: review.review,
        user: Some("tester".into()),
        created_at: None,
    });
    accepted()
}

async fn get_wishlist(State(state): State<SharedMockState>, headers: HeaderMap) -> Response {
    if let Err(response) = record(
        &state,
        Method::GET,
        "/customer-api/wishlist".into(),
        &headers,
        None,
        true,
    )
    .await
    {
        return response;
    }
    ok(state.lock().await.wishlist.clone())
}

async fn add_wishlist(
    State(state): State<SharedMockState>,
    headers: HeaderMap,
    Path(product): Path<i64>,
) -> Response {
    if let Err(response) = record(
        &state,
        Method::POST,
        format!("/customer-api/add-wishlist/{product}"),
        &headers,
        None,
        true,
    )
    .await
    {
        return response;
    }
    let mut guard = state.lock().await;
    if guard.reject_mutations {
        return envelope(StatusCode::OK, ApiEnvelope::<Value>::rejected("Locked"));
    }
    if guard
        .wishlist
        .iter()
        .all(|entry| entry.product.id != ProductId(product))
    {
        let id = WishlistId(guard.next_wishlist_id.max(1));
        guard.next_wishlist_id = id.0 + 1;
        guard.wishlist.push(WishlistEntry {
            id,
            product: WishlistProduct {
                id: ProductId(product),
                name: format!("Product {product}"),
                price: Decimal::new(250, 2),
                image: None,
                seller: Some("Corner Store".into()),
            },
        });
    }
    accepted()
}

async fn remove_wishlist(
    State(state): State<SharedMockState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    if let Err(response) = record(
        &state,
        Method::GET,
        format!("/customer-api/remove-wishlist/{id}"),
        &headers,
        None,
        true,
    )
    .await
    {
        return response;
    }
    state
        .lock()
        .await
        .wishlist
        .retain(|entry| entry.id != WishlistId(id));
    accepted()
}
