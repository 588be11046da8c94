//! Cart quantity reconciliation.
//!
//! Quantities are keyed by product identity. Callers express an intent
//! (add, increment, decrement, remove) and the controller works out whether
//! that means creating, updating or deleting a cart line. A quantity that
//! would drop to zero always becomes a delete, never an update.
//!
//! Two controllers share the same planning rules: [`RemoteCartController`]
//! talks to the customer api and replaces its cached cart with a fresh fetch
//! after every mutation, and [`LocalCartController`] keeps a product to
//! quantity map for demo catalogs that have no backend cart.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use shared::{
    domain::{CartLineId, ProductId, VariationId},
    protocol::{CartLine, CartLineRequest},
};
use storage::Storage;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{api::CartBackend, error::ClientError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartIntent {
    Add { variation: Option<VariationId> },
    Increment,
    Decrement,
    Remove,
}

/// Quantity change for one product, independent of how the cart is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityPlan {
    Unchanged,
    /// Always at least one.
    Set(u32),
    Clear,
}

pub fn next_quantity(current: Option<u32>, intent: CartIntent) -> QuantityPlan {
    match (current, intent) {
        (None, CartIntent::Add { .. }) => QuantityPlan::Set(1),
        (None, _) => QuantityPlan::Unchanged,
        (Some(quantity), CartIntent::Add { .. } | CartIntent::Increment) => {
            QuantityPlan::Set(quantity.saturating_add(1))
        }
        (Some(quantity), CartIntent::Decrement) if quantity <= 1 => QuantityPlan::Clear,
        (Some(quantity), CartIntent::Decrement) => QuantityPlan::Set(quantity - 1),
        (Some(_), CartIntent::Remove) => QuantityPlan::Clear,
    }
}

/// Network call needed to carry out an intent against a server cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartEffect {
    Create(CartLineRequest),
    Update(CartLineRequest),
    Delete(CartLineId),
    Noop,
}

pub fn find_line(cart: &[CartLine], product_id: ProductId) -> Option<&CartLine> {
    cart.iter().find(|line| line.product.id == product_id)
}

/// Like [`find_line`], but a concrete variation only matches its own line.
pub fn find_line_for(
    cart: &[CartLine],
    product_id: ProductId,
    variation: Option<VariationId>,
) -> Option<&CartLine> {
    match variation {
        Some(variation) => cart
            .iter()
            .find(|line| line.product.id == product_id && line.variation == Some(variation)),
        None => find_line(cart, product_id),
    }
}

pub fn plan_mutation(cart: &[CartLine], product_id: ProductId, intent: CartIntent) -> CartEffect {
    let line = match intent {
        CartIntent::Add { variation } => find_line_for(cart, product_id, variation),
        _ => find_line(cart, product_id),
    };

    match (next_quantity(line.map(|line| line.quantity), intent), line) {
        (QuantityPlan::Unchanged, _) => CartEffect::Noop,
        (QuantityPlan::Set(quantity), None) => {
            let variation = match intent {
                CartIntent::Add { variation } => variation,
                _ => None,
            };
            CartEffect::Create(CartLineRequest {
                id: None,
                product: product_id,
                quantity,
                variation,
            })
        }
        (QuantityPlan::Set(quantity), Some(line)) => CartEffect::Update(CartLineRequest {
            id: Some(line.id),
            product: product_id,
            quantity,
            variation: line.variation,
        }),
        (QuantityPlan::Clear, Some(line)) => CartEffect::Delete(line.id),
        (QuantityPlan::Clear, None) => CartEffect::Noop,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No auth token; the caller should prompt for login.
    NotAuthenticated,
    /// The intent needs an existing line and there is none.
    NoCartLine,
}

#[derive(Debug)]
pub enum CartOutcome {
    /// `quantity` is the quantity of the line the intent targeted, zero when
    /// that line is gone.
    Applied { product_id: ProductId, quantity: u32 },
    Skipped(SkipReason),
    /// The server accepted the change but the cart could not be reloaded, so
    /// the cached cart is behind until the next refresh.
    Unsynced {
        product_id: ProductId,
        error: ClientError,
    },
    /// Nothing was changed and the previously known cart is still in place.
    Failed {
        product_id: ProductId,
        error: ClientError,
    },
}

impl CartOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// Whether the server holds the requested change.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Applied { .. } | Self::Unsynced { .. })
    }
}

/// Quantity of the line `effect` wrote to, looked up in a freshly fetched cart.
fn affected_quantity(cart: &[CartLine], effect: &CartEffect) -> u32 {
    let line = match effect {
        CartEffect::Create(request) | CartEffect::Update(request) => match request.id {
            Some(line_id) => cart.iter().find(|line| line.id == line_id),
            None => find_line_for(cart, request.product, request.variation),
        },
        CartEffect::Delete(line_id) => cart.iter().find(|line| line.id == *line_id),
        CartEffect::Noop => None,
    };
    line.map_or(0, |line| line.quantity)
}

/// Total quantity per product across all of its lines.
fn product_totals(cart: &[CartLine]) -> BTreeMap<ProductId, u32> {
    let mut totals = BTreeMap::new();
    for line in cart {
        let total = totals.entry(line.product.id).or_insert(0u32);
        *total = total.saturating_add(line.quantity);
    }
    totals
}

#[async_trait]
pub trait CartController: Send + Sync {
    /// Reloads the controller's view of the cart from its source of truth.
    async fn refresh(&self) -> Result<(), ClientError>;
    async fn apply(&self, product_id: ProductId, intent: CartIntent) -> CartOutcome;
    /// Summed over every line of the product, whatever its variation.
    async fn quantity_of(&self, product_id: ProductId) -> u32;
    async fn quantities(&self) -> BTreeMap<ProductId, u32>;

    async fn add(&self, product_id: ProductId, variation: Option<VariationId>) -> CartOutcome {
        self.apply(product_id, CartIntent::Add { variation }).await
    }

    async fn increment(&self, product_id: ProductId) -> CartOutcome {
        self.apply(product_id, CartIntent::Increment).await
    }

    async fn decrement(&self, product_id: ProductId) -> CartOutcome {
        self.apply(product_id, CartIntent::Decrement).await
    }

    async fn remove(&self, product_id: ProductId) -> CartOutcome {
        self.apply(product_id, CartIntent::Remove).await
    }
}

#[derive(Default)]
struct RemoteCartState {
    lines: Vec<CartLine>,
    /// Sequence number of the fetch that produced `lines`.
    applied_seq: u64,
    /// False until a fetch lands, and again after `clear`.
    loaded: bool,
}

/// Server-backed cart. Every mutation is followed by a full refetch, and a
/// cart that has not been loaded yet is fetched before the first mutation is
/// planned.
///
/// Mutations for the same product run one at a time. Each fetch takes a
/// sequence number before it is sent, and a response is only applied when its
/// number is newer than the one behind the cached cart, so a slow response can
/// not overwrite a later one.
pub struct RemoteCartController {
    backend: Arc<dyn CartBackend>,
    state: Mutex<RemoteCartState>,
    product_locks: Mutex<HashMap<ProductId, Arc<Mutex<()>>>>,
    next_seq: AtomicU64,
}

impl RemoteCartController {
    pub fn new(backend: Arc<dyn CartBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(RemoteCartState::default()),
            product_locks: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Last successfully fetched cart.
    pub async fn lines(&self) -> Vec<CartLine> {
        self.state.lock().await.lines.clone()
    }

    /// Forgets the cached cart and invalidates fetches still in flight.
    pub async fn clear(&self) {
        let seq = self.take_seq();
        {
            let mut guard = self.state.lock().await;
            guard.lines.clear();
            guard.applied_seq = seq;
            guard.loaded = false;
        }
        self.product_locks
            .lock()
            .await
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    fn take_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Lock entries nobody holds are pruned here, so the map only grows with
    /// products that have a mutation in flight.
    async fn product_lock(&self, product_id: ProductId) -> Arc<Mutex<()>> {
        let mut locks = self.product_locks.lock().await;
        locks.retain(|id, lock| *id == product_id || Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(product_id).or_default())
    }

    /// Fetches the cart and installs it unless a newer snapshot already landed.
    /// Returns whether the snapshot was applied.
    async fn fetch_and_apply(&self) -> Result<bool, ClientError> {
        let seq = self.take_seq();
        let lines = self.backend.fetch_cart().await?;

        let mut guard = self.state.lock().await;
        if seq <= guard.applied_seq {
            debug!(
                "cart: dropping stale snapshot seq={seq} applied_seq={}",
                guard.applied_seq
            );
            return Ok(false);
        }
        guard.lines = lines;
        guard.applied_seq = seq;
        guard.loaded = true;
        Ok(true)
    }

    async fn execute(&self, effect: &CartEffect) -> Result<(), ClientError> {
        match effect {
            CartEffect::Create(request) | CartEffect::Update(request) => {
                self.backend.save_cart_line(request).await
            }
            CartEffect::Delete(line_id) => self.backend.remove_cart_line(*line_id).await,
            CartEffect::Noop => Ok(()),
        }
    }
}

#[async_trait]
impl CartController for RemoteCartController {
    async fn refresh(&self) -> Result<(), ClientError> {
        self.fetch_and_apply().await.map(|_| ())
    }

    async fn apply(&self, product_id: ProductId, intent: CartIntent) -> CartOutcome {
        if !self.backend.is_authenticated().await {
            warn!("cart: {intent:?} product={product_id} skipped, not logged in");
            return CartOutcome::Skipped(SkipReason::NotAuthenticated);
        }

        let lock = self.product_lock(product_id).await;
        let _serialized = lock.lock().await;

        let loaded = self.state.lock().await.loaded;
        if !loaded {
            debug!("cart: loading cart before {intent:?} product={product_id}");
            if let Err(error) = self.fetch_and_apply().await {
                error!("cart: could not load cart before {intent:?} product={product_id}: {error}");
                return CartOutcome::Failed { product_id, error };
            }
        }

        let effect = {
            let guard = self.state.lock().await;
            plan_mutation(&guard.lines, product_id, intent)
        };
        if effect == CartEffect::Noop {
            debug!("cart: {intent:?} product={product_id} has no cart line");
            return CartOutcome::Skipped(SkipReason::NoCartLine);
        }

        if let Err(error) = self.execute(&effect).await {
            error!("cart: {effect:?} failed for product={product_id}: {error}");
            return CartOutcome::Failed { product_id, error };
        }

        if let Err(error) = self.fetch_and_apply().await {
            warn!("cart: {effect:?} accepted but refetch failed for product={product_id}: {error}");
            return CartOutcome::Unsynced { product_id, error };
        }

        let quantity = affected_quantity(&self.state.lock().await.lines, &effect);
        info!("cart: applied {effect:?} product={product_id} quantity={quantity}");
        CartOutcome::Applied {
            product_id,
            quantity,
        }
    }

    async fn quantity_of(&self, product_id: ProductId) -> u32 {
        let guard = self.state.lock().await;
        product_totals(&guard.lines)
            .get(&product_id)
            .copied()
            .unwrap_or(0)
    }

    async fn quantities(&self) -> BTreeMap<ProductId, u32> {
        product_totals(&self.state.lock().await.lines)
    }
}

/// Cart for demo catalogs without a backend cart. The in-memory map is the
/// single source of truth and is written through to storage when one is
/// attached.
pub struct LocalCartController {
    storage: Option<Storage>,
    quantities: Mutex<BTreeMap<ProductId, u32>>,
}

impl LocalCartController {
    pub fn in_memory() -> Self {
        Self {
            storage: None,
            quantities: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn hydrate(storage: Storage) -> Result<Self, ClientError> {
        let quantities = storage.local_cart().await?;
        debug!("cart: hydrated local cart products={}", quantities.len());
        Ok(Self {
            storage: Some(storage),
            quantities: Mutex::new(quantities),
        })
    }

    /// Empties the in-memory cart without touching storage.
    pub async fn reset(&self) {
        self.quantities.lock().await.clear();
    }
}

#[async_trait]
impl CartController for LocalCartController {
    async fn refresh(&self) -> Result<(), ClientError> {
        if let Some(storage) = &self.storage {
            let stored = storage.local_cart().await?;
            *self.quantities.lock().await = stored;
        }
        Ok(())
    }

    async fn apply(&self, product_id: ProductId, intent: CartIntent) -> CartOutcome {
        let mut quantities = self.quantities.lock().await;
        let next = match next_quantity(quantities.get(&product_id).copied(), intent) {
            QuantityPlan::Unchanged => {
                return CartOutcome::Skipped(SkipReason::NoCartLine);
            }
            QuantityPlan::Set(quantity) => quantity,
            QuantityPlan::Clear => 0,
        };

        if let Some(storage) = &self.storage {
            if let Err(err) = storage.set_local_quantity(product_id, next).await {
                let error = ClientError::from(err);
                error!("cart: failed to persist local quantity product={product_id}: {error}");
                return CartOutcome::Failed { product_id, error };
            }
        }

        if next == 0 {
            quantities.remove(&product_id);
        } else {
            quantities.insert(product_id, next);
        }
        CartOutcome::Applied {
            product_id,
            quantity: next,
        }
    }

    async fn quantity_of(&self, product_id: ProductId) -> u32 {
        self.quantities
            .lock()
            .await
            .get(&product_id)
            .copied()
            .unwrap_or(0)
    }

    async fn quantities(&self) -> BTreeMap<ProductId, u32> {
        self.quantities.lock().await.clone()
    }
}

#[cfg(test)]
#[path = "tests/cart_tests.rs"]
mod tests;
