use std::sync::Arc;

use shared::{
    domain::{ProductId, WishlistId},
    protocol::WishlistItem,
};
use storage::{Storage, StoredWishlistItem};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{api::WishlistBackend, error::ClientResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WishlistToggle {
    Added,
    Removed,
}

/// Device wishlist keyed by product id, mirrored to the server while signed in.
///
/// The local set always changes on toggle. Server calls are best effort: a
/// failure is logged and the next [`WishlistService::sync`] reconciles.
pub struct WishlistService {
    storage: Storage,
    backend: Arc<dyn WishlistBackend>,
    toggle_lock: Mutex<()>,
}

impl WishlistService {
    pub fn new(storage: Storage, backend: Arc<dyn WishlistBackend>) -> Self {
        Self {
            storage,
            backend,
            toggle_lock: Mutex::new(()),
        }
    }

    pub async fn items(&self) -> ClientResult<Vec<WishlistItem>> {
        let stored = self.storage.wishlist_items().await?;
        Ok(stored.into_iter().map(|stored| stored.item).collect())
    }

    pub async fn contains(&self, product_id: ProductId) -> ClientResult<bool> {
        let stored = self.storage.wishlist_items().await?;
        Ok(stored
            .iter()
            .any(|stored| stored.item.product_id == product_id))
    }

    pub async fn toggle(&self, item: WishlistItem) -> ClientResult<WishlistToggle> {
        let _serialized = self.toggle_lock.lock().await;
        let product_id = item.product_id;

        if let Some(removed) = self.storage.remove_wishlist_item(product_id).await? {
            info!("wishlist: removed product={product_id}");
            if self.backend.is_authenticated().await {
                self.remove_remote(product_id, removed.wishlist_id).await;
            }
            return Ok(WishlistToggle::Removed);
        }

        self.storage
            .upsert_wishlist_item(&StoredWishlistItem {
                item,
                wishlist_id: None,
            })
            .await?;
        info!("wishlist: added product={product_id}");
        if self.backend.is_authenticated().await {
            self.add_remote(product_id).await?;
        }
        Ok(WishlistToggle::Added)
    }

    /// Replaces the local set with the server list. Returns `false` without
    /// touching anything when signed out.
    pub async fn sync(&self) -> ClientResult<bool> {
        if !self.backend.is_authenticated().await {
            debug!("wishlist: sync skipped, not logged in");
            return Ok(false);
        }
        let entries = self.backend.wishlist().await?;
        let stored: Vec<StoredWishlistItem> = entries
            .iter()
            .map(|entry| StoredWishlistItem {
                item: entry.item(),
                wishlist_id: Some(entry.id),
            })
            .collect();
        self.storage.replace_wishlist(&stored).await?;
        info!("wishlist: synced items={}", stored.len());
        Ok(true)
    }

    /// Adds on the server and records the row id it assigned.
    async fn add_remote(&self, product_id: ProductId) -> ClientResult<()> {
        if let Err(err) = self.backend.add_wishlist(product_id).await {
            warn!("wishlist: server add failed product={product_id} err={err}");
            return Ok(());
        }
        match self.lookup_remote_id(product_id).await {
            Some(wishlist_id) => {
                let stored = self.storage.wishlist_items().await?;
                if let Some(mut entry) = stored
                    .into_iter()
                    .find(|stored| stored.item.product_id == product_id)
                {
                    entry.wishlist_id = Some(wishlist_id);
                    self.storage.upsert_wishlist_item(&entry).await?;
                }
            }
            None => debug!("wishlist: server row for product={product_id} not found yet"),
        }
        Ok(())
    }

    async fn remove_remote(&self, product_id: ProductId, known: Option<WishlistId>) {
        let wishlist_id = match known {
            Some(id) => Some(id),
            None => self.lookup_remote_id(product_id).await,
        };
        let Some(wishlist_id) = wishlist_id else {
            debug!("wishlist: product={product_id} has no server row to remove");
            return;
        };
        if let Err(err) = self.backend.remove_wishlist(wishlist_id).await {
            warn!(
                "wishlist: server remove failed product={product_id} wishlist_id={wishlist_id} err={err}"
            );
        }
    }

    async fn lookup_remote_id(&self, product_id: ProductId) -> Option<WishlistId> {
        match self.backend.wishlist().await {
            Ok(entries) => entries
                .iter()
                .find(|entry| entry.product.id == product_id)
                .map(|entry| entry.id),
            Err(err) => {
                warn!("wishlist: failed to load server wishlist err={err}");
                None
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/wishlist_tests.rs"]
mod tests;
