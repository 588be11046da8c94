//! Application state lifecycle: hydrate from storage on start, log in, log out.

use std::sync::Arc;

use storage::Storage;
use tracing::{info, warn};

use crate::{
    api::{AuthToken, StorefrontApi},
    cart::{CartController, LocalCartController, RemoteCartController},
    config::Settings,
    error::ClientResult,
    orders::OrderTracker,
    wishlist::WishlistService,
};

const AUTH_TOKEN_KEY: &str = "auth_token";

/// Everything a signed-in (or anonymous) customer session needs, wired to one
/// api client and one storage handle.
pub struct AppSession {
    storage: Storage,
    api: Arc<StorefrontApi>,
    cart: Arc<RemoteCartController>,
    demo_cart: Arc<LocalCartController>,
    wishlist: Arc<WishlistService>,
}

impl AppSession {
    /// Opens storage and the api client described by `settings`, then hydrates.
    pub async fn open(settings: &Settings) -> ClientResult<Self> {
        let database_url = crate::config::normalize_database_url(&settings.database_url);
        let storage = Storage::new(&database_url).await?;
        let api = StorefrontApi::new(&settings.api_base_url, settings.request_timeout())?;
        Self::hydrate(storage, Arc::new(api)).await
    }

    /// Restores the persisted token, if any, and loads the local cart.
    pub async fn hydrate(storage: Storage, api: Arc<StorefrontApi>) -> ClientResult<Self> {
        let token = match storage.get_value(AUTH_TOKEN_KEY).await? {
            Some(raw) => match AuthToken::new(raw) {
                Ok(token) => Some(token),
                Err(err) => {
                    warn!("session: discarding stored token err={err}");
                    storage.delete_value(AUTH_TOKEN_KEY).await?;
                    None
                }
            },
            None => None,
        };
        let restored = token.is_some();
        api.set_token(token).await;

        let demo_cart = LocalCartController::hydrate(storage.clone()).await?;
        let session = Self {
            cart: Arc::new(RemoteCartController::new(api.clone())),
            wishlist: Arc::new(WishlistService::new(storage.clone(), api.clone())),
            demo_cart: Arc::new(demo_cart),
            storage,
            api,
        };
        info!("session: hydrated logged_in={restored}");
        Ok(session)
    }

    /// Persists the token and best-effort loads the customer's cart and wishlist.
    pub async fn login(&self, raw_token: &str) -> ClientResult<()> {
        let token = AuthToken::new(raw_token)?;
        self.storage
            .put_value(AUTH_TOKEN_KEY, token.as_str())
            .await?;
        self.api.set_token(Some(token)).await;
        info!("session: logged in");

        if let Err(err) = self.cart.refresh().await {
            warn!("session: initial cart fetch failed err={err}");
        }
        if let Err(err) = self.wishlist.sync().await {
            warn!("session: initial wishlist sync failed err={err}");
        }
        Ok(())
    }

    /// Forgets the token and every piece of customer state on this device.
    pub async fn logout(&self) -> ClientResult<()> {
        self.api.set_token(None).await;
        self.storage.clear_all().await?;
        self.cart.clear().await;
        self.demo_cart.reset().await;
        info!("session: logged out");
        Ok(())
    }

    pub async fn is_logged_in(&self) -> bool {
        self.api.is_authenticated().await
    }

    pub fn api(&self) -> &Arc<StorefrontApi> {
        &self.api
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn cart(&self) -> &Arc<RemoteCartController> {
        &self.cart
    }

    pub fn demo_cart(&self) -> &Arc<LocalCartController> {
        &self.demo_cart
    }

    pub fn wishlist(&self) -> &Arc<WishlistService> {
        &self.wishlist
    }

    pub fn orders(&self) -> OrderTracker {
        OrderTracker::new(self.api.clone())
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
