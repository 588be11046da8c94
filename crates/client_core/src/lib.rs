//! Client core for the storefront app: the customer api client, cart
//! reconciliation, wishlist mirroring, order tracking and the session that
//! wires them to device storage.

pub mod api;
pub mod cart;
pub mod config;
pub mod error;
pub mod orders;
pub mod session;
pub mod wishlist;

#[cfg(test)]
mod test_support;

pub use api::{AuthToken, StorefrontApi};
pub use cart::{CartController, CartIntent, CartOutcome, LocalCartController, RemoteCartController};
pub use error::{ClientError, ClientResult};
pub use orders::OrderTracker;
pub use session::AppSession;
pub use wishlist::{WishlistService, WishlistToggle};
