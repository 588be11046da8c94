use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    config::{load_settings_from, DEFAULT_SETTINGS_FILE},
    AppSession, CartController, CartOutcome, WishlistToggle,
};
use rust_decimal::Decimal;
use shared::{
    domain::{OrderId, ProductId, VariationId},
    protocol::{NewProductReview, WishlistItem},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Storefront customer client")]
struct Cli {
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,
    /// Overrides the configured api base url.
    #[arg(long)]
    api_url: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        token: String,
    },
    Logout,
    Status,
    /// Server cart of the signed-in customer.
    #[command(subcommand)]
    Cart(CartCommand),
    /// Device-local cart used by demo catalogs.
    #[command(subcommand)]
    DemoCart(CartCommand),
    #[command(subcommand)]
    Orders(OrdersCommand),
    #[command(subcommand)]
    Reviews(ReviewsCommand),
    #[command(subcommand)]
    Wishlist(WishlistCommand),
}

#[derive(Subcommand, Debug)]
enum CartCommand {
    List,
    #[command(flatten)]
    Change(CartChange),
}

#[derive(Subcommand, Debug)]
enum CartChange {
    Add {
        product: i64,
        #[arg(long)]
        variation: Option<i64>,
    },
    Inc {
        product: i64,
    },
    Dec {
        product: i64,
    },
    Remove {
        product: i64,
    },
}

#[derive(Subcommand, Debug)]
enum OrdersCommand {
    List,
    Timeline {
        order_id: i64,
    },
    Cancel {
        order_id: i64,
        #[arg(long)]
        reason: String,
    },
}

#[derive(Subcommand, Debug)]
enum ReviewsCommand {
    List {
        product: i64,
    },
    Post {
        product: i64,
        rating: u8,
        review: String,
    },
}

#[derive(Subcommand, Debug)]
enum WishlistCommand {
    List,
    Toggle {
        product: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        price: Decimal,
        #[arg(long)]
        seller: Option<String>,
    },
    Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings_from(&cli.config);
    if let Some(api_url) = cli.api_url {
        settings.api_base_url = api_url;
    }
    if let Some(database_url) = cli.database_url {
        settings.database_url = database_url;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_filter.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    info!(
        "storefront: api_base_url={} database_url={}",
        settings.api_base_url, settings.database_url
    );

    let session = AppSession::open(&settings)
        .await
        .context("failed to open storefront session")?;

    match cli.command {
        Command::Login { token } => {
            session.login(&token).await?;
            println!("logged in");
        }
        Command::Logout => {
            session.logout().await?;
            println!("logged out");
        }
        Command::Status => {
            println!("logged_in={}", session.is_logged_in().await);
            println!("api_base_url={}", session.api().base_url());
        }
        Command::Cart(CartCommand::List) => {
            session.cart().refresh().await?;
            for line in session.cart().lines().await {
                println!(
                    "line={} product={} {} qty={} unit={} subtotal={}",
                    line.id,
                    line.product.id,
                    line.product.name,
                    line.quantity,
                    line.unit_price(),
                    line.subtotal()
                );
            }
        }
        Command::Cart(CartCommand::Change(change)) => {
            report(run_cart(session.cart().as_ref(), change).await)?;
        }
        Command::DemoCart(CartCommand::List) => {
            for (product_id, quantity) in session.demo_cart().quantities().await {
                println!("product={product_id} qty={quantity}");
            }
        }
        Command::DemoCart(CartCommand::Change(change)) => {
            report(run_cart(session.demo_cart().as_ref(), change).await)?;
        }
        Command::Orders(OrdersCommand::List) => {
            for order in session.orders().list().await? {
                println!(
                    "order={} placed={} status={} total={}",
                    order.id,
                    order.created_at.to_rfc3339(),
                    order.current_status.as_deref().unwrap_or("placed"),
                    order.total.map(|t| t.to_string()).unwrap_or_default()
                );
            }
        }
        Command::Orders(OrdersCommand::Timeline { order_id }) => {
            let (detail, timeline) = session.orders().timeline(OrderId(order_id)).await?;
            println!("order={} cancelled={}", detail.id, timeline.is_cancelled);
            if let Some(status) = &timeline.unrecognized_status {
                println!("unrecognized status: {status}");
            }
            for (index, step) in timeline.steps.iter().enumerate() {
                let marker = if index == timeline.active_index { ">" } else { " " };
                let time = step.time.map(|t| t.to_rfc3339()).unwrap_or_default();
                println!("{marker} {} {time}", step.label);
            }
        }
        Command::Orders(OrdersCommand::Cancel { order_id, reason }) => {
            session.orders().cancel(OrderId(order_id), &reason).await?;
            println!("cancelled order={order_id}");
        }
        Command::Reviews(ReviewsCommand::List { product }) => {
            let reviews = session.api().product_reviews(ProductId(product)).await?;
            println!("{}", serde_json::to_string_pretty(&reviews)?);
        }
        Command::Reviews(ReviewsCommand::Post {
            product,
            rating,
            review,
        }) => {
            session
                .api()
                .post_review(&NewProductReview {
                    product: ProductId(product),
                    rating,
                    review,
                })
                .await?;
            println!("review posted for product={product}");
        }
        Command::Wishlist(WishlistCommand::List) => {
            for item in session.wishlist().items().await? {
                println!(
                    "product={} {} price={} seller={}",
                    item.product_id,
                    item.name,
                    item.price,
                    item.seller.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Wishlist(WishlistCommand::Toggle {
            product,
            name,
            price,
            seller,
        }) => {
            let toggled = session
                .wishlist()
                .toggle(WishlistItem {
                    product_id: ProductId(product),
                    name,
                    price,
                    image: None,
                    seller,
                })
                .await?;
            match toggled {
                WishlistToggle::Added => println!("added product={product}"),
                WishlistToggle::Removed => println!("removed product={product}"),
            }
        }
        Command::Wishlist(WishlistCommand::Sync) => {
            if session.wishlist().sync().await? {
                println!("wishlist synced");
            } else {
                println!("not logged in, nothing to sync");
            }
        }
    }

    Ok(())
}

async fn run_cart(cart: &dyn CartController, change: CartChange) -> CartOutcome {
    match change {
        CartChange::Add { product, variation } => {
            cart.add(ProductId(product), variation.map(VariationId)).await
        }
        CartChange::Inc { product } => cart.increment(ProductId(product)).await,
        CartChange::Dec { product } => cart.decrement(ProductId(product)).await,
        CartChange::Remove { product } => cart.remove(ProductId(product)).await,
    }
}

/// Prints the outcome; an uncommitted change becomes an error so the process
/// exits non-zero.
fn report(outcome: CartOutcome) -> Result<()> {
    match outcome {
        CartOutcome::Applied {
            product_id,
            quantity,
        } => println!("product={product_id} qty={quantity}"),
        CartOutcome::Skipped(reason) => println!("skipped: {reason:?}"),
        CartOutcome::Unsynced { product_id, error } => {
            eprintln!("product={product_id} updated, but the cart could not be reloaded: {error}")
        }
        CartOutcome::Failed { product_id, error } => {
            return Err(anyhow::Error::new(error)
                .context(format!("cart update failed for product={product_id}")));
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
