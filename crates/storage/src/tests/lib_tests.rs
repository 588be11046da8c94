use super::*;

fn wishlist_item(product_id: i64, name: &str) -> StoredWishlistItem {
    StoredWishlistItem {
        item: WishlistItem {
            product_id: ProductId(product_id),
            name: name.to_string(),
            price: Decimal::new(1999, 2),
            image: Some(format!("https://cdn.example/{product_id}.png")),
            seller: Some("Corner Store".to_string()),
        },
        wishlist_id: None,
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("storefront.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn key_value_rows_round_trip_and_overwrite() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    assert_eq!(storage.get_value("auth_token").await.expect("read"), None);

    storage.put_value("auth_token", "abc").await.expect("write");
    storage.put_value("auth_token", "def").await.expect("overwrite");
    assert_eq!(
        storage.get_value("auth_token").await.expect("read").as_deref(),
        Some("def")
    );

    storage.delete_value("auth_token").await.expect("delete");
    assert_eq!(storage.get_value("auth_token").await.expect("read"), None);
}

#[tokio::test]
async fn zero_quantity_deletes_local_cart_row() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .set_local_quantity(ProductId(42), 3)
        .await
        .expect("store");
    storage
        .set_local_quantity(ProductId(43), 1)
        .await
        .expect("store");
    storage
        .set_local_quantity(ProductId(43), 0)
        .await
        .expect("delete");

    let cart = storage.local_cart().await.expect("load");
    assert_eq!(cart.len(), 1);
    assert_eq!(cart.get(&ProductId(42)), Some(&3));
}

#[tokio::test]
async fn wishlist_upsert_keeps_known_server_id() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let mut mirrored = wishlist_item(42, "Tea");
    mirrored.wishlist_id = Some(WishlistId(900));
    storage.upsert_wishlist_item(&mirrored).await.expect("store");

    storage
        .upsert_wishlist_item(&wishlist_item(42, "Green Tea"))
        .await
        .expect("update");

    let items = storage.wishlist_items().await.expect("load");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].item.name, "Green Tea");
    assert_eq!(items[0].wishlist_id, Some(WishlistId(900)));
    assert_eq!(items[0].item.price, Decimal::new(1999, 2));
}

#[tokio::test]
async fn removing_wishlist_item_returns_removed_row() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .upsert_wishlist_item(&wishlist_item(42, "Tea"))
        .await
        .expect("store");

    let removed = storage
        .remove_wishlist_item(ProductId(42))
        .await
        .expect("remove");
    assert_eq!(removed.map(|row| row.item.name), Some("Tea".to_string()));
    assert!(storage
        .remove_wishlist_item(ProductId(42))
        .await
        .expect("remove again")
        .is_none());
}

#[tokio::test]
async fn clear_all_drops_every_customer_row() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.put_value("auth_token", "abc").await.expect("token");
    storage
        .set_local_quantity(ProductId(1), 2)
        .await
        .expect("cart");
    storage
        .replace_wishlist(&[wishlist_item(1, "Tea"), wishlist_item(2, "Rice")])
        .await
        .expect("wishlist");

    storage.clear_all().await.expect("clear");

    assert_eq!(storage.get_value("auth_token").await.expect("read"), None);
    assert!(storage.local_cart().await.expect("cart").is_empty());
    assert!(storage.wishlist_items().await.expect("wishlist").is_empty());
}

#[test]
fn memory_and_non_sqlite_urls_have_no_parent_dir() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(sqlite_path("postgres://localhost/db"), None);
    assert_eq!(
        sqlite_path("sqlite://./data/app.db?mode=rwc"),
        Some(PathBuf::from("./data/app.db"))
    );
}
