//! Guest to signed-in transitions: cart push at login and guest cart replay.

use pocketshop_client::Shop;
use pocketshop_client::events::SessionEvent;
use pocketshop_client::storage::keys;
use pocketshop_core::{Cart, OwnerMode, ProductId, UserId};
use pocketshop_integration_tests::MockBackend;
use tempfile::TempDir;

async fn shop(backend: &MockBackend, dir: &TempDir) -> Shop {
    let config = backend
        .client_config(dir.path().join("state.json"))
        .expect("Failed to build config");
    let shop = Shop::connect(config).await.expect("Failed to connect");
    shop.start().await;
    shop
}

#[tokio::test]
async fn test_login_applies_server_cart_before_returning() {
    let backend = MockBackend::start().await.expect("Failed to start backend");
    let user = backend.add_user("ada@example.com", "hunter22");
    backend.seed_cart(&user, &[("A", 2), ("B", 1)]);
    let dir = TempDir::new().expect("Failed to create temp dir");
    let shop = shop(&backend, &dir).await;
    let mut events = shop.subscribe();

    shop.login("ada@example.com", "hunter22")
        .await
        .expect("login");

    let cart = shop.cart();
    assert_eq!(cart.total_items(), 3);
    assert_eq!(
        cart.quantity_of(&ProductId::new("A")).map(|q| q.get()),
        Some(2)
    );
    assert_eq!(shop.store().mode(), OwnerMode::Authenticated);
    assert_eq!(shop.session().user_id(), Some(UserId::new(user.as_str())));

    assert_eq!(events.recv().await.expect("event"), SessionEvent::Cleared);
    assert!(matches!(
        events.recv().await.expect("event"),
        SessionEvent::SignedIn { .. }
    ));
    assert!(matches!(
        events.recv().await.expect("event"),
        SessionEvent::CartUpdated { .. }
    ));
}

#[tokio::test]
async fn test_guest_item_moves_to_server_on_login() {
    let backend = MockBackend::start().await.expect("Failed to start backend");
    let user = backend.add_user("ada@example.com", "hunter22");
    let dir = TempDir::new().expect("Failed to create temp dir");
    let shop = shop(&backend, &dir).await;

    shop.add_to_cart(&ProductId::new("X")).await.expect("guest add");
    shop.login("ada@example.com", "hunter22")
        .await
        .expect("login");

    assert_eq!(backend.quantity(&user, "X"), 1);
    assert_eq!(
        shop.storage()
            .get(keys::CART_ITEMS)
            .await
            .expect("read cart")
            .as_deref(),
        Some("[]")
    );
    assert_eq!(
        shop.cart().quantity_of(&ProductId::new("X")).map(|q| q.get()),
        Some(1)
    );
}

#[tokio::test]
async fn test_sync_replays_one_add_per_unit() {
    let backend = MockBackend::start().await.expect("Failed to start backend");
    backend.add_user("ada@example.com", "hunter22");
    let dir = TempDir::new().expect("Failed to create temp dir");
    let shop = shop(&backend, &dir).await;
    shop.login("ada@example.com", "hunter22")
        .await
        .expect("login");
    assert_eq!(backend.add_calls("A"), 0);

    let guest = Cart::from_raw([(ProductId::new("A"), 2), (ProductId::new("B"), 1)]);
    let report = shop
        .engine()
        .sync_local_cart_to_server(&guest)
        .await
        .expect("sync");

    assert_eq!(report.replayed, 3);
    assert!(report.is_complete());
    assert_eq!(backend.add_calls("A"), 2);
    assert_eq!(backend.add_calls("B"), 1);
    assert_eq!(
        shop.storage()
            .get(keys::CART_ITEMS)
            .await
            .expect("read cart")
            .as_deref(),
        Some("[]")
    );
}

#[tokio::test]
async fn test_sync_merges_by_addition() {
    let backend = MockBackend::start().await.expect("Failed to start backend");
    let user = backend.add_user("ada@example.com", "hunter22");
    backend.seed_cart(&user, &[("A", 3)]);
    let dir = TempDir::new().expect("Failed to create temp dir");
    let shop = shop(&backend, &dir).await;

    shop.update_cart_item_count(&ProductId::new("A"), 2)
        .await
        .expect("guest set");
    shop.login("ada@example.com", "hunter22")
        .await
        .expect("login");

    assert_eq!(backend.quantity(&user, "A"), 5);
    assert_eq!(shop.total_cart_items(), 5);
}

#[tokio::test]
async fn test_login_sets_refresh_signal_once() {
    let backend = MockBackend::start().await.expect("Failed to start backend");
    let user = backend.add_user("ada@example.com", "hunter22");
    let dir = TempDir::new().expect("Failed to create temp dir");
    let shop = shop(&backend, &dir).await;

    let before = shop.mount().await;
    assert!(!before.refreshed);

    shop.login("ada@example.com", "hunter22")
        .await
        .expect("login");
    backend.seed_cart(&user, &[("late", 1)]);

    let after = shop.mount().await;
    assert!(after.refreshed);
    assert_ne!(after.remount_key, before.remount_key);
    assert_eq!(shop.total_cart_items(), 1);

    let again = shop.mount().await;
    assert!(!again.refreshed);
    assert_eq!(again.remount_key, after.remount_key);
}

#[tokio::test]
async fn test_switching_users_never_shows_previous_cart() {
    let backend = MockBackend::start().await.expect("Failed to start backend");
    let first = backend.add_user("ada@example.com", "hunter22");
    let second = backend.add_user("bob@example.com", "hunter22");
    backend.seed_cart(&first, &[("ada-only", 4)]);
    backend.seed_cart(&second, &[("bob-only", 1)]);
    let dir = TempDir::new().expect("Failed to create temp dir");
    let shop = shop(&backend, &dir).await;

    shop.login("ada@example.com", "hunter22")
        .await
        .expect("first login");
    shop.login("bob@example.com", "hunter22")
        .await
        .expect("second login");

    assert!(shop.cart().quantity_of(&ProductId::new("ada-only")).is_none());
    assert_eq!(shop.total_cart_items(), 1);
    // The previous user's lines were not replayed into the new account
    assert_eq!(backend.quantity(&second, "ada-only"), 0);
    assert_eq!(backend.quantity(&first, "ada-only"), 4);
}
