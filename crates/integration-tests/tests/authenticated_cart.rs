//! Signed-in cart mutations against the mock backend.

use pocketshop_client::{Shop, ShopError};
use pocketshop_client::cart::CartError;
use pocketshop_client::storage::keys;
use pocketshop_core::{OwnerMode, ProductId, UserId};
use pocketshop_integration_tests::MockBackend;
use tempfile::TempDir;

async fn signed_in(backend: &MockBackend, dir: &TempDir, email: &str) -> Shop {
    let config = backend
        .client_config(dir.path().join("state.json"))
        .expect("Failed to build config");
    let shop = Shop::connect(config).await.expect("Failed to connect");
    shop.start().await;
    shop.login(email, "hunter22").await.expect("login");
    shop
}

#[tokio::test]
async fn test_add_writes_server_cart_and_reverifies_identity() {
    let backend = MockBackend::start().await.expect("Failed to start backend");
    let user = backend.add_user("ada@example.com", "hunter22");
    let dir = TempDir::new().expect("Failed to create temp dir");
    let shop = signed_in(&backend, &dir, "ada@example.com").await;
    let me_before = backend.requests("me");

    let p = ProductId::new("P");
    shop.add_to_cart(&p).await.expect("first add");
    shop.add_to_cart(&p).await.expect("second add");

    assert_eq!(backend.quantity(&user, "P"), 2);
    assert_eq!(shop.cart().quantity_of(&p).map(|q| q.get()), Some(2));
    assert_eq!(backend.requests("me"), me_before + 2);
    assert_eq!(shop.store().mode(), OwnerMode::Authenticated);
}

#[tokio::test]
async fn test_count_zero_matches_remove_when_signed_in() {
    let backend = MockBackend::start().await.expect("Failed to start backend");
    let first = backend.add_user("ada@example.com", "hunter22");
    let second = backend.add_user("bob@example.com", "hunter22");
    backend.seed_cart(&first, &[("P", 2), ("Q", 1)]);
    backend.seed_cart(&second, &[("P", 2), ("Q", 1)]);
    let dir_a = TempDir::new().expect("Failed to create temp dir");
    let dir_b = TempDir::new().expect("Failed to create temp dir");
    let by_count = signed_in(&backend, &dir_a, "ada@example.com").await;
    let by_remove = signed_in(&backend, &dir_b, "bob@example.com").await;

    let p = ProductId::new("P");
    by_count.update_cart_item_count(&p, 0).await.expect("count 0");
    by_remove.remove_from_cart(&p).await.expect("remove");

    assert_eq!(backend.cart(&first), backend.cart(&second));
    assert_eq!(by_count.cart(), by_remove.cart());
    assert!(by_count.cart().quantity_of(&p).is_none());
}

#[tokio::test]
async fn test_set_count_is_remove_then_adds() {
    let backend = MockBackend::start().await.expect("Failed to start backend");
    let user = backend.add_user("ada@example.com", "hunter22");
    backend.seed_cart(&user, &[("P", 5)]);
    let dir = TempDir::new().expect("Failed to create temp dir");
    let shop = signed_in(&backend, &dir, "ada@example.com").await;

    let p = ProductId::new("P");
    shop.update_cart_item_count(&p, 3).await.expect("set 3");

    assert_eq!(backend.quantity(&user, "P"), 3);
    assert_eq!(backend.add_calls("P"), 3);
    assert_eq!(shop.cart().quantity_of(&p).map(|q| q.get()), Some(3));
}

#[tokio::test]
async fn test_overlapping_adds_on_one_line_all_land() {
    let backend = MockBackend::start().await.expect("Failed to start backend");
    let user = backend.add_user("ada@example.com", "hunter22");
    let dir = TempDir::new().expect("Failed to create temp dir");
    let shop = signed_in(&backend, &dir, "ada@example.com").await;

    let p = ProductId::new("P");
    let (a, b, c) = tokio::join!(
        shop.add_to_cart(&p),
        shop.add_to_cart(&p),
        shop.add_to_cart(&p)
    );
    a.expect("add a");
    b.expect("add b");
    c.expect("add c");

    assert_eq!(backend.quantity(&user, "P"), 3);
    assert_eq!(shop.cart().quantity_of(&p).map(|q| q.get()), Some(3));
}

#[tokio::test]
async fn test_fetch_for_other_user_leaves_cart_empty() {
    let backend = MockBackend::start().await.expect("Failed to start backend");
    let user = backend.add_user("ada@example.com", "hunter22");
    let other = backend.add_user("bob@example.com", "hunter22");
    backend.seed_cart(&user, &[("A", 1)]);
    backend.seed_cart(&other, &[("B", 7)]);
    let dir = TempDir::new().expect("Failed to create temp dir");
    let shop = signed_in(&backend, &dir, "ada@example.com").await;
    assert_eq!(shop.total_cart_items(), 1);
    let cart_requests = backend.requests("cart");

    let err = shop
        .engine()
        .fetch_cart_data(&UserId::new(other.as_str()))
        .await
        .expect_err("stale fetch");

    assert!(matches!(err, CartError::IdentityMismatch { .. }));
    assert!(shop.cart().is_empty());
    assert_eq!(backend.requests("cart"), cart_requests);
}

#[tokio::test]
async fn test_clear_uses_bulk_endpoint() {
    let backend = MockBackend::start().await.expect("Failed to start backend");
    let user = backend.add_user("ada@example.com", "hunter22");
    backend.seed_cart(&user, &[("A", 1), ("B", 2)]);
    let dir = TempDir::new().expect("Failed to create temp dir");
    let shop = signed_in(&backend, &dir, "ada@example.com").await;

    let outcome = shop.clear_cart().await;

    assert!(!outcome.used_fallback);
    assert_eq!(outcome.items_remaining, 0);
    assert!(backend.cart(&user).is_empty());
    assert!(shop.cart().is_empty());
    assert_eq!(backend.requests("removefromcart"), 0);
}

#[tokio::test]
async fn test_clear_falls_back_to_line_removal() {
    let backend = MockBackend::start().await.expect("Failed to start backend");
    let user = backend.add_user("ada@example.com", "hunter22");
    backend.seed_cart(&user, &[("A", 1), ("B", 2)]);
    let dir = TempDir::new().expect("Failed to create temp dir");
    let shop = signed_in(&backend, &dir, "ada@example.com").await;
    backend.remove_bulk_clear();

    let outcome = shop.clear_cart().await;

    assert!(outcome.used_fallback);
    assert_eq!(outcome.items_remaining, 0);
    assert_eq!(backend.requests("removefromcart"), 2);
    assert!(backend.cart(&user).is_empty());
    assert!(shop.cart().is_empty());
}

#[tokio::test]
async fn test_rejected_token_ends_session() {
    let backend = MockBackend::start().await.expect("Failed to start backend");
    let user = backend.add_user("ada@example.com", "hunter22");
    backend.seed_cart(&user, &[("A", 1)]);
    let dir = TempDir::new().expect("Failed to create temp dir");
    let shop = signed_in(&backend, &dir, "ada@example.com").await;
    backend.revoke_tokens();

    let err = shop
        .add_to_cart(&ProductId::new("B"))
        .await
        .expect_err("revoked");

    assert!(matches!(err, ShopError::Cart(CartError::SessionExpired)));
    assert!(!shop.session().is_authenticated());
    assert!(shop.cart().is_empty());
    assert!(
        shop.storage()
            .get(keys::TOKEN)
            .await
            .expect("read token")
            .is_none()
    );
    assert_eq!(backend.quantity(&user, "B"), 0);
}

#[tokio::test]
async fn test_refresh_picks_up_server_changes() {
    let backend = MockBackend::start().await.expect("Failed to start backend");
    let user = backend.add_user("ada@example.com", "hunter22");
    let dir = TempDir::new().expect("Failed to create temp dir");
    let shop = signed_in(&backend, &dir, "ada@example.com").await;
    assert!(shop.cart().is_empty());

    backend.seed_cart(&user, &[("web", 2)]);
    let cart = shop.refresh_cart().await.expect("refresh");

    assert_eq!(cart.total_items(), 2);
    assert_eq!(shop.cart(), cart);
}
