use std::sync::Arc;

use soph_authz::PolicyBackend;
use soph_core::{ErrorKind, Id, Principal, RequestContext};
use soph_data::MemoryStore;
use soph_security::TokenProtector;
use soph_services::{CreateUserInput, UserService};

fn protector() -> TokenProtector {
    TokenProtector::new(&[7u8; 64], &[3u8; 32]).unwrap()
}

fn admin_ctx() -> RequestContext {
    RequestContext::with_principal(Principal {
        id: Id::new(),
        name: "root".to_string(),
        is_admin: true,
        default_profile: None,
    })
}

fn service(page_size: usize) -> UserService {
    UserService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(PolicyBackend::new()),
        protector(),
        page_size,
    )
    .unwrap()
}

fn input(name: &str) -> CreateUserInput {
    CreateUserInput {
        name: name.to_string(),
        email: format!("{name}@example.com"),
        is_admin: false,
        default_profile: None,
    }
}

#[test]
fn test_page_size_validated_at_construction() {
    let err = UserService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(PolicyBackend::new()),
        protector(),
        1,
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_create_surfaces_raw_token_once() {
    let svc = service(10);
    let ctx = admin_ctx();

    let created = svc.create(&ctx, input("alice")).await.unwrap();
    assert_eq!(created.token.len(), 64);
    // Only the protected form is stored.
    assert_ne!(created.user.protected_token, created.token.to_vec());
    assert_eq!(created.user.protected_token.len(), 32);

    let fetched = svc.get(&ctx, created.user.id).await.unwrap();
    assert_eq!(fetched.name, "alice");
}

#[tokio::test]
async fn test_unauthenticated_context_is_rejected() {
    let svc = service(10);
    let ctx = RequestContext::new();
    let err = svc.create(&ctx, input("alice")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    assert_eq!(err.message(), "invalid token");
}

#[tokio::test]
async fn test_non_admin_cannot_create() {
    let svc = service(10);
    let admin = admin_ctx();
    let created = svc.create(&admin, input("alice")).await.unwrap();

    let ctx = RequestContext::with_principal(created.user.principal());
    let err = svc.create(&ctx, input("bob")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn test_non_admin_reads_only_self() {
    let svc = service(10);
    let admin = admin_ctx();
    let alice = svc.create(&admin, input("alice")).await.unwrap().user;
    let bob = svc.create(&admin, input("bob")).await.unwrap().user;

    let ctx = RequestContext::with_principal(alice.principal());
    assert!(svc.get(&ctx, alice.id).await.is_ok());

    let err = svc.get(&ctx, bob.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn test_listing_pages_two_two_one() {
    let svc = service(2);
    let ctx = admin_ctx();
    for i in 0..5 {
        svc.create(&ctx, input(&format!("user-{i}"))).await.unwrap();
    }

    let page1 = svc.list(&ctx, "").await.unwrap();
    assert_eq!(page1.items.len(), 2);
    assert!(!page1.cursor.is_empty());

    let page2 = svc.list(&ctx, &page1.cursor).await.unwrap();
    assert_eq!(page2.items.len(), 2);
    assert!(!page2.cursor.is_empty());

    let page3 = svc.list(&ctx, &page2.cursor).await.unwrap();
    assert_eq!(page3.items.len(), 1);
    assert!(page3.cursor.is_empty(), "final page resets the cursor");

    let seen: Vec<_> = page1.items.iter().chain(&page2.items).chain(&page3.items)
        .map(|u| u.id)
        .collect();
    assert_eq!(seen.len(), 5);
    // Ascending id order across pages.
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn test_listing_filters_unauthorized_rows() {
    let svc = service(10);
    let admin = admin_ctx();
    let alice = svc.create(&admin, input("alice")).await.unwrap().user;
    svc.create(&admin, input("bob")).await.unwrap();
    svc.create(&admin, input("carol")).await.unwrap();

    let ctx = RequestContext::with_principal(alice.principal());
    let page = svc.list(&ctx, "").await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, alice.id);
}

#[tokio::test]
async fn test_foreign_cursor_is_rejected() {
    let svc = service(2);
    let admin = admin_ctx();
    for i in 0..5 {
        svc.create(&admin, input(&format!("user-{i}"))).await.unwrap();
    }
    let page = svc.list(&admin, "").await.unwrap();
    assert!(!page.cursor.is_empty());

    let other = admin_ctx();
    let err = svc.list(&other, &page.cursor).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidCursor);
}

#[tokio::test]
async fn test_rotate_token_revokes_old_token() {
    let store = Arc::new(MemoryStore::new());
    let svc = UserService::new(
        store.clone(),
        Arc::new(PolicyBackend::new()),
        protector(),
        10,
    )
    .unwrap();
    let ctx = admin_ctx();

    let created = svc.create(&ctx, input("alice")).await.unwrap();
    let old_protected = created.user.protected_token.clone();

    let rotated = svc.rotate_token(&ctx, created.user.id).await.unwrap();
    assert_ne!(rotated.token.to_vec(), created.token.to_vec());
    assert_ne!(rotated.user.protected_token, old_protected);

    use soph_data::UserStore;
    assert!(store.get_user_by_protected_token(&old_protected).await.is_err());
    assert!(store
        .get_user_by_protected_token(&rotated.user.protected_token)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_delete_is_soft_and_permission_checked() {
    let svc = service(10);
    let admin = admin_ctx();
    let alice = svc.create(&admin, input("alice")).await.unwrap().user;
    let bob = svc.create(&admin, input("bob")).await.unwrap().user;

    let ctx = RequestContext::with_principal(alice.principal());
    let err = svc.delete(&ctx, bob.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    svc.delete(&admin, bob.id).await.unwrap();
    let err = svc.get(&admin, bob.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
