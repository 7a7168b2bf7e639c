use soph_data::{
    CheckStore, MemoryStore, NewCheck, NewProfile, NewUser, ProfileStore, ProfileUpdate,
    UserStore, UserUpdate,
};
use soph_core::ErrorKind;

fn new_user(name: &str, token: u8) -> NewUser {
    NewUser {
        name: name.to_string(),
        email: format!("{name}@example.com"),
        protected_token: vec![token; 32],
        is_admin: false,
        default_profile: None,
    }
}

#[tokio::test]
async fn test_create_and_get_user() {
    let store = MemoryStore::new();
    let created = store.create_user(new_user("alice", 1)).await.unwrap();

    let by_id = store.get_user(created.id).await.unwrap();
    assert_eq!(by_id, created);

    let by_name = store.get_user_by_name("alice").await.unwrap();
    assert_eq!(by_name.id, created.id);

    let by_email = store.get_user_by_email("alice@example.com").await.unwrap();
    assert_eq!(by_email.id, created.id);

    let by_token = store
        .get_user_by_protected_token(&[1u8; 32])
        .await
        .unwrap();
    assert_eq!(by_token.id, created.id);
}

#[tokio::test]
async fn test_duplicate_name_and_email_conflict() {
    let store = MemoryStore::new();
    store.create_user(new_user("alice", 1)).await.unwrap();

    let err = store.create_user(new_user("alice", 2)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let mut dup_email = new_user("bob", 3);
    dup_email.email = "alice@example.com".to_string();
    let err = store.create_user(dup_email).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_soft_delete_hides_user_and_frees_name() {
    let store = MemoryStore::new();
    let user = store.create_user(new_user("alice", 1)).await.unwrap();
    store.delete_user(user.id).await.unwrap();

    let err = store.get_user(user.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(store.get_user_by_protected_token(&[1u8; 32]).await.is_err());

    // Tombstone does not hold the name.
    store.create_user(new_user("alice", 2)).await.unwrap();
}

#[tokio::test]
async fn test_listing_pages_in_id_order() {
    let store = MemoryStore::new();
    let mut ids = Vec::new();
    for i in 0..5 {
        let user = store.create_user(new_user(&format!("user-{i}"), i)).await.unwrap();
        ids.push(user.id);
    }

    let page1 = store.list_users(None, 2).await.unwrap();
    assert_eq!(page1.iter().map(|u| u.id).collect::<Vec<_>>(), ids[0..2]);

    let page2 = store.list_users(Some(ids[1]), 2).await.unwrap();
    assert_eq!(page2.iter().map(|u| u.id).collect::<Vec<_>>(), ids[2..4]);

    let page3 = store.list_users(Some(ids[3]), 2).await.unwrap();
    assert_eq!(page3.iter().map(|u| u.id).collect::<Vec<_>>(), ids[4..5]);

    let page4 = store.list_users(Some(ids[4]), 2).await.unwrap();
    assert!(page4.is_empty());
}

#[tokio::test]
async fn test_default_profile_must_resolve() {
    let store = MemoryStore::new();
    let mut user = new_user("alice", 1);
    user.default_profile = Some(soph_core::Id::new());
    let err = store.create_user(user).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_update_user_fields() {
    let store = MemoryStore::new();
    let user = store.create_user(new_user("alice", 1)).await.unwrap();
    let profile = store
        .create_profile(NewProfile {
            name: "strict".to_string(),
            checks: vec![],
        })
        .await
        .unwrap();

    let updated = store
        .update_user(
            user.id,
            UserUpdate {
                email: Some("new@example.com".to_string()),
                is_admin: Some(true),
                default_profile: Some(Some(profile.id)),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.email, "new@example.com");
    assert!(updated.is_admin);
    assert_eq!(updated.default_profile, Some(profile.id));
    assert!(updated.updated_at >= user.updated_at);

    // Clearing the reference is distinct from leaving it untouched.
    let cleared = store
        .update_user(
            user.id,
            UserUpdate {
                default_profile: Some(None),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(cleared.default_profile, None);
}

#[tokio::test]
async fn test_rotate_token_replaces_protected_form() {
    let store = MemoryStore::new();
    let user = store.create_user(new_user("alice", 1)).await.unwrap();

    store
        .rotate_user_token(user.id, vec![9u8; 32])
        .await
        .unwrap();
    assert!(store.get_user_by_protected_token(&[1u8; 32]).await.is_err());
    let found = store.get_user_by_protected_token(&[9u8; 32]).await.unwrap();
    assert_eq!(found.id, user.id);
}

#[tokio::test]
async fn test_profile_check_relation_is_bidirectional() {
    let store = MemoryStore::new();
    let check_a = store
        .create_check(NewCheck {
            name: "toxicity".to_string(),
            profiles: vec![],
            upstream_services: vec!["https://a.example.com".to_string()],
        })
        .await
        .unwrap();
    let check_b = store
        .create_check(NewCheck {
            name: "pii".to_string(),
            profiles: vec![],
            upstream_services: vec!["https://b.example.com".to_string()],
        })
        .await
        .unwrap();

    let profile = store
        .create_profile(NewProfile {
            name: "default".to_string(),
            checks: vec![check_b.id, check_a.id],
        })
        .await
        .unwrap();

    // Declaration order is preserved.
    assert_eq!(profile.checks, vec![check_b.id, check_a.id]);

    let check_a = store.get_check(check_a.id).await.unwrap();
    assert_eq!(check_a.profiles, vec![profile.id]);
}

#[tokio::test]
async fn test_profile_with_unknown_check_is_rejected() {
    let store = MemoryStore::new();
    let err = store
        .create_profile(NewProfile {
            name: "broken".to_string(),
            checks: vec![soph_core::Id::new()],
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_deleting_check_detaches_it_from_profiles() {
    let store = MemoryStore::new();
    let check = store
        .create_check(NewCheck {
            name: "toxicity".to_string(),
            profiles: vec![],
            upstream_services: vec!["https://a.example.com".to_string()],
        })
        .await
        .unwrap();
    let profile = store
        .create_profile(NewProfile {
            name: "default".to_string(),
            checks: vec![check.id],
        })
        .await
        .unwrap();

    store.delete_check(check.id).await.unwrap();
    let profile = store.get_profile(profile.id).await.unwrap();
    assert!(profile.checks.is_empty());
}

#[tokio::test]
async fn test_referenced_default_profile_cannot_be_deleted() {
    let store = MemoryStore::new();
    let profile = store
        .create_profile(NewProfile {
            name: "default".to_string(),
            checks: vec![],
        })
        .await
        .unwrap();
    let mut user = new_user("alice", 1);
    user.default_profile = Some(profile.id);
    store.create_user(user).await.unwrap();

    let err = store.delete_profile(profile.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_update_profile_checks_replaces_relation() {
    let store = MemoryStore::new();
    let check_a = store
        .create_check(NewCheck {
            name: "a".to_string(),
            profiles: vec![],
            upstream_services: vec!["https://a.example.com".to_string()],
        })
        .await
        .unwrap();
    let check_b = store
        .create_check(NewCheck {
            name: "b".to_string(),
            profiles: vec![],
            upstream_services: vec!["https://b.example.com".to_string()],
        })
        .await
        .unwrap();
    let profile = store
        .create_profile(NewProfile {
            name: "p".to_string(),
            checks: vec![check_a.id],
        })
        .await
        .unwrap();

    let updated = store
        .update_profile(
            profile.id,
            ProfileUpdate {
                name: None,
                checks: Some(vec![check_b.id]),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.checks, vec![check_b.id]);

    let check_a = store.get_check(check_a.id).await.unwrap();
    assert!(check_a.profiles.is_empty());
}
