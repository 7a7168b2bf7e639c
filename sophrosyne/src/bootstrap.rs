//! Startup provisioning: the system-wide `default` profile and the root
//! principal.
//!
//! Runs against the stores directly, since there is no principal yet to
//! authorize as. The root token is printed to the log exactly once, at
//! creation; with `principals.root.recreate` the user is re-created with
//! a fresh token on every boot. In development mode a configured static
//! token replaces the generated one so local tooling can hardcode it.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use soph_core::{Error, ErrorKind};
use soph_data::{NewProfile, NewUser, ProfileStore, UserStore};
use soph_security::{token, TokenProtector};
use soph_services::DEFAULT_PROFILE_NAME;

use crate::config::Config;

pub async fn run(
    users: &dyn UserStore,
    profiles: &dyn ProfileStore,
    protector: &TokenProtector,
    config: &Config,
) -> Result<(), Error> {
    ensure_default_profile(profiles).await?;
    ensure_root_principal(users, protector, config).await
}

async fn ensure_default_profile(profiles: &dyn ProfileStore) -> Result<(), Error> {
    match profiles.get_profile_by_name(DEFAULT_PROFILE_NAME).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            profiles
                .create_profile(NewProfile {
                    name: DEFAULT_PROFILE_NAME.to_string(),
                    checks: vec![],
                })
                .await?;
            tracing::info!("created the default profile");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn ensure_root_principal(
    users: &dyn UserStore,
    protector: &TokenProtector,
    config: &Config,
) -> Result<(), Error> {
    let root = &config.root;
    match users.get_user_by_name(&root.name).await {
        Ok(existing) => {
            if !root.recreate {
                return Ok(());
            }
            users.delete_user(existing.id).await?;
            tracing::info!(name = %root.name, "recreating root principal");
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let static_token = config
        .development
        .enabled
        .then(|| config.development.static_root_token.clone())
        .flatten();

    let (raw, announce) = match static_token {
        Some(fixed) => (fixed.into_bytes(), false),
        None => (token::new_token(&mut OsRng).to_vec(), true),
    };

    users
        .create_user(NewUser {
            name: root.name.clone(),
            email: root.email.clone(),
            protected_token: protector.protect(&raw).to_vec(),
            is_admin: true,
            default_profile: None,
        })
        .await?;

    if announce {
        // The one and only time this token is recoverable.
        tracing::info!(
            name = %root.name,
            token = %BASE64.encode(&raw),
            "root principal created"
        );
    } else {
        tracing::info!(name = %root.name, "root principal created with static development token");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Authenticator;
    use crate::config::RawConfig;
    use soph_data::MemoryStore;
    use std::sync::Arc;

    fn test_config(recreate: bool) -> Config {
        let mut raw = RawConfig::default();
        raw.set("security.sitekey", "k".repeat(64));
        raw.set("security.salt", "s".repeat(32));
        raw.set("principals.root.recreate", recreate.to_string());
        Config::from_raw(&raw).unwrap()
    }

    fn protector() -> TokenProtector {
        TokenProtector::new(&[1u8; 64], &[2u8; 32]).unwrap()
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let store = MemoryStore::new();
        let config = test_config(false);
        let protector = protector();

        run(&store, &store, &protector, &config).await.unwrap();
        run(&store, &store, &protector, &config).await.unwrap();

        let root = store.get_user_by_name("root").await.unwrap();
        assert!(root.is_admin);
        assert!(store.get_profile_by_name("default").await.is_ok());
    }

    #[tokio::test]
    async fn recreate_rotates_the_root_token() {
        let store = MemoryStore::new();
        let config = test_config(true);
        let protector = protector();

        run(&store, &store, &protector, &config).await.unwrap();
        let first = store.get_user_by_name("root").await.unwrap();

        run(&store, &store, &protector, &config).await.unwrap();
        let second = store.get_user_by_name("root").await.unwrap();

        assert_ne!(first.id, second.id);
        assert_ne!(first.protected_token, second.protected_token);
    }

    /// Drives the real ingress path: the literal header value has to
    /// authenticate, not just the storage-side protected form.
    #[tokio::test]
    async fn development_static_token_authenticates_root() {
        let store = Arc::new(MemoryStore::new());
        let mut raw = RawConfig::default();
        raw.set("security.sitekey", "k".repeat(64));
        raw.set("security.salt", "s".repeat(32));
        raw.set("development.enabled", "true");
        raw.set("development.staticroottoken", "local-root-token");
        let config = Config::from_raw(&raw).unwrap();
        let protector = protector();

        run(store.as_ref(), store.as_ref(), &protector, &config)
            .await
            .unwrap();

        let authenticator = Authenticator::new(store.clone(), protector);
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            http::HeaderValue::from_static("Bearer local-root-token"),
        );
        let principal = authenticator.authenticate(&headers).await.unwrap();
        assert_eq!(principal.name, "root");
        assert!(principal.is_admin);
    }
}
