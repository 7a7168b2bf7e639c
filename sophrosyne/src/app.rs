//! Wiring: configuration → stores → caches → services → dispatcher.
//!
//! Development mode runs against the in-memory store; production
//! connects to Postgres. Every store is wrapped in its cache decorator,
//! and the decorators' sweepers are stopped through [`App::closers`] at
//! shutdown.

use std::sync::Arc;

use soph_authz::{AuthorizationProvider, PolicyBackend};
use soph_core::Error;
use soph_data::{CheckStore, DatabaseOptions, MemoryStore, PgStore, ProfileStore, UserStore};
use soph_security::{ClientTls, ServerTlsOptions, TokenProtector};
use soph_services::{
    CacheOptions, CheckService, CheckStoreCache, ProfileService, ProfileStoreCache,
    ScanDispatcher, UserService, UserStoreCache,
};

use crate::auth::Authenticator;
use crate::config::{Config, EntityServiceConfig};
use crate::health::{Readiness, StoreHealth};
use crate::state::AppState;
use crate::bootstrap;

type Closer = Box<dyn Fn() + Send + Sync>;

pub struct App {
    pub state: AppState,
    pub authenticator: Authenticator,
    pub tls: rustls::ServerConfig,
    /// Stops the cache sweepers; call once serving has finished.
    pub closers: Vec<Closer>,
}

fn cache_options(config: &EntityServiceConfig) -> CacheOptions {
    CacheOptions {
        ttl: config.cache_ttl,
        cleanup_interval: config.cache_cleanup_interval,
    }
}

impl App {
    /// Build every component and run startup provisioning.
    pub async fn build(config: &Config) -> Result<Self, Error> {
        let protector = TokenProtector::new(&config.security.site_key, &config.security.salt)
            .map_err(|e| Error::internal(e.to_string()))?;

        let mut closers: Vec<Closer> = Vec::new();
        let user_store: Arc<dyn UserStore>;
        let profile_store: Arc<dyn ProfileStore>;
        let check_store: Arc<dyn CheckStore>;
        let readiness: Readiness;

        if config.development.enabled {
            tracing::warn!("development mode: using the in-memory store");
            let store = Arc::new(MemoryStore::new());

            let users = Arc::new(UserStoreCache::new(
                store.clone(),
                cache_options(&config.services.users),
            ));
            let profiles = Arc::new(ProfileStoreCache::new(
                store.clone(),
                cache_options(&config.services.profiles),
            ));
            let checks = Arc::new(CheckStoreCache::new(
                store.clone(),
                cache_options(&config.services.checks),
            ));
            closers.push(Box::new({
                let c = users.clone();
                move || c.close()
            }));
            closers.push(Box::new({
                let c = profiles.clone();
                move || c.close()
            }));
            closers.push(Box::new({
                let c = checks.clone();
                move || c.close()
            }));

            user_store = users;
            profile_store = profiles;
            check_store = checks;
            readiness = Readiness::default();
        } else {
            let store = PgStore::connect(&DatabaseOptions {
                user: config.database.user.clone(),
                password: config.database.password.clone(),
                host: config.database.host.clone(),
                port: config.database.port,
                name: config.database.name.clone(),
            })
            .await?;

            let users = Arc::new(UserStoreCache::new(
                store.clone(),
                cache_options(&config.services.users),
            ));
            let profiles = Arc::new(ProfileStoreCache::new(
                store.clone(),
                cache_options(&config.services.profiles),
            ));
            let checks = Arc::new(CheckStoreCache::new(
                store.clone(),
                cache_options(&config.services.checks),
            ));
            closers.push(Box::new({
                let c = users.clone();
                move || c.close()
            }));
            closers.push(Box::new({
                let c = profiles.clone();
                move || c.close()
            }));
            closers.push(Box::new({
                let c = checks.clone();
                move || c.close()
            }));

            user_store = users;
            profile_store = profiles;
            check_store = checks;
            readiness = Readiness::new(vec![Box::new(StoreHealth::new(store))]);
        }

        bootstrap::run(
            user_store.as_ref(),
            profile_store.as_ref(),
            &protector,
            config,
        )
        .await?;

        let authz: Arc<dyn AuthorizationProvider> = Arc::new(PolicyBackend::new());

        let users = Arc::new(UserService::new(
            user_store.clone(),
            authz.clone(),
            protector.clone(),
            config.services.users.page_size,
        )?);
        let profiles = Arc::new(ProfileService::new(
            profile_store.clone(),
            authz.clone(),
            config.services.profiles.page_size,
        )?);
        let checks = Arc::new(CheckService::new(
            check_store.clone(),
            authz.clone(),
            config.services.checks.page_size,
        )?);

        let client_tls = ClientTls::new(config.security.tls.insecure_skip_verify)
            .map_err(|e| Error::internal(e.to_string()))?;
        let dispatcher = Arc::new(ScanDispatcher::new(
            profile_store.clone(),
            check_store.clone(),
            authz,
            client_tls,
            config.development.enabled,
        ));

        let tls = ServerTlsOptions {
            key_type: config.security.tls.key_type,
            certificate_path: config.security.tls.certificate_path.clone(),
            key_path: config.security.tls.key_path.clone(),
            advertised_host: config.server.advertised_host.clone(),
            additional_sans: vec![],
        }
        .build()
        .map_err(|e| Error::internal(e.to_string()))?;

        let authenticator = Authenticator::new(user_store, protector);

        Ok(App {
            state: AppState {
                users,
                profiles,
                checks,
                dispatcher,
                readiness,
            },
            authenticator,
            tls,
            closers,
        })
    }
}
