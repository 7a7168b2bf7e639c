//! Backend implementations for the authorization oracle.
//!
//! [`PolicyBackend`] is the production default; [`MockBackend`] holds
//! explicit allow-tuples for tests.

use std::future::Future;
use std::pin::Pin;

use soph_core::{EntityType, RequestContext};

use crate::{action, AuthorizationProvider, AuthorizationRequest};

// ── PolicyBackend ──────────────────────────────────────────────────────

/// The built-in policy.
///
/// Admins may do everything. Non-admins may:
/// - perform scans,
/// - read and rotate the token of their own user record (listings collapse
///   to just themselves),
/// - read profiles and checks (they need the names to request a profile).
///
/// Every mutation of users, profiles, or checks requires admin.
#[derive(Debug, Clone, Default)]
pub struct PolicyBackend;

impl PolicyBackend {
    pub fn new() -> Self {
        Self
    }

    fn decide(&self, request: &AuthorizationRequest) -> bool {
        let principal = &request.principal;
        if principal.is_admin {
            return true;
        }

        match request.action {
            action::SCAN_PERFORM => true,
            action::PROFILES_GET | action::PROFILES_LIST => true,
            action::CHECKS_GET | action::CHECKS_LIST => true,
            action::USERS_GET | action::USERS_LIST | action::USERS_ROTATE_TOKEN => request
                .resource
                .map(|r| r.entity_type == EntityType::User && r.entity_id == principal.id)
                .unwrap_or(false),
            _ => false,
        }
    }
}

impl AuthorizationProvider for PolicyBackend {
    fn is_authorized<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        request: &'a AuthorizationRequest,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        let allowed = self.decide(request);
        if !allowed {
            tracing::debug!(
                principal = %request.principal.id,
                action = request.action,
                resource = ?request.resource,
                "authorization denied"
            );
        }
        Box::pin(async move { allowed })
    }
}

// ── MockBackend ────────────────────────────────────────────────────────

/// In-memory backend for tests: explicit `(principal, action, resource)`
/// allow-tuples, everything else denied.
#[derive(Debug, Default)]
pub struct MockBackend {
    tuples: dashmap::DashSet<(String, String, Option<String>)>,
    allow_all: std::sync::atomic::AtomicBool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that answers yes to everything.
    pub fn permissive() -> Self {
        let backend = Self::default();
        backend
            .allow_all
            .store(true, std::sync::atomic::Ordering::Relaxed);
        backend
    }

    /// Allow `action` for `principal_id`, optionally bound to one resource
    /// (`"type:id"` rendering).
    pub fn allow(&self, principal_id: &str, action: &str, resource: Option<&str>) {
        self.tuples.insert((
            principal_id.to_string(),
            action.to_string(),
            resource.map(str::to_string),
        ));
    }
}

impl AuthorizationProvider for MockBackend {
    fn is_authorized<'a>(
        &'a self,
        _ctx: &'a RequestContext,
        request: &'a AuthorizationRequest,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        let allowed = self.allow_all.load(std::sync::atomic::Ordering::Relaxed)
            || self.tuples.contains(&(
                request.principal.id.to_string(),
                request.action.to_string(),
                request.resource.map(|r| r.to_string()),
            ));
        Box::pin(async move { allowed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soph_core::{EntityRef, Id, Principal};

    fn principal(is_admin: bool) -> Principal {
        Principal {
            id: Id::new(),
            name: "tester".to_string(),
            is_admin,
            default_profile: None,
        }
    }

    fn user_ref(id: Id) -> EntityRef {
        EntityRef {
            entity_type: EntityType::User,
            entity_id: id,
        }
    }

    #[tokio::test]
    async fn admin_is_allowed_everything() {
        let backend = PolicyBackend::new();
        let ctx = RequestContext::new();
        let p = principal(true);
        for act in [action::USERS_CREATE, action::PROFILES_DELETE, action::SCAN_PERFORM] {
            let req = AuthorizationRequest::new(p.clone(), act);
            assert!(backend.is_authorized(&ctx, &req).await, "{act}");
        }
    }

    #[tokio::test]
    async fn non_admin_may_scan_and_read_config() {
        let backend = PolicyBackend::new();
        let ctx = RequestContext::new();
        let p = principal(false);
        for act in [action::SCAN_PERFORM, action::PROFILES_GET, action::CHECKS_LIST] {
            let req = AuthorizationRequest::new(p.clone(), act);
            assert!(backend.is_authorized(&ctx, &req).await, "{act}");
        }
    }

    #[tokio::test]
    async fn non_admin_reads_only_their_own_user() {
        let backend = PolicyBackend::new();
        let ctx = RequestContext::new();
        let p = principal(false);

        let own = AuthorizationRequest::new(p.clone(), action::USERS_GET)
            .with_resource(user_ref(p.id));
        assert!(backend.is_authorized(&ctx, &own).await);

        let other = AuthorizationRequest::new(p.clone(), action::USERS_GET)
            .with_resource(user_ref(Id::new()));
        assert!(!backend.is_authorized(&ctx, &other).await);

        let no_resource = AuthorizationRequest::new(p, action::USERS_GET);
        assert!(!backend.is_authorized(&ctx, &no_resource).await);
    }

    #[tokio::test]
    async fn non_admin_may_not_mutate() {
        let backend = PolicyBackend::new();
        let ctx = RequestContext::new();
        let p = principal(false);
        for act in [
            action::USERS_CREATE,
            action::USERS_DELETE,
            action::PROFILES_CREATE,
            action::CHECKS_UPDATE,
        ] {
            let req = AuthorizationRequest::new(p.clone(), act);
            assert!(!backend.is_authorized(&ctx, &req).await, "{act}");
        }
    }

    #[tokio::test]
    async fn mock_backend_matches_tuples() {
        let backend = MockBackend::new();
        let ctx = RequestContext::new();
        let p = principal(false);
        backend.allow(&p.id.to_string(), action::USERS_LIST, None);

        let allowed = AuthorizationRequest::new(p.clone(), action::USERS_LIST);
        assert!(backend.is_authorized(&ctx, &allowed).await);

        let denied = AuthorizationRequest::new(p, action::USERS_CREATE);
        assert!(!backend.is_authorized(&ctx, &denied).await);
    }
}
