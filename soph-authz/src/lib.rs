//! Authorization oracle.
//!
//! One question, one answer: may this principal perform this action on this
//! resource? [`AuthorizationProvider`] is the pluggable seam; the built-in
//! [`PolicyBackend`] carries the gateway's default policy and
//! [`MockBackend`] serves tests with explicit allow-tuples.
//!
//! The oracle is deliberately infallible at the call site: a backend that
//! cannot decide logs the failure and denies.

pub mod action;
mod backend;

pub use backend::{MockBackend, PolicyBackend};

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use soph_core::{EntityRef, Principal, RequestContext};

/// One authorization question.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub principal: Principal,
    /// Action tag, e.g. `users::get`. Constants live in [`action`].
    pub action: &'static str,
    /// The entity acted upon. Absent for collection-level actions.
    pub resource: Option<EntityRef>,
    /// Free-form attributes for policy backends that want them.
    pub context: HashMap<String, serde_json::Value>,
}

impl AuthorizationRequest {
    pub fn new(principal: Principal, action: &'static str) -> Self {
        Self {
            principal,
            action,
            resource: None,
            context: HashMap::new(),
        }
    }

    pub fn with_resource(mut self, resource: EntityRef) -> Self {
        self.resource = Some(resource);
        self
    }
}

/// The oracle seam. Implementations must be cheap to call; the services
/// consult it once per single-resource operation and once per item on
/// listings.
pub trait AuthorizationProvider: Send + Sync + 'static {
    fn is_authorized<'a>(
        &'a self,
        ctx: &'a RequestContext,
        request: &'a AuthorizationRequest,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

impl<T: AuthorizationProvider> AuthorizationProvider for Arc<T> {
    fn is_authorized<'a>(
        &'a self,
        ctx: &'a RequestContext,
        request: &'a AuthorizationRequest,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        (**self).is_authorized(ctx, request)
    }
}
