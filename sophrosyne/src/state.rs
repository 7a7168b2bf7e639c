//! Shared application state handed to both transport stacks.

use std::sync::Arc;

use soph_services::{CheckService, ProfileService, ScanDispatcher, UserService};

use crate::health::Readiness;

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserService>,
    pub profiles: Arc<ProfileService>,
    pub checks: Arc<CheckService>,
    pub dispatcher: Arc<ScanDispatcher>,
    pub readiness: Readiness,
}
