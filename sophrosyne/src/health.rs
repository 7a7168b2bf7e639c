//! Liveness and readiness probes.
//!
//! `GET /healthz` answers 200 as soon as the listener is serving and is
//! the only unauthenticated HTTP route. `GET /healthz/ready` runs every
//! registered indicator (the store ping, in production) and requires
//! credentials like any other route.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use http::StatusCode;
use serde::Serialize;
use soph_data::PgStore;

use crate::state::AppState;

/// Result of a single readiness check.
#[derive(Debug, Clone)]
pub enum HealthStatus {
    Up,
    Down(String),
}

/// A named downstream dependency check.
pub trait HealthIndicator: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn check(&self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + '_>>;
}

/// Pings the primary store.
pub struct StoreHealth {
    store: PgStore,
}

impl StoreHealth {
    pub fn new(store: PgStore) -> Self {
        Self { store }
    }
}

impl HealthIndicator for StoreHealth {
    fn name(&self) -> &str {
        "store"
    }

    fn check(&self) -> Pin<Box<dyn Future<Output = HealthStatus> + Send + '_>> {
        Box::pin(async move {
            match self.store.ping().await {
                Ok(()) => HealthStatus::Up,
                Err(e) => HealthStatus::Down(e.to_string()),
            }
        })
    }
}

/// The set of indicators behind the readiness probe.
#[derive(Clone, Default)]
pub struct Readiness {
    indicators: Arc<Vec<Box<dyn HealthIndicator>>>,
}

impl Readiness {
    pub fn new(indicators: Vec<Box<dyn HealthIndicator>>) -> Self {
        Self {
            indicators: Arc::new(indicators),
        }
    }
}

#[derive(Debug, Serialize)]
struct CheckReport {
    name: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReadinessReport {
    status: &'static str,
    checks: Vec<CheckReport>,
}

/// `GET /healthz`.
pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// `GET /healthz/ready`.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = Vec::new();
    let mut all_up = true;
    for indicator in state.readiness.indicators.iter() {
        let (status, reason) = match indicator.check().await {
            HealthStatus::Up => ("UP", None),
            HealthStatus::Down(reason) => {
                all_up = false;
                ("DOWN", Some(reason))
            }
        };
        checks.push(CheckReport {
            name: indicator.name().to_string(),
            status,
            reason,
        });
    }

    let code = if all_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let report = ReadinessReport {
        status: if all_up { "UP" } else { "DOWN" },
        checks,
    };
    (code, Json(report))
}
