//! The scan dispatcher: profile resolution, concurrent fan-out to check
//! providers, partial-failure aggregation.
//!
//! One task per check, all launched together with no ordering between
//! them. Results funnel into a channel sized to the number of checks so a
//! send can never block; the dispatcher joins every task before draining.
//! Provider failures degrade the aggregate but never fail the scan; the
//! scan itself only fails on missing principal, refused authorization, or
//! profile resolution.
//!
//! Cancellation rides the future: dropping an in-flight `scan` call drops
//! the `JoinSet`, which aborts every task and with it every outbound
//! provider call.

use std::sync::Arc;

use http::Uri;
use hyper_util::rt::TokioIo;
use rustls_pki_types::ServerName;
use soph_authz::{action, AuthorizationRequest, AuthorizationProvider};
use soph_core::{Error, Principal, RequestContext};
use soph_data::{Check, CheckStore, Profile, ProfileStore};
use soph_proto::v1 as pb;
use soph_security::ClientTls;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tonic::transport::{Channel, Endpoint};

use crate::DEFAULT_PROFILE_NAME;

/// The payload discriminant, passed to every provider unchanged.
#[derive(Debug, Clone)]
pub enum ScanPayload {
    Text(String),
    Image(Vec<u8>),
}

impl From<&ScanPayload> for pb::check_provider_request::Payload {
    fn from(payload: &ScanPayload) -> Self {
        match payload {
            ScanPayload::Text(text) => {
                pb::check_provider_request::Payload::Text(text.clone())
            }
            ScanPayload::Image(image) => {
                pb::check_provider_request::Payload::Image(image.clone())
            }
        }
    }
}

/// One provider's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub name: String,
    pub result: bool,
    pub details: String,
}

/// The aggregate: verdict plus per-check results in arrival order.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub verdict: bool,
    pub checks: Vec<CheckOutcome>,
}

/// The fan-out engine.
pub struct ScanDispatcher {
    profiles: Arc<dyn ProfileStore>,
    checks: Arc<dyn CheckStore>,
    authz: Arc<dyn AuthorizationProvider>,
    client_tls: ClientTls,
    /// Permit `http://` upstreams. Development mode only.
    allow_insecure_upstreams: bool,
}

impl ScanDispatcher {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        checks: Arc<dyn CheckStore>,
        authz: Arc<dyn AuthorizationProvider>,
        client_tls: ClientTls,
        allow_insecure_upstreams: bool,
    ) -> Self {
        Self {
            profiles,
            checks,
            authz,
            client_tls,
            allow_insecure_upstreams,
        }
    }

    /// Run one payload through one profile.
    ///
    /// The verdict is the logical AND over every collected result, with
    /// the empty set folding to `false`.
    #[tracing::instrument(name = "ScanDispatcher.scan", skip_all, fields(profile = requested_profile.unwrap_or("")))]
    pub async fn scan(
        &self,
        ctx: &RequestContext,
        payload: ScanPayload,
        requested_profile: Option<&str>,
    ) -> Result<ScanOutcome, Error> {
        let principal = ctx.require_principal()?.clone();

        let request = AuthorizationRequest::new(principal.clone(), action::SCAN_PERFORM);
        if !self.authz.is_authorized(ctx, &request).await {
            return Err(Error::permission_denied());
        }

        let profile = self.resolve_profile(&principal, requested_profile).await?;
        let checks = self.resolve_checks(&profile).await;

        let (tx, mut rx) = mpsc::channel(checks.len().max(1));
        let mut tasks = JoinSet::new();
        for check in checks {
            let tx = tx.clone();
            let payload = payload.clone();
            let tls = self.client_tls.clone();
            let allow_insecure = self.allow_insecure_upstreams;
            tasks.spawn(run_check(check, payload, tls, allow_insecure, tx));
        }
        drop(tx);

        // Every launched task terminates before we aggregate.
        while tasks.join_next().await.is_some() {}

        let mut results = Vec::new();
        while let Ok(outcome) = rx.try_recv() {
            results.push(outcome);
        }

        let verdict = !results.is_empty() && results.iter().all(|r| r.result);
        tracing::info!(
            profile = %profile.name,
            collected = results.len(),
            verdict,
            "scan complete"
        );
        Ok(ScanOutcome {
            verdict,
            checks: results,
        })
    }

    /// Requested name, then the principal's default profile, then the
    /// system-wide `default`.
    async fn resolve_profile(
        &self,
        principal: &Principal,
        requested: Option<&str>,
    ) -> Result<Profile, Error> {
        if let Some(name) = requested.filter(|n| !n.is_empty()) {
            return self.profiles.get_profile_by_name(name).await;
        }
        if let Some(id) = principal.default_profile {
            return self.profiles.get_profile(id).await;
        }
        self.profiles.get_profile_by_name(DEFAULT_PROFILE_NAME).await
    }

    /// A check that fails to resolve contributes nothing, exactly like a
    /// check whose provider is unreachable.
    async fn resolve_checks(&self, profile: &Profile) -> Vec<Check> {
        let mut checks = Vec::with_capacity(profile.checks.len());
        for id in &profile.checks {
            match self.checks.get_check(*id).await {
                Ok(check) => checks.push(check),
                Err(error) => {
                    tracing::warn!(check_id = %id, %error, "check resolution failed");
                }
            }
        }
        checks
    }
}

/// One fan-out task: dial, call, emit on success, log on failure. The
/// connection is per-task and dropped on every exit path.
async fn run_check(
    check: Check,
    payload: ScanPayload,
    tls: ClientTls,
    allow_insecure: bool,
    tx: mpsc::Sender<CheckOutcome>,
) {
    let Some(url) = check.upstream_services.first().cloned() else {
        tracing::warn!(check = %check.name, "missing-upstream-services");
        return;
    };

    let channel = match connect(&url, &tls, allow_insecure).await {
        Ok(channel) => channel,
        Err(error) => {
            tracing::warn!(check = %check.name, url = %url, %error, "upstream-unavailable");
            return;
        }
    };

    let mut client = pb::check_provider_service_client::CheckProviderServiceClient::new(channel);
    let request = pb::CheckProviderRequest {
        payload: Some((&payload).into()),
    };

    match client.check(request).await {
        Ok(response) => {
            let response = response.into_inner();
            // Sized channel, one send per task: this cannot block.
            let _ = tx
                .send(CheckOutcome {
                    name: check.name,
                    result: response.result,
                    details: response.details,
                })
                .await;
        }
        Err(status) => {
            tracing::warn!(check = %check.name, url = %url, error = %status, "upstream-unavailable");
        }
    }
}

/// Establish the per-task gRPC channel. `https` uses the shared TLS
/// client context through a manual TCP+rustls connector; `http` is only
/// honoured when insecure upstreams are explicitly allowed.
async fn connect(url: &str, tls: &ClientTls, allow_insecure: bool) -> Result<Channel, Error> {
    let uri: Uri = url
        .parse()
        .map_err(|_| Error::upstream_unavailable(format!("malformed upstream url {url:?}")))?;

    match uri.scheme_str() {
        Some("https") => {
            let host = uri
                .host()
                .ok_or_else(|| Error::upstream_unavailable("upstream url has no host"))?
                .to_string();
            let port = uri.port_u16().unwrap_or(443);
            let server_name = ServerName::try_from(host.clone())
                .map_err(|_| Error::upstream_unavailable("upstream host is not a valid name"))?;
            let connector = tls.connector();

            Endpoint::from_shared(url.to_string())
                .map_err(|e| Error::upstream_unavailable(e.to_string()))?
                .connect_with_connector(tower::service_fn(move |_: Uri| {
                    let connector = connector.clone();
                    let server_name = server_name.clone();
                    let host = host.clone();
                    async move {
                        let tcp = TcpStream::connect((host.as_str(), port)).await?;
                        let stream = connector.connect(server_name, tcp).await?;
                        Ok::<_, std::io::Error>(TokioIo::new(stream))
                    }
                }))
                .await
                .map_err(|e| Error::upstream_unavailable(e.to_string()))
        }
        Some("http") if allow_insecure => Endpoint::from_shared(url.to_string())
            .map_err(|e| Error::upstream_unavailable(e.to_string()))?
            .connect()
            .await
            .map_err(|e| Error::upstream_unavailable(e.to_string())),
        Some("http") => Err(Error::upstream_unavailable(
            "plaintext upstreams are only permitted in development mode",
        )),
        _ => Err(Error::upstream_unavailable(format!(
            "unsupported upstream scheme in {url:?}"
        ))),
    }
}
