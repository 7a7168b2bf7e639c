use std::sync::Arc;
use std::time::Duration;

use soph_authz::MockBackend;
use soph_core::{ErrorKind, Id, Principal, RequestContext};
use soph_data::{CheckStore, MemoryStore, NewCheck, NewProfile, ProfileStore};
use soph_proto::v1 as pb;
use soph_security::ClientTls;
use soph_services::{ScanDispatcher, ScanPayload};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};

use pb::check_provider_service_server::{CheckProviderService, CheckProviderServiceServer};

/// Provider that always answers the same verdict.
struct FixedProvider {
    result: bool,
}

#[tonic::async_trait]
impl CheckProviderService for FixedProvider {
    async fn check(
        &self,
        _request: Request<pb::CheckProviderRequest>,
    ) -> Result<Response<pb::CheckProviderResponse>, Status> {
        Ok(Response::new(pb::CheckProviderResponse {
            result: self.result,
            details: "fixed".to_string(),
        }))
    }
}

/// Provider that parses a boolean out of the text payload.
struct EchoProvider;

#[tonic::async_trait]
impl CheckProviderService for EchoProvider {
    async fn check(
        &self,
        request: Request<pb::CheckProviderRequest>,
    ) -> Result<Response<pb::CheckProviderResponse>, Status> {
        let result = match request.into_inner().payload {
            Some(pb::check_provider_request::Payload::Text(text)) => {
                text.trim().parse::<bool>().unwrap_or(false)
            }
            _ => false,
        };
        Ok(Response::new(pb::CheckProviderResponse {
            result,
            details: "echo".to_string(),
        }))
    }
}

/// Provider that never answers within the test's patience.
struct StallingProvider;

#[tonic::async_trait]
impl CheckProviderService for StallingProvider {
    async fn check(
        &self,
        _request: Request<pb::CheckProviderRequest>,
    ) -> Result<Response<pb::CheckProviderResponse>, Status> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Response::new(pb::CheckProviderResponse {
            result: true,
            details: "late".to_string(),
        }))
    }
}

async fn spawn_provider<S: CheckProviderService>(svc: S) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(CheckProviderServiceServer::new(svc))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
    });
    format!("http://{addr}")
}

struct Harness {
    store: Arc<MemoryStore>,
    dispatcher: ScanDispatcher,
}

fn harness(store: Arc<MemoryStore>) -> Harness {
    let dispatcher = ScanDispatcher::new(
        store.clone(),
        store.clone(),
        Arc::new(MockBackend::permissive()),
        ClientTls::new(false).unwrap(),
        true,
    );
    Harness { store, dispatcher }
}

fn ctx() -> RequestContext {
    RequestContext::with_principal(Principal {
        id: Id::new(),
        name: "scanner".to_string(),
        is_admin: false,
        default_profile: None,
    })
}

async fn register_check(store: &MemoryStore, name: &str, url: &str) -> Id {
    store
        .create_check(NewCheck {
            name: name.to_string(),
            profiles: vec![],
            upstream_services: vec![url.to_string()],
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_scan_happy_path_image() {
    let store = Arc::new(MemoryStore::new());
    let url = spawn_provider(FixedProvider { result: true }).await;
    let check = register_check(&store, "dummycheck", &url).await;
    store
        .create_profile(NewProfile {
            name: "default".to_string(),
            checks: vec![check],
        })
        .await
        .unwrap();

    let h = harness(store);
    let outcome = h
        .dispatcher
        .scan(&ctx(), ScanPayload::Image(vec![0x89, b'P', b'N', b'G']), None)
        .await
        .unwrap();

    assert!(outcome.verdict);
    assert_eq!(outcome.checks.len(), 1);
    assert_eq!(outcome.checks[0].name, "dummycheck");
    assert!(outcome.checks[0].result);
}

#[tokio::test]
async fn test_scan_text_passthrough() {
    let store = Arc::new(MemoryStore::new());
    let url = spawn_provider(EchoProvider).await;
    let check = register_check(&store, "dummycheck", &url).await;
    store
        .create_profile(NewProfile {
            name: "default".to_string(),
            checks: vec![check],
        })
        .await
        .unwrap();

    let h = harness(store);
    let outcome = h
        .dispatcher
        .scan(&ctx(), ScanPayload::Text("false".to_string()), None)
        .await
        .unwrap();

    assert!(!outcome.verdict);
    assert_eq!(outcome.checks.len(), 1);
    assert_eq!(outcome.checks[0].name, "dummycheck");
}

#[tokio::test]
async fn test_partial_failure_keeps_surviving_results() {
    let store = Arc::new(MemoryStore::new());
    let alive = spawn_provider(FixedProvider { result: true }).await;
    let check_a = register_check(&store, "alive", &alive).await;
    // Nothing listens here; the dial fails.
    let check_b = register_check(&store, "dead", "http://127.0.0.1:1").await;
    store
        .create_profile(NewProfile {
            name: "default".to_string(),
            checks: vec![check_a, check_b],
        })
        .await
        .unwrap();

    let h = harness(store);
    let outcome = h
        .dispatcher
        .scan(&ctx(), ScanPayload::Text("payload".to_string()), None)
        .await
        .unwrap();

    assert_eq!(outcome.checks.len(), 1);
    assert_eq!(outcome.checks[0].name, "alive");
    assert!(outcome.verdict);
}

#[tokio::test]
async fn test_verdict_is_logical_and() {
    let store = Arc::new(MemoryStore::new());
    let yes = spawn_provider(FixedProvider { result: true }).await;
    let no = spawn_provider(FixedProvider { result: false }).await;
    let check_a = register_check(&store, "yes", &yes).await;
    let check_b = register_check(&store, "no", &no).await;
    store
        .create_profile(NewProfile {
            name: "default".to_string(),
            checks: vec![check_a, check_b],
        })
        .await
        .unwrap();

    let h = harness(store);
    let outcome = h
        .dispatcher
        .scan(&ctx(), ScanPayload::Text("x".to_string()), None)
        .await
        .unwrap();

    assert_eq!(outcome.checks.len(), 2);
    assert!(!outcome.verdict, "one false pulls the whole verdict down");
}

#[tokio::test]
async fn test_empty_profile_yields_false_verdict() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_profile(NewProfile {
            name: "default".to_string(),
            checks: vec![],
        })
        .await
        .unwrap();

    let h = harness(store);
    let outcome = h
        .dispatcher
        .scan(&ctx(), ScanPayload::Text("x".to_string()), None)
        .await
        .unwrap();

    assert!(!outcome.verdict);
    assert!(outcome.checks.is_empty());
}

#[tokio::test]
async fn test_check_without_upstreams_contributes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let url = spawn_provider(FixedProvider { result: true }).await;
    let good = register_check(&store, "good", &url).await;
    let bare = store
        .create_check(NewCheck {
            name: "bare".to_string(),
            profiles: vec![],
            upstream_services: vec![],
        })
        .await
        .unwrap()
        .id;
    store
        .create_profile(NewProfile {
            name: "default".to_string(),
            checks: vec![good, bare],
        })
        .await
        .unwrap();

    let h = harness(store);
    let outcome = h
        .dispatcher
        .scan(&ctx(), ScanPayload::Text("x".to_string()), None)
        .await
        .unwrap();

    assert_eq!(outcome.checks.len(), 1);
    assert_eq!(outcome.checks[0].name, "good");
}

#[tokio::test]
async fn test_requested_profile_wins_resolution() {
    let store = Arc::new(MemoryStore::new());
    let yes = spawn_provider(FixedProvider { result: true }).await;
    let no = spawn_provider(FixedProvider { result: false }).await;
    let yes_check = register_check(&store, "yes", &yes).await;
    let no_check = register_check(&store, "no", &no).await;
    store
        .create_profile(NewProfile {
            name: "default".to_string(),
            checks: vec![no_check],
        })
        .await
        .unwrap();
    store
        .create_profile(NewProfile {
            name: "strict".to_string(),
            checks: vec![yes_check],
        })
        .await
        .unwrap();

    let h = harness(store);
    let outcome = h
        .dispatcher
        .scan(&ctx(), ScanPayload::Text("x".to_string()), Some("strict"))
        .await
        .unwrap();
    assert!(outcome.verdict);

    let outcome = h
        .dispatcher
        .scan(&ctx(), ScanPayload::Text("x".to_string()), None)
        .await
        .unwrap();
    assert!(!outcome.verdict);
}

#[tokio::test]
async fn test_principal_default_profile_beats_fallback() {
    let store = Arc::new(MemoryStore::new());
    let yes = spawn_provider(FixedProvider { result: true }).await;
    let no = spawn_provider(FixedProvider { result: false }).await;
    let yes_check = register_check(&store, "yes", &yes).await;
    let no_check = register_check(&store, "no", &no).await;
    store
        .create_profile(NewProfile {
            name: "default".to_string(),
            checks: vec![no_check],
        })
        .await
        .unwrap();
    let preferred = store
        .create_profile(NewProfile {
            name: "preferred".to_string(),
            checks: vec![yes_check],
        })
        .await
        .unwrap();

    let h = harness(store);
    let ctx = RequestContext::with_principal(Principal {
        id: Id::new(),
        name: "scanner".to_string(),
        is_admin: false,
        default_profile: Some(preferred.id),
    });
    let outcome = h
        .dispatcher
        .scan(&ctx, ScanPayload::Text("x".to_string()), None)
        .await
        .unwrap();
    assert!(outcome.verdict);
}

#[tokio::test]
async fn test_unknown_profile_fails_with_not_found() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(store);
    let err = h
        .dispatcher
        .scan(&ctx(), ScanPayload::Text("x".to_string()), Some("missing"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_unauthenticated_scan_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let h = harness(store);
    let err = h
        .dispatcher
        .scan(
            &RequestContext::new(),
            ScanPayload::Text("x".to_string()),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
}

#[tokio::test]
async fn test_cancellation_returns_within_bounded_time() {
    let store = Arc::new(MemoryStore::new());
    let url = spawn_provider(StallingProvider).await;
    let check = register_check(&store, "slow", &url).await;
    store
        .create_profile(NewProfile {
            name: "default".to_string(),
            checks: vec![check],
        })
        .await
        .unwrap();

    let h = harness(store);
    let started = std::time::Instant::now();
    let result = tokio::time::timeout(
        Duration::from_millis(250),
        h.dispatcher.scan(&ctx(), ScanPayload::Text("x".to_string()), None),
    )
    .await;

    // Dropping the scan future aborts the fan-out tasks with it.
    assert!(result.is_err(), "the stalled provider must not complete");
    assert!(started.elapsed() < Duration::from_secs(2));
}
