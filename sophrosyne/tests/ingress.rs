//! End-to-end tests against the real ingress: TLS listener, both
//! transports, authentication, and the scan path with live providers.

use std::net::SocketAddr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use serde_json::{json, Value};
use soph_proto::v1 as pb;
use sophrosyne::{app::App, config::Config, config::RawConfig, server::Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsConnector;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

const ROOT_TOKEN: &str = "e2e-static-root-token";

async fn start_gateway() -> SocketAddr {
    let mut raw = RawConfig::default();
    raw.set("security.sitekey", "k".repeat(64));
    raw.set("security.salt", "s".repeat(32));
    raw.set("server.advertisedhost", "localhost");
    raw.set("development.enabled", "true");
    raw.set("development.staticroottoken", ROOT_TOKEN);
    let config = Config::from_raw(&raw).unwrap();

    let App {
        state,
        authenticator,
        tls,
        closers: _closers,
    } = App::build(&config).await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Server::new(
        state,
        authenticator,
        tls,
        config.server.max_body_size,
        config.server.shutdown_timeout,
    );
    let shutdown = CancellationToken::new();
    let guard = shutdown.clone();
    tokio::spawn(async move {
        let _guard = guard;
        server.serve(listener, shutdown).await.unwrap();
    });
    addr
}

// ── TLS client plumbing ────────────────────────────────────────────────

/// Test-only verifier: the gateway's certificate is self-signed.
#[derive(Debug)]
struct TrustAnyCert;

impl rustls::client::danger::ServerCertVerifier for TrustAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

fn client_config(
    versions: &[&'static rustls::SupportedProtocolVersion],
    alpn: &[&[u8]],
) -> rustls::ClientConfig {
    let mut config = rustls::ClientConfig::builder_with_protocol_versions(versions)
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(TrustAnyCert))
        .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
    config
}

/// One HTTP/1.1 request over TLS, written by hand so the test controls
/// every byte.
async fn https_request(
    addr: SocketAddr,
    request: &str,
) -> (u16, String) {
    let connector = TlsConnector::from(Arc::new(client_config(
        &[&rustls::version::TLS13],
        &[b"http/1.1"],
    )));
    let tcp = TcpStream::connect(addr).await.unwrap();
    let server_name = ServerName::try_from("localhost").unwrap();
    let mut tls = connector.connect(server_name, tcp).await.unwrap();

    tls.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    tls.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response).to_string();

    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body.to_string())
        .unwrap_or_default();
    (status, body)
}

async fn rpc_call(addr: SocketAddr, token: Option<&str>, method: &str, params: Value) -> Value {
    let body = json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1,
    })
    .to_string();
    let auth = match token {
        Some(token) => format!("authorization: Bearer {token}\r\n"),
        None => String::new(),
    };
    let request = format!(
        "POST /v1/rpc HTTP/1.1\r\nhost: localhost\r\n{auth}content-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len(),
    );
    let (status, body) = https_request(addr, &request).await;
    assert_eq!(status, 200, "rpc transport status, body: {body}");
    serde_json::from_str(&body).unwrap()
}

fn result(response: &Value) -> &Value {
    assert!(
        response.get("error").is_none(),
        "unexpected rpc error: {response}"
    );
    &response["result"]
}

// ── Check providers ────────────────────────────────────────────────────

struct FixedProvider {
    result: bool,
}

#[tonic::async_trait]
impl pb::check_provider_service_server::CheckProviderService for FixedProvider {
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

struct EchoProvider;

#[tonic::async_trait]
impl pb::check_provider_service_server::CheckProviderService for EchoProvider {
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

async fn spawn_provider<S: pb::check_provider_service_server::CheckProviderService>(
    svc: S,
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(pb::check_provider_service_server::CheckProviderServiceServer::new(svc))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
    });
    format!("http://{addr}")
}

/// Register a check under the default profile, through the public API.
async fn register_check(addr: SocketAddr, name: &str, url: &str) {
    let created = rpc_call(
        addr,
        Some(ROOT_TOKEN),
        "Checks::Create",
        json!({ "name": name, "upstreamServices": [url] }),
    )
    .await;
    let check_id = result(&created)["id"].as_str().unwrap().to_string();

    let profile = rpc_call(
        addr,
        Some(ROOT_TOKEN),
        "Profiles::Get",
        json!({ "name": "default" }),
    )
    .await;
    let profile_id = result(&profile)["id"].as_str().unwrap().to_string();
    let mut checks: Vec<String> = result(&profile)["checks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    checks.push(check_id);

    let updated = rpc_call(
        addr,
        Some(ROOT_TOKEN),
        "Profiles::Update",
        json!({ "id": profile_id, "checks": checks }),
    )
    .await;
    result(&updated);
}

// ── Scenarios ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tls12_handshake_is_rejected() {
    let addr = start_gateway().await;

    let connector = TlsConnector::from(Arc::new(client_config(
        &[&rustls::version::TLS12],
        &[b"http/1.1"],
    )));
    let tcp = TcpStream::connect(addr).await.unwrap();
    let server_name = ServerName::try_from("localhost").unwrap();
    assert!(connector.connect(server_name, tcp).await.is_err());
}

#[tokio::test]
async fn test_plaintext_connection_gets_http_400() {
    let addr = start_gateway().await;

    let mut tcp = TcpStream::connect(addr).await.unwrap();
    tcp.write_all(b"GET / HTTP/1.1\r\nhost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut response = Vec::new();
    tcp.read_to_end(&mut response).await.unwrap();
    let response = String::from_utf8_lossy(&response);
    assert!(response.starts_with("HTTP/1.1 400"), "got: {response}");
}

#[tokio::test]
async fn test_health_is_open_and_rpc_is_not() {
    let addr = start_gateway().await;

    let (status, body) = https_request(
        addr,
        "GET /healthz HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n",
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body, "ok");

    let (status, _) = https_request(
        addr,
        "POST /v1/rpc HTTP/1.1\r\nhost: localhost\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
    )
    .await;
    assert_eq!(status, 401);

    // Readiness requires credentials like everything else.
    let (status, _) = https_request(
        addr,
        "GET /healthz/ready HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n",
    )
    .await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn test_invalid_token_gets_constant_message() {
    let addr = start_gateway().await;
    let (status, body) = https_request(
        addr,
        "POST /v1/rpc HTTP/1.1\r\nhost: localhost\r\nauthorization: Bearer wrong\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
    )
    .await;
    assert_eq!(status, 401);
    assert!(body.contains("invalid token"));
}

#[tokio::test]
async fn test_scan_happy_path_with_image() {
    let addr = start_gateway().await;
    let provider = spawn_provider(FixedProvider { result: true }).await;
    register_check(addr, "dummycheck", &provider).await;

    let png = BASE64.encode([0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    let response = rpc_call(
        addr,
        Some(ROOT_TOKEN),
        "Scan",
        json!({ "image": png }),
    )
    .await;
    let outcome = result(&response);
    assert_eq!(outcome["verdict"], json!(true));
    assert_eq!(outcome["checks"][0]["name"], json!("dummycheck"));
    assert_eq!(outcome["checks"][0]["result"], json!(true));
}

#[tokio::test]
async fn test_scan_text_passthrough() {
    let addr = start_gateway().await;
    let provider = spawn_provider(EchoProvider).await;
    register_check(addr, "dummycheck", &provider).await;

    let response = rpc_call(addr, Some(ROOT_TOKEN), "Scan", json!({ "text": "false" })).await;
    let outcome = result(&response);
    assert_eq!(outcome["verdict"], json!(false));
    assert_eq!(outcome["checks"].as_array().unwrap().len(), 1);
    assert_eq!(outcome["checks"][0]["name"], json!("dummycheck"));
}

#[tokio::test]
async fn test_scan_partial_failure_is_absorbed() {
    let addr = start_gateway().await;
    let alive = spawn_provider(FixedProvider { result: true }).await;
    register_check(addr, "alive", &alive).await;
    register_check(addr, "dead", "http://127.0.0.1:1").await;

    let response = rpc_call(addr, Some(ROOT_TOKEN), "Scan", json!({ "text": "x" })).await;
    let outcome = result(&response);
    assert_eq!(outcome["checks"].as_array().unwrap().len(), 1);
    assert_eq!(outcome["checks"][0]["name"], json!("alive"));
    assert_eq!(outcome["verdict"], json!(true));
}

#[tokio::test]
async fn test_scan_payload_must_be_exactly_one() {
    let addr = start_gateway().await;

    let response = rpc_call(
        addr,
        Some(ROOT_TOKEN),
        "Scan",
        json!({ "text": "x", "image": "eA==" }),
    )
    .await;
    assert_eq!(response["error"]["code"], json!(-32602));

    let response = rpc_call(addr, Some(ROOT_TOKEN), "Scan", json!({})).await;
    assert_eq!(response["error"]["code"], json!(-32602));
}

#[tokio::test]
async fn test_unknown_method_and_parse_error_codes() {
    let addr = start_gateway().await;

    let response = rpc_call(addr, Some(ROOT_TOKEN), "Users::Frobnicate", json!({})).await;
    assert_eq!(response["error"]["code"], json!(-32601));

    let request = format!(
        "POST /v1/rpc HTTP/1.1\r\nhost: localhost\r\nauthorization: Bearer {ROOT_TOKEN}\r\ncontent-type: application/json\r\ncontent-length: 9\r\nconnection: close\r\n\r\nnot json!"
    );
    let (status, body) = https_request(addr, &request).await;
    assert_eq!(status, 200);
    let response: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(response["error"]["code"], json!(-32700));
}

#[tokio::test]
async fn test_user_lifecycle_and_cursor_forgery() {
    let addr = start_gateway().await;

    // Create a plain user and capture the one-time token.
    let created = rpc_call(
        addr,
        Some(ROOT_TOKEN),
        "Users::Create",
        json!({ "name": "alice", "email": "alice@example.com" }),
    )
    .await;
    let alice_token = result(&created)["token"].as_str().unwrap().to_string();
    assert_eq!(BASE64.decode(&alice_token).unwrap().len(), 64);

    // Alice can read herself with the fresh token.
    let me = rpc_call(
        addr,
        Some(&alice_token),
        "Users::Get",
        json!({ "name": "alice" }),
    )
    .await;
    assert_eq!(result(&me)["email"], json!("alice@example.com"));

    // Root lists users and takes a cursor; replaying it as Alice fails.
    for i in 0..3 {
        rpc_call(
            addr,
            Some(ROOT_TOKEN),
            "Users::Create",
            json!({ "name": format!("padding-{i}"), "email": format!("p{i}@example.com") }),
        )
        .await;
    }
    // page_size defaults high, so shrink the page via repeated listing is
    // not possible here; instead forge with root's cursor from a full
    // window: create enough users that the page is full.
    let listed = rpc_call(addr, Some(ROOT_TOKEN), "Users::GetMany", json!({})).await;
    let cursor = result(&listed)["cursor"].as_str().unwrap().to_string();
    if !cursor.is_empty() {
        let forged = rpc_call(
            addr,
            Some(&alice_token),
            "Users::GetMany",
            json!({ "cursor": cursor }),
        )
        .await;
        assert_eq!(forged["error"]["code"], json!(-32602));
    } else {
        // The scan ended inside one page; forge a cursor by hand instead.
        let root = rpc_call(addr, Some(ROOT_TOKEN), "Users::Get", json!({ "name": "root" })).await;
        let root_id = result(&root)["id"].as_str().unwrap().to_string();
        let alice_id = result(&me)["id"].as_str().unwrap().to_string();
        let forged_cursor = BASE64.encode(format!("{root_id}::{alice_id}"));
        let forged = rpc_call(
            addr,
            Some(&alice_token),
            "Users::GetMany",
            json!({ "cursor": forged_cursor }),
        )
        .await;
        assert_eq!(forged["error"]["code"], json!(-32602));
    }
}

#[tokio::test]
async fn test_rotate_token_via_rpc_revokes_old() {
    let addr = start_gateway().await;

    let created = rpc_call(
        addr,
        Some(ROOT_TOKEN),
        "Users::Create",
        json!({ "name": "bob", "email": "bob@example.com" }),
    )
    .await;
    let old_token = result(&created)["token"].as_str().unwrap().to_string();
    let bob_id = result(&created)["user"]["id"].as_str().unwrap().to_string();

    let rotated = rpc_call(
        addr,
        Some(&old_token),
        "Users::RotateToken",
        json!({ "id": bob_id }),
    )
    .await;
    let new_token = result(&rotated)["token"].as_str().unwrap().to_string();

    // The old token died the moment the rotation landed.
    let request = format!(
        "POST /v1/rpc HTTP/1.1\r\nhost: localhost\r\nauthorization: Bearer {old_token}\r\ncontent-length: 2\r\nconnection: close\r\n\r\n{{}}"
    );
    let (status, _) = https_request(addr, &request).await;
    assert_eq!(status, 401);

    let me = rpc_call(
        addr,
        Some(&new_token),
        "Users::Get",
        json!({ "id": bob_id }),
    )
    .await;
    assert_eq!(result(&me)["name"], json!("bob"));
}

// ── gRPC over the same listener ────────────────────────────────────────

async fn grpc_channel(addr: SocketAddr) -> tonic::transport::Channel {
    let connector = TlsConnector::from(Arc::new(client_config(
        &[&rustls::version::TLS13],
        &[b"h2"],
    )));
    tonic::transport::Endpoint::from_shared(format!("https://localhost:{}", addr.port()))
        .unwrap()
        .connect_with_connector(tower::service_fn(move |_| {
            let connector = connector.clone();
            async move {
                let tcp = TcpStream::connect(addr).await?;
                let server_name = ServerName::try_from("localhost").unwrap();
                let tls = connector.connect(server_name, tcp).await?;
                Ok::<_, std::io::Error>(hyper_util::rt::TokioIo::new(tls))
            }
        }))
        .await
        .unwrap()
}

fn authed<T>(mut request: tonic::Request<T>, token: &str) -> tonic::Request<T> {
    request.metadata_mut().insert(
        "authorization",
        format!("Bearer {token}").parse().unwrap(),
    );
    request
}

#[tokio::test]
async fn test_grpc_get_user_requires_and_honours_token() {
    let addr = start_gateway().await;
    let channel = grpc_channel(addr).await;

    let mut client = pb::user_service_client::UserServiceClient::new(channel);

    let bare = tonic::Request::new(pb::GetUserRequest {
        selector: Some(pb::get_user_request::Selector::Name("root".to_string())),
    });
    let err = client.get(bare).await.unwrap_err();
    assert_eq!(err.code(), tonic::Code::Unauthenticated);
    assert_eq!(err.message(), "invalid token");

    let request = authed(
        tonic::Request::new(pb::GetUserRequest {
            selector: Some(pb::get_user_request::Selector::Name("root".to_string())),
        }),
        ROOT_TOKEN,
    );
    let user = client.get(request).await.unwrap().into_inner();
    assert_eq!(user.name, "root");
    assert!(user.is_admin);
    assert!(user.created_at.is_some());
}

#[tokio::test]
async fn test_grpc_scan_round_trip() {
    let addr = start_gateway().await;
    let provider = spawn_provider(FixedProvider { result: true }).await;
    register_check(addr, "dummycheck", &provider).await;

    let channel = grpc_channel(addr).await;
    let mut client = pb::scan_service_client::ScanServiceClient::new(channel);

    let request = authed(
        tonic::Request::new(pb::ScanRequest {
            profile: String::new(),
            payload: Some(pb::scan_request::Payload::Text("anything".to_string())),
        }),
        ROOT_TOKEN,
    );
    let outcome = client.scan(request).await.unwrap().into_inner();
    assert!(outcome.verdict);
    assert_eq!(outcome.checks.len(), 1);
    assert_eq!(outcome.checks[0].name, "dummycheck");
}
