//! The ingress: one TLS listener serving both transports.
//!
//! Accept loop → plaintext sniff → rustls handshake → hyper auto
//! (HTTP/1.1 + HTTP/2) → authenticator → content-type multiplexer →
//! axum router or tonic routes.
//!
//! Graceful shutdown: the cancellation token stops the accept loop, the
//! task tracker drains in-flight connections up to the configured
//! deadline, then the process force-closes whatever remains.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use soph_core::Error;
use soph_proto::v1 as pb;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::service::Routes;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthService, Authenticator};
use crate::grpc::{CheckGrpc, ProfileGrpc, ScanGrpc, UserGrpc};
use crate::multiplex::MultiplexService;
use crate::state::AppState;
use crate::{health, rpc};

/// The answer a plaintext client gets on the TLS port, byte-for-byte the
/// conventional one.
const PLAINTEXT_REJECTION: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\
content-type: text/plain; charset=utf-8\r\n\
connection: close\r\n\
content-length: 48\r\n\r\n\
Client sent an HTTP request to an HTTPS server.\n";

/// TLS records start with a handshake byte no HTTP method shares.
const TLS_HANDSHAKE_BYTE: u8 = 0x16;

pub struct Server {
    state: AppState,
    authenticator: Authenticator,
    tls: Arc<rustls::ServerConfig>,
    max_body_size: usize,
    shutdown_timeout: Duration,
}

impl Server {
    pub fn new(
        state: AppState,
        authenticator: Authenticator,
        tls: rustls::ServerConfig,
        max_body_size: usize,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            state,
            authenticator,
            tls: Arc::new(tls),
            max_body_size,
            shutdown_timeout,
        }
    }

    /// Serve until the token is cancelled, then drain.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<(), Error> {
        let service = AuthService::new(self.build_multiplex().await, self.authenticator.clone());
        let acceptor = TlsAcceptor::from(Arc::clone(&self.tls));
        let tracker = TaskTracker::new();

        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::internal("listener has no local address").with_source(e))?;
        tracing::info!(%local_addr, "serving");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(error) => {
                            tracing::warn!(%error, "accept failed");
                            continue;
                        }
                    };
                    let acceptor = acceptor.clone();
                    let service = service.clone();
                    tracker.spawn(serve_connection(stream, peer, acceptor, service));
                }
            }
        }
        drop(listener);

        tracker.close();
        tracing::info!("draining in-flight connections");
        if tokio::time::timeout(self.shutdown_timeout, tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = tracker.len(),
                "shutdown deadline reached, force-closing"
            );
        }
        Ok(())
    }

    async fn build_multiplex(&self) -> MultiplexService {
        let http = Router::new()
            .route(
                "/v1/rpc",
                post(rpc::handle).layer(axum::extract::DefaultBodyLimit::max(self.max_body_size)),
            )
            .route("/healthz", get(health::liveness))
            .route("/healthz/ready", get(health::readiness))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone());

        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        let grpc = Routes::new(health_service)
            .add_service(pb::user_service_server::UserServiceServer::new(
                UserGrpc::new(self.state.users.clone()),
            ))
            .add_service(pb::profile_service_server::ProfileServiceServer::new(
                ProfileGrpc::new(self.state.profiles.clone()),
            ))
            .add_service(pb::check_service_server::CheckServiceServer::new(
                CheckGrpc::new(self.state.checks.clone()),
            ))
            .add_service(pb::scan_service_server::ScanServiceServer::new(
                ScanGrpc::new(self.state.dispatcher.clone()),
            ));

        health_reporter
            .set_serving::<pb::scan_service_server::ScanServiceServer<ScanGrpc>>()
            .await;
        health_reporter
            .set_serving::<pb::user_service_server::UserServiceServer<UserGrpc>>()
            .await;
        health_reporter
            .set_serving::<pb::profile_service_server::ProfileServiceServer<ProfileGrpc>>()
            .await;
        health_reporter
            .set_serving::<pb::check_service_server::CheckServiceServer<CheckGrpc>>()
            .await;

        MultiplexService::new(grpc, http)
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    acceptor: TlsAcceptor,
    service: AuthService<MultiplexService>,
) {
    // Plaintext sniff before handing the stream to rustls.
    let mut first = [0u8; 1];
    match stream.peek(&mut first).await {
        Ok(n) if n > 0 && first[0] != TLS_HANDSHAKE_BYTE => {
            tracing::debug!(%peer, "plaintext connection on TLS port");
            let mut stream = stream;
            let _ = stream.write_all(PLAINTEXT_REJECTION).await;
            let _ = stream.shutdown().await;
            return;
        }
        Ok(_) => {}
        Err(error) => {
            tracing::debug!(%peer, %error, "connection closed before handshake");
            return;
        }
    }

    let tls_stream = match acceptor.accept(stream).await {
        Ok(tls_stream) => tls_stream,
        Err(error) => {
            tracing::debug!(%peer, %error, "TLS handshake failed");
            return;
        }
    };

    let hyper_service = TowerToHyperService::new(service);
    if let Err(error) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(TokioIo::new(tls_stream), hyper_service)
        .await
    {
        tracing::debug!(%peer, %error, "connection error");
    }
}
