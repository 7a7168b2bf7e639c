use std::net::SocketAddr;

use soph_core::Error;
use sophrosyne::{app::App, config::Config, server::Server, telemetry};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        // Telemetry may not be up yet; stderr is the reliable channel.
        eprintln!("sophrosyne: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Error> {
    let _ = dotenvy::dotenv();
    let config = Config::load()?;
    let _telemetry = telemetry::init(&config);

    let App {
        state,
        authenticator,
        tls,
        closers,
    } = App::build(&config).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::internal(format!("cannot bind {addr}")).with_source(e))?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        });
    }

    let server = Server::new(
        state,
        authenticator,
        tls,
        config.server.max_body_size,
        config.server.shutdown_timeout,
    );
    let result = server.serve(listener, shutdown).await;

    for close in &closers {
        close();
    }
    result
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(error) => {
            tracing::error!(%error, "cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
