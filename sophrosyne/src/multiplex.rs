//! Single-port multiplexing of gRPC and HTTP.
//!
//! Requests with `content-type: application/grpc*` go to the tonic
//! routes, everything else to the axum router. Both inbound and outbound
//! bodies are converted at the seam, so one TLS listener serves both
//! protocols.

use std::task::{Context, Poll};

use axum::Router;
use bytes::Bytes;
use http::{HeaderValue, Request, Response};
use tonic::service::Routes;
use tower::Service;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Routes one connection's requests to either transport stack.
#[derive(Clone)]
pub struct MultiplexService {
    grpc: Routes,
    http: Router,
}

impl MultiplexService {
    pub fn new(grpc: Routes, http: Router) -> Self {
        Self { grpc, http }
    }
}

impl<ReqBody> Service<Request<ReqBody>> for MultiplexService
where
    ReqBody: http_body::Body<Data = Bytes> + Send + 'static,
    ReqBody::Error: Into<BoxError>,
{
    type Response = Response<axum::body::Body>;
    type Error = BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let is_grpc = req
            .headers()
            .get(http::header::CONTENT_TYPE)
            .map(is_grpc_content_type)
            .unwrap_or(false);

        if is_grpc {
            let mut grpc = self.grpc.clone();
            Box::pin(async move {
                let resp = grpc
                    .call(req.map(tonic::body::Body::new))
                    .await
                    .map_err(Into::<BoxError>::into)?;
                Ok(resp.map(axum::body::Body::new))
            })
        } else {
            let mut http = self.http.clone();
            Box::pin(async move {
                let resp = http
                    .call(req.map(axum::body::Body::new))
                    .await
                    .map_err(Into::<BoxError>::into)?;
                Ok(resp)
            })
        }
    }
}

fn is_grpc_content_type(ct: &HeaderValue) -> bool {
    ct.as_bytes().starts_with(b"application/grpc")
}
