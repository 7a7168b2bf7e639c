//! The authenticator: bearer token → principal.
//!
//! One tower middleware covers both transports, because the gRPC
//! `authorization` metadata is the same HTTP header. The resolved
//! [`Principal`] is attached to the request extensions, where both the
//! axum handlers and the tonic services read it.
//!
//! Every failure (missing header, malformed token, unknown token) gets
//! the same constant `invalid token` answer. The liveness probe and the
//! standard gRPC health service are the only unauthenticated routes.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use soph_core::{error::INVALID_TOKEN, Error, Principal};
use soph_data::UserStore;
use soph_security::{TokenProtector, RAW_TOKEN_LEN};
use tower::Service;
use tracing::Instrument;

/// Resolves bearer tokens against the user store.
///
/// Holds the cached store decorator, whose token path always reaches the
/// primary store, so a rotated or deleted token fails here immediately.
#[derive(Clone)]
pub struct Authenticator {
    users: Arc<dyn UserStore>,
    protector: TokenProtector,
}

impl Authenticator {
    pub fn new(users: Arc<dyn UserStore>, protector: TokenProtector) -> Self {
        Self { users, protector }
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, Error> {
        let header = headers
            .get(AUTHORIZATION)
            .ok_or_else(Error::invalid_token)?;
        let value = header.to_str().map_err(|_| Error::invalid_token())?;
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .ok_or_else(Error::invalid_token)?;

        let raw = decode_token(token)?;
        let protected = self.protector.protect(&raw);
        let user = self
            .users
            .get_user_by_protected_token(&protected)
            .await
            .map_err(|_| Error::invalid_token())?;
        Ok(user.principal())
    }
}

/// Generated tokens are 64 raw bytes and travel base64-encoded (standard
/// or URL-safe alphabet), so base64 is only honoured when it decodes to
/// exactly that length. Anything else (a development static token, say)
/// is taken as its literal header bytes, matching how bootstrap stored
/// it. Guessing harder than this would make authentication depend on
/// whether a token happens to look like base64.
fn decode_token(token: &str) -> Result<Vec<u8>, Error> {
    if token.is_empty() {
        return Err(Error::invalid_token());
    }
    for engine in [&STANDARD, &URL_SAFE, &URL_SAFE_NO_PAD] {
        if let Ok(decoded) = engine.decode(token) {
            if decoded.len() == RAW_TOKEN_LEN {
                return Ok(decoded);
            }
        }
    }
    Ok(token.as_bytes().to_vec())
}

fn is_exempt<B>(req: &Request<B>) -> bool {
    (req.method() == Method::GET && req.uri().path() == "/healthz")
        || req.uri().path().starts_with("/grpc.health.v1.Health/")
}

fn is_grpc<B>(req: &Request<B>) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .map(|ct| ct.as_bytes().starts_with(b"application/grpc"))
        .unwrap_or(false)
}

/// The transport-appropriate `unauthenticated` response.
fn rejection(grpc: bool) -> Response<Body> {
    if grpc {
        let mut response = Response::new(Body::empty());
        let headers = response.headers_mut();
        headers.insert(
            "grpc-status",
            (tonic::Code::Unauthenticated as i32).into(),
        );
        headers.insert("grpc-message", http::HeaderValue::from_static(INVALID_TOKEN));
        headers.insert(
            CONTENT_TYPE,
            http::HeaderValue::from_static("application/grpc"),
        );
        response
    } else {
        let body = serde_json::json!({ "error": INVALID_TOKEN });
        let mut response = Response::new(Body::from(body.to_string()));
        *response.status_mut() = StatusCode::UNAUTHORIZED;
        response.headers_mut().insert(
            CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        response
    }
}

/// Middleware wrapping the multiplexed ingress service.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    authenticator: Authenticator,
}

impl<S> AuthService<S> {
    pub fn new(inner: S, authenticator: Authenticator) -> Self {
        Self {
            inner,
            authenticator,
        }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AuthService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send,
    ReqBody: Send + 'static,
    ResBody: http_body::Body<Data = bytes::Bytes> + Send + 'static,
    ResBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        // Take the ready service; leave the clone for the next call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let authenticator = self.authenticator.clone();

        // The request-level span. `user_id` is declared empty here and
        // recorded once the principal resolves, so every log line below
        // this point carries it.
        let span = tracing::info_span!(
            "ingress",
            method = %req.method(),
            path = %req.uri().path(),
            user_id = tracing::field::Empty,
        );
        let handle = span.clone();

        Box::pin(
            async move {
                if !is_exempt(&req) {
                    match authenticator.authenticate(req.headers()).await {
                        Ok(principal) => {
                            handle.record("user_id", tracing::field::display(principal.id));
                            req.extensions_mut().insert(principal);
                        }
                        Err(error) => {
                            tracing::debug!(%error, "authentication failed");
                            return Ok(rejection(is_grpc(&req)));
                        }
                    }
                }
                let response = inner.call(req).await?;
                Ok(response.map(Body::new))
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_tokens_decode_to_raw_bytes() {
        let raw = [7u8; 64];
        let encoded = STANDARD.encode(raw);
        assert_eq!(decode_token(&encoded).unwrap(), raw.to_vec());

        let url_safe = URL_SAFE.encode(raw);
        assert_eq!(decode_token(&url_safe).unwrap(), raw.to_vec());
    }

    #[test]
    fn non_base64_tokens_pass_through_as_bytes() {
        assert_eq!(decode_token("dev token!").unwrap(), b"dev token!".to_vec());
    }

    #[test]
    fn base64_looking_static_tokens_stay_literal() {
        // 16 chars of the URL-safe alphabet, a multiple of 4: this decodes
        // cleanly, but to 12 bytes, not a raw token. The literal bytes are
        // what bootstrap protected, so the literal bytes must win.
        assert_eq!(
            decode_token("local-root-token").unwrap(),
            b"local-root-token".to_vec()
        );
    }

    #[test]
    fn only_full_length_base64_is_decoded() {
        let encoded = STANDARD.encode([7u8; 32]);
        assert_eq!(decode_token(&encoded).unwrap(), encoded.as_bytes().to_vec());
    }

    #[test]
    fn empty_tokens_are_rejected() {
        assert!(decode_token("").is_err());
    }

    #[test]
    fn health_probe_is_exempt_but_ready_is_not() {
        let live = Request::builder()
            .method(Method::GET)
            .uri("/healthz")
            .body(())
            .unwrap();
        assert!(is_exempt(&live));

        let ready = Request::builder()
            .method(Method::GET)
            .uri("/healthz/ready")
            .body(())
            .unwrap();
        assert!(!is_exempt(&ready));

        let rpc = Request::builder()
            .method(Method::POST)
            .uri("/v1/rpc")
            .body(())
            .unwrap();
        assert!(!is_exempt(&rpc));
    }
}
