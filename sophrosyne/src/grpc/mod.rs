//! Typed gRPC services mirroring the JSON-RPC surface.
//!
//! Every RPC runs the same sequence: principal out of the request
//! extensions (placed there by the authenticator middleware), garde
//! validation, the shared service call, error translation to a gRPC
//! status.

mod checks;
mod profiles;
mod scan;
mod users;

pub use checks::CheckGrpc;
pub use profiles::ProfileGrpc;
pub use scan::ScanGrpc;
pub use users::UserGrpc;

use soph_core::{error::INVALID_TOKEN, Error, Id, Principal, RequestContext};
use tonic::Status;

/// Principal → context, or the constant `unauthenticated` status.
pub(crate) fn request_context<T>(request: &tonic::Request<T>) -> Result<RequestContext, Status> {
    match request.extensions().get::<Principal>() {
        Some(principal) => Ok(RequestContext::with_principal(principal.clone())),
        None => Err(Status::unauthenticated(INVALID_TOKEN)),
    }
}

/// Taxonomy kind → gRPC status code. The stable short message crosses
/// the wire; detail stays in the logs.
pub(crate) fn to_status(err: Error) -> Status {
    use soph_core::ErrorKind::*;
    let code = match err.kind() {
        Validation | InvalidCursor => tonic::Code::InvalidArgument,
        Unauthenticated => tonic::Code::Unauthenticated,
        PermissionDenied => tonic::Code::PermissionDenied,
        NotFound => tonic::Code::NotFound,
        Conflict => tonic::Code::AlreadyExists,
        Internal | UpstreamUnavailable => tonic::Code::Internal,
    };
    Status::new(code, err.message().to_string())
}

pub(crate) fn parse_id(raw: &str) -> Result<Id, Status> {
    raw.parse()
        .map_err(|_| Status::invalid_argument(format!("malformed id {raw:?}")))
}

pub(crate) fn parse_optional_id(raw: &Option<String>) -> Result<Option<Id>, Status> {
    raw.as_deref()
        .filter(|s| !s.is_empty())
        .map(parse_id)
        .transpose()
}

pub(crate) fn parse_ids(raw: &[String]) -> Result<Vec<Id>, Status> {
    raw.iter().map(|s| parse_id(s)).collect()
}

pub(crate) fn validated<T>(input: &T) -> Result<(), Status>
where
    T: garde::Validate,
    T::Context: Default,
{
    soph_core::validation::validate(input).map_err(to_status)
}
