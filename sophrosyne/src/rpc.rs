//! JSON-RPC 2.0 over `POST /v1/rpc`.
//!
//! One flat method namespace (`Users::Create`, `Profiles::Get`, `Scan`,
//! …). The body is length-bounded before parsing; malformed JSON is a
//! parse error, an unknown method is method-not-found, and application
//! failures map onto the numeric taxonomy below. Transport status is
//! always 200 once authentication has passed; errors live in the
//! envelope.

use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use soph_core::{validation::validate, Error, Id, Principal, RequestContext, ValidationReport};
use soph_data::{Check, Profile, User};
use soph_services::{
    CreateCheckInput, CreateProfileInput, CreateUserInput, ScanPayload, UpdateCheckInput,
    UpdateProfileInput, UpdateUserInput,
};

use crate::state::AppState;

pub const PARSE_ERROR: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const UNAUTHENTICATED: i64 = -32001;
pub const PERMISSION_DENIED: i64 = -32002;
pub const NOT_FOUND: i64 = -32003;
pub const CONFLICT: i64 = -32004;

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    id: Value,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl From<Error> for RpcError {
    fn from(err: Error) -> Self {
        use soph_core::ErrorKind::*;
        let code = match err.kind() {
            Validation | InvalidCursor => INVALID_PARAMS,
            Unauthenticated => UNAUTHENTICATED,
            PermissionDenied => PERMISSION_DENIED,
            NotFound => NOT_FOUND,
            Conflict => CONFLICT,
            Internal | UpstreamUnavailable => INTERNAL_ERROR,
        };
        let data = (!err.fields().is_empty())
            .then(|| serde_json::to_value(err.fields()).unwrap_or(Value::Null));
        RpcError {
            code,
            message: err.message().to_string(),
            data,
        }
    }
}

fn success(id: Value, result: Value) -> Response {
    Json(serde_json::json!({ "jsonrpc": "2.0", "result": result, "id": id })).into_response()
}

fn failure(id: Value, error: RpcError) -> Response {
    Json(serde_json::json!({ "jsonrpc": "2.0", "error": error, "id": id })).into_response()
}

/// `POST /v1/rpc`.
pub async fn handle(
    State(state): State<AppState>,
    principal: Option<Extension<Principal>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    // An over-long body fails before any parsing happens.
    let body = match body {
        Ok(body) => body,
        Err(_) => {
            return failure(
                Value::Null,
                RpcError {
                    code: INVALID_PARAMS,
                    message: "request body too large".to_string(),
                    data: None,
                },
            );
        }
    };

    let request: RpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => {
            return failure(
                Value::Null,
                RpcError {
                    code: PARSE_ERROR,
                    message: "parse error".to_string(),
                    data: None,
                },
            );
        }
    };

    let ctx = match principal {
        Some(Extension(principal)) => RequestContext::with_principal(principal),
        None => RequestContext::new(),
    };

    let id = request.id.clone();
    match dispatch(&state, &ctx, &request.method, request.params).await {
        Ok(result) => success(id, result),
        Err(error) => failure(id, error),
    }
}

async fn dispatch(
    state: &AppState,
    ctx: &RequestContext,
    method: &str,
    params: Value,
) -> Result<Value, RpcError> {
    match method {
        "Users::Get" => {
            let params: GetParams = parse(params)?;
            let user = match params.selector()? {
                Selector::Id(id) => state.users.get(ctx, id).await?,
                Selector::Name(name) => state.users.get_by_name(ctx, &name).await?,
                Selector::Email(email) => state.users.get_by_email(ctx, &email).await?,
            };
            Ok(to_value(UserDto::from(&user)))
        }
        "Users::GetMany" => {
            let params: ListParams = parse(params)?;
            let page = state.users.list(ctx, &params.cursor).await?;
            Ok(serde_json::json!({
                "users": page.items.iter().map(UserDto::from).collect::<Vec<_>>(),
                "cursor": page.cursor,
                "total": page.items.len(),
            }))
        }
        "Users::Create" => {
            let input: CreateUserInput = parse(params)?;
            validate(&input)?;
            let created = state.users.create(ctx, input).await?;
            Ok(serde_json::json!({
                "user": UserDto::from(&created.user),
                "token": BASE64.encode(created.token),
            }))
        }
        "Users::Update" => {
            let input: UpdateUserInput = parse(params)?;
            validate(&input)?;
            let user = state.users.update(ctx, input).await?;
            Ok(to_value(UserDto::from(&user)))
        }
        "Users::Delete" => {
            let params: IdParams = parse(params)?;
            state.users.delete(ctx, params.id).await?;
            Ok(serde_json::json!({}))
        }
        "Users::RotateToken" => {
            let params: IdParams = parse(params)?;
            let rotated = state.users.rotate_token(ctx, params.id).await?;
            Ok(serde_json::json!({ "token": BASE64.encode(rotated.token) }))
        }
        "Profiles::Get" => {
            let params: GetParams = parse(params)?;
            let profile = match params.selector()? {
                Selector::Id(id) => state.profiles.get(ctx, id).await?,
                Selector::Name(name) => state.profiles.get_by_name(ctx, &name).await?,
                Selector::Email(_) => {
                    return Err(invalid_params("profiles have no email selector"));
                }
            };
            Ok(to_value(ProfileDto::from(&profile)))
        }
        "Profiles::GetMany" => {
            let params: ListParams = parse(params)?;
            let page = state.profiles.list(ctx, &params.cursor).await?;
            Ok(serde_json::json!({
                "profiles": page.items.iter().map(ProfileDto::from).collect::<Vec<_>>(),
                "cursor": page.cursor,
                "total": page.items.len(),
            }))
        }
        "Profiles::Create" => {
            let input: CreateProfileInput = parse(params)?;
            validate(&input)?;
            let profile = state.profiles.create(ctx, input).await?;
            Ok(to_value(ProfileDto::from(&profile)))
        }
        "Profiles::Update" => {
            let input: UpdateProfileInput = parse(params)?;
            validate(&input)?;
            let profile = state.profiles.update(ctx, input).await?;
            Ok(to_value(ProfileDto::from(&profile)))
        }
        "Profiles::Delete" => {
            let params: IdParams = parse(params)?;
            state.profiles.delete(ctx, params.id).await?;
            Ok(serde_json::json!({}))
        }
        "Checks::Get" => {
            let params: GetParams = parse(params)?;
            let check = match params.selector()? {
                Selector::Id(id) => state.checks.get(ctx, id).await?,
                Selector::Name(name) => state.checks.get_by_name(ctx, &name).await?,
                Selector::Email(_) => {
                    return Err(invalid_params("checks have no email selector"));
                }
            };
            Ok(to_value(CheckDto::from(&check)))
        }
        "Checks::GetMany" => {
            let params: ListParams = parse(params)?;
            let page = state.checks.list(ctx, &params.cursor).await?;
            Ok(serde_json::json!({
                "checks": page.items.iter().map(CheckDto::from).collect::<Vec<_>>(),
                "cursor": page.cursor,
                "total": page.items.len(),
            }))
        }
        "Checks::Create" => {
            let input: CreateCheckInput = parse(params)?;
            validate(&input)?;
            let check = state.checks.create(ctx, input).await?;
            Ok(to_value(CheckDto::from(&check)))
        }
        "Checks::Update" => {
            let input: UpdateCheckInput = parse(params)?;
            validate(&input)?;
            let check = state.checks.update(ctx, input).await?;
            Ok(to_value(CheckDto::from(&check)))
        }
        "Checks::Delete" => {
            let params: IdParams = parse(params)?;
            state.checks.delete(ctx, params.id).await?;
            Ok(serde_json::json!({}))
        }
        "Scan" => {
            let params: ScanParams = parse(params)?;
            let payload = params.payload()?;
            let outcome = state
                .dispatcher
                .scan(ctx, payload, params.profile.as_deref())
                .await?;
            Ok(serde_json::json!({
                "verdict": outcome.verdict,
                "checks": outcome
                    .checks
                    .iter()
                    .map(|c| serde_json::json!({
                        "name": c.name,
                        "result": c.result,
                        "details": c.details,
                    }))
                    .collect::<Vec<_>>(),
            }))
        }
        _ => Err(RpcError {
            code: METHOD_NOT_FOUND,
            message: "method not found".to_string(),
            data: None,
        }),
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(|e| invalid_params(&e.to_string()))
}

fn invalid_params(detail: &str) -> RpcError {
    RpcError {
        code: INVALID_PARAMS,
        message: "invalid parameters".to_string(),
        data: Some(Value::String(detail.to_string())),
    }
}

fn to_value<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

// ── Parameter shapes ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GetParams {
    #[serde(default)]
    id: Option<Id>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

enum Selector {
    Id(Id),
    Name(String),
    Email(String),
}

impl GetParams {
    /// Exactly one selector.
    fn selector(self) -> Result<Selector, RpcError> {
        match (self.id, self.name, self.email) {
            (Some(id), None, None) => Ok(Selector::Id(id)),
            (None, Some(name), None) => Ok(Selector::Name(name)),
            (None, None, Some(email)) => Ok(Selector::Email(email)),
            _ => Err(invalid_params("exactly one of id, name, email is required")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    cursor: String,
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: Id,
}

#[derive(Debug, Deserialize)]
struct ScanParams {
    #[serde(default)]
    profile: Option<String>,
    #[serde(default)]
    text: Option<String>,
    /// Base64-encoded image bytes.
    #[serde(default)]
    image: Option<String>,
}

impl ScanParams {
    /// The payload carries exactly one of text or image.
    fn payload(&self) -> Result<ScanPayload, RpcError> {
        match (&self.text, &self.image) {
            (Some(text), None) => Ok(ScanPayload::Text(text.clone())),
            (None, Some(image)) => {
                let bytes = BASE64.decode(image).map_err(|_| {
                    let mut report = ValidationReport::default();
                    report.push("image", "must be base64");
                    RpcError::from(Error::validation(report))
                })?;
                Ok(ScanPayload::Image(bytes))
            }
            _ => {
                let mut report = ValidationReport::default();
                report.push("payload", "exactly one of text or image is required");
                Err(RpcError::from(Error::validation(report)))
            }
        }
    }
}

// ── Response shapes ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserDto {
    id: String,
    name: String,
    email: String,
    is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_profile: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted_at: Option<DateTime<Utc>>,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        UserDto {
            id: user.id.to_string(),
            name: user.name.clone(),
            email: user.email.clone(),
            is_admin: user.is_admin,
            default_profile: user.default_profile.map(|id| id.to_string()),
            created_at: user.created_at,
            updated_at: user.updated_at,
            deleted_at: user.deleted_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileDto {
    id: String,
    name: String,
    checks: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Profile> for ProfileDto {
    fn from(profile: &Profile) -> Self {
        ProfileDto {
            id: profile.id.to_string(),
            name: profile.name.clone(),
            checks: profile.checks.iter().map(|id| id.to_string()).collect(),
            created_at: profile.created_at,
            updated_at: profile.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckDto {
    id: String,
    name: String,
    profiles: Vec<String>,
    upstream_services: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<&Check> for CheckDto {
    fn from(check: &Check) -> Self {
        CheckDto {
            id: check.id.to_string(),
            name: check.name.clone(),
            profiles: check.profiles.iter().map(|id| id.to_string()).collect(),
            upstream_services: check.upstream_services.clone(),
            created_at: check.created_at,
            updated_at: check.updated_at,
        }
    }
}
