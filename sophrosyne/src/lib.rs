//! Sophrosyne: a content-moderation gateway for generative-AI pipelines.
//!
//! Clients submit a text or image payload and get a go/no-go verdict
//! produced by fanning the payload out to every check in a profile. The
//! gateway owns identity (users and bearer tokens), authorization,
//! profile/check configuration, and the concurrent scan dispatcher; the
//! moderation itself happens in external gRPC providers.
//!
//! This crate is the deployable surface: configuration, telemetry, the
//! authenticator, both transport stacks (JSON-RPC and gRPC), and the
//! dual-protocol TLS ingress. The reusable pieces live in the `soph-*`
//! crates underneath.

pub mod app;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod grpc;
pub mod health;
pub mod multiplex;
pub mod rpc;
pub mod server;
pub mod state;
pub mod telemetry;

pub use app::App;
pub use config::Config;
pub use server::Server;
pub use state::AppState;
