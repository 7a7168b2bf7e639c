//! `sophrosyne.v1.ScanService`.

use std::sync::Arc;

use soph_proto::v1 as pb;
use soph_services::{ScanDispatcher, ScanPayload};
use tonic::{Request, Response, Status};

use super::{request_context, to_status};

pub struct ScanGrpc {
    dispatcher: Arc<ScanDispatcher>,
}

impl ScanGrpc {
    pub fn new(dispatcher: Arc<ScanDispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[tonic::async_trait]
impl pb::scan_service_server::ScanService for ScanGrpc {
    async fn scan(
        &self,
        request: Request<pb::ScanRequest>,
    ) -> Result<Response<pb::ScanResponse>, Status> {
        let ctx = request_context(&request)?;
        let msg = request.get_ref();

        let payload = match &msg.payload {
            Some(pb::scan_request::Payload::Text(text)) => ScanPayload::Text(text.clone()),
            Some(pb::scan_request::Payload::Image(image)) => ScanPayload::Image(image.clone()),
            None => {
                return Err(Status::invalid_argument(
                    "exactly one of text or image is required",
                ))
            }
        };
        let profile = (!msg.profile.is_empty()).then_some(msg.profile.as_str());

        let outcome = self
            .dispatcher
            .scan(&ctx, payload, profile)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::ScanResponse {
            verdict: outcome.verdict,
            checks: outcome
                .checks
                .into_iter()
                .map(|c| pb::CheckResult {
                    name: c.name,
                    result: c.result,
                    details: c.details,
                })
                .collect(),
        }))
    }
}
