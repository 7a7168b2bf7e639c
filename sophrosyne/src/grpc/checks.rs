//! `sophrosyne.v1.CheckService`.

use std::sync::Arc;

use soph_proto::v1 as pb;
use soph_services::{CheckService, CreateCheckInput, UpdateCheckInput};
use tonic::{Request, Response, Status};

use super::{parse_id, parse_ids, request_context, to_status, validated};

pub struct CheckGrpc {
    checks: Arc<CheckService>,
}

impl CheckGrpc {
    pub fn new(checks: Arc<CheckService>) -> Self {
        Self { checks }
    }
}

#[tonic::async_trait]
impl pb::check_service_server::CheckService for CheckGrpc {
    async fn get(
        &self,
        request: Request<pb::GetCheckRequest>,
    ) -> Result<Response<pb::GetCheckResponse>, Status> {
        let ctx = request_context(&request)?;
        let check = match &request.get_ref().selector {
            Some(pb::get_check_request::Selector::Id(id)) => {
                self.checks.get(&ctx, parse_id(id)?).await
            }
            Some(pb::get_check_request::Selector::Name(name)) => {
                self.checks.get_by_name(&ctx, name).await
            }
            None => return Err(Status::invalid_argument("a selector is required")),
        }
        .map_err(to_status)?;
        Ok(Response::new((&check).into()))
    }

    async fn get_many(
        &self,
        request: Request<pb::GetChecksRequest>,
    ) -> Result<Response<pb::GetChecksResponse>, Status> {
        let ctx = request_context(&request)?;
        let page = self
            .checks
            .list(&ctx, &request.get_ref().cursor)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::GetChecksResponse {
            total: page.items.len() as i32,
            checks: page.items.iter().map(Into::into).collect(),
            cursor: page.cursor,
        }))
    }

    async fn create(
        &self,
        request: Request<pb::CreateCheckRequest>,
    ) -> Result<Response<pb::GetCheckResponse>, Status> {
        let ctx = request_context(&request)?;
        let msg = request.get_ref();
        let input = CreateCheckInput {
            name: msg.name.clone(),
            profiles: parse_ids(&msg.profiles)?,
            upstream_services: msg.upstream_services.clone(),
        };
        validated(&input)?;

        let check = self.checks.create(&ctx, input).await.map_err(to_status)?;
        Ok(Response::new((&check).into()))
    }

    async fn update(
        &self,
        request: Request<pb::UpdateCheckRequest>,
    ) -> Result<Response<pb::GetCheckResponse>, Status> {
        let ctx = request_context(&request)?;
        let msg = request.get_ref();
        let input = UpdateCheckInput {
            id: parse_id(&msg.id)?,
            name: msg.name.clone(),
            profiles: if msg.replace_profiles {
                Some(parse_ids(&msg.profiles)?)
            } else {
                None
            },
            upstream_services: if msg.replace_upstream_services {
                Some(msg.upstream_services.clone())
            } else {
                None
            },
        };
        validated(&input)?;

        let check = self.checks.update(&ctx, input).await.map_err(to_status)?;
        Ok(Response::new((&check).into()))
    }

    async fn delete(
        &self,
        request: Request<pb::DeleteCheckRequest>,
    ) -> Result<Response<pb::DeleteCheckResponse>, Status> {
        let ctx = request_context(&request)?;
        let id = parse_id(&request.get_ref().id)?;
        self.checks.delete(&ctx, id).await.map_err(to_status)?;
        Ok(Response::new(pb::DeleteCheckResponse {}))
    }
}
