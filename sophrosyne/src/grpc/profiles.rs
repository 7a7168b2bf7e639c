//! `sophrosyne.v1.ProfileService`.

use std::sync::Arc;

use soph_proto::v1 as pb;
use soph_services::{CreateProfileInput, ProfileService, UpdateProfileInput};
use tonic::{Request, Response, Status};

use super::{parse_id, parse_ids, request_context, to_status, validated};

pub struct ProfileGrpc {
    profiles: Arc<ProfileService>,
}

impl ProfileGrpc {
    pub fn new(profiles: Arc<ProfileService>) -> Self {
        Self { profiles }
    }
}

#[tonic::async_trait]
impl pb::profile_service_server::ProfileService for ProfileGrpc {
    async fn get(
        &self,
        request: Request<pb::GetProfileRequest>,
    ) -> Result<Response<pb::GetProfileResponse>, Status> {
        let ctx = request_context(&request)?;
        let profile = match &request.get_ref().selector {
            Some(pb::get_profile_request::Selector::Id(id)) => {
                self.profiles.get(&ctx, parse_id(id)?).await
            }
            Some(pb::get_profile_request::Selector::Name(name)) => {
                self.profiles.get_by_name(&ctx, name).await
            }
            None => return Err(Status::invalid_argument("a selector is required")),
        }
        .map_err(to_status)?;
        Ok(Response::new((&profile).into()))
    }

    async fn get_many(
        &self,
        request: Request<pb::GetProfilesRequest>,
    ) -> Result<Response<pb::GetProfilesResponse>, Status> {
        let ctx = request_context(&request)?;
        let page = self
            .profiles
            .list(&ctx, &request.get_ref().cursor)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::GetProfilesResponse {
            total: page.items.len() as i32,
            profiles: page.items.iter().map(Into::into).collect(),
            cursor: page.cursor,
        }))
    }

    async fn create(
        &self,
        request: Request<pb::CreateProfileRequest>,
    ) -> Result<Response<pb::GetProfileResponse>, Status> {
        let ctx = request_context(&request)?;
        let msg = request.get_ref();
        let input = CreateProfileInput {
            name: msg.name.clone(),
            checks: parse_ids(&msg.checks)?,
        };
        validated(&input)?;

        let profile = self.profiles.create(&ctx, input).await.map_err(to_status)?;
        Ok(Response::new((&profile).into()))
    }

    async fn update(
        &self,
        request: Request<pb::UpdateProfileRequest>,
    ) -> Result<Response<pb::GetProfileResponse>, Status> {
        let ctx = request_context(&request)?;
        let msg = request.get_ref();
        let input = UpdateProfileInput {
            id: parse_id(&msg.id)?,
            name: msg.name.clone(),
            checks: if msg.replace_checks {
                Some(parse_ids(&msg.checks)?)
            } else {
                None
            },
        };
        validated(&input)?;

        let profile = self.profiles.update(&ctx, input).await.map_err(to_status)?;
        Ok(Response::new((&profile).into()))
    }

    async fn delete(
        &self,
        request: Request<pb::DeleteProfileRequest>,
    ) -> Result<Response<pb::DeleteProfileResponse>, Status> {
        let ctx = request_context(&request)?;
        let id = parse_id(&request.get_ref().id)?;
        self.profiles.delete(&ctx, id).await.map_err(to_status)?;
        Ok(Response::new(pb::DeleteProfileResponse {}))
    }
}
