//! `sophrosyne.v1.UserService`.

use std::sync::Arc;

use soph_proto::v1 as pb;
use soph_services::{CreateUserInput, UpdateUserInput, UserService};
use tonic::{Request, Response, Status};

use super::{parse_id, parse_optional_id, request_context, to_status, validated};

pub struct UserGrpc {
    users: Arc<UserService>,
}

impl UserGrpc {
    pub fn new(users: Arc<UserService>) -> Self {
        Self { users }
    }
}

#[tonic::async_trait]
impl pb::user_service_server::UserService for UserGrpc {
    async fn get(
        &self,
        request: Request<pb::GetUserRequest>,
    ) -> Result<Response<pb::GetUserResponse>, Status> {
        let ctx = request_context(&request)?;
        let user = match &request.get_ref().selector {
            Some(pb::get_user_request::Selector::Id(id)) => {
                self.users.get(&ctx, parse_id(id)?).await
            }
            Some(pb::get_user_request::Selector::Name(name)) => {
                self.users.get_by_name(&ctx, name).await
            }
            Some(pb::get_user_request::Selector::Email(email)) => {
                self.users.get_by_email(&ctx, email).await
            }
            None => return Err(Status::invalid_argument("a selector is required")),
        }
        .map_err(to_status)?;
        Ok(Response::new((&user).into()))
    }

    async fn get_many(
        &self,
        request: Request<pb::GetUsersRequest>,
    ) -> Result<Response<pb::GetUsersResponse>, Status> {
        let ctx = request_context(&request)?;
        let page = self
            .users
            .list(&ctx, &request.get_ref().cursor)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::GetUsersResponse {
            total: page.items.len() as i32,
            users: page.items.iter().map(Into::into).collect(),
            cursor: page.cursor,
        }))
    }

    async fn create(
        &self,
        request: Request<pb::CreateUserRequest>,
    ) -> Result<Response<pb::CreateUserResponse>, Status> {
        let ctx = request_context(&request)?;
        let msg = request.get_ref();
        let input = CreateUserInput {
            name: msg.name.clone(),
            email: msg.email.clone(),
            is_admin: msg.is_admin,
            default_profile: parse_optional_id(&msg.default_profile)?,
        };
        validated(&input)?;

        let created = self.users.create(&ctx, input).await.map_err(to_status)?;
        Ok(Response::new(pb::CreateUserResponse {
            user: Some((&created.user).into()),
            token: created.token.to_vec(),
        }))
    }

    async fn update(
        &self,
        request: Request<pb::UpdateUserRequest>,
    ) -> Result<Response<pb::GetUserResponse>, Status> {
        let ctx = request_context(&request)?;
        let msg = request.get_ref();
        let input = UpdateUserInput {
            id: parse_id(&msg.id)?,
            email: msg.email.clone(),
            is_admin: msg.is_admin,
            default_profile: parse_optional_id(&msg.default_profile)?,
            clear_default_profile: msg.clear_default_profile,
        };
        validated(&input)?;

        let user = self.users.update(&ctx, input).await.map_err(to_status)?;
        Ok(Response::new((&user).into()))
    }

    async fn delete(
        &self,
        request: Request<pb::DeleteUserRequest>,
    ) -> Result<Response<pb::DeleteUserResponse>, Status> {
        let ctx = request_context(&request)?;
        let id = parse_id(&request.get_ref().id)?;
        self.users.delete(&ctx, id).await.map_err(to_status)?;
        Ok(Response::new(pb::DeleteUserResponse {}))
    }

    async fn rotate_token(
        &self,
        request: Request<pb::RotateTokenRequest>,
    ) -> Result<Response<pb::RotateTokenResponse>, Status> {
        let ctx = request_context(&request)?;
        let id = parse_id(&request.get_ref().id)?;
        let rotated = self
            .users
            .rotate_token(&ctx, id)
            .await
            .map_err(to_status)?;
        Ok(Response::new(pb::RotateTokenResponse {
            token: rotated.token.to_vec(),
        }))
    }
}
