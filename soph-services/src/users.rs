//! User lifecycle: CRUD, token issuance, token rotation.

use std::sync::Arc;

use rand::rngs::OsRng;
use serde::Deserialize;
use soph_authz::{action, AuthorizationProvider, AuthorizationRequest};
use soph_core::{Cursor, Entity, EntityRef, Error, Id, Principal, RequestContext};
use soph_data::{NewUser, User, UserStore, UserUpdate};
use soph_security::{token, TokenProtector, RAW_TOKEN_LEN};

use crate::page::Page;

/// `Users::Create` parameters.
#[derive(Debug, Clone, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserInput {
    #[garde(length(min = 1, max = 128))]
    pub name: String,
    #[garde(length(min = 3, max = 254))]
    pub email: String,
    #[serde(default)]
    #[garde(skip)]
    pub is_admin: bool,
    #[serde(default)]
    #[garde(skip)]
    pub default_profile: Option<Id>,
}

/// `Users::Update` parameters.
#[derive(Debug, Clone, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserInput {
    #[garde(skip)]
    pub id: Id,
    #[serde(default)]
    #[garde(length(min = 3, max = 254))]
    pub email: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub is_admin: Option<bool>,
    #[serde(default)]
    #[garde(skip)]
    pub default_profile: Option<Id>,
    #[serde(default)]
    #[garde(skip)]
    pub clear_default_profile: bool,
}

/// A user plus the raw token that belongs to it.
///
/// The only two places this exists are the create and rotate responses;
/// the raw token is gone once this value is dropped.
pub struct CreatedUser {
    pub user: User,
    pub token: [u8; RAW_TOKEN_LEN],
}

impl std::fmt::Debug for CreatedUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreatedUser")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Store-backed user operations behind the authorization oracle.
pub struct UserService {
    store: Arc<dyn UserStore>,
    authz: Arc<dyn AuthorizationProvider>,
    protector: TokenProtector,
    page_size: usize,
}

impl std::fmt::Debug for UserService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserService")
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl UserService {
    pub fn new(
        store: Arc<dyn UserStore>,
        authz: Arc<dyn AuthorizationProvider>,
        protector: TokenProtector,
        page_size: usize,
    ) -> Result<Self, Error> {
        crate::validate_page_size(page_size)?;
        Ok(Self {
            store,
            authz,
            protector,
            page_size,
        })
    }

    async fn authorize(
        &self,
        ctx: &RequestContext,
        principal: Principal,
        action: &'static str,
        resource: Option<EntityRef>,
    ) -> Result<(), Error> {
        let mut request = AuthorizationRequest::new(principal, action);
        if let Some(resource) = resource {
            request = request.with_resource(resource);
        }
        if self.authz.is_authorized(ctx, &request).await {
            Ok(())
        } else {
            Err(Error::permission_denied())
        }
    }

    #[tracing::instrument(name = "UserService.get", skip_all, fields(id = %id))]
    pub async fn get(&self, ctx: &RequestContext, id: Id) -> Result<User, Error> {
        let principal = ctx.require_principal()?.clone();
        let user = self.store.get_user(id).await?;
        self.authorize(ctx, principal, action::USERS_GET, Some(user.entity_ref()))
            .await?;
        Ok(user)
    }

    #[tracing::instrument(name = "UserService.get_by_name", skip_all)]
    pub async fn get_by_name(&self, ctx: &RequestContext, name: &str) -> Result<User, Error> {
        let principal = ctx.require_principal()?.clone();
        let user = self.store.get_user_by_name(name).await?;
        self.authorize(ctx, principal, action::USERS_GET, Some(user.entity_ref()))
            .await?;
        Ok(user)
    }

    #[tracing::instrument(name = "UserService.get_by_email", skip_all)]
    pub async fn get_by_email(&self, ctx: &RequestContext, email: &str) -> Result<User, Error> {
        let principal = ctx.require_principal()?.clone();
        let user = self.store.get_user_by_email(email).await?;
        self.authorize(ctx, principal, action::USERS_GET, Some(user.entity_ref()))
            .await?;
        Ok(user)
    }

    /// Page through users. Unauthorized rows are dropped from the page;
    /// the cursor still advances over the pre-filter scan.
    #[tracing::instrument(name = "UserService.list", skip_all)]
    pub async fn list(&self, ctx: &RequestContext, cursor: &str) -> Result<Page<User>, Error> {
        let principal = ctx.require_principal()?.clone();
        let after = if cursor.is_empty() {
            None
        } else {
            Cursor::decode_with_owner(cursor, principal.id)?.position
        };

        let rows = self.store.list_users(after, self.page_size).await?;
        let next = if rows.len() < self.page_size {
            String::new()
        } else {
            Cursor::new(principal.id, rows.last().map(|u| u.id)).encode()
        };

        let mut items = Vec::with_capacity(rows.len());
        for user in rows {
            let request = AuthorizationRequest::new(principal.clone(), action::USERS_LIST)
                .with_resource(user.entity_ref());
            if self.authz.is_authorized(ctx, &request).await {
                items.push(user);
            }
        }
        Ok(Page::new(items, next))
    }

    /// Create a user. The returned raw token is surfaced here and never
    /// again.
    #[tracing::instrument(name = "UserService.create", skip_all)]
    pub async fn create(
        &self,
        ctx: &RequestContext,
        input: CreateUserInput,
    ) -> Result<CreatedUser, Error> {
        let principal = ctx.require_principal()?.clone();
        self.authorize(ctx, principal, action::USERS_CREATE, None)
            .await?;

        let raw = token::new_token(&mut OsRng);
        let protected = self.protector.protect(&raw);
        let user = self
            .store
            .create_user(NewUser {
                name: input.name,
                email: input.email,
                protected_token: protected.to_vec(),
                is_admin: input.is_admin,
                default_profile: input.default_profile,
            })
            .await?;
        tracing::info!(user_id = %user.id, "user created");
        Ok(CreatedUser { user, token: raw })
    }

    #[tracing::instrument(name = "UserService.update", skip_all, fields(id = %input.id))]
    pub async fn update(
        &self,
        ctx: &RequestContext,
        input: UpdateUserInput,
    ) -> Result<User, Error> {
        let principal = ctx.require_principal()?.clone();
        let current = self.store.get_user(input.id).await?;
        self.authorize(ctx, principal, action::USERS_UPDATE, Some(current.entity_ref()))
            .await?;

        let default_profile = if input.clear_default_profile {
            Some(None)
        } else {
            input.default_profile.map(Some)
        };
        self.store
            .update_user(
                input.id,
                UserUpdate {
                    email: input.email,
                    is_admin: input.is_admin,
                    default_profile,
                },
            )
            .await
    }

    #[tracing::instrument(name = "UserService.delete", skip_all, fields(id = %id))]
    pub async fn delete(&self, ctx: &RequestContext, id: Id) -> Result<(), Error> {
        let principal = ctx.require_principal()?.clone();
        let user = self.store.get_user(id).await?;
        self.authorize(ctx, principal, action::USERS_DELETE, Some(user.entity_ref()))
            .await?;
        self.store.delete_user(id).await?;
        tracing::info!(user_id = %id, "user deleted");
        Ok(())
    }

    /// Replace the user's token. The old token stops authenticating the
    /// moment the store write lands.
    #[tracing::instrument(name = "UserService.rotate_token", skip_all, fields(id = %id))]
    pub async fn rotate_token(&self, ctx: &RequestContext, id: Id) -> Result<CreatedUser, Error> {
        let principal = ctx.require_principal()?.clone();
        let user = self.store.get_user(id).await?;
        self.authorize(
            ctx,
            principal,
            action::USERS_ROTATE_TOKEN,
            Some(user.entity_ref()),
        )
        .await?;

        let raw = token::new_token(&mut OsRng);
        let protected = self.protector.protect(&raw);
        let user = self.store.rotate_user_token(id, protected.to_vec()).await?;
        tracing::info!(user_id = %id, "token rotated");
        Ok(CreatedUser { user, token: raw })
    }
}
