//! Profile configuration.

use std::sync::Arc;

use serde::Deserialize;
use soph_authz::{action, AuthorizationProvider, AuthorizationRequest};
use soph_core::{Cursor, Entity, EntityRef, Error, Id, Principal, RequestContext, ValidationReport};
use soph_data::{NewProfile, Profile, ProfileStore, ProfileUpdate};

use crate::page::Page;
use crate::DEFAULT_PROFILE_NAME;

/// `Profiles::Create` parameters. A profile with no checks is valid and
/// scans to a `false` verdict.
#[derive(Debug, Clone, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProfileInput {
    #[garde(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default)]
    #[garde(skip)]
    pub checks: Vec<Id>,
}

/// `Profiles::Update` parameters.
#[derive(Debug, Clone, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileInput {
    #[garde(skip)]
    pub id: Id,
    #[serde(default)]
    #[garde(length(min = 1, max = 128))]
    pub name: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub checks: Option<Vec<Id>>,
}

/// Store-backed profile operations behind the authorization oracle.
pub struct ProfileService {
    store: Arc<dyn ProfileStore>,
    authz: Arc<dyn AuthorizationProvider>,
    page_size: usize,
}

impl ProfileService {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        authz: Arc<dyn AuthorizationProvider>,
        page_size: usize,
    ) -> Result<Self, Error> {
        crate::validate_page_size(page_size)?;
        Ok(Self {
            store,
            authz,
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

    #[tracing::instrument(name = "ProfileService.get", skip_all, fields(id = %id))]
    pub async fn get(&self, ctx: &RequestContext, id: Id) -> Result<Profile, Error> {
        let principal = ctx.require_principal()?.clone();
        let profile = self.store.get_profile(id).await?;
        self.authorize(ctx, principal, action::PROFILES_GET, Some(profile.entity_ref()))
            .await?;
        Ok(profile)
    }

    #[tracing::instrument(name = "ProfileService.get_by_name", skip_all)]
    pub async fn get_by_name(&self, ctx: &RequestContext, name: &str) -> Result<Profile, Error> {
        let principal = ctx.require_principal()?.clone();
        let profile = self.store.get_profile_by_name(name).await?;
        self.authorize(ctx, principal, action::PROFILES_GET, Some(profile.entity_ref()))
            .await?;
        Ok(profile)
    }

    #[tracing::instrument(name = "ProfileService.list", skip_all)]
    pub async fn list(&self, ctx: &RequestContext, cursor: &str) -> Result<Page<Profile>, Error> {
        let principal = ctx.require_principal()?.clone();
        let after = if cursor.is_empty() {
            None
        } else {
            Cursor::decode_with_owner(cursor, principal.id)?.position
        };

        let rows = self.store.list_profiles(after, self.page_size).await?;
        let next = if rows.len() < self.page_size {
            String::new()
        } else {
            Cursor::new(principal.id, rows.last().map(|p| p.id)).encode()
        };

        let mut items = Vec::with_capacity(rows.len());
        for profile in rows {
            let request = AuthorizationRequest::new(principal.clone(), action::PROFILES_LIST)
                .with_resource(profile.entity_ref());
            if self.authz.is_authorized(ctx, &request).await {
                items.push(profile);
            }
        }
        Ok(Page::new(items, next))
    }

    #[tracing::instrument(name = "ProfileService.create", skip_all)]
    pub async fn create(
        &self,
        ctx: &RequestContext,
        input: CreateProfileInput,
    ) -> Result<Profile, Error> {
        let principal = ctx.require_principal()?.clone();
        self.authorize(ctx, principal, action::PROFILES_CREATE, None)
            .await?;
        let profile = self
            .store
            .create_profile(NewProfile {
                name: input.name,
                checks: input.checks,
            })
            .await?;
        tracing::info!(profile_id = %profile.id, name = %profile.name, "profile created");
        Ok(profile)
    }

    #[tracing::instrument(name = "ProfileService.update", skip_all, fields(id = %input.id))]
    pub async fn update(
        &self,
        ctx: &RequestContext,
        input: UpdateProfileInput,
    ) -> Result<Profile, Error> {
        let principal = ctx.require_principal()?.clone();
        let current = self.store.get_profile(input.id).await?;
        self.authorize(
            ctx,
            principal,
            action::PROFILES_UPDATE,
            Some(current.entity_ref()),
        )
        .await?;

        // The fallback profile keeps its name so resolution never dangles.
        if current.name == DEFAULT_PROFILE_NAME
            && input.name.as_deref().is_some_and(|n| n != DEFAULT_PROFILE_NAME)
        {
            let mut report = ValidationReport::default();
            report.push("name", "the default profile cannot be renamed");
            return Err(Error::validation(report));
        }

        self.store
            .update_profile(
                input.id,
                ProfileUpdate {
                    name: input.name,
                    checks: input.checks,
                },
            )
            .await
    }

    #[tracing::instrument(name = "ProfileService.delete", skip_all, fields(id = %id))]
    pub async fn delete(&self, ctx: &RequestContext, id: Id) -> Result<(), Error> {
        let principal = ctx.require_principal()?.clone();
        let profile = self.store.get_profile(id).await?;
        self.authorize(
            ctx,
            principal,
            action::PROFILES_DELETE,
            Some(profile.entity_ref()),
        )
        .await?;

        if profile.name == DEFAULT_PROFILE_NAME {
            return Err(Error::conflict("the default profile cannot be deleted"));
        }
        self.store.delete_profile(id).await?;
        tracing::info!(profile_id = %id, "profile deleted");
        Ok(())
    }
}
