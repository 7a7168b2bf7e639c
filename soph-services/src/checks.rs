//! Check registration.

use std::sync::Arc;

use serde::Deserialize;
use soph_authz::{action, AuthorizationProvider, AuthorizationRequest};
use soph_core::{Cursor, Entity, EntityRef, Error, Id, Principal, RequestContext};
use soph_data::{Check, CheckStore, CheckUpdate, NewCheck};

use crate::page::Page;

/// `Checks::Create` parameters. At least one upstream URL is required;
/// a check nobody can dial is a misconfiguration, not a partial failure.
#[derive(Debug, Clone, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckInput {
    #[garde(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default)]
    #[garde(skip)]
    pub profiles: Vec<Id>,
    #[garde(length(min = 1), inner(url))]
    pub upstream_services: Vec<String>,
}

/// `Checks::Update` parameters.
#[derive(Debug, Clone, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCheckInput {
    #[garde(skip)]
    pub id: Id,
    #[serde(default)]
    #[garde(length(min = 1, max = 128))]
    pub name: Option<String>,
    #[serde(default)]
    #[garde(skip)]
    pub profiles: Option<Vec<Id>>,
    #[serde(default)]
    #[garde(length(min = 1), inner(inner(url)))]
    pub upstream_services: Option<Vec<String>>,
}

/// Store-backed check operations behind the authorization oracle.
pub struct CheckService {
    store: Arc<dyn CheckStore>,
    authz: Arc<dyn AuthorizationProvider>,
    page_size: usize,
}

impl CheckService {
    pub fn new(
        store: Arc<dyn CheckStore>,
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

    #[tracing::instrument(name = "CheckService.get", skip_all, fields(id = %id))]
    pub async fn get(&self, ctx: &RequestContext, id: Id) -> Result<Check, Error> {
        let principal = ctx.require_principal()?.clone();
        let check = self.store.get_check(id).await?;
        self.authorize(ctx, principal, action::CHECKS_GET, Some(check.entity_ref()))
            .await?;
        Ok(check)
    }

    #[tracing::instrument(name = "CheckService.get_by_name", skip_all)]
    pub async fn get_by_name(&self, ctx: &RequestContext, name: &str) -> Result<Check, Error> {
        let principal = ctx.require_principal()?.clone();
        let check = self.store.get_check_by_name(name).await?;
        self.authorize(ctx, principal, action::CHECKS_GET, Some(check.entity_ref()))
            .await?;
        Ok(check)
    }

    #[tracing::instrument(name = "CheckService.list", skip_all)]
    pub async fn list(&self, ctx: &RequestContext, cursor: &str) -> Result<Page<Check>, Error> {
        let principal = ctx.require_principal()?.clone();
        let after = if cursor.is_empty() {
            None
        } else {
            Cursor::decode_with_owner(cursor, principal.id)?.position
        };

        let rows = self.store.list_checks(after, self.page_size).await?;
        let next = if rows.len() < self.page_size {
            String::new()
        } else {
            Cursor::new(principal.id, rows.last().map(|c| c.id)).encode()
        };

        let mut items = Vec::with_capacity(rows.len());
        for check in rows {
            let request = AuthorizationRequest::new(principal.clone(), action::CHECKS_LIST)
                .with_resource(check.entity_ref());
            if self.authz.is_authorized(ctx, &request).await {
                items.push(check);
            }
        }
        Ok(Page::new(items, next))
    }

    #[tracing::instrument(name = "CheckService.create", skip_all)]
    pub async fn create(
        &self,
        ctx: &RequestContext,
        input: CreateCheckInput,
    ) -> Result<Check, Error> {
        let principal = ctx.require_principal()?.clone();
        self.authorize(ctx, principal, action::CHECKS_CREATE, None)
            .await?;
        let check = self
            .store
            .create_check(NewCheck {
                name: input.name,
                profiles: input.profiles,
                upstream_services: input.upstream_services,
            })
            .await?;
        tracing::info!(check_id = %check.id, name = %check.name, "check created");
        Ok(check)
    }

    #[tracing::instrument(name = "CheckService.update", skip_all, fields(id = %input.id))]
    pub async fn update(
        &self,
        ctx: &RequestContext,
        input: UpdateCheckInput,
    ) -> Result<Check, Error> {
        let principal = ctx.require_principal()?.clone();
        let current = self.store.get_check(input.id).await?;
        self.authorize(ctx, principal, action::CHECKS_UPDATE, Some(current.entity_ref()))
            .await?;
        self.store
            .update_check(
                input.id,
                CheckUpdate {
                    name: input.name,
                    profiles: input.profiles,
                    upstream_services: input.upstream_services,
                },
            )
            .await
    }

    #[tracing::instrument(name = "CheckService.delete", skip_all, fields(id = %id))]
    pub async fn delete(&self, ctx: &RequestContext, id: Id) -> Result<(), Error> {
        let principal = ctx.require_principal()?.clone();
        let check = self.store.get_check(id).await?;
        self.authorize(ctx, principal, action::CHECKS_DELETE, Some(check.entity_ref()))
            .await?;
        self.store.delete_check(id).await?;
        tracing::info!(check_id = %id, "check deleted");
        Ok(())
    }
}
