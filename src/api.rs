//! HTTP surface of the page tree.
//!
//! | Method & path | Caller needs |
//! |---|---|
//! | `GET /api/pages/{id}` | view (anonymous callers match public grants) |
//! | `PUT /api/pages/{id}` | edit on the old and the new parent, or on the page when a side is the root |
//! | `POST /api/pages` | membership of the space, edit on the parent |
//! | `POST /api/permissions` | full access on the page |
//! | `DELETE /api/permissions/{id}` | full access on the permission's page |
//! | `GET /health` | nothing |

use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::access::{self, Caller};
use crate::engine::{Grant, NewPage, Reposition};
use crate::error::{Error, Result};
use crate::module::Module;
use crate::page::PageId;
use crate::permission::{Grantee, Level, PermissionId};
use crate::response::{self, HttpResponse};
use crate::router::{Context, Router};
use crate::service::Service;
use crate::store::Store;

/// Pages and their permissions.
pub struct Pages;

impl Module for Pages {
    fn name(&self) -> &'static str {
        "pages"
    }

    fn routes(&self, router: &mut Router) {
        router.get("/health", |_ctx| async {
            response::ok(&serde_json::json!({ "status": "ok" }))
        });
        router.get("/api/pages/{id}", get_page);
        router.put("/api/pages/{id}", reposition_page);
        router.post("/api/pages", create_page);
        router.post("/api/permissions", grant_permission);
        router.delete("/api/permissions/{id}", revoke_permission);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositionBody {
    id: PageId,
    parent_id: Option<PageId>,
    #[serde(default)]
    index: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePageBody {
    space_id: Uuid,
    parent_id: Option<PageId>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    index: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrantBody {
    page_id: PageId,
    permission_level: Level,
    user_id: Option<Uuid>,
    role_id: Option<Uuid>,
    space_id: Option<Uuid>,
    #[serde(default)]
    public: bool,
}

fn service(ctx: &Context) -> Result<Service> {
    Ok(Service::new(
        ctx.require_db()?.clone(),
        ctx.config.database.busy_timeout(),
    ))
}

/// Fail with `Unauthorized` unless `user` holds at least `minimum` on `page`.
async fn require_level(
    service: &Service,
    user: Option<Uuid>,
    page: PageId,
    minimum: Level,
) -> Result<()> {
    let page = service.page_with_permissions(page).await?;
    let conn = service.connection()?;
    match access::level_for(&conn, user, &page).await? {
        Some(level) if level >= minimum => Ok(()),
        level => {
            debug!(page = %page.page.id, ?user, ?level, %minimum, "access denied");
            Err(Error::Unauthorized)
        }
    }
}

async fn get_page(ctx: Context) -> Result<HttpResponse> {
    let id = PageId(ctx.uuid_param("id")?);
    let user = ctx.user_id()?;
    let service = service(&ctx)?;

    let page = service.page_with_permissions(id).await?;
    let conn = service.connection()?;
    if access::level_for(&conn, user, &page).await?.is_none() {
        return Err(Error::Unauthorized);
    }
    response::ok(&page.to_view())
}

async fn reposition_page(ctx: Context) -> Result<HttpResponse> {
    let id = PageId(ctx.uuid_param("id")?);
    let user = ctx.require_user_id()?;
    let body: RepositionBody = ctx.json()?;
    if body.id != id {
        return Err(Error::Validation(format!(
            "body id {} does not match page {id}",
            body.id
        )));
    }
    let service = service(&ctx)?;

    let current = service.page_with_permissions(id).await?;
    let old_side = current.page.parent_id.unwrap_or(id);
    let new_side = body.parent_id.unwrap_or(id);
    require_level(&service, Some(user), old_side, Level::Editor).await?;
    if new_side != old_side {
        require_level(&service, Some(user), new_side, Level::Editor).await?;
    }

    let moved = service
        .reposition_page(Reposition {
            page: id,
            parent: body.parent_id,
            index: body.index,
        })
        .await?;
    response::ok(&moved.into_page().to_view())
}

async fn create_page(ctx: Context) -> Result<HttpResponse> {
    let user = ctx.require_user_id()?;
    let body: CreatePageBody = ctx.json()?;
    let service = service(&ctx)?;

    let caller = Caller::load(&service.connection()?, body.space_id, Some(user)).await?;
    if !caller.member {
        return Err(Error::Unauthorized);
    }
    if let Some(parent) = body.parent_id {
        require_level(&service, Some(user), parent, Level::Editor).await?;
    }

    let created = service
        .create_page(NewPage {
            space: body.space_id,
            parent: body.parent_id,
            index: body.index,
            title: body.title,
            created_by: user,
        })
        .await?;
    response::created(&created.to_view())
}

async fn grant_permission(ctx: Context) -> Result<HttpResponse> {
    let user = ctx.require_user_id()?;
    let body: GrantBody = ctx.json()?;
    let grantee = Grantee::from_parts(body.user_id, body.role_id, body.space_id, body.public)
        .ok_or_else(|| {
            Error::Validation(
                "exactly one of userId, roleId, spaceId or public must be set".to_string(),
            )
        })?;
    let service = service(&ctx)?;

    require_level(&service, Some(user), body.page_id, Level::FullAccess).await?;

    let permission = service
        .grant_permission(Grant {
            page: body.page_id,
            grantee,
            level: body.permission_level,
        })
        .await?;
    response::created(&permission.to_view())
}

async fn revoke_permission(ctx: Context) -> Result<HttpResponse> {
    let id = PermissionId(ctx.uuid_param("id")?);
    let user = ctx.require_user_id()?;
    let service = service(&ctx)?;

    let permission = service
        .connection()?
        .permission(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("permission {id}")))?;
    require_level(&service, Some(user), permission.page_id, Level::FullAccess).await?;

    service.revoke_permission(id).await?;
    Ok(response::no_content())
}
