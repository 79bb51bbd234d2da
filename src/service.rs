//! Transactional entry points for tree mutations.
//!
//! Each mutation checks its preconditions on a plain connection first, then
//! opens an immediate transaction, plans against the transaction's view of
//! the store and applies the resulting unit of work. Any error rolls the
//! whole mutation back.

use std::time::Duration;

use libsql::Connection;
use tracing::info;

use crate::db::{self, Handle};
use crate::engine::{self, Grant, NewPage, Reposition};
use crate::error::{Error, Result};
use crate::page::{Page, PageId, PageWithPermissions};
use crate::permission::{Permission, PermissionId};

/// Outcome of a successful reposition.
#[derive(Debug, Clone)]
pub struct Repositioned {
    pub page: Page,
    pub permissions: Vec<Permission>,
    /// Pages whose permission rows were rewritten.
    pub touched: Vec<PageId>,
}

impl Repositioned {
    pub fn into_page(self) -> PageWithPermissions {
        PageWithPermissions {
            page: self.page,
            permissions: self.permissions,
        }
    }
}

#[derive(Clone)]
pub struct Service {
    db: Handle,
    busy_timeout: Duration,
}

impl Service {
    pub fn new(db: Handle, busy_timeout: Duration) -> Self {
        Self { db, busy_timeout }
    }

    /// A connection for reads outside any mutation.
    pub fn connection(&self) -> Result<Connection> {
        db::connection(&self.db, self.busy_timeout)
    }

    pub async fn page_with_permissions(&self, id: PageId) -> Result<PageWithPermissions> {
        let conn = self.connection()?;
        engine::page_with_permissions(&conn, id).await
    }

    /// Move a page and recompute the permissions of its whole subtree.
    ///
    /// Returns `Error::NotFound`, `Error::Validation` or `Error::Cycle`
    /// without touching the store when the move is illegal.
    pub async fn reposition_page(&self, req: Reposition) -> Result<Repositioned> {
        let conn = self.connection()?;
        engine::check_reposition(&conn, &req).await?;

        let tx = db::begin(&conn).await?;
        let outcome = async {
            let planned = engine::plan_reposition(&*tx, &req).await?;
            let touched = planned.work.touched();
            planned.work.apply(&*tx).await?;
            Ok::<_, Error>(Repositioned {
                page: planned.page.page,
                permissions: planned.page.permissions,
                touched,
            })
        }
        .await;
        let done = db::finish(tx, outcome).await?;

        info!(
            page = %req.page,
            parent = ?req.parent,
            index = req.index,
            touched = done.touched.len(),
            "page repositioned"
        );
        Ok(done)
    }

    /// Grant a level to a grantee on a page and cascade it to the subtree.
    pub async fn grant_permission(&self, grant: Grant) -> Result<Permission> {
        let conn = self.connection()?;
        let tx = db::begin(&conn).await?;
        let outcome = async {
            let (permission, work) = engine::plan_grant(&*tx, &grant).await?;
            let touched = work.touched().len();
            work.apply(&*tx).await?;
            Ok::<_, Error>((permission, touched))
        }
        .await;
        let (permission, touched) = db::finish(tx, outcome).await?;

        info!(
            page = %grant.page,
            grantee = %grant.grantee,
            level = %grant.level,
            source = permission.is_source(),
            touched,
            "permission granted"
        );
        Ok(permission)
    }

    /// Revoke a source permission. Returns the pages whose rows changed.
    pub async fn revoke_permission(&self, id: PermissionId) -> Result<Vec<PageId>> {
        let conn = self.connection()?;
        let tx = db::begin(&conn).await?;
        let outcome = async {
            let work = engine::plan_revoke(&*tx, id).await?;
            let touched = work.touched();
            work.apply(&*tx).await?;
            Ok::<_, Error>(touched)
        }
        .await;
        let touched = db::finish(tx, outcome).await?;

        info!(permission = %id, touched = touched.len(), "permission revoked");
        Ok(touched)
    }

    pub async fn create_page(&self, new: NewPage) -> Result<PageWithPermissions> {
        let conn = self.connection()?;
        let tx = db::begin(&conn).await?;
        let outcome = async {
            let planned = engine::plan_create(&*tx, new).await?;
            planned.work.apply(&*tx).await?;
            Ok::<_, Error>(planned.page)
        }
        .await;
        let created = db::finish(tx, outcome).await?;

        info!(
            page = %created.page.id,
            space = %created.page.space_id,
            parent = ?created.page.parent_id,
            "page created"
        );
        Ok(created)
    }
}
