//! Persistence contract for pages, permissions and space membership.
//!
//! The engine only talks to the [`Store`] trait. The concrete implementation
//! runs on a libsql [`Connection`]; a [`libsql::Transaction`] dereferences to
//! a connection, so the engine runs unchanged inside a transaction.

use std::collections::HashSet;
use std::future::Future;

use libsql::{Connection, Row, Value, params};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::page::{Page, PageId, PageWithPermissions, Space};
use crate::permission::{Grantee, Level, Origin, Permission, PermissionId};
use crate::tree::MAX_DEPTH;

/// A user's membership in a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub admin: bool,
}

pub trait Store: Send + Sync {
    // Page tree

    fn page(&self, id: PageId) -> impl Future<Output = Result<Option<Page>>> + Send;

    fn space(&self, id: Uuid) -> impl Future<Output = Result<Option<Space>>> + Send;

    /// The page itself followed by its ancestors up to the root, each with its
    /// permissions. Empty when the page does not exist.
    fn ancestor_chain(
        &self,
        id: PageId,
    ) -> impl Future<Output = Result<Vec<PageWithPermissions>>> + Send;

    /// Strict descendants of the page, every parent listed before its children.
    fn descendants(&self, id: PageId) -> impl Future<Output = Result<Vec<Page>>> + Send;

    fn insert_page(&self, page: &Page) -> impl Future<Output = Result<()>> + Send;

    fn update_parent(
        &self,
        id: PageId,
        parent: Option<PageId>,
        index: i64,
    ) -> impl Future<Output = Result<()>> + Send;

    // Permission records

    fn permission(
        &self,
        id: PermissionId,
    ) -> impl Future<Output = Result<Option<Permission>>> + Send;

    fn permissions(&self, page: PageId) -> impl Future<Output = Result<Vec<Permission>>> + Send;

    /// Make `permissions` the exact permission set of `page`: rows missing
    /// from the list are deleted, the others inserted or updated in place.
    fn replace_permissions(
        &self,
        page: PageId,
        permissions: &[Permission],
    ) -> impl Future<Output = Result<()>> + Send;

    // Membership

    fn membership(
        &self,
        space: Uuid,
        user: Uuid,
    ) -> impl Future<Output = Result<Option<Membership>>> + Send;

    fn roles_of(&self, space: Uuid, user: Uuid) -> impl Future<Output = Result<Vec<Uuid>>> + Send;

    /// The space a role belongs to.
    fn role_space(&self, role: Uuid) -> impl Future<Output = Result<Option<Uuid>>> + Send;

    fn insert_space(&self, space: &Space) -> impl Future<Output = Result<()>> + Send;

    fn add_member(
        &self,
        space: Uuid,
        user: Uuid,
        admin: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    fn insert_role(
        &self,
        role: Uuid,
        space: Uuid,
        name: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    fn add_role_member(&self, role: Uuid, user: Uuid) -> impl Future<Output = Result<()>> + Send;
}

const PAGE_COLUMNS: &str = "p.id, p.space_id, p.parent_id, p.idx, p.title, p.created_by";

const PERMISSION_COLUMNS: &str =
    "id, page_id, permission_level, user_id, role_id, space_id, public, inherited_from";

impl Store for Connection {
    async fn page(&self, id: PageId) -> Result<Option<Page>> {
        let sql = format!("SELECT {PAGE_COLUMNS} FROM pages p WHERE p.id = ?1");
        let mut rows = self.query(&sql, params![id.to_string()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(page_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn space(&self, id: Uuid) -> Result<Option<Space>> {
        let mut rows = self
            .query(
                "SELECT default_level, default_public FROM spaces WHERE id = ?1",
                params![id.to_string()],
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let level: String = row.get(0)?;
        Ok(Some(Space {
            id,
            default_level: parse_level(&level)?,
            default_public: row.get::<i64>(1)? != 0,
        }))
    }

    async fn ancestor_chain(&self, id: PageId) -> Result<Vec<PageWithPermissions>> {
        let sql = format!(
            "WITH RECURSIVE chain(id, depth) AS (
                 SELECT id, 0 FROM pages WHERE id = ?1
                 UNION ALL
                 SELECT p.parent_id, c.depth + 1 FROM pages p
                 JOIN chain c ON p.id = c.id
                 WHERE p.parent_id IS NOT NULL AND c.depth < ?2
             )
             SELECT {PAGE_COLUMNS} FROM chain JOIN pages p ON p.id = chain.id
             ORDER BY chain.depth"
        );
        let mut rows = self.query(&sql, params![id.to_string(), MAX_DEPTH]).await?;
        let mut pages = Vec::new();
        while let Some(row) = rows.next().await? {
            pages.push(page_from_row(&row)?);
        }

        if pages.len() as i64 > MAX_DEPTH {
            return Err(Error::Consistency(format!(
                "ancestor chain of {id} exceeds {MAX_DEPTH} pages"
            )));
        }

        let mut chain = Vec::with_capacity(pages.len());
        for page in pages {
            let permissions = self.permissions(page.id).await?;
            chain.push(PageWithPermissions { page, permissions });
        }
        Ok(chain)
    }

    async fn descendants(&self, id: PageId) -> Result<Vec<Page>> {
        let sql = format!(
            "WITH RECURSIVE sub(id, depth) AS (
                 SELECT id, 1 FROM pages WHERE parent_id = ?1
                 UNION ALL
                 SELECT p.id, s.depth + 1 FROM pages p
                 JOIN sub s ON p.parent_id = s.id
                 WHERE s.depth < ?2
             )
             SELECT {PAGE_COLUMNS}, sub.depth FROM sub JOIN pages p ON p.id = sub.id
             ORDER BY sub.depth, p.idx"
        );
        let mut rows = self.query(&sql, params![id.to_string(), MAX_DEPTH]).await?;
        let mut pages = Vec::new();
        let mut seen = HashSet::new();
        while let Some(row) = rows.next().await? {
            // The walk stops at MAX_DEPTH; a row that deep means pages below it were cut off.
            if row.get::<i64>(6)? >= MAX_DEPTH {
                return Err(Error::Consistency(format!(
                    "page tree below {id} is deeper than {MAX_DEPTH} levels"
                )));
            }
            let page = page_from_row(&row)?;
            if page.id == id || !seen.insert(page.id) {
                return Err(Error::Consistency(format!(
                    "page tree below {id} contains a cycle"
                )));
            }
            pages.push(page);
        }
        Ok(pages)
    }

    async fn insert_page(&self, page: &Page) -> Result<()> {
        self.execute(
            "INSERT INTO pages (id, space_id, parent_id, idx, title, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                page.id.to_string(),
                page.space_id.to_string(),
                optional(page.parent_id.map(|p| p.0)),
                page.index,
                page.title.clone(),
                page.created_by.to_string()
            ],
        )
        .await?;
        Ok(())
    }

    async fn update_parent(&self, id: PageId, parent: Option<PageId>, index: i64) -> Result<()> {
        let updated = self
            .execute(
                "UPDATE pages SET parent_id = ?2, idx = ?3 WHERE id = ?1",
                params![id.to_string(), optional(parent.map(|p| p.0)), index],
            )
            .await?;
        if updated == 0 {
            return Err(Error::NotFound(format!("page {id}")));
        }
        Ok(())
    }

    async fn permission(&self, id: PermissionId) -> Result<Option<Permission>> {
        let sql = format!("SELECT {PERMISSION_COLUMNS} FROM page_permissions WHERE id = ?1");
        let mut rows = self.query(&sql, params![id.to_string()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(permission_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn permissions(&self, page: PageId) -> Result<Vec<Permission>> {
        let sql = format!(
            "SELECT {PERMISSION_COLUMNS} FROM page_permissions WHERE page_id = ?1 ORDER BY rowid"
        );
        let mut rows = self.query(&sql, params![page.to_string()]).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(permission_from_row(&row)?);
        }
        Ok(out)
    }

    async fn replace_permissions(&self, page: PageId, permissions: &[Permission]) -> Result<()> {
        if let Some(stray) = permissions.iter().find(|p| p.page_id != page) {
            return Err(Error::Consistency(format!(
                "permission {} for page {} written to page {page}",
                stray.id, stray.page_id
            )));
        }

        let keep: HashSet<PermissionId> = permissions.iter().map(|p| p.id).collect();
        for existing in self.permissions(page).await? {
            if !keep.contains(&existing.id) {
                self.execute(
                    "DELETE FROM page_permissions WHERE id = ?1",
                    params![existing.id.to_string()],
                )
                .await?;
            }
        }

        for permission in permissions {
            self.execute(
                "INSERT INTO page_permissions
                     (id, page_id, permission_level, user_id, role_id, space_id, public, inherited_from)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                     permission_level = excluded.permission_level,
                     user_id = excluded.user_id,
                     role_id = excluded.role_id,
                     space_id = excluded.space_id,
                     public = excluded.public,
                     inherited_from = excluded.inherited_from",
                params![
                    permission.id.to_string(),
                    page.to_string(),
                    permission.level.as_str(),
                    optional(permission.grantee.user()),
                    optional(permission.grantee.role()),
                    optional(permission.grantee.space()),
                    if permission.grantee.is_public() { Value::Integer(1) } else { Value::Null },
                    optional(permission.inherited_from().map(|id| id.0))
                ],
            )
            .await?;
        }
        Ok(())
    }

    async fn membership(&self, space: Uuid, user: Uuid) -> Result<Option<Membership>> {
        let mut rows = self
            .query(
                "SELECT is_admin FROM space_members WHERE space_id = ?1 AND user_id = ?2",
                params![space.to_string(), user.to_string()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Membership {
                admin: row.get::<i64>(0)? != 0,
            })),
            None => Ok(None),
        }
    }

    async fn roles_of(&self, space: Uuid, user: Uuid) -> Result<Vec<Uuid>> {
        let mut rows = self
            .query(
                "SELECT r.id FROM roles r
                 JOIN role_members m ON m.role_id = r.id
                 WHERE r.space_id = ?1 AND m.user_id = ?2",
                params![space.to_string(), user.to_string()],
            )
            .await?;
        let mut roles = Vec::new();
        while let Some(row) = rows.next().await? {
            roles.push(parse_uuid(&row.get::<String>(0)?)?);
        }
        Ok(roles)
    }

    async fn role_space(&self, role: Uuid) -> Result<Option<Uuid>> {
        let mut rows = self
            .query("SELECT space_id FROM roles WHERE id = ?1", params![role.to_string()])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(parse_uuid(&row.get::<String>(0)?)?)),
            None => Ok(None),
        }
    }

    async fn insert_space(&self, space: &Space) -> Result<()> {
        self.execute(
            "INSERT INTO spaces (id, default_level, default_public) VALUES (?1, ?2, ?3)",
            params![
                space.id.to_string(),
                space.default_level.as_str(),
                i64::from(space.default_public)
            ],
        )
        .await?;
        Ok(())
    }

    async fn add_member(&self, space: Uuid, user: Uuid, admin: bool) -> Result<()> {
        self.execute(
            "INSERT INTO space_members (space_id, user_id, is_admin) VALUES (?1, ?2, ?3)
             ON CONFLICT(space_id, user_id) DO UPDATE SET is_admin = excluded.is_admin",
            params![space.to_string(), user.to_string(), i64::from(admin)],
        )
        .await?;
        Ok(())
    }

    async fn insert_role(&self, role: Uuid, space: Uuid, name: &str) -> Result<()> {
        self.execute(
            "INSERT INTO roles (id, space_id, name) VALUES (?1, ?2, ?3)",
            params![role.to_string(), space.to_string(), name],
        )
        .await?;
        Ok(())
    }

    async fn add_role_member(&self, role: Uuid, user: Uuid) -> Result<()> {
        self.execute(
            "INSERT OR IGNORE INTO role_members (role_id, user_id) VALUES (?1, ?2)",
            params![role.to_string(), user.to_string()],
        )
        .await?;
        Ok(())
    }
}

fn optional(id: Option<Uuid>) -> Value {
    match id {
        Some(id) => Value::Text(id.to_string()),
        None => Value::Null,
    }
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Consistency(format!("invalid id {s:?} in store: {e}")))
}

fn parse_optional_uuid(s: Option<String>) -> Result<Option<Uuid>> {
    s.as_deref().map(parse_uuid).transpose()
}

fn parse_level(s: &str) -> Result<Level> {
    Level::parse(s).ok_or_else(|| Error::Consistency(format!("unknown permission level {s:?}")))
}

fn page_from_row(row: &Row) -> Result<Page> {
    Ok(Page {
        id: PageId(parse_uuid(&row.get::<String>(0)?)?),
        space_id: parse_uuid(&row.get::<String>(1)?)?,
        parent_id: parse_optional_uuid(row.get::<Option<String>>(2)?)?.map(PageId),
        index: row.get::<i64>(3)?,
        title: row.get::<String>(4)?,
        created_by: parse_uuid(&row.get::<String>(5)?)?,
    })
}

fn permission_from_row(row: &Row) -> Result<Permission> {
    let id = PermissionId(parse_uuid(&row.get::<String>(0)?)?);
    let public = row.get::<Option<i64>>(6)?.unwrap_or(0) != 0;
    let grantee = Grantee::from_parts(
        parse_optional_uuid(row.get::<Option<String>>(3)?)?,
        parse_optional_uuid(row.get::<Option<String>>(4)?)?,
        parse_optional_uuid(row.get::<Option<String>>(5)?)?,
        public,
    )
    .ok_or_else(|| {
        Error::Consistency(format!("permission {id} does not have exactly one grantee"))
    })?;
    let origin = match parse_optional_uuid(row.get::<Option<String>>(7)?)? {
        Some(source) => Origin::Inherited(PermissionId(source)),
        None => Origin::Source,
    };

    Ok(Permission {
        id,
        page_id: PageId(parse_uuid(&row.get::<String>(1)?)?),
        grantee,
        level: parse_level(&row.get::<String>(2)?)?,
        origin,
    })
}
