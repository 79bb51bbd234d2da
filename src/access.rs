//! A caller's effective level on a page.

use uuid::Uuid;

use crate::error::Result;
use crate::page::PageWithPermissions;
use crate::permission::{Grantee, Level, Permission};
use crate::store::Store;

/// Who is asking, as far as page permissions are concerned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    pub user: Option<Uuid>,
    /// Member of the page's space.
    pub member: bool,
    pub admin: bool,
    /// Roles held in the page's space.
    pub roles: Vec<Uuid>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Load a user's standing in `space`.
    pub async fn load<S: Store>(store: &S, space: Uuid, user: Option<Uuid>) -> Result<Self> {
        let Some(user) = user else {
            return Ok(Self::anonymous());
        };
        let Some(membership) = store.membership(space, user).await? else {
            return Ok(Self {
                user: Some(user),
                ..Self::default()
            });
        };
        Ok(Self {
            user: Some(user),
            member: true,
            admin: membership.admin,
            roles: store.roles_of(space, user).await?,
        })
    }

    fn matches(&self, space: Uuid, grantee: &Grantee) -> bool {
        match grantee {
            Grantee::Public => true,
            Grantee::User(id) => self.user == Some(*id),
            Grantee::Space(id) => self.member && *id == space,
            Grantee::Role(id) => self.member && self.roles.contains(id),
        }
    }
}

/// Highest level any of `permissions` gives `caller`, or `None`.
///
/// Space admins always get full access. Outsiders only match public grants
/// and grants made to them by user id.
pub fn effective(caller: &Caller, space: Uuid, permissions: &[Permission]) -> Option<Level> {
    if caller.admin {
        return Some(Level::FullAccess);
    }
    permissions
        .iter()
        .filter(|p| caller.matches(space, &p.grantee))
        .map(|p| p.level)
        .max()
}

/// Level of `user` (or an anonymous caller) on `page`.
pub async fn level_for<S: Store>(
    store: &S,
    user: Option<Uuid>,
    page: &PageWithPermissions,
) -> Result<Option<Level>> {
    let caller = Caller::load(store, page.page.space_id, user).await?;
    Ok(effective(&caller, page.page.space_id, &page.permissions))
}
