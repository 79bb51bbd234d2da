//! Inheritance resolution for a single page.
//!
//! [`resolve`] is pure: given a page's current permissions and the
//! permissions of its ancestors, it computes the permission set the page
//! should hold. The engine calls it once per page, parents first, feeding
//! each child the already-resolved sets of its ancestors.
//!
//! Rules, in order of precedence:
//!
//! - source permissions on the page are kept as they are;
//! - for each grantee the nearest ancestor source wins;
//! - an inherited permission whose source is still on the chain is pointed
//!   at the nearest source for its grantee;
//! - an inherited permission whose source left the chain is re-attached to
//!   the nearest source when that source grants the same level, and becomes
//!   a source permission of its own otherwise;
//! - grantees the page lacks receive a fresh inherited copy;
//! - a root page always carries the space-default permission.

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::error::{Error, Result};
use crate::page::{PageId, Space};
use crate::permission::{Grantee, Origin, Permission, PermissionId};

/// One ancestor of the page being resolved.
#[derive(Debug, Clone, Copy)]
pub struct Link<'a> {
    pub page: PageId,
    pub permissions: &'a [Permission],
}

/// Nearest source permission per grantee along a chain of ancestors.
struct Sources<'a> {
    /// Grantees in the order their nearest source was met.
    order: Vec<Grantee>,
    nearest: HashMap<Grantee, &'a Permission>,
    /// Every source permission on the chain, nearest or not.
    on_chain: HashSet<PermissionId>,
}

impl<'a> Sources<'a> {
    fn collect(chain: &[Link<'a>]) -> Self {
        let mut order = Vec::new();
        let mut nearest = HashMap::new();
        let mut on_chain = HashSet::new();

        for link in chain {
            for permission in link.permissions.iter().filter(|p| p.is_source()) {
                on_chain.insert(permission.id);
                nearest.entry(permission.grantee).or_insert_with(|| {
                    order.push(permission.grantee);
                    permission
                });
            }
        }

        Self {
            order,
            nearest,
            on_chain,
        }
    }
}

/// Compute the permission set `page` should hold beneath `chain`.
///
/// `chain` lists the page's ancestors nearest first; an empty chain means the
/// page is a root page of `space`.
pub fn resolve(
    page: PageId,
    current: &[Permission],
    chain: &[Link<'_>],
    space: &Space,
) -> Result<Vec<Permission>> {
    if chain.iter().any(|link| link.page == page) {
        return Err(Error::Consistency(format!(
            "page {page} appears in its own ancestor chain"
        )));
    }

    let mut local = HashSet::new();
    for permission in current.iter().filter(|p| p.is_source()) {
        if !local.insert(permission.grantee) {
            return Err(Error::Consistency(format!(
                "page {page} holds two source permissions for {}",
                permission.grantee
            )));
        }
    }

    let sources = Sources::collect(chain);
    let mut covered = local.clone();
    let mut resolved = Vec::with_capacity(current.len() + sources.order.len());

    for permission in current {
        if permission.page_id != page {
            return Err(Error::Consistency(format!(
                "permission {} belongs to page {}, not {page}",
                permission.id, permission.page_id
            )));
        }

        let Origin::Inherited(from) = permission.origin else {
            resolved.push(permission.clone());
            continue;
        };

        // A local grant masks inheritance, and a grantee is inherited once.
        if local.contains(&permission.grantee) || !covered.insert(permission.grantee) {
            trace!(%page, permission = %permission.id, "dropping masked inherited permission");
            continue;
        }

        let nearest = sources.nearest.get(&permission.grantee).copied();
        let next = match nearest {
            Some(source) if sources.on_chain.contains(&from) => repoint(permission, source),
            Some(source) if source.level == permission.level => repoint(permission, source),
            _ => {
                trace!(%page, permission = %permission.id, "inheritance source left the chain, keeping grant locally");
                Permission {
                    origin: Origin::Source,
                    ..permission.clone()
                }
            }
        };
        resolved.push(next);
    }

    for grantee in &sources.order {
        if covered.insert(*grantee) {
            resolved.push(Permission::inherit(page, sources.nearest[grantee]));
        }
    }

    if chain.is_empty() && !covered.contains(&Grantee::Space(space.id)) {
        resolved.push(Permission::source(page, Grantee::Space(space.id), space.default_level));
    }

    if resolved.is_empty() {
        return Err(Error::Consistency(format!(
            "page {page} would be left without any permission"
        )));
    }

    Ok(resolved)
}

fn repoint(permission: &Permission, source: &Permission) -> Permission {
    Permission {
        level: source.level,
        origin: Origin::Inherited(source.id),
        ..permission.clone()
    }
}

/// Order-insensitive equality of two permission lists.
pub fn same_set(a: &[Permission], b: &[Permission]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let by_id: HashMap<PermissionId, &Permission> = a.iter().map(|p| (p.id, p)).collect();
    by_id.len() == a.len() && b.iter().all(|p| by_id.get(&p.id) == Some(&p))
}
