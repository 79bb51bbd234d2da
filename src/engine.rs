//! Tree mutations that recompute inheritance.
//!
//! Every `plan_*` function reads what it needs from a [`Store`], runs the
//! [resolver](crate::resolver) over each affected page (parents before
//! children) and returns the writes as a [`UnitOfWork`]. Nothing is written
//! here; the service applies the unit inside a transaction.

use std::collections::HashMap;

use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::page::{Page, PageId, PageWithPermissions, Space};
use crate::permission::{Grantee, Level, Origin, Permission, PermissionId};
use crate::resolver::{self, Link};
use crate::store::Store;
use crate::tree::{MAX_DEPTH, PageTree};
use crate::work::UnitOfWork;

/// Move `page` under `parent` (or to the root when `None`) at `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reposition {
    pub page: PageId,
    pub parent: Option<PageId>,
    pub index: i64,
}

/// Give `grantee` the `level` on `page`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    pub page: PageId,
    pub grantee: Grantee,
    pub level: Level,
}

#[derive(Debug, Clone)]
pub struct NewPage {
    pub space: Uuid,
    pub parent: Option<PageId>,
    pub index: i64,
    pub title: String,
    pub created_by: Uuid,
}

/// A planned mutation and the state of its target page once applied.
#[derive(Debug)]
pub struct Planned {
    pub page: PageWithPermissions,
    pub work: UnitOfWork,
}

/// Everything a reposition needs once its preconditions hold.
#[derive(Debug)]
pub struct Checked {
    pub page: Page,
    pub space: Space,
    /// The new parent followed by its ancestors. Empty for a move to the root.
    pub chain: Vec<PageWithPermissions>,
    /// The moved page and everything below it.
    pub tree: PageTree,
}

/// Verify that `req` describes a legal move.
///
/// The page and the new parent must exist and share a space, the new
/// parent may not be the page or one of its descendants, and the moved
/// subtree must still fit within [`MAX_DEPTH`] levels.
pub async fn check_reposition<S: Store>(store: &S, req: &Reposition) -> Result<Checked> {
    let page = store
        .page(req.page)
        .await?
        .ok_or_else(|| Error::NotFound(format!("page {}", req.page)))?;

    let chain = match req.parent {
        None => Vec::new(),
        Some(parent) if parent == page.id => {
            return Err(Error::Cycle {
                page: page.id,
                parent,
            });
        }
        Some(parent) => {
            let chain = store.ancestor_chain(parent).await?;
            let Some(first) = chain.first() else {
                return Err(Error::NotFound(format!("parent page {parent}")));
            };
            if first.page.space_id != page.space_id {
                return Err(Error::Validation(format!(
                    "parent page {parent} belongs to another space"
                )));
            }
            // The page is above its new parent: the move would close a loop.
            if chain.iter().any(|link| link.page.id == page.id) {
                return Err(Error::Cycle {
                    page: page.id,
                    parent,
                });
            }
            chain
        }
    };

    let tree = PageTree::build(page.id, &store.descendants(page.id).await?)?;
    check_depth(chain.len() + tree.height(), page.id)?;

    let space = load_space(store, page.space_id).await?;
    Ok(Checked {
        page,
        space,
        chain,
        tree,
    })
}

/// Plan moving a page and recomputing the permissions of its whole subtree.
pub async fn plan_reposition<S: Store>(store: &S, req: &Reposition) -> Result<Planned> {
    let Checked {
        mut page,
        space,
        chain,
        tree,
    } = check_reposition(store, req).await?;

    let mut work = UnitOfWork::new();
    if page.parent_id != req.parent || page.index != req.index {
        work.move_page(page.id, req.parent, req.index);
        page.parent_id = req.parent;
        page.index = req.index;
    }

    debug!(page = %page.id, subtree = tree.page_count(), chain = chain.len(), "repositioning");

    let mut resolved = cascade(store, &tree, &chain, &space, Seed::default(), &mut work).await?;
    let permissions = resolved.remove(&page.id).unwrap_or_default();

    Ok(Planned {
        page: PageWithPermissions { page, permissions },
        work,
    })
}

/// Plan granting a permission and cascading it to the page's subtree.
///
/// Returns the resulting permission of the grantee on the page: a source
/// permission, or an inherited one when the parent already grants the same
/// level to the same grantee.
pub async fn plan_grant<S: Store>(store: &S, grant: &Grant) -> Result<(Permission, UnitOfWork)> {
    let page = store
        .page(grant.page)
        .await?
        .ok_or_else(|| Error::NotFound(format!("page {}", grant.page)))?;
    let space = load_space(store, page.space_id).await?;
    check_grantee(store, &space, grant.grantee).await?;

    let chain = match page.parent_id {
        Some(parent) => store.ancestor_chain(parent).await?,
        None => Vec::new(),
    };

    // Granting exactly what the parent grants turns the entry back into an
    // inherited one.
    let inherited_source = chain.first().and_then(|parent| {
        parent
            .permissions
            .iter()
            .find(|p| p.grantee == grant.grantee && p.level == grant.level)
            .map(|p| p.inherited_from().unwrap_or(p.id))
    });
    let origin = match inherited_source {
        Some(source) => Origin::Inherited(source),
        None => Origin::Source,
    };

    let mut current = store.permissions(page.id).await?;
    let mut detach = None;
    match current.iter_mut().find(|p| p.grantee == grant.grantee) {
        Some(existing) => {
            if let (true, Origin::Inherited(to)) = (existing.is_source(), origin) {
                detach = Some(Detach::Redirect {
                    from: existing.id,
                    to,
                });
            }
            existing.level = grant.level;
            existing.origin = origin;
        }
        None => current.push(Permission {
            id: PermissionId::new(),
            page_id: page.id,
            grantee: grant.grantee,
            level: grant.level,
            origin,
        }),
    }

    let tree = PageTree::build(page.id, &store.descendants(page.id).await?)?;
    debug!(page = %page.id, grantee = %grant.grantee, level = %grant.level, subtree = tree.page_count(), "granting");

    let mut work = UnitOfWork::new();
    let seed = Seed {
        target: Some((page.id, current)),
        detach,
    };
    let resolved = cascade(store, &tree, &chain, &space, seed, &mut work).await?;

    let permission = resolved
        .get(&page.id)
        .and_then(|set| set.iter().find(|p| p.grantee == grant.grantee))
        .cloned()
        .ok_or_else(|| {
            Error::Consistency(format!("grant to {} vanished from page {}", grant.grantee, page.id))
        })?;
    Ok((permission, work))
}

/// Plan removing a source permission and every inherited copy of it.
pub async fn plan_revoke<S: Store>(store: &S, id: PermissionId) -> Result<UnitOfWork> {
    let revoked = store
        .permission(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("permission {id}")))?;
    if let Some(source) = revoked.inherited_from() {
        return Err(Error::Validation(format!(
            "permission {id} is inherited; revoke {source} instead"
        )));
    }

    let page = store
        .page(revoked.page_id)
        .await?
        .ok_or_else(|| Error::Consistency(format!("permission {id} points at a missing page")))?;
    if page.parent_id.is_none() && revoked.grantee == Grantee::Space(page.space_id) {
        return Err(Error::Validation(format!(
            "the space default of root page {} cannot be revoked",
            page.id
        )));
    }
    let space = load_space(store, page.space_id).await?;

    let chain = match page.parent_id {
        Some(parent) => store.ancestor_chain(parent).await?,
        None => Vec::new(),
    };
    let current: Vec<Permission> = store
        .permissions(page.id)
        .await?
        .into_iter()
        .filter(|p| p.id != id)
        .collect();

    let tree = PageTree::build(page.id, &store.descendants(page.id).await?)?;
    debug!(page = %page.id, permission = %id, subtree = tree.page_count(), "revoking");

    let mut work = UnitOfWork::new();
    let seed = Seed {
        target: Some((page.id, current)),
        detach: Some(Detach::Drop(id)),
    };
    cascade(store, &tree, &chain, &space, seed, &mut work).await?;
    Ok(work)
}

/// Plan inserting a page with its initial permissions.
///
/// A root page gets the space default, full access for its creator and, in
/// spaces that publish by default, public view access. A child page inherits
/// everything its parent holds.
pub async fn plan_create<S: Store>(store: &S, new: NewPage) -> Result<Planned> {
    let space = load_space(store, new.space).await?;
    let page = Page {
        id: PageId::new(),
        space_id: space.id,
        parent_id: new.parent,
        index: new.index,
        title: new.title,
        created_by: new.created_by,
    };

    let permissions = match new.parent {
        Some(parent) => {
            let chain = store.ancestor_chain(parent).await?;
            let Some(first) = chain.first() else {
                return Err(Error::NotFound(format!("parent page {parent}")));
            };
            if first.page.space_id != space.id {
                return Err(Error::Validation(format!(
                    "parent page {parent} belongs to another space"
                )));
            }
            check_depth(chain.len() + 1, page.id)?;
            let links: Vec<Link<'_>> = chain.iter().map(link).collect();
            resolver::resolve(page.id, &[], &links, &space)?
        }
        None => {
            let mut initial = vec![
                Permission::source(page.id, Grantee::Space(space.id), space.default_level),
                Permission::source(page.id, Grantee::User(new.created_by), Level::FullAccess),
            ];
            if space.default_public {
                initial.push(Permission::source(page.id, Grantee::Public, Level::View));
            }
            resolver::resolve(page.id, &initial, &[], &space)?
        }
    };
    debug!(page = %page.id, parent = ?page.parent_id, count = permissions.len(), "creating page");

    let mut work = UnitOfWork::new();
    work.insert_page(page.clone());
    work.replace_permissions(page.id, permissions.clone());

    Ok(Planned {
        page: PageWithPermissions { page, permissions },
        work,
    })
}

/// Load a page with its current permissions.
pub async fn page_with_permissions<S: Store>(store: &S, id: PageId) -> Result<PageWithPermissions> {
    let page = store
        .page(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("page {id}")))?;
    let permissions = store.permissions(id).await?;
    Ok(PageWithPermissions { page, permissions })
}

/// Reject placing the deepest page of a subtree `levels` below the root.
fn check_depth(levels: usize, page: PageId) -> Result<()> {
    if levels as i64 > MAX_DEPTH {
        return Err(Error::Validation(format!(
            "page {page} would end up {levels} levels deep; at most {MAX_DEPTH} are allowed"
        )));
    }
    Ok(())
}

async fn load_space<S: Store>(store: &S, id: Uuid) -> Result<Space> {
    store
        .space(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("space {id}")))
}

async fn check_grantee<S: Store>(store: &S, space: &Space, grantee: Grantee) -> Result<()> {
    let belongs = match grantee {
        Grantee::Public => true,
        Grantee::Space(id) => id == space.id,
        Grantee::Role(role) => store.role_space(role).await? == Some(space.id),
        Grantee::User(user) => store.membership(space.id, user).await?.is_some(),
    };
    if belongs {
        Ok(())
    } else {
        Err(Error::Validation(format!("{grantee} is not part of space {}", space.id)))
    }
}

/// What becomes of the inherited copies of a permission that stops being a
/// source.
#[derive(Debug, Clone, Copy)]
enum Detach {
    Drop(PermissionId),
    Redirect { from: PermissionId, to: PermissionId },
}

/// Changes to fold into the stored permissions before resolving.
#[derive(Debug, Default)]
struct Seed {
    /// Replacement permission set for one page of the subtree.
    target: Option<(PageId, Vec<Permission>)>,
    detach: Option<Detach>,
}

fn link(entry: &PageWithPermissions) -> Link<'_> {
    Link {
        page: entry.page.id,
        permissions: &entry.permissions,
    }
}

/// Resolve every page of `tree` beneath `chain`, parent before child.
///
/// Pages whose resolved set differs from what the store holds are recorded
/// in `work`. Returns the resolved set of every page in the subtree.
async fn cascade<S: Store>(
    store: &S,
    tree: &PageTree,
    chain: &[PageWithPermissions],
    space: &Space,
    mut seed: Seed,
    work: &mut UnitOfWork,
) -> Result<HashMap<PageId, Vec<Permission>>> {
    let mut resolved: HashMap<PageId, Vec<Permission>> = HashMap::with_capacity(tree.page_count());

    for id in tree.iter() {
        let stored = store.permissions(id).await?;
        let mut current = match seed.target.take_if(|(target, _)| *target == id) {
            Some((_, set)) => set,
            None => stored.clone(),
        };
        match seed.detach {
            Some(Detach::Drop(gone)) => current.retain(|p| p.inherited_from() != Some(gone)),
            Some(Detach::Redirect { from, to }) => {
                for p in current.iter_mut().filter(|p| p.inherited_from() == Some(from)) {
                    p.origin = Origin::Inherited(to);
                }
            }
            None => {}
        }

        let next = {
            let mut links = Vec::with_capacity(chain.len() + 1);
            for ancestor in tree.ancestors(id) {
                let permissions = resolved.get(&ancestor).ok_or_else(|| {
                    Error::Consistency(format!("ancestor {ancestor} of {id} was not resolved first"))
                })?;
                links.push(Link {
                    page: ancestor,
                    permissions,
                });
            }
            links.extend(chain.iter().map(link));
            resolver::resolve(id, &current, &links, space)?
        };

        if resolver::same_set(&next, &stored) {
            debug!(page = %id, "permissions unchanged");
        } else {
            debug!(page = %id, before = stored.len(), after = next.len(), "permissions changed");
            work.replace_permissions(id, next.clone());
        }
        resolved.insert(id, next);
    }

    Ok(resolved)
}
