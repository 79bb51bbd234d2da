//! Batched writes for one tree mutation.
//!
//! The engine plans a whole mutation (reads and resolution for every affected
//! page) before touching the store, collecting the outcome in a
//! [`UnitOfWork`]. Applying it inside a transaction makes the mutation
//! all-or-nothing; an empty unit means the tree already had the planned shape.

use tracing::debug;

use crate::error::Result;
use crate::page::{Page, PageId};
use crate::permission::Permission;
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    InsertPage(Page),
    Move {
        page: PageId,
        parent: Option<PageId>,
        index: i64,
    },
    Permissions {
        page: PageId,
        permissions: Vec<Permission>,
    },
}

#[derive(Debug, Default, Clone)]
pub struct UnitOfWork {
    writes: Vec<Write>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_page(&mut self, page: Page) {
        self.writes.push(Write::InsertPage(page));
    }

    pub fn move_page(&mut self, page: PageId, parent: Option<PageId>, index: i64) {
        self.writes.push(Write::Move {
            page,
            parent,
            index,
        });
    }

    pub fn replace_permissions(&mut self, page: PageId, permissions: Vec<Permission>) {
        self.writes.push(Write::Permissions { page, permissions });
    }

    /// Pages whose permission rows this unit rewrites, in write order.
    pub fn touched(&self) -> Vec<PageId> {
        self.writes
            .iter()
            .filter_map(|w| match w {
                Write::Permissions { page, .. } => Some(*page),
                _ => None,
            })
            .collect()
    }

    /// Apply every write in recorded order. Stops at the first failure; the
    /// caller's transaction discards whatever was already applied.
    pub async fn apply<S: Store>(self, store: &S) -> Result<()> {
        for write in self.writes {
            match write {
                Write::InsertPage(page) => {
                    debug!(page = %page.id, "inserting page");
                    store.insert_page(&page).await?;
                }
                Write::Move {
                    page,
                    parent,
                    index,
                } => {
                    debug!(%page, ?parent, index, "moving page");
                    store.update_parent(page, parent, index).await?;
                }
                Write::Permissions { page, permissions } => {
                    debug!(%page, count = permissions.len(), "replacing permissions");
                    store.replace_permissions(page, &permissions).await?;
                }
            }
        }
        Ok(())
    }
}
