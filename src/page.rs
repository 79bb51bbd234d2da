//! Pages, spaces and the page-with-permissions payload.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::permission::{self, Level, Permission};

/// Unique identifier of a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub Uuid);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A node in a space's page tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: PageId,
    pub space_id: Uuid,
    pub parent_id: Option<PageId>,
    /// Position among siblings. Has no effect on permissions.
    pub index: i64,
    pub title: String,
    pub created_by: Uuid,
}

/// Tenant partition. Pages and permissions never cross spaces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub id: Uuid,
    /// Level of the space-wide permission placed on root pages.
    pub default_level: Level,
    /// New root pages are also shared publicly (view only).
    pub default_public: bool,
}

impl Space {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            default_level: Level::FullAccess,
            default_public: false,
        }
    }
}

/// A page together with its effective permission set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageWithPermissions {
    pub page: Page,
    pub permissions: Vec<Permission>,
}

impl PageWithPermissions {
    pub fn to_view(&self) -> View {
        View {
            page: self.page.clone(),
            permissions: self.permissions.iter().map(Permission::to_view).collect(),
        }
    }
}

/// Wire shape returned by the page endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    #[serde(flatten)]
    pub page: Page,
    pub permissions: Vec<permission::View>,
}
