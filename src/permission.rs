//! Permission records attached to pages.
//!
//! A permission grants one [`Level`] to exactly one [`Grantee`] on one page.
//! Its [`Origin`] says whether it was defined on that page (a source) or is a
//! copy of a source permission held by an ancestor.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::page::PageId;

/// Unique identifier of a permission row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionId(pub Uuid);

impl PermissionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PermissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PermissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Page permission levels, ordered from least to most permissive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    View,
    ViewComment,
    Editor,
    FullAccess,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::View => "view",
            Level::ViewComment => "view_comment",
            Level::Editor => "editor",
            Level::FullAccess => "full_access",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "view" => Some(Level::View),
            "view_comment" => Some(Level::ViewComment),
            "editor" => Some(Level::Editor),
            "full_access" => Some(Level::FullAccess),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The subject a permission applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Grantee {
    User(Uuid),
    Role(Uuid),
    /// Every member of the space.
    Space(Uuid),
    Public,
}

impl Grantee {
    /// Build a grantee from the four mutually exclusive storage columns.
    ///
    /// Returns `None` unless exactly one selector is set.
    pub fn from_parts(
        user: Option<Uuid>,
        role: Option<Uuid>,
        space: Option<Uuid>,
        public: bool,
    ) -> Option<Self> {
        match (user, role, space, public) {
            (Some(id), None, None, false) => Some(Grantee::User(id)),
            (None, Some(id), None, false) => Some(Grantee::Role(id)),
            (None, None, Some(id), false) => Some(Grantee::Space(id)),
            (None, None, None, true) => Some(Grantee::Public),
            _ => None,
        }
    }

    pub fn user(&self) -> Option<Uuid> {
        match self {
            Grantee::User(id) => Some(*id),
            _ => None,
        }
    }

    pub fn role(&self) -> Option<Uuid> {
        match self {
            Grantee::Role(id) => Some(*id),
            _ => None,
        }
    }

    pub fn space(&self) -> Option<Uuid> {
        match self {
            Grantee::Space(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self, Grantee::Public)
    }
}

impl fmt::Display for Grantee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grantee::User(id) => write!(f, "user:{id}"),
            Grantee::Role(id) => write!(f, "role:{id}"),
            Grantee::Space(id) => write!(f, "space:{id}"),
            Grantee::Public => f.write_str("public"),
        }
    }
}

/// Where a permission comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Defined directly on the page.
    Source,
    /// Copied from the source permission with this id on a strict ancestor.
    Inherited(PermissionId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Permission {
    pub id: PermissionId,
    pub page_id: PageId,
    pub grantee: Grantee,
    pub level: Level,
    pub origin: Origin,
}

impl Permission {
    pub fn source(page_id: PageId, grantee: Grantee, level: Level) -> Self {
        Self {
            id: PermissionId::new(),
            page_id,
            grantee,
            level,
            origin: Origin::Source,
        }
    }

    /// A fresh inherited copy of `source` placed on `page_id`.
    pub fn inherit(page_id: PageId, source: &Permission) -> Self {
        Self {
            id: PermissionId::new(),
            page_id,
            grantee: source.grantee,
            level: source.level,
            origin: Origin::Inherited(source.id),
        }
    }

    pub fn is_source(&self) -> bool {
        self.origin == Origin::Source
    }

    /// The id this permission inherits from, if any.
    pub fn inherited_from(&self) -> Option<PermissionId> {
        match self.origin {
            Origin::Source => None,
            Origin::Inherited(id) => Some(id),
        }
    }

    pub fn to_view(&self) -> View {
        View {
            id: self.id,
            page_id: self.page_id,
            permission_level: self.level,
            user_id: self.grantee.user(),
            role_id: self.grantee.role(),
            space_id: self.grantee.space(),
            public: self.grantee.is_public(),
            inherited_from_permission: self.inherited_from(),
        }
    }
}

/// Wire shape of a permission: one nullable column per grantee selector and a
/// nullable `inheritedFromPermission`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    pub id: PermissionId,
    pub page_id: PageId,
    pub permission_level: Level,
    pub user_id: Option<Uuid>,
    pub role_id: Option<Uuid>,
    pub space_id: Option<Uuid>,
    pub public: bool,
    pub inherited_from_permission: Option<PermissionId>,
}
