//! pagetree - page-tree permission inheritance for multi-tenant workspaces.
//!
//! Pages of a space form a tree. Every page carries permission records that
//! are either defined on the page (sources) or copied from a source held by
//! an ancestor (inherited). Moving a page, granting or revoking access
//! recomputes the inherited records of the whole affected subtree inside one
//! transaction.
//!
//! - **Resolver**: pure per-page inheritance computation
//! - **Engine**: plans reposition, grant, revoke and create as a unit of work
//! - **Service**: runs each plan in an immediate libsql transaction
//! - **Store**: persistence contract, implemented for `libsql::Connection`
//! - **Api**: hyper/matchit HTTP module with JWT auth
//!
//! # Example
//!
//! ```ignore
//! use pagetree::{Loader, Module, Router, config::Overrides};
//!
//! #[tokio::main]
//! async fn main() -> pagetree::Result<()> {
//!     let config = Loader::new("PAGETREE").load(None, &Overrides::default())?;
//!     let db = pagetree::db::connect(&config.database.url).await?;
//!
//!     let mut router = Router::new();
//!     pagetree::api::Pages.routes(&mut router);
//!
//!     pagetree::server::run(config.into(), Some(db), router.into_handle()).await
//! }
//! ```

pub mod access;
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod module;
pub mod page;
pub mod permission;
pub mod resolver;
pub mod response;
pub mod router;
pub mod server;
pub mod service;
pub mod store;
pub mod tree;
pub mod work;

// Re-export main types at crate root
pub use config::{Config, Loader};
pub use db::Handle as DbHandle;
pub use engine::{Grant, NewPage, Reposition};
pub use error::{Error, Result};
pub use module::Module;
pub use page::{Page, PageId, PageWithPermissions, Space};
pub use permission::{Grantee, Level, Origin, Permission, PermissionId};
pub use router::{Context, Router};
pub use service::{Repositioned, Service};
pub use store::Store;
