//! Pluggable route modules.
//!
//! ```ignore
//! let mut router = Router::new();
//! pagetree::api::Pages.routes(&mut router);
//! ```

use crate::router::Router;

/// A set of routes registered together.
///
/// State a module needs is captured in its handler closures.
pub trait Module: Send + Sync {
    /// Module name for identification and logging.
    fn name(&self) -> &'static str;

    fn routes(&self, router: &mut Router);
}
