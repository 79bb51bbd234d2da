//! HTTP routing with matchit.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use hyper::Method;
use serde::de::DeserializeOwned;
use tracing::warn;
use uuid::Uuid;

use crate::Result;
use crate::config::SharedConfig;
use crate::error::Error;
use crate::response::HttpResponse;

/// Boxed future for async handlers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handler context passed to route handlers.
pub struct Context {
    pub method: Method,
    pub uri: hyper::Uri,
    pub headers: hyper::http::HeaderMap,
    /// Route parameters (e.g., {id} from path).
    pub params: HashMap<String, String>,
    /// The request body, pre-read as bytes.
    pub body: Bytes,
    pub db: Option<crate::db::Handle>,
    pub config: SharedConfig,
}

impl Context {
    /// Parse the request body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::Validation(format!("Invalid request body: {e}")))
    }

    /// Get a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Get a route parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }

    /// Get a required route parameter, returning `Validation` if missing.
    pub fn require_param(&self, name: &str) -> Result<&str> {
        self.param(name)
            .ok_or_else(|| Error::Validation(format!("Missing parameter: {name}")))
    }

    /// Parse a route parameter as a UUID.
    pub fn uuid_param(&self, name: &str) -> Result<Uuid> {
        let raw = self.require_param(name)?;
        Uuid::parse_str(raw).map_err(|_| Error::Validation(format!("Invalid {name}: {raw}")))
    }

    /// The authenticated user, or `None` for anonymous requests.
    ///
    /// A present but invalid token is still an error.
    pub fn user_id(&self) -> Result<Option<Uuid>> {
        if self.headers.get("Authorization").is_none() {
            return Ok(None);
        }
        crate::auth::extract_user_id(&self.headers, &self.config.auth).map(Some)
    }

    /// Require authenticated user, returning Unauthorized if not present.
    pub fn require_user_id(&self) -> Result<Uuid> {
        crate::auth::extract_user_id(&self.headers, &self.config.auth)
    }

    /// Require database, returning Internal error if not configured.
    pub fn require_db(&self) -> Result<&crate::db::Handle> {
        self.db
            .as_ref()
            .ok_or_else(|| Error::Internal("Database not configured".to_string()))
    }
}

/// Handler function type.
pub type Handler = Box<dyn Fn(Context) -> BoxFuture<'static, Result<HttpResponse>> + Send + Sync>;

/// A registered route with method-specific handlers.
struct RouteEntry {
    handlers: HashMap<Method, Handler>,
}

/// HTTP router for registering and dispatching requests.
pub struct Router {
    routes: matchit::Router<usize>,
    entries: Vec<RouteEntry>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: matchit::Router::new(),
            entries: Vec::new(),
        }
    }

    /// Register a handler for a method and path.
    ///
    /// # Example
    /// ```ignore
    /// router.route(Method::GET, "/api/pages/{id}", |ctx| async move {
    ///     response::ok(&serde_json::json!({ "id": ctx.require_param("id")? }))
    /// });
    /// ```
    pub fn route<F, Fut>(&mut self, method: Method, path: &str, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse>> + Send + 'static,
    {
        let entry_idx = match self.routes.at(path) {
            Ok(matched) => *matched.value,
            Err(_) => {
                let idx = self.entries.len();
                self.entries.push(RouteEntry {
                    handlers: HashMap::new(),
                });
                if let Err(e) = self.routes.insert(path, idx) {
                    warn!(path, error = %e, "route conflicts with an existing one");
                }
                idx
            }
        };

        let boxed: Handler = Box::new(move |ctx| Box::pin(handler(ctx)));
        self.entries[entry_idx].handlers.insert(method, boxed);
    }

    pub fn get<F, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse>> + Send + 'static,
    {
        self.route(Method::GET, path, handler);
    }

    pub fn post<F, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse>> + Send + 'static,
    {
        self.route(Method::POST, path, handler);
    }

    pub fn put<F, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse>> + Send + 'static,
    {
        self.route(Method::PUT, path, handler);
    }

    pub fn delete<F, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse>> + Send + 'static,
    {
        self.route(Method::DELETE, path, handler);
    }

    /// Convert to a thread-safe handle for use in request handling.
    pub fn into_handle(self) -> Arc<RouterHandle> {
        Arc::new(RouterHandle {
            routes: self.routes,
            entries: self.entries,
        })
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe router handle for use in request handling.
pub struct RouterHandle {
    routes: matchit::Router<usize>,
    entries: Vec<RouteEntry>,
}

/// Result of matching a request to a route.
pub enum RouteMatch<'a> {
    Matched {
        handler: &'a Handler,
        params: HashMap<String, String>,
    },
    /// Path matched but method not allowed.
    MethodNotAllowed,
    NotFound,
}

impl RouterHandle {
    /// Match a request to a route.
    pub fn match_route(&self, method: &Method, path: &str) -> RouteMatch<'_> {
        let Ok(matched) = self.routes.at(path) else {
            return RouteMatch::NotFound;
        };
        let entry = &self.entries[*matched.value];
        let params: HashMap<String, String> = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        match entry.handlers.get(method) {
            Some(handler) => RouteMatch::Matched { handler, params },
            None => RouteMatch::MethodNotAllowed,
        }
    }
}
