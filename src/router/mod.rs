//! Request routing: map HTTP methods and path patterns to handlers.
//!
//! Routes are declared on a mutable [`Router`] at startup and then sealed into
//! an immutable [`RouteTable`] that the server shares across every connection
//! without locking. See [`pattern`] for the pattern syntax.
//!
//! Within one method, routes are tried most-specific first: at the leftmost
//! segment where two patterns differ, a literal beats a `:param`, which beats
//! a `*wildcard`. Two patterns that no rule can order (`/a/:x` and `/a/:y`)
//! are rejected at registration with [`RouteError::Conflict`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::context::PathParams;
use crate::handler::{Handler, IntoHandler, erase};
use crate::http::Method;

pub mod files;
pub mod openapi;
pub mod pattern;

pub use pattern::{RoutePattern, Segment};

use pattern::split_path;

/// Errors raised while registering routes.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route {method} {pattern} is ambiguous with already registered {method} {existing}")]
    Conflict {
        method: Method,
        pattern: String,
        existing: String,
    },

    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern {
        pattern: String,
        reason: &'static str,
    },

    #[error("routes cannot be registered once the router is sealed for serving")]
    Sealed,
}

/// Why a lookup found no route.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("no route matches {path}")]
    NotFound { path: String },

    #[error("method {method} is not allowed for {path}")]
    MethodNotAllowed {
        method: Method,
        path: String,
        allowed: Vec<Method>,
    },
}

/// A registered route: method, compiled pattern and handler.
pub struct Route {
    method: Method,
    pattern: RoutePattern,
    param_names: Vec<String>,
    handler: Handler,
}

impl Route {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn pattern(&self) -> &RoutePattern {
        &self.pattern
    }

    /// Capture names declared by the pattern, in order.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .finish_non_exhaustive()
    }
}

/// The outcome of a successful lookup: the route and its captured parameters.
#[derive(Debug)]
pub struct MatchResult<'a> {
    route: &'a Route,
    params: PathParams,
}

impl<'a> MatchResult<'a> {
    pub fn route(&self) -> &'a Route {
        self.route
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn into_params(self) -> PathParams {
        self.params
    }
}

/// Startup-time route builder.
///
/// # Examples
///
/// ```rust
/// use potato::router::Router;
/// use potato::http::{Method, Response, StatusCode};
///
/// let mut router = Router::new();
/// router
///     .get("/users/:id", |ctx: potato::Context| async move {
///         Response::text(ctx.param("id").unwrap_or_default().to_owned())
///     })?
///     .post("/users", |_ctx: potato::Context| async { Response::new(StatusCode::Created) })?;
///
/// let table = router.seal();
/// let found = table.find(&Method::Get, "/users/42")?;
/// assert_eq!(found.params().get("id"), Some("42"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Default)]
pub struct Router {
    routes: HashMap<Method, Vec<Route>>,
    docs: Vec<openapi::PendingDoc>,
    sealed: bool,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method` requests matching `pattern`.
    ///
    /// # Errors
    ///
    /// - [`RouteError::InvalidPattern`]: `pattern` does not compile.
    /// - [`RouteError::Conflict`]: an existing route for `method` is ambiguous
    ///   with `pattern`.
    /// - [`RouteError::Sealed`]: the router was already sealed for serving.
    pub fn register(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl IntoHandler,
    ) -> Result<&mut Self, RouteError> {
        if self.sealed {
            return Err(RouteError::Sealed);
        }

        let compiled = RoutePattern::parse(pattern).map_err(|e| RouteError::InvalidPattern {
            pattern: pattern.to_owned(),
            reason: e.reason(),
        })?;

        let routes = self.routes.entry(method.clone()).or_default();
        if let Some(existing) = routes.iter().find(|r| r.pattern.is_ambiguous_with(&compiled)) {
            return Err(RouteError::Conflict {
                method,
                pattern: pattern.to_owned(),
                existing: existing.pattern.as_str().to_owned(),
            });
        }

        // Keep the list in specificity order; equal ranks keep registration order.
        let position = routes
            .iter()
            .position(|r| r.pattern.cmp_specificity(&compiled).is_gt())
            .unwrap_or(routes.len());

        tracing::debug!(%method, pattern, "route registered");
        routes.insert(
            position,
            Route {
                method,
                param_names: compiled.param_names(),
                pattern: compiled,
                handler: erase(handler),
            },
        );
        Ok(self)
    }

    pub fn get(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.register(Method::Get, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.register(Method::Post, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.register(Method::Put, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.register(Method::Delete, pattern, handler)
    }

    pub fn patch(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.register(Method::Patch, pattern, handler)
    }

    pub fn head(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.register(Method::Head, pattern, handler)
    }

    pub fn options(&mut self, pattern: &str, handler: impl IntoHandler) -> Result<&mut Self, RouteError> {
        self.register(Method::Options, pattern, handler)
    }

    /// Number of registered routes across all methods.
    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Freezes the registered routes into an immutable, shareable table and
    /// renders any [`serve_openapi`](Self::serve_openapi) documents.
    ///
    /// Any later [`register`](Self::register) call fails with
    /// [`RouteError::Sealed`].
    pub fn seal(&mut self) -> Arc<RouteTable> {
        self.sealed = true;
        let routes = std::mem::take(&mut self.routes);
        for doc in self.docs.drain(..) {
            doc.publish(&routes);
        }
        Arc::new(RouteTable { routes })
    }
}

/// Immutable route snapshot consulted by the dispatcher.
///
/// Lookups take `&self` and allocate nothing shared, so any number of
/// connections may resolve routes concurrently.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<Method, Vec<Route>>,
}

impl RouteTable {
    /// Resolves `method` + `path` to the most specific matching route.
    ///
    /// # Errors
    ///
    /// - [`LookupError::NotFound`]: no route of any method matches `path`.
    /// - [`LookupError::MethodNotAllowed`]: `path` matches only routes of other
    ///   methods; `allowed` lists them.
    pub fn find(&self, method: &Method, path: &str) -> Result<MatchResult<'_>, LookupError> {
        let segments = split_path(path);

        if let Some(routes) = self.routes.get(method) {
            for route in routes {
                if let Some(params) = route.pattern.matches(&segments) {
                    return Ok(MatchResult { route, params });
                }
            }
        }

        let allowed = self.methods_matching(&segments);
        if allowed.is_empty() {
            Err(LookupError::NotFound {
                path: path.to_owned(),
            })
        } else {
            Err(LookupError::MethodNotAllowed {
                method: method.clone(),
                path: path.to_owned(),
                allowed,
            })
        }
    }

    /// Every method with at least one route matching `path`, sorted.
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        self.methods_matching(&split_path(path))
    }

    fn methods_matching(&self, segments: &[&str]) -> Vec<Method> {
        let mut methods: Vec<Method> = self
            .routes
            .iter()
            .filter(|(_, routes)| routes.iter().any(|r| r.pattern.matches(segments).is_some()))
            .map(|(method, _)| method.clone())
            .collect();
        methods.sort();
        methods
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All routes, grouped by method in specificity order.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.values().flatten()
    }
}
