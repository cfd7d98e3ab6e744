//! OpenAPI 3.1 document describing the registered routes.
//!
//! [`Router::serve_openapi`] reserves a `GET` route at registration time; the
//! document itself is rendered when the router is sealed, so it lists every
//! route registered before and after the call.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use serde_json::{Map, Value, json};

use super::pattern::Segment;
use super::{Route, RouteError, RoutePattern, Router};
use crate::context::Context;
use crate::handler::HandlerError;
use crate::http::{Method, Response, StatusCode};

/// A document route waiting for the router to be sealed.
#[derive(Debug)]
pub(crate) struct PendingDoc {
    path: String,
    title: String,
    version: String,
    rendered: Arc<OnceLock<Bytes>>,
}

impl PendingDoc {
    pub(crate) fn publish(self, routes: &HashMap<Method, Vec<Route>>) {
        let doc = document(&self.title, &self.version, &self.path, routes);
        match serde_json::to_vec(&doc) {
            Ok(json) => {
                let _ = self.rendered.set(Bytes::from(json));
            }
            Err(e) => tracing::warn!(path = %self.path, error = %e, "failed to render API document"),
        }
    }
}

impl Router {
    /// Serves an OpenAPI 3.1 JSON document of this router's routes at
    /// `GET path`.
    ///
    /// Each route contributes its method, its path template with `:param`
    /// and `*wildcard` captures as `{name}` path parameters, and the `200`
    /// and `500` responses every handler can produce.
    ///
    /// # Errors
    ///
    /// Fails like [`register`](Router::register) for an invalid `path` or one
    /// already taken by a `GET` route.
    pub fn serve_openapi(
        &mut self,
        path: &str,
        title: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<&mut Self, RouteError> {
        let rendered: Arc<OnceLock<Bytes>> = Arc::new(OnceLock::new());
        let served = Arc::clone(&rendered);
        self.get(path, move |_ctx: Context| {
            let served = Arc::clone(&served);
            async move {
                let json = served
                    .get()
                    .ok_or_else(|| HandlerError::new(StatusCode::ServiceUnavailable, "API document unavailable"))?;
                Ok::<_, HandlerError>(
                    Response::new(StatusCode::Ok)
                        .header("Content-Type", "application/json")
                        .body_bytes(json.clone()),
                )
            }
        })?;
        self.docs.push(PendingDoc {
            path: path.to_owned(),
            title: title.into(),
            version: version.into(),
            rendered,
        });
        Ok(self)
    }
}

fn document(title: &str, version: &str, doc_path: &str, routes: &HashMap<Method, Vec<Route>>) -> Value {
    let mut listed: Vec<&Route> = routes
        .values()
        .flatten()
        .filter(|r| !(r.method == Method::Get && r.pattern.as_str() == doc_path))
        .collect();
    listed.sort_by(|a, b| (a.pattern.as_str(), &a.method).cmp(&(b.pattern.as_str(), &b.method)));

    let mut paths = Map::new();
    for route in listed {
        let Some(verb) = openapi_verb(&route.method) else {
            continue;
        };
        let item = paths
            .entry(path_template(&route.pattern))
            .or_insert_with(|| Value::Object(Map::new()));
        item[verb] = operation(route);
    }

    json!({
        "openapi": "3.1.0",
        "info": { "title": title, "version": version },
        "paths": paths,
    })
}

fn operation(route: &Route) -> Value {
    let mut op = json!({
        "responses": {
            "200": { "description": StatusCode::Ok.canonical_reason() },
            "500": { "description": StatusCode::InternalServerError.canonical_reason() },
        }
    });
    if !route.param_names.is_empty() {
        op["parameters"] = route
            .param_names
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "in": "path",
                    "required": true,
                    "schema": { "type": "string" },
                })
            })
            .collect();
    }
    op
}

/// `/users/:id/*rest` becomes `/users/{id}/{rest}`.
fn path_template(pattern: &RoutePattern) -> String {
    let mut out = String::new();
    for segment in pattern.segments() {
        out.push('/');
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Param(name) | Segment::Wildcard(name) => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

fn openapi_verb(method: &Method) -> Option<&'static str> {
    Some(match method {
        Method::Get => "get",
        Method::Post => "post",
        Method::Put => "put",
        Method::Delete => "delete",
        Method::Patch => "patch",
        Method::Head => "head",
        Method::Options => "options",
        _ => return None,
    })
}
