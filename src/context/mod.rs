//! Per-request context handed to handlers.
//!
//! A [`Context`] owns the request (including its body) and the path
//! parameters captured by the route table. It is moved into the handler, so
//! the body is released as soon as the handler finishes, however it exits.

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::http::{Headers, Method, Request};

/// Path parameters captured while matching a route pattern.
///
/// Values are the raw path segments; no decoding or type coercion is applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    entries: Vec<(String, String)>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` under `name`, replacing an earlier capture of the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Captures in pattern order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PathParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = PathParams::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// Everything a handler gets to see about one request.
#[derive(Debug)]
pub struct Context {
    request: Request,
    params: PathParams,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self::with_params(request, PathParams::new())
    }

    pub fn with_params(request: Request, params: PathParams) -> Self {
        Self { request, params }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn path(&self) -> &str {
        self.request.path()
    }

    pub fn headers(&self) -> &Headers {
        self.request.headers()
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Shorthand for `params().get(name)`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.request.query_param(key)
    }

    pub fn body(&self) -> &Bytes {
        self.request.body()
    }

    /// Deserializes the request body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(self.request.body())
    }

    pub fn into_request(self) -> Request {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_keep_pattern_order_and_replace() {
        let mut p = PathParams::new();
        p.insert("user", "7");
        p.insert("post", "99");
        p.insert("user", "8");
        let pairs: Vec<_> = p.iter().collect();
        assert_eq!(pairs, vec![("user", "8"), ("post", "99")]);
    }

    #[test]
    fn context_json_body() {
        #[derive(serde::Deserialize)]
        struct Payload {
            name: String,
        }

        let req = Request::new(Method::Post, "/users?dry_run=1").with_body(r#"{"name":"ferris"}"#);
        let ctx = Context::with_params(req, [("id", "42")].into_iter().collect());
        let payload: Payload = ctx.json().unwrap();
        assert_eq!(payload.name, "ferris");
        assert_eq!(ctx.param("id"), Some("42"));
        assert_eq!(ctx.query("dry_run"), Some("1"));
    }
}
