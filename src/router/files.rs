//! File routes: serve a local directory or a set of in-memory assets under a
//! URL prefix.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use super::{RouteError, Router};
use crate::context::Context;
use crate::handler::HandlerError;
use crate::http::{Response, StatusCode};

const PATH_PARAM: &str = "path";

impl Router {
    /// Serves files from `root` for `GET {prefix}/...`.
    ///
    /// A request for a directory answers with its `index.html`. Paths that
    /// resolve outside `root` (through `..` or symlinks) are refused with
    /// `403`; missing files answer `404`.
    ///
    /// # Errors
    ///
    /// Fails like [`register`](Router::register) if a wildcard route under
    /// `prefix` already exists.
    pub fn serve_dir(&mut self, prefix: &str, root: impl Into<PathBuf>) -> Result<&mut Self, RouteError> {
        let pattern = format!("{}/*{PATH_PARAM}", prefix.trim_end_matches('/'));
        let root = Arc::new(root.into());
        self.get(&pattern, move |ctx: Context| {
            let root = Arc::clone(&root);
            async move { serve_file(&root, ctx.param(PATH_PARAM).unwrap_or_default()).await }
        })
    }

    /// Serves in-memory `assets` for `GET {prefix}/...`, keyed by their path
    /// relative to `prefix` (`"css/site.css"`).
    ///
    /// Useful with assets compiled into the binary through `include_bytes!`.
    /// The prefix itself and any path ending in `/` answer with the
    /// `index.html` below it. Unknown paths answer `404`.
    ///
    /// # Errors
    ///
    /// Fails like [`register`](Router::register) if a wildcard route under
    /// `prefix` already exists.
    pub fn serve_embedded<I, K, V>(&mut self, prefix: &str, assets: I) -> Result<&mut Self, RouteError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Bytes>,
    {
        let pattern = format!("{}/*{PATH_PARAM}", prefix.trim_end_matches('/'));
        let assets: Arc<HashMap<String, Bytes>> = Arc::new(
            assets
                .into_iter()
                .map(|(path, data)| (path.into().trim_start_matches('/').to_owned(), data.into()))
                .collect(),
        );
        tracing::debug!(prefix, count = assets.len(), "embedded assets registered");
        self.get(&pattern, move |ctx: Context| {
            let assets = Arc::clone(&assets);
            async move { serve_asset(&assets, ctx.param(PATH_PARAM).unwrap_or_default()) }
        })
    }
}

fn serve_asset(assets: &HashMap<String, Bytes>, relative: &str) -> Result<Response, HandlerError> {
    let key = if relative.is_empty() || relative.ends_with('/') {
        format!("{relative}index.html")
    } else {
        relative.to_owned()
    };
    let data = assets
        .get(&key)
        .ok_or_else(|| HandlerError::not_found(format!("no asset at {relative:?}")))?;
    Ok(Response::new(StatusCode::Ok)
        .header("Content-Type", content_type(Path::new(&key)))
        .body_bytes(data.clone()))
}

async fn serve_file(root: &Path, relative: &str) -> Result<Response, HandlerError> {
    let root = tokio::fs::canonicalize(root).await?;
    let mut target = tokio::fs::canonicalize(root.join(relative)).await?;
    if !target.starts_with(&root) {
        tracing::warn!(path = relative, "refusing path outside served directory");
        return Err(HandlerError::new(StatusCode::Forbidden, "path escapes served directory"));
    }

    if tokio::fs::metadata(&target).await?.is_dir() {
        target.push("index.html");
    }
    let contents = tokio::fs::read(&target).await?;
    Ok(Response::new(StatusCode::Ok)
        .header("Content-Type", content_type(&target))
        .body_bytes(contents))
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}
