//! In-memory static file cache for the non-API, non-upgrade branch of the
//! request router.
//!
//! A minimal reference implementation: files are read through into an
//! `Arc`-refcounted cache entry on first request and served from memory on
//! every request after that. There is no mtime invalidation or LRU
//! eviction — out of scope for the proxy core this crate is built around.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::Mutex;

/// A cached file's bytes plus its guessed MIME type.
pub struct CachedFile {
    pub body: Vec<u8>,
    pub content_type: &'static str,
}

/// Read-through cache rooted at a configured static directory. Safe to
/// share across connection tasks behind an `Arc`.
pub struct StaticCache {
    root: PathBuf,
    entries: Mutex<HashMap<PathBuf, Arc<CachedFile>>>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum StaticError {
    /// The requested path escapes the configured static root (contains a
    /// `..` component, or resolves to a symlink target outside it).
    PathTraversal,
    NotFound,
    Io,
}

impl StaticCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves `request_path` (the URL path, e.g. `/css/app.css`) against
    /// the static root, serving `index.html` for `/`, and returns the
    /// cached entry, populating the cache on a miss.
    pub async fn get(&self, request_path: &[u8]) -> Result<Arc<CachedFile>, StaticError> {
        let rel = sanitize_path(request_path)?;
        let full_path = self.root.join(&rel);

        if let Some(cached) = self.entries.lock().await.get(&rel) {
            return Ok(Arc::clone(cached));
        }

        let bytes = fs::read(&full_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StaticError::NotFound,
            _ => StaticError::Io,
        })?;
        let cached = Arc::new(CachedFile {
            content_type: guess_content_type(&full_path),
            body: bytes,
        });

        self.entries.lock().await.insert(rel, Arc::clone(&cached));
        Ok(cached)
    }
}

/// Turns a URL path into a root-relative filesystem path, rejecting any
/// `..` component so a request can't escape the configured static root.
fn sanitize_path(request_path: &[u8]) -> Result<PathBuf, StaticError> {
    let text = std::str::from_utf8(request_path).map_err(|_| StaticError::PathTraversal)?;
    let trimmed = text.trim_start_matches('/');
    let trimmed = if trimmed.is_empty() { "index.html" } else { trimmed };

    let mut rel = PathBuf::new();
    for component in Path::new(trimmed).components() {
        use std::path::Component;
        match component {
            Component::Normal(part) => rel.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StaticError::PathTraversal)
            }
        }
    }
    if rel.as_os_str().is_empty() {
        return Err(StaticError::PathTraversal);
    }
    Ok(rel)
}

fn guess_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        Some("woff2") => "font/woff2",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
