use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

/// Rendered pages keyed by path and viewer. Pages differ per viewer (vote
/// highlights, owner controls), so each viewer gets its own entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ViewKey {
    path: String,
    viewer: String,
}

// ---------------------------------------------------------------------------
// ViewCache
// ---------------------------------------------------------------------------

/// Server-side cache of rendered HTML. Mutations call `revalidate_path` for
/// the views they make stale; the next request re-renders.
/// Invalidation is best-effort: a reader racing a mutation may still be
/// served the old page once.
pub struct ViewCache {
    views: DashMap<ViewKey, String>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ViewCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, path: &str, viewer: &str) -> Option<String> {
        let key = ViewKey { path: path.to_string(), viewer: viewer.to_string() };
        match self.views.get(&key) {
            Some(html) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(html.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, path: &str, viewer: &str, html: String) {
        let key = ViewKey { path: path.to_string(), viewer: viewer.to_string() };
        self.views.insert(key, html);
    }

    /// Drop every viewer's copy of `path`.
    pub fn revalidate_path(&self, path: &str) {
        let before = self.views.len();
        self.views.retain(|k, _| k.path != path);
        debug!(path = %path, evicted = before.saturating_sub(self.views.len()), "revalidated");
    }

    /// Drop everything. Used when a change (such as a username) shows up on
    /// too many pages to list.
    pub fn revalidate_all(&self) {
        self.views.clear();
        debug!("revalidated all views");
    }

    pub fn cached_views(&self) -> usize {
        self.views.len()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Default for ViewCache {
    fn default() -> Self {
        Self {
            views: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
