//! In-memory catalogue store (C): target_id -> (target meta, ordered pages, revision).
//!
//! Single writer per target (the WikiTarget reconciler); many concurrent readers
//! (the read API, the diagnostics). Readers never block writers and always see
//! a coherent snapshot for a single target.

use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

use crate::wikitarget::types::WikiTargetMode;

/// Identity of a WikiTarget, `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId {
    pub namespace: String,
    pub name: String,
}

impl TargetId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        TargetId {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone)]
pub struct TargetMeta {
    pub id: TargetId,
    pub mode: WikiTargetMode,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub updated_at: String,
    pub language: Option<String>,
    pub has_assets: bool,
    pub collection: Option<String>,
    pub is_draft: bool,
    pub is_template: bool,
}

#[derive(Debug, Clone)]
pub struct TargetEntry {
    pub meta: TargetMeta,
    pub pages: Vec<Page>,
    pub revision: u64,
}

#[derive(Default)]
pub struct Store {
    targets: RwLock<HashMap<TargetId, TargetEntry>>,
}

impl Store {
    pub fn new() -> Self {
        Store {
            targets: RwLock::new(HashMap::new()),
        }
    }

    /// Atomically replace the page slice for `target_id` and bump its revision.
    /// Deduplicates by `page_id`, keeping the first occurrence (discovery order).
    pub async fn update(&self, target_id: TargetId, meta: TargetMeta, pages: Vec<Page>) -> u64 {
        let mut deduped = Vec::with_capacity(pages.len());
        let mut seen = std::collections::HashSet::new();
        for page in pages {
            if seen.insert(page.id.clone()) {
                deduped.push(page);
            }
        }

        let mut targets = self.targets.write().await;
        let revision = match targets.get(&target_id) {
            Some(existing) => existing.revision + 1,
            None => 1,
        };
        targets.insert(
            target_id.clone(),
            TargetEntry {
                meta,
                pages: deduped,
                revision,
            },
        );
        revision
    }

    /// Snapshot read of a single target.
    pub async fn get(&self, target_id: &TargetId) -> Option<TargetEntry> {
        self.targets.read().await.get(target_id).cloned()
    }

    /// Full snapshot for the event stream / read API.
    pub async fn snapshot(&self) -> HashMap<TargetId, TargetEntry> {
        self.targets.read().await.clone()
    }

    /// True if `target_id`'s catalogue already has a page with this exact title.
    pub async fn has_title(&self, target_id: &TargetId, title: &str) -> bool {
        match self.get(target_id).await {
            Some(entry) => entry.pages.iter().any(|p| p.title == title),
            None => false,
        }
    }

    pub async fn find_by_title(&self, target_id: &TargetId, title: &str) -> Option<Page> {
        self.get(target_id)
            .await
            .and_then(|entry| entry.pages.into_iter().find(|p| p.title == title))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: &str, title: &str) -> Page {
        Page {
            id: id.to_string(),
            title: title.to_string(),
            slug: title.to_lowercase(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            language: None,
            has_assets: false,
            collection: None,
            is_draft: false,
            is_template: false,
        }
    }

    fn meta(id: &TargetId) -> TargetMeta {
        TargetMeta {
            id: id.clone(),
            mode: WikiTargetMode::ReadOnly,
            uri: "https://w.example".to_string(),
        }
    }

    #[tokio::test]
    async fn revision_starts_at_one_and_is_monotonic() {
        let store = Store::new();
        let id = TargetId::new("ns", "foo");

        let r1 = store
            .update(id.clone(), meta(&id), vec![page("p1", "A")])
            .await;
        assert_eq!(r1, 1);

        let r2 = store
            .update(id.clone(), meta(&id), vec![page("p1", "A"), page("p2", "B")])
            .await;
        assert_eq!(r2, 2);

        let entry = store.get(&id).await.unwrap();
        assert_eq!(entry.revision, 2);
        assert_eq!(entry.pages.len(), 2);
    }

    #[tokio::test]
    async fn update_dedups_by_page_id_preserving_order() {
        let store = Store::new();
        let id = TargetId::new("ns", "foo");

        store
            .update(
                id.clone(),
                meta(&id),
                vec![page("p1", "A"), page("p1", "A-dup"), page("p2", "B")],
            )
            .await;

        let entry = store.get(&id).await.unwrap();
        assert_eq!(entry.pages.len(), 2);
        assert_eq!(entry.pages[0].id, "p1");
        assert_eq!(entry.pages[0].title, "A");
        assert_eq!(entry.pages[1].id, "p2");
    }

    #[tokio::test]
    async fn readers_see_coherent_snapshot_per_target() {
        let store = std::sync::Arc::new(Store::new());
        let id = TargetId::new("ns", "foo");
        store
            .update(id.clone(), meta(&id), vec![page("p1", "A")])
            .await;

        let reader_store = store.clone();
        let reader_id = id.clone();
        let reader = tokio::spawn(async move {
            let entry = reader_store.get(&reader_id).await.unwrap();
            entry.pages.len()
        });

        store
            .update(id.clone(), meta(&id), vec![page("p1", "A"), page("p2", "B")])
            .await;

        let observed = reader.await.unwrap();
        assert!(observed == 1 || observed == 2);
    }

    #[tokio::test]
    async fn has_title_reflects_latest_update() {
        let store = Store::new();
        let id = TargetId::new("ns", "foo");
        assert!(!store.has_title(&id, "AUTOTRANSLATED--> A").await);

        store
            .update(
                id.clone(),
                meta(&id),
                vec![page("d1", "AUTOTRANSLATED--> A")],
            )
            .await;
        assert!(store.has_title(&id, "AUTOTRANSLATED--> A").await);
    }
}
