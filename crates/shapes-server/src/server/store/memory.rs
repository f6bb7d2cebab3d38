use super::{DocumentCursor, DocumentStore, ReplaceOutcome, StoreError, StoreResult};
use async_trait::async_trait;
use core::ops::Bound;
use futures::{StreamExt, stream};
use parking_lot::RwLock;
use shapes_core::types::{DocumentFields, DocumentId, StoredDocument};
use std::{collections::BTreeMap, sync::Arc};

/// In-process document store.
///
/// Documents are kept ordered by id, and ids are time-ordered, so a scan
/// returns documents in creation order. Each operation takes the lock once,
/// which makes every single-document write atomic.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

#[derive(Default)]
struct State {
    docs: BTreeMap<DocumentId, DocumentFields>,
    closed: bool,
}

impl State {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert(&self, fields: DocumentFields) -> StoreResult<String> {
        let mut state = self.state.write();
        state.ensure_open()?;

        let id = DocumentId::generate();
        state.docs.insert(id, fields);
        Ok(id.to_string())
    }

    async fn find_one(&self, id: &DocumentId) -> StoreResult<Option<StoredDocument>> {
        let state = self.state.read();
        state.ensure_open()?;

        Ok(state
            .docs
            .get(id)
            .map(|fields| StoredDocument::new(*id, fields.clone())))
    }

    async fn replace(&self, id: &DocumentId, fields: DocumentFields) -> StoreResult<ReplaceOutcome> {
        let mut state = self.state.write();
        state.ensure_open()?;

        // Every matched replace counts as a modification, even when the new
        // fields equal the old ones.
        Ok(match state.docs.get_mut(id) {
            Some(slot) => {
                *slot = fields;
                ReplaceOutcome {
                    matched: 1,
                    modified: 1,
                }
            }
            None => ReplaceOutcome::default(),
        })
    }

    async fn delete(&self, id: &DocumentId) -> StoreResult<u64> {
        let mut state = self.state.write();
        state.ensure_open()?;

        Ok(u64::from(state.docs.remove(id).is_some()))
    }

    /// The cursor holds no lock between items: it re-enters the map after
    /// the last key it returned, so documents written during a scan may or
    /// may not be seen, and none is seen twice.
    fn scan(&self) -> DocumentCursor {
        let state = Arc::clone(&self.state);

        stream::unfold(Some(Bound::Unbounded), move |cursor| {
            let state = Arc::clone(&state);
            async move {
                let lower = cursor?;
                let guard = state.read();
                if guard.closed {
                    return Some((Err(StoreError::Closed), None));
                }

                let (id, fields) = guard.docs.range((lower, Bound::Unbounded)).next()?;
                let doc = StoredDocument::new(*id, fields.clone());
                Some((Ok(doc), Some(Bound::Excluded(*id))))
            }
        })
        .boxed()
    }

    async fn close(&self) -> StoreResult<()> {
        let mut state = self.state.write();
        state.closed = true;
        state.docs.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(title: &str) -> DocumentFields {
        DocumentFields {
            author_id: "author".into(),
            title: title.into(),
            content: format!("{title} body"),
        }
    }

    #[tokio::test]
    async fn insert_then_find() {
        let store = InMemoryStore::new();
        let raw = store.insert(fields("a")).await.unwrap();
        let id = DocumentId::parse(&raw).unwrap();

        let found = store.find_one(&id).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.fields, fields("a"));
    }

    #[tokio::test]
    async fn replace_and_delete_report_counts() {
        let store = InMemoryStore::new();
        let id = DocumentId::parse(&store.insert(fields("a")).await.unwrap()).unwrap();
        let absent = DocumentId::generate();

        let hit = store.replace(&id, fields("b")).await.unwrap();
        assert_eq!((hit.matched, hit.modified), (1, 1));
        let miss = store.replace(&absent, fields("b")).await.unwrap();
        assert_eq!(miss, ReplaceOutcome::default());

        assert_eq!(store.delete(&absent).await.unwrap(), 0);
        assert_eq!(store.delete(&id).await.unwrap(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn scan_is_lazy_and_restartable() {
        let store = InMemoryStore::new();
        for title in ["a", "b", "c"] {
            store.insert(fields(title)).await.unwrap();
        }

        let mut cursor = store.scan();
        let first = cursor.next().await.unwrap().unwrap();

        // A fresh cursor starts over, independently of the first.
        let all: Vec<_> = store.scan().map(|r| r.unwrap()).collect().await;
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], first);

        let rest: Vec<_> = cursor.map(|r| r.unwrap()).collect().await;
        assert_eq!(rest, all[1..]);
    }

    #[tokio::test]
    async fn closed_store_refuses_everything() {
        let store = InMemoryStore::new();
        store.insert(fields("a")).await.unwrap();
        store.close().await.unwrap();

        assert!(matches!(
            store.insert(fields("b")).await,
            Err(StoreError::Closed)
        ));
        let items: Vec<_> = store.scan().collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(StoreError::Closed)));
    }
}
