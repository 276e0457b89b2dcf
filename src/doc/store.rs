use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::colab::error::SessionError;
use crate::storage::Workspace;

use super::document::Document;
use super::operation::{AppliedOperation, EditOperation};

struct DocEntry {
    doc: Arc<Mutex<Document>>,
    open_by: HashSet<String>,
}

/// Holds the authoritative in-memory content of every open file of one
/// session, one `Document` per path.
///
/// Each document is wrapped in its own mutex; locking it is the serialized
/// intake queue that fixes server arrival order, so concurrent edits to
/// different files never block each other. Flushing snapshots the content
/// under the lock and performs the write without it.
pub struct DocumentStore {
    workspace: Workspace,
    rebase_window: usize,
    docs: RwLock<HashMap<String, DocEntry>>,
}

impl DocumentStore {
    pub fn new(workspace: Workspace, rebase_window: usize) -> Self {
        Self {
            workspace,
            rebase_window,
            docs: RwLock::new(HashMap::new()),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Open a document for a participant, loading it from storage on first
    /// open. Returns the current content and revision.
    pub async fn open(
        &self,
        participant_id: &str,
        path: &str,
    ) -> Result<(String, u64), SessionError> {
        {
            let mut docs = self.docs.write().await;
            if let Some(entry) = docs.get_mut(path) {
                entry.open_by.insert(participant_id.to_string());
                let doc = entry.doc.lock().await;
                return Ok((doc.content().to_string(), doc.revision()));
            }
        }

        // First open: read the initial content without holding the registry
        // lock, then insert unless someone else won the race.
        let content = self.workspace.read(path).await?;
        let mut docs = self.docs.write().await;
        let entry = docs.entry(path.to_string()).or_insert_with(|| {
            debug!("Opened document '{}'", path);
            DocEntry {
                doc: Arc::new(Mutex::new(Document::new(
                    path,
                    content.clone(),
                    self.rebase_window,
                ))),
                open_by: HashSet::new(),
            }
        });
        entry.open_by.insert(participant_id.to_string());
        let doc = entry.doc.lock().await;
        Ok((doc.content().to_string(), doc.revision()))
    }

    /// Handle to an open document, for callers that need to apply and fan
    /// out under the same serialization.
    pub async fn document(&self, path: &str) -> Option<Arc<Mutex<Document>>> {
        self.docs.read().await.get(path).map(|e| e.doc.clone())
    }

    /// Apply one operation to an open document.
    pub async fn apply(
        &self,
        path: &str,
        op: &EditOperation,
    ) -> Result<AppliedOperation, SessionError> {
        let doc = self
            .document(path)
            .await
            .ok_or_else(|| SessionError::DocumentNotOpen(path.to_string()))?;
        let mut doc = doc.lock().await;
        doc.apply(op)
    }

    /// Close a document for a participant. The document is evicted, with its
    /// content persisted, when the last participant closes it. On a failed
    /// persist the document stays resident so a later flush can retry.
    pub async fn close(&self, participant_id: &str, path: &str) -> Result<(), SessionError> {
        let evict = {
            let mut docs = self.docs.write().await;
            let Some(entry) = docs.get_mut(path) else {
                return Ok(());
            };
            entry.open_by.remove(participant_id);
            entry.open_by.is_empty()
        };
        if !evict {
            return Ok(());
        }

        match self.flush(path).await {
            Ok(_) => {
                self.docs.write().await.remove(path);
                debug!("Evicted document '{}'", path);
                Ok(())
            }
            Err(e) => {
                warn!("Keeping '{}' resident after failed persist: {}", path, e);
                Err(e)
            }
        }
    }

    /// Close every document a departing participant still had open.
    pub async fn close_all_for(&self, participant_id: &str) {
        let paths: Vec<String> = {
            let docs = self.docs.read().await;
            docs.iter()
                .filter(|(_, e)| e.open_by.contains(participant_id))
                .map(|(p, _)| p.clone())
                .collect()
        };
        for path in paths {
            if let Err(e) = self.close(participant_id, &path).await {
                warn!("Failed to close '{}' for {}: {}", path, participant_id, e);
            }
        }
    }

    /// Persist a document's current content. Advisory: never blocks
    /// concurrent editing, and a failure leaves in-memory state
    /// authoritative. Returns whether anything was written.
    pub async fn flush(&self, path: &str) -> Result<bool, SessionError> {
        let doc = self
            .document(path)
            .await
            .ok_or_else(|| SessionError::DocumentNotOpen(path.to_string()))?;

        let (content, revision, dirty) = {
            let doc = doc.lock().await;
            (doc.content().to_string(), doc.revision(), doc.is_dirty())
        };
        if !dirty {
            return Ok(false);
        }

        self.workspace.write(path, &content).await?;
        doc.lock().await.mark_flushed(revision);
        debug!("Flushed '{}' at revision {}", path, revision);
        Ok(true)
    }

    /// Drop a document without flushing, regardless of who holds it open.
    /// Used when the backing file is deleted or renamed out from under it.
    pub async fn evict(&self, path: &str) {
        if self.docs.write().await.remove(path).is_some() {
            debug!("Evicted document '{}' without flush", path);
        }
    }

    /// Flush every dirty document and evict clean ones nobody holds open.
    /// Used by the periodic flush task and on session close.
    pub async fn flush_all(&self) -> usize {
        let paths: Vec<String> = self.docs.read().await.keys().cloned().collect();
        let mut flushed = 0;
        for path in &paths {
            match self.flush(path).await {
                Ok(true) => flushed += 1,
                Ok(false) => {}
                Err(SessionError::DocumentNotOpen(_)) => {}
                Err(e) => warn!("Flush of '{}' failed: {}", path, e),
            }
        }

        let mut docs = self.docs.write().await;
        let before = docs.len();
        for path in paths {
            let evict = match docs.get(&path) {
                Some(entry) if entry.open_by.is_empty() => {
                    match entry.doc.try_lock() {
                        Ok(doc) => !doc.is_dirty(),
                        Err(_) => false,
                    }
                }
                _ => false,
            };
            if evict {
                docs.remove(&path);
            }
        }
        if docs.len() != before {
            debug!("Evicted {} idle documents", before - docs.len());
        }
        flushed
    }

    /// Flush and drop every document. Called when the session closes.
    pub async fn close_all(&self) {
        let flushed = self.flush_all().await;
        let mut docs = self.docs.write().await;
        if !docs.is_empty() {
            info!("Closing {} documents ({} flushed)", docs.len(), flushed);
        }
        docs.clear();
    }

    /// (open documents, dirty documents) for diagnostics.
    pub async fn counts(&self) -> (usize, usize) {
        let docs = self.docs.read().await;
        let mut dirty = 0;
        for entry in docs.values() {
            if let Ok(doc) = entry.doc.try_lock() {
                if doc.is_dirty() {
                    dirty += 1;
                }
            }
        }
        (docs.len(), dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::operation::EditSpan;

    async fn store() -> (tempfile::TempDir, DocumentStore) {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path());
        ws.write("a.txt", "hello").await.unwrap();
        (dir, DocumentStore::new(ws, 64))
    }

    #[tokio::test]
    async fn open_loads_initial_content() {
        let (_dir, store) = store().await;
        let (content, revision) = store.open("p1", "a.txt").await.unwrap();
        assert_eq!(content, "hello");
        assert_eq!(revision, 0);
    }

    #[tokio::test]
    async fn one_document_per_path() {
        let (_dir, store) = store().await;
        store.open("p1", "a.txt").await.unwrap();
        let op = EditOperation::new("p1", 0, vec![EditSpan::insert(5, "!")], 1);
        store.apply("a.txt", &op).await.unwrap();

        // A second opener sees the edited state, not a fresh load.
        let (content, revision) = store.open("p2", "a.txt").await.unwrap();
        assert_eq!(content, "hello!");
        assert_eq!(revision, 1);
        assert_eq!(store.counts().await.0, 1);
    }

    #[tokio::test]
    async fn apply_requires_open_document() {
        let (_dir, store) = store().await;
        let op = EditOperation::new("p1", 0, vec![EditSpan::insert(0, "x")], 1);
        let err = store.apply("a.txt", &op).await.unwrap_err();
        assert!(matches!(err, SessionError::DocumentNotOpen(_)));
    }

    #[tokio::test]
    async fn last_close_persists_and_evicts() {
        let (_dir, store) = store().await;
        store.open("p1", "a.txt").await.unwrap();
        store.open("p2", "a.txt").await.unwrap();
        let op = EditOperation::new("p1", 0, vec![EditSpan::insert(5, " world")], 1);
        store.apply("a.txt", &op).await.unwrap();

        store.close("p1", "a.txt").await.unwrap();
        assert_eq!(store.counts().await.0, 1, "still open by p2");

        store.close("p2", "a.txt").await.unwrap();
        assert_eq!(store.counts().await.0, 0);
        assert_eq!(store.workspace().read("a.txt").await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn flush_is_a_noop_for_clean_documents() {
        let (_dir, store) = store().await;
        store.open("p1", "a.txt").await.unwrap();
        assert!(!store.flush("a.txt").await.unwrap());

        let op = EditOperation::new("p1", 0, vec![EditSpan::insert(0, "x")], 1);
        store.apply("a.txt", &op).await.unwrap();
        assert!(store.flush("a.txt").await.unwrap());
        assert!(!store.flush("a.txt").await.unwrap());
        assert_eq!(store.workspace().read("a.txt").await.unwrap(), "xhello");
    }

    #[tokio::test]
    async fn close_all_for_releases_participant_documents() {
        let (_dir, store) = store().await;
        store.workspace().write("b.txt", "b").await.unwrap();
        store.open("p1", "a.txt").await.unwrap();
        store.open("p1", "b.txt").await.unwrap();
        store.open("p2", "a.txt").await.unwrap();

        store.close_all_for("p1").await;
        assert_eq!(store.counts().await.0, 1, "a.txt stays open for p2");
    }
}
