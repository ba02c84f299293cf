//! In-memory storage backend.
//!
//! This is the reference implementation of `StorageBackend`.
//! It keeps nodes in a HashMap and the link index in an ordered set of
//! encoded keys, both behind one RwLock.
//!
//! ## Limitations
//!
//! - **Batch commits copy the graph**: `commit()` applies the batch to a
//!   clone of the state and swaps it in, so a failing step leaves nothing
//!   behind. Fine for tests and small embedded graphs, wasteful for big ones.
//! - **No persistence**: everything is gone on drop.
//!
//! Use this backend for:
//! - Testing the adjacency layer, decorators and propagation protocol
//! - Embedding the view engine in applications that don't need persistence

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::codec::{KeyPattern, LinkKey};
use crate::model::*;
use crate::tx::{Transaction, TxId, TxOp, TxSummary};
use crate::{Error, Result};
use super::StorageBackend;

// ============================================================================
// MemoryBackend
// ============================================================================

/// In-memory property graph storage. Clones share the same graph.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    state: RwLock<GraphState>,
    next_tx_id: AtomicU64,
}

#[derive(Clone, Default)]
struct GraphState {
    nodes: HashMap<ObjectId, Node>,
    /// Forward and inverse link keys, ordered for prefix scans.
    keys: BTreeSet<String>,
}

impl GraphState {
    fn create_object(&mut self, id: &ObjectId, object_type: &str, body: Value) -> bool {
        if self.nodes.contains_key(id) {
            return false;
        }
        let node = Node::new(id.clone(), object_type).with_body(body);
        self.nodes.insert(id.clone(), node);
        true
    }

    fn set_body(&mut self, id: &ObjectId, body: Value) -> Result<()> {
        let node = self.nodes.get_mut(id).ok_or_else(|| Error::NotFound(format!("Object {id}")))?;
        node.body = body;
        Ok(())
    }

    fn delete_object(&mut self, id: &ObjectId) -> Result<bool> {
        if self.nodes.remove(id).is_none() {
            return Ok(false);
        }
        // Detach: drop both keys of every link the object took part in.
        let mut doomed = Vec::new();
        for direction in [Direction::Out, Direction::In] {
            let pattern = KeyPattern::edges(id, direction, None);
            for key in self.scan(&pattern) {
                if let Ok(decoded) = LinkKey::decode(&key) {
                    doomed.push(decoded.to_link());
                }
            }
        }
        for link in &doomed {
            self.delete_link(link)?;
        }
        Ok(true)
    }

    fn create_link(&mut self, link: &Link) -> Result<bool> {
        for end in [&link.source, &link.target] {
            if !self.nodes.contains_key(end) {
                return Err(Error::NotFound(format!("Object {end}")));
            }
        }
        let forward = LinkKey::forward(link).encode()?;
        let inverse = LinkKey::inverse(link).encode()?;
        let created = self.keys.insert(forward);
        self.keys.insert(inverse);
        Ok(created)
    }

    fn delete_link(&mut self, link: &Link) -> Result<bool> {
        let forward = LinkKey::forward(link).encode()?;
        let inverse = LinkKey::inverse(link).encode()?;
        let removed = self.keys.remove(&forward);
        self.keys.remove(&inverse);
        Ok(removed)
    }

    fn scan(&self, pattern: &KeyPattern) -> Vec<String> {
        let prefix = pattern.literal_prefix();
        self.keys
            .range(prefix.clone()..)
            .take_while(|k| k.starts_with(&prefix))
            .filter(|k| pattern.matches(k))
            .cloned()
            .collect()
    }

    fn apply(&mut self, op: TxOp) -> Result<bool> {
        match op {
            TxOp::CreateObject { id, object_type, body } => Ok(self.create_object(&id, &object_type, body)),
            TxOp::SetBody { id, body } => self.set_body(&id, body).map(|_| true),
            TxOp::DeleteObject { id } => self.delete_object(&id).map(|_| true),
            TxOp::CreateLink(link) => self.create_link(&link),
            TxOp::DeleteLink(link) => self.delete_link(&link).map(|_| true),
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.inner.state.read().nodes.len()
    }

    /// Number of links (each link owns two index keys).
    pub fn link_count(&self) -> usize {
        self.inner.state.read().keys.len() / 2
    }
}

// ============================================================================
// StorageBackend impl
// ============================================================================

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn create_object(&self, id: &ObjectId, object_type: &str, body: Value) -> Result<bool> {
        Ok(self.inner.state.write().create_object(id, object_type, body))
    }

    async fn get_node(&self, id: &ObjectId) -> Result<Option<Node>> {
        Ok(self.inner.state.read().nodes.get(id).cloned())
    }

    async fn set_body(&self, id: &ObjectId, body: Value) -> Result<()> {
        self.inner.state.write().set_body(id, body)
    }

    async fn delete_object(&self, id: &ObjectId) -> Result<bool> {
        self.inner.state.write().delete_object(id)
    }

    async fn get_type(&self, id: &ObjectId) -> Result<Option<String>> {
        Ok(self.inner.state.read().nodes.get(id).map(|n| n.object_type.clone()))
    }

    async fn exists(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.inner.state.read().nodes.contains_key(id))
    }

    async fn create_link(&self, link: &Link) -> Result<bool> {
        self.inner.state.write().create_link(link)
    }

    async fn delete_link(&self, link: &Link) -> Result<bool> {
        self.inner.state.write().delete_link(link)
    }

    async fn link_exists(&self, link: &Link) -> Result<bool> {
        let key = LinkKey::forward(link).encode()?;
        Ok(self.inner.state.read().keys.contains(&key))
    }

    async fn match_keys(&self, pattern: &KeyPattern) -> Result<Vec<String>> {
        // Validates the pattern components.
        pattern.render()?;
        Ok(self.inner.state.read().scan(pattern))
    }

    async fn commit(&self, tx: Transaction) -> Result<TxSummary> {
        let id = TxId(self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut state = self.inner.state.write();
        let mut staged = (*state).clone();
        let mut summary = TxSummary { id: Some(id), ..TxSummary::default() };
        for op in tx.into_ops() {
            if staged.apply(op)? {
                summary.applied += 1;
            } else {
                summary.conflicts += 1;
            }
        }
        *state = staged;
        debug!(tx = id.0, applied = summary.applied, conflicts = summary.conflicts, "batch committed");
        Ok(summary)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(s: &str) -> ObjectId {
        ObjectId::new(s)
    }

    #[tokio::test]
    async fn test_create_and_get_node() {
        let db = MemoryBackend::new();
        assert!(db.create_object(&id("rack1"), "rack", json!({"name": "rack1"})).await.unwrap());

        let node = db.get_node(&id("rack1")).await.unwrap().unwrap();
        assert_eq!(node.object_type, "rack");
        assert_eq!(node.body["name"], "rack1");
        assert_eq!(db.get_type(&id("rack1")).await.unwrap().as_deref(), Some("rack"));
    }

    #[tokio::test]
    async fn test_duplicate_create_is_a_conflict_not_an_error() {
        let db = MemoryBackend::new();
        db.create_object(&id("a"), "t", json!({"v": 1})).await.unwrap();
        assert!(!db.create_object(&id("a"), "t", json!({"v": 2})).await.unwrap());
        assert_eq!(db.get_body(&id("a")).await.unwrap(), Some(json!({"v": 1})));

        db.create_object(&id("b"), "t", json!({})).await.unwrap();
        let link = Link::new("a", "x", "b");
        assert!(db.create_link(&link).await.unwrap());
        assert!(!db.create_link(&link).await.unwrap());
        assert_eq!(db.link_count(), 1);
    }

    #[tokio::test]
    async fn test_link_writes_forward_and_inverse_keys() {
        let db = MemoryBackend::new();
        db.create_object(&id("a"), "t", json!({})).await.unwrap();
        db.create_object(&id("b"), "t", json!({})).await.unwrap();
        db.create_link(&Link::new("a", "x", "b")).await.unwrap();

        let out = db.match_keys(&KeyPattern::edges(&id("a"), Direction::Out, None)).await.unwrap();
        let inv = db.match_keys(&KeyPattern::edges(&id("b"), Direction::In, Some("x"))).await.unwrap();
        assert_eq!(out, vec!["a.out.x.b"]);
        assert_eq!(inv, vec!["b.in.x.a"]);
    }

    #[tokio::test]
    async fn test_link_to_missing_object_fails() {
        let db = MemoryBackend::new();
        db.create_object(&id("a"), "t", json!({})).await.unwrap();
        let result = db.create_link(&Link::new("a", "x", "ghost")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_object_detaches_links() {
        let db = MemoryBackend::new();
        for n in ["a", "b", "c"] {
            db.create_object(&id(n), "t", json!({})).await.unwrap();
        }
        db.create_link(&Link::new("a", "x", "b")).await.unwrap();
        db.create_link(&Link::new("c", "y", "a")).await.unwrap();
        db.create_link(&Link::new("b", "x", "c")).await.unwrap();

        assert!(db.delete_object(&id("a")).await.unwrap());
        assert_eq!(db.link_count(), 1);
        assert!(db.link_exists(&Link::new("b", "x", "c")).await.unwrap());
        assert!(!db.delete_object(&id("a")).await.unwrap());
    }

    #[tokio::test]
    async fn test_prefix_scan_does_not_leak_into_longer_ids() {
        let db = MemoryBackend::new();
        for n in ["x", "xy", "t"] {
            db.create_object(&id(n), "t", json!({})).await.unwrap();
        }
        db.create_link(&Link::new("x", "l", "t")).await.unwrap();
        db.create_link(&Link::new("xy", "l", "t")).await.unwrap();

        let keys = db.match_keys(&KeyPattern::edges(&id("x"), Direction::Out, None)).await.unwrap();
        assert_eq!(keys, vec!["x.out.l.t"]);
    }

    #[tokio::test]
    async fn test_commit_is_all_or_nothing() {
        let db = MemoryBackend::new();
        let tx = Transaction::new()
            .create_object("a", "t", json!({}))
            .link("a", "x", "missing");
        assert!(db.commit(tx).await.is_err());
        assert_eq!(db.object_count(), 0);

        let tx = Transaction::new()
            .create_object("a", "t", json!({}))
            .create_object("b", "t", json!({}))
            .link("a", "x", "b")
            .create_object("a", "t", json!({}));
        let summary = db.commit(tx).await.unwrap();
        assert_eq!(summary.applied, 3);
        assert_eq!(summary.conflicts, 1);
        assert_eq!(db.link_count(), 1);
    }
}
