//! # Storage Backend Trait
//!
//! The contract between the view engine and whatever stores the graph.
//! The engine only needs point reads and writes of node bodies, a point read
//! of a node's type, typed link create/delete, and one query primitive: list
//! every key in the link index that matches a `KeyPattern`.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryBackend` | `memory` | In-memory for testing/embedding |

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::codec::KeyPattern;
use crate::model::*;
use crate::tx::{Transaction, TxOp, TxSummary};
use crate::{Error, Result};

pub use memory::MemoryBackend;

// ============================================================================
// StorageBackend Trait
// ============================================================================

/// The storage collaborator.
///
/// Create operations return `Ok(false)` when the object or link already
/// exists. Callers treat that as success.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Shut down the backend, flushing any pending writes.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    // ========================================================================
    // Objects
    // ========================================================================

    /// Create an object. Returns false if it already existed (body untouched).
    async fn create_object(&self, id: &ObjectId, object_type: &str, body: Value) -> Result<bool>;

    /// Get a node by ID. Returns None if not found.
    async fn get_node(&self, id: &ObjectId) -> Result<Option<Node>>;

    /// Replace a node's body.
    async fn set_body(&self, id: &ObjectId, body: Value) -> Result<()>;

    /// Delete an object together with every link touching it.
    /// Returns true if it existed.
    async fn delete_object(&self, id: &ObjectId) -> Result<bool>;

    /// Point read of the node body.
    async fn get_body(&self, id: &ObjectId) -> Result<Option<Value>> {
        Ok(self.get_node(id).await?.map(|n| n.body))
    }

    /// Point read of the node's declared type.
    async fn get_type(&self, id: &ObjectId) -> Result<Option<String>> {
        Ok(self.get_node(id).await?.map(|n| n.object_type))
    }

    async fn exists(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.get_node(id).await?.is_some())
    }

    // ========================================================================
    // Links
    // ========================================================================

    /// File a link under its forward and inverse keys.
    /// Returns false if the link already existed.
    async fn create_link(&self, link: &Link) -> Result<bool>;

    /// Remove both keys of a link. Returns true if it existed.
    async fn delete_link(&self, link: &Link) -> Result<bool>;

    async fn link_exists(&self, link: &Link) -> Result<bool>;

    // ========================================================================
    // Link index
    // ========================================================================

    /// Every key in the link index matching `pattern`.
    /// Order is unspecified; the adjacency layer sorts.
    async fn match_keys(&self, pattern: &KeyPattern) -> Result<Vec<String>>;

    // ========================================================================
    // Batches
    // ========================================================================

    /// Apply a batch of writes in order.
    ///
    /// Default falls back to sequential single-object calls, which is not
    /// atomic. Backends that can do better override it.
    async fn commit(&self, tx: Transaction) -> Result<TxSummary> {
        let mut summary = TxSummary::default();
        for op in tx.into_ops() {
            let applied = match op {
                TxOp::CreateObject { id, object_type, body } => {
                    self.create_object(&id, &object_type, body).await?
                }
                TxOp::SetBody { id, body } => {
                    self.set_body(&id, body).await?;
                    true
                }
                TxOp::DeleteObject { id } => {
                    self.delete_object(&id).await?;
                    true
                }
                TxOp::CreateLink(link) => self.create_link(&link).await?,
                TxOp::DeleteLink(link) => {
                    self.delete_link(&link).await?;
                    true
                }
            };
            if applied {
                summary.applied += 1;
            } else {
                summary.conflicts += 1;
            }
        }
        Ok(summary)
    }
}

/// Read a node and fail with `NotFound` if it is missing.
pub(crate) async fn require_node<B: StorageBackend + ?Sized>(backend: &B, id: &ObjectId) -> Result<Node> {
    backend
        .get_node(id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Object {id}")))
}
