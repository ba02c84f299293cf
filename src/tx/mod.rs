//! Multi-step write batches.
//!
//! A `Transaction` collects object and link writes and hands them to
//! `StorageBackend::commit` in one call. Creating something that already
//! exists is a conflict, and conflicts count as success: provisioning the
//! same schema twice is a no-op.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Link, ObjectId};

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

/// One step of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum TxOp {
    CreateObject { id: ObjectId, object_type: String, body: Value },
    SetBody { id: ObjectId, body: Value },
    DeleteObject { id: ObjectId },
    CreateLink(Link),
    DeleteLink(Link),
}

/// An ordered batch of writes.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    ops: Vec<TxOp>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_object(mut self, id: impl Into<ObjectId>, object_type: &str, body: Value) -> Self {
        self.ops.push(TxOp::CreateObject {
            id: id.into(),
            object_type: object_type.to_string(),
            body,
        });
        self
    }

    pub fn set_body(mut self, id: impl Into<ObjectId>, body: Value) -> Self {
        self.ops.push(TxOp::SetBody { id: id.into(), body });
        self
    }

    pub fn delete_object(mut self, id: impl Into<ObjectId>) -> Self {
        self.ops.push(TxOp::DeleteObject { id: id.into() });
        self
    }

    pub fn link(mut self, source: impl Into<ObjectId>, link_type: &str, target: impl Into<ObjectId>) -> Self {
        self.ops.push(TxOp::CreateLink(Link::new(source, link_type, target)));
        self
    }

    pub fn unlink(mut self, source: impl Into<ObjectId>, link_type: &str, target: impl Into<ObjectId>) -> Self {
        self.ops.push(TxOp::DeleteLink(Link::new(source, link_type, target)));
        self
    }

    pub fn ops(&self) -> &[TxOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<TxOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// What a committed batch changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxSummary {
    pub id: Option<TxId>,
    pub applied: usize,
    /// Creates skipped because the object or link already existed.
    pub conflicts: usize,
}
