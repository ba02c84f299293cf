//! Identifier generation.
//!
//! All identifiers are name-based UUIDv5 values under one namespace, so a
//! generator built with the same namespace reproduces the same ids. The
//! generator is passed in rather than living in a global.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

use crate::model::{Declaration, ObjectId};

/// Namespace used when the configuration does not name one.
pub const DEFAULT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b9e_4d0a_5e37_9a41_c3d8_0b72_e615);

#[derive(Debug)]
pub struct IdGenerator {
    namespace: Uuid,
    counter: AtomicU64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl IdGenerator {
    pub fn new(namespace: Uuid) -> Self {
        Self { namespace, counter: AtomicU64::new(0) }
    }

    /// Identity of the controller serving `(name, declaration, target)`.
    ///
    /// The declaration is serialized from its ordered map, so two requests
    /// listing the same fields in different orders land on one controller.
    pub fn controller_id(&self, name: &str, declaration: &Declaration, target: &ObjectId) -> ObjectId {
        let canonical = serde_json::json!({
            "name": name,
            "declaration": declaration,
            "target": target,
        });
        let id = Uuid::new_v5(&self.namespace, canonical.to_string().as_bytes());
        ObjectId::new(id.to_string())
    }

    /// Next sequential id with a kind prefix (e.g. sessions).
    pub fn next_id(&self, kind: &str) -> ObjectId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let id = Uuid::new_v5(&self.namespace, format!("{kind}/{n}").as_bytes());
        ObjectId::new(id.to_string())
    }
}
