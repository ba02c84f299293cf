//! Session bootstrap bookkeeping.
//!
//! Sessions are ordinary objects of type `session` hanging off a root
//! `sessions` object through `__session` links. The body is a `Session`
//! record. Expiry is reported here; acting on it is the caller's business
//! (see `ViewEngine::close_session`).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info};

use crate::adjacency::Adjacency;
use crate::ids::IdGenerator;
use crate::model::{ObjectId, SESSION_LINK, SESSION_OBJECT, Session};
use crate::storage::{StorageBackend, require_node};
use crate::tx::Transaction;
use crate::{Error, Result};

/// Root object every session hangs off.
pub const SESSIONS_ROOT: &str = "sessions";

pub struct SessionManager<B: StorageBackend> {
    adjacency: Adjacency<B>,
    ids: Arc<IdGenerator>,
    timeout_secs: u64,
}

impl<B: StorageBackend> SessionManager<B> {
    pub fn new(adjacency: Adjacency<B>, ids: Arc<IdGenerator>, timeout_secs: u64) -> Self {
        Self { adjacency, ids, timeout_secs }
    }

    fn root() -> ObjectId {
        ObjectId::new(SESSIONS_ROOT)
    }

    /// Create a session object and register it under the root.
    pub async fn open(&self, now: DateTime<Utc>) -> Result<Session> {
        let id = self.ids.next_id(SESSION_OBJECT);
        let session = Session::new(id.clone(), now, self.timeout_secs);
        let tx = Transaction::new()
            .create_object(Self::root(), SESSIONS_ROOT, json!({"name": SESSIONS_ROOT}))
            .create_object(id.clone(), SESSION_OBJECT, serde_json::to_value(&session)?)
            .link(Self::root(), SESSION_LINK, id.clone());
        let summary = self.adjacency.backend().commit(tx).await?;
        if summary.conflicts > 1 {
            return Err(Error::InvalidRequest(format!("session id {id} already in use")));
        }
        info!(session = %id, "session opened");
        Ok(session)
    }

    pub async fn get(&self, id: &ObjectId) -> Result<Option<Session>> {
        match self.adjacency.backend().get_node(id).await? {
            Some(node) if node.object_type == SESSION_OBJECT => Ok(Some(serde_json::from_value(node.body)?)),
            Some(node) => Err(Error::InvalidRequest(format!("{id} is a '{}', not a session", node.object_type))),
            None => Ok(None),
        }
    }

    /// Record activity on a session.
    pub async fn touch(&self, id: &ObjectId, now: DateTime<Utc>) -> Result<Session> {
        let node = require_node(self.adjacency.backend(), id).await?;
        let mut session: Session = serde_json::from_value(node.body)?;
        session.touch(now);
        self.adjacency.backend().set_body(id, serde_json::to_value(&session)?).await?;
        debug!(session = %id, "session touched");
        Ok(session)
    }

    /// Every registered session.
    pub async fn list(&self) -> Result<Vec<ObjectId>> {
        self.adjacency.children_by_link_type(&Self::root(), Some(SESSION_LINK)).await
    }

    /// Sessions idle past their timeout at `now`.
    pub async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<ObjectId>> {
        let mut expired = Vec::new();
        for id in self.list().await? {
            if let Some(session) = self.get(&id).await?
                && session.is_expired(now)
            {
                expired.push(id);
            }
        }
        Ok(expired)
    }

    /// Remove the session object and its registration. Subscriptions are
    /// not touched; see `ViewEngine::close_session`.
    pub(crate) async fn remove(&self, id: &ObjectId) -> Result<bool> {
        let backend = self.adjacency.backend();
        if !backend.exists(id).await? {
            return Ok(false);
        }
        let tx = Transaction::new()
            .unlink(Self::root(), SESSION_LINK, id.clone())
            .delete_object(id.clone());
        backend.commit(tx).await?;
        Ok(true)
    }
}
