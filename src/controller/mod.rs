//! # Controller Propagation Protocol
//!
//! Owns controller lifecycle and turns graph changes into notifications:
//!
//! ```text
//! setup ──► lock ──► create or subscribe ──► compute / replay ──► unlock
//! change ─► lock ──► construct ──► equal to snapshot? ──► yes: unlock
//!                                         └─► no: persist, fan out, unlock
//! unsubscribe ─► lock ──► drop subscriber ──► none left? delete ──► unlock
//! ```
//!
//! The per-controller lock is the only thing keeping two operations on the
//! same controller from interleaving their read-compare-write of the
//! snapshot and subscriber set. Different controllers never contend.
//!
//! Storage layout: a controller is an object of type `controller` whose body
//! is a `ControllerRecord`. Subscribers are `controller -__subscriber->
//! session` links; each target watches the controller through a
//! `target -__trigger-> controller` link.

pub mod handlers;
pub mod locks;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::adjacency::Adjacency;
use crate::decorator::DecoratorEngine;
use crate::ids::IdGenerator;
use crate::model::{
    CONTROLLER_OBJECT, Controller, Declaration, Link, Notification, ObjectId, SUBSCRIBER_LINK, TRIGGER_LINK,
};
use crate::notify::Notifier;
use crate::storage::StorageBackend;
use crate::tx::Transaction;
use crate::{Error, Result};

pub use handlers::Reply;
pub use locks::{ControllerGuard, ControllerLocks};

/// Persisted body of a controller object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ControllerRecord {
    name: String,
    declaration: Declaration,
    targets: BTreeSet<ObjectId>,
    /// Last construct computed per target; change detection only.
    #[serde(default)]
    snapshot: BTreeMap<ObjectId, Value>,
}

/// A session asking for a view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupRequest {
    pub session: ObjectId,
    pub name: String,
    pub target: ObjectId,
    pub declaration: Declaration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    /// New controller; its first construct went to the requester.
    Created,
    /// Existing controller; `subscribed` is false if the session already was.
    Joined { subscribed: bool, replayed: bool },
}

/// What one recomputation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecomputeOutcome {
    /// Targets whose construct differed from the snapshot (or, when forced,
    /// every target).
    pub changed_targets: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl RecomputeOutcome {
    /// Nothing changed, nothing sent.
    pub fn is_suppressed(&self) -> bool {
        self.changed_targets == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubscribeOutcome {
    pub removed: bool,
    /// The last subscriber left and the controller was deleted.
    pub deleted: bool,
}

// ============================================================================
// Propagator
// ============================================================================

pub struct Propagator<B: StorageBackend, N: Notifier> {
    adjacency: Adjacency<B>,
    engine: Arc<DecoratorEngine<B>>,
    notifier: Arc<N>,
    ids: Arc<IdGenerator>,
    locks: ControllerLocks,
}

impl<B: StorageBackend, N: Notifier> Propagator<B, N> {
    pub fn new(
        adjacency: Adjacency<B>,
        engine: Arc<DecoratorEngine<B>>,
        notifier: Arc<N>,
        ids: Arc<IdGenerator>,
        locks: ControllerLocks,
    ) -> Self {
        Self { adjacency, engine, notifier, ids, locks }
    }

    fn backend(&self) -> &B {
        self.adjacency.backend()
    }

    pub fn locks(&self) -> &ControllerLocks {
        &self.locks
    }

    /// Identity shared by every request for `(name, declaration, target)`.
    pub fn controller_id(&self, name: &str, declaration: &Declaration, target: &ObjectId) -> ObjectId {
        self.ids.controller_id(name, declaration, target)
    }

    async fn load(&self, id: &ObjectId) -> Result<Option<ControllerRecord>> {
        let Some(node) = self.backend().get_node(id).await? else {
            return Ok(None);
        };
        if node.object_type != CONTROLLER_OBJECT {
            return Err(Error::InvalidRequest(format!("{id} is a '{}', not a controller", node.object_type)));
        }
        Ok(Some(serde_json::from_value(node.body)?))
    }

    async fn store(&self, id: &ObjectId, record: &ControllerRecord) -> Result<()> {
        self.backend().set_body(id, serde_json::to_value(record)?).await
    }

    async fn subscribers(&self, id: &ObjectId) -> Result<Vec<ObjectId>> {
        self.adjacency.children_by_link_type(id, Some(SUBSCRIBER_LINK)).await
    }

    /// Public view of a controller, without its snapshot.
    pub async fn controller(&self, id: &ObjectId) -> Result<Option<Controller>> {
        let Some(record) = self.load(id).await? else {
            return Ok(None);
        };
        Ok(Some(Controller {
            id: id.clone(),
            name: record.name,
            declaration: record.declaration,
            subscribers: self.subscribers(id).await?.into_iter().collect(),
            targets: record.targets,
        }))
    }

    /// Controllers the session is subscribed to.
    pub async fn subscriptions(&self, session: &ObjectId) -> Result<Vec<ObjectId>> {
        self.adjacency.parents_by_link_type(session, SUBSCRIBER_LINK).await
    }

    // ========================================================================
    // Setup
    // ========================================================================

    /// Create the controller or join it.
    ///
    /// A new controller is computed immediately and its construct goes to the
    /// requester. Joining an existing one never forces a recomputation; the
    /// stored constructs are replayed once, to a newly added subscriber only.
    /// A repeated setup from an already subscribed session sends nothing.
    /// The stored declaration always wins over the requested one.
    #[instrument(skip_all, fields(controller = %id, session = %request.session))]
    pub async fn setup(&self, id: &ObjectId, request: SetupRequest) -> Result<SetupOutcome> {
        let _guard = self.locks.acquire(id).await?;

        let Some(mut record) = self.load(id).await? else {
            let record = ControllerRecord {
                name: request.name,
                declaration: request.declaration,
                targets: BTreeSet::from([request.target.clone()]),
                snapshot: BTreeMap::new(),
            };
            let tx = Transaction::new()
                .create_object(id.clone(), CONTROLLER_OBJECT, serde_json::to_value(&record)?)
                .link(request.target.clone(), TRIGGER_LINK, id.clone())
                .link(id.clone(), SUBSCRIBER_LINK, request.session.clone());
            self.backend().commit(tx).await?;
            info!(name = %record.name, target = %request.target, "controller created");

            self.recompute_locked(id, record, None).await?;
            return Ok(SetupOutcome::Created);
        };

        if record.declaration != request.declaration {
            warn!(name = %record.name, "setup with a different declaration, keeping the stored one");
        }

        let subscribed = self
            .backend()
            .create_link(&Link::new(id.clone(), SUBSCRIBER_LINK, request.session.clone()))
            .await?;

        if !record.targets.contains(&request.target) {
            // A caller-chosen id can widen an existing controller to another
            // target; the new target's construct reaches every subscriber.
            record.targets.insert(request.target.clone());
            self.backend()
                .create_link(&Link::new(request.target.clone(), TRIGGER_LINK, id.clone()))
                .await?;
            self.store(id, &record).await?;
            record = self.recompute_locked(id, record, None).await?.0;
        }

        let replayed = subscribed && self.replay(&record, &request.session).await;
        debug!(subscribed, replayed, "joined existing controller");
        Ok(SetupOutcome::Joined { subscribed, replayed })
    }

    /// Send the stored constructs to one session. True if anything was sent.
    async fn replay(&self, record: &ControllerRecord, session: &ObjectId) -> bool {
        if record.snapshot.is_empty() {
            return false;
        }
        let mut notification = Notification::default();
        notification.controllers.insert(record.name.clone(), record.snapshot.clone());
        match self.notifier.deliver(session, &notification).await {
            Ok(()) => true,
            Err(e) => {
                warn!(%session, error = %e, "replay failed");
                false
            }
        }
    }

    // ========================================================================
    // Recompute
    // ========================================================================

    /// Rebuild the constructs of a controller and notify its subscribers of
    /// the targets that changed.
    ///
    /// With `force_session`, every target's fresh construct goes to that
    /// session alone and the snapshot is left as it was, so the other
    /// subscribers are unaffected.
    #[instrument(skip_all, fields(controller = %id))]
    pub async fn recompute(&self, id: &ObjectId, force_session: Option<&ObjectId>) -> Result<RecomputeOutcome> {
        let _guard = self.locks.acquire(id).await?;
        let record = self
            .load(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Controller {id}")))?;
        Ok(self.recompute_locked(id, record, force_session).await?.1)
    }

    /// Caller holds the controller lock.
    async fn recompute_locked(
        &self,
        id: &ObjectId,
        mut record: ControllerRecord,
        force_session: Option<&ObjectId>,
    ) -> Result<(ControllerRecord, RecomputeOutcome)> {
        let mut changed = BTreeMap::new();
        for target in &record.targets {
            let construct = Value::Object(self.engine.construct(target, &record.declaration).await);
            if force_session.is_none() && record.snapshot.get(target) == Some(&construct) {
                continue;
            }
            changed.insert(target.clone(), construct);
        }

        let mut outcome = RecomputeOutcome { changed_targets: changed.len(), ..Default::default() };
        if changed.is_empty() {
            debug!("construct unchanged, suppressed");
            return Ok((record, outcome));
        }

        let mut notification = Notification::default();
        notification.controllers.insert(record.name.clone(), changed.clone());

        let recipients = match force_session {
            Some(session) => vec![session.clone()],
            None => {
                record.snapshot.extend(changed);
                self.store(id, &record).await?;
                self.subscribers(id).await?
            }
        };

        for session in &recipients {
            match self.notifier.deliver(session, &notification).await {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    outcome.failed += 1;
                    warn!(%session, error = %e, "fan-out delivery failed");
                }
            }
        }
        info!(
            changed = outcome.changed_targets,
            delivered = outcome.delivered,
            failed = outcome.failed,
            forced = force_session.is_some(),
            "construct propagated",
        );
        Ok((record, outcome))
    }

    /// Recompute every controller watching `object`. Per-controller failures
    /// are logged and do not stop the others.
    #[instrument(skip(self))]
    pub async fn object_changed(&self, object: &ObjectId) -> Result<Vec<(ObjectId, RecomputeOutcome)>> {
        let watchers = self.adjacency.children_by_link_type(object, Some(TRIGGER_LINK)).await?;
        let mut outcomes = Vec::with_capacity(watchers.len());
        for controller in watchers {
            match self.recompute(&controller, None).await {
                Ok(outcome) => outcomes.push((controller, outcome)),
                Err(e) => warn!(%controller, error = %e, "recompute after change failed"),
            }
        }
        Ok(outcomes)
    }

    // ========================================================================
    // Unsubscribe
    // ========================================================================

    /// Drop one subscriber; delete the controller when none are left.
    #[instrument(skip_all, fields(controller = %id, %session))]
    pub async fn unsubscribe(&self, id: &ObjectId, session: &ObjectId) -> Result<UnsubscribeOutcome> {
        let _guard = self.locks.acquire(id).await?;
        if self.load(id).await?.is_none() {
            return Err(Error::NotFound(format!("Controller {id}")));
        }

        let removed = self
            .backend()
            .delete_link(&Link::new(id.clone(), SUBSCRIBER_LINK, session.clone()))
            .await?;
        let deleted = if self.subscribers(id).await?.is_empty() {
            self.backend().delete_object(id).await?;
            info!("last subscriber left, controller deleted");
            true
        } else {
            false
        };
        Ok(UnsubscribeOutcome { removed, deleted })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::config::EngineConfig;
    use crate::decorator::{FunctionRegistry, GraphContext};
    use crate::navigation::Navigator;
    use crate::notify::ChannelNotifier;
    use crate::storage::MemoryBackend;

    struct Fixture {
        db: MemoryBackend,
        notifier: Arc<ChannelNotifier>,
        propagator: Propagator<MemoryBackend, ChannelNotifier>,
    }

    async fn fixture() -> Fixture {
        let db = MemoryBackend::new();
        let tx = Transaction::new()
            .create_object("rack1", "rack", json!({"name": "rack1"}))
            .create_object("d1", "disk", json!({}))
            .create_object("s1", "session", json!({}))
            .create_object("s2", "session", json!({}))
            .link("rack1", "disk", "d1");
        db.commit(tx).await.unwrap();

        let adjacency = Adjacency::new(Arc::new(db.clone()));
        let navigator = Navigator::new(adjacency.clone(), EngineConfig::default());
        let engine = Arc::new(DecoratorEngine::new(
            GraphContext { adjacency: adjacency.clone(), navigator },
            FunctionRegistry::builtin(),
        ));
        let notifier = Arc::new(ChannelNotifier::new());
        let propagator = Propagator::new(
            adjacency,
            engine,
            notifier.clone(),
            Arc::new(IdGenerator::default()),
            ControllerLocks::new(None),
        );
        Fixture { db, notifier, propagator }
    }

    fn request(session: &str) -> SetupRequest {
        SetupRequest {
            session: ObjectId::new(session),
            name: "rack".into(),
            target: ObjectId::new("rack1"),
            declaration: [
                ("name".to_string(), "@property:name".to_string()),
                ("kids".to_string(), "@function:getChildrenUUIDSByLinkType(disk)".to_string()),
            ]
            .into_iter()
            .collect(),
        }
    }

    fn drain(rx: &mut UnboundedReceiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    #[tokio::test]
    async fn test_setup_creates_and_notifies() {
        let f = fixture().await;
        let mut rx = f.notifier.attach(&ObjectId::new("s1"));
        let req = request("s1");
        let id = f.propagator.controller_id(&req.name, &req.declaration, &req.target);

        assert_eq!(f.propagator.setup(&id, req).await.unwrap(), SetupOutcome::Created);
        let got = drain(&mut rx);
        assert_eq!(got.len(), 1);
        assert_eq!(
            got[0].construct("rack", &ObjectId::new("rack1")),
            Some(&json!({"name": "rack1", "kids": ["d1"]}))
        );
    }

    #[tokio::test]
    async fn test_second_session_joins_and_gets_replay() {
        let f = fixture().await;
        let mut rx1 = f.notifier.attach(&ObjectId::new("s1"));
        let mut rx2 = f.notifier.attach(&ObjectId::new("s2"));
        let id = {
            let r = request("s1");
            f.propagator.controller_id(&r.name, &r.declaration, &r.target)
        };

        f.propagator.setup(&id, request("s1")).await.unwrap();
        let joined = f.propagator.setup(&id, request("s2")).await.unwrap();
        assert_eq!(joined, SetupOutcome::Joined { subscribed: true, replayed: true });

        assert_eq!(drain(&mut rx1).len(), 1);
        assert_eq!(drain(&mut rx2).len(), 1);

        let controller = f.propagator.controller(&id).await.unwrap().unwrap();
        assert_eq!(controller.subscribers.len(), 2);

        let again = f.propagator.setup(&id, request("s2")).await.unwrap();
        assert_eq!(again, SetupOutcome::Joined { subscribed: false, replayed: false });
        assert!(drain(&mut rx2).is_empty());
    }

    #[tokio::test]
    async fn test_recompute_suppresses_then_propagates_change() {
        let f = fixture().await;
        let mut rx = f.notifier.attach(&ObjectId::new("s1"));
        let req = request("s1");
        let id = f.propagator.controller_id(&req.name, &req.declaration, &req.target);
        f.propagator.setup(&id, req).await.unwrap();
        drain(&mut rx);

        let quiet = f.propagator.recompute(&id, None).await.unwrap();
        assert!(quiet.is_suppressed());
        assert!(drain(&mut rx).is_empty());

        f.db.set_body(&ObjectId::new("rack1"), json!({"name": "rack-one"})).await.unwrap();
        let loud = f.propagator.recompute(&id, None).await.unwrap();
        assert_eq!(loud, RecomputeOutcome { changed_targets: 1, delivered: 1, failed: 0 });
        let got = drain(&mut rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].construct("rack", &ObjectId::new("rack1")).unwrap()["name"], "rack-one");
    }

    #[tokio::test]
    async fn test_forced_recompute_reaches_one_session_and_keeps_snapshot() {
        let f = fixture().await;
        let mut rx1 = f.notifier.attach(&ObjectId::new("s1"));
        let mut rx2 = f.notifier.attach(&ObjectId::new("s2"));
        let id = {
            let r = request("s1");
            f.propagator.controller_id(&r.name, &r.declaration, &r.target)
        };
        f.propagator.setup(&id, request("s1")).await.unwrap();
        f.propagator.setup(&id, request("s2")).await.unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        f.db.set_body(&ObjectId::new("rack1"), json!({"name": "changed"})).await.unwrap();
        let forced = f.propagator.recompute(&id, Some(&ObjectId::new("s2"))).await.unwrap();
        assert_eq!(forced.delivered, 1);
        assert!(drain(&mut rx1).is_empty());
        assert_eq!(drain(&mut rx2).len(), 1);

        // Snapshot untouched: a regular recompute still sees the change.
        let regular = f.propagator.recompute(&id, None).await.unwrap();
        assert_eq!(regular.delivered, 2);
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_block_others() {
        let f = fixture().await;
        let mut rx1 = f.notifier.attach(&ObjectId::new("s1"));
        let id = {
            let r = request("s1");
            f.propagator.controller_id(&r.name, &r.declaration, &r.target)
        };
        f.propagator.setup(&id, request("s1")).await.unwrap();
        // s2 has no egress channel
        f.propagator.setup(&id, request("s2")).await.unwrap();
        drain(&mut rx1);

        f.db.set_body(&ObjectId::new("rack1"), json!({"name": "x"})).await.unwrap();
        let outcome = f.propagator.recompute(&id, None).await.unwrap();
        assert_eq!(outcome, RecomputeOutcome { changed_targets: 1, delivered: 1, failed: 1 });
        assert_eq!(drain(&mut rx1).len(), 1);

        // The snapshot was still advanced.
        assert!(f.propagator.recompute(&id, None).await.unwrap().is_suppressed());
    }

    #[tokio::test]
    async fn test_object_changed_follows_trigger_links() {
        let f = fixture().await;
        let mut rx = f.notifier.attach(&ObjectId::new("s1"));
        let req = request("s1");
        let id = f.propagator.controller_id(&req.name, &req.declaration, &req.target);
        f.propagator.setup(&id, req).await.unwrap();
        drain(&mut rx);

        f.db.create_object(&ObjectId::new("d2"), "disk", json!({})).await.unwrap();
        f.db.create_link(&Link::new("rack1", "disk", "d2")).await.unwrap();
        let outcomes = f.propagator.object_changed(&ObjectId::new("rack1")).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        let got = drain(&mut rx);
        assert_eq!(got[0].construct("rack", &ObjectId::new("rack1")).unwrap()["kids"], json!(["d1", "d2"]));

        assert!(f.propagator.object_changed(&ObjectId::new("d1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_to_zero_deletes_controller() {
        let f = fixture().await;
        let id = {
            let r = request("s1");
            f.propagator.controller_id(&r.name, &r.declaration, &r.target)
        };
        f.propagator.setup(&id, request("s1")).await.unwrap();
        f.propagator.setup(&id, request("s2")).await.unwrap();

        let first = f.propagator.unsubscribe(&id, &ObjectId::new("s1")).await.unwrap();
        assert_eq!(first, UnsubscribeOutcome { removed: true, deleted: false });
        assert_eq!(f.propagator.subscriptions(&ObjectId::new("s1")).await.unwrap(), Vec::<ObjectId>::new());

        let last = f.propagator.unsubscribe(&id, &ObjectId::new("s2")).await.unwrap();
        assert_eq!(last, UnsubscribeOutcome { removed: true, deleted: true });
        assert!(f.propagator.controller(&id).await.unwrap().is_none());
        // trigger link went with it
        assert!(f.propagator.object_changed(&ObjectId::new("rack1")).await.unwrap().is_empty());
        assert!(matches!(
            f.propagator.unsubscribe(&id, &ObjectId::new("s2")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_setup_for_unknown_session_fails_without_side_effects() {
        let f = fixture().await;
        let req = request("ghost");
        let id = f.propagator.controller_id(&req.name, &req.declaration, &req.target);
        assert!(f.propagator.setup(&id, req).await.is_err());
        assert!(f.propagator.controller(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_first_declaration_wins() {
        let f = fixture().await;
        let id = ObjectId::new("fixed");
        f.propagator.setup(&id, request("s1")).await.unwrap();

        let mut other = request("s2");
        other.declaration = [("only".to_string(), "@property:name".to_string())].into_iter().collect();
        f.propagator.setup(&id, other).await.unwrap();

        let controller = f.propagator.controller(&id).await.unwrap().unwrap();
        assert_eq!(controller.declaration.len(), 2);
    }
}
