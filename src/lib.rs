//! # graph-views: Declarative Graph Views with Change Propagation
//!
//! Live, declaratively defined views ("controllers") over nodes of a shared
//! property graph, kept in sync with every subscribed session as the graph
//! changes.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `StorageBackend` and `Notifier` are the contracts to the outside world
//! 2. **Clean DTOs**: `ObjectId`, `Node`, `Link`, `Notification` cross all boundaries
//! 3. **Reads are pure**: adjacency, navigation and decorators never write
//! 4. **One writer per controller**: setup, recompute and unsubscribe serialize on a keyed lock
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use graph_views::{StorageBackend, Transaction, ViewEngine};
//! use serde_json::json;
//!
//! # async fn example() -> graph_views::Result<()> {
//! let engine = ViewEngine::open_memory();
//! engine
//!     .backend()
//!     .commit(
//!         Transaction::new()
//!             .create_object("rack1", "rack", json!({"name": "rack1"}))
//!             .create_object("d1", "disk", json!({}))
//!             .link("rack1", "disk", "d1"),
//!     )
//!     .await?;
//!
//! let session = engine.sessions().open(chrono::Utc::now()).await?;
//! let mut updates = engine.notifier().attach(&session.id);
//!
//! let reply = engine
//!     .propagator()
//!     .handle_setup(json!({
//!         "session": session.id,
//!         "name": "rack",
//!         "target": "rack1",
//!         "declaration": {"name": "@property:name", "kids": "@function:getChildrenUUIDSByLinkType(disk)"},
//!     }))
//!     .await;
//! assert!(reply.is_ok());
//!
//! let first = updates.recv().await;
//! println!("{:?}", first.map(|n| n.to_json()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//!
//! | Layer | Module | Description |
//! |-------|--------|-------------|
//! | Link codec | `codec` | `<src>.out.<type>.<dst>` / `<dst>.in.<type>.<src>` keys and patterns |
//! | Adjacency | `adjacency` | children, parents, link types, typed links |
//! | Navigation | `navigation` | bounded object BFS, type-graph walks |
//! | Decorators | `decorator` | `@property:` / `@function:` evaluation |
//! | Propagation | `controller` | setup, recompute, unsubscribe |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod codec;
pub mod storage;
pub mod tx;
pub mod adjacency;
pub mod navigation;
pub mod decorator;
pub mod controller;
pub mod notify;
pub mod session;
pub mod ids;
pub mod config;

use std::sync::Arc;

use tracing::{info, warn};

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Node, ObjectId, Link, Direction,
    Controller, Construct, Declaration, Notification, Session,
};

// ============================================================================
// Re-exports: Storage & Transactions
// ============================================================================

pub use storage::{StorageBackend, MemoryBackend};
pub use tx::{Transaction, TxOp, TxId, TxSummary};

// ============================================================================
// Re-exports: Engine
// ============================================================================

pub use adjacency::{Adjacency, LinkTypes};
pub use navigation::{Navigator, ObjectGraph, TypeGraph};
pub use decorator::{Decorator, DecoratorEngine, FunctionRegistry, GraphContext, GraphFunction};
pub use controller::{Propagator, Reply, SetupRequest, SetupOutcome, RecomputeOutcome, UnsubscribeOutcome};
pub use notify::{Notifier, ChannelNotifier};
pub use session::SessionManager;
pub use ids::IdGenerator;
pub use config::EngineConfig;

// ============================================================================
// Top-level ViewEngine handle
// ============================================================================

/// The primary entry point. Wires one storage backend and one notifier into
/// the read layers, the propagation protocol and session bookkeeping.
pub struct ViewEngine<B: StorageBackend, N: Notifier = ChannelNotifier> {
    adjacency: Adjacency<B>,
    decorators: Arc<DecoratorEngine<B>>,
    propagator: Propagator<B, N>,
    sessions: SessionManager<B>,
    notifier: Arc<N>,
    config: EngineConfig,
}

impl<B: StorageBackend, N: Notifier> ViewEngine<B, N> {
    /// Build an engine with the built-in decorator functions.
    pub fn with_backend(backend: B, notifier: N, config: EngineConfig) -> Self {
        Self::with_functions(backend, notifier, config, FunctionRegistry::builtin())
    }

    /// Build an engine with a caller-supplied function registry.
    pub fn with_functions(backend: B, notifier: N, config: EngineConfig, functions: FunctionRegistry<B>) -> Self {
        let adjacency = Adjacency::new(Arc::new(backend));
        let ids = Arc::new(match config.id_namespace {
            Some(namespace) => IdGenerator::new(namespace),
            None => IdGenerator::default(),
        });
        let navigator = Navigator::new(adjacency.clone(), config.clone());
        let decorators = Arc::new(DecoratorEngine::new(
            GraphContext { adjacency: adjacency.clone(), navigator },
            functions,
        ));
        let notifier = Arc::new(notifier);
        let propagator = Propagator::new(
            adjacency.clone(),
            decorators.clone(),
            notifier.clone(),
            ids.clone(),
            controller::ControllerLocks::new(config.lock_timeout()),
        );
        let sessions = SessionManager::new(adjacency.clone(), ids, config.session_timeout_secs);
        Self { adjacency, decorators, propagator, sessions, notifier, config }
    }

    /// Access the underlying backend (for writes and advanced use).
    pub fn backend(&self) -> &B {
        self.adjacency.backend()
    }

    pub fn adjacency(&self) -> &Adjacency<B> {
        &self.adjacency
    }

    pub fn navigator(&self) -> &Navigator<B> {
        &self.decorators.context().navigator
    }

    pub fn decorators(&self) -> &DecoratorEngine<B> {
        &self.decorators
    }

    pub fn propagator(&self) -> &Propagator<B, N> {
        &self.propagator
    }

    pub fn sessions(&self) -> &SessionManager<B> {
        &self.sessions
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Unsubscribe a session from every controller it follows, then remove
    /// it. Controllers left without subscribers are deleted on the way.
    /// Returns the number of subscriptions dropped.
    pub async fn close_session(&self, session: &ObjectId) -> Result<usize> {
        let mut dropped = 0;
        for controller in self.propagator.subscriptions(session).await? {
            match self.propagator.unsubscribe(&controller, session).await {
                Ok(outcome) if outcome.removed => dropped += 1,
                Ok(_) => {}
                Err(e) => warn!(%session, %controller, error = %e, "unsubscribe on close failed"),
            }
        }
        self.sessions.remove(session).await?;
        info!(%session, dropped, "session closed");
        Ok(dropped)
    }

    /// Shut down the backend.
    pub async fn shutdown(&self) -> Result<()> {
        self.backend().shutdown().await
    }
}

/// In-memory engine for testing and embedding.
impl ViewEngine<MemoryBackend, ChannelNotifier> {
    pub fn open_memory() -> Self {
        Self::with_backend(MemoryBackend::new(), ChannelNotifier::new(), EngineConfig::default())
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
