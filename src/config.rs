//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Depth used when a navigation radius is negative.
pub const DEFAULT_MAX_RADIUS: usize = 10;

/// Tunables for the view engine. Every field has a default, so a config can
/// be deserialized from a partial document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Depth used for negative navigation radii.
    pub max_radius: usize,
    /// Give up on a controller lock after this long. `None` waits forever.
    pub lock_timeout_ms: Option<u64>,
    /// Inactivity timeout stamped on new sessions.
    pub session_timeout_secs: u64,
    /// Namespace for name-based identifiers. `None` uses the built-in one.
    pub id_namespace: Option<Uuid>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_radius: DEFAULT_MAX_RADIUS,
            lock_timeout_ms: None,
            session_timeout_secs: 3600,
            id_namespace: None,
        }
    }
}

impl EngineConfig {
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }

    /// Resolve a requested radius: negative means `max_radius`, anything
    /// else is taken as given.
    pub fn resolve_radius(&self, radius: i64) -> usize {
        usize::try_from(radius).unwrap_or(self.max_radius)
    }
}
