//! Client session bookkeeping record.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ObjectId;

/// Body stored on a `session` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: ObjectId,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Inactivity timeout. Enforcement belongs to the session-lifecycle owner.
    pub timeout_secs: u64,
}

impl Session {
    pub fn new(id: ObjectId, now: DateTime<Utc>, timeout_secs: u64) -> Self {
        Self { id, created_at: now, last_seen: now, timeout_secs }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let timeout = Duration::seconds(self.timeout_secs.min(i64::MAX as u64) as i64);
        now - self.last_seen > timeout
    }
}
