//! Controllers: named, shared view declarations and their subscribers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ObjectId;

/// Field name → decorator expression (`@property:..` / `@function:..(..)`).
///
/// Ordered so that the canonical serialization used for controller identity
/// does not depend on insertion order.
pub type Declaration = BTreeMap<String, String>;

/// The JSON object produced by evaluating a declaration against one target.
pub type Construct = serde_json::Map<String, Value>;

/// A controller as seen by callers. The last computed snapshot is kept in
/// storage and never surfaces here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Controller {
    pub id: ObjectId,
    pub name: String,
    pub declaration: Declaration,
    pub subscribers: BTreeSet<ObjectId>,
    pub targets: BTreeSet<ObjectId>,
}

/// Outbound document delivered to a session's egress channel:
/// `{"controllers": {<name>: {<targetId>: <construct>}}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub controllers: BTreeMap<String, BTreeMap<ObjectId, Value>>,
}

impl Notification {
    pub fn single(name: &str, target: &ObjectId, construct: Value) -> Self {
        let mut per_target = BTreeMap::new();
        per_target.insert(target.clone(), construct);
        let mut controllers = BTreeMap::new();
        controllers.insert(name.to_string(), per_target);
        Self { controllers }
    }

    /// Construct carried for `(name, target)`, if any.
    pub fn construct(&self, name: &str, target: &ObjectId) -> Option<&Value> {
        self.controllers.get(name).and_then(|m| m.get(target))
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
