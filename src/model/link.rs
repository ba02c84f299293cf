//! Typed, directed link between two objects.

use serde::{Deserialize, Serialize};
use super::ObjectId;

/// Side of a link, relative to the object a key is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Out,
    In,
}

impl Direction {
    /// Token used in encoded keys.
    pub fn token(self) -> &'static str {
        match self {
            Direction::Out => "out",
            Direction::In => "in",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "out" => Some(Direction::Out),
            "in" => Some(Direction::In),
            _ => None,
        }
    }
}

/// A directed edge `(source, type, target)`.
///
/// Links are not stored as objects; the storage backend files every link
/// under a forward and an inverse key and the adjacency layer decodes them
/// back into this triple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Link {
    pub source: ObjectId,
    pub target: ObjectId,
    #[serde(rename = "type")]
    pub link_type: String,
}

impl Link {
    pub fn new(
        source: impl Into<ObjectId>,
        link_type: impl Into<String>,
        target: impl Into<ObjectId>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            link_type: link_type.into(),
        }
    }
}
