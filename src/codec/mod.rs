//! # Link Codec
//!
//! Maps link triples to hierarchical lookup keys and back.
//!
//! Every link `(source, type, target)` is filed twice:
//!
//! ```text
//! <source>.out.<type>.<source-target>     forward
//! <target>.in.<type>.<source>             inverse
//! ```
//!
//! Patterns replace the trailing components with `*` so the adjacency layer
//! can ask for "every edge of X" or "every edge of type T out of X".
//! Components may not be empty and may not contain the separator or the
//! wildcard token; encoding rejects them instead of producing keys whose
//! boundaries would be misread.

use crate::model::{Direction, Link, ObjectId};
use crate::{Error, Result};

/// Component separator.
pub const SEPARATOR: char = '.';
/// Wildcard token accepted in patterns.
pub const WILDCARD: &str = "*";

fn check_component(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidKey(format!("empty {what}")));
    }
    if value.contains(SEPARATOR) || value.contains(WILDCARD) {
        return Err(Error::InvalidKey(format!(
            "{what} '{value}' contains a reserved character ('{SEPARATOR}' or '{WILDCARD}')"
        )));
    }
    Ok(())
}

// ============================================================================
// LinkKey
// ============================================================================

/// One decoded index entry: the object the key is filed under, the side of
/// the link it sits on, the link type and the object at the far end.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkKey {
    pub subject: ObjectId,
    pub direction: Direction,
    pub link_type: String,
    pub other: ObjectId,
}

impl LinkKey {
    /// Key filed under the link's source.
    pub fn forward(link: &Link) -> Self {
        Self {
            subject: link.source.clone(),
            direction: Direction::Out,
            link_type: link.link_type.clone(),
            other: link.target.clone(),
        }
    }

    /// Key filed under the link's target.
    pub fn inverse(link: &Link) -> Self {
        Self {
            subject: link.target.clone(),
            direction: Direction::In,
            link_type: link.link_type.clone(),
            other: link.source.clone(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        check_component("object id", self.subject.as_str())?;
        check_component("link type", &self.link_type)?;
        check_component("object id", self.other.as_str())?;
        Ok(format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}",
            self.subject,
            self.direction.token(),
            self.link_type,
            self.other,
        ))
    }

    pub fn decode(key: &str) -> Result<Self> {
        let parts: Vec<&str> = key.split(SEPARATOR).collect();
        let [subject, direction, link_type, other] = parts.as_slice() else {
            return Err(Error::InvalidKey(format!(
                "'{key}' has {} components, expected 4",
                parts.len()
            )));
        };
        let direction = Direction::from_token(direction)
            .ok_or_else(|| Error::InvalidKey(format!("'{key}' has unknown direction '{direction}'")))?;
        for (what, value) in [("object id", *subject), ("link type", *link_type), ("object id", *other)] {
            check_component(what, value)?;
        }
        Ok(Self {
            subject: ObjectId::new(*subject),
            direction,
            link_type: link_type.to_string(),
            other: ObjectId::new(*other),
        })
    }

    /// The link this entry describes, in graph direction.
    pub fn to_link(&self) -> Link {
        match self.direction {
            Direction::Out => Link::new(self.subject.clone(), self.link_type.clone(), self.other.clone()),
            Direction::In => Link::new(self.other.clone(), self.link_type.clone(), self.subject.clone()),
        }
    }
}

// ============================================================================
// KeyPattern
// ============================================================================

/// A key with the link type and/or the far end replaced by the wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    pub subject: ObjectId,
    pub direction: Direction,
    pub link_type: Option<String>,
    pub other: Option<ObjectId>,
}

impl KeyPattern {
    /// Every edge on one side of `subject`, optionally of one type.
    pub fn edges(subject: &ObjectId, direction: Direction, link_type: Option<&str>) -> Self {
        Self {
            subject: subject.clone(),
            direction,
            link_type: link_type.map(str::to_string),
            other: None,
        }
    }

    pub fn render(&self) -> Result<String> {
        check_component("object id", self.subject.as_str())?;
        let link_type = match &self.link_type {
            Some(t) => {
                check_component("link type", t)?;
                t.as_str()
            }
            None => WILDCARD,
        };
        let other = match &self.other {
            Some(o) => {
                check_component("object id", o.as_str())?;
                o.as_str()
            }
            None => WILDCARD,
        };
        Ok(format!(
            "{}{SEPARATOR}{}{SEPARATOR}{link_type}{SEPARATOR}{other}",
            self.subject,
            self.direction.token(),
        ))
    }

    /// Longest literal prefix of the rendered pattern; every matching key
    /// starts with it. Backends use it to narrow an ordered scan.
    pub fn literal_prefix(&self) -> String {
        let mut prefix = format!("{}{SEPARATOR}{}{SEPARATOR}", self.subject, self.direction.token());
        if let Some(t) = &self.link_type {
            prefix.push_str(t);
            prefix.push(SEPARATOR);
            if let Some(o) = &self.other {
                prefix.push_str(o.as_str());
            }
        }
        prefix
    }

    pub fn matches(&self, key: &str) -> bool {
        let Ok(decoded) = LinkKey::decode(key) else {
            return false;
        };
        decoded.subject == self.subject
            && decoded.direction == self.direction
            && self.link_type.as_ref().is_none_or(|t| *t == decoded.link_type)
            && self.other.as_ref().is_none_or(|o| *o == decoded.other)
    }
}

// ============================================================================
// Tests
// ============================================================================
