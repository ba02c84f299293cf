//! # Graph View Model
//!
//! DTOs shared by every layer: storage ↔ adjacency ↔ decorators ↔
//! propagation ↔ notifier.
//!
//! Design rule: this module is pure data. No I/O, no state, no async.

pub mod node;
pub mod link;
pub mod controller;
pub mod session;

pub use node::{Node, ObjectId};
pub use link::{Link, Direction};
pub use controller::{Controller, Construct, Declaration, Notification};
pub use session::Session;

/// Link types used internally by the schema and the propagation protocol.
///
/// They are never reported by link-type enumeration and are skipped when
/// children are listed without a type filter.
pub const RESERVED_LINK_TYPES: &[&str] = &[
    TYPE_LINK,
    INSTANCE_LINK,
    TRIGGER_LINK,
    SUBSCRIBER_LINK,
    SESSION_LINK,
];

/// `parent type -__type-> child type`
pub const TYPE_LINK: &str = "__type";
/// `type -__instance-> object`
pub const INSTANCE_LINK: &str = "__instance";
/// `watched object -__trigger-> controller`
pub const TRIGGER_LINK: &str = "__trigger";
/// `controller -__subscriber-> session`
pub const SUBSCRIBER_LINK: &str = "__subscriber";
/// `sessions root -__session-> session`
pub const SESSION_LINK: &str = "__session";

/// Object type of schema type nodes.
pub const TYPE_OBJECT: &str = "type";
/// Object type of controller nodes.
pub const CONTROLLER_OBJECT: &str = "controller";
/// Object type of session nodes.
pub const SESSION_OBJECT: &str = "session";

pub fn is_reserved_link_type(link_type: &str) -> bool {
    RESERVED_LINK_TYPES.contains(&link_type)
}
