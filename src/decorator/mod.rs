//! # Decorator Engine
//!
//! A declaration maps output fields to decorator expressions:
//!
//! ```text
//! "name": "@property:name"
//! "kids": "@function:getChildrenUUIDSByLinkType(disk)"
//! ```
//!
//! `parse` turns each expression into a `Decorator` bound to a target;
//! expressions that do not parse are dropped with a warning and the rest of
//! the declaration carries on. `DecoratorEngine::construct` evaluates every
//! parsed field and returns the assembled object.
//!
//! Evaluation never fails as a whole. A missing property or object yields
//! `null`, a function called with the wrong arguments yields the string
//! `"invalid arguments"`, and an unknown function yields `{}`.

pub mod functions;
pub mod property;

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::model::{Construct, Declaration, ObjectId};
use crate::storage::StorageBackend;
use crate::{Error, Result};

pub use functions::{Arity, FunctionRegistry, GraphContext, GraphFunction};

pub const PROPERTY_PREFIX: &str = "@property";
pub const FUNCTION_PREFIX: &str = "@function";

/// Value produced when a function's arguments are wrong.
pub const INVALID_ARGUMENTS: &str = "invalid arguments";

/// A parsed decorator bound to its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decorator {
    Property { target: ObjectId, path: String },
    Function { target: ObjectId, name: String, args: Vec<String> },
}

impl Decorator {
    /// Parse one expression.
    pub fn parse(target: &ObjectId, expr: &str) -> Result<Self> {
        let Some((prefix, rest)) = expr.split_once(':') else {
            return Err(Error::Parse(format!("'{expr}' has no decorator prefix")));
        };
        match prefix.trim() {
            PROPERTY_PREFIX => Ok(Decorator::Property {
                target: target.clone(),
                path: rest.trim().to_string(),
            }),
            FUNCTION_PREFIX => {
                let (name, args) = parse_call(rest)?;
                Ok(Decorator::Function { target: target.clone(), name, args })
            }
            other => Err(Error::Parse(format!("unknown decorator '{other}'"))),
        }
    }
}

/// `name(a, b, ..)` → `("name", ["a", "b", ..])`.
fn parse_call(call: &str) -> Result<(String, Vec<String>)> {
    let call = call.trim();
    let (Some(open), Some(inner)) = (call.find('('), call.strip_suffix(')')) else {
        return Err(Error::Parse(format!("'{call}' is not of the form name(args)")));
    };
    let name = call[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Parse(format!("'{call}' has an invalid function name")));
    }
    let inner = &inner[open + 1..];
    if inner.contains(['(', ')']) {
        return Err(Error::Parse(format!("'{call}' has unbalanced parentheses")));
    }
    let args = if inner.trim().is_empty() {
        Vec::new()
    } else {
        inner.split(',').map(|a| a.trim().to_string()).collect()
    };
    Ok((name.to_string(), args))
}

/// Parse a whole declaration against one target. Fields that fail to parse
/// are logged and left out.
pub fn parse(target: &ObjectId, declaration: &Declaration) -> BTreeMap<String, Decorator> {
    let mut parsed = BTreeMap::new();
    for (field, expr) in declaration {
        match Decorator::parse(target, expr) {
            Ok(decorator) => {
                parsed.insert(field.clone(), decorator);
            }
            Err(e) => warn!(%target, %field, error = %e, "dropping decorator"),
        }
    }
    parsed
}

// ============================================================================
// Engine
// ============================================================================

/// Evaluates decorators against live graph state. Read-only.
pub struct DecoratorEngine<B: StorageBackend> {
    context: GraphContext<B>,
    registry: FunctionRegistry<B>,
}

impl<B: StorageBackend> DecoratorEngine<B> {
    pub fn new(context: GraphContext<B>, registry: FunctionRegistry<B>) -> Self {
        Self { context, registry }
    }

    pub fn context(&self) -> &GraphContext<B> {
        &self.context
    }

    pub fn registry_mut(&mut self) -> &mut FunctionRegistry<B> {
        &mut self.registry
    }

    pub async fn evaluate(&self, decorator: &Decorator) -> Value {
        match decorator {
            Decorator::Property { target, path } => {
                match self.context.adjacency.backend().get_body(target).await {
                    Ok(Some(body)) => property::lookup(&body, path),
                    Ok(None) => {
                        debug!(%target, %path, "property lookup on missing object");
                        Value::Null
                    }
                    Err(e) => {
                        warn!(%target, %path, error = %e, "property lookup failed");
                        Value::Null
                    }
                }
            }
            Decorator::Function { target, name, args } => {
                let Some(function) = self.registry.get(name) else {
                    warn!(%target, function = %name, "unknown decorator function");
                    return Value::Object(Map::new());
                };
                if !function.arity().accepts(args.len()) {
                    debug!(%target, function = %name, given = args.len(), "wrong argument count");
                    return Value::String(INVALID_ARGUMENTS.into());
                }
                match function.evaluate(&self.context, target, args).await {
                    Ok(value) => value,
                    Err(Error::InvalidArguments(msg)) => {
                        debug!(%target, function = %name, %msg, "invalid arguments");
                        Value::String(INVALID_ARGUMENTS.into())
                    }
                    Err(e) => {
                        warn!(%target, function = %name, error = %e, "decorator function failed");
                        Value::Null
                    }
                }
            }
        }
    }

    /// Evaluate every parsed field of `declaration` against `target`.
    pub async fn construct(&self, target: &ObjectId, declaration: &Declaration) -> Construct {
        let mut construct = Map::new();
        for (field, decorator) in parse(target, declaration) {
            let value = self.evaluate(&decorator).await;
            construct.insert(field, value);
        }
        construct
    }
}

// ============================================================================
// Tests
// ============================================================================
