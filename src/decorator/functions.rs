//! Built-in `@function:` decorators.
//!
//! Each built-in is a `GraphFunction`: it declares its name and arity and
//! evaluates against a target using the read-only `GraphContext`. The
//! `FunctionRegistry` dispatches by name; adding a function means
//! registering one more implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::adjacency::Adjacency;
use crate::model::{ObjectId, TYPE_OBJECT};
use crate::navigation::Navigator;
use crate::storage::{StorageBackend, require_node};
use crate::{Error, Result};

/// Read-only view of the graph that decorators evaluate against.
pub struct GraphContext<B: StorageBackend> {
    pub adjacency: Adjacency<B>,
    pub navigator: Navigator<B>,
}

/// Accepted positional argument counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: usize,
}

impl Arity {
    pub const fn exactly(n: usize) -> Self {
        Self { min: n, max: n }
    }

    pub const fn between(min: usize, max: usize) -> Self {
        Self { min, max }
    }

    pub fn accepts(&self, n: usize) -> bool {
        (self.min..=self.max).contains(&n)
    }
}

#[async_trait]
pub trait GraphFunction<B: StorageBackend>: Send + Sync {
    fn name(&self) -> &'static str;

    fn arity(&self) -> Arity;

    /// Called only with an argument count accepted by `arity()`.
    /// Malformed argument values should fail with `Error::InvalidArguments`.
    async fn evaluate(&self, ctx: &GraphContext<B>, target: &ObjectId, args: &[String]) -> Result<Value>;
}

fn int_arg(name: &str, raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| Error::InvalidArguments(format!("{name}: '{raw}' is not an integer")))
}

fn ids_json(ids: Vec<ObjectId>) -> Value {
    Value::Array(ids.into_iter().map(|id| Value::String(id.0)).collect())
}

// ============================================================================
// Built-ins
// ============================================================================

/// `getChildrenUUIDSByLinkType(linkType?)`: sorted child ids.
pub struct ChildrenByLinkType;

#[async_trait]
impl<B: StorageBackend> GraphFunction<B> for ChildrenByLinkType {
    fn name(&self) -> &'static str { "getChildrenUUIDSByLinkType" }
    fn arity(&self) -> Arity { Arity::between(0, 1) }

    async fn evaluate(&self, ctx: &GraphContext<B>, target: &ObjectId, args: &[String]) -> Result<Value> {
        let link_type = args.first().map(|a| a.trim()).filter(|a| !a.is_empty());
        Ok(ids_json(ctx.adjacency.children_by_link_type(target, link_type).await?))
    }
}

/// `getInOutLinkTypes()`: `{"in": [..], "out": [..]}`.
pub struct InOutLinkTypes;

#[async_trait]
impl<B: StorageBackend> GraphFunction<B> for InOutLinkTypes {
    fn name(&self) -> &'static str { "getInOutLinkTypes" }
    fn arity(&self) -> Arity { Arity::exactly(0) }

    async fn evaluate(&self, ctx: &GraphContext<B>, target: &ObjectId, _args: &[String]) -> Result<Value> {
        Ok(serde_json::to_value(ctx.adjacency.in_out_link_types(target).await?)?)
    }
}

/// `getOutLinkTypes()`
pub struct OutLinkTypes;

#[async_trait]
impl<B: StorageBackend> GraphFunction<B> for OutLinkTypes {
    fn name(&self) -> &'static str { "getOutLinkTypes" }
    fn arity(&self) -> Arity { Arity::exactly(0) }

    async fn evaluate(&self, ctx: &GraphContext<B>, target: &ObjectId, _args: &[String]) -> Result<Value> {
        Ok(Value::from(ctx.adjacency.out_link_types(target).await?))
    }
}

/// `getLinksByType(linkType)`: `[{source, target, type}, ..]`.
pub struct LinksByType;

#[async_trait]
impl<B: StorageBackend> GraphFunction<B> for LinksByType {
    fn name(&self) -> &'static str { "getLinksByType" }
    fn arity(&self) -> Arity { Arity::exactly(1) }

    async fn evaluate(&self, ctx: &GraphContext<B>, target: &ObjectId, args: &[String]) -> Result<Value> {
        let link_type = args[0].trim();
        if link_type.is_empty() {
            return Err(Error::InvalidArguments("getLinksByType: empty link type".into()));
        }
        Ok(serde_json::to_value(ctx.adjacency.links_by_type(target, link_type).await?)?)
    }
}

/// `typesNavigation(forward, backward)`. Starts from the target itself when
/// it is a type, otherwise from the target's type.
pub struct TypesNavigation;

#[async_trait]
impl<B: StorageBackend> GraphFunction<B> for TypesNavigation {
    fn name(&self) -> &'static str { "typesNavigation" }
    fn arity(&self) -> Arity { Arity::exactly(2) }

    async fn evaluate(&self, ctx: &GraphContext<B>, target: &ObjectId, args: &[String]) -> Result<Value> {
        let forward = int_arg("typesNavigation", &args[0])?;
        let backward = int_arg("typesNavigation", &args[1])?;
        let node = require_node(ctx.adjacency.backend(), target).await?;
        let origin = if node.object_type == TYPE_OBJECT {
            node.id
        } else {
            ObjectId::new(node.object_type)
        };
        Ok(serde_json::to_value(ctx.navigator.types_navigation(&origin, forward, backward).await?)?)
    }
}

/// `objectNavigation(radius)`
pub struct ObjectNavigation;

#[async_trait]
impl<B: StorageBackend> GraphFunction<B> for ObjectNavigation {
    fn name(&self) -> &'static str { "objectNavigation" }
    fn arity(&self) -> Arity { Arity::exactly(1) }

    async fn evaluate(&self, ctx: &GraphContext<B>, target: &ObjectId, args: &[String]) -> Result<Value> {
        let radius = int_arg("objectNavigation", &args[0])?;
        Ok(serde_json::to_value(ctx.navigator.object_radius(target, radius).await?)?)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Name → function table used by the decorator engine.
pub struct FunctionRegistry<B: StorageBackend> {
    functions: HashMap<&'static str, Arc<dyn GraphFunction<B>>>,
}

impl<B: StorageBackend> Default for FunctionRegistry<B> {
    fn default() -> Self {
        Self::builtin()
    }
}

impl<B: StorageBackend> FunctionRegistry<B> {
    pub fn empty() -> Self {
        Self { functions: HashMap::new() }
    }

    /// Registry holding every built-in function.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(ChildrenByLinkType);
        registry.register(InOutLinkTypes);
        registry.register(OutLinkTypes);
        registry.register(LinksByType);
        registry.register(TypesNavigation);
        registry.register(ObjectNavigation);
        registry
    }

    /// Add or replace a function.
    pub fn register<F: GraphFunction<B> + 'static>(&mut self, function: F) {
        self.functions.insert(<F as GraphFunction<B>>::name(&function), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GraphFunction<B>>> {
        self.functions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.functions.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
