//! # Graph Navigation
//!
//! Breadth-first views of the neighbourhood of an object or of a type.
//! Both walks keep a visited set keyed by object id, so cycles terminate,
//! and both visit neighbours in the adjacency layer's sorted order, so the
//! same graph always yields the same view.
//!
//! ## Type schema
//!
//! A type is an object of type `type`. Its body may carry:
//!
//! ```json
//! { "name": "rack", "view_navigable": true, "to_types": ["node", "disk"] }
//! ```
//!
//! An object's own type (the storage point read) is the id of its type
//! object. Sub-types hang off `__type` links, instances off `__instance`.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adjacency::Adjacency;
use crate::config::EngineConfig;
use crate::model::{INSTANCE_LINK, Node, ObjectId, TYPE_LINK};
use crate::storage::{StorageBackend, require_node};
use crate::Result;

// ============================================================================
// Output shapes
// ============================================================================

/// One visited node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavNode {
    pub id: ObjectId,
    pub name: String,
    /// Index within its BFS level.
    pub pos: usize,
    /// Hops from the start; negative for backward type navigation.
    pub depth: i64,
    /// Objects instantiated under a type (type navigation only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objects: Option<Vec<ObjectId>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavLink {
    pub source: ObjectId,
    pub target: ObjectId,
}

/// Result of object-radius navigation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectGraph {
    pub nodes: Vec<NavNode>,
    pub links: Vec<NavLink>,
}

/// Result of type-graph navigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeGraph {
    #[serde(rename = "type")]
    pub origin: ObjectId,
    pub nodes: Vec<NavNode>,
    pub links: Vec<NavLink>,
}

impl ObjectGraph {
    pub fn max_depth(&self) -> i64 {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }
}

/// Navigation-relevant part of a type object's body.
#[derive(Debug, Clone, Default, Deserialize)]
struct TypeInfo {
    #[serde(default)]
    view_navigable: bool,
    #[serde(default)]
    to_types: Vec<String>,
}

impl TypeInfo {
    fn allows(&self, to: &str) -> bool {
        self.to_types.iter().any(|t| t == to)
    }
}

// ============================================================================
// Navigator
// ============================================================================

pub struct Navigator<B: StorageBackend> {
    adjacency: Adjacency<B>,
    config: EngineConfig,
}

impl<B: StorageBackend> Navigator<B> {
    pub fn new(adjacency: Adjacency<B>, config: EngineConfig) -> Self {
        Self { adjacency, config }
    }

    async fn type_info(
        &self,
        type_id: &str,
        cache: &mut HashMap<String, Option<TypeInfo>>,
    ) -> Result<Option<TypeInfo>> {
        if let Some(hit) = cache.get(type_id) {
            return Ok(hit.clone());
        }
        let body = self.adjacency.backend().get_body(&ObjectId::new(type_id)).await?;
        let info = body.and_then(|b| match serde_json::from_value::<TypeInfo>(b) {
            Ok(info) => Some(info),
            Err(e) => {
                debug!(%type_id, error = %e, "type body unreadable, treating as not navigable");
                None
            }
        });
        cache.insert(type_id.to_string(), info.clone());
        Ok(info)
    }

    /// Everything within `radius` hops of `start`, walking only into objects
    /// whose type is view-navigable.
    ///
    /// Links are oriented by the `to_types` whitelist rather than by the
    /// stored edge direction: if the neighbour's type is whitelisted by the
    /// current type the link points at the neighbour, if the current type is
    /// whitelisted by the neighbour's type it points back, otherwise the
    /// neighbour is not admitted. A negative radius means `max_radius`.
    pub async fn object_radius(&self, start: &ObjectId, radius: i64) -> Result<ObjectGraph> {
        let max_depth = self.config.resolve_radius(radius);
        let backend = self.adjacency.backend();
        let origin = require_node(backend, start).await?;

        let mut types = HashMap::new();
        let mut visited: HashSet<ObjectId> = HashSet::from([origin.id.clone()]);
        let mut view = ObjectGraph::default();
        view.nodes.push(NavNode {
            id: origin.id.clone(),
            name: origin.display_name(),
            pos: 0,
            depth: 0,
            objects: None,
        });

        let mut frontier: Vec<Node> = vec![origin];
        for depth in 1..=max_depth {
            let mut next = Vec::new();
            for current in &frontier {
                let here = self.type_info(&current.object_type, &mut types).await?.unwrap_or_default();
                let mut around: BTreeSet<ObjectId> =
                    self.adjacency.children_by_link_type(&current.id, None).await?.into_iter().collect();
                around.extend(self.adjacency.parents(&current.id).await?);

                for candidate in around {
                    if visited.contains(&candidate) {
                        continue;
                    }
                    let Some(neighbour) = backend.get_node(&candidate).await? else {
                        continue;
                    };
                    let Some(there) = self.type_info(&neighbour.object_type, &mut types).await? else {
                        continue;
                    };
                    if !there.view_navigable {
                        continue;
                    }
                    let link = if here.allows(&neighbour.object_type) {
                        NavLink { source: current.id.clone(), target: neighbour.id.clone() }
                    } else if there.allows(&current.object_type) {
                        NavLink { source: neighbour.id.clone(), target: current.id.clone() }
                    } else {
                        continue;
                    };

                    visited.insert(candidate);
                    view.links.push(link);
                    view.nodes.push(NavNode {
                        id: neighbour.id.clone(),
                        name: neighbour.display_name(),
                        pos: next.len(),
                        depth: depth as i64,
                        objects: None,
                    });
                    next.push(neighbour);
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        debug!(%start, radius, nodes = view.nodes.len(), "object navigation done");
        Ok(view)
    }

    async fn type_node(&self, id: &ObjectId, pos: usize, depth: i64) -> Result<NavNode> {
        let name = match self.adjacency.backend().get_node(id).await? {
            Some(node) => node.display_name(),
            None => id.to_string(),
        };
        let objects = self.adjacency.children_by_link_type(id, Some(INSTANCE_LINK)).await?;
        Ok(NavNode { id: id.clone(), name, pos, depth, objects: Some(objects) })
    }

    /// Sub-types of `origin` up to `forward` hops (depths 1, 2, ..) and
    /// super-types up to `backward` hops (depths -1, -2, ..). The two walks
    /// keep separate visited sets. Negative bounds mean `max_radius`.
    pub async fn types_navigation(&self, origin: &ObjectId, forward: i64, backward: i64) -> Result<TypeGraph> {
        require_node(self.adjacency.backend(), origin).await?;

        let mut view = TypeGraph {
            origin: origin.clone(),
            nodes: vec![self.type_node(origin, 0, 0).await?],
            links: Vec::new(),
        };

        for (bound, sign) in [(forward, 1i64), (backward, -1i64)] {
            let max_depth = self.config.resolve_radius(bound);
            let mut visited: HashSet<ObjectId> = HashSet::from([origin.clone()]);
            let mut frontier = vec![origin.clone()];

            for depth in 1..=max_depth {
                let mut next: Vec<ObjectId> = Vec::new();
                for current in &frontier {
                    let found = if sign > 0 {
                        self.adjacency.children_by_link_type(current, Some(TYPE_LINK)).await?
                    } else {
                        self.adjacency.parents_by_link_type(current, TYPE_LINK).await?
                    };
                    for other in found {
                        if !visited.insert(other.clone()) {
                            continue;
                        }
                        let link = if sign > 0 {
                            NavLink { source: current.clone(), target: other.clone() }
                        } else {
                            NavLink { source: other.clone(), target: current.clone() }
                        };
                        view.links.push(link);
                        view.nodes.push(self.type_node(&other, next.len(), sign * depth as i64).await?);
                        next.push(other);
                    }
                }
                if next.is_empty() {
                    break;
                }
                frontier = next;
            }
        }

        debug!(%origin, forward, backward, nodes = view.nodes.len(), "type navigation done");
        Ok(view)
    }
}

// ============================================================================
// Tests
// ============================================================================
