//! # Adjacency Query Layer
//!
//! Answers neighbourhood questions ("children of X by link type", "link
//! types around X", ...) using nothing but `StorageBackend::match_keys`
//! and the link codec. All results are sorted so that anything built on
//! top of them (decorator output, navigation order) is deterministic.
//!
//! Keys that fail to decode are skipped; a query returns whatever decoded.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{KeyPattern, LinkKey};
use crate::model::{Direction, Link, ObjectId, is_reserved_link_type};
use crate::storage::StorageBackend;
use crate::Result;

/// Distinct link types on each side of an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkTypes {
    #[serde(rename = "in")]
    pub incoming: Vec<String>,
    #[serde(rename = "out")]
    pub outgoing: Vec<String>,
}

/// Read-only adjacency queries over a storage backend.
pub struct Adjacency<B: StorageBackend> {
    backend: Arc<B>,
}

impl<B: StorageBackend> Clone for Adjacency<B> {
    fn clone(&self) -> Self {
        Self { backend: Arc::clone(&self.backend) }
    }
}

impl<B: StorageBackend> Adjacency<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Decoded index entries on one side of `id`.
    async fn entries(&self, id: &ObjectId, direction: Direction, link_type: Option<&str>) -> Result<Vec<LinkKey>> {
        let pattern = KeyPattern::edges(id, direction, link_type);
        let keys = self.backend.match_keys(&pattern).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            match LinkKey::decode(&key) {
                Ok(entry) => entries.push(entry),
                Err(e) => debug!(key = %key, error = %e, "skipping undecodable link key"),
            }
        }
        Ok(entries)
    }

    /// Far ends of `id`'s edges on one side, sorted and deduplicated.
    /// Without a type filter, reserved link types are left out.
    async fn neighbours(&self, id: &ObjectId, direction: Direction, link_type: Option<&str>) -> Result<Vec<ObjectId>> {
        let ids: BTreeSet<ObjectId> = self
            .entries(id, direction, link_type)
            .await?
            .into_iter()
            .filter(|e| link_type.is_some() || !is_reserved_link_type(&e.link_type))
            .map(|e| e.other)
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// Targets of `id`'s outgoing edges, optionally of one type.
    pub async fn children_by_link_type(&self, id: &ObjectId, link_type: Option<&str>) -> Result<Vec<ObjectId>> {
        self.neighbours(id, Direction::Out, link_type).await
    }

    /// Sources of `id`'s incoming edges of one type.
    pub async fn parents_by_link_type(&self, id: &ObjectId, link_type: &str) -> Result<Vec<ObjectId>> {
        self.neighbours(id, Direction::In, Some(link_type)).await
    }

    /// Sources of all of `id`'s incoming edges, reserved types excluded.
    pub async fn parents(&self, id: &ObjectId) -> Result<Vec<ObjectId>> {
        self.neighbours(id, Direction::In, None).await
    }

    async fn link_types(&self, id: &ObjectId, direction: Direction) -> Result<Vec<String>> {
        let types: BTreeSet<String> = self
            .entries(id, direction, None)
            .await?
            .into_iter()
            .map(|e| e.link_type)
            .filter(|t| !is_reserved_link_type(t))
            .collect();
        Ok(types.into_iter().collect())
    }

    pub async fn out_link_types(&self, id: &ObjectId) -> Result<Vec<String>> {
        self.link_types(id, Direction::Out).await
    }

    pub async fn in_out_link_types(&self, id: &ObjectId) -> Result<LinkTypes> {
        Ok(LinkTypes {
            incoming: self.link_types(id, Direction::In).await?,
            outgoing: self.link_types(id, Direction::Out).await?,
        })
    }

    /// Every edge of `link_type` that `id` takes part in: outgoing edges
    /// first (by target), then incoming edges (by source).
    ///
    /// An incoming edge survives only if its source's type can be read; an
    /// inverse key whose source is gone or unreadable is dropped. A self-loop
    /// is reported once.
    pub async fn links_by_type(&self, id: &ObjectId, link_type: &str) -> Result<Vec<Link>> {
        let mut links: Vec<Link> = self
            .children_by_link_type(id, Some(link_type))
            .await?
            .into_iter()
            .map(|target| Link::new(id.clone(), link_type, target))
            .collect();

        for source in self.parents_by_link_type(id, link_type).await? {
            // a self-loop was already emitted as an outgoing edge
            if &source == id {
                continue;
            }
            match self.backend.get_type(&source).await {
                Ok(Some(_)) => links.push(Link::new(source, link_type, id.clone())),
                Ok(None) => debug!(%source, %link_type, "dropping inverse edge from missing object"),
                Err(e) => debug!(%source, error = %e, "dropping inverse edge, type lookup failed"),
            }
        }
        Ok(links)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use crate::tx::Transaction;
    use crate::model::TYPE_LINK;
    use proptest::prelude::*;
    use serde_json::json;

    async fn graph(objects: &[&str], links: &[(&str, &str, &str)]) -> Adjacency<MemoryBackend> {
        let db = MemoryBackend::new();
        let mut tx = Transaction::new();
        for o in objects {
            tx = tx.create_object(*o, "thing", json!({}));
        }
        for (s, t, d) in links {
            tx = tx.link(*s, t, *d);
        }
        db.commit(tx).await.unwrap();
        Adjacency::new(Arc::new(db))
    }

    fn ids(v: &[&str]) -> Vec<ObjectId> {
        v.iter().map(|s| ObjectId::new(*s)).collect()
    }

    #[tokio::test]
    async fn test_children_sorted_and_filtered() {
        let adj = graph(
            &["rack1", "d2", "d1", "n1"],
            &[("rack1", "disk", "d2"), ("rack1", "disk", "d1"), ("rack1", "node", "n1")],
        )
        .await;
        let rack = ObjectId::new("rack1");
        assert_eq!(adj.children_by_link_type(&rack, Some("disk")).await.unwrap(), ids(&["d1", "d2"]));
        assert_eq!(adj.children_by_link_type(&rack, None).await.unwrap(), ids(&["d1", "d2", "n1"]));
        assert!(adj.children_by_link_type(&rack, Some("nothing")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unfiltered_children_skip_reserved_types() {
        let adj = graph(&["t", "u", "o"], &[("t", TYPE_LINK, "u"), ("t", "uses", "o")]).await;
        let t = ObjectId::new("t");
        assert_eq!(adj.children_by_link_type(&t, None).await.unwrap(), ids(&["o"]));
        assert_eq!(adj.children_by_link_type(&t, Some(TYPE_LINK)).await.unwrap(), ids(&["u"]));
    }

    #[tokio::test]
    async fn test_parents_use_inverse_index() {
        let adj = graph(&["a", "b", "c"], &[("b", "disk", "a"), ("c", "disk", "a"), ("c", "node", "a")]).await;
        let a = ObjectId::new("a");
        assert_eq!(adj.parents_by_link_type(&a, "disk").await.unwrap(), ids(&["b", "c"]));
        assert_eq!(adj.parents(&a).await.unwrap(), ids(&["b", "c"]));
    }

    #[tokio::test]
    async fn test_link_type_enumeration() {
        let adj = graph(
            &["x", "a", "b", "c"],
            &[("x", "node_disk", "a"), ("x", "node_disk", "b"), ("c", "owns", "x"), ("x", TYPE_LINK, "c")],
        )
        .await;
        let x = ObjectId::new("x");
        assert_eq!(adj.out_link_types(&x).await.unwrap(), vec!["node_disk"]);
        let both = adj.in_out_link_types(&x).await.unwrap();
        assert_eq!(both.incoming, vec!["owns"]);
        assert_eq!(both.outgoing, vec!["node_disk"]);
        assert_eq!(serde_json::to_value(&both).unwrap(), json!({"in": ["owns"], "out": ["node_disk"]}));
    }

    #[tokio::test]
    async fn test_links_by_type_both_directions() {
        let adj = graph(
            &["x", "a", "b", "p"],
            &[("x", "node_disk", "b"), ("x", "node_disk", "a"), ("p", "node_disk", "x")],
        )
        .await;
        let links = adj.links_by_type(&ObjectId::new("x"), "node_disk").await.unwrap();
        assert_eq!(
            links,
            vec![
                Link::new("x", "node_disk", "a"),
                Link::new("x", "node_disk", "b"),
                Link::new("p", "node_disk", "x"),
            ]
        );
    }

    #[tokio::test]
    async fn test_self_loop_reported_once() {
        let adj = graph(&["x", "y"], &[("x", "peer", "x"), ("y", "peer", "x")]).await;
        let links = adj.links_by_type(&ObjectId::new("x"), "peer").await.unwrap();
        assert_eq!(links, vec![Link::new("x", "peer", "x"), Link::new("y", "peer", "x")]);
    }

    proptest! {
        #[test]
        fn property_children_are_exact_sorted_and_unique(
            edges in proptest::collection::vec((0u8..6, 0u8..3, 0u8..6), 0..30),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");

            rt.block_on(async move {
                let names: Vec<String> = (0..6).map(|i| format!("n{i}")).collect();
                let db = MemoryBackend::new();
                for n in &names {
                    db.create_object(&ObjectId::new(n.as_str()), "thing", json!({})).await.unwrap();
                }
                let mut expected: BTreeSet<(u8, u8, u8)> = BTreeSet::new();
                for (s, t, d) in &edges {
                    let link = Link::new(names[*s as usize].as_str(), format!("t{t}"), names[*d as usize].as_str());
                    db.create_link(&link).await.unwrap();
                    expected.insert((*s, *t, *d));
                }
                let adj = Adjacency::new(Arc::new(db));

                for s in 0u8..6 {
                    for t in 0u8..3 {
                        let got = adj
                            .children_by_link_type(&ObjectId::new(names[s as usize].as_str()), Some(&format!("t{t}")))
                            .await
                            .unwrap();
                        let want: Vec<ObjectId> = expected
                            .iter()
                            .filter(|(es, et, _)| *es == s && *et == t)
                            .map(|(_, _, d)| ObjectId::new(names[*d as usize].as_str()))
                            .collect();
                        assert_eq!(got, want);
                        assert!(got.windows(2).all(|w| w[0] < w[1]));
                    }
                }
            });
        }
    }
}
