//! Temporal knowledge graph adapter
//!
//! Tracks entities, their co-occurrence edges and the episodes they were
//! mentioned in, bitemporally (first/last seen). Edge strength accrues on
//! co-mention and decays during nightly maintenance; edges that fall
//! below the minimum strength are pruned.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::atom::MemoryAtom;
use crate::constants::GRAPH_EDGE_MIN_STRENGTH;
use crate::similarity::tokenize;

use super::super::port::{MemoryCapability, MemoryPort, SearchHit};

/// Strength added to an edge each time its endpoints co-occur
const EDGE_REINFORCEMENT: f32 = 0.25;

/// Multiplicative edge decay applied per maintenance pass
const EDGE_MAINTENANCE_DECAY: f32 = 0.9;

#[derive(Debug, Clone)]
struct EntityNode {
    mentions: u32,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct GraphEdge {
    strength: f32,
    last_seen: DateTime<Utc>,
}

#[derive(Default)]
struct UserGraph {
    entities: HashMap<String, EntityNode>,
    /// Undirected edges keyed by (a, b) with a < b
    edges: HashMap<(String, String), GraphEdge>,
    /// Episode references, newest last
    episodes: Vec<(Uuid, Vec<String>, DateTime<Utc>)>,
}

impl UserGraph {
    fn neighbors_of(&self, entity: &str) -> Vec<(&str, f32)> {
        let mut out: Vec<(&str, f32)> = self
            .edges
            .iter()
            .filter_map(|((a, b), edge)| {
                if a == entity {
                    Some((b.as_str(), edge.strength))
                } else if b == entity {
                    Some((a.as_str(), edge.strength))
                } else {
                    None
                }
            })
            .collect();
        out.sort_by(|x, y| y.1.partial_cmp(&x.1).unwrap_or(std::cmp::Ordering::Equal));
        out
    }
}

#[derive(Default)]
pub struct GraphMemoryPort {
    graphs: DashMap<String, RwLock<UserGraph>>,
}

fn edge_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl GraphMemoryPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_count(&self, user_id: &str) -> usize {
        self.graphs
            .get(user_id)
            .map(|g| g.read().entities.len())
            .unwrap_or(0)
    }

    pub fn edge_count(&self, user_id: &str) -> usize {
        self.graphs
            .get(user_id)
            .map(|g| g.read().edges.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl MemoryPort for GraphMemoryPort {
    fn name(&self) -> &'static str {
        "graph_memory"
    }

    fn section_name(&self) -> &'static str {
        "temporal_graph"
    }

    fn priority(&self) -> u8 {
        3
    }

    fn capabilities(&self) -> Vec<MemoryCapability> {
        vec![MemoryCapability::TemporalGraph, MemoryCapability::Entity]
    }

    async fn search(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<SearchHit>> {
        let Some(graph) = self.graphs.get(user_id) else {
            return Ok(Vec::new());
        };
        let graph = graph.read();

        let tokens: Vec<String> = tokenize(query).collect();
        let max_mentions = graph
            .entities
            .values()
            .map(|n| n.mentions)
            .max()
            .unwrap_or(1)
            .max(1) as f32;

        let mut hits: Vec<SearchHit> = graph
            .entities
            .iter()
            .filter(|(name, _)| {
                let lower = name.to_lowercase();
                tokens.iter().any(|t| lower.contains(t.as_str()))
            })
            .map(|(name, node)| {
                let neighbors = graph.neighbors_of(name);
                let linked: Vec<&str> = neighbors.iter().take(4).map(|(n, _)| *n).collect();
                let content = if linked.is_empty() {
                    format!(
                        "{name}: {} mentions, last seen {}",
                        node.mentions,
                        node.last_seen.format("%Y-%m-%d")
                    )
                } else {
                    format!(
                        "{name}: {} mentions, last seen {}, linked to {}",
                        node.mentions,
                        node.last_seen.format("%Y-%m-%d"),
                        linked.join(", ")
                    )
                };
                SearchHit {
                    memory_id: None,
                    content,
                    score: node.mentions as f32 / max_mentions,
                    source: self.name().to_string(),
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    fn supports_write(&self) -> bool {
        true
    }

    async fn write(&self, atom: &MemoryAtom) -> anyhow::Result<Option<String>> {
        if atom.entities.is_empty() {
            return Ok(None);
        }

        let graph = self
            .graphs
            .entry(atom.user_id.clone())
            .or_insert_with(|| RwLock::new(UserGraph::default()));
        let mut graph = graph.write();

        for entity in &atom.entities {
            let node = graph.entities.entry(entity.clone()).or_insert(EntityNode {
                mentions: 0,
                first_seen: atom.event_time,
                last_seen: atom.event_time,
            });
            node.mentions += 1;
            if atom.event_time < node.first_seen {
                node.first_seen = atom.event_time;
            }
            if atom.event_time > node.last_seen {
                node.last_seen = atom.event_time;
            }
        }

        for (i, a) in atom.entities.iter().enumerate() {
            for b in atom.entities.iter().skip(i + 1) {
                if a == b {
                    continue;
                }
                let edge = graph.edges.entry(edge_key(a, b)).or_insert(GraphEdge {
                    strength: 0.0,
                    last_seen: atom.event_time,
                });
                edge.strength = (edge.strength + EDGE_REINFORCEMENT).min(1.0);
                edge.last_seen = atom.event_time;
            }
        }

        graph
            .episodes
            .push((atom.memory_id, atom.entities.clone(), atom.event_time));

        Ok(Some(format!("graph:{}", atom.memory_id)))
    }

    /// Decay edge strengths and prune those below the minimum. Returns
    /// the number of pruned edges.
    async fn maintain(&self) -> anyhow::Result<u64> {
        let mut pruned = 0u64;
        for graph in self.graphs.iter() {
            let mut graph = graph.write();
            for edge in graph.edges.values_mut() {
                edge.strength *= EDGE_MAINTENANCE_DECAY;
            }
            let before = graph.edges.len();
            graph.edges.retain(|_, e| e.strength >= GRAPH_EDGE_MIN_STRENGTH);
            pruned += (before - graph.edges.len()) as u64;
        }
        Ok(pruned)
    }

    async fn delete_user_data(&self, user_id: &str) -> anyhow::Result<i64> {
        match self.graphs.remove(user_id) {
            Some((_, graph)) => {
                let graph = graph.read();
                Ok((graph.entities.len() + graph.episodes.len()) as i64)
            }
            None => Ok(0),
        }
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
