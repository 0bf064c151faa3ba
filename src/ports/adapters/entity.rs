//! Entity-memory adapter - per-entity profile aggregation
//!
//! Rolls every mention of an entity into one profile: mention count,
//! first/last seen, a bounded sample of recent contexts and an averaged
//! affect valence. Search returns profile summaries, not raw episodes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::VecDeque;

use crate::atom::MemoryAtom;
use crate::similarity::tokenize;

use super::super::port::{MemoryCapability, MemoryPort, SearchHit};

/// Recent mention contexts kept per profile
const CONTEXT_SAMPLES_MAX: usize = 3;

#[derive(Debug, Clone)]
struct EntityProfile {
    mentions: u32,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    contexts: VecDeque<String>,
    valence_sum: f32,
    valence_count: u32,
}

impl EntityProfile {
    fn mean_valence(&self) -> Option<f32> {
        if self.valence_count == 0 {
            None
        } else {
            Some(self.valence_sum / self.valence_count as f32)
        }
    }
}

#[derive(Default)]
pub struct EntityMemoryPort {
    profiles: DashMap<String, RwLock<HashMap<String, EntityProfile>>>,
}

impl EntityMemoryPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile_count(&self, user_id: &str) -> usize {
        self.profiles
            .get(user_id)
            .map(|p| p.read().len())
            .unwrap_or(0)
    }
}

fn context_snippet(content: &str) -> String {
    let mut snippet: String = content.chars().take(80).collect();
    if snippet.len() < content.len() {
        snippet.push('…');
    }
    snippet
}

#[async_trait]
impl MemoryPort for EntityMemoryPort {
    fn name(&self) -> &'static str {
        "entity_memory"
    }

    fn section_name(&self) -> &'static str {
        "entity_profiles"
    }

    fn priority(&self) -> u8 {
        2
    }

    fn capabilities(&self) -> Vec<MemoryCapability> {
        vec![MemoryCapability::Entity, MemoryCapability::Affective]
    }

    async fn search(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<SearchHit>> {
        let Some(profiles) = self.profiles.get(user_id) else {
            return Ok(Vec::new());
        };
        let profiles = profiles.read();

        let tokens: Vec<String> = tokenize(query).collect();
        let max_mentions = profiles
            .values()
            .map(|p| p.mentions)
            .max()
            .unwrap_or(1)
            .max(1) as f32;

        let mut hits: Vec<SearchHit> = profiles
            .iter()
            .filter(|(name, _)| {
                let lower = name.to_lowercase();
                tokens.iter().any(|t| lower.contains(t.as_str()))
            })
            .map(|(name, profile)| {
                let mut content = format!(
                    "{name}: {} mentions between {} and {}",
                    profile.mentions,
                    profile.first_seen.format("%Y-%m-%d"),
                    profile.last_seen.format("%Y-%m-%d"),
                );
                if let Some(valence) = profile.mean_valence() {
                    content.push_str(&format!(", valence {valence:+.2}"));
                }
                if let Some(recent) = profile.contexts.front() {
                    content.push_str(&format!("; recently: \"{recent}\""));
                }
                SearchHit {
                    memory_id: None,
                    content,
                    score: profile.mentions as f32 / max_mentions,
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

        let profiles = self
            .profiles
            .entry(atom.user_id.clone())
            .or_insert_with(|| RwLock::new(HashMap::new()));
        let mut profiles = profiles.write();

        for entity in &atom.entities {
            let profile = profiles.entry(entity.clone()).or_insert(EntityProfile {
                mentions: 0,
                first_seen: atom.event_time,
                last_seen: atom.event_time,
                contexts: VecDeque::new(),
                valence_sum: 0.0,
                valence_count: 0,
            });
            profile.mentions += 1;
            if atom.event_time < profile.first_seen {
                profile.first_seen = atom.event_time;
            }
            if atom.event_time > profile.last_seen {
                profile.last_seen = atom.event_time;
            }
            profile.contexts.push_front(context_snippet(&atom.content_raw));
            profile.contexts.truncate(CONTEXT_SAMPLES_MAX);
            if let Some(affect) = &atom.affect {
                profile.valence_sum += affect.valence;
                profile.valence_count += 1;
            }
        }

        Ok(Some(format!("entity:{}", atom.memory_id)))
    }

    async fn delete_user_data(&self, user_id: &str) -> anyhow::Result<i64> {
        match self.profiles.remove(user_id) {
            Some((_, profiles)) => Ok(profiles.read().len() as i64),
            None => Ok(0),
        }
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
