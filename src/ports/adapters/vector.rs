//! Vector store adapter - hash-embedding cosine index
//!
//! Materialized copies of non-quarantined atoms are embedded with the
//! deterministic hash projection and searched by cosine similarity. The
//! index is rebuilt from the ledger through normal materialization; it is
//! not a second source of truth.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::atom::MemoryAtom;
use crate::similarity::{hash_embedding, top_k_similar};

use super::super::port::{MemoryCapability, MemoryPort, SearchHit};

struct VectorEntry {
    memory_id: Uuid,
    embedding: Vec<f32>,
    content: String,
}

#[derive(Default)]
pub struct VectorStorePort {
    /// Per-user entries, replaced on re-materialization of the same atom
    index: DashMap<String, Vec<VectorEntry>>,
}

impl VectorStorePort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_count(&self, user_id: &str) -> usize {
        self.index.get(user_id).map(|v| v.len()).unwrap_or(0)
    }
}

#[async_trait]
impl MemoryPort for VectorStorePort {
    fn name(&self) -> &'static str {
        "vector_store"
    }

    fn section_name(&self) -> &'static str {
        "evermemos_memories"
    }

    fn priority(&self) -> u8 {
        0
    }

    fn capabilities(&self) -> Vec<MemoryCapability> {
        vec![MemoryCapability::Semantic, MemoryCapability::Episodic]
    }

    async fn search(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<SearchHit>> {
        let Some(entries) = self.index.get(user_id) else {
            return Ok(Vec::new());
        };

        let query_vec = hash_embedding(query);
        let candidates: Vec<(Vec<f32>, (Uuid, String))> = entries
            .iter()
            .map(|e| (e.embedding.clone(), (e.memory_id, e.content.clone())))
            .collect();
        drop(entries);

        let hits = top_k_similar(&query_vec, &candidates, top_k)
            .into_iter()
            .filter(|(score, _)| *score > 0.0)
            .map(|(score, (memory_id, content))| SearchHit {
                memory_id: Some(memory_id),
                content,
                score,
                source: self.name().to_string(),
            })
            .collect();

        Ok(hits)
    }

    fn supports_write(&self) -> bool {
        true
    }

    async fn write(&self, atom: &MemoryAtom) -> anyhow::Result<Option<String>> {
        let entry = VectorEntry {
            memory_id: atom.memory_id,
            embedding: hash_embedding(&atom.content_norm),
            content: atom.content_raw.clone(),
        };

        let mut entries = self.index.entry(atom.user_id.clone()).or_default();
        entries.retain(|e| e.memory_id != atom.memory_id);
        entries.push(entry);

        Ok(Some(format!("vec:{}", atom.memory_id)))
    }

    async fn delete_user_data(&self, user_id: &str) -> anyhow::Result<i64> {
        match self.index.remove(user_id) {
            Some((_, entries)) => Ok(entries.len() as i64),
            None => Ok(0),
        }
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
