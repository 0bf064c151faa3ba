//! Primary document store adapter - lexical recall over the atom ledger
//!
//! The ledger is the system of record; this adapter exposes it through
//! the same port contract as the external backends so the planner and the
//! breaker treat it uniformly. Quarantined and decay-suppressed atoms
//! never surface here.

use async_trait::async_trait;
use std::sync::Arc;

use crate::atom::{AtomState, AtomStore, MemoryAtom};
use crate::similarity::text_similarity;

use super::super::port::{MemoryCapability, MemoryPort, SearchHit};

/// Scores below this are noise from incidental token overlap
const MIN_LEXICAL_SCORE: f32 = 0.05;

pub struct DocumentLedgerPort {
    store: Arc<AtomStore>,
}

impl DocumentLedgerPort {
    pub fn new(store: Arc<AtomStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MemoryPort for DocumentLedgerPort {
    fn name(&self) -> &'static str {
        "document_ledger"
    }

    fn section_name(&self) -> &'static str {
        "event_sourced_memories"
    }

    fn priority(&self) -> u8 {
        1
    }

    fn capabilities(&self) -> Vec<MemoryCapability> {
        vec![MemoryCapability::Episodic, MemoryCapability::Governance]
    }

    async fn search(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<SearchHit>> {
        let store = Arc::clone(&self.store);
        let query_norm = MemoryAtom::normalize(query);
        let user = user_id.to_string();

        // Ledger scans hit RocksDB; keep them off the async executor
        let hits = tokio::task::spawn_blocking(move || {
            let mut scored: Vec<SearchHit> = store
                .atoms_for_user_all_tenants(&user)
                .into_iter()
                .filter(|atom| {
                    !matches!(atom.state, AtomState::Quarantined | AtomState::Retired)
                })
                .filter_map(|atom| {
                    let lexical = text_similarity(&query_norm, &atom.content_norm);
                    if lexical < MIN_LEXICAL_SCORE {
                        return None;
                    }
                    // Weight by decayed strength so faded memories rank behind fresh ones
                    let score = lexical * (0.5 + 0.5 * atom.recall_strength as f32);
                    Some(SearchHit {
                        memory_id: Some(atom.memory_id),
                        content: atom.content_raw,
                        score,
                        source: "document_ledger".to_string(),
                    })
                })
                .collect();
            scored.sort_by(|a, b| {
                b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
            });
            scored.truncate(top_k);
            scored
        })
        .await?;

        Ok(hits)
    }

    fn supports_write(&self) -> bool {
        true
    }

    /// The ledger already holds the atom; the returned ref marks its
    /// block in the document store.
    async fn write(&self, atom: &MemoryAtom) -> anyhow::Result<Option<String>> {
        Ok(Some(format!("block:{}", atom.memory_id)))
    }

    async fn delete_user_data(&self, user_id: &str) -> anyhow::Result<i64> {
        let store = Arc::clone(&self.store);
        let user = user_id.to_string();
        let deleted =
            tokio::task::spawn_blocking(move || store.delete_user_data(&user)).await??;
        Ok(deleted as i64)
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.flush()).await??;
        Ok(())
    }
}
