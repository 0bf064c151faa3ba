//! The uniform adapter contract every backend implements
//!
//! The registry holds trait objects only - concrete adapter types never
//! leak past registration. Write, delete and health are optional; search
//! is the one required capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::atom::MemoryAtom;
use crate::constants::PORT_DEFAULT_TIMEOUT_SECS;

/// A named kind of memory function a backend may provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCapability {
    Episodic,
    Semantic,
    Entity,
    TemporalGraph,
    Relationship,
    Affective,
    Safety,
    Governance,
    Evaluation,
}

impl MemoryCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Entity => "entity",
            Self::TemporalGraph => "temporal_graph",
            Self::Relationship => "relationship",
            Self::Affective => "affective",
            Self::Safety => "safety",
            Self::Governance => "governance",
            Self::Evaluation => "evaluation",
        }
    }

    /// Every declarable capability, for strict-mode coverage checks
    pub fn all() -> &'static [MemoryCapability] {
        &[
            Self::Episodic,
            Self::Semantic,
            Self::Entity,
            Self::TemporalGraph,
            Self::Relationship,
            Self::Affective,
            Self::Safety,
            Self::Governance,
            Self::Evaluation,
        ]
    }

    /// Capabilities required in base (non-strict) mode
    pub fn base_required() -> &'static [MemoryCapability] {
        &[
            Self::Episodic,
            Self::Semantic,
            Self::Relationship,
            Self::Affective,
            Self::Governance,
        ]
    }
}

/// One search result from one backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub memory_id: Option<Uuid>,
    pub content: String,
    pub score: f32,
    /// Backend that produced the hit (provenance caption)
    pub source: String,
}

/// Typed per-port fan-out outcome: failures are captured, not raised
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PortOutcome {
    Ok { hits: usize },
    Timeout { elapsed_ms: u64 },
    Error { message: String },
    SkippedOpen,
}

/// The uniform backend adapter contract
#[async_trait]
pub trait MemoryPort: Send + Sync {
    /// Stable registry name
    fn name(&self) -> &'static str;

    /// Label for the section this port contributes to the context pack
    fn section_name(&self) -> &'static str;

    /// Lower = queried first when the plan is budget-constrained
    fn priority(&self) -> u8;

    /// Per-call timeout; exceeding it counts as a breaker failure
    fn timeout_seconds(&self) -> f64 {
        PORT_DEFAULT_TIMEOUT_SECS
    }

    /// Memory capabilities this adapter provides
    fn capabilities(&self) -> Vec<MemoryCapability>;

    async fn search(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
    ) -> anyhow::Result<Vec<SearchHit>>;

    /// Whether this port accepts materialized writes
    fn supports_write(&self) -> bool {
        false
    }

    /// Materialize a normalized copy; returns an external ref on success
    async fn write(&self, atom: &MemoryAtom) -> anyhow::Result<Option<String>> {
        let _ = atom;
        Ok(None)
    }

    /// GDPR delete; Ok(0) is a valid "nothing to delete" outcome
    async fn delete_user_data(&self, user_id: &str) -> anyhow::Result<i64> {
        let _ = user_id;
        Ok(0)
    }

    /// Periodic maintenance hook invoked by the nightly consolidator.
    /// Returns a count of pruned/compacted records.
    async fn maintain(&self) -> anyhow::Result<u64> {
        Ok(0)
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
