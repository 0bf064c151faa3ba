//! Type definitions for the memory atom ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Lifecycle state of a memory atom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomState {
    /// Persisted, not yet linked or materialized
    Raw,
    /// Linked against the recent window, refs may still be pending
    Consolidated,
    /// Fully materialized into external backends
    Active,
    /// Suppressed from normal recall by decay (kept, not deleted)
    Retired,
    /// Isolated by MemGuard; never materialized, exempt from retention pruning
    Quarantined,
}

impl AtomState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AtomState::Raw => "raw",
            AtomState::Consolidated => "consolidated",
            AtomState::Active => "active",
            AtomState::Retired => "retired",
            AtomState::Quarantined => "quarantined",
        }
    }
}

/// Kind of memory an atom represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    #[default]
    Episode,
    /// Peak-emotion episode; permanently exempt from decay once flagged
    FlashbulbEpisode,
    Fact,
    Preference,
    Reflection,
}

/// Input modality the content arrived through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    #[default]
    Text,
    Voice,
    System,
}

/// Retention policy applied by the nightly pruning task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    #[default]
    Standard,
    ShortLived,
    /// Never pruned by retention (still subject to GDPR deletion)
    Pinned,
}

/// Emotion snapshot captured at ingest time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AffectSnapshot {
    /// Dominant emotion label from the upstream extractor
    pub emotion: String,
    /// Intensity in [0, 1]
    pub intensity: f32,
    /// Valence in [-1, 1]
    pub valence: f32,
    /// Whether the extractor marked this as an emotional peak
    pub is_peak: bool,
}

/// How a linked atom relates to an earlier one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Reinforces,
    Conflicts,
}

/// Intra-atom relation edge appended by the evolution engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationEdge {
    pub kind: RelationKind,
    pub target_memory_id: Uuid,
    pub confidence: f32,
}

/// The canonical unit of memory: one immutable, idempotency-keyed record.
///
/// Content is never mutated after ingest. The only legal mutations are
/// appending external refs after materialization, flipping `state`, and
/// decay bookkeeping - all CAS'd on `version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryAtom {
    pub memory_id: Uuid,
    pub idempotency_key: Option<String>,
    pub tenant_id: String,
    pub user_id: String,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,

    /// When the remembered event happened (caller-supplied)
    pub event_time: DateTime<Utc>,
    /// When the fabric persisted it
    pub ingest_time: DateTime<Utc>,

    pub source: String,
    pub modality: Modality,
    pub memory_type: MemoryKind,

    pub content_raw: String,
    pub content_norm: String,

    pub entities: Vec<String>,
    pub relations: Vec<RelationEdge>,
    pub affect: Option<AffectSnapshot>,

    pub salience: f32,
    pub confidence: f32,
    pub trust_score: f32,

    pub provenance: String,
    pub retention_policy: RetentionPolicy,
    pub pii_tags: Vec<String>,

    /// External references appended after successful materialization
    pub vector_ref: Option<String>,
    pub graph_ref: Option<String>,
    pub block_ref: Option<String>,

    pub state: AtomState,

    /// Decayed, time-adjusted importance used by recall filtering
    pub recall_strength: f64,
    /// Permanent decay exemption; set once at ingest, never re-derived
    pub flashbulb: bool,

    /// Optimistic-concurrency version, bumped on every mutation
    pub version: u64,
}

impl MemoryAtom {
    /// Normalize content for linking and lexical search: lowercase,
    /// whitespace collapsed to single spaces.
    pub fn normalize(content: &str) -> String {
        content
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Fingerprint of the raw content: sha256 hex + length. Used by
    /// shadow entries so quarantined text is reviewable without being
    /// retained.
    pub fn content_fingerprint(content: &str) -> ContentFingerprint {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        ContentFingerprint {
            sha256: format!("{:x}", hasher.finalize()),
            length: content.chars().count(),
        }
    }

    /// Days elapsed since ingest, never negative
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.ingest_time).num_seconds().max(0) as f64;
        secs / 86_400.0
    }
}

/// Hash + length of content, never the content itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFingerprint {
    pub sha256: String,
    pub length: usize,
}

/// Review state of a quarantined-content record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowState {
    PendingReview,
    Reviewed,
    Released,
}

/// Forensic record for quarantined content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyShadowEntry {
    pub shadow_id: Uuid,
    pub memory_id: Uuid,
    pub user_id: String,
    pub reasons: Vec<String>,
    pub risk_score: f32,
    pub state: ShadowState,
    pub fingerprint: ContentFingerprint,
    pub created_at: DateTime<Utc>,
}

/// One entry in an atom's append-only audit trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: DateTime<Utc>,
    /// INGEST, LINK, MATERIALIZE, STATE, DECAY, DELETE_REQUESTED
    pub event_type: String,
    pub detail: String,
}

/// Durable behavioral rule or persona fact upserted via reflect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorRule {
    pub rule_id: Uuid,
    pub user_id: String,
    pub rule: String,
    pub priority: i32,
    pub active: bool,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(
            MemoryAtom::normalize("  I just GOT\tthe job\n offer! "),
            "i just got the job offer!"
        );
    }

    #[test]
    fn test_fingerprint_never_contains_content() {
        let fp = MemoryAtom::content_fingerprint("my ssn is 123-45-6789");
        assert_eq!(fp.sha256.len(), 64);
        assert_eq!(fp.length, 21);
        assert!(!fp.sha256.contains("6789"));
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(AtomState::Quarantined.as_str(), "quarantined");
        assert_eq!(AtomState::Active.as_str(), "active");
    }
}
