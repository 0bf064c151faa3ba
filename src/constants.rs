//! Documented constants for the memory fabric
//!
//! All tunable parameters live here with the reasoning behind their values.
//! Centralizing constants prevents magic numbers and makes tuning easier.

// =============================================================================
// CONTENT RISK (MemGuard)
// =============================================================================

/// Risk added by a blocked-sensitivity pattern match
///
/// A single blocked-category hit (credentials, government identifiers,
/// medical detail) should by itself push content close to the quarantine
/// threshold; any secondary signal tips it over.
pub const RISK_BLOCKED_PATTERN: f32 = 0.8;

/// Risk added by a caution-sensitivity pattern match
///
/// Caution categories (financial amounts, street addresses) are worth
/// flagging but not quarantining on their own.
pub const RISK_CAUTION_PATTERN: f32 = 0.25;

/// Risk added per distinct prompt-injection marker
pub const RISK_INJECTION_MARKER: f32 = 0.15;

/// Cap on total injection-marker risk (3 distinct markers)
pub const RISK_INJECTION_CAP: f32 = 0.45;

/// Risk added when the incoming trust score is low
pub const RISK_LOW_TRUST: f32 = 0.2;

/// Trust score below which the low-trust penalty applies
pub const LOW_TRUST_THRESHOLD: f32 = 0.3;

/// Risk added for an oversized payload
pub const RISK_OVERSIZED: f32 = 0.15;

/// Payload size (chars) above which the oversized penalty applies
pub const OVERSIZED_CONTENT_CHARS: usize = 6000;

/// Default risk threshold for quarantine
pub const DEFAULT_QUARANTINE_THRESHOLD: f32 = 0.7;

/// Risk threshold for the caution action
pub const CAUTION_RISK_THRESHOLD: f32 = 0.45;

// =============================================================================
// EVOLUTION ENGINE
// =============================================================================

/// Minimum normalized similarity for linking a new atom to a recent one
///
/// 0.72 is high enough that paraphrases link but topically-adjacent
/// memories do not. Below this the engine records no relation at all.
pub const EVOLUTION_SIMILARITY_THRESHOLD: f32 = 0.72;

/// Confidence ceiling applied when a new atom conflicts with a prior one
pub const CONFLICT_CONFIDENCE_CAP: f32 = 0.6;

/// Trust penalty applied on conflict
pub const CONFLICT_TRUST_PENALTY: f32 = 0.15;

/// Confidence boost applied on reinforcement
pub const REINFORCE_CONFIDENCE_BOOST: f32 = 0.05;

/// Trust boost applied on reinforcement
pub const REINFORCE_TRUST_BOOST: f32 = 0.03;

/// How many recent atoms the ingest path hands to the evolution engine
pub const EVOLUTION_RECENT_WINDOW: usize = 32;

// =============================================================================
// MEMORY DECAY
// =============================================================================

/// Base multiplicative decay rate per day, before protection
///
/// (1 - 0.05)^30 ≈ 0.21: an unprotected memory keeps about a fifth of its
/// recall strength after a month, matching the forgetting-curve plateau.
pub const DECAY_BASE_RATE: f64 = 0.05;

/// Absolute floor on the effective decay rate
///
/// Even a maximally protected non-flashbulb memory keeps decaying.
/// Only the flashbulb flag grants full immunity.
pub const DECAY_ABSOLUTE_FLOOR: f64 = 0.002;

/// Weight of emotional intensity in the protection sum
pub const DECAY_EMOTION_WEIGHT: f64 = 0.45;

/// Cap on combined protection factors
pub const DECAY_PROTECTION_CAP: f64 = 0.95;

/// Days of repeated mention that earn full spacing protection
pub const DECAY_SPACING_SPAN_DAYS: f64 = 90.0;

/// Weight of spacing protection
pub const DECAY_SPACING_WEIGHT: f64 = 0.3;

/// Graph links that earn full connection protection
pub const DECAY_CONNECTION_LINKS: f64 = 4.0;

/// Weight of connection protection
pub const DECAY_CONNECTION_WEIGHT: f64 = 0.2;

/// Recall strength below which a memory is suppressed from normal recall
pub const RECALL_SUPPRESSION_THRESHOLD: f64 = 0.1;

/// Emotional intensity required for the flashbulb exemption
pub const FLASHBULB_INTENSITY_THRESHOLD: f32 = 0.8;

/// Importance required for the flashbulb exemption
pub const FLASHBULB_IMPORTANCE_THRESHOLD: f32 = 0.7;

// =============================================================================
// RELATIONSHIP STAGING
// =============================================================================

/// Accumulated score and active-day thresholds per stage, in order.
///
/// Both must be met. Days gate fast scorers: a week of intense chatting
/// does not make a soulmate.
pub const STAGE_ACQUAINTANCE: (f64, u32) = (15.0, 3);
pub const STAGE_FAMILIAR: (f64, u32) = (50.0, 10);
pub const STAGE_CLOSE: (f64, u32) = (150.0, 30);
pub const STAGE_SOULMATE: (f64, u32) = (400.0, 90);

/// Proportional score decay applied when a relationship cools
pub const COOLING_SCORE_DECAY: f64 = 0.10;

/// Signal-weight multiplier on the first interaction after a cooldown
pub const RECONCILIATION_BONUS: f64 = 1.5;

/// Escalated multiplier when the return happens soon after the cooldown
pub const RECONCILIATION_FAST_BONUS: f64 = 2.0;

/// Window (days) for the escalated reconciliation bonus
pub const RECONCILIATION_FAST_DAYS: i64 = 7;

/// Bounded history sizes on the relationship record
pub const SIGNAL_HISTORY_MAX: usize = 64;
pub const BREAKTHROUGH_EVENTS_MAX: usize = 16;

/// CAS retry bound for stage transitions
pub const STAGE_CAS_MAX_RETRIES: u32 = 4;

// =============================================================================
// PORT REGISTRY / CIRCUIT BREAKER
// =============================================================================

/// Consecutive failures before a port's breaker opens
pub const CB_FAILURE_THRESHOLD: u32 = 3;

/// Seconds a breaker stays open before allowing a half-open probe
pub const CB_RECOVERY_SECONDS: u64 = 300;

/// Default per-port search timeout when the adapter declares none
pub const PORT_DEFAULT_TIMEOUT_SECS: f64 = 1.5;

// =============================================================================
// RECALL PLANNING
// =============================================================================

/// Fixed latency cost (ms) of the always-on baseline routes
pub const PLAN_CORE_COST_MS: u32 = 120;

/// Default recall latency budget when the caller supplies none
pub const DEFAULT_RECALL_BUDGET_MS: u32 = 800;

/// Default top-k for recall fan-out
pub const DEFAULT_RECALL_TOP_K: usize = 6;

// =============================================================================
// RETENTION / CONSOLIDATION
// =============================================================================

/// Days a non-quarantined atom is kept under the standard policy
pub const RETENTION_STANDARD_DAYS: i64 = 365;

/// Days under the short-lived policy
pub const RETENTION_SHORT_DAYS: i64 = 30;

/// Minimum graph-edge strength kept by graph maintenance
pub const GRAPH_EDGE_MIN_STRENGTH: f32 = 0.05;

/// Consolidator run records kept in the run log
pub const RUN_LOG_MAX_ENTRIES: usize = 365;
