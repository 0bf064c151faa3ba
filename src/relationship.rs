//! Relationship stage engine
//!
//! One record per (tenant, user): an accumulated affinity score and a
//! discrete stage. Stages move upward only through scoring (CAS'd against
//! the previously-read version) and downward only through time-based
//! cooling. Cooling rules are explicit stage pairs, not a decrement:
//! soulmate cools to close, close to familiar, familiar to acquaintance,
//! and acquaintance is a terminal floor that never cools further.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::atom::AtomStore;
use crate::constants::{
    BREAKTHROUGH_EVENTS_MAX, COOLING_SCORE_DECAY, RECONCILIATION_BONUS,
    RECONCILIATION_FAST_BONUS, RECONCILIATION_FAST_DAYS, SIGNAL_HISTORY_MAX,
    STAGE_ACQUAINTANCE, STAGE_CAS_MAX_RETRIES, STAGE_CLOSE, STAGE_FAMILIAR, STAGE_SOULMATE,
};
use crate::errors::{FabricError, Result};

/// Discrete relationship stages, strictly ordered
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStage {
    #[default]
    Stranger,
    Acquaintance,
    Familiar,
    Close,
    Soulmate,
}

impl RelationshipStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stranger => "stranger",
            Self::Acquaintance => "acquaintance",
            Self::Familiar => "familiar",
            Self::Close => "close",
            Self::Soulmate => "soulmate",
        }
    }

    /// Days of inactivity after which this stage cools. Stranger and
    /// acquaintance never cool.
    pub fn inactivity_threshold_days(&self) -> Option<i64> {
        match self {
            Self::Soulmate => Some(60),
            Self::Close => Some(30),
            Self::Familiar => Some(14),
            Self::Acquaintance | Self::Stranger => None,
        }
    }

    /// Explicit cooldown pairs. Not a decrement: the target is named per
    /// stage, and acquaintance is the floor.
    pub fn cooldown_target(&self) -> Option<RelationshipStage> {
        match self {
            Self::Soulmate => Some(Self::Close),
            Self::Close => Some(Self::Familiar),
            Self::Familiar => Some(Self::Acquaintance),
            Self::Acquaintance | Self::Stranger => None,
        }
    }
}

/// One scored interaction signal, bounded history on the record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub timestamp: DateTime<Utc>,
    pub weight: f64,
}

/// A notable moment worth keeping on the record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakthroughEvent {
    pub timestamp: DateTime<Utc>,
    pub label: String,
}

/// Persistent relationship record, CAS'd on `version`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub tenant_id: String,
    pub user_id: String,
    pub stage: RelationshipStage,
    pub accumulated_score: f64,
    pub total_conversations: u64,
    pub total_days_active: u32,
    pub last_interaction: Option<DateTime<Utc>>,
    pub last_active_date: Option<NaiveDate>,
    pub stage_entered_at: DateTime<Utc>,
    pub cooling_warned: bool,
    pub cooled_from_stage: Option<RelationshipStage>,
    pub cooled_at: Option<DateTime<Utc>>,
    /// Calendar-day idempotency marker for the cooling batch
    pub last_cooling_date: Option<NaiveDate>,
    pub signal_history: VecDeque<SignalRecord>,
    pub breakthrough_events: VecDeque<BreakthroughEvent>,
    pub version: u64,
}

impl Relationship {
    pub fn new(tenant_id: &str, user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            stage: RelationshipStage::Stranger,
            accumulated_score: 0.0,
            total_conversations: 0,
            total_days_active: 0,
            last_interaction: None,
            last_active_date: None,
            stage_entered_at: now,
            cooling_warned: false,
            cooled_from_stage: None,
            cooled_at: None,
            last_cooling_date: None,
            signal_history: VecDeque::new(),
            breakthrough_events: VecDeque::new(),
            version: 0,
        }
    }
}

/// Deterministic stage function: the highest stage whose score AND
/// active-day thresholds are both met.
pub fn stage_for(accumulated_score: f64, days_active: u32) -> RelationshipStage {
    let thresholds = [
        (RelationshipStage::Soulmate, STAGE_SOULMATE),
        (RelationshipStage::Close, STAGE_CLOSE),
        (RelationshipStage::Familiar, STAGE_FAMILIAR),
        (RelationshipStage::Acquaintance, STAGE_ACQUAINTANCE),
    ];
    for (stage, (score, days)) in thresholds {
        if accumulated_score >= score && days_active >= days {
            return stage;
        }
    }
    RelationshipStage::Stranger
}

/// Outcome of one cooling check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CoolingOutcome {
    /// Not eligible (active recently, floor stage, or no record)
    Unchanged,
    /// Already cooled today by another path
    AlreadyCooledToday,
    /// Nearing the threshold; warning flag set
    Warned,
    /// Demoted to the named stage
    Cooled(RelationshipStage),
}

pub struct RelationshipEngine {
    store: Arc<AtomStore>,
}

impl RelationshipEngine {
    pub fn new(store: Arc<AtomStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, tenant: &str, user: &str) -> Result<Option<Relationship>> {
        self.store
            .relationship(tenant, user)
            .map_err(FabricError::Internal)
    }

    /// Record one interaction signal and apply any warranted promotion.
    ///
    /// The whole read-compute-write runs under CAS with bounded retries;
    /// a concurrent writer forces a re-read, never a blind overwrite, so
    /// the stage can only move upward once per threshold crossing.
    pub fn record_interaction(
        &self,
        tenant: &str,
        user: &str,
        weight: f64,
        now: DateTime<Utc>,
    ) -> Result<Relationship> {
        for _ in 0..STAGE_CAS_MAX_RETRIES {
            let mut rel = self
                .store
                .relationship(tenant, user)
                .map_err(FabricError::Internal)?
                .unwrap_or_else(|| Relationship::new(tenant, user, now));
            let expected = rel.version;
            let read_stage = rel.stage;

            // Reconciliation: first interaction after a cooldown earns a
            // boosted signal, escalated for a prompt return.
            let effective_weight = match rel.cooled_at {
                Some(cooled_at)
                    if rel.last_interaction.map(|t| t <= cooled_at).unwrap_or(true) =>
                {
                    let bonus = if (now - cooled_at).num_days() <= RECONCILIATION_FAST_DAYS {
                        RECONCILIATION_FAST_BONUS
                    } else {
                        RECONCILIATION_BONUS
                    };
                    rel.cooled_at = None; // bonus is one-shot
                    weight * bonus
                }
                _ => weight,
            };

            rel.accumulated_score += effective_weight;
            rel.total_conversations += 1;
            rel.last_interaction = Some(now);
            rel.cooling_warned = false;

            let today = now.date_naive();
            if rel.last_active_date != Some(today) {
                rel.total_days_active += 1;
                rel.last_active_date = Some(today);
            }

            rel.signal_history.push_front(SignalRecord {
                timestamp: now,
                weight: effective_weight,
            });
            rel.signal_history.truncate(SIGNAL_HISTORY_MAX);

            // Promotion is monotonic: only ever raise the stage, and only
            // to what the deterministic stage function warrants.
            let computed = stage_for(rel.accumulated_score, rel.total_days_active);
            if computed > read_stage {
                rel.stage = computed;
                rel.stage_entered_at = now;
                rel.breakthrough_events.push_front(BreakthroughEvent {
                    timestamp: now,
                    label: format!("stage_advanced_to_{}", computed.as_str()),
                });
                rel.breakthrough_events.truncate(BREAKTHROUGH_EVENTS_MAX);
            }

            if self
                .store
                .write_relationship_if_version(&rel, expected)
                .map_err(FabricError::Internal)?
            {
                rel.version = expected + 1;
                return Ok(rel);
            }
            // Version moved under us: re-read and recompute
        }

        Err(FabricError::Conflict {
            resource: format!("relationship:{user}"),
            detail: "stage CAS retries exhausted".to_string(),
        })
    }

    /// Apply the time-based cooling rule for one user. Idempotent per
    /// calendar day via `last_cooling_date`, so the nightly batch and a
    /// real-time path cannot both cool the same user on one day.
    pub fn apply_cooling(
        &self,
        tenant: &str,
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<CoolingOutcome> {
        for _ in 0..STAGE_CAS_MAX_RETRIES {
            let Some(mut rel) = self
                .store
                .relationship(tenant, user)
                .map_err(FabricError::Internal)?
            else {
                return Ok(CoolingOutcome::Unchanged);
            };
            let expected = rel.version;

            let Some(threshold_days) = rel.stage.inactivity_threshold_days() else {
                return Ok(CoolingOutcome::Unchanged);
            };
            let Some(last) = rel.last_interaction else {
                return Ok(CoolingOutcome::Unchanged);
            };

            let idle_days = (now - last).num_days();
            let today = now.date_naive();

            if idle_days <= threshold_days {
                // Near the threshold: set the warning flag once
                if idle_days * 5 >= threshold_days * 4 && !rel.cooling_warned {
                    rel.cooling_warned = true;
                    if self
                        .store
                        .write_relationship_if_version(&rel, expected)
                        .map_err(FabricError::Internal)?
                    {
                        return Ok(CoolingOutcome::Warned);
                    }
                    continue;
                }
                return Ok(CoolingOutcome::Unchanged);
            }

            if rel.last_cooling_date == Some(today) {
                return Ok(CoolingOutcome::AlreadyCooledToday);
            }

            let Some(target) = rel.stage.cooldown_target() else {
                return Ok(CoolingOutcome::Unchanged);
            };

            rel.cooled_from_stage = Some(rel.stage);
            rel.stage = target;
            rel.stage_entered_at = now;
            rel.cooled_at = Some(now);
            rel.last_cooling_date = Some(today);
            rel.cooling_warned = false;
            rel.accumulated_score *= 1.0 - COOLING_SCORE_DECAY;

            if self
                .store
                .write_relationship_if_version(&rel, expected)
                .map_err(FabricError::Internal)?
            {
                tracing::debug!(stage = target.as_str(), "relationship cooled");
                return Ok(CoolingOutcome::Cooled(target));
            }
        }

        Err(FabricError::Conflict {
            resource: format!("relationship:{user}"),
            detail: "cooling CAS retries exhausted".to_string(),
        })
    }

    /// Whether a cooling demotion would apply right now. Dry-run probe
    /// for the consolidator; performs no writes.
    pub fn cooling_eligible(&self, tenant: &str, user: &str, now: DateTime<Utc>) -> Result<bool> {
        let Some(rel) = self
            .store
            .relationship(tenant, user)
            .map_err(FabricError::Internal)?
        else {
            return Ok(false);
        };
        let Some(threshold_days) = rel.stage.inactivity_threshold_days() else {
            return Ok(false);
        };
        let Some(last) = rel.last_interaction else {
            return Ok(false);
        };
        Ok((now - last).num_days() > threshold_days
            && rel.last_cooling_date != Some(now.date_naive()))
    }

    /// Current stage, defaulting to stranger when no record exists
    pub fn stage_of(&self, tenant: &str, user: &str) -> RelationshipStage {
        self.get(tenant, user)
            .ok()
            .flatten()
            .map(|r| r.stage)
            .unwrap_or_default()
    }
}
