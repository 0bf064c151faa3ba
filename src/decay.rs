//! Memory decay processor
//!
//! Recall strength decays multiplicatively with age, slowed by three
//! protection factors: emotional intensity, repeated mention over time
//! (spacing), and knowledge-graph centrality (connection). The combined
//! protection is capped below full immunity - only the flashbulb flag
//! stops decay entirely, and that flag is set once at ingest and never
//! re-derived.
//!
//! ```text
//! emotion_protection    = intensity * EMOTION_WEIGHT
//! spacing_protection    = min(span_days / 90, 1) * 0.3
//! connection_protection = min(graph_links / 4, 1) * 0.2
//! protection            = min(sum, 0.95)
//! decay_rate            = max(base_rate * (1 - protection), floor)
//! recall_strength       = importance * (1 - decay_rate) ^ days
//! ```
//!
//! Processing is batched per user: the auxiliary indices (emotion buckets,
//! mention spans, link counts) are built once per user, not once per atom.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::atom::{AtomState, MemoryAtom};
use crate::atom::AtomStore;
use crate::constants::{
    DECAY_ABSOLUTE_FLOOR, DECAY_BASE_RATE, DECAY_CONNECTION_LINKS, DECAY_CONNECTION_WEIGHT,
    DECAY_EMOTION_WEIGHT, DECAY_PROTECTION_CAP, DECAY_SPACING_SPAN_DAYS, DECAY_SPACING_WEIGHT,
    FLASHBULB_IMPORTANCE_THRESHOLD, FLASHBULB_INTENSITY_THRESHOLD,
    RECALL_SUPPRESSION_THRESHOLD,
};
use crate::errors::{FabricError, Result};

/// Flashbulb test, applied once at ingest. All three criteria must hold.
pub fn is_flashbulb(atom: &MemoryAtom) -> bool {
    match &atom.affect {
        Some(affect) => {
            affect.is_peak
                && affect.intensity >= FLASHBULB_INTENSITY_THRESHOLD
                && atom.salience >= FLASHBULB_IMPORTANCE_THRESHOLD
        }
        None => false,
    }
}

/// Per-user auxiliary indices, preloaded once per batch
#[derive(Debug, Default)]
pub struct DecayContext {
    /// Peak emotional intensity per ingest day
    emotion_by_day: HashMap<NaiveDate, f32>,
    /// First-to-last mention span (days) per entity
    mention_span_days: HashMap<String, f64>,
    /// Distinct co-occurring entities per entity (graph centrality)
    graph_links: HashMap<String, u32>,
}

impl DecayContext {
    /// Build all three indices in one pass over the user's atoms
    pub fn from_atoms(atoms: &[MemoryAtom]) -> Self {
        let mut emotion_by_day: HashMap<NaiveDate, f32> = HashMap::new();
        let mut first_seen: HashMap<&str, DateTime<Utc>> = HashMap::new();
        let mut last_seen: HashMap<&str, DateTime<Utc>> = HashMap::new();
        let mut neighbors: HashMap<&str, std::collections::HashSet<&str>> = HashMap::new();

        for atom in atoms {
            if let Some(affect) = &atom.affect {
                let day = atom.ingest_time.date_naive();
                let entry = emotion_by_day.entry(day).or_insert(0.0);
                if affect.intensity > *entry {
                    *entry = affect.intensity;
                }
            }

            for entity in &atom.entities {
                let e = entity.as_str();
                let first = first_seen.entry(e).or_insert(atom.ingest_time);
                if atom.ingest_time < *first {
                    *first = atom.ingest_time;
                }
                let last = last_seen.entry(e).or_insert(atom.ingest_time);
                if atom.ingest_time > *last {
                    *last = atom.ingest_time;
                }

                for other in &atom.entities {
                    if other != entity {
                        neighbors.entry(e).or_default().insert(other.as_str());
                    }
                }
            }
        }

        let mention_span_days = first_seen
            .iter()
            .map(|(entity, first)| {
                let last = last_seen.get(entity).copied().unwrap_or(*first);
                let span = (last - *first).num_seconds().max(0) as f64 / 86_400.0;
                (entity.to_string(), span)
            })
            .collect();

        let graph_links = neighbors
            .into_iter()
            .map(|(entity, set)| (entity.to_string(), set.len() as u32))
            .collect();

        Self {
            emotion_by_day,
            mention_span_days,
            graph_links,
        }
    }

    fn emotion_intensity(&self, atom: &MemoryAtom) -> f64 {
        if let Some(affect) = &atom.affect {
            return affect.intensity as f64;
        }
        self.emotion_by_day
            .get(&atom.ingest_time.date_naive())
            .copied()
            .unwrap_or(0.0) as f64
    }

    fn best_span_days(&self, atom: &MemoryAtom) -> f64 {
        atom.entities
            .iter()
            .filter_map(|e| self.mention_span_days.get(e))
            .fold(0.0f64, |acc, &span| acc.max(span))
    }

    fn best_link_count(&self, atom: &MemoryAtom) -> u32 {
        atom.entities
            .iter()
            .filter_map(|e| self.graph_links.get(e))
            .copied()
            .max()
            .unwrap_or(0)
    }
}

/// Combined protection for one atom, capped below full immunity
pub fn protection_for(atom: &MemoryAtom, ctx: &DecayContext) -> f64 {
    let emotion = ctx.emotion_intensity(atom) * DECAY_EMOTION_WEIGHT;
    let spacing =
        (ctx.best_span_days(atom) / DECAY_SPACING_SPAN_DAYS).min(1.0) * DECAY_SPACING_WEIGHT;
    let connection =
        (ctx.best_link_count(atom) as f64 / DECAY_CONNECTION_LINKS).min(1.0) * DECAY_CONNECTION_WEIGHT;

    (emotion + spacing + connection).min(DECAY_PROTECTION_CAP)
}

/// The core formula. Pure; importance and protection in [0, 1].
pub fn recall_strength(importance: f64, protection: f64, days_since_created: f64) -> f64 {
    let decay_rate = (DECAY_BASE_RATE * (1.0 - protection)).max(DECAY_ABSOLUTE_FLOOR);
    importance * (1.0 - decay_rate).powf(days_since_created.max(0.0))
}

/// Aggregate, PII-free counters from one decay pass
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct DecayStats {
    pub processed: u64,
    pub suppressed: u64,
    pub flashbulb_exempt: u64,
    pub quarantined_skipped: u64,
}

pub struct DecayProcessor {
    store: Arc<AtomStore>,
}

impl DecayProcessor {
    pub fn new(store: Arc<AtomStore>) -> Self {
        Self { store }
    }

    /// Run one decay pass for a single user. Reads the user's atoms once,
    /// builds the auxiliary indices, then bulk-updates. Safe to run in
    /// parallel across users; no cross-user ordering is guaranteed.
    pub fn process_user(
        &self,
        tenant: &str,
        user: &str,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<DecayStats> {
        let atoms = self.store.atoms_for_user(tenant, user);
        let ctx = DecayContext::from_atoms(&atoms);
        let mut stats = DecayStats::default();

        for atom in &atoms {
            // Quarantined atoms are frozen for forensics - no decay, no pruning
            if atom.state == AtomState::Quarantined {
                stats.quarantined_skipped += 1;
                continue;
            }
            stats.processed += 1;

            let importance = atom.salience as f64;
            let strength = if atom.flashbulb {
                stats.flashbulb_exempt += 1;
                importance
            } else {
                recall_strength(importance, protection_for(atom, &ctx), atom.age_days(now))
            };

            let suppress =
                !atom.flashbulb && strength < RECALL_SUPPRESSION_THRESHOLD;
            if suppress {
                stats.suppressed += 1;
            }

            if dry_run {
                continue;
            }

            let changed = (atom.recall_strength - strength).abs() > 1e-9
                || (suppress && atom.state != AtomState::Retired);
            if changed {
                self.store
                    .modify_atom(&atom.memory_id, |a| {
                        a.recall_strength = strength;
                        if suppress && a.state != AtomState::Retired {
                            a.state = AtomState::Retired;
                        }
                    })
                    .map_err(FabricError::Internal)?;
            }
        }

        Ok(stats)
    }

    /// Decay pass over every user scope in the ledger
    pub fn process_all(&self, now: DateTime<Utc>, dry_run: bool) -> Result<DecayStats> {
        let mut total = DecayStats::default();
        for (tenant, user) in self.store.user_scopes() {
            let stats = self.process_user(&tenant, &user, now, dry_run)?;
            total.processed += stats.processed;
            total.suppressed += stats.suppressed;
            total.flashbulb_exempt += stats.flashbulb_exempt;
            total.quarantined_skipped += stats.quarantined_skipped;
        }
        crate::metrics::DECAY_SUPPRESSED_LAST_RUN.set(total.suppressed as i64);
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{AffectSnapshot, MemoryKind, Modality, RetentionPolicy};
    use uuid::Uuid;

    fn atom_with(salience: f32, affect: Option<AffectSnapshot>) -> MemoryAtom {
        MemoryAtom {
            memory_id: Uuid::new_v4(),
            idempotency_key: None,
            tenant_id: "t0".to_string(),
            user_id: "u1".to_string(),
            agent_id: None,
            session_id: None,
            event_time: Utc::now(),
            ingest_time: Utc::now(),
            source: "chat".to_string(),
            modality: Modality::Text,
            memory_type: MemoryKind::Episode,
            content_raw: "x".to_string(),
            content_norm: "x".to_string(),
            entities: vec![],
            relations: vec![],
            affect,
            salience,
            confidence: 0.8,
            trust_score: 0.8,
            provenance: "test".to_string(),
            retention_policy: RetentionPolicy::Standard,
            pii_tags: vec![],
            vector_ref: None,
            graph_ref: None,
            block_ref: None,
            state: AtomState::Active,
            recall_strength: salience as f64,
            flashbulb: false,
            version: 0,
        }
    }

    #[test]
    fn test_strength_strictly_decreases_without_protection() {
        let mut previous = f64::MAX;
        for days in [0.0, 1.0, 7.0, 30.0, 90.0, 365.0] {
            let strength = recall_strength(0.8, 0.0, days);
            assert!(strength < previous || days == 0.0);
            previous = strength;
        }
        // Zero-day strength equals importance
        assert!((recall_strength(0.8, 0.0, 0.0) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_protection_slows_decay() {
        let unprotected = recall_strength(0.8, 0.0, 60.0);
        let protected = recall_strength(0.8, 0.9, 60.0);
        assert!(protected > unprotected);
    }

    #[test]
    fn test_decay_rate_floor() {
        // Even at the protection cap the memory keeps decaying
        let early = recall_strength(0.8, DECAY_PROTECTION_CAP, 10.0);
        let late = recall_strength(0.8, DECAY_PROTECTION_CAP, 1000.0);
        assert!(late < early);
    }

    #[test]
    fn test_flashbulb_criteria() {
        let peak = AffectSnapshot {
            emotion: "joy".to_string(),
            intensity: 0.9,
            valence: 0.9,
            is_peak: true,
        };

        let qualifying = atom_with(0.8, Some(peak.clone()));
        assert!(is_flashbulb(&qualifying));

        // Missing any one criterion disqualifies
        let low_importance = atom_with(0.5, Some(peak.clone()));
        assert!(!is_flashbulb(&low_importance));

        let mut mild = peak.clone();
        mild.intensity = 0.5;
        assert!(!is_flashbulb(&atom_with(0.8, Some(mild))));

        let mut not_peak = peak;
        not_peak.is_peak = false;
        assert!(!is_flashbulb(&atom_with(0.8, Some(not_peak))));

        assert!(!is_flashbulb(&atom_with(0.9, None)));
    }

    #[test]
    fn test_context_spacing_and_links() {
        let mut a = atom_with(0.8, None);
        a.entities = vec!["guitar".to_string(), "band".to_string()];
        let mut b = atom_with(0.8, None);
        b.entities = vec!["guitar".to_string(), "concert".to_string()];
        b.ingest_time = a.ingest_time + chrono::Duration::days(45);

        let ctx = DecayContext::from_atoms(&[a.clone(), b]);
        // guitar mentioned across 45 days, linked to band + concert
        assert!(ctx.best_span_days(&a) > 44.0);
        assert_eq!(ctx.best_link_count(&a), 2);

        let protection = protection_for(&a, &ctx);
        assert!(protection > 0.0 && protection <= DECAY_PROTECTION_CAP);
    }
}
