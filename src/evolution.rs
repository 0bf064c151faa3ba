//! Evolution engine - on-write similarity linking
//!
//! Every new atom is compared against the caller-supplied recent window.
//! The best match above the similarity threshold is classified as either
//! a reinforcement or a conflict, the new atom's confidence/trust are
//! adjusted, and a typed relation edge is appended onto the new atom.
//! This is intra-atom metadata, not a separate graph write.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::atom::{MemoryAtom, RelationEdge, RelationKind};
use crate::constants::{
    CONFLICT_CONFIDENCE_CAP, CONFLICT_TRUST_PENALTY, EVOLUTION_SIMILARITY_THRESHOLD,
    REINFORCE_CONFIDENCE_BOOST, REINFORCE_TRUST_BOOST,
};
use crate::similarity::text_similarity;

lazy_static! {
    /// Explicit contrastive markers that flip a near-duplicate into a conflict
    static ref CONTRASTIVE: Regex = Regex::new(
        r"(?i)\b(but|actually|no longer|not anymore|instead|changed my mind|used to)\b"
    )
    .unwrap();

    /// Negation tokens for polarity comparison
    static ref NEGATION: Regex =
        Regex::new(r"(?i)\b(not|no|never|don't|doesn't|didn't|won't|can't|isn't|aren't)\b")
            .unwrap();
}

/// Result of linking one new atom against the recent window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionOutcome {
    pub linked: bool,
    pub relation: Option<RelationKind>,
    pub target_memory_id: Option<Uuid>,
    pub similarity: f32,
    /// Adjusted confidence for the new atom
    pub confidence: f32,
    /// Adjusted trust score for the new atom
    pub trust_score: f32,
}

/// Negation polarity: whether the text carries an odd number of negators.
/// "I like sushi" vs "I don't like sushi" differ; "I never don't call"
/// cancels back out.
fn negation_polarity(text: &str) -> bool {
    NEGATION.find_iter(text).count() % 2 == 1
}

fn is_conflict(new_norm: &str, old_norm: &str) -> bool {
    if negation_polarity(new_norm) != negation_polarity(old_norm) {
        return true;
    }
    CONTRASTIVE.is_match(new_norm)
}

/// Link a new atom against its recent window and adjust its scores.
/// Mutates `atom` in place (relation edge + confidence/trust) and
/// returns the outcome for the caller's response payload.
pub fn evolve(atom: &mut MemoryAtom, recent: &[MemoryAtom]) -> EvolutionOutcome {
    let mut best: Option<(f32, &MemoryAtom)> = None;

    for candidate in recent {
        if candidate.memory_id == atom.memory_id {
            continue;
        }
        let score = text_similarity(&atom.content_norm, &candidate.content_norm);
        if score >= EVOLUTION_SIMILARITY_THRESHOLD
            && best.map(|(s, _)| score > s).unwrap_or(true)
        {
            best = Some((score, candidate));
        }
    }

    let Some((similarity, target)) = best else {
        return EvolutionOutcome {
            linked: false,
            relation: None,
            target_memory_id: None,
            similarity: 0.0,
            confidence: atom.confidence,
            trust_score: atom.trust_score,
        };
    };

    let relation = if is_conflict(&atom.content_norm, &target.content_norm) {
        atom.confidence = atom.confidence.min(CONFLICT_CONFIDENCE_CAP);
        atom.trust_score = (atom.trust_score - CONFLICT_TRUST_PENALTY).max(0.0);
        RelationKind::Conflicts
    } else {
        atom.confidence = (atom.confidence + REINFORCE_CONFIDENCE_BOOST).min(1.0);
        atom.trust_score = (atom.trust_score + REINFORCE_TRUST_BOOST).min(1.0);
        RelationKind::Reinforces
    };

    atom.relations.push(RelationEdge {
        kind: relation,
        target_memory_id: target.memory_id,
        confidence: similarity,
    });

    EvolutionOutcome {
        linked: true,
        relation: Some(relation),
        target_memory_id: Some(target.memory_id),
        similarity,
        confidence: atom.confidence,
        trust_score: atom.trust_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{AtomState, MemoryKind, Modality, RetentionPolicy};
    use chrono::Utc;

    fn atom(content: &str, confidence: f32, trust: f32) -> MemoryAtom {
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
            content_raw: content.to_string(),
            content_norm: MemoryAtom::normalize(content),
            entities: vec![],
            relations: vec![],
            affect: None,
            salience: 0.5,
            confidence,
            trust_score: trust,
            provenance: "test".to_string(),
            retention_policy: RetentionPolicy::Standard,
            pii_tags: vec![],
            vector_ref: None,
            graph_ref: None,
            block_ref: None,
            state: AtomState::Raw,
            recall_strength: 0.5,
            flashbulb: false,
            version: 0,
        }
    }

    #[test]
    fn test_no_link_below_threshold() {
        let mut new = atom("I started learning the violin", 0.8, 0.8);
        let recent = vec![atom("the deploy failed again on friday", 0.8, 0.8)];
        let outcome = evolve(&mut new, &recent);
        assert!(!outcome.linked);
        assert!(new.relations.is_empty());
        assert_eq!(new.confidence, 0.8);
    }

    #[test]
    fn test_reinforcement_boosts_scores() {
        let mut new = atom("I really love hiking in the mountains", 0.8, 0.8);
        let recent = vec![atom("I really love hiking in the mountains lately", 0.8, 0.8)];
        let outcome = evolve(&mut new, &recent);
        assert!(outcome.linked);
        assert_eq!(outcome.relation, Some(RelationKind::Reinforces));
        assert!((new.confidence - 0.85).abs() < 1e-6);
        assert!((new.trust_score - 0.83).abs() < 1e-6);
        assert_eq!(new.relations.len(), 1);
    }

    #[test]
    fn test_negation_mismatch_is_conflict() {
        let mut new = atom("I don't like hiking in the mountains", 0.9, 0.9);
        let recent = vec![atom("I like hiking in the mountains", 0.9, 0.9)];
        let outcome = evolve(&mut new, &recent);
        assert!(outcome.linked);
        assert_eq!(outcome.relation, Some(RelationKind::Conflicts));
        assert!(new.confidence <= CONFLICT_CONFIDENCE_CAP);
        assert!((new.trust_score - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_contrastive_marker_is_conflict() {
        let mut new = atom("actually I moved to the city of Berlin now", 0.9, 0.9);
        let recent = vec![atom("I moved to the city of Berlin", 0.9, 0.9)];
        let outcome = evolve(&mut new, &recent);
        if outcome.linked {
            assert_eq!(outcome.relation, Some(RelationKind::Conflicts));
        }
    }

    #[test]
    fn test_caps_hold() {
        let mut new = atom("my favorite color is dark forest green", 0.98, 0.99);
        let recent = vec![atom("my favorite color is dark forest green", 0.9, 0.9)];
        evolve(&mut new, &recent);
        assert!(new.confidence <= 1.0);
        assert!(new.trust_score <= 1.0);
    }
}
