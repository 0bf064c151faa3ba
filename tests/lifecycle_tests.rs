//! Relationship staging, decay and consolidation lifecycle tests
//!
//! Covers the batch side of the fabric against a temp ledger:
//! - Stage promotion thresholds and monotonicity
//! - Cooling pairs, calendar-day idempotency and reconciliation bonus
//! - Decay monotonicity, suppression and the flashbulb exemption
//! - Retention pruning keeping quarantined atoms
//! - Consolidator run records

use std::sync::Arc;

use chrono::{Duration, Utc};
use memfabric::atom::{
    AffectSnapshot, AtomState, AtomStore, MemoryAtom, MemoryKind, Modality, RetentionPolicy,
};
use memfabric::consolidator::{Consolidator, TaskStatus};
use memfabric::decay::DecayProcessor;
use memfabric::ports::PortRegistry;
use memfabric::relationship::{
    CoolingOutcome, Relationship, RelationshipEngine, RelationshipStage,
};
use memfabric::uuid::Uuid;
use tempfile::TempDir;

fn setup_store() -> (Arc<AtomStore>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(AtomStore::open(temp_dir.path()).expect("Failed to open store"));
    (store, temp_dir)
}

fn test_atom(user: &str, content: &str, age_days: i64) -> MemoryAtom {
    let ingest_time = Utc::now() - Duration::days(age_days);
    MemoryAtom {
        memory_id: Uuid::new_v4(),
        idempotency_key: None,
        tenant_id: "t0".to_string(),
        user_id: user.to_string(),
        agent_id: None,
        session_id: None,
        event_time: ingest_time,
        ingest_time,
        source: "chat".to_string(),
        modality: Modality::Text,
        memory_type: MemoryKind::Episode,
        content_raw: content.to_string(),
        content_norm: MemoryAtom::normalize(content),
        entities: vec![],
        relations: vec![],
        affect: None,
        salience: 0.8,
        confidence: 0.8,
        trust_score: 0.8,
        provenance: "test".to_string(),
        retention_policy: RetentionPolicy::Standard,
        pii_tags: vec![],
        vector_ref: None,
        graph_ref: None,
        block_ref: None,
        state: AtomState::Active,
        recall_strength: 0.8,
        flashbulb: false,
        version: 0,
    }
}

/// Seed a relationship record in a specific state
fn seed_relationship(
    store: &AtomStore,
    user: &str,
    stage: RelationshipStage,
    score: f64,
    days_active: u32,
    idle_days: i64,
) {
    let now = Utc::now();
    let mut rel = Relationship::new("t0", user, now);
    rel.stage = stage;
    rel.accumulated_score = score;
    rel.total_days_active = days_active;
    rel.last_interaction = Some(now - Duration::days(idle_days));
    assert!(store.write_relationship_if_version(&rel, 0).unwrap());
}

// =============================================================================
// STAGE PROMOTION
// =============================================================================

#[test]
fn test_stage_stays_stranger_below_thresholds() {
    let (store, _dir) = setup_store();
    let engine = RelationshipEngine::new(Arc::clone(&store));

    for _ in 0..5 {
        engine.record_interaction("t0", "u1", 1.0, Utc::now()).unwrap();
    }
    let rel = engine.get("t0", "u1").unwrap().unwrap();
    assert_eq!(rel.stage, RelationshipStage::Stranger);
    assert_eq!(rel.total_conversations, 5);
    // One calendar day of activity no matter how many interactions
    assert_eq!(rel.total_days_active, 1);
}

#[test]
fn test_promotion_lands_exactly_on_familiar_never_skipping() {
    let (store, _dir) = setup_store();
    let engine = RelationshipEngine::new(Arc::clone(&store));

    // Just below the familiar threshold with plenty of active days
    seed_relationship(&store, "u1", RelationshipStage::Acquaintance, 49.0, 10, 1);

    let rel = engine.record_interaction("t0", "u1", 2.0, Utc::now()).unwrap();
    assert_eq!(rel.stage, RelationshipStage::Familiar);
    assert!(rel
        .breakthrough_events
        .front()
        .unwrap()
        .label
        .contains("familiar"));
}

#[test]
fn test_scoring_path_never_demotes() {
    let (store, _dir) = setup_store();
    let engine = RelationshipEngine::new(Arc::clone(&store));

    // Stage above what the score warrants: the increment path leaves it
    seed_relationship(&store, "u1", RelationshipStage::Close, 10.0, 5, 1);
    let rel = engine.record_interaction("t0", "u1", 1.0, Utc::now()).unwrap();
    assert_eq!(rel.stage, RelationshipStage::Close);
}

// =============================================================================
// COOLING
// =============================================================================

#[test]
fn test_cooling_demotes_one_named_stage_and_decays_score() {
    let (store, _dir) = setup_store();
    let engine = RelationshipEngine::new(Arc::clone(&store));

    seed_relationship(&store, "u1", RelationshipStage::Close, 200.0, 40, 40);

    let outcome = engine.apply_cooling("t0", "u1", Utc::now()).unwrap();
    assert_eq!(outcome, CoolingOutcome::Cooled(RelationshipStage::Familiar));

    let rel = engine.get("t0", "u1").unwrap().unwrap();
    assert_eq!(rel.stage, RelationshipStage::Familiar);
    assert_eq!(rel.cooled_from_stage, Some(RelationshipStage::Close));
    assert!((rel.accumulated_score - 180.0).abs() < 1e-9);
}

#[test]
fn test_cooling_is_idempotent_per_calendar_day() {
    let (store, _dir) = setup_store();
    let engine = RelationshipEngine::new(Arc::clone(&store));

    // Idle long past the familiar threshold too, so only the calendar
    // marker prevents a second demotion today
    seed_relationship(&store, "u1", RelationshipStage::Close, 200.0, 40, 40);

    let now = Utc::now();
    assert_eq!(
        engine.apply_cooling("t0", "u1", now).unwrap(),
        CoolingOutcome::Cooled(RelationshipStage::Familiar)
    );
    assert_eq!(
        engine.apply_cooling("t0", "u1", now).unwrap(),
        CoolingOutcome::AlreadyCooledToday
    );

    let rel = engine.get("t0", "u1").unwrap().unwrap();
    assert_eq!(rel.stage, RelationshipStage::Familiar);
    // Score decayed exactly once
    assert!((rel.accumulated_score - 180.0).abs() < 1e-9);
}

#[test]
fn test_acquaintance_is_a_terminal_floor() {
    let (store, _dir) = setup_store();
    let engine = RelationshipEngine::new(Arc::clone(&store));

    seed_relationship(&store, "u1", RelationshipStage::Acquaintance, 20.0, 5, 400);
    assert_eq!(
        engine.apply_cooling("t0", "u1", Utc::now()).unwrap(),
        CoolingOutcome::Unchanged
    );
}

#[test]
fn test_reconciliation_bonus_after_cooldown() {
    let (store, _dir) = setup_store();
    let engine = RelationshipEngine::new(Arc::clone(&store));

    seed_relationship(&store, "u1", RelationshipStage::Close, 200.0, 40, 40);
    let now = Utc::now();
    engine.apply_cooling("t0", "u1", now).unwrap();
    let before = engine.get("t0", "u1").unwrap().unwrap().accumulated_score;

    // Return within 7 days of the cooldown: 2x signal weight
    let rel = engine.record_interaction("t0", "u1", 2.0, now + Duration::days(3)).unwrap();
    assert!((rel.accumulated_score - (before + 4.0)).abs() < 1e-9);

    // The bonus is one-shot
    let rel = engine.record_interaction("t0", "u1", 2.0, now + Duration::days(4)).unwrap();
    assert!((rel.accumulated_score - (before + 6.0)).abs() < 1e-9);
}

// =============================================================================
// DECAY
// =============================================================================

#[test]
fn test_decay_monotonic_and_suppresses_weak_memories() {
    let (store, _dir) = setup_store();
    let processor = DecayProcessor::new(Arc::clone(&store));

    let fresh = test_atom("u1", "fresh memory", 5);
    let aging = test_atom("u1", "aging memory", 30);
    let ancient = test_atom("u1", "ancient memory", 90);
    let (fresh, _) = store.ingest(fresh).unwrap();
    let (aging, _) = store.ingest(aging).unwrap();
    let (ancient, _) = store.ingest(ancient).unwrap();

    let stats = processor.process_user("t0", "u1", Utc::now(), false).unwrap();
    assert_eq!(stats.processed, 3);

    let fresh = store.atom_by_id(&fresh.memory_id).unwrap().unwrap();
    let aging = store.atom_by_id(&aging.memory_id).unwrap().unwrap();
    let ancient = store.atom_by_id(&ancient.memory_id).unwrap().unwrap();

    assert!(fresh.recall_strength > aging.recall_strength);
    assert!(aging.recall_strength > ancient.recall_strength);

    // 0.8 * 0.95^90 is far below the suppression threshold
    assert!(ancient.recall_strength < 0.1);
    assert_eq!(ancient.state, AtomState::Retired);
    assert_eq!(fresh.state, AtomState::Active);
}

#[test]
fn test_flashbulb_memory_never_decays() {
    let (store, _dir) = setup_store();
    let processor = DecayProcessor::new(Arc::clone(&store));

    let mut flashbulb = test_atom("u1", "the day my daughter was born", 400);
    flashbulb.flashbulb = true;
    flashbulb.memory_type = MemoryKind::FlashbulbEpisode;
    flashbulb.affect = Some(AffectSnapshot {
        emotion: "joy".to_string(),
        intensity: 0.95,
        valence: 1.0,
        is_peak: true,
    });
    let (flashbulb, _) = store.ingest(flashbulb).unwrap();

    let stats = processor.process_user("t0", "u1", Utc::now(), false).unwrap();
    assert_eq!(stats.flashbulb_exempt, 1);

    let atom = store.atom_by_id(&flashbulb.memory_id).unwrap().unwrap();
    assert!((atom.recall_strength - atom.salience as f64).abs() < 1e-9);
    assert_eq!(atom.state, AtomState::Active);
}

#[test]
fn test_dry_run_decay_persists_nothing() {
    let (store, _dir) = setup_store();
    let processor = DecayProcessor::new(Arc::clone(&store));

    let atom = test_atom("u1", "old but untouched", 90);
    let (atom, _) = store.ingest(atom).unwrap();

    let stats = processor.process_user("t0", "u1", Utc::now(), true).unwrap();
    assert_eq!(stats.suppressed, 1);

    let stored = store.atom_by_id(&atom.memory_id).unwrap().unwrap();
    assert_eq!(stored.state, AtomState::Active);
    assert!((stored.recall_strength - 0.8).abs() < 1e-9);
}

// =============================================================================
// RETENTION
// =============================================================================

#[test]
fn test_retention_prunes_expired_but_keeps_quarantined() {
    let (store, _dir) = setup_store();

    let expired = test_atom("u1", "long forgotten", 400);
    let mut quarantined = test_atom("u1", "risky but held for forensics", 400);
    quarantined.state = AtomState::Quarantined;
    let recent = test_atom("u1", "still fresh", 5);

    let (expired, _) = store.ingest(expired).unwrap();
    let (quarantined, _) = store.ingest(quarantined).unwrap();
    let (recent, _) = store.ingest(recent).unwrap();

    let outcome = store.retention_prune(Utc::now()).unwrap();
    assert_eq!(outcome.pruned, 1);
    assert_eq!(outcome.quarantined_kept, 1);

    assert!(store.atom_by_id(&expired.memory_id).unwrap().is_none());
    assert!(store.atom_by_id(&quarantined.memory_id).unwrap().is_some());
    assert!(store.atom_by_id(&recent.memory_id).unwrap().is_some());
}

// =============================================================================
// CONSOLIDATOR
// =============================================================================

#[tokio::test]
async fn test_consolidator_cools_decays_and_logs_one_record() {
    let (store, _dir) = setup_store();
    let registry = Arc::new(PortRegistry::new());
    let consolidator = Consolidator::new(Arc::clone(&store), registry);

    seed_relationship(&store, "u1", RelationshipStage::Familiar, 60.0, 12, 20);
    store.ingest(test_atom("u1", "an old memory", 90)).unwrap();

    let record = consolidator.run(Utc::now(), false).await.unwrap();

    let cooling = record.task("relationship_cooling").unwrap();
    assert_eq!(cooling.status, TaskStatus::Ok);
    assert_eq!(cooling.counters.get("cooled"), Some(&1));

    let decay = record.task("memory_decay").unwrap();
    assert_eq!(decay.counters.get("processed"), Some(&1));
    assert_eq!(decay.counters.get("suppressed"), Some(&1));

    // Running again the same day: cooling is a no-op via the marker
    let second = consolidator.run(Utc::now(), false).await.unwrap();
    assert_eq!(
        second.task("relationship_cooling").unwrap().counters.get("cooled"),
        Some(&0)
    );
}
