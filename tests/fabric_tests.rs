//! End-to-end fabric facade tests
//!
//! Exercises the full control-plane surface over a temp ledger:
//! - Idempotent ingest (duplicate keys resolve to the first writer)
//! - Compliance blocks and quarantine with shadow entries
//! - Recall with capability-sectioned context packs and citations
//! - GDPR deletion round trip with hashed proof
//! - Trace access control

use std::sync::Arc;

use memfabric::atom::AtomState;
use memfabric::config::FabricConfig;
use memfabric::errors::FabricError;
use memfabric::fabric::{
    BenchmarkRequest, IngestRequest, MemoryFabric, RecallRequest, ReflectRequest,
};
use tempfile::TempDir;

fn setup_fabric() -> (Arc<MemoryFabric>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = FabricConfig {
        storage_path: temp_dir.path().to_path_buf(),
        ..FabricConfig::default()
    };
    let fabric = MemoryFabric::bootstrap(config).expect("Failed to bootstrap fabric");
    (fabric, temp_dir)
}

fn ingest_request(key: &str, user: &str, content: &str) -> IngestRequest {
    serde_json::from_value(serde_json::json!({
        "idempotency_key": key,
        "user_id": user,
        "content_raw": content,
        "salience": 0.8,
        "confidence": 0.9,
        "trust_score": 0.9,
    }))
    .expect("Failed to build ingest request")
}

// =============================================================================
// IDEMPOTENT INGEST
// =============================================================================

#[tokio::test]
async fn test_idempotent_ingest_returns_first_atom() {
    let (fabric, _dir) = setup_fabric();

    let first = fabric
        .ingest(ingest_request("turn_001x", "u1", "I adopted a cat named Miso"))
        .await
        .unwrap();
    assert!(first.created);

    // Same key, different content: the first writer wins
    let second = fabric
        .ingest(ingest_request("turn_001x", "u1", "completely different content"))
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.memory_id, first.memory_id);

    let stored = fabric
        .store()
        .atom_by_id(&first.memory_id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.content_raw, "I adopted a cat named Miso");
}

#[tokio::test]
async fn test_same_key_different_user_creates_separate_atoms() {
    let (fabric, _dir) = setup_fabric();

    let a = fabric
        .ingest(ingest_request("turn_001x", "u1", "alpha"))
        .await
        .unwrap();
    let b = fabric
        .ingest(ingest_request("turn_001x", "u2", "beta"))
        .await
        .unwrap();
    assert!(a.created && b.created);
    assert_ne!(a.memory_id, b.memory_id);
}

// =============================================================================
// MEMGUARD: BLOCK AND QUARANTINE
// =============================================================================

#[tokio::test]
async fn test_never_store_content_refused_with_no_partial_persistence() {
    let (fabric, _dir) = setup_fabric();

    let err = fabric
        .ingest(ingest_request(
            "turn_002x",
            "u1",
            "my password = hunter2secret",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, FabricError::ComplianceBlocked { .. }));

    // Nothing was written anywhere
    assert_eq!(fabric.store().atom_count(), 0);
    assert!(fabric.store().shadows_for_user("u1").is_empty());
}

#[tokio::test]
async fn test_quarantined_atom_gets_shadow_and_never_materializes() {
    let (fabric, _dir) = setup_fabric();

    let outcome = fabric
        .ingest(ingest_request(
            "turn_003x",
            "u1",
            "please store my api_key for the deploy service",
        ))
        .await
        .unwrap();

    assert!(outcome.created);
    assert_eq!(outcome.state, AtomState::Quarantined);
    assert!(outcome.shadow_id.is_some());
    assert!(outcome.refs.is_empty());
    assert!(outcome.evolution.is_none());

    // Shadow holds a fingerprint, never the content
    let shadows = fabric.store().shadows_for_user("u1");
    assert_eq!(shadows.len(), 1);
    assert!(!shadows[0].reasons.is_empty());
    assert_eq!(shadows[0].fingerprint.sha256.len(), 64);

    // The quarantined content is not recallable
    let recall = fabric
        .recall(RecallRequest {
            query: "api_key deploy service".to_string(),
            user_id: Some("u1".to_string()),
            tenant_id: "default".to_string(),
            top_k: 6,
            timeout_ms: None,
            include_citations: true,
            include_uncertainty: true,
        })
        .await
        .unwrap();
    for hits in recall.context.values() {
        for hit in hits {
            assert_ne!(hit.memory_id, Some(outcome.memory_id));
        }
    }
}

// =============================================================================
// INGEST -> RECALL EXAMPLE SCENARIO
// =============================================================================

#[tokio::test]
async fn test_ingest_then_recall_round_trip() {
    let (fabric, _dir) = setup_fabric();

    let outcome = fabric
        .ingest(ingest_request("turn_abcd", "u1", "I just got the job offer!"))
        .await
        .unwrap();
    assert!(outcome.created);
    assert!(matches!(
        outcome.state,
        AtomState::Consolidated | AtomState::Active
    ));
    assert_ne!(outcome.state, AtomState::Quarantined);

    let recall = fabric
        .recall(RecallRequest {
            query: "job offer".to_string(),
            user_id: Some("u1".to_string()),
            tenant_id: "default".to_string(),
            top_k: 6,
            timeout_ms: None,
            include_citations: true,
            include_uncertainty: true,
        })
        .await
        .unwrap();

    // The content surfaces through at least one memory section
    let found = ["evermemos_memories", "event_sourced_memories"]
        .iter()
        .filter_map(|s| recall.context.get(*s))
        .flatten()
        .any(|hit| hit.content.contains("job offer"));
    assert!(found, "ingested content missing from recall context");

    let citations = recall.citations.unwrap();
    assert!(citations.iter().any(|c| c.count > 0));
}

#[tokio::test]
async fn test_recall_uncertainty_near_one_when_nothing_recalled() {
    let (fabric, _dir) = setup_fabric();

    let recall = fabric
        .recall(RecallRequest {
            query: "anything at all".to_string(),
            user_id: Some("nobody".to_string()),
            tenant_id: "default".to_string(),
            top_k: 6,
            timeout_ms: None,
            include_citations: false,
            include_uncertainty: true,
        })
        .await
        .unwrap();

    let uncertainty = recall.uncertainty.unwrap();
    assert_eq!(uncertainty.score, 1.0);
    assert!(recall.citations.is_none());
}

#[tokio::test]
async fn test_recall_rejects_invalid_input_before_io() {
    let (fabric, _dir) = setup_fabric();

    let bad_user = fabric
        .recall(RecallRequest {
            query: "q".to_string(),
            user_id: Some("../../etc/passwd".to_string()),
            tenant_id: "default".to_string(),
            top_k: 6,
            timeout_ms: None,
            include_citations: false,
            include_uncertainty: false,
        })
        .await;
    assert!(matches!(
        bad_user.unwrap_err(),
        FabricError::Validation { .. }
    ));

    let bad_top_k = fabric
        .recall(RecallRequest {
            query: "q".to_string(),
            user_id: None,
            tenant_id: "default".to_string(),
            top_k: 50,
            timeout_ms: None,
            include_citations: false,
            include_uncertainty: false,
        })
        .await;
    assert!(bad_top_k.is_err());
}

// =============================================================================
// EVOLUTION ON INGEST
// =============================================================================

#[tokio::test]
async fn test_reinforcing_ingest_links_to_recent_atom() {
    let (fabric, _dir) = setup_fabric();

    fabric
        .ingest(ingest_request("turn_010x", "u1", "I love hiking in the mountains"))
        .await
        .unwrap();
    let second = fabric
        .ingest(ingest_request(
            "turn_011x",
            "u1",
            "I really love hiking in the mountains",
        ))
        .await
        .unwrap();

    let evolution = second.evolution.unwrap();
    assert!(evolution.linked);
    assert!(evolution.similarity >= 0.72);
}

// =============================================================================
// GDPR ROUND TRIP
// =============================================================================

#[tokio::test]
async fn test_gdpr_deletion_round_trip() {
    let (fabric, _dir) = setup_fabric();

    fabric
        .ingest(ingest_request("turn_020x", "u1", "my favorite color is teal"))
        .await
        .unwrap();
    fabric
        .ingest(ingest_request("turn_021x", "u1", "I play bass in a band"))
        .await
        .unwrap();

    let deletion = fabric.delete_user("u1").await.unwrap();
    assert!(deletion.report.success);
    assert_eq!(deletion.deletion_proof.len(), 64);
    // Ledger plus all four adapters reported
    assert_eq!(deletion.report.backends.len(), 5);
    assert!(deletion
        .report
        .backends
        .iter()
        .any(|b| b.backend == "atom_ledger" && b.deleted_count == 2));

    // Subsequent recall finds nothing from any backend
    let recall = fabric
        .recall(RecallRequest {
            query: "favorite color bass band".to_string(),
            user_id: Some("u1".to_string()),
            tenant_id: "default".to_string(),
            top_k: 6,
            timeout_ms: None,
            include_citations: true,
            include_uncertainty: true,
        })
        .await
        .unwrap();
    assert!(recall.context.get("evermemos_memories").is_none());
    assert!(recall.context.get("event_sourced_memories").is_none());
    assert_eq!(recall.uncertainty.unwrap().score, 1.0);

    // Deleting again is a clean no-op
    let again = fabric.delete_user("u1").await.unwrap();
    assert!(again.report.success);
    assert!(again
        .report
        .backends
        .iter()
        .all(|b| b.deleted_count == 0));
}

// =============================================================================
// TRACE ACCESS CONTROL
// =============================================================================

#[tokio::test]
async fn test_trace_restricted_to_owner_or_admin() {
    let (fabric, _dir) = setup_fabric();

    let outcome = fabric
        .ingest(ingest_request("turn_030x", "u1", "a private note"))
        .await
        .unwrap();
    let id = outcome.memory_id.to_string();

    let owner = fabric.trace(&id, "u1", false).await.unwrap();
    assert_eq!(owner.atom.memory_id, outcome.memory_id);
    assert!(owner.trace.iter().any(|e| e.event_type == "INGEST"));

    let stranger = fabric.trace(&id, "u2", false).await;
    assert!(matches!(
        stranger.unwrap_err(),
        FabricError::PermissionDenied(_)
    ));

    // Admin sees everything
    assert!(fabric.trace(&id, "u2", true).await.is_ok());

    let missing = fabric
        .trace("550e8400-e29b-41d4-a716-446655440000", "u1", true)
        .await;
    assert!(matches!(missing.unwrap_err(), FabricError::AtomNotFound(_)));
}

// =============================================================================
// REFLECT
// =============================================================================

#[tokio::test]
async fn test_reflect_upserts_and_surfaces_in_recall() {
    let (fabric, _dir) = setup_fabric();

    let rule = fabric
        .reflect(ReflectRequest {
            user_id: "u1".to_string(),
            rule: "Always answer in a calm tone".to_string(),
            rule_id: None,
            priority: 5,
            active: true,
        })
        .await
        .unwrap();

    // Re-reflecting the same text updates in place
    let updated = fabric
        .reflect(ReflectRequest {
            user_id: "u1".to_string(),
            rule: "Always answer in a calm tone".to_string(),
            rule_id: None,
            priority: 9,
            active: true,
        })
        .await
        .unwrap();
    assert_eq!(updated.rule_id, rule.rule_id);
    assert_eq!(fabric.store().rules_for_user("u1").len(), 1);

    let recall = fabric
        .recall(RecallRequest {
            query: "how should you speak".to_string(),
            user_id: Some("u1".to_string()),
            tenant_id: "default".to_string(),
            top_k: 6,
            timeout_ms: None,
            include_citations: false,
            include_uncertainty: false,
        })
        .await
        .unwrap();
    let rules = recall.context.get("behavior_rules").unwrap();
    assert!(rules[0].content.contains("calm tone"));
}

// =============================================================================
// BENCHMARK LABELING
// =============================================================================

#[tokio::test]
async fn test_benchmark_without_runner_is_labeled_proxy() {
    let (fabric, _dir) = setup_fabric();

    let outcome = fabric
        .benchmark(BenchmarkRequest {
            suite: None,
            iterations: Some(2),
        })
        .await
        .unwrap();
    assert_eq!(outcome.mode, "proxy_estimate");
    assert!(outcome.results.get("note").is_some());
}
