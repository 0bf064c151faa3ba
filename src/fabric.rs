//! Memory fabric facade - the single entry point for the control plane
//!
//! Owns the atom ledger, the port registry, the planner and the batch
//! engines, and composes them into the request-level operations: ingest,
//! recall, consolidate, reflect, delete_user, trace and benchmark. No
//! global singletons: everything the handlers need hangs off this struct,
//! and `reset_for_tests` restores a clean slate without process restart.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::atom::{
    AffectSnapshot, AtomState, AtomStore, BehaviorRule, MemoryAtom, MemoryKind, Modality,
    RetentionPolicy, TraceEvent,
};
use crate::config::FabricConfig;
use crate::consolidator::{ConsolidationRunRecord, Consolidator};
use crate::constants::EVOLUTION_RECENT_WINDOW;
use crate::decay::{DecayProcessor, DecayStats};
use crate::deletion::{DeletionReport, DeletionService};
use crate::errors::{FabricError, Result, ValidationErrorExt};
use crate::evolution::{self, EvolutionOutcome};
use crate::memguard::{self, GuardAction, GuardVerdict};
use crate::metrics::{INGEST_DURATION, INGEST_TOTAL, RECALL_DURATION, RECALL_TOTAL};
use crate::planner::{
    classify_complexity, CapabilityPlanner, CapabilityProvider, CoverageReport, RecallRoutePlan,
};
use crate::ports::adapters::{
    DocumentLedgerPort, EntityMemoryPort, GraphMemoryPort, VectorStorePort,
};
use crate::ports::{MemoryCapability, PortOutcome, PortRegistry, SearchHit};
use crate::relationship::{CoolingOutcome, RelationshipEngine, RelationshipStage};
use crate::validation;

fn default_tenant() -> String {
    "default".to_string()
}

fn default_source() -> String {
    "chat".to_string()
}

fn default_half() -> f32 {
    0.5
}

fn default_top_k() -> usize {
    crate::constants::DEFAULT_RECALL_TOP_K
}

fn default_true() -> bool {
    true
}

// =============================================================================
// Operation request/response types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub idempotency_key: String,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
    pub user_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// When the remembered event happened; defaults to ingest time
    #[serde(default)]
    pub event_time: Option<DateTime<Utc>>,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub modality: Modality,
    #[serde(default)]
    pub memory_type: MemoryKind,
    pub content_raw: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub affect: Option<AffectSnapshot>,
    #[serde(default = "default_half")]
    pub salience: f32,
    #[serde(default = "default_half")]
    pub confidence: f32,
    #[serde(default = "default_half")]
    pub trust_score: f32,
    #[serde(default)]
    pub provenance: String,
    #[serde(default)]
    pub retention_policy: RetentionPolicy,
    #[serde(default)]
    pub pii_tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestOutcome {
    pub memory_id: Uuid,
    pub state: AtomState,
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow_id: Option<Uuid>,
    pub memguard: GuardVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evolution: Option<EvolutionOutcome>,
    /// External refs from successful materialization, keyed by port
    pub refs: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecallRequest {
    pub query: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub timeout_ms: Option<u32>,
    #[serde(default = "default_true")]
    pub include_citations: bool,
    #[serde(default = "default_true")]
    pub include_uncertainty: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub backend: String,
    pub count: usize,
}

/// Concentration-based recall confidence heuristic: near 1.0 when nothing
/// came back, lower as more sources contribute more evenly.
#[derive(Debug, Clone, Serialize)]
pub struct UncertaintyReport {
    pub score: f64,
    pub recalled: usize,
    pub sources: usize,
    pub concentration: f64,
}

#[derive(Debug, Serialize)]
pub struct RecallOutcome {
    pub relationship_stage: RelationshipStage,
    pub plan: RecallRoutePlan,
    /// Context pack keyed by capability section name
    pub context: BTreeMap<String, Vec<SearchHit>>,
    /// Per-port typed fan-out outcome, including timeouts and skips
    pub outcomes: HashMap<String, PortOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<UncertaintyReport>,
}

#[derive(Debug, Serialize)]
pub struct ScopedConsolidation {
    pub user_id: String,
    pub dry_run: bool,
    pub decay: DecayStats,
    pub cooling: Vec<CoolingOutcome>,
    pub graph_pruned: u64,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ConsolidateOutcome {
    Scoped(ScopedConsolidation),
    Full(ConsolidationRunRecord),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReflectRequest {
    pub user_id: String,
    pub rule: String,
    #[serde(default)]
    pub rule_id: Option<Uuid>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Serialize)]
pub struct DeletionOutcome {
    pub report: DeletionReport,
    pub deletion_proof: String,
}

#[derive(Debug, Serialize)]
pub struct TraceOutcome {
    pub atom: MemoryAtom,
    pub trace: Vec<TraceEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BenchmarkRequest {
    #[serde(default)]
    pub suite: Option<String>,
    #[serde(default)]
    pub iterations: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct BenchmarkOutcome {
    /// "real" (external runner) or "proxy_estimate" - proxy numbers are
    /// never presented as real suite results
    pub mode: String,
    pub suite: String,
    pub results: serde_json::Value,
}

// =============================================================================
// The facade
// =============================================================================

pub struct MemoryFabric {
    config: FabricConfig,
    store: Arc<AtomStore>,
    registry: Arc<PortRegistry>,
    planner: CapabilityPlanner,
    relationships: Arc<RelationshipEngine>,
    consolidator: Consolidator,
    deletion: DeletionService,
}

impl MemoryFabric {
    /// Open the ledger and wire the engines; no adapters registered yet.
    pub fn open(config: FabricConfig) -> Result<Self> {
        let store = Arc::new(AtomStore::open(&config.storage_path).map_err(FabricError::Internal)?);
        let registry = Arc::new(PortRegistry::new());
        Ok(Self {
            planner: CapabilityPlanner::new(config.strict_coverage),
            relationships: Arc::new(RelationshipEngine::new(Arc::clone(&store))),
            consolidator: Consolidator::new(Arc::clone(&store), Arc::clone(&registry)),
            deletion: DeletionService::new(Arc::clone(&store), Arc::clone(&registry)),
            store,
            registry,
            config,
        })
    }

    /// Open and register the default in-process adapter set.
    pub fn bootstrap(config: FabricConfig) -> Result<Arc<Self>> {
        let fabric = Arc::new(Self::open(config)?);
        fabric.registry.register(Arc::new(VectorStorePort::new()));
        fabric
            .registry
            .register(Arc::new(DocumentLedgerPort::new(Arc::clone(&fabric.store))));
        fabric.registry.register(Arc::new(EntityMemoryPort::new()));
        fabric.registry.register(Arc::new(GraphMemoryPort::new()));
        Ok(fabric)
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<AtomStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<PortRegistry> {
        &self.registry
    }

    /// Planning-time provider table: registered ports plus the intrinsic
    /// engines that live inside the fabric itself.
    pub fn providers(&self) -> Vec<CapabilityProvider> {
        let mut providers: Vec<CapabilityProvider> = self
            .registry
            .health_snapshot()
            .into_iter()
            .map(|h| CapabilityProvider {
                name: h.name,
                capabilities: h.capabilities,
                enabled: h.enabled,
                healthy: h.healthy,
            })
            .collect();
        providers.push(CapabilityProvider::intrinsic(
            "relationship_engine",
            vec![MemoryCapability::Relationship],
            true,
        ));
        providers.push(CapabilityProvider::intrinsic(
            "memguard",
            vec![MemoryCapability::Safety],
            true,
        ));
        providers.push(CapabilityProvider::intrinsic(
            "benchmark_runner",
            vec![MemoryCapability::Evaluation],
            self.config.benchmark_runner.is_some(),
        ));
        providers
    }

    pub fn coverage(&self) -> CoverageReport {
        self.planner
            .coverage_report(self.config.strict_coverage, &self.providers())
    }

    // =========================================================================
    // Ingest
    // =========================================================================

    pub async fn ingest(&self, req: IngestRequest) -> Result<IngestOutcome> {
        let timer = INGEST_DURATION.start_timer();

        validation::validate_user_id(&req.user_id).map_validation_err("user_id")?;
        validation::validate_user_id(&req.tenant_id).map_validation_err("tenant_id")?;
        validation::validate_idempotency_key(&req.idempotency_key)
            .map_validation_err("idempotency_key")?;
        validation::validate_content(&req.content_raw).map_validation_err("content_raw")?;
        validation::validate_entities(&req.entities).map_validation_err("entities")?;
        if let Some(agent) = &req.agent_id {
            validation::validate_user_id(agent).map_validation_err("agent_id")?;
        }
        let salience = validation::clamp_unit(req.salience, "salience")
            .map_validation_err("salience")?;
        let confidence = validation::clamp_unit(req.confidence, "confidence")
            .map_validation_err("confidence")?;
        let trust_score = validation::clamp_unit(req.trust_score, "trust_score")
            .map_validation_err("trust_score")?;

        let verdict = memguard::evaluate(
            &req.content_raw,
            trust_score,
            self.config.quarantine_threshold,
        );
        if verdict.action == GuardAction::Block {
            INGEST_TOTAL.with_label_values(&["blocked"]).inc();
            timer.observe_duration();
            return Err(FabricError::ComplianceBlocked {
                reasons: verdict.reasons,
            });
        }

        let store = Arc::clone(&self.store);
        let relationships = Arc::clone(&self.relationships);
        let verdict_for_write = verdict.clone();
        type IngestStep = (MemoryAtom, bool, Option<EvolutionOutcome>, Option<Uuid>);
        let (atom, created, evolution, shadow_id) =
            tokio::task::spawn_blocking(move || -> Result<IngestStep> {
                let now = Utc::now();
                let quarantined = verdict_for_write.action == GuardAction::Quarantine;

                let mut atom = MemoryAtom {
                    memory_id: Uuid::new_v4(),
                    idempotency_key: Some(req.idempotency_key.clone()),
                    tenant_id: req.tenant_id.clone(),
                    user_id: req.user_id.clone(),
                    agent_id: req.agent_id.clone(),
                    session_id: req.session_id.clone(),
                    event_time: req.event_time.unwrap_or(now),
                    ingest_time: now,
                    source: req.source.clone(),
                    modality: req.modality,
                    memory_type: req.memory_type,
                    content_raw: req.content_raw.clone(),
                    content_norm: MemoryAtom::normalize(&req.content_raw),
                    entities: req.entities.clone(),
                    relations: Vec::new(),
                    affect: req.affect.clone(),
                    salience,
                    confidence,
                    trust_score,
                    provenance: req.provenance.clone(),
                    retention_policy: req.retention_policy,
                    pii_tags: req.pii_tags.clone(),
                    vector_ref: None,
                    graph_ref: None,
                    block_ref: None,
                    state: AtomState::Raw,
                    recall_strength: salience as f64,
                    flashbulb: false,
                    version: 0,
                };

                // Flashbulb is decided once, here, and persisted
                if crate::decay::is_flashbulb(&atom) {
                    atom.flashbulb = true;
                    atom.memory_type = MemoryKind::FlashbulbEpisode;
                }

                let mut evolved = None;
                if quarantined {
                    atom.state = AtomState::Quarantined;
                } else {
                    let recent =
                        store.recent_atoms(&atom.tenant_id, &atom.user_id, EVOLUTION_RECENT_WINDOW);
                    evolved = Some(evolution::evolve(&mut atom, &recent));
                    atom.state = AtomState::Consolidated;
                }

                let (atom, created) = store.ingest(atom).map_err(FabricError::Internal)?;
                if !created {
                    return Ok((atom, false, None, None));
                }

                let mut shadow_id = None;
                if quarantined {
                    let shadow = memguard::shadow_for(&atom, &verdict_for_write);
                    shadow_id = Some(shadow.shadow_id);
                    store.put_shadow(&shadow).map_err(FabricError::Internal)?;
                    store
                        .append_trace(
                            &atom.memory_id,
                            "QUARANTINE",
                            &format!("risk={:.2}", verdict_for_write.risk_score),
                        )
                        .map_err(FabricError::Internal)?;
                } else if let Some(evo) = evolved.as_ref().filter(|e| e.linked) {
                    store
                        .append_trace(
                            &atom.memory_id,
                            "LINK",
                            &format!(
                                "relation={:?} similarity={:.2}",
                                evo.relation, evo.similarity
                            ),
                        )
                        .map_err(FabricError::Internal)?;
                }

                // Every turn is an interaction signal, weighted by how
                // salient and emotionally charged it was
                let weight = 1.0
                    + atom.salience as f64
                    + atom
                        .affect
                        .as_ref()
                        .map(|a| a.intensity as f64 * 0.5)
                        .unwrap_or(0.0);
                relationships.record_interaction(&atom.tenant_id, &atom.user_id, weight, now)?;

                Ok((atom, true, evolved, shadow_id))
            })
            .await
            .map_err(|e| FabricError::Internal(anyhow!("ingest task failed: {e}")))??;

        if !created {
            INGEST_TOTAL.with_label_values(&["duplicate"]).inc();
            timer.observe_duration();
            return Ok(IngestOutcome {
                memory_id: atom.memory_id,
                state: atom.state,
                created: false,
                shadow_id: None,
                memguard: verdict,
                evolution: None,
                refs: HashMap::new(),
            });
        }

        // Best-effort materialization: quarantined atoms never leave the
        // ledger; failures degrade to a Raw/Consolidated atom, not an error
        let mut refs = HashMap::new();
        let mut state = atom.state;
        if atom.state != AtomState::Quarantined {
            refs = self.registry.write_all(&atom).await;
            if !refs.is_empty() {
                let store = Arc::clone(&self.store);
                let memory_id = atom.memory_id;
                let refs_for_update = refs.clone();
                let updated = tokio::task::spawn_blocking(move || -> anyhow::Result<MemoryAtom> {
                    let updated = store.modify_atom(&memory_id, |a| {
                        if let Some(r) = refs_for_update.get("vector_store") {
                            a.vector_ref = Some(r.clone());
                        }
                        if let Some(r) = refs_for_update.get("graph_memory") {
                            a.graph_ref = Some(r.clone());
                        }
                        if let Some(r) = refs_for_update.get("document_ledger") {
                            a.block_ref = Some(r.clone());
                        }
                        a.state = AtomState::Active;
                    })?;
                    store.append_trace(
                        &memory_id,
                        "MATERIALIZE",
                        &format!("backends={}", refs_for_update.len()),
                    )?;
                    Ok(updated)
                })
                .await
                .map_err(|e| FabricError::Internal(anyhow!("materialize task failed: {e}")))?
                .map_err(FabricError::Internal)?;
                state = updated.state;
            }
        }

        let outcome_label = match verdict.action {
            GuardAction::Quarantine => "quarantined",
            _ => "created",
        };
        INGEST_TOTAL.with_label_values(&[outcome_label]).inc();
        timer.observe_duration();

        Ok(IngestOutcome {
            memory_id: atom.memory_id,
            state,
            created: true,
            shadow_id,
            memguard: verdict,
            evolution,
            refs,
        })
    }

    // =========================================================================
    // Recall
    // =========================================================================

    pub async fn recall(&self, req: RecallRequest) -> Result<RecallOutcome> {
        let timer = RECALL_DURATION.start_timer();

        validation::validate_query(&req.query).map_validation_err("query")?;
        validation::validate_top_k(req.top_k).map_validation_err("top_k")?;
        if let Some(timeout_ms) = req.timeout_ms {
            validation::validate_recall_timeout(timeout_ms).map_validation_err("timeout_ms")?;
        }
        if let Some(user) = &req.user_id {
            validation::validate_user_id(user).map_validation_err("user_id")?;
        }

        // Relationship stage and behavior rules come from the ledger
        let (stage, rules) = match &req.user_id {
            Some(user) => {
                let relationships = Arc::clone(&self.relationships);
                let store = Arc::clone(&self.store);
                let tenant = req.tenant_id.clone();
                let user = user.clone();
                tokio::task::spawn_blocking(move || {
                    let stage = relationships.stage_of(&tenant, &user);
                    let rules = store.rules_for_user(&user);
                    (stage, rules)
                })
                .await
                .map_err(|e| FabricError::Internal(anyhow!("recall prelude failed: {e}")))?
            }
            None => (RelationshipStage::Stranger, Vec::new()),
        };

        let budget_ms = req.timeout_ms.unwrap_or(self.config.recall_budget_ms);
        let complexity = classify_complexity(&req.query);
        let plan = self
            .planner
            .plan_recall(stage, budget_ms, complexity, &self.providers())?;

        let routes = plan.routes();
        let user_for_search = req.user_id.clone().unwrap_or_default();
        let fanout = self
            .registry
            .search_all(&req.query, &user_for_search, req.top_k, Some(&routes))
            .await;

        // Context pack keyed by capability section, captioned by source
        let section_by_port: HashMap<String, String> = self
            .registry
            .health_snapshot()
            .into_iter()
            .map(|h| (h.name, h.section))
            .collect();

        let mut context: BTreeMap<String, Vec<SearchHit>> = BTreeMap::new();
        for (port, hits) in &fanout.sections {
            let section = section_by_port
                .get(port)
                .cloned()
                .unwrap_or_else(|| port.clone());
            context.entry(section).or_default().extend(hits.clone());
        }

        if req.user_id.is_some() {
            context.insert(
                "relationship".to_string(),
                vec![SearchHit {
                    memory_id: None,
                    content: format!("relationship stage: {}", stage.as_str()),
                    score: 1.0,
                    source: "relationship_engine".to_string(),
                }],
            );
            if !rules.is_empty() {
                let rule_hits = rules
                    .iter()
                    .filter(|r| r.active)
                    .map(|r| SearchHit {
                        memory_id: None,
                        content: r.rule.clone(),
                        score: 1.0,
                        source: "behavior_rules".to_string(),
                    })
                    .collect::<Vec<_>>();
                if !rule_hits.is_empty() {
                    context.insert("behavior_rules".to_string(), rule_hits);
                }
            }
        }

        let citations = req.include_citations.then(|| {
            fanout
                .sections
                .iter()
                .map(|(port, hits)| Citation {
                    backend: port.clone(),
                    count: hits.len(),
                })
                .collect()
        });

        let uncertainty = req
            .include_uncertainty
            .then(|| uncertainty_report(&fanout.sections));

        RECALL_TOTAL
            .with_label_values(&[if fanout.sections.is_empty() {
                "empty"
            } else {
                "ok"
            }])
            .inc();
        timer.observe_duration();

        Ok(RecallOutcome {
            relationship_stage: stage,
            plan,
            context,
            outcomes: fanout.outcomes,
            citations,
            uncertainty,
        })
    }

    // =========================================================================
    // Consolidate
    // =========================================================================

    /// Scoped to one user: a synchronous decay + cooling + maintenance
    /// pass. Unscoped: the full nightly task list.
    pub async fn consolidate(
        &self,
        user_id: Option<String>,
        dry_run: bool,
    ) -> Result<ConsolidateOutcome> {
        self.planner.require_coverage(&self.providers())?;

        let now = Utc::now();
        let Some(user) = user_id else {
            let record = self.consolidator.run(now, dry_run).await?;
            return Ok(ConsolidateOutcome::Full(record));
        };

        validation::validate_user_id(&user).map_validation_err("user_id")?;

        let store = Arc::clone(&self.store);
        let relationships = Arc::clone(&self.relationships);
        let decay = DecayProcessor::new(Arc::clone(&self.store));
        let user_for_task = user.clone();
        let (decay_stats, cooling) =
            tokio::task::spawn_blocking(move || -> Result<(DecayStats, Vec<CoolingOutcome>)> {
                let mut total = DecayStats::default();
                let mut cooling = Vec::new();
                for (tenant, scoped_user) in store.user_scopes() {
                    if scoped_user != user_for_task {
                        continue;
                    }
                    let stats = decay.process_user(&tenant, &scoped_user, now, dry_run)?;
                    total.processed += stats.processed;
                    total.suppressed += stats.suppressed;
                    total.flashbulb_exempt += stats.flashbulb_exempt;
                    total.quarantined_skipped += stats.quarantined_skipped;

                    if !dry_run {
                        cooling.push(relationships.apply_cooling(&tenant, &scoped_user, now)?);
                    }
                }
                Ok((total, cooling))
            })
            .await
            .map_err(|e| FabricError::Internal(anyhow!("consolidate task failed: {e}")))??;

        let graph_pruned = if dry_run {
            0
        } else {
            self.registry.maintain_all().await
        };

        Ok(ConsolidateOutcome::Scoped(ScopedConsolidation {
            user_id: user,
            dry_run,
            decay: decay_stats,
            cooling,
            graph_pruned,
        }))
    }

    // =========================================================================
    // Reflect
    // =========================================================================

    /// Upsert a durable behavioral rule for a user. Re-reflecting the
    /// same rule text updates it in place instead of duplicating.
    pub async fn reflect(&self, req: ReflectRequest) -> Result<BehaviorRule> {
        validation::validate_user_id(&req.user_id).map_validation_err("user_id")?;
        if req.rule.trim().is_empty() || req.rule.len() > 2000 {
            return Err(FabricError::Validation {
                field: "rule".to_string(),
                reason: "rule must be 1-2000 chars".to_string(),
            });
        }

        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || -> Result<BehaviorRule> {
            let rule_id = req.rule_id.or_else(|| {
                let normalized = MemoryAtom::normalize(&req.rule);
                store
                    .rules_for_user(&req.user_id)
                    .into_iter()
                    .find(|r| MemoryAtom::normalize(&r.rule) == normalized)
                    .map(|r| r.rule_id)
            });

            let rule = BehaviorRule {
                rule_id: rule_id.unwrap_or_else(Uuid::new_v4),
                user_id: req.user_id,
                rule: req.rule,
                priority: req.priority,
                active: req.active,
                updated_at: Utc::now(),
            };
            store.upsert_rule(&rule).map_err(FabricError::Internal)?;
            Ok(rule)
        })
        .await
        .map_err(|e| FabricError::Internal(anyhow!("reflect task failed: {e}")))?
    }

    // =========================================================================
    // GDPR deletion
    // =========================================================================

    pub async fn delete_user(&self, user_id: &str) -> Result<DeletionOutcome> {
        validation::validate_user_id(user_id).map_validation_err("user_id")?;
        let (report, deletion_proof) = self.deletion.delete_user(user_id).await?;
        self.store.reset_caches();
        Ok(DeletionOutcome {
            report,
            deletion_proof,
        })
    }

    // =========================================================================
    // Trace
    // =========================================================================

    /// The atom plus its full audit chain. Only the owning user or an
    /// admin may read it.
    pub async fn trace(
        &self,
        memory_id: &str,
        requester: &str,
        admin: bool,
    ) -> Result<TraceOutcome> {
        let memory_id = validation::validate_memory_id(memory_id)
            .map_err(|e| FabricError::InvalidMemoryId(e.to_string()))?;
        validation::validate_user_id(requester).map_validation_err("user_id")?;

        let store = Arc::clone(&self.store);
        let requester = requester.to_string();
        tokio::task::spawn_blocking(move || -> Result<TraceOutcome> {
            let atom = store
                .atom_by_id(&memory_id)
                .map_err(FabricError::Internal)?
                .ok_or_else(|| FabricError::AtomNotFound(memory_id.to_string()))?;

            if !admin && atom.user_id != requester {
                return Err(FabricError::PermissionDenied(
                    "trace access is restricted to the atom owner".to_string(),
                ));
            }

            let trace = store.trace_for(&memory_id);
            Ok(TraceOutcome { atom, trace })
        })
        .await
        .map_err(|e| FabricError::Internal(anyhow!("trace task failed: {e}")))?
    }

    // =========================================================================
    // Benchmark
    // =========================================================================

    /// Run the configured external evaluation suite, or a clearly-labeled
    /// in-process proxy estimate when no runner is deployed.
    pub async fn benchmark(&self, req: BenchmarkRequest) -> Result<BenchmarkOutcome> {
        let suite = req.suite.unwrap_or_else(|| "recall_latency".to_string());

        if let Some(runner) = &self.config.benchmark_runner {
            let output = tokio::process::Command::new(runner)
                .arg("--suite")
                .arg(&suite)
                .output()
                .await
                .map_err(|e| FabricError::Internal(anyhow!("benchmark runner failed: {e}")))?;
            if !output.status.success() {
                return Err(FabricError::Internal(anyhow!(
                    "benchmark runner exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr)
                )));
            }
            let results: serde_json::Value = serde_json::from_slice(&output.stdout)
                .map_err(|e| FabricError::Serialization(e.to_string()))?;
            return Ok(BenchmarkOutcome {
                mode: "real".to_string(),
                suite,
                results,
            });
        }

        // Proxy: time real fan-outs against the live registry. Honest
        // about what it is - latency of this deployment, not suite scores.
        let iterations = req.iterations.unwrap_or(8).clamp(1, 32);
        let mut total_ms = 0.0f64;
        let mut max_ms = 0.0f64;
        for i in 0..iterations {
            let started = std::time::Instant::now();
            let _ = self
                .registry
                .search_all(&format!("benchmark probe {i}"), "benchmark-probe", 4, None)
                .await;
            let elapsed = started.elapsed().as_secs_f64() * 1000.0;
            total_ms += elapsed;
            if elapsed > max_ms {
                max_ms = elapsed;
            }
        }

        Ok(BenchmarkOutcome {
            mode: "proxy_estimate".to_string(),
            suite,
            results: serde_json::json!({
                "note": "in-process fan-out latency estimate; no external evaluation runner is configured",
                "iterations": iterations,
                "avg_fanout_ms": total_ms / iterations as f64,
                "max_fanout_ms": max_ms,
                "registered_ports": self.registry.health_snapshot().len(),
            }),
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn flush(&self) -> anyhow::Result<()> {
        self.store.flush()
    }

    /// Reset breaker health and in-memory caches (test isolation)
    pub fn reset_for_tests(&self) {
        self.registry.reset_health();
        self.store.reset_caches();
    }
}

/// Herfindahl-style concentration over per-source hit counts, blended
/// with total volume: 1.0 for an empty recall, small for many hits
/// spread across many sources.
fn uncertainty_report(sections: &HashMap<String, Vec<SearchHit>>) -> UncertaintyReport {
    let counts: Vec<usize> = sections.values().map(|hits| hits.len()).collect();
    let total: usize = counts.iter().sum();

    if total == 0 {
        return UncertaintyReport {
            score: 1.0,
            recalled: 0,
            sources: 0,
            concentration: 1.0,
        };
    }

    let concentration = counts
        .iter()
        .map(|&c| {
            let share = c as f64 / total as f64;
            share * share
        })
        .sum::<f64>();
    let volume = 1.0 / (1.0 + total as f64);
    let score = ((concentration + volume) / 2.0).clamp(0.0, 1.0);

    UncertaintyReport {
        score,
        recalled: total,
        sources: counts.len(),
        concentration,
    }
}
