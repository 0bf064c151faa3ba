//! Nightly consolidator - batch maintenance orchestration
//!
//! A fixed-order task list: relationship cooling, memory decay, graph
//! maintenance, retention pruning, then calendar-gated digests. Each task
//! runs inside its own failure boundary; an error is recorded with
//! `status=error` and the remaining tasks still run. Every cycle appends
//! one aggregate run record to the ledger: task statuses, elapsed time
//! and numeric counters only, never a user identifier.

use chrono::{DateTime, Datelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::atom::AtomStore;
use crate::decay::DecayProcessor;
use crate::errors::Result;
use crate::metrics::CONSOLIDATOR_TASKS_TOTAL;
use crate::ports::PortRegistry;
use crate::relationship::{CoolingOutcome, RelationshipEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Ok,
    Error,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Ok => "ok",
            TaskStatus::Error => "error",
            TaskStatus::Skipped => "skipped",
        }
    }
}

/// One task's outcome within a run. Counters are aggregate and PII-free.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReport {
    pub task: String,
    pub status: TaskStatus,
    pub elapsed_ms: u64,
    pub counters: BTreeMap<String, u64>,
    pub error: Option<String>,
}

/// Aggregate record appended to the run log after every cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidationRunRecord {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub dry_run: bool,
    pub tasks: Vec<TaskReport>,
}

impl ConsolidationRunRecord {
    pub fn task(&self, name: &str) -> Option<&TaskReport> {
        self.tasks.iter().find(|t| t.task == name)
    }
}

pub struct Consolidator {
    store: Arc<AtomStore>,
    registry: Arc<PortRegistry>,
    relationships: RelationshipEngine,
    decay: DecayProcessor,
}

/// Run one task body inside its failure boundary
fn run_task<F>(name: &str, body: F) -> TaskReport
where
    F: FnOnce() -> anyhow::Result<BTreeMap<String, u64>>,
{
    let started = Instant::now();
    let report = match body() {
        Ok(counters) => TaskReport {
            task: name.to_string(),
            status: TaskStatus::Ok,
            elapsed_ms: started.elapsed().as_millis() as u64,
            counters,
            error: None,
        },
        Err(e) => {
            tracing::error!(task = name, "consolidator task failed: {e}");
            TaskReport {
                task: name.to_string(),
                status: TaskStatus::Error,
                elapsed_ms: started.elapsed().as_millis() as u64,
                counters: BTreeMap::new(),
                error: Some(e.to_string()),
            }
        }
    };
    CONSOLIDATOR_TASKS_TOTAL
        .with_label_values(&[name, report.status.as_str()])
        .inc();
    report
}

fn skipped_task(name: &str, reason: &str) -> TaskReport {
    CONSOLIDATOR_TASKS_TOTAL
        .with_label_values(&[name, "skipped"])
        .inc();
    TaskReport {
        task: name.to_string(),
        status: TaskStatus::Skipped,
        elapsed_ms: 0,
        counters: BTreeMap::new(),
        error: Some(reason.to_string()),
    }
}

impl Consolidator {
    pub fn new(store: Arc<AtomStore>, registry: Arc<PortRegistry>) -> Self {
        Self {
            relationships: RelationshipEngine::new(Arc::clone(&store)),
            decay: DecayProcessor::new(Arc::clone(&store)),
            store,
            registry,
        }
    }

    /// One full maintenance cycle. Dry runs compute what they can without
    /// persisting and skip the destructive tasks outright.
    pub async fn run(&self, now: DateTime<Utc>, dry_run: bool) -> Result<ConsolidationRunRecord> {
        let started = Instant::now();
        let mut tasks = Vec::new();

        tasks.push(self.cooling_task(now, dry_run));
        tasks.push(self.decay_task(now, dry_run));
        tasks.push(self.graph_maintenance_task(dry_run).await);
        tasks.push(self.retention_task(now, dry_run));
        tasks.push(self.digest_task(now));

        let record = ConsolidationRunRecord {
            started_at: now,
            elapsed_ms: started.elapsed().as_millis() as u64,
            dry_run,
            tasks,
        };

        if let Err(e) = self.store.append_run_record(&record) {
            tracing::error!("failed to append consolidation run record: {e}");
        }

        tracing::info!(
            elapsed_ms = record.elapsed_ms,
            dry_run,
            tasks_ok = record
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Ok)
                .count(),
            tasks_error = record
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Error)
                .count(),
            "consolidation cycle complete"
        );

        Ok(record)
    }

    fn cooling_task(&self, now: DateTime<Utc>, dry_run: bool) -> TaskReport {
        run_task("relationship_cooling", || {
            let mut counters = BTreeMap::new();
            let mut cooled = 0u64;
            let mut warned = 0u64;
            let mut eligible = 0u64;
            let mut scanned = 0u64;

            for (tenant, user) in self.store.user_scopes() {
                scanned += 1;
                if dry_run {
                    if self.relationships.cooling_eligible(&tenant, &user, now)? {
                        eligible += 1;
                    }
                    continue;
                }
                match self.relationships.apply_cooling(&tenant, &user, now)? {
                    CoolingOutcome::Cooled(_) => cooled += 1,
                    CoolingOutcome::Warned => warned += 1,
                    CoolingOutcome::AlreadyCooledToday | CoolingOutcome::Unchanged => {}
                }
            }

            counters.insert("scanned".to_string(), scanned);
            if dry_run {
                counters.insert("would_cool".to_string(), eligible);
            } else {
                counters.insert("cooled".to_string(), cooled);
                counters.insert("warned".to_string(), warned);
            }
            Ok(counters)
        })
    }

    fn decay_task(&self, now: DateTime<Utc>, dry_run: bool) -> TaskReport {
        run_task("memory_decay", || {
            let stats = self.decay.process_all(now, dry_run)?;
            let mut counters = BTreeMap::new();
            counters.insert("processed".to_string(), stats.processed);
            counters.insert("suppressed".to_string(), stats.suppressed);
            counters.insert("flashbulb_exempt".to_string(), stats.flashbulb_exempt);
            counters.insert("quarantined_skipped".to_string(), stats.quarantined_skipped);
            Ok(counters)
        })
    }

    async fn graph_maintenance_task(&self, dry_run: bool) -> TaskReport {
        if dry_run {
            return skipped_task("graph_maintenance", "dry_run");
        }
        let started = Instant::now();
        let pruned = self.registry.maintain_all().await;
        let mut counters = BTreeMap::new();
        counters.insert("pruned".to_string(), pruned);
        CONSOLIDATOR_TASKS_TOTAL
            .with_label_values(&["graph_maintenance", "ok"])
            .inc();
        TaskReport {
            task: "graph_maintenance".to_string(),
            status: TaskStatus::Ok,
            elapsed_ms: started.elapsed().as_millis() as u64,
            counters,
            error: None,
        }
    }

    fn retention_task(&self, now: DateTime<Utc>, dry_run: bool) -> TaskReport {
        if dry_run {
            return skipped_task("retention_pruning", "dry_run");
        }
        run_task("retention_pruning", || {
            let outcome = self.store.retention_prune(now)?;
            let mut counters = BTreeMap::new();
            counters.insert("scanned".to_string(), outcome.scanned);
            counters.insert("pruned".to_string(), outcome.pruned);
            counters.insert("quarantined_kept".to_string(), outcome.quarantined_kept);
            Ok(counters)
        })
    }

    /// Weekly digest (Sundays) with a monthly section on the first of the
    /// month. Aggregate counts only.
    fn digest_task(&self, now: DateTime<Utc>) -> TaskReport {
        if now.weekday() != Weekday::Sun && now.day() != 1 {
            return skipped_task("digest", "not_scheduled");
        }
        run_task("digest", || {
            let mut counters = BTreeMap::new();
            counters.insert("total_atoms".to_string(), self.store.atom_count());
            counters.insert(
                "user_scopes".to_string(),
                self.store.user_scopes().len() as u64,
            );
            if now.day() == 1 {
                counters.insert("monthly".to_string(), 1);
            }
            Ok(counters)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (Consolidator, Arc<AtomStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(AtomStore::open(dir.path()).unwrap());
        let registry = Arc::new(PortRegistry::new());
        (
            Consolidator::new(Arc::clone(&store), registry),
            store,
            dir,
        )
    }

    #[tokio::test]
    async fn test_empty_run_completes_all_tasks() {
        let (consolidator, store, _dir) = setup();
        let record = consolidator.run(Utc::now(), false).await.unwrap();
        assert_eq!(record.tasks.len(), 5);
        assert!(record.task("relationship_cooling").is_some());
        assert!(record.task("memory_decay").is_some());
        assert!(record.task("retention_pruning").is_some());

        // The run record landed in the append-only log
        let records: Vec<ConsolidationRunRecord> = store.run_records(10);
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_skips_destructive_tasks() {
        let (consolidator, _store, _dir) = setup();
        let record = consolidator.run(Utc::now(), true).await.unwrap();
        assert!(record.dry_run);
        assert_eq!(
            record.task("retention_pruning").unwrap().status,
            TaskStatus::Skipped
        );
        assert_eq!(
            record.task("graph_maintenance").unwrap().status,
            TaskStatus::Skipped
        );
        // Decay still computes, without persisting
        assert_eq!(record.task("memory_decay").unwrap().status, TaskStatus::Ok);
    }

    #[test]
    fn test_task_failure_is_isolated() {
        let report = run_task("exploding", || Err(anyhow::anyhow!("backend fell over")));
        assert_eq!(report.status, TaskStatus::Error);
        assert!(report.error.unwrap().contains("fell over"));
    }

    #[test]
    fn test_run_record_is_pii_free() {
        let record = ConsolidationRunRecord {
            started_at: Utc::now(),
            elapsed_ms: 12,
            dry_run: false,
            tasks: vec![run_task("noop", || Ok(BTreeMap::new()))],
        };
        let json = serde_json::to_string(&record).unwrap();
        // Counters and statuses only: no user identifier fields exist
        assert!(!json.contains("user_id"));
    }
}
