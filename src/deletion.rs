//! GDPR deletion service
//!
//! Orchestrates a delete across the primary ledger and every registered
//! adapter, healthy or not. Each backend reports `{deleted_count, error}`;
//! a populated error or a count of -1 marks that backend failed and the
//! overall report as unsuccessful. A SHA-256 proof over the canonicalized
//! report is recorded in the audit trail as evidence that this specific
//! request executed with these specific backend results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::atom::AtomStore;
use crate::errors::{FabricError, Result};
use crate::metrics::DELETION_TOTAL;
use crate::ports::PortRegistry;

/// One backend's deletion result. `deleted_count == 0` with no error is a
/// valid "nothing to delete"; `-1` or an error means the backend failed
/// and may need manual remediation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendDeletion {
    pub backend: String,
    pub deleted_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackendDeletion {
    fn ok(backend: &str, deleted_count: i64) -> Self {
        Self {
            backend: backend.to_string(),
            deleted_count,
            error: None,
        }
    }

    fn failed(backend: &str, error: String) -> Self {
        Self {
            backend: backend.to_string(),
            deleted_count: -1,
            error: Some(error),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.deleted_count >= 0 && self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionReport {
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub backends: Vec<BackendDeletion>,
    pub success: bool,
}

/// Deterministic SHA-256 over the canonicalized report: backends sorted
/// by name, fields in declaration order.
pub fn deletion_proof(report: &DeletionReport) -> String {
    let mut canonical = report.clone();
    canonical.backends.sort_by(|a, b| a.backend.cmp(&b.backend));
    let json = serde_json::to_string(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct DeletionService {
    store: Arc<AtomStore>,
    registry: Arc<PortRegistry>,
}

impl DeletionService {
    pub fn new(store: Arc<AtomStore>, registry: Arc<PortRegistry>) -> Self {
        Self { store, registry }
    }

    /// Delete every record for a user across all backends and produce the
    /// hashed proof. Backend failures are recorded, never raised: the
    /// caller gets the full per-backend picture either way.
    pub async fn delete_user(&self, user_id: &str) -> Result<(DeletionReport, String)> {
        let started_at = Utc::now();
        let mut backends = Vec::new();

        // The ledger first: it is the system of record
        let store = Arc::clone(&self.store);
        let user = user_id.to_string();
        let ledger_result =
            tokio::task::spawn_blocking(move || store.delete_user_data(&user)).await;
        backends.push(match ledger_result {
            Ok(Ok(count)) => BackendDeletion::ok("atom_ledger", count as i64),
            Ok(Err(e)) => BackendDeletion::failed("atom_ledger", e.to_string()),
            Err(e) => BackendDeletion::failed("atom_ledger", e.to_string()),
        });

        // Every registered adapter, including circuit-open ones: GDPR
        // deletion must be attempted even against unhealthy backends
        for registered in self.registry.all_ports() {
            let name = registered.port.name();
            let timeout = Duration::from_secs_f64(registered.port.timeout_seconds().max(5.0));
            let result =
                tokio::time::timeout(timeout, registered.port.delete_user_data(user_id)).await;
            backends.push(match result {
                Ok(Ok(count)) => BackendDeletion::ok(name, count),
                Ok(Err(e)) => BackendDeletion::failed(name, e.to_string()),
                Err(_) => BackendDeletion::failed(name, "deletion timed out".to_string()),
            });
        }

        let success = backends.iter().all(|b| b.succeeded());
        let report = DeletionReport {
            user_id: user_id.to_string(),
            started_at,
            completed_at: Utc::now(),
            backends,
            success,
        };

        let proof = deletion_proof(&report);
        let report_json = serde_json::to_string(&report)
            .map_err(|e| FabricError::Serialization(e.to_string()))?;
        self.store
            .record_deletion_proof(user_id, &proof, &report_json)
            .map_err(FabricError::Internal)?;

        DELETION_TOTAL
            .with_label_values(&[if success { "success" } else { "partial_failure" }])
            .inc();
        if !success {
            tracing::warn!(
                failed = report.backends.iter().filter(|b| !b.succeeded()).count(),
                "user deletion completed with backend failures"
            );
        }

        Ok((report, proof))
    }
}
