//! Circuit-breaker-wrapped adapter registry with parallel fan-out
//!
//! Every active adapter is searched concurrently under its own timeout;
//! one slow or failing adapter never blocks the others. Each task's
//! failure is captured as a typed outcome and counted against that
//! adapter's breaker only.

use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::{PORT_SEARCH_DURATION, PORT_SEARCH_TOTAL};

use super::circuit::{CircuitBreaker, CircuitState};
use super::port::{MemoryCapability, MemoryPort, PortOutcome, SearchHit};

pub struct RegisteredPort {
    pub port: Arc<dyn MemoryPort>,
    pub breaker: CircuitBreaker,
    pub enabled: AtomicBool,
}

/// Snapshot of one adapter's health for planning and probes
#[derive(Debug, Clone, Serialize)]
pub struct PortHealth {
    pub name: String,
    pub section: String,
    pub priority: u8,
    pub enabled: bool,
    pub breaker_state: String,
    pub healthy: bool,
    pub capabilities: Vec<MemoryCapability>,
}

/// Aggregated fan-out result
#[derive(Debug, Default)]
pub struct FanoutResult {
    /// Hits keyed by port name
    pub sections: HashMap<String, Vec<SearchHit>>,
    /// Per-port typed outcome, including skips and failures
    pub outcomes: HashMap<String, PortOutcome>,
}

#[derive(Default)]
pub struct PortRegistry {
    ports: RwLock<Vec<Arc<RegisteredPort>>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, port: Arc<dyn MemoryPort>) {
        let breaker = CircuitBreaker::new(port.name());
        self.register_with_breaker(port, breaker);
    }

    /// Register with a caller-supplied breaker (tests shorten the
    /// recovery window this way)
    pub fn register_with_breaker(&self, port: Arc<dyn MemoryPort>, breaker: CircuitBreaker) {
        let name = port.name();
        let registered = Arc::new(RegisteredPort {
            breaker,
            port,
            enabled: AtomicBool::new(true),
        });
        let mut ports = self.ports.write();
        ports.retain(|p| p.port.name() != name);
        ports.push(registered);
        ports.sort_by_key(|p| p.port.priority());
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) {
        for p in self.ports.read().iter() {
            if p.port.name() == name {
                p.enabled.store(enabled, Ordering::Relaxed);
            }
        }
    }

    /// Enabled, non-tripped adapters in priority order
    pub fn get_active_ports(&self) -> Vec<Arc<RegisteredPort>> {
        self.ports
            .read()
            .iter()
            .filter(|p| p.enabled.load(Ordering::Relaxed) && p.breaker.is_callable())
            .cloned()
            .collect()
    }

    /// Every registered adapter regardless of health (GDPR deletion must
    /// attempt even tripped backends)
    pub fn all_ports(&self) -> Vec<Arc<RegisteredPort>> {
        self.ports.read().iter().cloned().collect()
    }

    pub fn health_snapshot(&self) -> Vec<PortHealth> {
        self.ports
            .read()
            .iter()
            .map(|p| {
                let state = p.breaker.state();
                let enabled = p.enabled.load(Ordering::Relaxed);
                PortHealth {
                    name: p.port.name().to_string(),
                    section: p.port.section_name().to_string(),
                    priority: p.port.priority(),
                    enabled,
                    breaker_state: state.to_string(),
                    healthy: enabled && state == CircuitState::Closed,
                    capabilities: p.port.capabilities(),
                }
            })
            .collect()
    }

    /// Search every active adapter concurrently, each under its own
    /// timeout. Restricting to `only` (port names) applies a route plan.
    pub async fn search_all(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
        only: Option<&[String]>,
    ) -> FanoutResult {
        let candidates: Vec<Arc<RegisteredPort>> = self
            .get_active_ports()
            .into_iter()
            .filter(|p| {
                only.map(|names| names.iter().any(|n| n == p.port.name()))
                    .unwrap_or(true)
            })
            .collect();

        let tasks = candidates.into_iter().map(|registered| {
            let query = query.to_string();
            let user_id = user_id.to_string();
            async move {
                let name = registered.port.name().to_string();

                if !registered.breaker.begin_call() {
                    PORT_SEARCH_TOTAL
                        .with_label_values(&[&name, "skipped_open"])
                        .inc();
                    return (name, PortOutcome::SkippedOpen, Vec::new());
                }

                let timeout = Duration::from_secs_f64(registered.port.timeout_seconds());
                let started = std::time::Instant::now();
                let result =
                    tokio::time::timeout(timeout, registered.port.search(&query, &user_id, top_k))
                        .await;
                let elapsed = started.elapsed();
                PORT_SEARCH_DURATION
                    .with_label_values(&[&name])
                    .observe(elapsed.as_secs_f64());

                match result {
                    Ok(Ok(hits)) => {
                        registered.breaker.on_success();
                        PORT_SEARCH_TOTAL.with_label_values(&[&name, "ok"]).inc();
                        (name, PortOutcome::Ok { hits: hits.len() }, hits)
                    }
                    Ok(Err(e)) => {
                        registered.breaker.on_failure();
                        PORT_SEARCH_TOTAL.with_label_values(&[&name, "error"]).inc();
                        tracing::warn!(port = %name, "adapter search failed: {e}");
                        (
                            name,
                            PortOutcome::Error {
                                message: e.to_string(),
                            },
                            Vec::new(),
                        )
                    }
                    Err(_) => {
                        // Timeout counts as a breaker failure but degrades
                        // to an empty contribution, never a request failure
                        registered.breaker.on_failure();
                        PORT_SEARCH_TOTAL
                            .with_label_values(&[&name, "timeout"])
                            .inc();
                        tracing::warn!(port = %name, "adapter search timed out");
                        (
                            name,
                            PortOutcome::Timeout {
                                elapsed_ms: elapsed.as_millis() as u64,
                            },
                            Vec::new(),
                        )
                    }
                }
            }
        });

        let mut result = FanoutResult::default();
        for (name, outcome, hits) in join_all(tasks).await {
            if !hits.is_empty() {
                result.sections.insert(name.clone(), hits);
            }
            result.outcomes.insert(name, outcome);
        }
        result
    }

    /// Best-effort materialization into every write-capable active port.
    /// Returns successful external refs keyed by port name; failures are
    /// logged, counted against the breaker, and otherwise swallowed.
    pub async fn write_all(&self, atom: &crate::atom::MemoryAtom) -> HashMap<String, String> {
        let candidates: Vec<Arc<RegisteredPort>> = self
            .get_active_ports()
            .into_iter()
            .filter(|p| p.port.supports_write())
            .collect();

        let tasks = candidates.into_iter().map(|registered| {
            let atom = atom.clone();
            async move {
                let name = registered.port.name().to_string();
                if !registered.breaker.begin_call() {
                    return (name, None);
                }
                let timeout = Duration::from_secs_f64(registered.port.timeout_seconds());
                match tokio::time::timeout(timeout, registered.port.write(&atom)).await {
                    Ok(Ok(reference)) => {
                        registered.breaker.on_success();
                        (name, reference)
                    }
                    Ok(Err(e)) => {
                        registered.breaker.on_failure();
                        tracing::warn!(port = %name, "materialization failed: {e}");
                        (name, None)
                    }
                    Err(_) => {
                        registered.breaker.on_failure();
                        tracing::warn!(port = %name, "materialization timed out");
                        (name, None)
                    }
                }
            }
        });

        join_all(tasks)
            .await
            .into_iter()
            .filter_map(|(name, reference)| reference.map(|r| (name, r)))
            .collect()
    }

    /// Run every registered port's maintenance hook. Per-port failures
    /// are logged and contribute zero; maintenance never aborts.
    pub async fn maintain_all(&self) -> u64 {
        let ports = self.all_ports();
        let tasks = ports.into_iter().map(|registered| async move {
            let name = registered.port.name();
            let timeout = Duration::from_secs_f64(registered.port.timeout_seconds().max(5.0));
            match tokio::time::timeout(timeout, registered.port.maintain()).await {
                Ok(Ok(count)) => count,
                Ok(Err(e)) => {
                    tracing::warn!(port = %name, "maintenance failed: {e}");
                    0
                }
                Err(_) => {
                    tracing::warn!(port = %name, "maintenance timed out");
                    0
                }
            }
        });
        join_all(tasks).await.into_iter().sum()
    }

    /// Reset all breaker state (test isolation)
    pub fn reset_health(&self) {
        for p in self.ports.read().iter() {
            p.breaker.reset();
            p.enabled.store(true, Ordering::Relaxed);
        }
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.ports.write().clear();
    }
}
