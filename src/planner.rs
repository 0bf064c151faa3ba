//! Capability planner - route selection under a latency budget
//!
//! Maps {relationship stage, query complexity, latency budget} to a
//! concrete route plan. Baseline routes always run; strangers get nothing
//! deeper. For staged users the remaining budget is spent greedily over
//! extended routes in a complexity-dependent priority order, skipping
//! providers that are disabled, unhealthy or too expensive for what is
//! left.
//!
//! The same provider table drives capability coverage reporting. Strict
//! deployments fail closed: a required capability with zero healthy
//! providers refuses the whole request instead of degrading.

use serde::{Deserialize, Serialize};

use crate::constants::PLAN_CORE_COST_MS;
use crate::errors::{FabricError, Result};
use crate::ports::MemoryCapability;
use crate::relationship::RelationshipStage;

/// Planning-time view of one backend or intrinsic engine
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityProvider {
    pub name: String,
    pub capabilities: Vec<MemoryCapability>,
    pub enabled: bool,
    pub healthy: bool,
}

impl CapabilityProvider {
    pub fn intrinsic(name: &str, capabilities: Vec<MemoryCapability>, healthy: bool) -> Self {
        Self {
            name: name.to_string(),
            capabilities,
            enabled: true,
            healthy,
        }
    }

    fn available(&self) -> bool {
        self.enabled && self.healthy
    }
}

/// Coarse query complexity classes with distinct route orderings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryComplexity {
    Simple,
    Standard,
    Complex,
}

/// Classify a recall query by shape: short lookups are simple, questions
/// spanning several clauses or reasoning words are complex.
pub fn classify_complexity(query: &str) -> QueryComplexity {
    let words = query.split_whitespace().count();
    let lower = query.to_lowercase();
    let reasoning_markers = ["why", "how", "compare", "relate", "history", "change", "between"];
    let has_reasoning = reasoning_markers.iter().any(|m| lower.contains(m));
    let clauses = query.matches(" and ").count() + query.matches(',').count();

    if words > 20 || (has_reasoning && clauses >= 1) {
        QueryComplexity::Complex
    } else if words > 6 || has_reasoning {
        QueryComplexity::Standard
    } else {
        QueryComplexity::Simple
    }
}

/// Routes that always run, regardless of stage or budget
pub const BASELINE_ROUTES: &[&str] = &["vector_store", "behavior_rules", "relationship"];

/// Extended routes with their fixed latency costs (ms)
const EXTENDED_ROUTES: &[(&str, u32)] = &[
    ("document_ledger", 120),
    ("entity_memory", 150),
    ("graph_memory", 250),
];

fn route_cost(route: &str) -> u32 {
    EXTENDED_ROUTES
        .iter()
        .find(|(name, _)| *name == route)
        .map(|(_, cost)| *cost)
        .unwrap_or(0)
}

/// Extended-route priority per complexity class: simple queries favor
/// cheap lexical recall, complex queries favor graph context first.
fn route_order(complexity: QueryComplexity) -> [&'static str; 3] {
    match complexity {
        QueryComplexity::Simple => ["document_ledger", "entity_memory", "graph_memory"],
        QueryComplexity::Standard => ["entity_memory", "document_ledger", "graph_memory"],
        QueryComplexity::Complex => ["graph_memory", "entity_memory", "document_ledger"],
    }
}

/// A route that was considered but not drawn
#[derive(Debug, Clone, Serialize)]
pub struct SkippedRoute {
    pub route: String,
    pub reason: String,
}

/// The computed plan for one recall request
#[derive(Debug, Clone, Serialize)]
pub struct RecallRoutePlan {
    pub stage: RelationshipStage,
    pub complexity: QueryComplexity,
    pub baseline: Vec<String>,
    pub extended: Vec<String>,
    pub skipped: Vec<SkippedRoute>,
    pub remaining_budget_ms: u32,
}

impl RecallRoutePlan {
    /// All drawn route names, baseline first
    pub fn routes(&self) -> Vec<String> {
        self.baseline
            .iter()
            .chain(self.extended.iter())
            .cloned()
            .collect()
    }
}

/// Healthy-provider coverage for one capability
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityCoverage {
    pub capability: MemoryCapability,
    pub providers: Vec<String>,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    pub strict: bool,
    pub coverage: Vec<CapabilityCoverage>,
    /// Required capabilities with zero healthy providers
    pub missing_required: Vec<String>,
    /// Declared-but-optional capabilities with zero healthy providers
    pub missing_optional: Vec<String>,
}

impl CoverageReport {
    pub fn satisfied(&self) -> bool {
        self.missing_required.is_empty()
    }
}

pub struct CapabilityPlanner {
    strict: bool,
}

impl CapabilityPlanner {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Compute per-capability healthy-provider coverage. Base mode
    /// requires the core set; strict mode requires every declared
    /// capability.
    pub fn coverage_report(
        &self,
        strict: bool,
        providers: &[CapabilityProvider],
    ) -> CoverageReport {
        let required: &[MemoryCapability] = if strict {
            MemoryCapability::all()
        } else {
            MemoryCapability::base_required()
        };

        let mut coverage = Vec::new();
        let mut missing_required = Vec::new();
        let mut missing_optional = Vec::new();

        for capability in MemoryCapability::all() {
            let healthy: Vec<String> = providers
                .iter()
                .filter(|p| p.available() && p.capabilities.contains(capability))
                .map(|p| p.name.clone())
                .collect();
            let is_required = required.contains(capability);

            if healthy.is_empty() {
                if is_required {
                    missing_required.push(capability.as_str().to_string());
                } else {
                    missing_optional.push(capability.as_str().to_string());
                }
            }
            coverage.push(CapabilityCoverage {
                capability: *capability,
                providers: healthy,
                required: is_required,
            });
        }

        CoverageReport {
            strict,
            coverage,
            missing_required,
            missing_optional,
        }
    }

    /// Hard gate for strict deployments: refuse to serve while a required
    /// capability is uncovered.
    pub fn require_coverage(&self, providers: &[CapabilityProvider]) -> Result<()> {
        if !self.strict {
            return Ok(());
        }
        let report = self.coverage_report(true, providers);
        if report.satisfied() {
            Ok(())
        } else {
            Err(FabricError::StrictCoverageUnmet {
                missing: report.missing_required,
            })
        }
    }

    /// Compute the route plan for one recall request.
    pub fn plan_recall(
        &self,
        stage: RelationshipStage,
        latency_budget_ms: u32,
        complexity: QueryComplexity,
        providers: &[CapabilityProvider],
    ) -> Result<RecallRoutePlan> {
        self.require_coverage(providers)?;

        let baseline: Vec<String> = BASELINE_ROUTES.iter().map(|r| r.to_string()).collect();

        // No deep personalization for unestablished relationships
        if stage == RelationshipStage::Stranger {
            return Ok(RecallRoutePlan {
                stage,
                complexity,
                baseline,
                extended: Vec::new(),
                skipped: Vec::new(),
                remaining_budget_ms: latency_budget_ms.saturating_sub(PLAN_CORE_COST_MS),
            });
        }

        let mut remaining = latency_budget_ms.saturating_sub(PLAN_CORE_COST_MS);
        let mut extended = Vec::new();
        let mut skipped = Vec::new();

        for route in route_order(complexity) {
            let cost = route_cost(route);
            let provider = providers.iter().find(|p| p.name == route);

            let reason = match provider {
                None => Some("not_registered"),
                Some(p) if !p.enabled => Some("provider_disabled"),
                Some(p) if !p.healthy => Some("provider_unhealthy"),
                Some(_) if cost > remaining => Some("budget_exhausted"),
                Some(_) => None,
            };

            match reason {
                Some(reason) => skipped.push(SkippedRoute {
                    route: route.to_string(),
                    reason: reason.to_string(),
                }),
                None => {
                    remaining -= cost;
                    extended.push(route.to_string());
                }
            }
        }

        Ok(RecallRoutePlan {
            stage,
            complexity,
            baseline,
            extended,
            skipped,
            remaining_budget_ms: remaining,
        })
    }
}
