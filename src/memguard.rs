//! MemGuard - pre-write content risk scoring
//!
//! Pure function over content + trust, no I/O. Risk accumulates
//! additively across independent signals and is capped at 1.0. Content
//! matching a NEVER_STORE pattern is refused outright - no partial
//! persistence, not even quarantine.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::atom::{MemoryAtom, SafetyShadowEntry, ShadowState};
use crate::constants::{
    CAUTION_RISK_THRESHOLD, LOW_TRUST_THRESHOLD, OVERSIZED_CONTENT_CHARS, RISK_BLOCKED_PATTERN,
    RISK_CAUTION_PATTERN, RISK_INJECTION_CAP, RISK_INJECTION_MARKER, RISK_LOW_TRUST,
    RISK_OVERSIZED,
};

lazy_static! {
    /// Content that must never be stored in any form
    static ref NEVER_STORE: Vec<(&'static str, Regex)> = vec![
        (
            "payment_card",
            Regex::new(r"\b(?:\d[ -]?){13,16}\b").unwrap(),
        ),
        (
            "government_id",
            Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap(),
        ),
        (
            "private_key",
            Regex::new(r"-----BEGIN [A-Z ]*PRIVATE KEY-----").unwrap(),
        ),
        (
            "password_literal",
            Regex::new(r"(?i)\bpassword\s*[:=]\s*\S+").unwrap(),
        ),
    ];

    /// Blocked-sensitivity categories: storable only under quarantine
    static ref BLOCKED_PATTERNS: Vec<(&'static str, Regex)> = vec![
        (
            "credential",
            Regex::new(r"(?i)\b(api[_-]?key|secret[_-]?key|bearer token|access token)\b").unwrap(),
        ),
        (
            "medical",
            Regex::new(r"(?i)\b(diagnosis|diagnosed with|prescription|medical record)\b").unwrap(),
        ),
    ];

    /// Caution-sensitivity categories
    static ref CAUTION_PATTERNS: Vec<(&'static str, Regex)> = vec![
        (
            "financial",
            Regex::new(r"(?i)\b(bank account|routing number|credit score|net worth)\b").unwrap(),
        ),
        (
            "location",
            Regex::new(r"(?i)\b\d+ [a-z]+ (street|st|avenue|ave|road|rd|lane|ln)\b").unwrap(),
        ),
    ];

    /// Prompt-injection / memory-poisoning markers
    static ref INJECTION_MARKERS: Vec<(&'static str, Regex)> = vec![
        ("ignore_instructions", Regex::new(r"(?i)ignore (all )?(previous|prior) instructions").unwrap()),
        ("system_prompt", Regex::new(r"(?i)\bsystem prompt\b").unwrap()),
        ("disregard", Regex::new(r"(?i)disregard (your|all) (instructions|rules)").unwrap()),
        ("role_override", Regex::new(r"(?i)\byou are now\b").unwrap()),
        ("jailbreak", Regex::new(r"(?i)\b(jailbreak|developer mode)\b").unwrap()),
    ];
}

/// Decision produced by [`evaluate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardAction {
    Allow,
    Caution,
    Quarantine,
    /// NEVER_STORE hit: the write is refused entirely
    Block,
}

/// Risk verdict for one piece of content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardVerdict {
    pub action: GuardAction,
    pub risk_score: f32,
    pub reasons: Vec<String>,
}

/// Score content risk. `quarantine_threshold` is deployment-configured;
/// the caution threshold is fixed.
pub fn evaluate(content: &str, trust_score: f32, quarantine_threshold: f32) -> GuardVerdict {
    let mut reasons = Vec::new();

    for (name, pattern) in NEVER_STORE.iter() {
        if pattern.is_match(content) {
            reasons.push(format!("never_store:{name}"));
        }
    }
    if !reasons.is_empty() {
        return GuardVerdict {
            action: GuardAction::Block,
            risk_score: 1.0,
            reasons,
        };
    }

    let mut risk = 0.0f32;

    for (name, pattern) in BLOCKED_PATTERNS.iter() {
        if pattern.is_match(content) {
            risk += RISK_BLOCKED_PATTERN;
            reasons.push(format!("blocked:{name}"));
            break; // one blocked category is enough; avoid double-counting
        }
    }

    for (name, pattern) in CAUTION_PATTERNS.iter() {
        if pattern.is_match(content) {
            risk += RISK_CAUTION_PATTERN;
            reasons.push(format!("caution:{name}"));
            break;
        }
    }

    let mut injection_risk = 0.0f32;
    for (name, pattern) in INJECTION_MARKERS.iter() {
        if pattern.is_match(content) {
            injection_risk += RISK_INJECTION_MARKER;
            reasons.push(format!("injection:{name}"));
        }
    }
    risk += injection_risk.min(RISK_INJECTION_CAP);

    if trust_score < LOW_TRUST_THRESHOLD {
        risk += RISK_LOW_TRUST;
        reasons.push("low_trust_source".to_string());
    }

    if content.chars().count() > OVERSIZED_CONTENT_CHARS {
        risk += RISK_OVERSIZED;
        reasons.push("oversized_payload".to_string());
    }

    let risk = risk.min(1.0);

    let action = if risk >= quarantine_threshold {
        GuardAction::Quarantine
    } else if risk >= CAUTION_RISK_THRESHOLD {
        GuardAction::Caution
    } else {
        GuardAction::Allow
    };

    GuardVerdict {
        action,
        risk_score: risk,
        reasons,
    }
}

/// Build the forensic shadow record for a quarantined atom. Holds a
/// content fingerprint, never the content.
pub fn shadow_for(atom: &MemoryAtom, verdict: &GuardVerdict) -> SafetyShadowEntry {
    SafetyShadowEntry {
        shadow_id: Uuid::new_v4(),
        memory_id: atom.memory_id,
        user_id: atom.user_id.clone(),
        reasons: verdict.reasons.clone(),
        risk_score: verdict.risk_score,
        state: ShadowState::PendingReview,
        fingerprint: MemoryAtom::content_fingerprint(&atom.content_raw),
        created_at: chrono::Utc::now(),
    }
}
