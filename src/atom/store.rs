//! Event-sourced RocksDB ledger for memory atoms
//!
//! Every write is an immutable, idempotency-keyed record. Duplicate keys
//! resolve to the first writer (per-idempotency-key linearizable via
//! striped locks). Mutations are limited to external-ref appends, state
//! flips and decay bookkeeping, all guarded by compare-and-swap on the
//! atom's version field.
//!
//! Key layout (prefix scans seek, check the prefix, then break):
//!   atom:{tenant}:{user}:{memory_id}  -> MemoryAtom
//!   atomid:{memory_id}                -> primary key
//!   idem:{tenant}:{user}:{key}        -> memory_id
//!   shadow:{user}:{shadow_id}         -> SafetyShadowEntry
//!   trace:{memory_id}:{nanos}         -> TraceEvent
//!   rel:{tenant}:{user}               -> Relationship
//!   rule:{user}:{rule_id}             -> BehaviorRule
//!   runlog:{nanos}                    -> ConsolidationRunRecord
//!   proof:{user}:{nanos}              -> deletion proof record

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rocksdb::{Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::constants::{
    RETENTION_SHORT_DAYS, RETENTION_STANDARD_DAYS, RUN_LOG_MAX_ENTRIES,
};
use crate::relationship::Relationship;

use super::types::{
    AtomState, BehaviorRule, MemoryAtom, RetentionPolicy, SafetyShadowEntry, TraceEvent,
};

/// Bound on the per-scope recent-atom cache handed to the evolution engine
const RECENT_CACHE_MAX: usize = 128;

/// Outcome of a retention pruning pass
#[derive(Debug, Default, Clone, Copy)]
pub struct PruneOutcome {
    pub scanned: u64,
    pub pruned: u64,
    pub quarantined_kept: u64,
}

pub struct AtomStore {
    db: DB,
    /// Striped write locks, keyed by the record key under mutation
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Most-recent memory ids per (tenant, user), newest first
    recent: DashMap<String, VecDeque<Uuid>>,
}

fn atom_key(tenant: &str, user: &str, memory_id: &Uuid) -> String {
    format!("atom:{tenant}:{user}:{memory_id}")
}

fn idem_key(tenant: &str, user: &str, key: &str) -> String {
    format!("idem:{tenant}:{user}:{key}")
}

fn scope_key(tenant: &str, user: &str) -> String {
    format!("{tenant}:{user}")
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| anyhow!("encode failed: {e}"))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| anyhow!("decode failed: {e}"))?;
    Ok(value)
}

impl AtomStore {
    pub fn open(path: &Path) -> Result<Self> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("creating ledger directory {path:?}"))?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let db = DB::open(&opts, path).context("opening atom ledger")?;

        Ok(Self {
            db,
            locks: DashMap::new(),
            recent: DashMap::new(),
        })
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Iterate values under a key prefix
    fn scan_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Vec<T> {
        let mut out = Vec::new();
        let iter = self.db.prefix_iterator(prefix.as_bytes());
        for item in iter {
            let (key, value) = match item {
                Ok(kv) => kv,
                Err(e) => {
                    tracing::warn!("ledger iterator error (continuing): {}", e);
                    continue;
                }
            };
            match std::str::from_utf8(&key) {
                Ok(key_str) if key_str.starts_with(prefix) => match decode::<T>(&value) {
                    Ok(v) => out.push(v),
                    Err(e) => tracing::warn!("ledger decode error under {prefix}: {e}"),
                },
                _ => break,
            }
        }
        out
    }

    /// Collect raw keys under a prefix (for batch deletes)
    fn keys_with_prefix(&self, prefix: &str) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let iter = self.db.prefix_iterator(prefix.as_bytes());
        for item in iter.flatten() {
            let (key, _) = item;
            match std::str::from_utf8(&key) {
                Ok(key_str) if key_str.starts_with(prefix) => out.push(key.to_vec()),
                _ => break,
            }
        }
        out
    }

    // =========================================================================
    // Atom writes
    // =========================================================================

    /// Persist a new atom. When an idempotency key is present and already
    /// bound, the first writer's atom is returned with `created=false` -
    /// the new content is discarded, never merged.
    pub fn ingest(&self, atom: MemoryAtom) -> Result<(MemoryAtom, bool)> {
        if let Some(key) = atom.idempotency_key.clone() {
            let ikey = idem_key(&atom.tenant_id, &atom.user_id, &key);
            let lock = self.lock_for(&ikey);
            let _guard = lock.lock();

            if let Some(bytes) = self.db.get(ikey.as_bytes())? {
                let existing_id = String::from_utf8(bytes)
                    .ok()
                    .and_then(|s| Uuid::parse_str(&s).ok())
                    .ok_or_else(|| anyhow!("corrupt idempotency mapping for {key}"))?;
                if let Some(existing) = self.atom_by_id(&existing_id)? {
                    return Ok((existing, false));
                }
                // Mapping exists but atom is gone (retention raced us):
                // fall through and rebind to the new atom.
            }

            self.put_atom(&atom)?;
            self.db.put(ikey.as_bytes(), atom.memory_id.to_string().as_bytes())?;
        } else {
            self.put_atom(&atom)?;
        }

        self.push_recent(&atom);
        self.append_trace(
            &atom.memory_id,
            "INGEST",
            &format!("state={} source={}", atom.state.as_str(), atom.source),
        )?;

        Ok((atom, true))
    }

    fn put_atom(&self, atom: &MemoryAtom) -> Result<()> {
        let key = atom_key(&atom.tenant_id, &atom.user_id, &atom.memory_id);
        let mut batch = WriteBatch::default();
        batch.put(key.as_bytes(), encode(atom)?);
        batch.put(
            format!("atomid:{}", atom.memory_id).as_bytes(),
            key.as_bytes(),
        );
        self.db.write(batch)?;
        Ok(())
    }

    fn push_recent(&self, atom: &MemoryAtom) {
        let scope = scope_key(&atom.tenant_id, &atom.user_id);
        let mut entry = self.recent.entry(scope).or_default();
        entry.push_front(atom.memory_id);
        entry.truncate(RECENT_CACHE_MAX);
    }

    /// Write an updated atom only if the stored version still matches.
    /// Returns false on a version mismatch - the caller re-reads and
    /// recomputes, never overwrites blindly.
    pub fn write_atom_if_version(&self, updated: &MemoryAtom, expected: u64) -> Result<bool> {
        let key = atom_key(&updated.tenant_id, &updated.user_id, &updated.memory_id);
        let lock = self.lock_for(&key);
        let _guard = lock.lock();

        let stored: MemoryAtom = match self.db.get(key.as_bytes())? {
            Some(bytes) => decode(&bytes)?,
            None => return Err(anyhow!("atom {} vanished under CAS", updated.memory_id)),
        };
        if stored.version != expected {
            return Ok(false);
        }

        let mut next = updated.clone();
        next.version = expected + 1;
        self.db.put(key.as_bytes(), encode(&next)?)?;
        Ok(true)
    }

    /// Read-modify-write with bounded CAS retries
    pub fn modify_atom<F>(&self, memory_id: &Uuid, mut mutate: F) -> Result<MemoryAtom>
    where
        F: FnMut(&mut MemoryAtom),
    {
        const MAX_RETRIES: u32 = 4;
        for _ in 0..MAX_RETRIES {
            let mut atom = self
                .atom_by_id(memory_id)?
                .ok_or_else(|| anyhow!("atom {memory_id} not found"))?;
            let expected = atom.version;
            mutate(&mut atom);
            if self.write_atom_if_version(&atom, expected)? {
                atom.version = expected + 1;
                return Ok(atom);
            }
        }
        Err(anyhow!("CAS retries exhausted for atom {memory_id}"))
    }

    // =========================================================================
    // Atom reads
    // =========================================================================

    pub fn atom_by_id(&self, memory_id: &Uuid) -> Result<Option<MemoryAtom>> {
        let index_key = format!("atomid:{memory_id}");
        let Some(primary) = self.db.get(index_key.as_bytes())? else {
            return Ok(None);
        };
        match self.db.get(&primary)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn atoms_for_user(&self, tenant: &str, user: &str) -> Vec<MemoryAtom> {
        self.scan_prefix(&format!("atom:{tenant}:{user}:"))
    }

    /// Most recent atoms for a scope, newest first. Serves the evolution
    /// engine's linking window from the in-memory cache, falling back to
    /// a ledger scan after restart.
    pub fn recent_atoms(&self, tenant: &str, user: &str, n: usize) -> Vec<MemoryAtom> {
        let scope = scope_key(tenant, user);

        let cached_ids: Vec<Uuid> = self
            .recent
            .get(&scope)
            .map(|dq| dq.iter().take(n).copied().collect())
            .unwrap_or_default();

        if !cached_ids.is_empty() {
            let mut out = Vec::with_capacity(cached_ids.len());
            for id in cached_ids {
                if let Ok(Some(atom)) = self.atom_by_id(&id) {
                    out.push(atom);
                }
            }
            return out;
        }

        // Cache miss (restart): rebuild from the ledger
        let mut atoms = self.atoms_for_user(tenant, user);
        atoms.sort_by(|a, b| b.ingest_time.cmp(&a.ingest_time));
        atoms.truncate(n);

        let mut dq = VecDeque::with_capacity(atoms.len());
        for atom in &atoms {
            dq.push_back(atom.memory_id);
        }
        self.recent.insert(scope, dq);

        atoms
    }

    /// Atoms belonging to a user under any tenant. Ports receive only a
    /// user id, so cross-tenant reads scan the full atom keyspace.
    pub fn atoms_for_user_all_tenants(&self, user: &str) -> Vec<MemoryAtom> {
        self.scan_prefix::<MemoryAtom>("atom:")
            .into_iter()
            .filter(|a| a.user_id == user)
            .collect()
    }

    /// Distinct (tenant, user) scopes present in the ledger - drives the
    /// nightly per-user batch jobs.
    pub fn user_scopes(&self) -> Vec<(String, String)> {
        let mut scopes = Vec::new();
        let mut last: Option<String> = None;
        let iter = self.db.prefix_iterator(b"atom:");
        for item in iter.flatten() {
            let (key, _) = item;
            let Ok(key_str) = std::str::from_utf8(&key) else {
                continue;
            };
            if !key_str.starts_with("atom:") {
                break;
            }
            let parts: Vec<&str> = key_str.splitn(4, ':').collect();
            if parts.len() != 4 {
                continue;
            }
            let scope = format!("{}:{}", parts[1], parts[2]);
            if last.as_deref() != Some(scope.as_str()) {
                scopes.push((parts[1].to_string(), parts[2].to_string()));
                last = Some(scope);
            }
        }
        scopes
    }

    pub fn atom_count(&self) -> u64 {
        self.keys_with_prefix("atom:").len() as u64
    }

    // =========================================================================
    // Shadow entries
    // =========================================================================

    pub fn put_shadow(&self, entry: &SafetyShadowEntry) -> Result<()> {
        let key = format!("shadow:{}:{}", entry.user_id, entry.shadow_id);
        self.db.put(key.as_bytes(), encode(entry)?)?;
        Ok(())
    }

    pub fn shadows_for_user(&self, user: &str) -> Vec<SafetyShadowEntry> {
        self.scan_prefix(&format!("shadow:{user}:"))
    }

    // =========================================================================
    // Audit trace
    // =========================================================================

    pub fn append_trace(&self, memory_id: &Uuid, event_type: &str, detail: &str) -> Result<()> {
        let event = TraceEvent {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            detail: detail.to_string(),
        };
        let nanos = event.timestamp.timestamp_nanos_opt().unwrap_or(0);
        let key = format!("trace:{memory_id}:{nanos:020}");
        self.db.put(key.as_bytes(), encode(&event)?)?;
        Ok(())
    }

    pub fn trace_for(&self, memory_id: &Uuid) -> Vec<TraceEvent> {
        self.scan_prefix(&format!("trace:{memory_id}:"))
    }

    // =========================================================================
    // Relationship records
    // =========================================================================

    pub fn relationship(&self, tenant: &str, user: &str) -> Result<Option<Relationship>> {
        let key = format!("rel:{tenant}:{user}");
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// CAS write for relationship records; same contract as atoms
    pub fn write_relationship_if_version(
        &self,
        rel: &Relationship,
        expected: u64,
    ) -> Result<bool> {
        let key = format!("rel:{}:{}", rel.tenant_id, rel.user_id);
        let lock = self.lock_for(&key);
        let _guard = lock.lock();

        if let Some(bytes) = self.db.get(key.as_bytes())? {
            let stored: Relationship = decode(&bytes)?;
            if stored.version != expected {
                return Ok(false);
            }
        } else if expected != 0 {
            return Ok(false);
        }

        let mut next = rel.clone();
        next.version = expected + 1;
        self.db.put(key.as_bytes(), encode(&next)?)?;
        Ok(true)
    }

    // =========================================================================
    // Behavior rules
    // =========================================================================

    pub fn upsert_rule(&self, rule: &BehaviorRule) -> Result<()> {
        let key = format!("rule:{}:{}", rule.user_id, rule.rule_id);
        self.db.put(key.as_bytes(), encode(rule)?)?;
        Ok(())
    }

    pub fn rules_for_user(&self, user: &str) -> Vec<BehaviorRule> {
        let mut rules: Vec<BehaviorRule> = self.scan_prefix(&format!("rule:{user}:"));
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
    }

    // =========================================================================
    // Consolidation run log (append-only, PII-free)
    // =========================================================================

    pub fn append_run_record<T: Serialize>(&self, record: &T) -> Result<()> {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let key = format!("runlog:{nanos:020}");
        self.db.put(key.as_bytes(), encode(record)?)?;

        // Rotation: drop oldest entries beyond the cap
        let keys = self.keys_with_prefix("runlog:");
        if keys.len() > RUN_LOG_MAX_ENTRIES {
            let excess = keys.len() - RUN_LOG_MAX_ENTRIES;
            let mut batch = WriteBatch::default();
            for key in keys.into_iter().take(excess) {
                batch.delete(&key);
            }
            self.db.write(batch)?;
        }
        Ok(())
    }

    pub fn run_records<T: DeserializeOwned>(&self, n: usize) -> Vec<T> {
        let mut records: Vec<T> = self.scan_prefix("runlog:");
        let skip = records.len().saturating_sub(n);
        records.drain(..skip);
        records
    }

    /// Record a deletion proof in the audit trail
    pub fn record_deletion_proof(&self, user: &str, proof: &str, report_json: &str) -> Result<()> {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let key = format!("proof:{user}:{nanos:020}");
        let value = format!("{proof}\n{report_json}");
        self.db.put(key.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    // =========================================================================
    // Retention + GDPR
    // =========================================================================

    /// Delete atoms past their retention window. Quarantined atoms are
    /// kept for forensics regardless of age; pinned atoms never expire.
    pub fn retention_prune(&self, now: DateTime<Utc>) -> Result<PruneOutcome> {
        let mut outcome = PruneOutcome::default();
        let atoms: Vec<MemoryAtom> = self.scan_prefix("atom:");

        for atom in atoms {
            outcome.scanned += 1;

            if atom.state == AtomState::Quarantined {
                outcome.quarantined_kept += 1;
                continue;
            }

            let window_days = match atom.retention_policy {
                RetentionPolicy::Standard => RETENTION_STANDARD_DAYS,
                RetentionPolicy::ShortLived => RETENTION_SHORT_DAYS,
                RetentionPolicy::Pinned => continue,
            };

            if (now - atom.ingest_time).num_days() > window_days {
                self.delete_atom_record(&atom)?;
                outcome.pruned += 1;
            }
        }

        Ok(outcome)
    }

    fn delete_atom_record(&self, atom: &MemoryAtom) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.delete(atom_key(&atom.tenant_id, &atom.user_id, &atom.memory_id).as_bytes());
        batch.delete(format!("atomid:{}", atom.memory_id).as_bytes());
        if let Some(key) = &atom.idempotency_key {
            batch.delete(idem_key(&atom.tenant_id, &atom.user_id, key).as_bytes());
        }
        for trace_key in self.keys_with_prefix(&format!("trace:{}:", atom.memory_id)) {
            batch.delete(&trace_key);
        }
        self.db.write(batch)?;
        Ok(())
    }

    /// Remove every record belonging to a user across all tenants.
    /// Returns the number of atoms removed.
    pub fn delete_user_data(&self, user: &str) -> Result<u64> {
        let mut deleted = 0u64;

        // Atoms live under atom:{tenant}:{user}: for any tenant, so scan
        // all of them and match on the embedded user segment.
        let atoms: Vec<MemoryAtom> = self.scan_prefix("atom:");
        for atom in atoms {
            if atom.user_id == user {
                self.delete_atom_record(&atom)?;
                self.recent.remove(&scope_key(&atom.tenant_id, &atom.user_id));
                deleted += 1;
            }
        }

        let mut batch = WriteBatch::default();
        for key in self.keys_with_prefix(&format!("shadow:{user}:")) {
            batch.delete(&key);
        }
        for key in self.keys_with_prefix(&format!("rule:{user}:")) {
            batch.delete(&key);
        }
        // Relationship records for this user under any tenant
        for key in self.keys_with_prefix("rel:") {
            if let Ok(key_str) = std::str::from_utf8(&key) {
                if key_str.ends_with(&format!(":{user}")) {
                    batch.delete(&key);
                }
            }
        }
        self.db.write(batch)?;

        Ok(deleted)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().context("flushing atom ledger")
    }

    /// Drop in-memory caches; ledger state is untouched. Test isolation
    /// hook, also exercised after GDPR deletion.
    pub fn reset_caches(&self) {
        self.recent.clear();
        self.locks.clear();
    }
}
