// incident-core/src/core/audit.rs
// ============================================================================
// Module: Incident Core Audit Chain
// Description: Hash computation and chain verification for per-issue audit
//              trails.
// Purpose: Give every crate that writes or verifies audit entries a single,
//          shared implementation of the hash-chain invariant.
// Dependencies: serde, crate::core::{hashing, model}
// ============================================================================

//! ## Overview
//! An audit chain is tamper-evident per `issue_id`, not globally: each
//! [`AuditEntry`] embeds the hash of the chronologically prior entry for the
//! same issue. [`verify_chain`] walks entries in timestamp order, recomputes
//! each hash, and reports the first entry where recomputation or chain
//! continuity fails.

use serde::Serialize;
use thiserror::Error;

use super::hashing::DEFAULT_HASH_ALGORITHM;
use super::hashing::HashError;
use super::hashing::hash_canonical_json;
use super::identifiers::AuditId;
use super::model::AuditEntry;

/// The fields hashed to produce an [`AuditEntry::hash`], mirroring the
/// entry's own fields plus the previous hash.
#[derive(Serialize)]
struct HashedFields<'a> {
    timestamp: &'a str,
    issue_id: &'a str,
    event_type: &'a str,
    actor: &'a str,
    inputs: &'a std::collections::BTreeMap<String, serde_json::Value>,
    outputs: &'a std::collections::BTreeMap<String, serde_json::Value>,
    reasoning: &'a std::collections::BTreeMap<String, serde_json::Value>,
    previous_hash: &'a str,
}

/// Computes `SHA-256(canonical_json({..fields.., previous_hash}))` for an
/// audit entry's fields, without requiring a constructed [`AuditEntry`].
///
/// # Errors
///
/// Returns [`HashError`] if canonicalization fails.
#[allow(clippy::too_many_arguments, reason = "mirrors the entry's own field count")]
pub fn compute_entry_hash(
    timestamp_rfc3339: &str,
    issue_id: &str,
    event_type: &str,
    actor: &str,
    inputs: &std::collections::BTreeMap<String, serde_json::Value>,
    outputs: &std::collections::BTreeMap<String, serde_json::Value>,
    reasoning: &std::collections::BTreeMap<String, serde_json::Value>,
    previous_hash: &str,
) -> Result<String, HashError> {
    let fields = HashedFields {
        timestamp: timestamp_rfc3339,
        issue_id,
        event_type,
        actor,
        inputs,
        outputs,
        reasoning,
        previous_hash,
    };
    Ok(hash_canonical_json(DEFAULT_HASH_ALGORITHM, &fields)?.value)
}

/// Why chain verification failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuditChainError {
    /// An entry's stored hash does not match its recomputed hash.
    #[error("hash mismatch at entry {0}")]
    HashMismatch(AuditId),
    /// An entry's `previous_hash` does not match the prior entry's hash.
    #[error("chain broken at entry {0}")]
    ChainBroken(AuditId),
    /// Canonicalization failed while recomputing a hash.
    #[error("failed to recompute hash: {0}")]
    Hashing(#[from] HashError),
}

/// Verifies a per-issue audit chain, given entries already ordered by
/// timestamp ascending. Returns the first broken entry's error, if any.
///
/// # Errors
///
/// Returns [`AuditChainError`] identifying the first entry whose hash or
/// chain linkage is invalid.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<(), AuditChainError> {
    let mut previous_hash = String::new();
    for entry in entries {
        let timestamp_text = entry.timestamp.to_rfc3339().unwrap_or_default();
        let recomputed = compute_entry_hash(
            &timestamp_text,
            entry.issue_id.as_str(),
            &entry.event_type,
            &entry.actor,
            &entry.inputs,
            &entry.outputs,
            &entry.reasoning,
            &entry.previous_hash,
        )?;
        if recomputed != entry.hash {
            return Err(AuditChainError::HashMismatch(entry.audit_id.clone()));
        }
        if entry.previous_hash != previous_hash {
            return Err(AuditChainError::ChainBroken(entry.audit_id.clone()));
        }
        previous_hash = entry.hash.clone();
    }
    Ok(())
}
