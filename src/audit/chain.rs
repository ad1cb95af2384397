//! Hash chain over audit entries
//!
//! Each entry hashes its sequence number, the previous entry's hash and the
//! canonical JSON of its body. Editing, removing or reordering an entry
//! breaks every hash after it.

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::entry::{AuditDraft, AuditEntry};
use crate::types::{CaseguardError, Result};

#[derive(Serialize)]
struct HashInput<'a> {
    seq: u64,
    previous_hash: Option<&'a str>,
    body: &'a AuditDraft,
}

/// Hex SHA-256 of one link
pub fn compute_hash(seq: u64, previous_hash: Option<&str>, body: &AuditDraft) -> Result<String> {
    let input = HashInput {
        seq,
        previous_hash,
        body,
    };
    let bytes = serde_json::to_vec(&input)
        .map_err(|e| CaseguardError::AuditWriteFailure(format!("hash encode failed: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Place a draft on the chain after `previous`
pub fn seal(draft: AuditDraft, previous: Option<(u64, &str)>) -> Result<AuditEntry> {
    let (seq, previous_hash) = match previous {
        Some((prev_seq, prev_hash)) => (prev_seq + 1, Some(prev_hash.to_string())),
        None => (1, None),
    };
    let hash = compute_hash(seq, previous_hash.as_deref(), &draft)?;
    Ok(AuditEntry {
        seq,
        body: draft,
        previous_hash,
        hash,
    })
}

/// Where a chain stopped verifying
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    pub seq: u64,
    pub reason: &'static str,
}

/// Verify a contiguous run of entries in ascending `seq` order.
///
/// The first entry is trusted as the anchor when it is not the genesis
/// entry, so a page of the chain can be checked on its own.
pub fn verify_chain(entries: &[AuditEntry]) -> std::result::Result<(), ChainBreak> {
    let mut previous: Option<&AuditEntry> = None;

    for entry in entries {
        if let Some(prev) = previous {
            if entry.seq != prev.seq + 1 {
                return Err(ChainBreak {
                    seq: entry.seq,
                    reason: "sequence gap",
                });
            }
            if entry.previous_hash.as_deref() != Some(prev.hash.as_str()) {
                return Err(ChainBreak {
                    seq: entry.seq,
                    reason: "previous hash mismatch",
                });
            }
        } else if entry.seq == 1 && entry.previous_hash.is_some() {
            return Err(ChainBreak {
                seq: entry.seq,
                reason: "genesis entry has a predecessor",
            });
        }

        let expected = compute_hash(entry.seq, entry.previous_hash.as_deref(), &entry.body)
            .map_err(|_| ChainBreak {
                seq: entry.seq,
                reason: "entry not encodable",
            })?;
        if expected != entry.hash {
            return Err(ChainBreak {
                seq: entry.seq,
                reason: "hash mismatch",
            });
        }

        previous = Some(entry);
    }

    Ok(())
}
