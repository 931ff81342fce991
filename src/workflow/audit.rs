use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::{ApprovalStatus, Decision};

/// One committed transition of an approval request. Never updated.
///
/// Entries of a request form a hash chain:
/// `hash = sha256(prevHash || entry JSON without hash)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub request_id: String,
    pub sequence: u64,
    pub actor_id: String,
    pub from_status: ApprovalStatus,
    pub to_status: ApprovalStatus,
    pub step_index: usize,
    #[serde(default)]
    pub decision: Option<Decision>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub prev_hash: Option<String>,
    #[serde(default)]
    pub hash: String,
}

impl AuditEntry {
    /// Sequence-derived id, so a sequence number can only be used once.
    pub fn entry_id(request_id: &str, sequence: u64) -> String {
        format!("{request_id}-{sequence:06}")
    }

    pub fn compute_hash(&self) -> String {
        let mut unsealed = self.clone();
        unsealed.hash = String::new();
        let payload = serde_json::to_string(&unsealed).unwrap_or_default();

        let mut hasher = Sha256::new();
        if let Some(prev) = &self.prev_hash {
            hasher.update(prev.as_bytes());
        }
        hasher.update(payload.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn seal(mut self) -> Self {
        self.hash = self.compute_hash();
        self
    }
}

/// Check that `entries` (ordered by sequence) is an unbroken, untampered
/// chain and a valid path through the state machine.
pub fn verify_chain(entries: &[AuditEntry]) -> bool {
    let mut prev_hash: Option<&str> = None;
    let mut prev_status = ApprovalStatus::Pending;

    for (index, entry) in entries.iter().enumerate() {
        let linked = entry.sequence == index as u64 + 1 && entry.prev_hash.as_deref() == prev_hash;
        let untouched = entry.hash == entry.compute_hash();
        let valid_path = entry.from_status == prev_status && entry.from_status.can_become(entry.to_status);

        if !(linked && untouched && valid_path) {
            tracing::warn!(
                request_id = %entry.request_id,
                sequence = entry.sequence,
                linked,
                untouched,
                valid_path,
                "audit chain broken"
            );
            return false;
        }

        prev_hash = Some(&entry.hash);
        prev_status = entry.to_status;
    }
    true
}
