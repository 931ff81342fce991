//! Background `provinceId` backfill for governed business records.
//!
//! Records written with a `branchCode` but no `provinceId` are tagged with
//! the province of their branch. The trigger recognises its own writes by
//! their field diff and never re-fires on them.

mod trigger;

pub use trigger::AutoMigrationTrigger;

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

/// Value of `_autoMigratedBy` on every record the trigger touches.
pub const MIGRATION_ACTOR: &str = "auto-province-migration";

/// Fields written by the trigger; a change touching exactly these is its own.
pub const SIGNATURE_FIELDS: [&str; 3] = ["provinceId", "_autoMigratedAt", "_autoMigratedBy"];

pub const DEFAULT_GOVERNED_COLLECTIONS: [&str; 4] = [
    "expenses",
    "vehicleSales",
    "creditApplications",
    "stockTransfers",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Migrated { province_id: String },
    NotGoverned,
    Deleted,
    OwnWrite,
    AlreadyTagged,
    MissingBranch,
    UnknownBranch(String),
    /// The record disappeared between read and write.
    Vanished,
}

impl MigrationOutcome {
    pub fn wrote(&self) -> bool {
        matches!(self, MigrationOutcome::Migrated { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackfillReport {
    pub collection: String,
    pub scanned: usize,
    pub migrated: usize,
    pub already_tagged: usize,
    pub missing_branch: usize,
    pub unknown_branch: usize,
    pub failed: usize,
}

impl BackfillReport {
    fn record(&mut self, outcome: &MigrationOutcome) {
        match outcome {
            MigrationOutcome::Migrated { .. } => self.migrated += 1,
            MigrationOutcome::AlreadyTagged => self.already_tagged += 1,
            MigrationOutcome::MissingBranch => self.missing_branch += 1,
            MigrationOutcome::UnknownBranch(_) => self.unknown_branch += 1,
            _ => {}
        }
    }
}

/// Top-level fields whose value differs between `before` and `after`
/// (added, removed or changed).
pub fn changed_fields(before: Option<&Value>, after: &Value) -> BTreeSet<String> {
    let empty = serde_json::Map::new();
    let before = before.and_then(Value::as_object).unwrap_or(&empty);
    let after = after.as_object().unwrap_or(&empty);

    before
        .keys()
        .chain(after.keys())
        .filter(|key| before.get(*key) != after.get(*key))
        .cloned()
        .collect()
}

/// A diff of exactly the signature fields is one of our own writes. An
/// empty diff changed nothing and is treated the same way.
pub fn is_own_write(changed: &BTreeSet<String>) -> bool {
    changed.is_empty()
        || (changed.len() == SIGNATURE_FIELDS.len()
            && SIGNATURE_FIELDS.iter().all(|field| changed.contains(*field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_covers_added_removed_and_changed() {
        let before = json!({"id": "e1", "amount": 10, "note": "x"});
        let after = json!({"id": "e1", "amount": 12, "branchCode": "0452"});
        let changed = changed_fields(Some(&before), &after);
        assert_eq!(
            changed,
            BTreeSet::from(["amount".to_string(), "branchCode".to_string(), "note".to_string()])
        );
    }

    #[test]
    fn signature_only_diff_is_recognised() {
        let before = json!({"id": "e1", "branchCode": "0452"});
        let after = json!({
            "id": "e1",
            "branchCode": "0452",
            "provinceId": "nakhon-ratchasima",
            "_autoMigratedAt": "2026-03-01T00:00:00Z",
            "_autoMigratedBy": MIGRATION_ACTOR,
        });
        assert!(is_own_write(&changed_fields(Some(&before), &after)));

        let edited = json!({"id": "e1", "branchCode": "0451", "provinceId": "nakhon-ratchasima"});
        assert!(!is_own_write(&changed_fields(Some(&before), &edited)));
    }

    #[test]
    fn partial_signature_diff_is_a_user_write() {
        let tagged = json!({"id": "e1", "branchCode": "0452", "provinceId": "nakhon-ratchasima"});
        let cleared = json!({"id": "e1", "branchCode": "0452"});
        assert!(!is_own_write(&changed_fields(Some(&tagged), &cleared)));
        assert!(is_own_write(&changed_fields(Some(&tagged), &tagged)));
    }

    #[test]
    fn creation_is_never_an_own_write() {
        let after = json!({"id": "e1", "branchCode": "0452"});
        assert!(!is_own_write(&changed_fields(None, &after)));
    }
}
