use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{changed_fields, is_own_write, BackfillReport, MigrationOutcome, DEFAULT_GOVERNED_COLLECTIONS, MIGRATION_ACTOR};
use crate::errors::{AppError, AppResult};
use crate::geo::GeoDirectory;
use crate::store::{ConditionalWrite, DocumentChange, DocumentStore, Precondition, Query, WriteOutcome};

pub struct AutoMigrationTrigger {
    store: Arc<dyn DocumentStore>,
    directory: Arc<GeoDirectory>,
    governed: BTreeSet<String>,
}

impl AutoMigrationTrigger {
    pub fn new<I, S>(store: Arc<dyn DocumentStore>, directory: Arc<GeoDirectory>, governed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            store,
            directory,
            governed: governed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_default_collections(store: Arc<dyn DocumentStore>, directory: Arc<GeoDirectory>) -> Self {
        Self::new(store, directory, DEFAULT_GOVERNED_COLLECTIONS)
    }

    pub fn is_governed(&self, collection: &str) -> bool {
        self.governed.contains(collection)
    }

    pub fn governed(&self) -> impl Iterator<Item = &str> {
        self.governed.iter().map(String::as_str)
    }

    /// React to one committed write. Performs at most one write.
    pub async fn handle_write(&self, change: &DocumentChange) -> AppResult<MigrationOutcome> {
        if !self.is_governed(&change.collection) {
            return Ok(MigrationOutcome::NotGoverned);
        }
        let Some(after) = change.after.as_ref() else {
            return Ok(MigrationOutcome::Deleted);
        };
        if is_own_write(&changed_fields(change.before.as_ref(), after)) {
            return Ok(MigrationOutcome::OwnWrite);
        }

        self.repair(&change.collection, &change.id, after).await
    }

    async fn repair(&self, collection: &str, id: &str, doc: &Value) -> AppResult<MigrationOutcome> {
        if doc.get("provinceId").is_some_and(|value| !value.is_null()) {
            return Ok(MigrationOutcome::AlreadyTagged);
        }
        let Some(branch_code) = doc.get("branchCode").and_then(Value::as_str) else {
            return Ok(MigrationOutcome::MissingBranch);
        };
        let Some(province_id) = self.directory.province_for_branch(branch_code) else {
            let err = AppError::unknown_unit(format!("branch `{branch_code}` on {collection}/{id}"));
            tracing::warn!(collection = %collection, id = %id, error = %err, "province backfill skipped");
            return Ok(MigrationOutcome::UnknownBranch(branch_code.to_string()));
        };

        let write = ConditionalWrite::new(collection, id)
            .precondition(Precondition::none().field_missing("provinceId"))
            .set("provinceId", province_id.as_str())
            .set("_autoMigratedAt", serde_json::to_value(Utc::now())?)
            .set("_autoMigratedBy", MIGRATION_ACTOR);

        match self.store.transactional_update(write).await? {
            WriteOutcome::Committed(_) => {
                tracing::info!(
                    collection = %collection,
                    id = %id,
                    branch_code = %branch_code,
                    province_id = %province_id,
                    "provinceId backfilled"
                );
                Ok(MigrationOutcome::Migrated {
                    province_id: province_id.clone(),
                })
            }
            WriteOutcome::PreconditionFailed => Ok(MigrationOutcome::AlreadyTagged),
            WriteOutcome::NotFound => Ok(MigrationOutcome::Vanished),
        }
    }

    /// Consume a change feed until it closes.
    pub async fn run(&self, mut rx: broadcast::Receiver<DocumentChange>) {
        tracing::info!(collections = ?self.governed, "province migration trigger started");
        loop {
            let change = match rx.recv().await {
                Ok(change) => change,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "migration trigger lagged; run a backfill to catch up");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match self.handle_write(&change).await {
                Ok(outcome) if outcome.wrote() => {}
                Ok(outcome) => {
                    tracing::trace!(collection = %change.collection, id = %change.id, ?outcome, "no backfill needed");
                }
                Err(err) => {
                    tracing::warn!(collection = %change.collection, id = %change.id, error = %err, "province backfill failed");
                }
            }
        }
        tracing::info!("province migration trigger stopped");
    }

    /// Repair every record of a collection in one pass.
    pub async fn backfill(&self, collection: &str) -> AppResult<BackfillReport> {
        if !self.is_governed(collection) {
            return Err(AppError::bad_request(format!("`{collection}` is not a governed collection")));
        }

        let docs = self.store.query(&Query::collection(collection)).await?;
        let mut report = BackfillReport {
            collection: collection.to_string(),
            ..BackfillReport::default()
        };

        for doc in docs {
            report.scanned += 1;
            let Some(id) = doc.get("id").and_then(Value::as_str) else {
                report.failed += 1;
                continue;
            };
            match self.repair(collection, id, &doc).await {
                Ok(outcome) => report.record(&outcome),
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(collection = %collection, id = %id, error = %err, "province backfill failed");
                }
            }
        }

        tracing::info!(
            collection = %collection,
            scanned = report.scanned,
            migrated = report.migrated,
            unknown_branch = report.unknown_branch,
            "backfill finished"
        );
        Ok(report)
    }
}
