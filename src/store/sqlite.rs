use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;

use super::{
    apply_patch, with_id, ChangeFeed, ConditionalWrite, DocumentChange, DocumentStore, FilterOp,
    Query, WriteOutcome,
};
use crate::errors::{AppError, AppResult};

/// Document store over a single SQLite `documents` table.
///
/// Conditional writes compare-and-swap on the row `version`, so two racing
/// writers that read the same version cannot both commit.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            feed: ChangeFeed::default(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch(&self, collection: &str, id: &str) -> AppResult<Option<(Value, i64)>> {
        let row = sqlx::query("SELECT body, version FROM documents WHERE collection = ? AND id = ?")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let body: String = row.try_get("body")?;
            let version: i64 = row.try_get("version")?;
            Ok((serde_json::from_str(&body)?, version))
        })
        .transpose()
    }
}

fn parse_body(row: &SqliteRow) -> AppResult<Value> {
    let body: String = row.try_get("body")?;
    Ok(serde_json::from_str(&body)?)
}

// Only plain identifiers are pushed into json paths.
fn is_plain_field(field: &str) -> bool {
    !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<Value>> {
        Ok(self.fetch(collection, id).await?.map(|(body, _)| body))
    }

    async fn insert(&self, collection: &str, id: &str, body: Value) -> AppResult<()> {
        let body = with_id(body, id);
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO documents (collection, id, body, version, created_at, updated_at) VALUES (?, ?, ?, 1, ?, ?)",
        )
        .bind(collection)
        .bind(id)
        .bind(serde_json::to_string(&body)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(AppError::conflict(format!("{collection}/{id} already exists")));
            }
            Err(err) => return Err(err.into()),
        }

        self.feed.publish(DocumentChange {
            collection: collection.to_string(),
            id: id.to_string(),
            before: None,
            after: Some(body),
        });
        Ok(())
    }

    async fn set(&self, collection: &str, id: &str, body: Value) -> AppResult<()> {
        let body = with_id(body, id);
        let before = self.fetch(collection, id).await?.map(|(body, _)| body);
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, body, version, created_at, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT (collection, id) DO UPDATE SET
                body = excluded.body,
                version = documents.version + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(serde_json::to_string(&body)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.feed.publish(DocumentChange {
            collection: collection.to_string(),
            id: id.to_string(),
            before,
            after: Some(body),
        });
        Ok(())
    }

    async fn query(&self, query: &Query) -> AppResult<Vec<Value>> {
        // Push scalar equality and membership filters down so the json
        // expression indexes can be used; the full query is re-applied in
        // memory afterwards.
        let scalar = |value: &Value| matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_));
        let mut sql = String::from("SELECT body FROM documents WHERE collection = ?");
        let mut pushed: Vec<&Value> = Vec::new();
        for filter in query.filters.iter().filter(|f| is_plain_field(&f.field)) {
            match &filter.op {
                FilterOp::Eq(value) if scalar(value) => {
                    sql.push_str(&format!(" AND json_extract(body, '$.{}') = ?", filter.field));
                    pushed.push(value);
                }
                FilterOp::In(values) if values.is_empty() => sql.push_str(" AND 0"),
                FilterOp::In(values) if values.iter().all(|v| scalar(v)) => {
                    let marks = vec!["?"; values.len()].join(", ");
                    sql.push_str(&format!(" AND json_extract(body, '$.{}') IN ({marks})", filter.field));
                    pushed.extend(values.iter());
                }
                _ => {}
            }
        }

        let mut statement = sqlx::query(&sql).bind(query.collection.clone());
        for value in pushed {
            statement = match value {
                Value::String(s) => statement.bind(s.clone()),
                Value::Bool(b) => statement.bind(i64::from(*b)),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => statement.bind(i),
                    None => statement.bind(n.as_f64().unwrap_or_default()),
                },
                _ => statement,
            };
        }

        let rows = statement.fetch_all(&self.pool).await?;
        let docs = rows.iter().map(parse_body).collect::<AppResult<Vec<_>>>()?;
        Ok(query.apply(docs))
    }

    async fn transactional_update(&self, write: ConditionalWrite) -> AppResult<WriteOutcome> {
        let Some((current, version)) = self.fetch(&write.collection, &write.id).await? else {
            return Ok(WriteOutcome::NotFound);
        };
        if !write.precondition.holds(&current) {
            return Ok(WriteOutcome::PreconditionFailed);
        }

        let mut updated = current.clone();
        apply_patch(&mut updated, &write.patch);
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE documents SET body = ?, version = version + 1, updated_at = ? WHERE collection = ? AND id = ? AND version = ?",
        )
        .bind(serde_json::to_string(&updated)?)
        .bind(now)
        .bind(&write.collection)
        .bind(&write.id)
        .bind(version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            tracing::debug!(
                collection = %write.collection,
                id = %write.id,
                version,
                "conditional write lost the race"
            );
            return Ok(WriteOutcome::PreconditionFailed);
        }

        let mut appended = Vec::with_capacity(write.appends.len());
        for doc in write.appends {
            let body = with_id(doc.body, &doc.id);
            let inserted = sqlx::query(
                "INSERT INTO documents (collection, id, body, version, created_at, updated_at) VALUES (?, ?, ?, 1, ?, ?)",
            )
            .bind(&doc.collection)
            .bind(&doc.id)
            .bind(serde_json::to_string(&body)?)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => appended.push((doc.collection, doc.id, body)),
                Err(err) if is_unique_violation(&err) => {
                    tx.rollback().await?;
                    return Err(AppError::conflict(format!(
                        "{}/{} already exists",
                        doc.collection, doc.id
                    )));
                }
                Err(err) => return Err(err.into()),
            }
        }

        tx.commit().await?;

        self.feed.publish(DocumentChange {
            collection: write.collection.clone(),
            id: write.id.clone(),
            before: Some(current),
            after: Some(updated.clone()),
        });
        for (collection, id, body) in appended {
            self.feed.publish(DocumentChange {
                collection,
                id,
                before: None,
                after: Some(body),
            });
        }

        Ok(WriteOutcome::Committed(updated))
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.feed.subscribe()
    }
}
