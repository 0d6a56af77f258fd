use chrono::{DateTime, Utc};
use horizon_core::{
    ChangeEvent, DocPath, Document, DocumentStore, FieldValue, Query, SortDirection, StoreError,
    WriteMode, WriteOp,
};
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::{PgPool, Postgres, Row, Transaction as PgTx};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::warn;

use crate::apply::apply_fields;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// Postgres backend. Documents are jsonb rows keyed by (collection, id);
/// a commit runs inside one database transaction, and merge/update writes
/// fold their field changes into jsonb expressions evaluated by the server
/// against the live row, so an increment is applied to whatever value is
/// committed at that moment rather than to a snapshot read earlier.
pub struct PgDocumentStore {
    pool: PgPool,
    changes: broadcast::Sender<ChangeEvent>,
}

impl PgDocumentStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(map_sqlx_error)?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self { pool, changes })
    }

    /// Idempotent schema bootstrap: the documents table plus the jsonb
    /// helpers the commit path folds its field writes through.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data JSONB NOT NULL,
                version BIGINT NOT NULL DEFAULT 1,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS documents_owner_idx ON documents (collection, (data->>'user_id'))",
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        // Sets a (possibly nested) field, creating intermediate objects on
        // the way down.
        sqlx::query(
            r#"
            CREATE OR REPLACE FUNCTION jsonb_deep_set(target jsonb, path text[], val jsonb)
            RETURNS jsonb LANGUAGE plpgsql IMMUTABLE AS $fn$
            DECLARE
                i int;
            BEGIN
                IF target IS NULL OR jsonb_typeof(target) <> 'object' THEN
                    target := '{}'::jsonb;
                END IF;
                FOR i IN 1 .. coalesce(array_length(path, 1), 0) - 1 LOOP
                    IF jsonb_typeof(target #> path[1:i]) IS DISTINCT FROM 'object' THEN
                        target := jsonb_set(target, path[1:i], '{}'::jsonb, true);
                    END IF;
                END LOOP;
                RETURN jsonb_set(target, path, val, true);
            END;
            $fn$
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        // Adds to a numeric field; a missing field counts as zero.
        sqlx::query(
            r#"
            CREATE OR REPLACE FUNCTION jsonb_increment(target jsonb, path text[], delta bigint)
            RETURNS jsonb LANGUAGE plpgsql IMMUTABLE AS $fn$
            BEGIN
                RETURN jsonb_deep_set(
                    target,
                    path,
                    to_jsonb(coalesce((target #>> path)::bigint, 0) + delta)
                );
            END;
            $fn$
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn insert_new(
        tx: &mut PgTx<'_, Postgres>,
        op: &WriteOp,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut data = Value::Object(Map::new());
        apply_fields(&mut data, &op.fields, now);
        // Plain insert: a concurrent creator of the same id must surface as
        // AlreadyExists, never be overwritten.
        sqlx::query(
            "INSERT INTO documents (collection, id, data, version, updated_at) \
             VALUES ($1, $2, $3, 1, $4)",
        )
        .bind(&op.path.collection)
        .bind(&op.path.id)
        .bind(&data)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::AlreadyExists(op.path.clone())
            } else {
                map_sqlx_error(e)
            }
        })?;
        Ok(())
    }

    /// Upsert whose conflict branch is computed entirely in SQL over the
    /// current row. Two first commits racing to create the same document
    /// resolve as one insert plus one in-place merge; neither overwrites
    /// the other's increments with a stale value.
    async fn upsert_merge(
        tx: &mut PgTx<'_, Postgres>,
        op: &WriteOp,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut insert_data = Value::Object(Map::new());
        apply_fields(&mut insert_data, &op.fields, now);

        let sql = format!(
            "INSERT INTO documents (collection, id, data, version, updated_at) \
             VALUES ($1, $2, $3, 1, $4) \
             ON CONFLICT (collection, id) DO UPDATE \
             SET data = {}, \
                 version = documents.version + 1, \
                 updated_at = EXCLUDED.updated_at",
            field_fold_expr("documents.data", &op.fields, 5),
        );

        let query = sqlx::query(&sql)
            .bind(&op.path.collection)
            .bind(&op.path.id)
            .bind(&insert_data)
            .bind(now);
        bind_fields(query, &op.fields, now)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn update_existing(
        tx: &mut PgTx<'_, Postgres>,
        op: &WriteOp,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE documents \
             SET data = {}, version = documents.version + 1, updated_at = $3 \
             WHERE collection = $1 AND id = $2",
            field_fold_expr("documents.data", &op.fields, 4),
        );

        let query = sqlx::query(&sql)
            .bind(&op.path.collection)
            .bind(&op.path.id)
            .bind(now);
        let result = bind_fields(query, &op.fields, now)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(op.path.clone()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query(
            "SELECT data, version, updated_at FROM documents WHERE collection = $1 AND id = $2",
        )
        .bind(&path.collection)
        .bind(&path.id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => {
                let data: Value = row.try_get("data").map_err(map_sqlx_error)?;
                let version: i64 = row.try_get("version").map_err(map_sqlx_error)?;
                let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(map_sqlx_error)?;
                Ok(Some(Document {
                    path: path.clone(),
                    data,
                    version: version.max(0) as u64,
                    updated_at,
                }))
            }
            None => Ok(None),
        }
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        // Equality filters become a jsonb containment object, so types are
        // preserved and nothing is interpolated into the SQL text.
        let mut containment = Map::new();
        for (field, value) in &query.filters {
            containment.insert(field.clone(), value.clone());
        }

        let mut sql = String::from(
            "SELECT id, data, version, updated_at FROM documents \
             WHERE collection = $1 AND data @> $2",
        );
        if let Some((field, direction)) = &query.order_by {
            // Order fields are code-supplied identifiers, never caller input.
            if field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                sql.push_str(&format!(
                    " ORDER BY data->>'{}' {}",
                    field,
                    match direction {
                        SortDirection::Ascending => "ASC",
                        SortDirection::Descending => "DESC",
                    }
                ));
            } else {
                warn!(field = %field, "refusing to order by suspicious field name");
            }
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let rows = sqlx::query(&sql)
            .bind(&query.collection)
            .bind(Value::Object(containment))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut docs = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(map_sqlx_error)?;
            let data: Value = row.try_get("data").map_err(map_sqlx_error)?;
            let version: i64 = row.try_get("version").map_err(map_sqlx_error)?;
            let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(map_sqlx_error)?;
            docs.push(Document {
                path: DocPath::new(query.collection.clone(), id),
                data,
                version: version.max(0) as u64,
                updated_at,
            });
        }
        Ok(docs)
    }

    async fn commit(&self, writes: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // One server-assigned timestamp for the whole commit.
        let now: DateTime<Utc> = sqlx::query_scalar("SELECT now()")
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let mut events = Vec::with_capacity(writes.len());
        for op in &writes {
            match op.mode {
                WriteMode::Create => Self::insert_new(&mut tx, op, now).await?,
                WriteMode::Merge => Self::upsert_merge(&mut tx, op, now).await?,
                WriteMode::Update => Self::update_existing(&mut tx, op, now).await?,
            }
            events.push(ChangeEvent {
                collection: op.path.collection.clone(),
                doc_id: op.path.id.clone(),
            });
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        for event in events {
            let _ = self.changes.send(event);
        }
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }
}

/// Fold the field map into nested `jsonb_deep_set`/`jsonb_increment` calls
/// over `base`, two bind placeholders per field (path, value), numbered
/// from `first_param`. Bind order must match [`bind_fields`].
fn field_fold_expr(
    base: &str,
    fields: &BTreeMap<String, FieldValue>,
    first_param: usize,
) -> String {
    let mut expr = base.to_string();
    let mut param = first_param;
    for field in fields.values() {
        let func = match field {
            FieldValue::Increment(_) => "jsonb_increment",
            _ => "jsonb_deep_set",
        };
        expr = format!("{}({}, ${}, ${})", func, expr, param, param + 1);
        param += 2;
    }
    expr
}

fn bind_fields<'q>(
    mut query: PgQuery<'q>,
    fields: &BTreeMap<String, FieldValue>,
    now: DateTime<Utc>,
) -> PgQuery<'q> {
    for (name, field) in fields {
        let path: Vec<String> = name.split('.').map(str::to_string).collect();
        query = query.bind(path);
        query = match field {
            FieldValue::Json(value) => query.bind(value.clone()),
            FieldValue::ServerTimestamp => query.bind(Value::String(now.to_rfc3339())),
            FieldValue::Increment(by) => query.bind(*by),
        };
    }
    query
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // serialization_failure / deadlock_detected: safe to retry.
            Some("40001") | Some("40P01") => StoreError::Conflict(db.message().to_string()),
            _ => StoreError::Backend(db.message().to_string()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::Unavailable(err.to_string()),
        _ => StoreError::Backend(err.to_string()),
    }
}
