//! Persistence Gateway: single-document, field-scoped upserts over the
//! user profile, plus durable finalize-task records.
//!
//! Updates are expressed as dotted paths (`"tests.riasec"`,
//! `"aiInsights.partials.crossExam"`) merged into the JSONB document without
//! clobbering sibling keys. Empty values (null, "", {}, []) are pruned from
//! an update before merging, matching how the UI resubmits sparse forms.
//!
//! Carried in `AppState` as `Arc<dyn ProfileStore>` so handlers and the
//! pipeline never see the storage backend.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::profile::models::normalize_email;
use crate::profile::tasks::{TaskRecord, TaskStatus, TaskUpdate};

/// Outcome of an upsert: whether an existing document matched and whether a
/// new one was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub matched: bool,
    pub created: bool,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Full document lookup by (normalized) email.
    async fn find_profile(&self, email: &str) -> Result<Option<Value>, AppError>;

    /// Merges values at the given dotted paths, creating the document when
    /// it does not exist. Sibling keys at every level are preserved.
    async fn upsert_fields(
        &self,
        email: &str,
        fields: BTreeMap<String, Value>,
    ) -> Result<UpsertOutcome, AppError>;

    /// Convenience wrapper targeting the `finalAnalysis` path.
    async fn record_final_analysis(&self, email: &str, report: Value) -> Result<(), AppError> {
        let mut fields = BTreeMap::new();
        fields.insert("finalAnalysis".to_string(), report);
        self.upsert_fields(email, fields).await?;
        Ok(())
    }

    async fn create_task(&self, task: TaskRecord) -> Result<(), AppError>;

    /// Applies a partial update to a running task. Updates to terminal
    /// tasks are silently dropped (terminal states are immutable).
    async fn update_task(&self, task_id: Uuid, update: TaskUpdate) -> Result<(), AppError>;

    async fn find_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, AppError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Pure merge helpers
// ────────────────────────────────────────────────────────────────────────────

/// True for values an update should not write: null, "", {}, [].
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// Recursively drops empty keys from an update value.
/// Returns `None` when nothing meaningful remains.
pub fn prune_empty(value: Value) -> Option<Value> {
    match value {
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| prune_empty(v).map(|v| (k, v)))
                .collect();
            if pruned.is_empty() {
                None
            } else {
                Some(Value::Object(pruned))
            }
        }
        v if is_empty_value(&v) => None,
        v => Some(v),
    }
}

/// Sets `value` at a dotted `path` inside `doc`, creating intermediate
/// objects as needed. Existing sibling keys at every level are untouched;
/// a non-object found mid-path is replaced by an object (the path wins).
pub fn merge_at_path(doc: &mut Value, path: &str, value: Value) {
    if !doc.is_object() {
        *doc = json!({});
    }

    let mut current = doc;
    let segments: Vec<&str> = path.split('.').collect();

    for (i, segment) in segments.iter().enumerate() {
        let map = current
            .as_object_mut()
            .expect("current is always an object here");

        if i == segments.len() - 1 {
            map.insert((*segment).to_string(), value);
            return;
        }

        let entry = map
            .entry((*segment).to_string())
            .or_insert_with(|| json!({}));
        if !entry.is_object() {
            *entry = json!({});
        }
        current = entry;
    }
}

/// Applies a pruned field map to a document. Returns how many paths were
/// actually written.
fn apply_fields(doc: &mut Value, fields: &BTreeMap<String, Value>) -> usize {
    let mut written = 0;
    for (path, value) in fields {
        if let Some(v) = prune_empty(value.clone()) {
            merge_at_path(doc, path, v);
            written += 1;
        }
    }
    written
}

// ────────────────────────────────────────────────────────────────────────────
// PostgreSQL implementation
// ────────────────────────────────────────────────────────────────────────────

/// JSONB-backed store. The read-merge-write runs inside a transaction with
/// `FOR UPDATE` row locking, which serializes concurrent field-scoped
/// writers per document.
pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn find_profile(&self, email: &str) -> Result<Option<Value>, AppError> {
        let email = normalize_email(email);
        let doc: Option<Value> =
            sqlx::query_scalar("SELECT doc FROM profiles WHERE email = $1")
                .bind(&email)
                .fetch_optional(&self.pool)
                .await?;
        Ok(doc)
    }

    async fn upsert_fields(
        &self,
        email: &str,
        fields: BTreeMap<String, Value>,
    ) -> Result<UpsertOutcome, AppError> {
        let email = normalize_email(email);

        let mut tx = self.pool.begin().await?;

        let existing: Option<Value> =
            sqlx::query_scalar("SELECT doc FROM profiles WHERE email = $1 FOR UPDATE")
                .bind(&email)
                .fetch_optional(&mut *tx)
                .await?;

        let matched = existing.is_some();
        let mut doc = existing.unwrap_or_else(|| json!({ "email": email }));

        let written = apply_fields(&mut doc, &fields);
        if written == 0 {
            debug!(email = %email, "Nothing to upsert (all fields empty)");
            tx.commit().await?;
            return Ok(UpsertOutcome {
                matched,
                created: false,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO profiles (email, doc) VALUES ($1, $2)
            ON CONFLICT (email) DO UPDATE SET doc = $2, updated_at = now()
            "#,
        )
        .bind(&email)
        .bind(&doc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if matched {
            debug!(email = %email, paths = written, "Profile updated");
        } else {
            info!(email = %email, "Profile created");
        }

        Ok(UpsertOutcome {
            matched,
            created: !matched,
        })
    }

    async fn create_task(&self, task: TaskRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO career_tasks
                (task_id, email, status, current_stage, partial_report, error,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(task.task_id)
        .bind(&task.email)
        .bind(task.status.as_str())
        .bind(task.current_stage)
        .bind(&task.partial_report)
        .bind(&task.error)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_task(&self, task_id: Uuid, update: TaskUpdate) -> Result<(), AppError> {
        // `status = 'running'` in the WHERE clause keeps terminal rows immutable.
        let result = sqlx::query(
            r#"
            UPDATE career_tasks SET
                status = COALESCE($2, status),
                current_stage = COALESCE($3, current_stage),
                partial_report = COALESCE($4, partial_report),
                error = COALESCE($5, error),
                updated_at = now()
            WHERE task_id = $1 AND status = 'running'
            "#,
        )
        .bind(task_id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.current_stage)
        .bind(&update.partial_report)
        .bind(&update.error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(%task_id, "Ignored update to missing or terminal task");
        }
        Ok(())
    }

    async fn find_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, AppError> {
        let row = sqlx::query(
            "SELECT task_id, email, status, current_stage, partial_report, error, \
             created_at, updated_at \
             FROM career_tasks WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let status_str: String = row.get("status");
        let status = TaskStatus::parse(&status_str).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("Corrupt task status: {status_str}"))
        })?;

        Ok(Some(TaskRecord {
            task_id: row.get("task_id"),
            email: row.get("email"),
            status,
            current_stage: row.get("current_stage"),
            partial_report: row.get("partial_report"),
            error: row.get("error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory implementation (tests, local development)
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<String, Value>>,
    tasks: RwLock<HashMap<Uuid, TaskRecord>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn find_profile(&self, email: &str) -> Result<Option<Value>, AppError> {
        let email = normalize_email(email);
        Ok(self.profiles.read().await.get(&email).cloned())
    }

    async fn upsert_fields(
        &self,
        email: &str,
        fields: BTreeMap<String, Value>,
    ) -> Result<UpsertOutcome, AppError> {
        let email = normalize_email(email);
        let mut profiles = self.profiles.write().await;

        let matched = profiles.contains_key(&email);
        let mut doc = profiles
            .get(&email)
            .cloned()
            .unwrap_or_else(|| json!({ "email": email }));

        // Same as the Pg path: an all-empty update never creates a document.
        let written = apply_fields(&mut doc, &fields);
        if written == 0 {
            return Ok(UpsertOutcome {
                matched,
                created: false,
            });
        }
        profiles.insert(email, doc);

        Ok(UpsertOutcome {
            matched,
            created: !matched,
        })
    }

    async fn create_task(&self, task: TaskRecord) -> Result<(), AppError> {
        self.tasks.write().await.insert(task.task_id, task);
        Ok(())
    }

    async fn update_task(&self, task_id: Uuid, update: TaskUpdate) -> Result<(), AppError> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&task_id) {
            Some(task) => {
                if !update.apply(task) {
                    warn!(%task_id, "Ignored update to terminal task");
                }
            }
            None => warn!(%task_id, "Ignored update to missing task"),
        }
        Ok(())
    }

    async fn find_task(&self, task_id: Uuid) -> Result<Option<TaskRecord>, AppError> {
        Ok(self.tasks.read().await.get(&task_id).cloned())
    }
}
