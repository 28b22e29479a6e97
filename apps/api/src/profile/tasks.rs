//! Durable background-task records for the finalize pipeline.
//!
//! A task is a simple state machine: `running → completed | failed`.
//! Terminal states are immutable; the store layer refuses updates once a
//! task has left `running`, so a crashed worker can never resurrect or
//! overwrite a finished record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(TaskStatus::Running),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// One finalize-task record, persisted so status polling survives restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub email: String,
    pub status: TaskStatus,
    pub current_stage: i32,
    pub partial_report: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// A freshly created record: running at stage 0, nothing computed yet.
    pub fn new(task_id: Uuid, email: String) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            email,
            status: TaskStatus::Running,
            current_stage: 0,
            partial_report: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied to a running task. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub current_stage: Option<i32>,
    pub partial_report: Option<Value>,
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn stage(stage: i32) -> Self {
        Self {
            current_stage: Some(stage),
            ..Self::default()
        }
    }

    pub fn completed(report: Value) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            partial_report: Some(report),
            ..Self::default()
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error: Some(error),
            ..Self::default()
        }
    }

    /// Applies this update to a record. No-op when the record is terminal.
    pub fn apply(&self, record: &mut TaskRecord) -> bool {
        if record.status.is_terminal() {
            return false;
        }
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(stage) = self.current_stage {
            record.current_stage = stage;
        }
        if let Some(report) = &self.partial_report {
            record.partial_report = Some(report.clone());
        }
        if let Some(error) = &self.error {
            record.error = Some(error.clone());
        }
        record.updated_at = Utc::now();
        true
    }
}
