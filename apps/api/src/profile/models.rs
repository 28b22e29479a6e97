//! User document model.
//!
//! The profile is stored as one JSONB document per user, keyed by normalized
//! email. The document is schemaless on the wire (the UI grows fields over
//! time), so `ProfileDoc` wraps the raw value and exposes typed accessors for
//! the sections the pipeline actually reads. Wire names are camelCase.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Lowercases and trims an email before any lookup or write.
/// Every store operation goes through this first.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Read-only typed view over a stored user document.
#[derive(Debug, Clone)]
pub struct ProfileDoc {
    doc: Value,
}

impl ProfileDoc {
    pub fn new(doc: Value) -> Self {
        Self { doc }
    }

    /// Looks up a dotted path, e.g. `"aiInsights.partials.resume"`.
    pub fn get(&self, dotted: &str) -> Option<&Value> {
        let mut current = &self.doc;
        for segment in dotted.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }

    /// A section of the document as an owned object, `{}` when absent.
    pub fn section(&self, dotted: &str) -> Value {
        self.get(dotted).cloned().unwrap_or_else(|| json!({}))
    }

    pub fn str_at(&self, dotted: &str) -> Option<&str> {
        self.get(dotted).and_then(Value::as_str)
    }

    pub fn personal(&self) -> Value {
        self.section("personal")
    }

    pub fn interests(&self) -> Value {
        self.section("interests")
    }

    pub fn strengths_and_weaknesses(&self) -> Value {
        self.section("strengthsAndWeaknesses")
    }

    pub fn optional_fields(&self) -> Value {
        self.section("optionalFields")
    }

    pub fn tests(&self) -> Value {
        self.section("tests")
    }

    /// A named pipeline-stage partial, `{}` when the stage has not run.
    pub fn partial(&self, stage_name: &str) -> Value {
        self.section(&format!("aiInsights.partials.{stage_name}"))
    }
}

/// Extracted resume data as submitted by the client. Text extraction and
/// keyword matching happen upstream; this service only stores and analyzes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeData {
    pub extracted_text: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub certifications: Vec<String>,
    #[serde(default)]
    pub has_experience: Option<String>,
}

impl ResumeData {
    /// Deduplicates skills case-insensitively, preserving first-seen order.
    pub fn dedupe_skills(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.skills.retain(|s| {
            let key = s.trim().to_lowercase();
            !key.is_empty() && seen.insert(key)
        });
    }
}
