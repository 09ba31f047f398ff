//! Shared type definitions for the database layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Invalid stored value: {0}")]
    InvalidData(String),
}

/// A row from the `accounts` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbAccount {
    pub id: String,
    pub workspace_id: String,
    pub name: String,
    pub industry: Option<String>,
    pub employee_count: Option<i64>,
    pub annual_revenue: Option<f64>,
    pub ai_risk_score: Option<i64>,
    pub ai_lifetime_value: Option<f64>,
    pub tags: Vec<String>,
    /// Bracketed float literal, e.g. `"[0.1,0.2]"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_embedding: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A row from the `contacts` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbContact {
    pub id: String,
    pub workspace_id: String,
    pub account_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub lifecycle_stage: String,
    pub job_title: Option<String>,
    pub occupation: Option<String>,
    pub ai_risk_score: Option<i64>,
    pub ai_lifetime_value: Option<f64>,
    pub tags: Vec<String>,
    pub last_contact_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_embedding: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl DbContact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A row from the `interactions` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbInteraction {
    pub id: String,
    pub workspace_id: String,
    pub contact_id: Option<String>,
    pub account_id: Option<String>,
    /// call, email, meeting, note, ...
    pub interaction_type: String,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub sentiment: Option<String>,
    pub outcome: Option<String>,
    pub interacted_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub(crate) fn tags_to_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

/// Tags are a JSON array of strings; anything else reads as no tags.
pub(crate) fn tags_from_json(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}
