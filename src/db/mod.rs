//! SQLite store for CRM rows and the lead pipeline.
//!
//! The database lives at `~/.policydesk/policydesk.db` unless the config points
//! elsewhere. Embedding columns hold the bracketed float literal the web tier
//! writes, so rows can be exchanged verbatim.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};

use crate::kanban::{Lead, LeadStatus};

pub mod types;
pub use types::*;

mod accounts;
mod contacts;
mod interactions;

pub struct CrmDb {
    conn: Connection,
}

impl CrmDb {
    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(&Self) -> Result<T, DbError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(self) {
            Ok(val) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at the default location.
    pub fn open() -> Result<Self, DbError> {
        Self::open_at(Self::db_path()?)
    }

    /// Open a database at an explicit path, creating parent directories.
    pub fn open_at(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, DbError> {
        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    /// `~/.policydesk/policydesk.db`
    pub fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".policydesk").join("policydesk.db"))
    }

    // =========================================================================
    // Leads
    // =========================================================================

    pub fn upsert_lead(&self, lead: &Lead) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO leads (id, first_name, last_name, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                lead.id,
                lead.first_name,
                lead.last_name,
                lead.status.as_str(),
                lead.created_at.to_rfc3339(),
                lead.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_lead(&self, id: &str) -> Result<Option<Lead>, DbError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, first_name, last_name, status, created_at, updated_at
                 FROM leads WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, first_name, last_name, status, created_at, updated_at)| {
            Ok(Lead {
                status: LeadStatus::from_column_id(&status)
                    .ok_or_else(|| DbError::InvalidData(format!("lead status {}", status)))?,
                created_at: parse_ts(&created_at)?,
                updated_at: parse_ts(&updated_at)?,
                id,
                first_name,
                last_name,
            })
        })
        .transpose()
    }

    /// All leads in board order (pipeline position, then creation time).
    pub fn list_leads(&self) -> Result<Vec<Lead>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT l.id FROM leads l
             JOIN pipeline_statuses p ON p.name = l.status
             ORDER BY p.position, l.created_at",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut leads = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(lead) = self.get_lead(&id)? {
                leads.push(lead);
            }
        }
        Ok(leads)
    }

    /// Set a lead's pipeline status. Errors with `NotFound` if no row matched.
    pub fn update_lead_status(
        &self,
        id: &str,
        status: LeadStatus,
        updated_at: &str,
    ) -> Result<(), DbError> {
        let changed = self.conn.execute(
            "UPDATE leads SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), updated_at, id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("lead {}", id)));
        }
        Ok(())
    }
}

fn parse_ts(raw: &str) -> Result<chrono::DateTime<chrono::Utc>, DbError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| DbError::InvalidData(format!("timestamp {}: {}", raw, e)))
}

// =============================================================================
// Shared test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use super::*;

    /// Temporary on-disk database. The `TempDir` is leaked so the file outlives
    /// the helper.
    pub fn test_db() -> CrmDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        CrmDb::open_at(path).expect("Failed to open test database")
    }

    pub fn sample_account(id: &str, workspace: &str) -> DbAccount {
        DbAccount {
            id: id.to_string(),
            workspace_id: workspace.to_string(),
            name: "Harbor Freight Logistics".to_string(),
            tags: vec![],
            created_at: "2025-01-01T00:00:00+00:00".to_string(),
            updated_at: "2025-01-01T00:00:00+00:00".to_string(),
            ..Default::default()
        }
    }

    pub fn sample_contact(id: &str, workspace: &str) -> DbContact {
        DbContact {
            id: id.to_string(),
            workspace_id: workspace.to_string(),
            first_name: "Maria".to_string(),
            last_name: "Gonzalez".to_string(),
            lifecycle_stage: "customer".to_string(),
            created_at: "2025-01-01T00:00:00+00:00".to_string(),
            updated_at: "2025-01-01T00:00:00+00:00".to_string(),
            ..Default::default()
        }
    }

    pub fn sample_interaction(id: &str, workspace: &str, contact_id: &str) -> DbInteraction {
        DbInteraction {
            id: id.to_string(),
            workspace_id: workspace.to_string(),
            contact_id: Some(contact_id.to_string()),
            interaction_type: "call".to_string(),
            interacted_at: "2025-01-02T15:00:00+00:00".to_string(),
            created_at: "2025-01-02T15:00:00+00:00".to_string(),
            updated_at: "2025-01-02T15:00:00+00:00".to_string(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::test_db;
    use super::*;
    use chrono::{TimeZone, Utc};

    fn lead(id: &str, status: LeadStatus, created: i64) -> Lead {
        let at = Utc.timestamp_opt(created, 0).single().unwrap();
        Lead {
            id: id.to_string(),
            first_name: "Sam".to_string(),
            last_name: id.to_string(),
            status,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn test_open_at_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("crm.db");
        CrmDb::open_at(&path).expect("open");
        assert!(path.exists());
    }

    #[test]
    fn test_lead_round_trip_and_status_update() {
        let db = test_db();
        db.upsert_lead(&lead("l1", LeadStatus::New, 100)).unwrap();
        db.update_lead_status("l1", LeadStatus::Sold, "2025-03-01T00:00:00+00:00")
            .unwrap();
        let stored = db.get_lead("l1").unwrap().unwrap();
        assert_eq!(stored.status, LeadStatus::Sold);
        assert_eq!(stored.updated_at.to_rfc3339(), "2025-03-01T00:00:00+00:00");
    }

    #[test]
    fn test_update_missing_lead_is_not_found() {
        let db = test_db();
        let err = db
            .update_lead_status("nope", LeadStatus::Lost, "2025-03-01T00:00:00+00:00")
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[test]
    fn test_unknown_status_is_rejected_by_schema() {
        let db = test_db();
        let result = db.conn.execute(
            "INSERT INTO leads (id, first_name, last_name, status, created_at, updated_at)
             VALUES ('x', 'a', 'b', 'contacted', '2025-01-01', '2025-01-01')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_list_leads_in_pipeline_order() {
        let db = test_db();
        db.upsert_lead(&lead("sold", LeadStatus::Sold, 100)).unwrap();
        db.upsert_lead(&lead("new-late", LeadStatus::New, 300)).unwrap();
        db.upsert_lead(&lead("new-early", LeadStatus::New, 200)).unwrap();
        let ids: Vec<String> = db.list_leads().unwrap().into_iter().map(|l| l.id).collect();
        assert_eq!(ids, vec!["new-early", "new-late", "sold"]);
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();
        let result: Result<(), DbError> = db.with_transaction(|tx| {
            tx.upsert_lead(&lead("l1", LeadStatus::New, 100))?;
            Err(DbError::NotFound("forced".into()))
        });
        assert!(result.is_err());
        assert!(db.get_lead("l1").unwrap().is_none());
    }
}
