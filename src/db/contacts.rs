use super::*;

const CONTACT_COLUMNS: &str = "id, workspace_id, account_id, first_name, last_name, email, phone,
     lifecycle_stage, job_title, occupation, ai_risk_score, ai_lifetime_value, tags,
     last_contact_at, summary_embedding, created_at, updated_at";

fn map_contact(row: &rusqlite::Row) -> rusqlite::Result<DbContact> {
    Ok(DbContact {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        account_id: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        email: row.get(5)?,
        phone: row.get(6)?,
        lifecycle_stage: row.get(7)?,
        job_title: row.get(8)?,
        occupation: row.get(9)?,
        ai_risk_score: row.get(10)?,
        ai_lifetime_value: row.get(11)?,
        tags: tags_from_json(row.get(12)?),
        last_contact_at: row.get(13)?,
        summary_embedding: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

impl CrmDb {
    // =========================================================================
    // Contacts
    // =========================================================================

    /// Insert or replace a contact. An existing summary embedding is kept
    /// unless the incoming row carries one.
    pub fn upsert_contact(&self, contact: &DbContact) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO contacts (
                id, workspace_id, account_id, first_name, last_name, email, phone,
                lifecycle_stage, job_title, occupation, ai_risk_score, ai_lifetime_value,
                tags, last_contact_at, summary_embedding, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(id) DO UPDATE SET
                account_id = excluded.account_id,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                email = excluded.email,
                phone = excluded.phone,
                lifecycle_stage = excluded.lifecycle_stage,
                job_title = excluded.job_title,
                occupation = excluded.occupation,
                ai_risk_score = excluded.ai_risk_score,
                ai_lifetime_value = excluded.ai_lifetime_value,
                tags = excluded.tags,
                last_contact_at = excluded.last_contact_at,
                summary_embedding = COALESCE(excluded.summary_embedding, contacts.summary_embedding),
                updated_at = excluded.updated_at",
            params![
                contact.id,
                contact.workspace_id,
                contact.account_id,
                contact.first_name,
                contact.last_name,
                contact.email,
                contact.phone,
                contact.lifecycle_stage,
                contact.job_title,
                contact.occupation,
                contact.ai_risk_score,
                contact.ai_lifetime_value,
                tags_to_json(&contact.tags),
                contact.last_contact_at,
                contact.summary_embedding,
                contact.created_at,
                contact.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_contact(&self, id: &str, workspace_id: &str) -> Result<Option<DbContact>, DbError> {
        let sql = format!(
            "SELECT {} FROM contacts WHERE id = ?1 AND workspace_id = ?2",
            CONTACT_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![id, workspace_id], map_contact)
            .optional()?)
    }

    /// Contacts linked to an account, by name.
    pub fn get_account_contacts(
        &self,
        account_id: &str,
        workspace_id: &str,
    ) -> Result<Vec<DbContact>, DbError> {
        let sql = format!(
            "SELECT {} FROM contacts WHERE account_id = ?1 AND workspace_id = ?2
             ORDER BY last_name, first_name",
            CONTACT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![account_id, workspace_id], map_contact)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Contacts in a workspace that already carry a summary embedding.
    pub fn get_embedded_contacts(&self, workspace_id: &str) -> Result<Vec<DbContact>, DbError> {
        let sql = format!(
            "SELECT {} FROM contacts
             WHERE workspace_id = ?1 AND summary_embedding IS NOT NULL",
            CONTACT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![workspace_id], map_contact)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_contact_ids(&self, workspace_id: &str) -> Result<Vec<String>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM contacts WHERE workspace_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![workspace_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Store a contact's summary embedding literal and bump `updated_at`.
    pub fn set_contact_summary_embedding(
        &self,
        id: &str,
        workspace_id: &str,
        embedding: &str,
        updated_at: &str,
    ) -> Result<(), DbError> {
        let changed = self.conn.execute(
            "UPDATE contacts SET summary_embedding = ?1, updated_at = ?2
             WHERE id = ?3 AND workspace_id = ?4",
            params![embedding, updated_at, id, workspace_id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("contact {}", id)));
        }
        Ok(())
    }
}
