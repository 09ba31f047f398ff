use super::*;

const INTERACTION_COLUMNS: &str = "id, workspace_id, contact_id, account_id, type, subject,
     content, sentiment, outcome, interacted_at, embedding, created_at, updated_at";

fn map_interaction(row: &rusqlite::Row) -> rusqlite::Result<DbInteraction> {
    Ok(DbInteraction {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        contact_id: row.get(2)?,
        account_id: row.get(3)?,
        interaction_type: row.get(4)?,
        subject: row.get(5)?,
        content: row.get(6)?,
        sentiment: row.get(7)?,
        outcome: row.get(8)?,
        interacted_at: row.get(9)?,
        embedding: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl CrmDb {
    // =========================================================================
    // Interactions
    // =========================================================================

    pub fn upsert_interaction(&self, interaction: &DbInteraction) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO interactions (
                id, workspace_id, contact_id, account_id, type, subject, content,
                sentiment, outcome, interacted_at, embedding, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                contact_id = excluded.contact_id,
                account_id = excluded.account_id,
                type = excluded.type,
                subject = excluded.subject,
                content = excluded.content,
                sentiment = excluded.sentiment,
                outcome = excluded.outcome,
                interacted_at = excluded.interacted_at,
                embedding = COALESCE(excluded.embedding, interactions.embedding),
                updated_at = excluded.updated_at",
            params![
                interaction.id,
                interaction.workspace_id,
                interaction.contact_id,
                interaction.account_id,
                interaction.interaction_type,
                interaction.subject,
                interaction.content,
                interaction.sentiment,
                interaction.outcome,
                interaction.interacted_at,
                interaction.embedding,
                interaction.created_at,
                interaction.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_interaction(&self, id: &str) -> Result<Option<DbInteraction>, DbError> {
        let sql = format!("SELECT {} FROM interactions WHERE id = ?1", INTERACTION_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, params![id], map_interaction)
            .optional()?)
    }

    /// A contact's interactions at or after `since` (RFC 3339), newest first.
    pub fn get_recent_contact_interactions(
        &self,
        contact_id: &str,
        since: &str,
        limit: usize,
    ) -> Result<Vec<DbInteraction>, DbError> {
        let sql = format!(
            "SELECT {} FROM interactions
             WHERE contact_id = ?1 AND interacted_at >= ?2
             ORDER BY interacted_at DESC
             LIMIT ?3",
            INTERACTION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![contact_id, since, limit as i64], map_interaction)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_embedded_interactions(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<DbInteraction>, DbError> {
        let sql = format!(
            "SELECT {} FROM interactions
             WHERE workspace_id = ?1 AND embedding IS NOT NULL",
            INTERACTION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![workspace_id], map_interaction)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_interaction_ids(&self, workspace_id: &str) -> Result<Vec<String>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM interactions WHERE workspace_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![workspace_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn set_interaction_embedding(
        &self,
        id: &str,
        embedding: &str,
        updated_at: &str,
    ) -> Result<(), DbError> {
        let changed = self.conn.execute(
            "UPDATE interactions SET embedding = ?1, updated_at = ?2 WHERE id = ?3",
            params![embedding, updated_at, id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("interaction {}", id)));
        }
        Ok(())
    }
}
