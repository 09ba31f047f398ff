use super::*;

const ACCOUNT_COLUMNS: &str = "id, workspace_id, name, industry, employee_count, annual_revenue,
     ai_risk_score, ai_lifetime_value, tags, summary_embedding, created_at, updated_at";

fn map_account(row: &rusqlite::Row) -> rusqlite::Result<DbAccount> {
    Ok(DbAccount {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        name: row.get(2)?,
        industry: row.get(3)?,
        employee_count: row.get(4)?,
        annual_revenue: row.get(5)?,
        ai_risk_score: row.get(6)?,
        ai_lifetime_value: row.get(7)?,
        tags: tags_from_json(row.get(8)?),
        summary_embedding: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl CrmDb {
    // =========================================================================
    // Accounts
    // =========================================================================

    pub fn upsert_account(&self, account: &DbAccount) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO accounts (
                id, workspace_id, name, industry, employee_count, annual_revenue,
                ai_risk_score, ai_lifetime_value, tags, summary_embedding, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                industry = excluded.industry,
                employee_count = excluded.employee_count,
                annual_revenue = excluded.annual_revenue,
                ai_risk_score = excluded.ai_risk_score,
                ai_lifetime_value = excluded.ai_lifetime_value,
                tags = excluded.tags,
                summary_embedding = COALESCE(excluded.summary_embedding, accounts.summary_embedding),
                updated_at = excluded.updated_at",
            params![
                account.id,
                account.workspace_id,
                account.name,
                account.industry,
                account.employee_count,
                account.annual_revenue,
                account.ai_risk_score,
                account.ai_lifetime_value,
                tags_to_json(&account.tags),
                account.summary_embedding,
                account.created_at,
                account.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_account(&self, id: &str, workspace_id: &str) -> Result<Option<DbAccount>, DbError> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE id = ?1 AND workspace_id = ?2",
            ACCOUNT_COLUMNS
        );
        Ok(self
            .conn
            .query_row(&sql, params![id, workspace_id], map_account)
            .optional()?)
    }

    pub fn list_account_ids(&self, workspace_id: &str) -> Result<Vec<String>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM accounts WHERE workspace_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![workspace_id], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn set_account_summary_embedding(
        &self,
        id: &str,
        workspace_id: &str,
        embedding: &str,
        updated_at: &str,
    ) -> Result<(), DbError> {
        let changed = self.conn.execute(
            "UPDATE accounts SET summary_embedding = ?1, updated_at = ?2
             WHERE id = ?3 AND workspace_id = ?4",
            params![embedding, updated_at, id, workspace_id],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("account {}", id)));
        }
        Ok(())
    }
}
