//! Lead pipeline board.
//!
//! Leads sit in one column per pipeline status. A drop resolved by
//! `collision::resolve_drop` lands either on a column id (the status name) or
//! on another lead's card; `Board::move_lead` applies it in memory and
//! `commit_drop` persists it, rolling the board back if the write fails.

pub mod collision;
pub mod drag;
pub mod geometry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{CrmDb, DbError};

/// Pipeline columns, left to right. Stored verbatim (case-sensitive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadStatus {
    New,
    Contacted,
    Quoted,
    Sold,
    Lost,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 5] = [
        LeadStatus::New,
        LeadStatus::Contacted,
        LeadStatus::Quoted,
        LeadStatus::Sold,
        LeadStatus::Lost,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LeadStatus::New => "New",
            LeadStatus::Contacted => "Contacted",
            LeadStatus::Quoted => "Quoted",
            LeadStatus::Sold => "Sold",
            LeadStatus::Lost => "Lost",
        }
    }

    /// Column id to status. Column ids are the status names.
    pub fn from_column_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == id)
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("Unknown lead: {0}")]
    UnknownLead(String),

    #[error("Unknown drop target: {0}")]
    UnknownTarget(String),

    #[error("Failed to persist lead move: {0}")]
    Persist(#[from] DbError),
}

/// A move applied to the board, kept so it can be undone.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadMove {
    pub lead_id: String,
    pub from: LeadStatus,
    pub to: LeadStatus,
    /// Position in the board's lead order before the move.
    pub from_index: usize,
    pub previous_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct Board {
    leads: Vec<Lead>,
}

impl Board {
    pub fn new(leads: Vec<Lead>) -> Self {
        Self { leads }
    }

    pub fn leads(&self) -> &[Lead] {
        &self.leads
    }

    pub fn lead(&self, id: &str) -> Option<&Lead> {
        self.leads.iter().find(|l| l.id == id)
    }

    /// Leads in one column, in board order.
    pub fn column(&self, status: LeadStatus) -> Vec<&Lead> {
        self.leads.iter().filter(|l| l.status == status).collect()
    }

    /// Move `lead_id` onto `over_id`.
    ///
    /// `over_id` may be a column id (lead goes to the end of that column) or
    /// another lead (lead takes that card's slot and status). Dropping a card
    /// on itself returns `Ok(None)`.
    pub fn move_lead(
        &mut self,
        lead_id: &str,
        over_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<LeadMove>, BoardError> {
        if lead_id == over_id {
            return Ok(None);
        }
        let from_index = self
            .leads
            .iter()
            .position(|l| l.id == lead_id)
            .ok_or_else(|| BoardError::UnknownLead(lead_id.to_string()))?;

        let (to, anchor) = if let Some(status) = LeadStatus::from_column_id(over_id) {
            (status, None)
        } else if let Some(target) = self.lead(over_id) {
            (target.status, Some(over_id.to_string()))
        } else {
            return Err(BoardError::UnknownTarget(over_id.to_string()));
        };

        let mut lead = self.leads.remove(from_index);
        let mv = LeadMove {
            lead_id: lead.id.clone(),
            from: lead.status,
            to,
            from_index,
            previous_updated_at: lead.updated_at,
        };
        lead.status = to;
        lead.updated_at = now;

        let insert_at = match anchor {
            Some(anchor_id) => self
                .leads
                .iter()
                .position(|l| l.id == anchor_id)
                .unwrap_or(self.leads.len()),
            None => self
                .leads
                .iter()
                .rposition(|l| l.status == to)
                .map(|i| i + 1)
                .unwrap_or(self.leads.len()),
        };
        self.leads.insert(insert_at, lead);
        Ok(Some(mv))
    }

    /// Undo a move returned by `move_lead`.
    pub fn revert(&mut self, mv: &LeadMove) {
        let Some(pos) = self.leads.iter().position(|l| l.id == mv.lead_id) else {
            return;
        };
        let mut lead = self.leads.remove(pos);
        lead.status = mv.from;
        lead.updated_at = mv.previous_updated_at;
        let at = mv.from_index.min(self.leads.len());
        self.leads.insert(at, lead);
    }
}

/// Apply a drop to the board and persist the new status.
///
/// On a write failure the board is restored and the error returned.
pub fn commit_drop(
    board: &mut Board,
    db: &CrmDb,
    lead_id: &str,
    over_id: &str,
) -> Result<Option<LeadMove>, BoardError> {
    let now = Utc::now();
    let Some(mv) = board.move_lead(lead_id, over_id, now)? else {
        return Ok(None);
    };
    log::info!("Lead board: moving {} {} -> {}", mv.lead_id, mv.from, mv.to);

    if let Err(e) = db.update_lead_status(&mv.lead_id, mv.to, &now.to_rfc3339()) {
        log::error!("Lead board: failed to persist move of {}: {}", mv.lead_id, e);
        board.revert(&mv);
        return Err(e.into());
    }
    Ok(Some(mv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn lead(id: &str, status: LeadStatus) -> Lead {
        Lead {
            id: id.to_string(),
            first_name: "Ada".to_string(),
            last_name: id.to_string(),
            status,
            created_at: ts(1_000),
            updated_at: ts(1_000),
        }
    }

    fn board() -> Board {
        Board::new(vec![
            lead("a", LeadStatus::New),
            lead("b", LeadStatus::New),
            lead("c", LeadStatus::Contacted),
            lead("d", LeadStatus::Contacted),
        ])
    }

    fn ids(board: &Board, status: LeadStatus) -> Vec<&str> {
        board.column(status).iter().map(|l| l.id.as_str()).collect()
    }

    #[test]
    fn drop_on_column_appends_and_restamps() {
        let mut b = board();
        let mv = b.move_lead("a", "Contacted", ts(2_000)).unwrap().unwrap();
        assert_eq!(mv.from, LeadStatus::New);
        assert_eq!(mv.to, LeadStatus::Contacted);
        assert_eq!(ids(&b, LeadStatus::Contacted), vec!["c", "d", "a"]);
        assert_eq!(b.lead("a").unwrap().updated_at, ts(2_000));
    }

    #[test]
    fn drop_on_card_takes_its_slot_and_status() {
        let mut b = board();
        b.move_lead("b", "d", ts(2_000)).unwrap();
        assert_eq!(ids(&b, LeadStatus::Contacted), vec!["c", "b", "d"]);
        assert_eq!(ids(&b, LeadStatus::New), vec!["a"]);
    }

    #[test]
    fn drop_on_empty_column() {
        let mut b = board();
        b.move_lead("c", "Sold", ts(2_000)).unwrap();
        assert_eq!(ids(&b, LeadStatus::Sold), vec!["c"]);
    }

    #[test]
    fn self_drop_is_noop() {
        let mut b = board();
        assert!(b.move_lead("a", "a", ts(2_000)).unwrap().is_none());
        assert_eq!(b.lead("a").unwrap().updated_at, ts(1_000));
    }

    #[test]
    fn unknown_lead_and_target_are_rejected() {
        let mut b = board();
        assert!(matches!(
            b.move_lead("zz", "New", ts(2_000)),
            Err(BoardError::UnknownLead(_))
        ));
        // Status ids are case-sensitive.
        assert!(matches!(
            b.move_lead("a", "contacted", ts(2_000)),
            Err(BoardError::UnknownTarget(_))
        ));
        assert_eq!(ids(&b, LeadStatus::New), vec!["a", "b"]);
    }

    #[test]
    fn revert_restores_position_and_status() {
        let mut b = board();
        let before = b.leads().to_vec();
        let mv = b.move_lead("a", "d", ts(2_000)).unwrap().unwrap();
        b.revert(&mv);
        assert_eq!(b.leads(), before.as_slice());
    }

    #[test]
    fn commit_drop_persists_status() {
        let db = CrmDb::open_in_memory().unwrap();
        let mut b = board();
        for l in b.leads() {
            db.upsert_lead(l).unwrap();
        }
        commit_drop(&mut b, &db, "a", "Quoted").unwrap();
        assert_eq!(db.get_lead("a").unwrap().unwrap().status, LeadStatus::Quoted);
    }

    #[test]
    fn commit_drop_reverts_when_row_is_missing() {
        let db = CrmDb::open_in_memory().unwrap();
        let mut b = board();
        let err = commit_drop(&mut b, &db, "a", "Quoted").unwrap_err();
        assert!(matches!(err, BoardError::Persist(DbError::NotFound(_))));
        assert_eq!(b.lead("a").unwrap().status, LeadStatus::New);
    }
}
