//! Summary-embedding generation for contacts, accounts and interactions.
//!
//! Contacts and accounts are embedded through a short natural-language
//! summary built from their row (plus recent interactions or linked contacts).
//! Interactions are embedded from their content. A summary or content that
//! comes out empty is skipped: no request, no write.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::db::{CrmDb, DbAccount, DbContact, DbError, DbInteraction};
use crate::embeddings::{
    embed_all, embed_one, to_vector_literal, truncate_for_embedding, EmbeddingError,
    EmbeddingProvider,
};

/// Interactions considered for a contact summary.
const RECENT_WINDOW_DAYS: i64 = 30;
const RECENT_FETCH_LIMIT: usize = 10;
const RECENT_SUMMARY_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

fn nonempty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn us_date(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc).format("%-m/%-d/%Y").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// `call on 3/20/2025 (positive) - quote sent`
fn interaction_line(i: &DbInteraction) -> String {
    let mut line = format!("{} on {}", i.interaction_type, us_date(&i.interacted_at));
    if let Some(sentiment) = nonempty(&i.sentiment) {
        line.push_str(&format!(" ({})", sentiment));
    }
    if let Some(outcome) = nonempty(&i.outcome) {
        line.push_str(&format!(" - {}", outcome));
    }
    line
}

/// Summary text for a contact. `recent` is newest first; only the first five
/// are mentioned.
pub fn build_contact_summary(contact: &DbContact, recent: &[DbInteraction]) -> String {
    let mut summary = format!("Contact: {} {}", contact.first_name, contact.last_name);
    if let Some(job) = nonempty(&contact.job_title) {
        summary.push_str(&format!(", {}", job));
    }
    if let Some(occupation) = nonempty(&contact.occupation) {
        summary.push_str(&format!(", {}", occupation));
    }
    summary.push_str(&format!(". Lifecycle stage: {}.", contact.lifecycle_stage));

    if let Some(score) = contact.ai_risk_score.filter(|s| *s != 0) {
        summary.push_str(&format!(" Risk score: {}/100.", score));
    }
    if let Some(value) = contact.ai_lifetime_value.filter(|v| *v != 0.0) {
        summary.push_str(&format!(" Estimated lifetime value: ${}.", value));
    }
    if !contact.tags.is_empty() {
        summary.push_str(&format!(" Tags: {}.", contact.tags.join(", ")));
    }
    if !recent.is_empty() {
        let lines: Vec<String> = recent
            .iter()
            .take(RECENT_SUMMARY_LIMIT)
            .map(interaction_line)
            .collect();
        summary.push_str(&format!(" Recent activity: {}.", lines.join("; ")));
    }
    summary
}

pub fn build_account_summary(account: &DbAccount, contacts: &[DbContact]) -> String {
    let mut summary = format!("Account: {}", account.name);
    if let Some(industry) = nonempty(&account.industry) {
        summary.push_str(&format!(" in {}", industry));
    }
    if let Some(count) = account.employee_count.filter(|c| *c != 0) {
        summary.push_str(&format!(" with {} employees", count));
    }
    if let Some(revenue) = account.annual_revenue.filter(|r| *r != 0.0) {
        summary.push_str(&format!(" and ${} annual revenue", revenue));
    }
    summary.push('.');

    if let Some(score) = account.ai_risk_score.filter(|s| *s != 0) {
        summary.push_str(&format!(" Risk score: {}/100.", score));
    }
    if let Some(value) = account.ai_lifetime_value.filter(|v| *v != 0.0) {
        summary.push_str(&format!(" Estimated lifetime value: ${}.", value));
    }
    if !contacts.is_empty() {
        let people: Vec<String> = contacts
            .iter()
            .map(|c| match nonempty(&c.job_title) {
                Some(job) => format!("{} ({}) - {}", c.full_name(), job, c.lifecycle_stage),
                None => format!("{} - {}", c.full_name(), c.lifecycle_stage),
            })
            .collect();
        summary.push_str(&format!(" Key contacts: {}.", people.join("; ")));
    }
    if !account.tags.is_empty() {
        summary.push_str(&format!(" Tags: {}.", account.tags.join(", ")));
    }
    summary
}

/// Content to embed for an interaction, or `None` if there is nothing to say.
pub fn interaction_embedding_text(interaction: &DbInteraction) -> Option<String> {
    let content = interaction.content.as_deref()?;
    if content.trim().is_empty() {
        return None;
    }
    Some(truncate_for_embedding(content).into_owned())
}

fn contact_summary_from_db(
    db: &CrmDb,
    contact_id: &str,
    workspace_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<String>, DbError> {
    let Some(contact) = db.get_contact(contact_id, workspace_id)? else {
        return Ok(None);
    };
    let since = (now - ChronoDuration::days(RECENT_WINDOW_DAYS)).to_rfc3339();
    let recent = match db.get_recent_contact_interactions(contact_id, &since, RECENT_FETCH_LIMIT) {
        Ok(rows) => rows,
        Err(e) => {
            log::warn!("Embeddings: failed to fetch interactions for {}: {}", contact_id, e);
            Vec::new()
        }
    };
    Ok(Some(build_contact_summary(&contact, &recent)))
}

fn account_summary_from_db(
    db: &CrmDb,
    account_id: &str,
    workspace_id: &str,
) -> Result<Option<String>, DbError> {
    let Some(account) = db.get_account(account_id, workspace_id)? else {
        return Ok(None);
    };
    let contacts = match db.get_account_contacts(account_id, workspace_id) {
        Ok(rows) => rows,
        Err(e) => {
            log::warn!("Embeddings: failed to fetch contacts for {}: {}", account_id, e);
            Vec::new()
        }
    };
    Ok(Some(build_account_summary(&account, &contacts)))
}

/// Re-embed one contact's summary. Returns whether a vector was written.
pub async fn update_contact_summary_embedding<P>(
    db: &CrmDb,
    provider: &P,
    contact_id: &str,
    workspace_id: &str,
) -> Result<bool, VectorStoreError>
where
    P: EmbeddingProvider + ?Sized,
{
    let now = Utc::now();
    let Some(summary) = contact_summary_from_db(db, contact_id, workspace_id, now)? else {
        log::info!("Embeddings: no summary text generated for contact {}", contact_id);
        return Ok(false);
    };
    let vector = embed_one(provider, &summary).await?;
    db.set_contact_summary_embedding(
        contact_id,
        workspace_id,
        &to_vector_literal(&vector),
        &Utc::now().to_rfc3339(),
    )?;
    log::info!("Embeddings: updated summary embedding for contact {}", contact_id);
    Ok(true)
}

pub async fn update_account_summary_embedding<P>(
    db: &CrmDb,
    provider: &P,
    account_id: &str,
    workspace_id: &str,
) -> Result<bool, VectorStoreError>
where
    P: EmbeddingProvider + ?Sized,
{
    let Some(summary) = account_summary_from_db(db, account_id, workspace_id)? else {
        log::info!("Embeddings: no summary text generated for account {}", account_id);
        return Ok(false);
    };
    let vector = embed_one(provider, &summary).await?;
    db.set_account_summary_embedding(
        account_id,
        workspace_id,
        &to_vector_literal(&vector),
        &Utc::now().to_rfc3339(),
    )?;
    log::info!("Embeddings: updated summary embedding for account {}", account_id);
    Ok(true)
}

pub async fn update_interaction_embedding<P>(
    db: &CrmDb,
    provider: &P,
    interaction_id: &str,
) -> Result<bool, VectorStoreError>
where
    P: EmbeddingProvider + ?Sized,
{
    let text = db
        .get_interaction(interaction_id)?
        .as_ref()
        .and_then(interaction_embedding_text);
    let Some(text) = text else {
        log::info!("Embeddings: no content to embed for interaction {}", interaction_id);
        return Ok(false);
    };
    let vector = embed_one(provider, &text).await?;
    db.set_interaction_embedding(
        interaction_id,
        &to_vector_literal(&vector),
        &Utc::now().to_rfc3339(),
    )?;
    log::info!("Embeddings: updated content embedding for interaction {}", interaction_id);
    Ok(true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Contact,
    Account,
    Interaction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReembedReport {
    pub contacts: usize,
    pub accounts: usize,
    pub interactions: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Re-embed every contact, account and interaction in a workspace, sending
/// the texts through the provider in batches.
pub async fn reembed_workspace<P>(
    db: &CrmDb,
    provider: &P,
    workspace_id: &str,
) -> Result<ReembedReport, VectorStoreError>
where
    P: EmbeddingProvider + ?Sized,
{
    let now = Utc::now();
    let mut report = ReembedReport::default();
    let mut targets: Vec<(Target, String)> = Vec::new();
    let mut texts: Vec<String> = Vec::new();

    for id in db.list_contact_ids(workspace_id)? {
        match contact_summary_from_db(db, &id, workspace_id, now)? {
            Some(text) => {
                targets.push((Target::Contact, id));
                texts.push(text);
            }
            None => report.skipped += 1,
        }
    }
    for id in db.list_account_ids(workspace_id)? {
        match account_summary_from_db(db, &id, workspace_id)? {
            Some(text) => {
                targets.push((Target::Account, id));
                texts.push(text);
            }
            None => report.skipped += 1,
        }
    }
    for id in db.list_interaction_ids(workspace_id)? {
        match db
            .get_interaction(&id)?
            .as_ref()
            .and_then(interaction_embedding_text)
        {
            Some(text) => {
                targets.push((Target::Interaction, id));
                texts.push(text);
            }
            None => report.skipped += 1,
        }
    }

    log::info!(
        "Embeddings: re-embedding {} rows in workspace {}",
        texts.len(),
        workspace_id
    );
    let vectors = embed_all(provider, &texts).await?;

    let stamp = Utc::now().to_rfc3339();
    db.with_transaction(|tx| {
        for ((target, id), vector) in targets.iter().zip(vectors.iter()) {
            let literal = to_vector_literal(vector);
            let written = match target {
                Target::Contact => {
                    tx.set_contact_summary_embedding(id, workspace_id, &literal, &stamp)
                }
                Target::Account => {
                    tx.set_account_summary_embedding(id, workspace_id, &literal, &stamp)
                }
                Target::Interaction => tx.set_interaction_embedding(id, &literal, &stamp),
            };
            match (written, target) {
                (Ok(()), Target::Contact) => report.contacts += 1,
                (Ok(()), Target::Account) => report.accounts += 1,
                (Ok(()), Target::Interaction) => report.interactions += 1,
                (Err(e), _) => {
                    log::warn!("Embeddings: failed to store vector for {}: {}", id, e);
                    report.failed += 1;
                }
            }
        }
        Ok(())
    })?;

    Ok(report)
}
