use serde::Serialize;

use crate::db::{CrmDb, DbContact, DbInteraction};
use crate::embeddings::{cosine_similarity, embed_one, parse_vector_literal, EmbeddingProvider};
use crate::processor::embeddings::VectorStoreError;

pub const DEFAULT_CONTACT_LIMIT: usize = 10;
pub const DEFAULT_INTERACTION_LIMIT: usize = 20;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactMatch {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub lifecycle_stage: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionMatch {
    pub id: String,
    pub contact_id: Option<String>,
    pub interaction_type: String,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub interacted_at: String,
    pub similarity: f32,
}

/// Score rows against the query vector, keep those at or above `threshold`,
/// best first, at most `limit`. Rows whose stored vector can't be parsed
/// are skipped.
fn rank<'a, T>(
    query: &[f32],
    rows: &'a [T],
    stored: impl Fn(&T) -> Option<&str>,
    threshold: f32,
    limit: usize,
) -> Vec<(&'a T, f32)> {
    let mut scored: Vec<(&T, f32)> = rows
        .iter()
        .filter_map(|row| {
            let raw = stored(row)?;
            match parse_vector_literal(raw) {
                Ok(v) => Some((row, cosine_similarity(query, &v))),
                Err(e) => {
                    log::debug!("Search: skipping row with bad vector: {}", e);
                    None
                }
            }
        })
        .filter(|(_, score)| *score >= threshold)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

/// Contacts in `workspace_id` whose summary embedding is similar to `query`.
pub async fn search_contacts<P>(
    db: &CrmDb,
    provider: &P,
    query: &str,
    workspace_id: &str,
    limit: usize,
    threshold: f32,
) -> Result<Vec<ContactMatch>, VectorStoreError>
where
    P: EmbeddingProvider + ?Sized,
{
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let query_vec = embed_one(provider, query).await?;
    let rows = db.get_embedded_contacts(workspace_id)?;
    let ranked = rank(
        &query_vec,
        &rows,
        |c: &DbContact| c.summary_embedding.as_deref(),
        threshold,
        limit,
    );
    Ok(ranked
        .into_iter()
        .map(|(c, similarity)| ContactMatch {
            id: c.id.clone(),
            first_name: c.first_name.clone(),
            last_name: c.last_name.clone(),
            email: c.email.clone(),
            phone: c.phone.clone(),
            lifecycle_stage: c.lifecycle_stage.clone(),
            similarity,
        })
        .collect())
}

pub async fn search_interactions<P>(
    db: &CrmDb,
    provider: &P,
    query: &str,
    workspace_id: &str,
    limit: usize,
    threshold: f32,
) -> Result<Vec<InteractionMatch>, VectorStoreError>
where
    P: EmbeddingProvider + ?Sized,
{
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let query_vec = embed_one(provider, query).await?;
    let rows = db.get_embedded_interactions(workspace_id)?;
    let ranked = rank(
        &query_vec,
        &rows,
        |i: &DbInteraction| i.embedding.as_deref(),
        threshold,
        limit,
    );
    Ok(ranked
        .into_iter()
        .map(|(i, similarity)| InteractionMatch {
            id: i.id.clone(),
            contact_id: i.contact_id.clone(),
            interaction_type: i.interaction_type.clone(),
            subject: i.subject.clone(),
            content: i.content.clone(),
            interacted_at: i.interacted_at.clone(),
            similarity,
        })
        .collect())
}
