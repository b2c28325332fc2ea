//! Interaction persistence: batched atomic writes, recency-ordered reads
//! for profile building.

use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::json;
use tracing::warn;

use tidepool_common::types::UserInteraction;

use crate::docstore::{collections, Direction, DocQuery, DocWrite, DocumentStore, Filter};

/// Store-level batch bound; the service validates the same limit upstream.
pub const INTERACTION_BATCH_CAP: usize = 100;

#[derive(Clone)]
pub struct InteractionStore {
    store: Arc<dyn DocumentStore>,
}

impl InteractionStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Write up to 100 interactions as one atomic batch.
    pub async fn record_batch(&self, interactions: &[UserInteraction]) -> Result<()> {
        if interactions.is_empty() {
            return Ok(());
        }
        if interactions.len() > INTERACTION_BATCH_CAP {
            bail!(
                "interaction batch too large: {} (max {INTERACTION_BATCH_CAP})",
                interactions.len()
            );
        }
        let writes = interactions
            .iter()
            .map(|i| {
                Ok(DocWrite::set(
                    collections::INTERACTIONS,
                    &i.id,
                    serde_json::to_value(i)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        self.store.batch_set(writes).await
    }

    /// Most recent interactions for a user, newest first.
    pub async fn recent_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<UserInteraction>> {
        let query = DocQuery::new()
            .filter(Filter::Eq("userId".into(), json!(user_id)))
            .order("timestamp", Direction::Desc)
            .limit(limit);
        let rows = self.store.query(collections::INTERACTIONS, query).await?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, doc)| match serde_json::from_value(doc) {
                Ok(interaction) => Some(interaction),
                Err(e) => {
                    warn!(id, error = %e, "skipping malformed interaction document");
                    None
                }
            })
            .collect())
    }
}
