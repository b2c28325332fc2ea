//! Tag proposals: per-slug occurrence counters with sample events, feeding
//! the vocabulary-review queue. Each slug increment is its own transaction.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use tidepool_common::types::{PROPOSAL_SAMPLE_CAP, PROPOSAL_TAG_CAP};

use crate::docstore::{collections, Direction, DocQuery, DocumentStore, Filter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalSample {
    pub event_id: String,
    pub title: String,
    pub seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagProposal {
    pub slug: String,
    pub status: String,
    pub occurrence_count: u64,
    #[serde(default)]
    pub source_counts: HashMap<String, u64>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    #[serde(default)]
    pub sample_events: Vec<ProposalSample>,
}

#[derive(Clone)]
pub struct ProposalStore {
    store: Arc<dyn DocumentStore>,
}

impl ProposalStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Record one event's final tag set (capped) against the proposal
    /// counters. One transaction per slug.
    pub async fn record_event_tags(
        &self,
        event_id: &str,
        event_title: &str,
        source_id: &str,
        slugs: &[String],
        now: DateTime<Utc>,
    ) -> Result<()> {
        for slug in slugs.iter().take(PROPOSAL_TAG_CAP) {
            self.store
                .update(collections::TAG_PROPOSALS, slug, &mut |current| {
                    let mut proposal = match current {
                        Some(doc) => serde_json::from_value::<TagProposal>(doc)
                            .unwrap_or_else(|_| new_proposal(slug, now)),
                        None => new_proposal(slug, now),
                    };

                    proposal.occurrence_count += 1;
                    *proposal.source_counts.entry(source_id.to_string()).or_insert(0) += 1;
                    proposal.last_seen_at = now;

                    proposal.sample_events.retain(|s| s.event_id != event_id);
                    proposal.sample_events.insert(
                        0,
                        ProposalSample {
                            event_id: event_id.to_string(),
                            title: event_title.to_string(),
                            seen_at: now,
                        },
                    );
                    proposal.sample_events.truncate(PROPOSAL_SAMPLE_CAP);

                    Ok(Some(serde_json::to_value(&proposal)?))
                })
                .await?;
        }
        Ok(())
    }

    /// Pending proposals ordered by `(occurrenceCount DESC, lastSeenAt DESC)`.
    pub async fn top_proposals(&self, limit: usize) -> Result<Vec<TagProposal>> {
        let query = DocQuery::new()
            .filter(Filter::Eq("status".into(), json!("pending")))
            .order("occurrenceCount", Direction::Desc)
            .order("lastSeenAt", Direction::Desc)
            .limit(limit);
        let rows = self.store.query(collections::TAG_PROPOSALS, query).await?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, doc)| match serde_json::from_value(doc) {
                Ok(proposal) => Some(proposal),
                Err(e) => {
                    warn!(id, error = %e, "skipping malformed proposal document");
                    None
                }
            })
            .collect())
    }
}

fn new_proposal(slug: &str, now: DateTime<Utc>) -> TagProposal {
    TagProposal {
        slug: slug.to_string(),
        status: "pending".to_string(),
        occurrence_count: 0,
        source_counts: HashMap::new(),
        first_seen_at: now,
        last_seen_at: now,
        sample_events: Vec::new(),
    }
}
