//! Classifier gateway: LLM tag suggestions plus embeddings, with the slug
//! and stop-word hygiene applied before anything reaches a store. Parse
//! failures degrade to empty candidate lists; they never abort an ingest.

use std::sync::Arc;
use std::time::Duration;

use ai_client::{Claude, EmbedAgent};
use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, warn};

use tidepool_common::slug::{is_stop_word, slugify};
use tidepool_common::types::{CandidateSource, TagCandidate};

/// Default number of tag suggestions requested from the model.
pub const DEFAULT_MAX_SUGGESTIONS: usize = 15;

/// Retry policy for model calls.
const MODEL_ATTEMPTS: u32 = 3;
const MODEL_BACKOFF_MS: u64 = 250;

// --- Tag model seam ---

#[async_trait]
pub trait TagModel: Send + Sync {
    /// Suggest up to `max_suggestions` tag candidates for an event. Returns
    /// an empty list when the model output cannot be used.
    async fn classify_tags(
        &self,
        title: &str,
        description: Option<&str>,
        max_suggestions: usize,
    ) -> Result<Vec<TagCandidate>>;
}

/// Strict JSON shape the model is asked for.
#[derive(Debug, Deserialize, JsonSchema)]
struct TagResponse {
    #[serde(default)]
    tags: Vec<TagLabel>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct TagLabel {
    /// Noun or noun phrase, e.g. "sound bath" or "beginner friendly".
    label: String,
    /// Which facet the tag covers.
    #[allow(dead_code)]
    category: Option<String>,
    /// 0.0-1.0.
    confidence: f64,
}

pub struct ClaudeTagModel {
    claude: Claude,
}

impl ClaudeTagModel {
    pub fn new(anthropic_api_key: &str) -> Self {
        Self {
            claude: Claude::new(anthropic_api_key, "claude-haiku-4-5-20251001"),
        }
    }

    fn system_prompt(max_suggestions: usize) -> String {
        format!(
            r#"You classify community events into topical tags.

Given an event title and description, propose up to {max_suggestions} tags.
Tags must be nouns or noun phrases. Cover five facets:
1. The specific topic (e.g. "sound bath", "watercolor painting")
2. The activity type (e.g. "workshop" as "hands-on workshop", "live performance")
3. A broader category (e.g. "wellness", "visual arts")
4. The audience (e.g. "beginner friendly", "young professionals")
5. The vibe (e.g. "high energy", "quiet focus")

Rules:
- Each tag gets a confidence between 0 and 1.
- No dates, weekdays, venue names, or organizer names as tags.
- Never invent facts not present in the text."#
        )
    }
}

#[async_trait]
impl TagModel for ClaudeTagModel {
    async fn classify_tags(
        &self,
        title: &str,
        description: Option<&str>,
        max_suggestions: usize,
    ) -> Result<Vec<TagCandidate>> {
        let user_prompt = match description {
            Some(desc) => format!("Title: {title}\n\nDescription: {desc}"),
            None => format!("Title: {title}"),
        };
        let system = Self::system_prompt(max_suggestions);

        // Transport failures retry with linear backoff; malformed model
        // output does not retry. Either way the fallback is no candidates.
        for attempt in 1..=MODEL_ATTEMPTS {
            match self.claude.extract::<TagResponse>(&system, &user_prompt).await {
                Ok(response) => {
                    return Ok(response
                        .tags
                        .into_iter()
                        .take(max_suggestions)
                        .map(|t| TagCandidate {
                            tag: t.label,
                            confidence: t.confidence.clamp(0.0, 1.0),
                            rationale: None,
                            source: CandidateSource::Llm,
                        })
                        .collect());
                }
                Err(e) if attempt < MODEL_ATTEMPTS && !is_parse_failure(&e) => {
                    warn!(attempt, error = %e, "tag classification failed, retrying");
                    tokio::time::sleep(Duration::from_millis(MODEL_BACKOFF_MS * attempt as u64))
                        .await;
                }
                Err(e) => {
                    warn!(error = %e, "tag classification failed, degrading to no tags");
                    return Ok(Vec::new());
                }
            }
        }
        Ok(Vec::new())
    }
}

/// Malformed model output must not be retried; only transport errors are.
pub(crate) fn is_parse_failure(e: &anyhow::Error) -> bool {
    e.to_string().contains("deserialize") || e.to_string().contains("No structured output")
}

// --- Gateway ---

#[derive(Debug, Clone, Default)]
pub struct ClassifyMetadata {
    pub llm_used: bool,
    pub embeddings_used: bool,
    pub reused: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ClassifyOutcome {
    /// Slugged, filtered, ordered by descending confidence, deduplicated.
    pub tags: Vec<String>,
    pub candidates: Vec<TagCandidate>,
    pub vector: Option<Vec<f32>>,
    pub metadata: ClassifyMetadata,
}

pub struct ClassifierGateway {
    tag_model: Arc<dyn TagModel>,
    embedder: Arc<dyn EmbedAgent>,
    /// Per-deployment extra stop-slugs.
    blocklist: Vec<String>,
    debug_classification: bool,
}

impl ClassifierGateway {
    pub fn new(
        tag_model: Arc<dyn TagModel>,
        embedder: Arc<dyn EmbedAgent>,
        blocklist: Vec<String>,
        debug_classification: bool,
    ) -> Self {
        Self {
            tag_model,
            embedder,
            blocklist,
            debug_classification,
        }
    }

    /// Phase-1 operation: tag candidates plus the filtered slug list,
    /// ordered by descending confidence.
    pub async fn suggest_tags(
        &self,
        title: &str,
        description: Option<&str>,
    ) -> Result<(Vec<TagCandidate>, Vec<String>)> {
        let candidates = self
            .tag_model
            .classify_tags(title, description, DEFAULT_MAX_SUGGESTIONS)
            .await?;
        if self.debug_classification {
            for c in &candidates {
                debug!(title, tag = %c.tag, confidence = c.confidence, "tag candidate");
            }
        }
        let tags = self.slug_and_rank(&candidates);
        Ok((candidates, tags))
    }

    /// Phase-2 operation: one batched embedding call. Order is preserved.
    pub async fn embed_enriched(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_err = None;
        for attempt in 1..=MODEL_ATTEMPTS {
            match self.embedder.embed_batch(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) => {
                    if attempt < MODEL_ATTEMPTS {
                        warn!(attempt, error = %e, "embedding batch failed, retrying");
                        tokio::time::sleep(Duration::from_millis(
                            MODEL_BACKOFF_MS * attempt as u64,
                        ))
                        .await;
                    }
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.expect("at least one attempt"))
    }

    /// Single-event composition of both phases. Callers that already hold a
    /// vector (reuse path) skip the embedding call.
    pub async fn classify(
        &self,
        title: &str,
        description: Option<&str>,
        existing_vector: Option<Vec<f32>>,
    ) -> Result<ClassifyOutcome> {
        let (candidates, tags) = self.suggest_tags(title, description).await?;
        let llm_used = !candidates.is_empty();

        let reused = existing_vector.is_some();
        let (vector, embeddings_used) = match existing_vector {
            Some(v) => (Some(v), false),
            None if !tags.is_empty() => {
                let text = enriched_text(title, description, &tags);
                match self.embed_enriched(&[text]).await {
                    Ok(mut vectors) => (vectors.pop(), true),
                    Err(e) => {
                        warn!(error = %e, "embedding failed, classification kept without vector");
                        (None, false)
                    }
                }
            }
            None => (None, false),
        };

        Ok(ClassifyOutcome {
            tags,
            candidates,
            vector,
            metadata: ClassifyMetadata {
                llm_used,
                embeddings_used,
                reused,
            },
        })
    }

    /// Slugify, stop-word/blocklist filter, order by descending confidence,
    /// dedup keeping the highest-confidence occurrence.
    pub fn slug_and_rank(&self, candidates: &[TagCandidate]) -> Vec<String> {
        let mut ranked: Vec<&TagCandidate> = candidates.iter().collect();
        ranked.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for candidate in ranked {
            let slug = slugify(&candidate.tag);
            if slug.is_empty()
                || is_stop_word(&slug)
                || self.blocklist.iter().any(|b| b == &slug)
            {
                continue;
            }
            if seen.insert(slug.clone()) {
                out.push(slug);
            }
        }
        out
    }
}

/// The exact text embedded for an event:
/// `title \n description \n\n Related topics: t1, t2, ...`.
pub fn enriched_text(title: &str, description: Option<&str>, tags: &[String]) -> String {
    let mut text = title.to_string();
    if let Some(desc) = description {
        text.push('\n');
        text.push_str(desc);
    }
    text.push_str("\n\nRelated topics: ");
    text.push_str(&tags.join(", "));
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockEmbedder, MockTagModel};

    fn candidate(tag: &str, confidence: f64) -> TagCandidate {
        TagCandidate {
            tag: tag.to_string(),
            confidence,
            rationale: None,
            source: CandidateSource::Llm,
        }
    }

    fn gateway(model: MockTagModel) -> ClassifierGateway {
        ClassifierGateway::new(
            Arc::new(model),
            Arc::new(MockEmbedder::with_dim(4)),
            vec![],
            false,
        )
    }

    #[test]
    fn enriched_text_shape() {
        let text = enriched_text(
            "Community Yoga",
            Some("Bring a mat"),
            &["yoga".to_string(), "wellness".to_string()],
        );
        assert_eq!(
            text,
            "Community Yoga\nBring a mat\n\nRelated topics: yoga, wellness"
        );
    }

    #[test]
    fn enriched_text_without_description() {
        let text = enriched_text("Community Yoga", None, &["yoga".to_string()]);
        assert_eq!(text, "Community Yoga\n\nRelated topics: yoga");
    }

    #[test]
    fn slug_and_rank_orders_and_filters() {
        let g = gateway(MockTagModel::new(vec![]));
        let tags = g.slug_and_rank(&[
            candidate("Wellness", 0.7),
            candidate("event", 0.95),
            candidate("Sound Bath", 0.9),
            candidate("sound-bath", 0.5),
            candidate("DJ", 0.8),
        ]);
        assert_eq!(tags, vec!["sound-bath", "wellness"]);
    }

    #[tokio::test]
    async fn classify_embeds_when_tags_present() {
        let g = gateway(MockTagModel::new(vec![
            candidate("yoga", 0.9),
            candidate("wellness", 0.8),
        ]));
        let outcome = g.classify("Community Yoga", None, None).await.unwrap();
        assert_eq!(outcome.tags, vec!["yoga", "wellness"]);
        assert!(outcome.vector.is_some());
        assert!(outcome.metadata.llm_used);
        assert!(outcome.metadata.embeddings_used);
        assert!(!outcome.metadata.reused);
    }

    #[tokio::test]
    async fn classify_skips_embedding_without_tags() {
        let g = gateway(MockTagModel::new(vec![]));
        let outcome = g.classify("Mystery", None, None).await.unwrap();
        assert!(outcome.tags.is_empty());
        assert!(outcome.vector.is_none());
        assert!(!outcome.metadata.embeddings_used);
    }

    #[tokio::test]
    async fn classify_reuses_existing_vector() {
        let g = gateway(MockTagModel::new(vec![candidate("yoga", 0.9)]));
        let outcome = g
            .classify("Community Yoga", None, Some(vec![0.5; 4]))
            .await
            .unwrap();
        assert_eq!(outcome.vector, Some(vec![0.5; 4]));
        assert!(outcome.metadata.reused);
        assert!(!outcome.metadata.embeddings_used);
    }

    #[tokio::test]
    async fn blocklist_applies() {
        let g = ClassifierGateway::new(
            Arc::new(MockTagModel::new(vec![candidate("yoga", 0.9)])),
            Arc::new(MockEmbedder::with_dim(4)),
            vec!["yoga".to_string()],
            false,
        );
        let (_, tags) = g.suggest_tags("Community Yoga", None).await.unwrap();
        assert!(tags.is_empty());
    }
}
