//! Category assignment: an LLM groups a host's series into user-friendly
//! buckets, preferring reuse of existing category names. The name match is
//! case- and accent-insensitive regardless of what action the model claims.

use std::sync::Arc;
use std::time::Duration;

use ai_client::Claude;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use tidepool_common::slug::{fold_for_match, slugify};
use tidepool_common::types::SeriesHost;
use tidepool_store::{CategoryStore, EventStore, SeriesStore};

const MODEL_ATTEMPTS: u32 = 3;
const MODEL_BACKOFF_MS: u64 = 250;
/// Sample titles shown per existing category in the prompt.
const PROMPT_SAMPLE_CAP: usize = 5;

// --- Model seam ---

#[derive(Debug, Clone)]
pub struct CategorySummary {
    pub name: String,
    pub sample_titles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CategoryChoice {
    /// 2-4 word category name.
    pub name: String,
    /// "use-existing" or "create-new".
    pub action: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CategoryResponse {
    category: CategoryChoice,
}

#[async_trait]
pub trait CategoryModel: Send + Sync {
    async fn choose_category(
        &self,
        series_title: &str,
        series_tags: &[String],
        host_name: &str,
        existing: &[CategorySummary],
    ) -> Result<CategoryChoice>;
}

pub struct ClaudeCategoryModel {
    claude: Claude,
}

impl ClaudeCategoryModel {
    pub fn new(anthropic_api_key: &str) -> Self {
        Self {
            claude: Claude::new(anthropic_api_key, "claude-haiku-4-5-20251001"),
        }
    }

    fn system_prompt(host_name: &str, existing: &[CategorySummary]) -> String {
        let existing_section = if existing.is_empty() {
            "This host has no categories yet.".to_string()
        } else {
            let lines: Vec<String> = existing
                .iter()
                .map(|c| {
                    let samples = c
                        .sample_titles
                        .iter()
                        .take(PROMPT_SAMPLE_CAP)
                        .cloned()
                        .collect::<Vec<_>>()
                        .join("; ");
                    format!("- {} (e.g. {samples})", c.name)
                })
                .collect();
            format!("Existing categories for this host:\n{}", lines.join("\n"))
        };

        format!(
            r#"You group a host's recurring event series into categories shown to
neighborhood residents browsing {host_name}'s offerings.

{existing_section}

Rules:
- STRONGLY prefer reusing an existing category when one plausibly fits.
- New category names are 2-4 words, plain language, no punctuation.
- For instructional programming, prefer class-explicit names
  ("Pottery Classes", not "Pottery").
- Answer with the category name and whether it is "use-existing" or
  "create-new"."#
        )
    }
}

#[async_trait]
impl CategoryModel for ClaudeCategoryModel {
    async fn choose_category(
        &self,
        series_title: &str,
        series_tags: &[String],
        host_name: &str,
        existing: &[CategorySummary],
    ) -> Result<CategoryChoice> {
        let system = Self::system_prompt(host_name, existing);
        let user = format!(
            "Series title: {series_title}\nSeries tags: {}",
            series_tags.join(", ")
        );

        let mut last_err = None;
        for attempt in 1..=MODEL_ATTEMPTS {
            match self.claude.extract::<CategoryResponse>(&system, &user).await {
                Ok(response) => return Ok(response.category),
                Err(e) => {
                    if attempt < MODEL_ATTEMPTS && !crate::classifier::is_parse_failure(&e) {
                        warn!(attempt, error = %e, "category classification failed, retrying");
                        tokio::time::sleep(Duration::from_millis(
                            MODEL_BACKOFF_MS * attempt as u64,
                        ))
                        .await;
                        last_err = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }
        Err(last_err.expect("at least one attempt"))
    }
}

// --- Assigner ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub category_id: String,
    pub category_name: String,
}

pub struct CategoryAssigner {
    model: Arc<dyn CategoryModel>,
    categories: CategoryStore,
    series: SeriesStore,
    events: EventStore,
}

impl CategoryAssigner {
    pub fn new(
        model: Arc<dyn CategoryModel>,
        categories: CategoryStore,
        series: SeriesStore,
        events: EventStore,
    ) -> Self {
        Self {
            model,
            categories,
            series,
            events,
        }
    }

    /// Classify a series into a host-scoped category, creating one when
    /// nothing matches. Returns None when the series cannot be resolved.
    pub async fn assign_series(
        &self,
        series_id: &str,
        host: &SeriesHost,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<Assignment>> {
        let Some(series) = self.series.get_series(series_id).await? else {
            return Ok(None);
        };

        if let (Some(category_id), Some(category_name), false) =
            (&series.category_id, &series.category_name, force)
        {
            return Ok(Some(Assignment {
                category_id: category_id.clone(),
                category_name: category_name.clone(),
            }));
        }

        let existing = self.categories.list_for_host(&host.id).await?;
        let summaries: Vec<CategorySummary> = existing
            .iter()
            .map(|c| CategorySummary {
                name: c.name.clone(),
                sample_titles: c.sample_series_titles.clone(),
            })
            .collect();

        let choice = self
            .model
            .choose_category(&series.title, &series.tags, &host.name, &summaries)
            .await?;

        // The declared action is advisory; the name match decides.
        let matched = existing
            .iter()
            .find(|c| fold_for_match(&c.name) == fold_for_match(&choice.name));

        let assignment = match matched {
            Some(category) => {
                self.categories
                    .add_series(&category.id, series_id, &series.title, &series.tags, now)
                    .await?;
                Assignment {
                    category_id: category.id.clone(),
                    category_name: category.name.clone(),
                }
            }
            None => {
                let created = self
                    .categories
                    .create(
                        &host.id,
                        choice.name.trim(),
                        choice.reason.clone(),
                        series_id,
                        &series.title,
                        &series.tags,
                        now,
                    )
                    .await?;
                info!(
                    host_id = %host.id,
                    category = %created.name,
                    "created event category"
                );
                Assignment {
                    category_id: created.id,
                    category_name: created.name,
                }
            }
        };

        // Reassignment removes the series from its previous category.
        if let Some(previous_id) = &series.category_id {
            if previous_id != &assignment.category_id {
                self.categories
                    .remove_series(previous_id, series_id, now)
                    .await?;
            }
        }

        self.series
            .update_category_info(
                series_id,
                &assignment.category_id,
                &assignment.category_name,
                &slugify(&assignment.category_name),
                now,
            )
            .await?;

        // Propagate the assignment onto the member events.
        for occurrence in &series.upcoming_occurrences {
            if let Err(e) = self
                .events
                .update_series_info(
                    &occurrence.event_id,
                    series_id,
                    Some(&assignment.category_id),
                    Some(&assignment.category_name),
                )
                .await
            {
                warn!(event_id = %occurrence.event_id, error = %e, "category back-fill failed");
            }
        }

        Ok(Some(assignment))
    }
}
