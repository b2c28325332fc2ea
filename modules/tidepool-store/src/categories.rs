//! Host-scoped category documents. The version bump and changeLog append
//! happen in the same single-document transaction; readers can therefore
//! always reconstruct "what was added since version N" from the log.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::warn;

use tidepool_common::slug::slugify;
use tidepool_common::types::{
    build_category_id, ChangeLogEntry, EventCategory, CATEGORY_TAG_CAP, CHANGELOG_CAP,
    SAMPLE_TITLE_CAP,
};

use crate::docstore::{collections, DocQuery, DocumentStore, Filter};

#[derive(Clone)]
pub struct CategoryStore {
    store: Arc<dyn DocumentStore>,
}

impl CategoryStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: &str) -> Result<Option<EventCategory>> {
        let Some(doc) = self.store.get(collections::EVENT_CATEGORIES, id).await? else {
            return Ok(None);
        };
        match serde_json::from_value(doc) {
            Ok(category) => Ok(Some(category)),
            Err(e) => {
                warn!(id, error = %e, "malformed category document, treating as absent");
                Ok(None)
            }
        }
    }

    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<EventCategory>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(category) = self.get(id).await? {
                out.push(category);
            }
        }
        Ok(out)
    }

    pub async fn list_for_host(&self, host_id: &str) -> Result<Vec<EventCategory>> {
        let query = DocQuery::new().filter(Filter::Eq("hostId".into(), json!(host_id)));
        let rows = self.store.query(collections::EVENT_CATEGORIES, query).await?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, doc)| match serde_json::from_value(doc) {
                Ok(category) => Some(category),
                Err(e) => {
                    warn!(id, error = %e, "skipping malformed category document");
                    None
                }
            })
            .collect())
    }

    /// Create a fresh category seeded with its first series.
    pub async fn create(
        &self,
        host_id: &str,
        name: &str,
        description: Option<String>,
        series_id: &str,
        series_title: &str,
        series_tags: &[String],
        now: DateTime<Utc>,
    ) -> Result<EventCategory> {
        let id = build_category_id(host_id, name);
        let category = EventCategory {
            id: id.clone(),
            host_id: host_id.to_string(),
            name: name.to_string(),
            slug: slugify(name),
            description,
            tags: series_tags.to_vec(),
            sample_series_titles: vec![series_title.to_string()],
            series_ids: vec![series_id.to_string()],
            version: 1,
            change_log: vec![ChangeLogEntry {
                version: 1,
                added_series_ids: vec![series_id.to_string()],
                added_series_titles: vec![series_title.to_string()],
                created_at: now,
            }],
            created_at: now,
            updated_at: now,
        };
        self.store
            .set(collections::EVENT_CATEGORIES, &id, serde_json::to_value(&category)?)
            .await?;
        Ok(category)
    }

    /// Add a series to an existing category. No-op when the series is
    /// already a member; otherwise bumps the version and appends the log
    /// entry in one transaction.
    pub async fn add_series(
        &self,
        category_id: &str,
        series_id: &str,
        series_title: &str,
        series_tags: &[String],
        now: DateTime<Utc>,
    ) -> Result<Option<EventCategory>> {
        let written = self
            .store
            .update(collections::EVENT_CATEGORIES, category_id, &mut |current| {
                let Some(doc) = current else {
                    return Ok(None); // category vanished; caller re-creates
                };
                let mut category: EventCategory = serde_json::from_value(doc)?;

                if !category.series_ids.iter().any(|s| s == series_id) {
                    category.series_ids.push(series_id.to_string());
                    category.version += 1;
                    category.change_log.push(ChangeLogEntry {
                        version: category.version,
                        added_series_ids: vec![series_id.to_string()],
                        added_series_titles: vec![series_title.to_string()],
                        created_at: now,
                    });
                    if category.change_log.len() > CHANGELOG_CAP {
                        let excess = category.change_log.len() - CHANGELOG_CAP;
                        category.change_log.drain(..excess);
                    }

                    for tag in series_tags {
                        if !category.tags.contains(tag) {
                            category.tags.push(tag.clone());
                        }
                    }
                    category.tags.truncate(CATEGORY_TAG_CAP);

                    category
                        .sample_series_titles
                        .retain(|t| t != series_title);
                    category.sample_series_titles.push(series_title.to_string());
                    if category.sample_series_titles.len() > SAMPLE_TITLE_CAP {
                        let excess = category.sample_series_titles.len() - SAMPLE_TITLE_CAP;
                        category.sample_series_titles.drain(..excess);
                    }

                    category.updated_at = now;
                }

                Ok(Some(serde_json::to_value(&category)?))
            })
            .await?;

        Ok(match written {
            Some(doc) => serde_json::from_value(doc).ok(),
            None => None,
        })
    }

    /// Drop a series from a category it was reassigned away from.
    pub async fn remove_series(
        &self,
        category_id: &str,
        series_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.store
            .update(collections::EVENT_CATEGORIES, category_id, &mut |current| {
                let Some(doc) = current else {
                    return Ok(None);
                };
                let mut category: EventCategory = serde_json::from_value(doc)?;
                let before = category.series_ids.len();
                category.series_ids.retain(|s| s != series_id);
                if category.series_ids.len() == before {
                    return Ok(Some(serde_json::to_value(&category)?));
                }
                category.updated_at = now;
                Ok(Some(serde_json::to_value(&category)?))
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    fn now() -> DateTime<Utc> {
        "2026-07-10T12:00:00Z".parse().unwrap()
    }

    fn store() -> CategoryStore {
        CategoryStore::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn create_seeds_version_one() {
        let cats = store();
        let category = cats
            .create("host:x", "Yoga Classes", None, "series-a", "Morning Yoga", &["yoga".into()], now())
            .await
            .unwrap();

        assert_eq!(category.version, 1);
        assert_eq!(category.slug, "yoga-classes");
        assert_eq!(category.series_ids, vec!["series-a"]);
        assert_eq!(category.change_log.len(), 1);
        assert_eq!(category.change_log[0].added_series_ids, vec!["series-a"]);
    }

    #[tokio::test]
    async fn add_series_bumps_version_once() {
        let cats = store();
        let category = cats
            .create("host:x", "Yoga Classes", None, "series-a", "Morning Yoga", &[], now())
            .await
            .unwrap();

        let updated = cats
            .add_series(&category.id, "series-b", "Evening Yoga", &["yoga".into()], now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.change_log.last().unwrap().added_series_ids, vec!["series-b"]);

        // Re-adding the same series is a no-op.
        let again = cats
            .add_series(&category.id, "series-b", "Evening Yoga", &[], now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.version, 2);
        assert_eq!(again.change_log.len(), 2);
    }

    #[tokio::test]
    async fn version_counts_first_occurrence_additions() {
        let cats = store();
        let category = cats
            .create("host:x", "Workshops", None, "s1", "Intro", &[], now())
            .await
            .unwrap();
        for i in 2..=5 {
            cats.add_series(&category.id, &format!("s{i}"), &format!("Series {i}"), &[], now())
                .await
                .unwrap();
        }
        let current = cats.get(&category.id).await.unwrap().unwrap();
        assert_eq!(current.version, 5);
        let bumps = current
            .change_log
            .iter()
            .filter(|c| !c.added_series_ids.is_empty())
            .count();
        assert_eq!(current.version as usize, bumps);
        // Every member series appears somewhere in the log.
        for sid in &current.series_ids {
            assert!(current
                .change_log
                .iter()
                .any(|c| c.added_series_ids.contains(sid)));
        }
    }

    #[tokio::test]
    async fn changelog_capped() {
        let cats = store();
        let category = cats
            .create("host:x", "Workshops", None, "s0", "Intro", &[], now())
            .await
            .unwrap();
        for i in 1..40 {
            cats.add_series(&category.id, &format!("s{i}"), &format!("Series {i}"), &[], now())
                .await
                .unwrap();
        }
        let current = cats.get(&category.id).await.unwrap().unwrap();
        assert_eq!(current.change_log.len(), CHANGELOG_CAP);
        assert_eq!(current.version, 40);
        // The newest entry carries the newest version.
        assert_eq!(current.change_log.last().unwrap().version, 40);
    }

    #[tokio::test]
    async fn remove_series_drops_membership() {
        let cats = store();
        let category = cats
            .create("host:x", "Workshops", None, "s1", "Intro", &[], now())
            .await
            .unwrap();
        cats.add_series(&category.id, "s2", "Advanced", &[], now())
            .await
            .unwrap();
        cats.remove_series(&category.id, "s1", now()).await.unwrap();

        let current = cats.get(&category.id).await.unwrap().unwrap();
        assert_eq!(current.series_ids, vec!["s2"]);
    }

    #[tokio::test]
    async fn list_for_host_scopes() {
        let cats = store();
        cats.create("host:x", "Yoga", None, "s1", "A", &[], now()).await.unwrap();
        cats.create("host:y", "Yoga", None, "s2", "B", &[], now()).await.unwrap();
        let listed = cats.list_for_host("host:x").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].host_id, "host:x");
    }
}
