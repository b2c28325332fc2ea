//! Per-user category read markers: which category version the user last saw.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use tidepool_common::types::UserCategoryBundleState;

use crate::docstore::{collections, DocumentStore};

#[derive(Clone)]
pub struct BundleStateStore {
    store: Arc<dyn DocumentStore>,
}

impl BundleStateStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Record that the user has seen the category at `version`.
    pub async fn mark_seen(
        &self,
        user_id: &str,
        category_id: &str,
        version: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let state = UserCategoryBundleState {
            user_id: user_id.to_string(),
            category_id: category_id.to_string(),
            last_seen_version: version,
            last_seen_at: now,
        };
        self.store
            .set(
                &collections::category_bundles(user_id),
                category_id,
                serde_json::to_value(&state)?,
            )
            .await
    }

    pub async fn get(
        &self,
        user_id: &str,
        category_id: &str,
    ) -> Result<Option<UserCategoryBundleState>> {
        let doc = self
            .store
            .get(&collections::category_bundles(user_id), category_id)
            .await?;
        Ok(doc.and_then(|d| serde_json::from_value(d).ok()))
    }

    /// States for a set of categories, keyed by category id. Missing states
    /// mean the user has never seen the category.
    pub async fn get_many(
        &self,
        user_id: &str,
        category_ids: &[String],
    ) -> Result<HashMap<String, UserCategoryBundleState>> {
        let mut out = HashMap::new();
        for category_id in category_ids {
            if let Some(state) = self.get(user_id, category_id).await? {
                out.insert(category_id.clone(), state);
            }
        }
        Ok(out)
    }
}
