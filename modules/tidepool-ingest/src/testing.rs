//! Deterministic test doubles for the model seams. No network, no keys.

use ai_client::EmbedAgent;
use anyhow::Result;
use async_trait::async_trait;

use tidepool_common::types::TagCandidate;

use crate::categorizer::{CategoryChoice, CategoryModel, CategorySummary};
use crate::classifier::TagModel;

/// Returns a fixed candidate list for every event.
pub struct MockTagModel {
    candidates: Vec<TagCandidate>,
}

impl MockTagModel {
    pub fn new(candidates: Vec<TagCandidate>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl TagModel for MockTagModel {
    async fn classify_tags(
        &self,
        _title: &str,
        _description: Option<&str>,
        max_suggestions: usize,
    ) -> Result<Vec<TagCandidate>> {
        Ok(self.candidates.iter().take(max_suggestions).cloned().collect())
    }
}

/// Embeds text into a deterministic vector derived from its bytes, so equal
/// texts get equal vectors and tests can assert on similarity structure.
pub struct MockEmbedder {
    dim: usize,
}

impl MockEmbedder {
    pub fn with_dim(dim: usize) -> Self {
        Self { dim }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for (i, b) in text.bytes().enumerate() {
            v[i % self.dim] += b as f32 / 255.0;
        }
        v
    }
}

#[async_trait]
impl EmbedAgent for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Category model that always answers with the given name/action.
pub struct StaticCategoryModel {
    pub name: String,
    pub action: String,
}

impl StaticCategoryModel {
    pub fn create_new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            action: "create-new".to_string(),
        }
    }

    pub fn use_existing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            action: "use-existing".to_string(),
        }
    }
}

#[async_trait]
impl CategoryModel for StaticCategoryModel {
    async fn choose_category(
        &self,
        _series_title: &str,
        _series_tags: &[String],
        _host_name: &str,
        _existing: &[CategorySummary],
    ) -> Result<CategoryChoice> {
        Ok(CategoryChoice {
            name: self.name.clone(),
            action: self.action.clone(),
            reason: None,
        })
    }
}
