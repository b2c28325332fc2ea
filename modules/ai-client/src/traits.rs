use anyhow::Result;
use async_trait::async_trait;

/// Text embedding provider. Object-safe so pipelines can hold `dyn EmbedAgent`.
#[async_trait]
pub trait EmbedAgent: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch in one provider call. Order is preserved.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
