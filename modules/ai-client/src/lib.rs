//! Thin clients for the LLM and embedding providers, behind narrow traits so
//! the pipeline can run against mocks. Chat goes to Anthropic, embeddings to
//! any OpenAI-compatible endpoint (Voyage in production).

pub mod claude;
pub mod openai;
pub mod schema;
pub mod traits;

pub use claude::Claude;
pub use openai::OpenAi;
pub use schema::StructuredOutput;
pub use traits::EmbedAgent;
