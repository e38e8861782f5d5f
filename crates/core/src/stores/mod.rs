mod exa;
mod openai;
mod weaviate;

pub use exa::ExaContentClient;
pub use openai::OpenAiModel;
pub use weaviate::{WeaviateEndpoint, WeaviateStore};
