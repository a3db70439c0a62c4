pub mod config;
pub mod db;
pub mod error;
pub mod knowledge;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod refresher;
pub mod router;
pub mod style;

pub use db::MemoryStore;
pub use error::StoreError;
pub use knowledge::{FactExtractor, KeywordExtractor, KnowledgeBuilder};
pub use models::{Fact, Interaction, InteractionMeta, Role};
pub use router::AssistantRouter;
