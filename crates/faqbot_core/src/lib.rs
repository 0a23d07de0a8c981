pub mod config;
pub mod corpus;
pub mod embed;
pub mod engine;
pub mod error;
pub mod eval;
pub mod extract;
pub mod minilm_embed;
pub mod model;
pub mod retrieval;
pub mod store;

pub use config::{EngineConfig, ModelFiles, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_THRESHOLD};
pub use corpus::CorpusBuilder;
pub use embed::{
    EmbeddedBatch, EmbeddingMode, EmbeddingProvider, Encoding, SentenceEncoder, Vocabulary,
};
pub use engine::RetrievalEngine;
pub use error::{EngineError, Result};
pub use eval::{evaluate, load_cases_json, EvalCase, EvalOutcome, EvalSummary};
pub use extract::{html_to_text, ContentExtractor, HttpFetcher, PageFetcher};
pub use minilm_embed::MiniLmEncoder;
pub use model::{
    Decision, EmbeddingVector, EntityId, EntityStats, EntityStatus, QaPair, QueryReport,
    RankedMatch, RetrievalResult, TrainReport, NOT_TRAINED_MESSAGE, NO_ANSWER_MESSAGE,
};
pub use retrieval::{cosine_similarity, search, top_match, Scored};
pub use store::{EntityIndex, IndexStore};
