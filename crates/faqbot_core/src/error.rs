use thiserror::Error;

use crate::model::EntityId;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Embedding model unavailable: {0}")]
    ModelInit(String),

    #[error("No content found")]
    EmptyCorpus,

    #[error("Entity {entity_id} has not been trained")]
    NotTrained { entity_id: EntityId },

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Training already in progress for entity {entity_id}")]
    TrainingInProgress { entity_id: EntityId },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable short code carried in collaborator-facing reports.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Fetch { .. } => "fetch",
            EngineError::ModelInit(_) => "model_init",
            EngineError::EmptyCorpus => "empty_corpus",
            EngineError::NotTrained { .. } => "not_trained",
            EngineError::Embedding(_) => "embedding",
            EngineError::TrainingInProgress { .. } => "training_in_progress",
            EngineError::Config(_) => "config",
            EngineError::Internal(_) => "internal",
        }
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::Internal(format!("worker task failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
