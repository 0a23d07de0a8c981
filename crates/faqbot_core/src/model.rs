use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type EntityId = i64;

pub type EmbeddingVector = Vec<f32>;

pub const NO_ANSWER_MESSAGE: &str = "I apologize, but I couldn't find a relevant answer to your question. \
Please try rephrasing your question or contact support for assistance.";

pub const NOT_TRAINED_MESSAGE: &str = "Please train the bot first before querying.";

/// A generated question with the source sentence that answers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
    /// Generation confidence, fixed by the corpus builder.
    pub confidence: f32,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Hit,
    Miss,
}

/// Best answer for a query, or the no-match sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub answer: String,
    pub confidence: f32,
    pub source: Option<String>,
}

impl RetrievalResult {
    pub fn no_match() -> Self {
        Self {
            answer: NO_ANSWER_MESSAGE.to_string(),
            confidence: 0.0,
            source: None,
        }
    }

    pub fn decision(&self) -> Decision {
        if self.source.is_some() {
            Decision::Hit
        } else {
            Decision::Miss
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMatch {
    pub question: String,
    pub answer: String,
    pub score: f32,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Untrained,
    Training,
    Trained,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStats {
    pub entity_id: EntityId,
    pub status: EntityStatus,
    pub pair_count: usize,
    pub last_trained_at: Option<DateTime<Utc>>,
    pub total_queries: u64,
    pub answered_queries: u64,
    pub mean_confidence: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub success: bool,
    pub message: String,
    pub pair_count: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryReport {
    pub success: bool,
    pub answer: String,
    pub confidence: f32,
    pub source: Option<String>,
    pub error: Option<String>,
}

impl QueryReport {
    /// True when the caller should present this as a degraded answer.
    pub fn is_degraded(&self) -> bool {
        !self.success || self.confidence == 0.0
    }
}

impl From<RetrievalResult> for QueryReport {
    fn from(result: RetrievalResult) -> Self {
        Self {
            success: true,
            answer: result.answer,
            confidence: result.confidence,
            source: result.source,
            error: None,
        }
    }
}
