use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::corpus::CorpusBuilder;
use crate::embed::{embed_with_vocabulary, EmbeddingMode, EmbeddingProvider};
use crate::error::{EngineError, Result};
use crate::extract::{ContentExtractor, HttpFetcher, PageFetcher};
use crate::model::{
    EntityId, EntityStats, EntityStatus, QaPair, QueryReport, RankedMatch, RetrievalResult,
    TrainReport, NOT_TRAINED_MESSAGE, NO_ANSWER_MESSAGE,
};
use crate::retrieval::{search, Scored};
use crate::store::{EntityIndex, IndexStore, TrainingSlot};

/// Per-entity question answering over scraped content.
///
/// `train` and `query` are the collaborator-facing operations and never fail:
/// every error becomes a structured report. The `try_*` variants expose the
/// typed errors.
pub struct RetrievalEngine {
    config: EngineConfig,
    extractor: ContentExtractor,
    corpus: CorpusBuilder,
    embedder: Arc<EmbeddingProvider>,
    store: IndexStore,
}

impl RetrievalEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(&config.user_agent)?);
        let embedder = EmbeddingProvider::from_config(&config);
        Self::with_parts(config, fetcher, embedder)
    }

    pub fn with_parts(
        config: EngineConfig,
        fetcher: Arc<dyn PageFetcher>,
        embedder: EmbeddingProvider,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            extractor: ContentExtractor::new(fetcher, config.fetch_timeout()),
            corpus: CorpusBuilder::from_config(&config),
            embedder: Arc::new(embedder),
            store: IndexStore::new(),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Loads the embedding model off the async runtime. Idempotent.
    pub async fn initialize(&self) -> Result<EmbeddingMode> {
        let embedder = Arc::clone(&self.embedder);
        Ok(tokio::task::spawn_blocking(move || embedder.initialize()).await?)
    }

    pub async fn try_train(&self, entity_id: EntityId, url: &str) -> Result<usize> {
        let slot = self.store.begin_training(entity_id)?;
        info!(entity_id, url, "Training started");

        let built: Result<EntityIndex> = async {
            let text = self.extractor.fetch_text(url).await?;
            self.build_index(&text).await
        }
        .await;
        self.finish_training(slot, built)
    }

    pub async fn try_train_text(&self, entity_id: EntityId, text: &str) -> Result<usize> {
        let slot = self.store.begin_training(entity_id)?;
        info!(entity_id, chars = text.len(), "Training started from text");

        let built = self.build_index(text).await;
        self.finish_training(slot, built)
    }

    pub async fn train(&self, entity_id: EntityId, url: &str) -> TrainReport {
        train_report(entity_id, self.try_train(entity_id, url).await)
    }

    pub async fn train_text(&self, entity_id: EntityId, text: &str) -> TrainReport {
        train_report(entity_id, self.try_train_text(entity_id, text).await)
    }

    pub async fn try_query(&self, entity_id: EntityId, question: &str) -> Result<RetrievalResult> {
        let matches = self.try_similar(entity_id, question).await?;

        let result = match matches.into_iter().next() {
            Some(best) => RetrievalResult {
                answer: best.answer,
                confidence: best.score,
                source: Some(best.source),
            },
            None => RetrievalResult::no_match(),
        };
        let answered = (result.source.is_some()).then_some(result.confidence);
        self.store.record_query(entity_id, answered);
        debug!(entity_id, confidence = result.confidence, "Query answered");
        Ok(result)
    }

    pub async fn query(&self, entity_id: EntityId, question: &str) -> QueryReport {
        match self.try_query(entity_id, question).await {
            Ok(result) => result.into(),
            Err(err @ EngineError::NotTrained { .. }) => QueryReport {
                success: false,
                answer: NOT_TRAINED_MESSAGE.to_string(),
                confidence: 0.0,
                source: None,
                error: Some(err.kind().to_string()),
            },
            Err(err) => {
                warn!(entity_id, error = %err, "Query failed, returning no-answer");
                QueryReport {
                    success: false,
                    answer: NO_ANSWER_MESSAGE.to_string(),
                    confidence: 0.0,
                    source: None,
                    error: Some(err.kind().to_string()),
                }
            }
        }
    }

    /// Every stored pair whose question clears the threshold, best first.
    pub async fn try_similar(&self, entity_id: EntityId, question: &str) -> Result<Vec<RankedMatch>> {
        let index = self
            .store
            .get(entity_id)
            .ok_or(EngineError::NotTrained { entity_id })?;

        let embedder = Arc::clone(&self.embedder);
        let question = question.to_string();
        let threshold = self.config.similarity_threshold;
        tokio::task::spawn_blocking(move || rank(&embedder, &index, &question, threshold)).await?
    }

    pub fn status(&self, entity_id: EntityId) -> EntityStatus {
        self.store.status(entity_id)
    }

    pub fn stats(&self, entity_id: EntityId) -> EntityStats {
        self.store.stats(entity_id)
    }

    pub fn pairs(&self, entity_id: EntityId) -> Result<Vec<QaPair>> {
        self.store
            .get(entity_id)
            .map(|index| index.pairs().to_vec())
            .ok_or(EngineError::NotTrained { entity_id })
    }

    pub fn forget(&self, entity_id: EntityId) -> Result<bool> {
        let removed = self.store.remove(entity_id)?;
        if removed {
            info!(entity_id, "Entity index removed");
        }
        Ok(removed)
    }

    async fn build_index(&self, text: &str) -> Result<EntityIndex> {
        let pairs = self.corpus.build(text);
        if pairs.is_empty() {
            return Err(EngineError::EmptyCorpus);
        }

        let questions: Vec<String> = pairs.iter().map(|p| p.question.clone()).collect();
        let embedder = Arc::clone(&self.embedder);
        let batch = tokio::task::spawn_blocking(move || embedder.embed(&questions)).await?;
        EntityIndex::new(pairs, batch)
    }

    fn finish_training(
        &self,
        slot: TrainingSlot<'_>,
        built: Result<EntityIndex>,
    ) -> Result<usize> {
        let entity_id = slot.entity_id();
        match built {
            Ok(index) => {
                let mode = index.encoding().mode();
                let count = slot.install(index);
                info!(entity_id, pair_count = count, ?mode, "Training finished");
                Ok(count)
            }
            Err(err) => {
                slot.fail();
                warn!(entity_id, error = %err, "Training failed");
                Err(err)
            }
        }
    }
}

fn train_report(entity_id: EntityId, outcome: Result<usize>) -> TrainReport {
    match outcome {
        Ok(count) => TrainReport {
            success: true,
            message: format!("Trained successfully with {count} Q&A pairs"),
            pair_count: count,
            error: None,
        },
        Err(err) => {
            let message = match &err {
                EngineError::EmptyCorpus => "No content found on the website".to_string(),
                EngineError::TrainingInProgress { .. } => {
                    format!("Training already in progress for entity {entity_id}")
                }
                other => format!("Training failed: {other}"),
            };
            TrainReport {
                success: false,
                message,
                pair_count: 0,
                error: Some(err.kind().to_string()),
            }
        }
    }
}

fn ranked(hits: Vec<Scored<&QaPair>>) -> Vec<RankedMatch> {
    hits.into_iter()
        .map(|hit| RankedMatch {
            question: hit.payload.question.clone(),
            answer: hit.payload.answer.clone(),
            score: hit.score,
            source: hit.payload.source.clone(),
        })
        .collect()
}

fn rank(
    embedder: &EmbeddingProvider,
    index: &EntityIndex,
    question: &str,
    threshold: f32,
) -> Result<Vec<RankedMatch>> {
    match embedder.embed_query(question, index.encoding()) {
        Ok(query) => Ok(ranked(search(&query, index.vectors(), index.pairs(), threshold))),
        Err(err) => {
            // Compare the query and stored questions as one vocabulary batch.
            warn!(error = %err, "Query encode failed, ranking with vocabulary embeddings");
            let mut texts = Vec::with_capacity(index.len() + 1);
            texts.push(question.to_string());
            texts.extend(index.questions().iter().cloned());

            let batch = embed_with_vocabulary(&texts);
            let Some((query, corpus)) = batch.vectors.split_first() else {
                return Ok(Vec::new());
            };
            Ok(ranked(search(query, corpus, index.pairs(), threshold)))
        }
    }
}
