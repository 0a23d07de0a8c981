use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::embed::{EmbeddedBatch, Encoding};
use crate::error::{EngineError, Result};
use crate::model::{EmbeddingVector, EntityId, EntityStats, EntityStatus, QaPair};

/// Trained corpus of one entity. Pairs, questions and vectors are positionally aligned.
#[derive(Debug)]
pub struct EntityIndex {
    pairs: Vec<QaPair>,
    questions: Vec<String>,
    vectors: Vec<EmbeddingVector>,
    encoding: Encoding,
    trained_at: DateTime<Utc>,
}

impl EntityIndex {
    pub fn new(pairs: Vec<QaPair>, batch: EmbeddedBatch) -> Result<Self> {
        let questions: Vec<String> = pairs.iter().map(|p| p.question.clone()).collect();
        if batch.vectors.len() != pairs.len() {
            return Err(EngineError::Internal(format!(
                "{} vectors for {} pairs",
                batch.vectors.len(),
                pairs.len()
            )));
        }
        Ok(Self {
            pairs,
            questions,
            vectors: batch.vectors,
            encoding: batch.encoding,
            trained_at: Utc::now(),
        })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[QaPair] {
        &self.pairs
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    pub fn vectors(&self) -> &[EmbeddingVector] {
        &self.vectors
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct QueryCounters {
    total: u64,
    answered: u64,
    confidence_sum: f64,
}

#[derive(Debug)]
struct EntityRecord {
    status: EntityStatus,
    training: bool,
    index: Option<Arc<EntityIndex>>,
    counters: QueryCounters,
}

impl Default for EntityRecord {
    fn default() -> Self {
        Self {
            status: EntityStatus::Untrained,
            training: false,
            index: None,
            counters: QueryCounters::default(),
        }
    }
}

/// In-memory map of entity id to trained index.
///
/// The lock is only held for map bookkeeping; fetching and embedding happen
/// outside it, and a new index replaces the old one in a single swap.
#[derive(Debug, Default)]
pub struct IndexStore {
    records: Mutex<HashMap<EntityId, EntityRecord>>,
}

impl IndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<EntityId, EntityRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the training slot for `entity_id`; a second concurrent claim is rejected.
    pub fn begin_training(&self, entity_id: EntityId) -> Result<TrainingSlot<'_>> {
        let mut records = self.records();
        let record = records.entry(entity_id).or_default();
        if record.training {
            return Err(EngineError::TrainingInProgress { entity_id });
        }
        let previous = record.status;
        record.training = true;
        record.status = EntityStatus::Training;
        Ok(TrainingSlot {
            store: self,
            entity_id,
            previous,
            finished: false,
        })
    }

    pub fn get(&self, entity_id: EntityId) -> Option<Arc<EntityIndex>> {
        self.records()
            .get(&entity_id)
            .and_then(|r| r.index.clone())
    }

    pub fn status(&self, entity_id: EntityId) -> EntityStatus {
        self.records()
            .get(&entity_id)
            .map(|r| r.status)
            .unwrap_or(EntityStatus::Untrained)
    }

    pub fn record_query(&self, entity_id: EntityId, confidence: Option<f32>) {
        if let Some(record) = self.records().get_mut(&entity_id) {
            record.counters.total += 1;
            if let Some(c) = confidence {
                record.counters.answered += 1;
                record.counters.confidence_sum += f64::from(c);
            }
        }
    }

    pub fn stats(&self, entity_id: EntityId) -> EntityStats {
        let records = self.records();
        let Some(record) = records.get(&entity_id) else {
            return EntityStats {
                entity_id,
                status: EntityStatus::Untrained,
                pair_count: 0,
                last_trained_at: None,
                total_queries: 0,
                answered_queries: 0,
                mean_confidence: None,
            };
        };
        let c = record.counters;
        EntityStats {
            entity_id,
            status: record.status,
            pair_count: record.index.as_ref().map(|i| i.len()).unwrap_or(0),
            last_trained_at: record.index.as_ref().map(|i| i.trained_at()),
            total_queries: c.total,
            answered_queries: c.answered,
            mean_confidence: (c.answered > 0).then(|| (c.confidence_sum / c.answered as f64) as f32),
        }
    }

    /// Drops everything known about `entity_id`. Returns whether an index existed.
    pub fn remove(&self, entity_id: EntityId) -> Result<bool> {
        let mut records = self.records();
        let training = match records.get(&entity_id) {
            Some(record) => record.training,
            None => return Ok(false),
        };
        if training {
            return Err(EngineError::TrainingInProgress { entity_id });
        }
        Ok(records.remove(&entity_id).and_then(|r| r.index).is_some())
    }
}

/// Exclusive right to retrain one entity. Dropping it unfinished restores the
/// previous status and leaves the old index in place.
pub struct TrainingSlot<'a> {
    store: &'a IndexStore,
    entity_id: EntityId,
    previous: EntityStatus,
    finished: bool,
}

impl TrainingSlot<'_> {
    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Replaces the entity's index and marks it trained.
    pub fn install(mut self, index: EntityIndex) -> usize {
        let count = index.len();
        let mut records = self.store.records();
        let record = records.entry(self.entity_id).or_default();
        record.index = Some(Arc::new(index));
        record.status = EntityStatus::Trained;
        record.training = false;
        self.finished = true;
        count
    }

    /// Marks the attempt failed; any previous index keeps serving queries.
    pub fn fail(mut self) {
        let mut records = self.store.records();
        let record = records.entry(self.entity_id).or_default();
        record.status = EntityStatus::Error;
        record.training = false;
        self.finished = true;
    }
}

impl Drop for TrainingSlot<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut records = self.store.records();
        if let Some(record) = records.get_mut(&self.entity_id) {
            record.status = self.previous;
            record.training = false;
        }
    }
}
