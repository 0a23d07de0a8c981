use std::collections::HashMap;
use std::sync::{LazyLock, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{EngineConfig, ModelFiles};
use crate::error::{EngineError, Result};
use crate::minilm_embed::MiniLmEncoder;
use crate::model::EmbeddingVector;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").expect("valid regex"));

/// A learned sentence encoder producing fixed-width vectors.
pub trait SentenceEncoder: Send + Sync {
    fn encode(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    fn encode_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.encode(t)).collect()
    }
}

impl SentenceEncoder for Box<dyn SentenceEncoder> {
    fn encode(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        (**self).encode(text)
    }

    fn encode_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        (**self).encode_batch(texts)
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    WORD.find_iter(text).map(|m| m.as_str().to_lowercase())
}

/// Distinct lowercase words of one embedding batch, in order of first appearance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vocabulary {
    positions: HashMap<String, usize>,
    words: Vec<String>,
}

impl Vocabulary {
    pub fn from_texts(texts: &[String]) -> Self {
        let mut vocab = Self::default();
        for word in texts.iter().flat_map(|t| words(t)) {
            if !vocab.positions.contains_key(&word) {
                vocab.positions.insert(word.clone(), vocab.words.len());
                vocab.words.push(word);
            }
        }
        vocab
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Word-occurrence counts, one slot per vocabulary word plus a trailing slot
    /// holding the L2 length of the counts of words outside the vocabulary.
    ///
    /// Vocabulary words never land in the trailing slot, so dot products are
    /// unchanged while a query's norm still covers every word it contains. The
    /// cosine therefore equals the one obtained by embedding the query in the
    /// same batch as the vocabulary's texts.
    pub fn vectorize(&self, text: &str) -> EmbeddingVector {
        let width = self.words.len();
        let mut v = vec![0.0f32; width + 1];
        let mut unknown: HashMap<String, f32> = HashMap::new();
        for word in words(text) {
            match self.positions.get(&word) {
                Some(&idx) => v[idx] += 1.0,
                None => *unknown.entry(word).or_default() += 1.0,
            }
        }
        v[width] = unknown.values().map(|c| c * c).sum::<f32>().sqrt();
        v
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMode {
    Semantic,
    Fallback,
}

/// How the vectors of one batch were produced; queries must use the same encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoding {
    Semantic,
    Vocabulary(Vocabulary),
}

impl Encoding {
    pub fn mode(&self) -> EmbeddingMode {
        match self {
            Encoding::Semantic => EmbeddingMode::Semantic,
            Encoding::Vocabulary(_) => EmbeddingMode::Fallback,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddedBatch {
    pub vectors: Vec<EmbeddingVector>,
    pub encoding: Encoding,
}

pub fn embed_with_vocabulary(texts: &[String]) -> EmbeddedBatch {
    let vocab = Vocabulary::from_texts(texts);
    let vectors = texts.iter().map(|t| vocab.vectorize(t)).collect();
    EmbeddedBatch {
        vectors,
        encoding: Encoding::Vocabulary(vocab),
    }
}

type EncoderLoader = Box<dyn Fn() -> anyhow::Result<Box<dyn SentenceEncoder>> + Send + Sync>;

enum Backend {
    Semantic(Box<dyn SentenceEncoder>),
    Fallback,
}

/// Embeds text with a learned model when one loads, word counts otherwise.
///
/// The backend is chosen once, on the first call to [`EmbeddingProvider::initialize`]
/// or the first embedding request, and never changes afterwards. A failing
/// semantic encode only downgrades the call that hit it.
pub struct EmbeddingProvider {
    loader: Option<EncoderLoader>,
    backend: OnceLock<Backend>,
}

impl EmbeddingProvider {
    pub fn fallback() -> Self {
        Self {
            loader: None,
            backend: OnceLock::new(),
        }
    }

    pub fn with_loader<F>(loader: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn SentenceEncoder>> + Send + Sync + 'static,
    {
        Self {
            loader: Some(Box::new(loader)),
            backend: OnceLock::new(),
        }
    }

    pub fn from_model_files(files: ModelFiles) -> Self {
        Self::with_loader(move || {
            let encoder = MiniLmEncoder::load(&files.model_path, &files.tokenizer_path)?;
            Ok(Box::new(encoder) as Box<dyn SentenceEncoder>)
        })
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        match &config.model {
            Some(files) => Self::from_model_files(files.clone()),
            None => Self::fallback(),
        }
    }

    /// Loads the semantic model if configured. Safe to call repeatedly.
    pub fn initialize(&self) -> EmbeddingMode {
        match self.backend() {
            Backend::Semantic(_) => EmbeddingMode::Semantic,
            Backend::Fallback => EmbeddingMode::Fallback,
        }
    }

    fn backend(&self) -> &Backend {
        self.backend.get_or_init(|| {
            let Some(loader) = &self.loader else {
                info!("No embedding model configured, using vocabulary embeddings");
                return Backend::Fallback;
            };
            match loader() {
                Ok(encoder) => {
                    info!("Embedding model initialized");
                    Backend::Semantic(encoder)
                }
                Err(err) => {
                    let err = EngineError::ModelInit(format!("{err:#}"));
                    warn!(error = %err, "Falling back to vocabulary embeddings");
                    Backend::Fallback
                }
            }
        })
    }

    pub fn embed(&self, texts: &[String]) -> EmbeddedBatch {
        let Backend::Semantic(encoder) = self.backend() else {
            return embed_with_vocabulary(texts);
        };
        if texts.is_empty() {
            return EmbeddedBatch {
                vectors: Vec::new(),
                encoding: Encoding::Semantic,
            };
        }

        match encode_checked(encoder, texts) {
            Ok(vectors) => EmbeddedBatch {
                vectors,
                encoding: Encoding::Semantic,
            },
            Err(err) => {
                warn!(error = %err, batch = texts.len(), "Semantic encode failed, using vocabulary embeddings for this call");
                embed_with_vocabulary(texts)
            }
        }
    }

    /// Embeds a single query so it is comparable with vectors made under `encoding`.
    pub fn embed_query(&self, text: &str, encoding: &Encoding) -> Result<EmbeddingVector> {
        match (encoding, self.backend()) {
            (Encoding::Vocabulary(vocab), _) => Ok(vocab.vectorize(text)),
            (Encoding::Semantic, Backend::Semantic(encoder)) => encoder
                .encode(text)
                .map_err(|e| EngineError::Embedding(format!("{e:#}"))),
            (Encoding::Semantic, Backend::Fallback) => Err(EngineError::Embedding(
                "index was built with a semantic model that is not loaded".into(),
            )),
        }
    }
}

fn encode_checked(encoder: &dyn SentenceEncoder, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
    let vectors = encoder
        .encode_batch(texts)
        .map_err(|e| EngineError::Embedding(format!("{e:#}")))?;
    if vectors.len() != texts.len() {
        return Err(EngineError::Embedding(format!(
            "encoder returned {} vectors for {} texts",
            vectors.len(),
            texts.len()
        )));
    }
    let width = vectors.first().map(Vec::len).unwrap_or(0);
    if vectors.iter().any(|v| v.len() != width) {
        return Err(EngineError::Embedding("encoder returned mixed widths".into()));
    }
    Ok(vectors)
}
