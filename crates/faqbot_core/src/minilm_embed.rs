use anyhow::{Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Embedding, LayerNorm, Linear, VarBuilder};
use std::path::Path;
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};

use crate::embed::SentenceEncoder;

// ---------------------------------------------------------------------------
// Config (hardcoded for all-MiniLM-L6-v2)
// ---------------------------------------------------------------------------

struct MiniLmConfig {
    hidden_size: usize,
    intermediate_size: usize,
    num_attention_heads: usize,
    num_hidden_layers: usize,
    vocab_size: usize,
    max_position_embeddings: usize,
    type_vocab_size: usize,
    layer_norm_eps: f64,
    max_seq_len: usize,
}

impl MiniLmConfig {
    fn all_minilm_l6_v2() -> Self {
        Self {
            hidden_size: 384,
            intermediate_size: 1536,
            num_attention_heads: 12,
            num_hidden_layers: 6,
            vocab_size: 30522,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
            // sentence-transformers truncates this checkpoint at 256 tokens
            max_seq_len: 256,
        }
    }

    fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
}

// ---------------------------------------------------------------------------
// Encoder layer: masked self-attention + FFN, both post-norm
// ---------------------------------------------------------------------------

struct EncoderLayer {
    query: Linear,
    key: Linear,
    value: Linear,
    attn_out: Linear,
    attn_norm: LayerNorm,
    up: Linear,
    down: Linear,
    ffn_norm: LayerNorm,
    num_heads: usize,
    head_dim: usize,
}

impl EncoderLayer {
    fn load(vb: VarBuilder, cfg: &MiniLmConfig) -> Result<Self> {
        let h = cfg.hidden_size;
        let attn = vb.pp("attention");
        let eps = cfg.layer_norm_eps;

        Ok(Self {
            query: candle_nn::linear(h, h, attn.pp("self").pp("query"))?,
            key: candle_nn::linear(h, h, attn.pp("self").pp("key"))?,
            value: candle_nn::linear(h, h, attn.pp("self").pp("value"))?,
            attn_out: candle_nn::linear(h, h, attn.pp("output").pp("dense"))?,
            attn_norm: candle_nn::layer_norm(h, eps, attn.pp("output").pp("LayerNorm"))?,
            up: candle_nn::linear(h, cfg.intermediate_size, vb.pp("intermediate").pp("dense"))?,
            down: candle_nn::linear(cfg.intermediate_size, h, vb.pp("output").pp("dense"))?,
            ffn_norm: candle_nn::layer_norm(h, eps, vb.pp("output").pp("LayerNorm"))?,
            num_heads: cfg.num_attention_heads,
            head_dim: cfg.head_dim(),
        })
    }

    fn split_heads(&self, x: &Tensor, batch: usize, seq_len: usize) -> Result<Tensor> {
        Ok(x.reshape((batch, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    /// `mask_bias` is (batch, 1, 1, seq) with 0 for real tokens and a large negative for padding.
    fn forward(&self, x: &Tensor, mask_bias: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, hidden) = x.dims3()?;

        let q = self.split_heads(&self.query.forward(x)?, batch, seq_len)?;
        let k = self.split_heads(&self.key.forward(x)?, batch, seq_len)?;
        let v = self.split_heads(&self.value.forward(x)?, batch, seq_len)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = q
            .matmul(&k.t()?.contiguous()?)?
            .affine(scale, 0.0)?
            .broadcast_add(mask_bias)?;
        let weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let context = weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, hidden))?;

        let x = self.attn_norm.forward(&(x + self.attn_out.forward(&context)?)?)?;

        let h = self.down.forward(&self.up.forward(&x)?.gelu_erf()?)?;
        Ok(self.ffn_norm.forward(&(x + h)?)?)
    }
}

// ---------------------------------------------------------------------------
// Full model
// ---------------------------------------------------------------------------

struct MiniLmModel {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    token_type_embeddings: Embedding,
    embedding_norm: LayerNorm,
    layers: Vec<EncoderLayer>,
    device: Device,
}

impl MiniLmModel {
    fn load(path: &Path, cfg: &MiniLmConfig, device: &Device) -> Result<Self> {
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)? };
        let emb = vb.pp("embeddings");
        let h = cfg.hidden_size;

        let layers = (0..cfg.num_hidden_layers)
            .map(|i| EncoderLayer::load(vb.pp("encoder").pp("layer").pp(i.to_string()), cfg))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            word_embeddings: candle_nn::embedding(cfg.vocab_size, h, emb.pp("word_embeddings"))?,
            position_embeddings: candle_nn::embedding(
                cfg.max_position_embeddings,
                h,
                emb.pp("position_embeddings"),
            )?,
            token_type_embeddings: candle_nn::embedding(
                cfg.type_vocab_size,
                h,
                emb.pp("token_type_embeddings"),
            )?,
            embedding_norm: candle_nn::layer_norm(h, cfg.layer_norm_eps, emb.pp("LayerNorm"))?,
            layers,
            device: device.clone(),
        })
    }

    /// Returns one mean-pooled, L2-normalised vector per row of `ids`.
    fn forward(&self, ids: &Tensor, mask: &Tensor) -> Result<Vec<Vec<f32>>> {
        let (batch, seq_len) = ids.dims2()?;

        let positions = Tensor::arange(0u32, seq_len as u32, &self.device)?;
        let token_types = Tensor::zeros((batch, seq_len), DType::U32, &self.device)?;
        let embedded = self
            .word_embeddings
            .forward(ids)?
            .broadcast_add(&self.position_embeddings.forward(&positions)?)?
            .add(&self.token_type_embeddings.forward(&token_types)?)?;
        let mut hidden = self.embedding_norm.forward(&embedded)?;

        let mask_bias = ((mask.ones_like()? - mask)? * -10_000.0)?.reshape((batch, 1, 1, seq_len))?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &mask_bias)?;
        }

        // Mean over real tokens only, then L2 normalize each row.
        let mask3 = mask.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&mask3)?.sum(1)?;
        let counts = (mask.sum_keepdim(1)? + 1e-9)?;
        let pooled = summed.broadcast_div(&counts)?;
        let norms = (pooled.sqr()?.sum_keepdim(1)?.sqrt()? + 1e-12)?;
        Ok(pooled.broadcast_div(&norms)?.to_vec2::<f32>()?)
    }
}

// ---------------------------------------------------------------------------
// Public encoder
// ---------------------------------------------------------------------------

pub struct MiniLmEncoder {
    model: MiniLmModel,
    tokenizer: Tokenizer,
}

impl MiniLmEncoder {
    pub fn load(model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        let cfg = MiniLmConfig::all_minilm_l6_v2();
        let device = Device::Cpu;
        let model = MiniLmModel::load(model_path, &cfg, &device)
            .with_context(|| format!("load weights from {}", model_path.display()))?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer {}: {e}", tokenizer_path.display()))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: cfg.max_seq_len,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("configure truncation: {e}"))?;
        tokenizer.with_padding(Some(PaddingParams::default()));

        Ok(Self { model, tokenizer })
    }
}

impl SentenceEncoder for MiniLmEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        self.encode_batch(&[text.to_string()])?
            .pop()
            .context("encoder produced no vector")
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;

        let batch = encodings.len();
        let seq_len = encodings.first().map(|e| e.get_ids().len()).unwrap_or(0);
        let ids: Vec<u32> = encodings.iter().flat_map(|e| e.get_ids().to_vec()).collect();
        let mask: Vec<u32> = encodings
            .iter()
            .flat_map(|e| e.get_attention_mask().to_vec())
            .collect();

        let device = &self.model.device;
        let ids = Tensor::from_vec(ids, (batch, seq_len), device)?;
        let mask = Tensor::from_vec(mask, (batch, seq_len), device)?.to_dtype(DType::F32)?;
        self.model.forward(&ids, &mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_files() -> Option<(std::path::PathBuf, std::path::PathBuf)> {
        let base = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../models");
        let model = base.join("all-MiniLM-L6-v2.safetensors");
        let tokenizer = base.join("all-MiniLM-L6-v2-tokenizer.json");
        if model.exists() && tokenizer.exists() {
            Some((model, tokenizer))
        } else {
            eprintln!("Skipping: all-MiniLM-L6-v2 model or tokenizer not found");
            None
        }
    }

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn batch_vectors_are_unit_length() {
        let Some((model, tokenizer)) = model_files() else {
            return;
        };
        let encoder = MiniLmEncoder::load(&model, &tokenizer).unwrap();
        let vectors = encoder
            .encode_batch(&["When is admission open?".into(), "Fees".into()])
            .unwrap();

        assert_eq!(vectors.len(), 2);
        for v in &vectors {
            assert_eq!(v.len(), 384);
            let norm = dot(v, v).sqrt();
            assert!((norm - 1.0).abs() < 0.01, "L2 norm should be ~1.0, got {norm}");
        }
    }

    #[test]
    fn padding_does_not_change_vectors() {
        let Some((model, tokenizer)) = model_files() else {
            return;
        };
        let encoder = MiniLmEncoder::load(&model, &tokenizer).unwrap();
        let alone = encoder.encode("What admission?").unwrap();
        let padded = encoder
            .encode_batch(&[
                "What admission?".into(),
                "A much longer sentence that forces the first row to be padded".into(),
            ])
            .unwrap();
        assert!(dot(&alone, &padded[0]) > 0.999);
    }

    #[test]
    fn related_questions_score_higher() {
        let Some((model, tokenizer)) = model_files() else {
            return;
        };
        let encoder = MiniLmEncoder::load(&model, &tokenizer).unwrap();
        let q = encoder.encode("When is admission open?").unwrap();
        let related = encoder.encode("Admission is open year round").unwrap();
        let unrelated = encoder.encode("The cafeteria serves vegetarian lunch").unwrap();
        assert!(dot(&q, &related) > dot(&q, &unrelated));
    }
}
