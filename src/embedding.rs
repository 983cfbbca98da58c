//! # Embedding
//!
//! Sentence embeddings for chunks and queries.
//!
//! The production model is a BERT-family sentence-transformer (by default
//! `paraphrase-multilingual-MiniLM-L12-v2`, 384-d, which covers Devanagari) run with
//! Candle and fetched from the Hugging Face Hub. Texts are tokenized in padded batches,
//! passed through the encoder, and mean-pooled over the attention mask.
//!
//! Loading the weights is slow, so [`LazyEmbedder`] defers it to the first call that
//! actually needs a vector and then keeps the model for the rest of the process.
//!
//! ```no_run
//! use sanskrit_rag::config::EmbeddingConfig;
//! use sanskrit_rag::embedding::{Embedder, LazyEmbedder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let embedder = LazyEmbedder::new(EmbeddingConfig::default());
//! let vectors = embedder.embed_batch(&["मूर्खभृत्यस्य कथा", "कालीदासस्य चातुर्यम्"])?;
//! assert_eq!(vectors[0].len(), 384);
//! # Ok(()) }
//! ```

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use once_cell::sync::OnceCell;
use std::error::Error;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};
use tracing::info;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};

pub(crate) type ModelResult<T> = std::result::Result<T, Box<dyn Error + Send + Sync>>;

/// Longest token sequence fed to the encoder; longer texts are truncated.
const MAX_TOKENS: usize = 512;

/// Turns text into fixed-width vectors.
pub trait Embedder {
    /// Identifier of the underlying model, for logs.
    fn model_name(&self) -> &str;

    /// Width of every vector this embedder returns.
    fn dimension(&self) -> usize;

    /// Embed `texts`, returning one vector per input in the same order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| RagError::Embedding("model returned no vector".to_string()))
    }
}

/// Sentence embeddings model using Candle (pure Rust)
pub struct SentenceEmbeddingsModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    normalize: bool,
}

impl SentenceEmbeddingsModel {
    /// Load the model from Hugging Face Hub
    pub fn load(model_id: &str, revision: &str, normalize: bool) -> ModelResult<Self> {
        let device = Device::Cpu;

        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, revision.to_string());
        let api = Api::new()?;
        let api_repo = api.repo(repo);

        let config_filename = api_repo.get("config.json")?;
        let tokenizer_filename = api_repo.get("tokenizer.json")?;
        let weights_filename = api_repo.get("model.safetensors")?;

        let config = std::fs::read_to_string(config_filename)?;
        let config: Config = serde_json::from_str(&config)?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_filename)?;
        let pad_token = ["[PAD]", "<pad>"]
            .into_iter()
            .find(|token| tokenizer.token_to_id(token).is_some())
            .unwrap_or("[PAD]");
        let pad_id = tokenizer.token_to_id(pad_token).unwrap_or(0);
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            pad_id,
            pad_token: pad_token.to_string(),
            ..Default::default()
        }));
        tokenizer.with_truncation(Some(TruncationParams {
            max_length: MAX_TOKENS,
            ..Default::default()
        }))?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)? };
        let model = BertModel::load(vb, &config)?;

        Ok(Self {
            model,
            tokenizer,
            device,
            normalize,
        })
    }

    /// Encode a batch of texts into one pooled embedding each.
    pub fn encode_batch(&self, texts: &[&str]) -> ModelResult<Vec<Vec<f32>>> {
        let encodings = self.tokenizer.encode_batch(texts.to_vec(), true)?;

        let ids = encodings
            .iter()
            .map(|e| Tensor::new(e.get_ids(), &self.device))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let masks = encodings
            .iter()
            .map(|e| Tensor::new(e.get_attention_mask(), &self.device))
            .collect::<candle_core::Result<Vec<_>>>()?;

        let token_ids = Tensor::stack(&ids, 0)?;
        let attention_mask = Tensor::stack(&masks, 0)?;
        let token_type_ids = token_ids.zeros_like()?;

        let output = self
            .model
            .forward(&token_ids, &token_type_ids, Some(&attention_mask))?;

        let pooled = mean_pooling(&output, &attention_mask)?;
        let pooled = if self.normalize {
            l2_normalize(&pooled)?
        } else {
            pooled
        };

        Ok(pooled.to_vec2::<f32>()?)
    }
}

/// Mean pooling over token embeddings, considering attention mask.
///
/// `embeddings` is `[batch, seq_len, hidden]`, `attention_mask` is `[batch, seq_len]`;
/// the result is `[batch, hidden]`.
fn mean_pooling(embeddings: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
    let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?; // [batch, seq_len, 1]

    let sum = embeddings.broadcast_mul(&mask)?.sum(1)?; // [batch, hidden]
    let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?; // [batch, 1]

    sum.broadcast_div(&count)
}

/// L2 normalize each row.
fn l2_normalize(tensor: &Tensor) -> candle_core::Result<Tensor> {
    let norm = tensor.sqr()?.sum_keepdim(1)?.sqrt()?;
    tensor.broadcast_div(&norm)
}

/// An [`Embedder`] that loads its model on first use and keeps it afterwards.
pub struct LazyEmbedder {
    config: EmbeddingConfig,
    model: OnceCell<SentenceEmbeddingsModel>,
}

impl LazyEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            model: OnceCell::new(),
        }
    }

    /// Whether the weights have been loaded yet.
    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    fn model(&self) -> Result<&SentenceEmbeddingsModel> {
        self.model.get_or_try_init(|| {
            info!("Loading embedding model {}", self.config.model);
            let model = SentenceEmbeddingsModel::load(
                &self.config.model,
                &self.config.revision,
                self.config.normalize,
            )
            .map_err(|e| RagError::Embedding(format!("loading {}: {e}", self.config.model)))?;
            info!("Embedding model loaded");
            Ok(model)
        })
    }
}

impl Embedder for LazyEmbedder {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.model()?
            .encode_batch(texts)
            .map_err(|e| RagError::Embedding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_pooling_ignores_padding() {
        let device = Device::Cpu;
        let embeddings = Tensor::new(
            &[
                [[1f32, 2.], [3., 4.], [100., 100.]],
                [[5f32, 5.], [7., 9.], [9., 11.]],
            ],
            &device,
        )
        .unwrap();
        let mask = Tensor::new(&[[1u32, 1, 0], [1, 1, 1]], &device).unwrap();

        let pooled = mean_pooling(&embeddings, &mask).unwrap();

        assert_eq!(
            pooled.to_vec2::<f32>().unwrap(),
            vec![vec![2., 3.], vec![7., 25. / 3.]]
        );
    }

    #[test]
    fn test_l2_normalize_rows() {
        let device = Device::Cpu;
        let t = Tensor::new(&[[3f32, 4.], [0., 2.]], &device).unwrap();

        let n = l2_normalize(&t).unwrap().to_vec2::<f32>().unwrap();

        assert!((n[0][0] - 0.6).abs() < 1e-6);
        assert!((n[0][1] - 0.8).abs() < 1e-6);
        assert!((n[1][1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_lazy_embedder_defers_loading() {
        let embedder = LazyEmbedder::new(EmbeddingConfig::default());

        assert!(!embedder.is_loaded());
        assert_eq!(embedder.dimension(), 384);
        assert!(embedder.embed_batch(&[]).unwrap().is_empty());
        assert!(!embedder.is_loaded());
    }

    #[test]
    #[ignore = "downloads the embedding model from the Hugging Face Hub"]
    fn test_sentence_embeddings() -> Result<()> {
        let embedder = LazyEmbedder::new(EmbeddingConfig::default());
        let vectors = embedder.embed_batch(&["Rust is cool.", "शंखनादः मूर्खः भृत्यः आसीत्।"])?;

        assert!(embedder.is_loaded());
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|v| v.len() == 384));
        Ok(())
    }
}
