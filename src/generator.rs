//! # Generator
//!
//! Text generation backends for the generative answer strategy.
//!
//! - [`LocalSeq2SeqGenerator`] runs a T5-family sequence-to-sequence model (by default
//!   `google/flan-t5-base`) on the CPU with Candle. The weights are fetched from the
//!   Hugging Face Hub and loaded on the first call to [`Generator::generate`].
//! - [`OpenAiGenerator`] sends the prompt to any OpenAI-compatible chat completions
//!   endpoint. It owns a small Tokio runtime so callers stay synchronous.
//!
//! Pick one from configuration with [`build_generator`].

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequestArgs,
    },
};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::t5;
use hf_hub::{Repo, RepoType, api::sync::Api};
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::config::{GenerationParams, GeneratorBackend, GeneratorConfig};
use crate::embedding::ModelResult;
use crate::error::{RagError, Result};

/// Produces text for a prompt.
pub trait Generator {
    /// Identifier of the underlying model, for logs and errors.
    fn model_name(&self) -> &str;

    /// Generate a single completion for `prompt`.
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;
}

/// Build the generator selected by `config.backend`.
pub fn build_generator(config: &GeneratorConfig) -> Result<Arc<dyn Generator>> {
    Ok(match config.backend {
        GeneratorBackend::Local => Arc::new(LocalSeq2SeqGenerator::new(&config.model, config.seed)),
        GeneratorBackend::OpenAi => Arc::new(OpenAiGenerator::new(config)?),
    })
}

/// A loaded T5 encoder-decoder with its tokenizer.
struct Seq2SeqModel {
    model: t5::T5ForConditionalGeneration,
    tokenizer: Tokenizer,
    config: t5::Config,
    device: Device,
}

impl Seq2SeqModel {
    fn load(model_id: &str) -> ModelResult<Self> {
        let device = Device::Cpu;

        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
        let api = Api::new()?;
        let api_repo = api.repo(repo);

        let config_filename = api_repo.get("config.json")?;
        let tokenizer_filename = api_repo.get("tokenizer.json")?;
        let weights_filename = api_repo.get("model.safetensors")?;

        let config = std::fs::read_to_string(config_filename)?;
        let mut config: t5::Config = serde_json::from_str(&config)?;
        config.use_cache = true;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)?;

        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DType::F32, &device)? };
        let model = t5::T5ForConditionalGeneration::load(vb, &config)?;

        Ok(Self {
            model,
            tokenizer,
            config,
            device,
        })
    }

    /// Encode the prompt once, then sample the decoder token by token.
    fn generate(&mut self, prompt: &str, params: &GenerationParams, seed: u64) -> ModelResult<String> {
        let tokens = self.tokenizer.encode(prompt, true)?;
        let input_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;

        self.model.clear_kv_cache();
        let encoder_output = self.model.encode(&input_ids)?;

        let eos = self.config.eos_token_id;
        let start = self
            .config
            .decoder_start_token_id
            .unwrap_or(self.config.pad_token_id) as u32;
        let mut sampler = LogitsProcessor::new(seed, Some(params.temperature), Some(params.top_p));
        let mut output_ids = vec![start];

        while output_ids.len() <= params.max_length {
            let decoder_input = if output_ids.len() == 1 {
                Tensor::new(output_ids.as_slice(), &self.device)?.unsqueeze(0)?
            } else {
                let last = output_ids[output_ids.len() - 1];
                Tensor::new(&[last], &self.device)?.unsqueeze(0)?
            };

            let logits = self
                .model
                .decode(&decoder_input, &encoder_output)?
                .squeeze(0)?;
            let logits = if output_ids.len() - 1 < params.min_length {
                suppress_token(&logits, eos)?
            } else {
                logits
            };

            let next = sampler.sample(&logits)?;
            if next as usize == eos {
                break;
            }
            output_ids.push(next);
        }
        self.model.clear_kv_cache();

        debug!("Generated {} tokens", output_ids.len() - 1);
        Ok(self.tokenizer.decode(&output_ids[1..], true)?)
    }
}

/// Make `token` impossible to sample.
fn suppress_token(logits: &Tensor, token: usize) -> candle_core::Result<Tensor> {
    let mut values = logits.to_vec1::<f32>()?;
    if let Some(value) = values.get_mut(token) {
        *value = f32::NEG_INFINITY;
    }
    Tensor::new(values.as_slice(), logits.device())
}

/// A T5-family model run locally, loaded on first use.
pub struct LocalSeq2SeqGenerator {
    model_id: String,
    seed: u64,
    // The decoder's KV cache is mutated while sampling.
    model: OnceCell<Mutex<Seq2SeqModel>>,
}

impl LocalSeq2SeqGenerator {
    pub fn new(model_id: impl Into<String>, seed: u64) -> Self {
        Self {
            model_id: model_id.into(),
            seed,
            model: OnceCell::new(),
        }
    }

    /// Whether the weights have been loaded yet.
    pub fn is_loaded(&self) -> bool {
        self.model.get().is_some()
    }

    fn model(&self) -> Result<&Mutex<Seq2SeqModel>> {
        self.model.get_or_try_init(|| {
            info!("Loading generation model {} (this may take a while)", self.model_id);
            let model = Seq2SeqModel::load(&self.model_id)
                .map_err(|e| RagError::generation(&self.model_id, format!("loading: {e}")))?;
            info!("Generation model loaded");
            Ok(Mutex::new(model))
        })
    }
}

impl Generator for LocalSeq2SeqGenerator {
    fn model_name(&self) -> &str {
        &self.model_id
    }

    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let mut model = self
            .model()?
            .lock()
            .map_err(|_| RagError::generation(&self.model_id, "model lock poisoned"))?;
        model
            .generate(prompt, params, self.seed)
            .map_err(|e| RagError::generation(&self.model_id, e))
    }
}

/// An OpenAI-compatible chat completions backend.
///
/// The prompt is sent as one user message. `min_length` has no API equivalent and is
/// not sent.
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    runtime: tokio::runtime::Runtime,
}

impl OpenAiGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let mut openai_config = OpenAIConfig::new();
        if let Some(api_key) = &config.api_key {
            openai_config = openai_config.with_api_key(api_key.clone());
        }
        if let Some(api_base) = &config.api_base {
            openai_config = openai_config.with_api_base(api_base.clone());
        }
        debug!("Client created with config: {:?}", openai_config);

        Ok(Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            runtime: tokio::runtime::Runtime::new()?,
        })
    }
}

impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    #[allow(deprecated)]
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let message = ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
            content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
            name: None,
        });

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(vec![message])
            .temperature(params.temperature as f32)
            .top_p(params.top_p as f32)
            .max_tokens(params.max_length as u32)
            .build()
            .map_err(|e| RagError::generation(&self.model, e))?;

        debug!("Sending request: {:?}", request);

        let response = self
            .runtime
            .block_on(self.client.chat().create(request))
            .map_err(|e| RagError::generation(&self.model, e))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RagError::generation(&self.model, "no completion returned"))
    }
}
