//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the [`RagConfig`] struct, which holds the configuration parameters,
//! and a [`load_config`] function to load the configuration from a YAML file.
//! Every field has a default, so a partial file (or no file at all) is valid.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use sanskrit_rag::config::{RagConfig, load_config};
//!
//! let config: RagConfig = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config);
//! ```

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
};

use tracing::*;

/// Represents the application's configuration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct RagConfig {
    /// Directory holding the `.txt` corpus.
    pub data_dir: PathBuf,

    /// Upper bound of a chunk, in characters.
    pub chunk_size: usize,

    /// Number of chunks retrieved when the caller does not say otherwise.
    pub top_k: usize,

    /// Whether embeddings are cached on disk between runs.
    pub use_cache: bool,

    /// Location of the embedding cache.
    pub cache_path: PathBuf,

    /// Location of the JSON performance log.
    pub log_file: PathBuf,

    pub embedding: EmbeddingConfig,

    pub generator: GeneratorConfig,

    pub generation: GenerationParams,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            chunk_size: 500,
            top_k: 3,
            use_cache: true,
            cache_path: PathBuf::from("models/embeddings.bin"),
            log_file: PathBuf::from("logs/performance_log.json"),
            embedding: EmbeddingConfig::default(),
            generator: GeneratorConfig::default(),
            generation: GenerationParams::default(),
        }
    }
}

impl RagConfig {
    /// The embedding cache path, or `None` when caching is disabled.
    pub fn cache_path(&self) -> Option<&Path> {
        self.use_cache.then_some(self.cache_path.as_path())
    }
}

/// Sentence-embedding model settings.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Hugging Face model id of a BERT-family sentence-transformer.
    pub model: String,

    pub revision: String,

    /// Width of the produced vectors (384 for the MiniLM family).
    pub dimension: usize,

    /// Number of chunks embedded per forward pass.
    pub batch_size: usize,

    /// L2-normalize the pooled vectors.
    pub normalize: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2".to_string(),
            revision: "main".to_string(),
            dimension: 384,
            batch_size: 16,
            normalize: false,
        }
    }
}

/// Which generation backend answers `use_llm` queries.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorBackend {
    /// A sequence-to-sequence model run on the CPU with candle.
    #[default]
    Local,
    /// Any OpenAI-compatible chat completions endpoint.
    OpenAi,
}

/// Generation model settings.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct GeneratorConfig {
    pub backend: GeneratorBackend,

    /// Hugging Face model id for `local`, model name for `openai`.
    pub model: String,

    /// Base URL of the API (only for `openai`).
    pub api_base: Option<String>,

    /// API key (only for `openai`).
    pub api_key: Option<String>,

    /// Seed for the local sampler.
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backend: GeneratorBackend::Local,
            model: "google/flan-t5-base".to_string(),
            api_base: None,
            api_key: None,
            seed: 42,
        }
    }
}

/// Sampling parameters for the generative answer strategy.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct GenerationParams {
    /// Maximum number of generated tokens.
    pub max_length: usize,

    /// Minimum number of generated tokens before end-of-sequence is allowed.
    pub min_length: usize,

    pub temperature: f64,

    /// Nucleus sampling threshold.
    pub top_p: f64,

    /// Characters of retrieved context placed in the prompt.
    pub context_budget: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_length: 512,
            min_length: 50,
            temperature: 0.7,
            top_p: 0.9,
            context_budget: 2000,
        }
    }
}

/// Return the per-platform configuration directory.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("org", "sanskrit-rag", "srag")`. The directory is **not** created here.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined.
pub fn config_dir() -> Result<PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("org", "sanskrit-rag", "srag")
        .ok_or("Unable to determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}

/// Loads the application's configuration from a YAML file.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(file: impl AsRef<Path>) -> Result<RagConfig, Box<dyn Error>> {
    let file = file.as_ref();
    debug!("Loading config: {}", file.display());
    let content = fs::read_to_string(file)?;
    let config: RagConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Resolve the configuration for a run.
///
/// An explicit path must load; otherwise `<config_dir>/config.yaml` is used when present,
/// and the defaults when not.
pub fn resolve_config(explicit: Option<&Path>) -> Result<RagConfig, Box<dyn Error>> {
    if let Some(path) = explicit {
        return load_config(path);
    }

    let default_path = config_dir()?.join("config.yaml");
    if default_path.is_file() {
        load_config(&default_path)
    } else {
        info!(
            "No config at {}, using defaults",
            default_path.display()
        );
        Ok(RagConfig::default())
    }
}

/// Write `config` as YAML to `path`, creating parent directories.
pub fn write_config(config: &RagConfig, path: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(config)?;
    fs::write(path, yaml)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_valid_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
data_dir: "corpus"
chunk_size: 300
top_k: 5
use_cache: false
embedding:
  dimension: 768
  batch_size: 8
generator:
  backend: openai
  model: "gpt-4o-mini"
  api_base: "http://localhost:5001/v1"
generation:
  temperature: 0.2
"#
        )
        .unwrap();

        let config = load_config(temp_file.path());

        assert!(config.is_ok());
        let config = config.unwrap();
        assert_eq!(config.data_dir, PathBuf::from("corpus"));
        assert_eq!(config.chunk_size, 300);
        assert_eq!(config.top_k, 5);
        assert!(config.cache_path().is_none());
        assert_eq!(config.embedding.dimension, 768);
        assert_eq!(config.embedding.batch_size, 8);
        assert_eq!(
            config.embedding.model,
            EmbeddingConfig::default().model,
            "unset nested fields keep their defaults"
        );
        assert_eq!(config.generator.backend, GeneratorBackend::OpenAi);
        assert_eq!(
            config.generator.api_base.as_deref(),
            Some("http://localhost:5001/v1")
        );
        assert_eq!(config.generation.temperature, 0.2);
        assert_eq!(config.generation.max_length, 512);
    }

    #[test]
    fn test_load_config_invalid_file() {
        let config = load_config("non/existent/path");
        assert!(config.is_err());
    }

    #[test]
    fn test_load_config_invalid_format() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: config: format"#).unwrap();

        let config = load_config(temp_file.path());
        assert!(config.is_err());
    }

    #[test]
    fn test_write_then_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let config = RagConfig::default();

        write_config(&config, &path).unwrap();
        let loaded = load_config(&path).unwrap();

        assert_eq!(loaded, config);
        assert_eq!(loaded.cache_path(), Some(Path::new("models/embeddings.bin")));
    }

    #[test]
    fn test_resolve_explicit_missing_config_fails() {
        let resolved = resolve_config(Some(Path::new("definitely/not/here.yaml")));
        assert!(resolved.is_err());
    }
}
