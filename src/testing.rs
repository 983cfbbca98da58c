//! Deterministic stand-ins for the model-backed traits, shared by unit tests.

use std::cell::RefCell;

use crate::config::GenerationParams;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::generator::Generator;

/// Bag-of-characters embedder: each char bumps bucket `c % dimension`.
///
/// Identical texts get identical vectors, and texts sharing characters land close
/// together, which is enough to exercise ranking without a model.
pub struct HashEmbedder {
    dimension: usize,
    reported_dimension: usize,
    fail_queries: bool,
    batch_sizes: RefCell<Vec<usize>>,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self::with_reported_dimension(dimension, dimension)
    }

    /// Produces `actual`-wide vectors while claiming `reported`.
    pub fn with_reported_dimension(actual: usize, reported: usize) -> Self {
        Self {
            dimension: actual,
            reported_dimension: reported,
            fail_queries: false,
            batch_sizes: RefCell::new(Vec::new()),
        }
    }

    /// Embeds chunks normally but fails every single-text query.
    pub fn failing_queries(dimension: usize) -> Self {
        Self {
            fail_queries: true,
            ..Self::new(dimension)
        }
    }

    /// Sizes of the `embed_batch` calls made so far, excluding single-text queries.
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.borrow().clone()
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        for c in text.chars() {
            vector[c as usize % self.dimension] += 1.0;
        }
        vector
    }
}

impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-embedder"
    }

    fn dimension(&self) -> usize {
        self.reported_dimension
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.batch_sizes.borrow_mut().push(texts.len());
        Ok(texts.iter().map(|text| self.vector(text)).collect())
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail_queries {
            return Err(RagError::Embedding("query encoder crashed".to_string()));
        }
        Ok(self.vector(text))
    }
}

/// An embedder whose model never loads.
pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing-embedder"
    }

    fn dimension(&self) -> usize {
        8
    }

    fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::Embedding("model unavailable".to_string()))
    }
}

/// Returns a fixed reply and remembers every prompt it was given.
pub struct ScriptedGenerator {
    reply: String,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        Ok(self.reply.clone())
    }
}

/// A generator that always errors.
pub struct FailingGenerator;

impl Generator for FailingGenerator {
    fn model_name(&self) -> &str {
        "failing"
    }

    fn generate(&self, _prompt: &str, _params: &GenerationParams) -> Result<String> {
        Err(RagError::generation("failing", "out of memory"))
    }
}
