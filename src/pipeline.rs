//! # Pipeline
//!
//! [`RagPipeline`] wires the loader, the embedding index, the answer strategies and the
//! performance log together, and owns the lifecycle of a single query:
//!
//! 1. start a timer,
//! 2. retrieve the `k` nearest chunks,
//! 3. synthesize an answer (generative or templated),
//! 4. record the outcome in the performance log,
//! 5. return a [`QueryResponse`].
//!
//! A failure in step 2 or 3 is logged as an unsuccessful query with zero documents and
//! returned as the error variant of the response. Nothing escapes [`RagPipeline::query`].
//!
//! ```no_run
//! use sanskrit_rag::config::RagConfig;
//! use sanskrit_rag::pipeline::RagPipeline;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut pipeline = RagPipeline::from_config(RagConfig::default())?;
//! let response = pipeline.query("मूर्खभृत्यस्य कथा किम्?", 3, false);
//! println!("{}", serde_json::to_string_pretty(&response)?);
//! # Ok(()) }
//! ```

use serde::Serialize;
use std::{sync::Arc, time::Instant};
use tracing::{debug, error, info, warn};

use crate::config::RagConfig;
use crate::embedding::{Embedder, LazyEmbedder};
use crate::error::Result;
use crate::generator::{Generator, build_generator};
use crate::index::{EmbeddingIndex, RetrievedDoc};
use crate::loader::{DocumentLoader, chunk_documents};
use crate::performance::{PerformanceLog, PerformanceStats};
use crate::synthesizer::{generative_answer, templated_answer};

/// The envelope returned for every query.
///
/// Serializes to `{query, retrieved_docs, answer, num_docs_retrieved, latency}` on success
/// and `{query, error, latency}` on failure.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub query: String,
    #[serde(flatten)]
    pub outcome: QueryOutcome,
    /// Wall-clock seconds spent on the query.
    pub latency: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    Answered {
        retrieved_docs: Vec<RetrievedDoc>,
        answer: String,
        num_docs_retrieved: usize,
    },
    Failed {
        error: String,
    },
}

impl QueryResponse {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, QueryOutcome::Answered { .. })
    }

    pub fn answer(&self) -> Option<&str> {
        match &self.outcome {
            QueryOutcome::Answered { answer, .. } => Some(answer),
            QueryOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            QueryOutcome::Failed { error } => Some(error),
            QueryOutcome::Answered { .. } => None,
        }
    }

    /// Retrieved chunks, empty on failure.
    pub fn retrieved_docs(&self) -> &[RetrievedDoc] {
        match &self.outcome {
            QueryOutcome::Answered { retrieved_docs, .. } => retrieved_docs,
            QueryOutcome::Failed { .. } => &[],
        }
    }
}

/// The assembled retrieval pipeline.
pub struct RagPipeline {
    config: RagConfig,
    index: EmbeddingIndex,
    generator: Arc<dyn Generator>,
    log: PerformanceLog,
    num_documents: usize,
}

impl RagPipeline {
    /// Load and chunk the corpus, build the index and open the performance log.
    ///
    /// An empty or missing corpus is not an error; the index is simply empty.
    ///
    /// # Errors
    /// Embedding or index failures while building.
    pub fn new(
        config: RagConfig,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let loader = DocumentLoader::new(config.data_dir.clone());
        let documents = loader.load_documents();
        if documents.is_empty() {
            warn!(
                "No documents found, add .txt files to {}",
                loader.data_dir().display()
            );
        }

        let chunks = chunk_documents(&documents, config.chunk_size);
        let mut index = EmbeddingIndex::new(embedder, config.embedding.batch_size);
        index.build(chunks, config.cache_path())?;

        let log = PerformanceLog::open(config.log_file.clone());

        info!(
            "RAG pipeline ready: {} documents, {} chunks",
            documents.len(),
            index.len()
        );

        Ok(Self {
            config,
            index,
            generator,
            log,
            num_documents: documents.len(),
        })
    }

    /// Build a pipeline with the production embedder and the configured generator.
    ///
    /// Neither model is loaded until it is first needed.
    pub fn from_config(config: RagConfig) -> Result<Self> {
        let embedder = Arc::new(LazyEmbedder::new(config.embedding.clone()));
        let generator = build_generator(&config.generator)?;
        Self::new(config, embedder, generator)
    }

    /// Answer `question` from the `k` nearest chunks.
    ///
    /// `use_llm` selects the generative strategy; otherwise the templated one is used.
    pub fn query(&mut self, question: &str, k: usize, use_llm: bool) -> QueryResponse {
        info!("Query: {}", question);
        let start = Instant::now();
        let result = self.retrieve_and_answer(question, k, use_llm);
        let elapsed = start.elapsed();

        let outcome = match result {
            Ok((retrieved_docs, answer)) => {
                self.log
                    .record(question, elapsed, retrieved_docs.len(), true);
                info!("Answered in {:.2}s", elapsed.as_secs_f64());
                QueryOutcome::Answered {
                    num_docs_retrieved: retrieved_docs.len(),
                    retrieved_docs,
                    answer,
                }
            }
            Err(e) => {
                self.log.record(question, elapsed, 0, false);
                error!("Error processing query: {}", e);
                QueryOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        QueryResponse {
            query: question.to_string(),
            outcome,
            latency: elapsed.as_secs_f64(),
        }
    }

    fn retrieve_and_answer(
        &self,
        question: &str,
        k: usize,
        use_llm: bool,
    ) -> Result<(Vec<RetrievedDoc>, String)> {
        let docs = self.index.search(question, k)?;
        for (i, doc) in docs.iter().enumerate() {
            debug!(
                "{}. {} (score: {:.3})",
                i + 1,
                doc.metadata.title,
                doc.similarity_score
            );
        }

        let answer = if use_llm {
            generative_answer(
                self.generator.as_ref(),
                question,
                &docs,
                &self.config.generation,
            )?
        } else {
            templated_answer(question, &docs)
        };

        Ok((docs, answer))
    }

    pub fn statistics(&self) -> PerformanceStats {
        self.log.statistics()
    }

    pub fn performance_log(&self) -> &PerformanceLog {
        &self.log
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Number of documents loaded at start-up.
    pub fn num_documents(&self) -> usize {
        self.num_documents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesizer::NOT_FOUND;
    use crate::testing::{FailingEmbedder, FailingGenerator, HashEmbedder, ScriptedGenerator};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const DIM: usize = 128;

    fn test_config(root: &Path) -> RagConfig {
        RagConfig {
            data_dir: root.join("data"),
            cache_path: root.join("models").join("embeddings.bin"),
            log_file: root.join("logs").join("performance_log.json"),
            ..RagConfig::default()
        }
    }

    fn corpus() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(
            data.join("murkha.txt"),
            "मूर्खभृत्यस्य कथा\n\nशंखनादः मूर्खः भृत्यः आसीत्।",
        )
        .unwrap();
        fs::write(
            data.join("kalidasa.txt"),
            "कालीदासस्य चातुर्यम्\n\nराजा भोजः कविः आसीत्।",
        )
        .unwrap();
        dir
    }

    fn pipeline(dir: &TempDir, generator: Arc<dyn Generator>) -> RagPipeline {
        RagPipeline::new(
            test_config(dir.path()),
            Arc::new(HashEmbedder::new(DIM)),
            generator,
        )
        .unwrap()
    }

    #[test]
    fn test_templated_query() {
        let dir = corpus();
        let mut rag = pipeline(&dir, Arc::new(FailingGenerator));
        assert_eq!(rag.num_documents(), 2);
        assert_eq!(rag.index().len(), 2);

        let response = rag.query("शंखनादः मूर्खः भृत्यः आसीत्।", 1, false);

        assert!(response.is_success());
        assert_eq!(response.retrieved_docs().len(), 1);
        assert_eq!(response.retrieved_docs()[0].metadata.title, "मूर्खभृत्यस्य कथा");
        assert!(response.answer().unwrap().contains("【मूर्खभृत्यस्य कथा】"));
        assert!(response.latency >= 0.0);
    }

    #[test]
    fn test_generative_query() {
        let dir = corpus();
        let generator = Arc::new(ScriptedGenerator::new("भोजः"));
        let mut rag = pipeline(&dir, generator.clone());

        let response = rag.query("कविः कः?", 2, true);

        assert_eq!(response.answer(), Some("भोजः"));
        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("Context: "));
        assert!(prompts[0].contains("Question: कविः कः?"));
    }

    #[test]
    fn test_generator_failure_becomes_error_envelope() {
        let dir = corpus();
        let mut rag = pipeline(&dir, Arc::new(FailingGenerator));

        let response = rag.query("q", 2, true);

        assert!(!response.is_success());
        assert!(response.error().unwrap().contains("out of memory"));
        let entry = &rag.performance_log().entries()[0];
        assert!(!entry.success);
        assert_eq!(entry.num_docs_retrieved, 0);
        assert!(response.latency >= 0.0);
        assert!(entry.latency_seconds >= 0.0);
        assert!((entry.latency_seconds - response.latency).abs() <= 0.0005 + 1e-9);
        assert_eq!(serde_json::to_value(&response).unwrap()["latency"], response.latency);
    }

    #[test]
    fn test_retrieval_failure_becomes_error_envelope() {
        let dir = corpus();
        let mut rag = RagPipeline::new(
            test_config(dir.path()),
            Arc::new(HashEmbedder::failing_queries(DIM)),
            Arc::new(ScriptedGenerator::new("x")),
        )
        .unwrap();

        let response = rag.query("q", 2, false);

        assert!(response.error().unwrap().contains("query encoder crashed"));
        assert!(response.retrieved_docs().is_empty());
        let stats = rag.statistics();
        assert_eq!(stats.total_queries, 1);
        assert_eq!(stats.successful_queries, 0);
    }

    #[test]
    fn test_build_failure_is_returned() {
        let dir = corpus();
        let result = RagPipeline::new(
            test_config(dir.path()),
            Arc::new(FailingEmbedder),
            Arc::new(FailingGenerator),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_corpus_returns_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let mut rag = pipeline(&dir, Arc::new(FailingGenerator));

        assert_eq!(rag.num_documents(), 0);
        assert!(rag.index().is_built());

        let response = rag.query("मूर्खभृत्यस्य कथा किम्?", 3, false);
        assert!(response.retrieved_docs().is_empty());
        assert_eq!(response.answer(), Some(NOT_FOUND));
    }

    #[test]
    fn test_every_query_is_logged_once() {
        let dir = corpus();
        let mut rag = pipeline(&dir, Arc::new(FailingGenerator));

        rag.query("a", 2, false);
        rag.query("b", 2, true);
        rag.query("c", 1, false);

        let stats = rag.statistics();
        assert_eq!(stats.total_queries, 3);
        assert_eq!(stats.successful_queries, 2);
        assert!((stats.success_rate - 200.0 / 3.0).abs() < 1e-9);

        let on_disk = PerformanceLog::open(&rag.config().log_file);
        assert_eq!(on_disk.entries().len(), 3);
    }

    #[test]
    fn test_response_json_shape() {
        let dir = corpus();
        let mut rag = pipeline(&dir, Arc::new(FailingGenerator));

        let ok = serde_json::to_value(rag.query("कविः", 1, false)).unwrap();
        let mut keys: Vec<_> = ok.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            ["answer", "latency", "num_docs_retrieved", "query", "retrieved_docs"]
        );
        let doc = &ok["retrieved_docs"][0];
        for key in ["content", "metadata", "similarity_score", "distance"] {
            assert!(doc.get(key).is_some(), "missing {key}");
        }
        assert!(doc["metadata"].get("chunk_id").is_some());

        let failed = serde_json::to_value(rag.query("कविः", 1, true)).unwrap();
        let mut keys: Vec<_> = failed.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, ["error", "latency", "query"]);
    }

    #[test]
    fn test_rebuild_uses_cache() {
        let dir = corpus();
        pipeline(&dir, Arc::new(FailingGenerator));
        assert!(dir.path().join("models").join("embeddings.bin").exists());

        let embedder = Arc::new(HashEmbedder::new(DIM));
        let rag = RagPipeline::new(
            test_config(dir.path()),
            embedder.clone(),
            Arc::new(FailingGenerator),
        )
        .unwrap();

        assert_eq!(rag.index().len(), 2);
        assert!(embedder.batch_sizes().is_empty());
    }
}
