//! # Sanskrit RAG (library root)
//!
//! Retrieval-augmented question answering over a small corpus of Sanskrit `.txt` files.
//! This crate provides the plumbing behind the `srag` CLI:
//! - Configuration (`config`) and typed errors (`error`).
//! - Document loading and paragraph-atomic chunking (`loader`).
//! - Sentence embeddings with Candle (`embedding`) and a cached nearest-neighbor index
//!   (`index`).
//! - Text generation backends (`generator`) and the two answer strategies
//!   (`synthesizer`).
//! - The query orchestrator (`pipeline`) and its performance log (`performance`).
//! - CLI parsing (`commands`) and terminal output (`display`).
//!
//! ## Data flow
//! ```text
//! data/*.txt -> loader -> chunks -> index.build (cached)
//! question   -> index.search -> ranked chunks -> synthesizer -> QueryResponse
//! ```
//!
//! ## Modules
//! - [`commands`], [`config`], [`display`], [`embedding`], [`error`], [`generator`],
//!   [`index`], [`loader`], [`performance`], [`pipeline`], [`synthesizer`]

pub mod commands;
pub mod config;
pub mod display;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod index;
pub mod loader;
pub mod performance;
pub mod pipeline;
pub mod synthesizer;

#[cfg(test)]
mod testing;

pub use error::{RagError, Result};
