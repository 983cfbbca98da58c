//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a [`Cli`] struct that represents the parsed command-line arguments,
//! a [`Commands`] enum with the available subcommands, and [`run_interactive`], the
//! read-answer loop behind `srag interactive`.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use sanskrit_rag::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! if let Commands::Ask { question, .. } = cli.command {
//!     println!("asking {question}");
//! }
//! ```

use clap::{Parser, Subcommand};
use std::error::Error;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use crate::display::{print_response, print_statistics};
use crate::pipeline::RagPipeline;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Path to a YAML config file. Defaults to `config.yaml` in the platform config dir.
    #[arg(long, global = true, env = "SANSKRIT_RAG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug, PartialEq)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(long)]
        force: bool,
    },

    /// Load and chunk the corpus, then build (or load) the embedding index.
    Index,

    /// Answer a single question.
    #[clap(name = "ask", alias = "a")]
    Ask {
        question: String,

        /// Number of chunks to retrieve. Defaults to `top_k` from the config.
        #[arg(short = 'k', long)]
        k: Option<usize>,

        /// Generate the answer with the language model instead of the template.
        #[arg(long)]
        llm: bool,

        /// Print the response envelope as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ask questions read from stdin until `quit`, `exit` or `q`.
    #[clap(name = "interactive", alias = "i")]
    Interactive {
        #[arg(short = 'k', long)]
        k: Option<usize>,

        #[arg(long)]
        llm: bool,
    },

    /// Print statistics from the performance log.
    Stats,
}

/// Whether an input line ends the interactive session.
pub fn is_exit_command(line: &str) -> bool {
    matches!(line.to_lowercase().as_str(), "quit" | "exit" | "q")
}

/// Read questions line by line from `input` and answer each one on `out`.
///
/// Blank lines are skipped. The session ends on an exit command or end of input, and the
/// performance statistics are printed before returning.
pub fn run_interactive<R: BufRead, W: Write>(
    pipeline: &mut RagPipeline,
    input: R,
    out: &mut W,
    k: usize,
    use_llm: bool,
) -> Result<(), Box<dyn Error>> {
    writeln!(out, "Type your questions (or 'quit' to exit)")?;
    write!(out, "> ")?;
    out.flush()?;

    for line in input.lines() {
        let line = line?;
        let question = line.trim();

        if is_exit_command(question) {
            break;
        }
        if !question.is_empty() {
            let response = pipeline.query(question, k, use_llm);
            print_response(out, &response)?;
        }

        write!(out, "> ")?;
        out.flush()?;
    }

    writeln!(out)?;
    print_statistics(out, &pipeline.statistics())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RagConfig;
    use crate::testing::{FailingGenerator, HashEmbedder};
    use std::fs;
    use std::sync::Arc;

    #[test]
    fn test_parse_ask() {
        let cli = Cli::try_parse_from(["srag", "ask", "कः?", "-k", "5", "--llm"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Ask {
                question: "कः?".to_string(),
                k: Some(5),
                llm: true,
                json: false,
            }
        );
    }

    #[test]
    fn test_parse_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["srag", "stats", "--config", "my.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("my.yaml")));
        assert_eq!(cli.command, Commands::Stats);
    }

    #[test]
    fn test_parse_aliases() {
        let cli = Cli::try_parse_from(["srag", "i", "--llm"]).unwrap();
        assert_eq!(cli.command, Commands::Interactive { k: None, llm: true });

        let cli = Cli::try_parse_from(["srag", "a", "q", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Ask { json: true, .. }));
    }

    #[test]
    fn test_ask_requires_question() {
        assert!(Cli::try_parse_from(["srag", "ask"]).is_err());
    }

    #[test]
    fn test_exit_commands() {
        for word in ["quit", "exit", "q", "QUIT", "Exit"] {
            assert!(is_exit_command(word));
        }
        assert!(!is_exit_command("question"));
        assert!(!is_exit_command(""));
    }

    #[test]
    fn test_interactive_session() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("ghata.txt"), "घटः\n\nघटः भग्नः अभवत्।").unwrap();

        let config = RagConfig {
            data_dir: data,
            use_cache: false,
            log_file: dir.path().join("log.json"),
            ..RagConfig::default()
        };
        let mut pipeline = RagPipeline::new(
            config,
            Arc::new(HashEmbedder::new(64)),
            Arc::new(FailingGenerator),
        )
        .unwrap();

        let input = "घटः किम्?\n\n   \nquit\nnever asked\n".as_bytes();
        let mut out = Vec::new();
        run_interactive(&mut pipeline, input, &mut out, 3, false).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("【घटः】"));
        assert!(text.contains("Total Queries: 1"));
        assert_eq!(pipeline.performance_log().entries().len(), 1);
    }
}
