//! Main module for the Sanskrit RAG CLI application (srag).
//!
//! This module parses the command line, initializes logging, resolves the configuration,
//! and dispatches to the selected subcommand.
//!
//! # Examples
//!
//! Writing a default configuration:
//!
//! ```sh
//! srag init
//! ```
//!
//! Asking a question with the templated answer, then with the language model:
//!
//! ```sh
//! srag ask "मूर्खभृत्यस्य कथा किम्?"
//! srag ask "कालीदासस्य चातुर्यं वर्णयतु" -k 5 --llm
//! ```

use clap::Parser;
use once_cell::sync::OnceCell;
use std::{error::Error, io, path::Path};
use tracing::{Level, debug, info};

use sanskrit_rag::commands::{self, Cli, Commands};
use sanskrit_rag::config::{self, RagConfig};
use sanskrit_rag::display::{print_header, print_response, print_statistics};
use sanskrit_rag::performance::PerformanceLog;
use sanskrit_rag::pipeline::RagPipeline;

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    TRACING.get_or_init(|| {
        let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(io::stderr)
            .init();
    });

    run(cli)
}

/// Resolve the configuration and execute the parsed subcommand.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, the pipeline cannot be built,
/// or terminal output fails.
fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config_path = cli.config.as_deref();
    let load = || -> Result<RagConfig, Box<dyn Error>> {
        let rag_config = config::resolve_config(config_path)?;
        debug!("Config loaded: {:?}", rag_config);
        Ok(rag_config)
    };

    let mut stdout = io::stdout();

    match cli.command {
        Commands::Init { force } => init(config_path, force)?,
        Commands::Index => {
            let rag_config = load()?;
            let pipeline = RagPipeline::from_config(rag_config)?;
            print_header(&mut stdout, "Index ready")?;
            println!("Documents: {}", pipeline.num_documents());
            println!("Chunks:    {}", pipeline.index().len());
            if let Some(cache) = pipeline.config().cache_path() {
                println!("Cache:     {}", cache.display());
            }
        }
        Commands::Ask {
            question,
            k,
            llm,
            json,
        } => {
            let rag_config = load()?;
            let k = k.unwrap_or(rag_config.top_k);
            let mut pipeline = RagPipeline::from_config(rag_config)?;
            let response = pipeline.query(&question, k, llm);
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_header(&mut stdout, &format!("Query: {question}"))?;
                print_response(&mut stdout, &response)?;
            }
        }
        Commands::Interactive { k, llm } => {
            let rag_config = load()?;
            let k = k.unwrap_or(rag_config.top_k);
            let mut pipeline = RagPipeline::from_config(rag_config)?;
            print_header(&mut stdout, "Interactive Mode")?;
            commands::run_interactive(&mut pipeline, io::stdin().lock(), &mut stdout, k, llm)?;
        }
        Commands::Stats => {
            let rag_config = load()?;
            let log = PerformanceLog::open(rag_config.log_file.clone());
            info!("Reading {}", log.path().display());
            print_statistics(&mut stdout, &log.statistics())?;
        }
    }

    Ok(())
}

/// Write the default configuration, to `explicit` or the platform config dir.
///
/// An existing file is left alone unless `force` is set.
fn init(explicit: Option<&Path>, force: bool) -> Result<(), Box<dyn Error>> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => config::config_dir()?.join("config.yaml"),
    };

    if path.exists() && !force {
        info!(
            "Config already exists at {}, use --force to overwrite",
            path.display()
        );
        return Ok(());
    }

    info!("Creating config file: {}", path.display());
    config::write_config(&RagConfig::default(), &path)?;
    Ok(())
}
