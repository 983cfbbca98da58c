//! # Performance log
//!
//! Every query outcome is appended to a JSON array on disk. The whole file is rewritten
//! after each append, so it is always a valid document a person can read or diff.
//! Persistence is best-effort: a log that cannot be read starts empty and a log that
//! cannot be written is reported through `tracing` and otherwise ignored.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, warn};

use crate::error::Result;

/// One recorded query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceEntry {
    /// Local time the query finished, ISO-8601 without offset.
    pub timestamp: String,
    pub query: String,
    /// Wall-clock seconds, rounded to milliseconds.
    pub latency_seconds: f64,
    pub num_docs_retrieved: usize,
    #[serde(default = "default_success")]
    pub success: bool,
}

fn default_success() -> bool {
    true
}

/// Aggregates over a [`PerformanceLog`].
///
/// Latency figures only consider successful queries and are zero when there are none.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub total_queries: usize,
    pub successful_queries: usize,
    pub average_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    /// Percentage of successful queries, 0 to 100.
    pub success_rate: f64,
}

impl fmt::Display for PerformanceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(50);
        writeln!(f, "Performance Statistics")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Total Queries: {}", self.total_queries)?;
        writeln!(f, "Successful Queries: {}", self.successful_queries)?;
        writeln!(f, "Average Latency: {:.2}s", self.average_latency)?;
        writeln!(f, "Min Latency: {:.2}s", self.min_latency)?;
        writeln!(f, "Max Latency: {:.2}s", self.max_latency)?;
        writeln!(f, "Success Rate: {:.1}%", self.success_rate)?;
        write!(f, "{rule}")
    }
}

/// Append-only query log backed by a JSON file.
#[derive(Debug)]
pub struct PerformanceLog {
    path: PathBuf,
    entries: Vec<PerformanceEntry>,
}

impl PerformanceLog {
    /// Load the log at `path`. A missing or unparsable file yields an empty log.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        "Ignoring unreadable performance log {}: {}",
                        path.display(),
                        e
                    );
                    Vec::new()
                }
            },
            Err(e) => {
                debug!("No performance log at {}: {}", path.display(), e);
                Vec::new()
            }
        };

        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[PerformanceEntry] {
        &self.entries
    }

    /// Append an entry and rewrite the file.
    pub fn record(
        &mut self,
        query: &str,
        latency: Duration,
        num_docs_retrieved: usize,
        success: bool,
    ) -> &PerformanceEntry {
        self.entries.push(PerformanceEntry {
            timestamp: Local::now()
                .naive_local()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
            query: query.to_string(),
            latency_seconds: round_millis(latency.as_secs_f64()),
            num_docs_retrieved,
            success,
        });

        if let Err(e) = self.save() {
            warn!(
                "Could not write performance log {}: {}",
                self.path.display(),
                e
            );
        }

        &self.entries[self.entries.len() - 1]
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn statistics(&self) -> PerformanceStats {
        if self.entries.is_empty() {
            return PerformanceStats::default();
        }

        let latencies: Vec<f64> = self
            .entries
            .iter()
            .filter(|e| e.success)
            .map(|e| e.latency_seconds)
            .collect();
        let total = self.entries.len();
        let successful = latencies.len();

        let (average, min, max) = if latencies.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                latencies.iter().sum::<f64>() / successful as f64,
                latencies.iter().copied().fold(f64::INFINITY, f64::min),
                latencies.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            )
        };

        PerformanceStats {
            total_queries: total,
            successful_queries: successful,
            average_latency: average,
            min_latency: min,
            max_latency: max,
            success_rate: successful as f64 / total as f64 * 100.0,
        }
    }
}

fn round_millis(seconds: f64) -> f64 {
    (seconds * 1000.0).round() / 1000.0
}
