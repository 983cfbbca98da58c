//! Terminal rendering for query results and statistics.
//!
//! Everything here writes to a generic [`Write`] so the same code prints to stdout in the
//! CLI and to a buffer in tests. Colors are emitted with `crossterm` commands.

use crossterm::{
    ExecutableCommand,
    style::{Attribute, Color, SetAttribute, SetForegroundColor},
};
use std::error::Error;
use std::io::Write;

use crate::performance::PerformanceStats;
use crate::pipeline::QueryResponse;

const RULE_WIDTH: usize = 70;

/// Characters of a title shown in the retrieved-documents list.
const TITLE_CHARS: usize = 50;

fn colored<W: Write>(out: &mut W, color: Color, bold: bool, text: &str) -> Result<(), Box<dyn Error>> {
    out.execute(SetForegroundColor(color))?;
    if bold {
        out.execute(SetAttribute(Attribute::Bold))?;
    }
    write!(out, "{text}")?;
    out.execute(SetAttribute(Attribute::Reset))?;
    out.execute(SetForegroundColor(Color::Reset))?;
    Ok(())
}

/// A bold cyan title between two rules.
pub fn print_header<W: Write>(out: &mut W, title: &str) -> Result<(), Box<dyn Error>> {
    let rule = "=".repeat(RULE_WIDTH);
    writeln!(out, "{rule}")?;
    colored(out, Color::Cyan, true, title)?;
    writeln!(out)?;
    writeln!(out, "{rule}")?;
    Ok(())
}

/// Print the retrieved titles with scores, the answer, and the latency.
pub fn print_response<W: Write>(out: &mut W, response: &QueryResponse) -> Result<(), Box<dyn Error>> {
    let rule = "-".repeat(RULE_WIDTH);

    if let Some(error) = response.error() {
        colored(out, Color::Red, true, &format!("Error: {error}"))?;
        writeln!(out)?;
        writeln!(out, "Latency: {:.2}s", response.latency)?;
        return Ok(());
    }

    let docs = response.retrieved_docs();
    writeln!(out, "Retrieved {} documents", docs.len())?;
    for (i, doc) in docs.iter().enumerate() {
        let title: String = doc.metadata.title.chars().take(TITLE_CHARS).collect();
        write!(out, "  {}. {} ", i + 1, title)?;
        colored(
            out,
            Color::DarkGrey,
            false,
            &format!("(score: {:.3})", doc.similarity_score),
        )?;
        writeln!(out)?;
    }

    writeln!(out, "{rule}")?;
    colored(out, Color::Blue, true, response.answer().unwrap_or_default())?;
    writeln!(out)?;
    writeln!(out, "{rule}")?;
    writeln!(out, "Latency: {:.2}s", response.latency)?;
    out.flush()?;
    Ok(())
}

/// Print the statistics block with a colored title.
pub fn print_statistics<W: Write>(out: &mut W, stats: &PerformanceStats) -> Result<(), Box<dyn Error>> {
    writeln!(out)?;
    let block = stats.to_string();
    let mut lines = block.lines();
    if let Some(title) = lines.next() {
        colored(out, Color::Cyan, true, title)?;
        writeln!(out)?;
    }
    for line in lines {
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}
