//! Turning retrieved chunks into an answer.
//!
//! Two strategies, chosen per query:
//! - [`generative_answer`] packs the chunks into a prompt and asks a [`Generator`].
//! - [`templated_answer`] quotes the head of each chunk under its document title.

use tracing::debug;

use crate::config::GenerationParams;
use crate::error::Result;
use crate::generator::Generator;
use crate::index::RetrievedDoc;

/// Reply used when retrieval found nothing.
pub const NOT_FOUND: &str = "क्षम्यताम्, प्रश्नस्य उत्तरं दस्तावेजेषु न प्राप्तम्।";

const ANSWER_HEADER: &str = "प्रश्नस्य आधारेण उत्तरम्:";

/// Characters of each chunk quoted by the templated answer.
const EXCERPT_CHARS: usize = 300;

/// Join chunk contents with blank lines, keeping at most `budget` characters.
///
/// A truncated context ends in `...`.
pub fn build_context(docs: &[RetrievedDoc], budget: usize) -> String {
    let context = docs
        .iter()
        .map(|doc| doc.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    match context.char_indices().nth(budget) {
        Some((cut, _)) => format!("{}...", &context[..cut]),
        None => context,
    }
}

/// The prompt sent to the generator.
pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "Context: {context}\n\nQuestion: {query}\n\nBased on the context above, provide a detailed answer in Sanskrit:"
    )
}

/// Ask `generator` to answer `query` from `docs`.
pub fn generative_answer(
    generator: &dyn Generator,
    query: &str,
    docs: &[RetrievedDoc],
    params: &GenerationParams,
) -> Result<String> {
    let context = build_context(docs, params.context_budget);
    let prompt = build_prompt(query, &context);
    debug!(
        "Prompting {} with {} chars of context",
        generator.model_name(),
        context.chars().count()
    );
    generator.generate(&prompt, params)
}

/// Quote each retrieved chunk under its title, without any model.
pub fn templated_answer(_query: &str, docs: &[RetrievedDoc]) -> String {
    if docs.is_empty() {
        return NOT_FOUND.to_string();
    }

    let excerpts = docs
        .iter()
        .map(|doc| {
            let excerpt: String = doc.content.chars().take(EXCERPT_CHARS).collect();
            format!("【{}】\n{}", doc.metadata.title, excerpt)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!("{ANSWER_HEADER}\n\n{excerpts}")
}
