//! Prompt construction and citation extraction.
//!
//! The prompt is a fixed template: instructions that restrict the model to
//! the supplied context, a context block with one line per fused chunk in
//! rank order (`[filename] snippet`), and the question. Building is
//! deterministic for a given `(query, evidence)` pair.

use crate::models::{Citation, FusedChunk};

pub const DEFAULT_SNIPPET_CHARS: usize = 400;
pub const DEFAULT_CITATION_SNIPPET_CHARS: usize = 200;

/// First `max_chars` characters of `text` with line breaks flattened to
/// spaces. Never splits a multi-byte character.
pub fn snippet(text: &str, max_chars: usize) -> String {
    text.chars()
        .take(max_chars)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

/// One `[filename] snippet` line per chunk, in the given order.
pub fn build_context(evidence: &[FusedChunk], snippet_chars: usize) -> String {
    evidence
        .iter()
        .map(|f| format!("[{}] {}", f.chunk.filename, snippet(&f.chunk.text, snippet_chars)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_prompt(query: &str, evidence: &[FusedChunk], snippet_chars: usize) -> String {
    format!(
        "You are a helpful assistant. Use ONLY the context below to answer the question.\n\
         If the context does not contain the answer, reply exactly \"I don't know.\"\n\
         Cite the [filename] of every context entry you rely on.\n\
         \n\
         Context:\n\
         {}\n\
         \n\
         Question: {}\n\
         Answer:",
        build_context(evidence, snippet_chars),
        query.trim()
    )
}

/// Citations for an accepted answer, one per evidence chunk in rank order.
pub fn citations(evidence: &[FusedChunk], snippet_chars: usize) -> Vec<Citation> {
    evidence
        .iter()
        .map(|f| Citation {
            filename: f.chunk.filename.clone(),
            url: f.chunk.source_url.clone(),
            snippet: f.chunk.text.chars().take(snippet_chars).collect(),
        })
        .collect()
}
