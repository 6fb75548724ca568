//! # Answer Harness Core
//!
//! Retrieval-augmented answering logic for Answer Harness: chunk models,
//! the document store / embedding / completion service traits, reciprocal
//! rank fusion, the guardrail filter, prompt construction, and the
//! generation orchestrator that sequences them.
//!
//! This crate performs no network or filesystem I/O of its own. Concrete
//! adapters (Elasticsearch, OpenAI, Ollama) live in the `answer-harness`
//! application crate and are handed to the engine as trait objects.
//!
//! ```text
//! question ─▶ Guardrails(input) ─▶ RetrievalEngine ─▶ DocumentStore
//!                                        │ RRF
//!                                        ▼
//!                 prompt ─▶ Completer (stream) ─▶ Guardrails(output) ─▶ Answer
//! ```

pub mod completion;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod guardrail;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod store;
