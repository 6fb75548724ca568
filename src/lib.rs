//! # Answer Harness
//!
//! Guarded retrieval-augmented question answering over an indexed document
//! corpus.
//!
//! A question passes an input guardrail, is answered from chunks retrieved
//! by hybrid search (keyword + vector + expansion, fused with Reciprocal
//! Rank Fusion), and the streamed answer is accepted only if it is grounded
//! in that evidence. The algorithms live in `answer-harness-core`; this
//! crate supplies configuration, backend adapters, a CLI, and an HTTP
//! server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────────┐
//! │ CLI/HTTP │──▶│ Orchestrator │──▶│ Elasticsearch │
//! │  (ans)   │   │ guard + RRF  │   │  or memory    │
//! └──────────┘   └──────┬───────┘   └───────────────┘
//!                       │
//!             ┌─────────┴─────────┐
//!             ▼                   ▼
//!       ┌───────────┐       ┌───────────┐
//!       │ Embedding │       │  Ollama   │
//!       │ providers │       │ generate  │
//!       └───────────┘       └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ans health                         # probe store, embedder, completer
//! ans search "docker" --mode hybrid  # retrieval only
//! ans ask "Explain Docker"           # full guarded answer
//! ans serve                          # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`es_store`] | Elasticsearch document store |
//! | [`embedding`] | Embedding providers |
//! | [`completion`] | Streaming completion providers |
//! | [`services`] | Wiring config to the core engine |
//! | [`health`] | Dependency health reporting |
//! | [`ask`] | `ask` / `search` commands |
//! | [`server`] | HTTP server |

pub mod ask;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod es_store;
pub mod health;
pub mod server;
pub mod services;
