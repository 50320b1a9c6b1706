//! # Post Harness
//!
//! Keeps a persistent vector index in step with a folder of documents and
//! writes short social-media posts from it with retrieval-augmented
//! generation.
//!
//! The core is the [`sync::Synchronizer`]: each pass hashes the source
//! files, loads and embeds only those that are new or changed, commits them
//! to the index, and records their fingerprints once every update landed.
//! [`generate::PostGenerator`] runs one pass as a barrier and then fans out
//! independent retrieval + generation tasks.
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │  ./sources   │──▶│ Synchronizer │──▶│ SQLite index  │
//! │  *.pdf       │   │ hash·load·   │   │ chunks+vectors│
//! └──────────────┘   │ embed        │   └──────┬────────┘
//!                    └──────┬───────┘          │
//!                           ▼                  ▼
//!                    hash_store.txt     ┌──────────────┐
//!                                       │ PostGenerator│──▶ LLM
//!                                       └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`error`] | Error types for every layer |
//! | [`models`] | Core data types |
//! | [`fingerprint`] | `hash_store.txt` and streamed file hashing |
//! | [`extract`] | PDF and plain-text extraction |
//! | [`chunk`] | Overlapping text chunking |
//! | [`loader`] | Document loader trait and file loader |
//! | [`embedding`] | Embedding providers and vector utilities |
//! | [`llm`] | Language model providers |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`index`] | Vector index |
//! | [`sync`] | Incremental synchronization |
//! | [`generate`] | Post generation |
//! | [`services`] | Service wiring |
//! | [`server`] | HTTP API |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod generate;
pub mod index;
pub mod llm;
pub mod loader;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod server;
pub mod services;
pub mod sync;
