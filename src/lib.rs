//! Persistent memory for coding assistants — capture, retain, retrieve.
//!
//! Hindsight ingests short textual entries (decisions, issues, insights,
//! handoffs, progress notes, references, indexed commits, and persistent
//! rules), keeps them durable on the local host, and later surfaces the most
//! relevant ones for injection into a fresh assistant session.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with FTS5 for keyword search and
//!   [sqlite-vec](https://github.com/asg017/sqlite-vec) for vector search
//! - **Embeddings**: Local ONNX Runtime with all-MiniLM-L6-v2 (384 dimensions)
//! - **Retrieval**: Hybrid BM25 + vector KNN merged via Reciprocal Rank
//!   Fusion, then weighted by temporal decay, memory tier, and access count
//! - **Lifecycle**: a maintenance pass decays, demotes, promotes, archives,
//!   and consolidates entries by access-aware age windows
//! - **Capture**: an incremental transcript scanner classifies conversation
//!   text into entries without user action
//! - **Sync**: append-only per-host JSONL logs on a shared object store
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`db`] — SQLite database initialization, schema, and migrations
//! - [`embedding`] — Text-to-vector pipeline, embed cache, and template classifier
//! - [`store`] — Entry table, hybrid search, maintenance, and pattern tracking
//! - [`journal`] — Append-only markdown day files (source of record)
//! - [`scanner`] — Incremental transcript scanning and directive capture
//! - [`sync`] — Cross-host replication over a blob store
//! - [`engine`] — The facade tying store, embedder, and journal together
//! - [`hooks`] — Session lifecycle handlers (SessionStart / Stop / PreCompact)

pub mod cli;
pub mod clock;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod hooks;
pub mod journal;
pub mod scanner;
pub mod store;
pub mod sync;
