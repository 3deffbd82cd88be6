//! # hybrid-search
//!
//! A local-first hybrid retrieval engine with online feedback re-ranking.
//!
//! This crate is the application around [`hybrid_search_core`]: TOML
//! configuration, SQLite persistence, OpenAI-compatible embedding and answer
//! providers, a filesystem document source, the `hsx` CLI and a JSON HTTP
//! server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │ Filesystem  │──▶│  Engine (core crate)  │◀─▶│  SQLite   │
//! │   source    │   │ BM25 + dense + bias   │   │  store    │
//! └─────────────┘   └──────────┬───────────┘   └──────────┘
//!                              │
//!                  ┌───────────┴──────────┐
//!                  ▼                      ▼
//!             ┌──────────┐          ┌──────────┐
//!             │   CLI    │          │   HTTP   │
//!             │  (hsx)   │          │  (axum)  │
//!             └──────────┘          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! hsx init                                  # create database
//! hsx ingest --path ./docs                  # index a directory
//! hsx search "how does hybrid retrieval work" --explain
//! hsx feedback "how does hybrid retrieval work" guide.md positive
//! hsx serve                                 # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`embedding`] | Embedding provider selection and the OpenAI provider |
//! | [`answer`] | OpenAI-compatible answer generator |
//! | [`source_fs`] | Filesystem document source |
//! | [`app`] | Engine construction from config |
//! | [`server`] | JSON HTTP server |

pub mod answer;
pub mod app;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod ingest;
pub mod logging;
pub mod migrate;
mod openai;
pub mod search;
pub mod server;
pub mod source_fs;
pub mod sqlite_store;
pub mod stats;
