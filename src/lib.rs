//! # cache-chat
//!
//! Prime a hosted language model with a cached reference document and chat
//! against it.
//!
//! The ingestion pipeline loads the document, uploads it to the provider's
//! file API, waits for the provider to finish processing it, and creates a
//! context cache bundling the file with a fixed system instruction. Chat
//! turns are then answered by single-turn generation calls bound to that
//! cache.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐
//! │  Source  │──▶│  Upload  │──▶│   Poll   │──▶│ Cache build  │
//! │ path/URL │   │ file API │   │ PROCESS… │   │ cachedContent│
//! └──────────┘   └──────────┘   └──────────┘   └──────┬───────┘
//!                                                      │ handle
//!                      ┌───────────────────────────────┤
//!                      ▼                               ▼
//!                 ┌──────────┐                   ┌──────────┐
//!                 │   CLI    │                   │   HTTP   │
//!                 │ (cchat)  │                   │ /api/... │
//!                 └──────────┘                   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GEMINI_API_KEY=...
//! export PDF_URL=https://example.com/guide.pdf
//! cchat ingest                  # upload + cache, print the handle
//! cchat ask "How is staking taxed?"
//! cchat serve                   # start the HTTP server
//! cchat chat --remote http://127.0.0.1:3000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment configuration |
//! | [`models`] | Pipeline values and provider wire types |
//! | [`error`] | Typed error taxonomy |
//! | [`source`] | Document source loader |
//! | [`provider`] | Provider trait and Gemini REST client |
//! | [`poll`] | Processing-state poller |
//! | [`cache`] | Context cache builder |
//! | [`ingest`] | Ingestion pipeline |
//! | [`generate`] | Cache-bound generation client |
//! | [`session`] | Chat session controller |
//! | [`progress`] | Ingestion progress reporting |
//! | [`server`] | HTTP server |

pub mod cache;
pub mod config;
pub mod error;
pub mod generate;
pub mod ingest;
pub mod models;
pub mod poll;
pub mod progress;
pub mod provider;
pub mod server;
pub mod session;
pub mod source;
