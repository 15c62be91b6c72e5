//! # pulse-search
//!
//! Hybrid content search and indexing for a social content backend:
//! an asynchronous embedding pipeline keeps a vector index converging on
//! the content store, a BM25 lexical index is updated synchronously on
//! write, and a fusion ranker combines both with recency and engagement
//! signals. A batch engine classifies content into topics and maintains
//! decayed trending scores.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────┐  ChangeNotification   ┌────────────────────┐
//!   │ ContentStore  ├──────────────────────▶│ IndexingPipeline   │
//!   │  (writes)     │                       │  lease + coalesce  │
//!   └──────┬───────┘                       │  micro-batch embed │
//!          │ sync                           │  retry / dead-letter│
//!          ▼                               └─────────┬──────────┘
//!   ┌──────────────┐                                 │ bulk upsert
//!   │ LexicalIndex  │                                 ▼
//!   │  (tantivy)    │                       ┌────────────────────┐
//!   └──────┬───────┘                       │    VectorIndex     │
//!          │                               └─────────┬──────────┘
//!          │  BM25 leg                                │ cosine leg
//!          └──────────────┬────────────────────────────┘
//!                         ▼
//!               ┌───────────────────┐        ┌────────────────────┐
//!               │ HybridSearchEngine│        │  TrendingEngine    │
//!               │  fuse + paginate  │        │  classify + decay  │
//!               └───────────────────┘        └────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration with startup validation
//! - [`models`] - Shared data types: `ContentItem`, jobs, cursors, results
//! - [`store`] - Content store and engagement traits plus in-memory impls
//! - [`embedding`] - Deterministic hashed embedder and HTTP providers
//! - [`index`] - tantivy lexical index and in-memory vector index
//! - [`pipeline`] - Leased, micro-batched embedding pipeline with retry,
//!   dead-lettering, and periodic reconciliation
//! - [`search`] - Score fusion, cursor pagination, and the hybrid engine
//! - [`trends`] - Topic classification and decayed trending windows
//! - [`api`] - Axum HTTP handlers for the content and search surface
//! - [`state`] - Shared application state and background task wiring

pub mod api;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod state;
pub mod store;
pub mod trends;
