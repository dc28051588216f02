//! Incremental, encrypted full-text indexing of a mail store.
//!
//! The [`index::MailIndexer`] handle drives a historical backfill down to a
//! configurable cutoff day, applies live create/update/delete/move event
//! batches, persists per-group progress so indexing resumes where it left
//! off, and can be cancelled at any point without corrupting durable state.
//! The heavy lifting at the edges lives behind contracts: entity loading
//! ([`client::EntityClient`]), posting encryption and the batched write path
//! ([`core::IndexerCore`]), and the transactional store
//! ([`storage::DbFacade`], shipped with a SQLite backing).

pub mod client;
pub mod config;
pub mod core;
pub mod errors;
pub mod folders;
pub mod ids;
pub mod index;
pub mod storage;
pub mod tokenize;
pub mod types;

pub use client::EntityClient;
pub use config::IndexConfig;
pub use errors::{IndexError, IndexResult};
pub use index::{MailIndexer, ProgressSink};
