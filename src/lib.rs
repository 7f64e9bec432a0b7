//! Honya - web novel aggregation service.
//!
//! This library provides:
//! - Providers for Japanese web novel platforms (Syosetu, Kakuyomu, Pixiv)
//!   behind one shared, cookie-aware network context
//! - Storage contracts for book metadata and episodes, with an in-memory store
//!   and a read-through ingestion path
//! - The read-only aggregation service and its HTTP routes

pub mod api;
pub mod config;
mod cookies;
pub mod error;
pub mod ingest;
pub mod models;
pub mod network;
pub mod providers;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use error::{ConfigError, ErrorKind, NetworkError, ProviderError, ServiceError, StoreError};
pub use ingest::{Ingestor, ReadThroughEpisodes, ReadThroughMetadata};
pub use models::{BookEpisode, BookListItem, BookMetadata, ListOption, ListSort, TocItem};
pub use network::Network;
pub use providers::{Provider, ProviderRegistry, RankOptions};
pub use service::NovelService;
pub use store::{EpisodeStore, MemoryEpisodeStore, MemoryMetadataStore, MetadataStore};
