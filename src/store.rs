//! Repository boundary.
//!
//! [`MetadataStore`] and [`EpisodeStore`] are the read/write contracts the
//! aggregation service depends on. Any persistence engine can sit behind them;
//! this module ships an in-memory implementation used by the binary and tests.

use crate::error::StoreError;
use crate::models::{BookEpisode, BookListItem, BookMetadata, ListOption, ListSort};
use crate::providers::{ProviderRegistry, RankOptions};
use async_trait::async_trait;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Book metadata repository.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// One page of metadata rows, ordered by `option.sort`.
    async fn list(
        &self,
        page: usize,
        page_size: usize,
        option: &ListOption,
    ) -> Result<Vec<BookMetadata>, StoreError>;

    async fn get(&self, provider_id: &str, book_id: &str) -> Result<BookMetadata, StoreError>;

    /// Number of books across all providers.
    async fn count(&self) -> Result<u64, StoreError>;

    async fn count_for_provider(&self, provider_id: &str) -> Result<u64, StoreError>;

    /// Live ranking of a provider.
    async fn list_rank(
        &self,
        provider_id: &str,
        options: &RankOptions,
    ) -> Result<Vec<BookListItem>, StoreError>;

    async fn increase_visited(&self, provider_id: &str, book_id: &str) -> Result<(), StoreError>;

    /// Inserts or replaces the row keyed by `(provider_id, book_id)`.
    async fn upsert(&self, metadata: BookMetadata) -> Result<(), StoreError>;
}

/// Chapter body repository.
#[async_trait]
pub trait EpisodeStore: Send + Sync {
    async fn get(
        &self,
        provider_id: &str,
        book_id: &str,
        episode_id: &str,
    ) -> Result<BookEpisode, StoreError>;

    /// Number of stored episodes of a book.
    async fn count_original(&self, provider_id: &str, book_id: &str) -> Result<u64, StoreError>;

    /// Number of stored episodes of a book that carry a translation.
    async fn count_translated(&self, provider_id: &str, book_id: &str) -> Result<u64, StoreError>;

    /// Inserts or replaces the row keyed by `(provider_id, book_id, episode_id)`.
    async fn upsert(&self, episode: BookEpisode) -> Result<(), StoreError>;
}

type BookKey = (String, String);

fn book_key(provider_id: &str, book_id: &str) -> BookKey {
    (provider_id.to_string(), book_id.to_string())
}

struct MetadataRow {
    /// Insertion sequence, used to break sort ties.
    seq: u64,
    metadata: BookMetadata,
}

#[derive(Default)]
struct MetadataTable {
    next_seq: u64,
    rows: HashMap<BookKey, MetadataRow>,
}

/// In-memory [`MetadataStore`]. Rankings are fetched live through the registry.
pub struct MemoryMetadataStore {
    table: RwLock<MetadataTable>,
    providers: Arc<ProviderRegistry>,
}

impl MemoryMetadataStore {
    pub fn new(providers: Arc<ProviderRegistry>) -> Self {
        Self {
            table: RwLock::new(MetadataTable::default()),
            providers,
        }
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn list(
        &self,
        page: usize,
        page_size: usize,
        option: &ListOption,
    ) -> Result<Vec<BookMetadata>, StoreError> {
        let table = self.table.read().await;

        let mut rows: Vec<&MetadataRow> = table
            .rows
            .values()
            .filter(|row| {
                option
                    .provider_id
                    .as_deref()
                    .is_none_or(|id| row.metadata.provider_id == id)
            })
            .collect();

        match option.sort {
            ListSort::Created => rows.sort_by_key(|r| (Reverse(r.metadata.created_at), r.seq)),
            ListSort::Updated => rows.sort_by_key(|r| (Reverse(r.metadata.sync_at), r.seq)),
            ListSort::Visited => rows.sort_by_key(|r| (Reverse(r.metadata.visited), r.seq)),
        }

        Ok(rows
            .into_iter()
            .skip(page.saturating_mul(page_size))
            .take(page_size)
            .map(|row| row.metadata.clone())
            .collect())
    }

    async fn get(&self, provider_id: &str, book_id: &str) -> Result<BookMetadata, StoreError> {
        self.table
            .read()
            .await
            .rows
            .get(&book_key(provider_id, book_id))
            .map(|row| row.metadata.clone())
            .ok_or_else(|| {
                StoreError::NotFound(format!("book {}/{} not found", provider_id, book_id))
            })
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.table.read().await.rows.len() as u64)
    }

    async fn count_for_provider(&self, provider_id: &str) -> Result<u64, StoreError> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .keys()
            .filter(|(provider, _)| provider == provider_id)
            .count() as u64)
    }

    async fn list_rank(
        &self,
        provider_id: &str,
        options: &RankOptions,
    ) -> Result<Vec<BookListItem>, StoreError> {
        let provider = self.providers.get(provider_id)?;
        let listings = provider.rank(options).await?;

        Ok(listings
            .into_iter()
            .map(|listing| BookListItem {
                provider_id: provider_id.to_string(),
                book_id: listing.novel_id,
                title_original: listing.title,
                title_translated: None,
                extra: listing.meta,
            })
            .collect())
    }

    async fn increase_visited(&self, provider_id: &str, book_id: &str) -> Result<(), StoreError> {
        let mut table = self.table.write().await;
        let row = table
            .rows
            .get_mut(&book_key(provider_id, book_id))
            .ok_or_else(|| {
                StoreError::NotFound(format!("book {}/{} not found", provider_id, book_id))
            })?;
        row.metadata.visited += 1;
        Ok(())
    }

    async fn upsert(&self, metadata: BookMetadata) -> Result<(), StoreError> {
        let mut table = self.table.write().await;
        let key = book_key(&metadata.provider_id, &metadata.book_id);

        let seq = match table.rows.get(&key) {
            Some(row) => row.seq,
            None => {
                table.next_seq += 1;
                table.next_seq
            }
        };
        table.rows.insert(key, MetadataRow { seq, metadata });
        Ok(())
    }
}

/// In-memory [`EpisodeStore`].
#[derive(Default)]
pub struct MemoryEpisodeStore {
    books: RwLock<HashMap<BookKey, HashMap<String, BookEpisode>>>,
}

impl MemoryEpisodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EpisodeStore for MemoryEpisodeStore {
    async fn get(
        &self,
        provider_id: &str,
        book_id: &str,
        episode_id: &str,
    ) -> Result<BookEpisode, StoreError> {
        self.books
            .read()
            .await
            .get(&book_key(provider_id, book_id))
            .and_then(|episodes| episodes.get(episode_id))
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "episode {}/{}/{} not found",
                    provider_id, book_id, episode_id
                ))
            })
    }

    async fn count_original(&self, provider_id: &str, book_id: &str) -> Result<u64, StoreError> {
        Ok(self
            .books
            .read()
            .await
            .get(&book_key(provider_id, book_id))
            .map_or(0, |episodes| episodes.len() as u64))
    }

    async fn count_translated(&self, provider_id: &str, book_id: &str) -> Result<u64, StoreError> {
        Ok(self
            .books
            .read()
            .await
            .get(&book_key(provider_id, book_id))
            .map_or(0, |episodes| {
                episodes.values().filter(|e| e.is_translated()).count() as u64
            }))
    }

    async fn upsert(&self, episode: BookEpisode) -> Result<(), StoreError> {
        self.books
            .write()
            .await
            .entry(book_key(&episode.provider_id, &episode.book_id))
            .or_default()
            .insert(episode.episode_id.clone(), episode);
        Ok(())
    }
}
