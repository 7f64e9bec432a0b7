//! Ingestion of provider content into the repository.
//!
//! The [`Ingestor`] fetches a novel or chapter from its provider and writes it
//! through the store contracts, merging with what is already stored so that
//! translations survive a resync. [`ReadThroughMetadata`] and
//! [`ReadThroughEpisodes`] wrap a store and ingest on a miss.

use crate::error::StoreError;
use crate::models::{BookAuthor, BookEpisode, BookListItem, BookMetadata, ListOption, TocItem};
use crate::providers::{ProviderRegistry, RankOptions, RemoteChapter, RemoteMetadata};
use crate::store::{EpisodeStore, MetadataStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Pulls content from providers into the stores.
#[derive(Clone)]
pub struct Ingestor {
    providers: Arc<ProviderRegistry>,
    metadata: Arc<dyn MetadataStore>,
    episodes: Arc<dyn EpisodeStore>,
}

impl Ingestor {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        metadata: Arc<dyn MetadataStore>,
        episodes: Arc<dyn EpisodeStore>,
    ) -> Self {
        Self {
            providers,
            metadata,
            episodes,
        }
    }

    /// Fetches metadata from the provider and upserts it, returning the stored row.
    pub async fn sync_metadata(
        &self,
        provider_id: &str,
        book_id: &str,
    ) -> Result<BookMetadata, StoreError> {
        let provider = self.providers.get(provider_id)?;
        let remote = provider.fetch_metadata(book_id).await?;
        let existing = optional(self.metadata.get(provider_id, book_id).await)?;

        let merged = merge_metadata(provider_id, book_id, remote, existing, Utc::now());
        tracing::info!(
            provider = provider_id,
            book = book_id,
            chapters = merged.chapter_count(),
            "synced metadata"
        );
        self.metadata.upsert(merged.clone()).await?;
        Ok(merged)
    }

    /// Fetches one chapter from the provider and upserts it, returning the stored row.
    pub async fn sync_episode(
        &self,
        provider_id: &str,
        book_id: &str,
        episode_id: &str,
    ) -> Result<BookEpisode, StoreError> {
        let provider = self.providers.get(provider_id)?;
        let remote = provider.fetch_chapter(book_id, episode_id).await?;
        let existing = optional(self.episodes.get(provider_id, book_id, episode_id).await)?;

        let merged = merge_episode(provider_id, book_id, episode_id, remote, existing);
        tracing::info!(
            provider = provider_id,
            book = book_id,
            episode = episode_id,
            paragraphs = merged.paragraphs_original.len(),
            "synced episode"
        );
        self.episodes.upsert(merged.clone()).await?;
        Ok(merged)
    }
}

fn optional<T>(result: Result<T, StoreError>) -> Result<Option<T>, StoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Builds the row to store from fresh provider metadata and the stored row, if any.
///
/// Translated fields are kept only where the original text is unchanged.
/// Glossary, counters and creation time always carry over.
fn merge_metadata(
    provider_id: &str,
    book_id: &str,
    remote: RemoteMetadata,
    existing: Option<BookMetadata>,
    now: DateTime<Utc>,
) -> BookMetadata {
    let authors = remote
        .authors
        .into_iter()
        .map(|a| BookAuthor {
            name: a.name,
            link: a.link,
        })
        .collect();

    let Some(existing) = existing else {
        return BookMetadata {
            provider_id: provider_id.to_string(),
            book_id: book_id.to_string(),
            title_original: remote.title,
            title_translated: None,
            authors,
            introduction_original: remote.introduction,
            introduction_translated: None,
            glossary: BTreeMap::new(),
            toc: remote
                .toc
                .into_iter()
                .map(|item| TocItem {
                    title_original: item.title,
                    title_translated: None,
                    episode_id: item.chapter_id,
                })
                .collect(),
            visited: 0,
            downloaded: 0,
            created_at: now,
            sync_at: now,
        };
    };

    let kept_titles: HashMap<&str, &str> = existing
        .toc
        .iter()
        .filter_map(|item| {
            item.title_translated
                .as_deref()
                .map(|t| (item.title_original.as_str(), t))
        })
        .collect();
    let toc = remote
        .toc
        .into_iter()
        .map(|item| TocItem {
            title_translated: kept_titles.get(item.title.as_str()).map(|t| t.to_string()),
            title_original: item.title,
            episode_id: item.chapter_id,
        })
        .collect();

    let title_translated = existing
        .title_translated
        .filter(|_| existing.title_original == remote.title);
    let introduction_translated = existing
        .introduction_translated
        .filter(|_| existing.introduction_original == remote.introduction);

    BookMetadata {
        provider_id: existing.provider_id,
        book_id: existing.book_id,
        title_original: remote.title,
        title_translated,
        authors,
        introduction_original: remote.introduction,
        introduction_translated,
        glossary: existing.glossary,
        toc,
        visited: existing.visited,
        downloaded: existing.downloaded,
        created_at: existing.created_at,
        sync_at: now,
    }
}

fn merge_episode(
    provider_id: &str,
    book_id: &str,
    episode_id: &str,
    remote: RemoteChapter,
    existing: Option<BookEpisode>,
) -> BookEpisode {
    let paragraphs_translated = existing
        .filter(|e| e.paragraphs_original == remote.paragraphs)
        .and_then(|e| e.paragraphs_translated);

    BookEpisode {
        provider_id: provider_id.to_string(),
        book_id: book_id.to_string(),
        episode_id: episode_id.to_string(),
        paragraphs_original: remote.paragraphs,
        paragraphs_translated,
    }
}

/// [`MetadataStore`] that ingests a book from its provider when a lookup misses.
pub struct ReadThroughMetadata {
    inner: Arc<dyn MetadataStore>,
    ingestor: Ingestor,
}

impl ReadThroughMetadata {
    /// `ingestor` must write to `inner`, not to this wrapper.
    pub fn new(inner: Arc<dyn MetadataStore>, ingestor: Ingestor) -> Self {
        Self { inner, ingestor }
    }
}

#[async_trait]
impl MetadataStore for ReadThroughMetadata {
    async fn list(
        &self,
        page: usize,
        page_size: usize,
        option: &ListOption,
    ) -> Result<Vec<BookMetadata>, StoreError> {
        self.inner.list(page, page_size, option).await
    }

    async fn get(&self, provider_id: &str, book_id: &str) -> Result<BookMetadata, StoreError> {
        match self.inner.get(provider_id, book_id).await {
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(provider = provider_id, book = book_id, "metadata miss");
                self.ingestor.sync_metadata(provider_id, book_id).await
            }
            result => result,
        }
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.inner.count().await
    }

    async fn count_for_provider(&self, provider_id: &str) -> Result<u64, StoreError> {
        self.inner.count_for_provider(provider_id).await
    }

    async fn list_rank(
        &self,
        provider_id: &str,
        options: &RankOptions,
    ) -> Result<Vec<BookListItem>, StoreError> {
        self.inner.list_rank(provider_id, options).await
    }

    async fn increase_visited(&self, provider_id: &str, book_id: &str) -> Result<(), StoreError> {
        self.inner.increase_visited(provider_id, book_id).await
    }

    async fn upsert(&self, metadata: BookMetadata) -> Result<(), StoreError> {
        self.inner.upsert(metadata).await
    }
}

/// [`EpisodeStore`] that ingests a chapter from its provider when a lookup misses.
pub struct ReadThroughEpisodes {
    inner: Arc<dyn EpisodeStore>,
    ingestor: Ingestor,
}

impl ReadThroughEpisodes {
    /// `ingestor` must write to `inner`, not to this wrapper.
    pub fn new(inner: Arc<dyn EpisodeStore>, ingestor: Ingestor) -> Self {
        Self { inner, ingestor }
    }
}

#[async_trait]
impl EpisodeStore for ReadThroughEpisodes {
    async fn get(
        &self,
        provider_id: &str,
        book_id: &str,
        episode_id: &str,
    ) -> Result<BookEpisode, StoreError> {
        match self.inner.get(provider_id, book_id, episode_id).await {
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(
                    provider = provider_id,
                    book = book_id,
                    episode = episode_id,
                    "episode miss"
                );
                self.ingestor
                    .sync_episode(provider_id, book_id, episode_id)
                    .await
            }
            result => result,
        }
    }

    async fn count_original(&self, provider_id: &str, book_id: &str) -> Result<u64, StoreError> {
        self.inner.count_original(provider_id, book_id).await
    }

    async fn count_translated(&self, provider_id: &str, book_id: &str) -> Result<u64, StoreError> {
        self.inner.count_translated(provider_id, book_id).await
    }

    async fn upsert(&self, episode: BookEpisode) -> Result<(), StoreError> {
        self.inner.upsert(episode).await
    }
}
