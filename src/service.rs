//! Aggregation service.
//!
//! Projects repository rows into the response DTOs served by the HTTP layer.
//! Every operation returns one result; failures are reduced to a
//! [`ServiceError`] with a stable [`ErrorKind`](crate::error::ErrorKind).

use crate::error::{ErrorKind, ServiceError};
use crate::models::{BookAuthor, BookListItem, BookMetadata, ListOption, ListSort, TocItem};
use crate::providers::RankOptions;
use crate::store::{EpisodeStore, MetadataStore};
use futures::future::{try_join, try_join_all};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One page of listing rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookPageDto {
    pub page_number: u64,
    pub items: Vec<BookListItem>,
}

/// Chapter totals of a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookStateDto {
    pub total: u64,
    pub count_original: u64,
    pub count_translated: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookMetadataDto {
    pub title_original: String,
    pub title_translated: Option<String>,
    pub authors: Vec<BookAuthor>,
    pub introduction_original: String,
    pub introduction_translated: Option<String>,
    pub glossary: BTreeMap<String, String>,
    pub toc: Vec<TocItem>,
    pub visited: u64,
    pub downloaded: u64,
    /// Seconds since the Unix epoch.
    pub sync_at: i64,
}

impl From<BookMetadata> for BookMetadataDto {
    fn from(m: BookMetadata) -> Self {
        Self {
            title_original: m.title_original,
            title_translated: m.title_translated,
            authors: m.authors,
            introduction_original: m.introduction_original,
            introduction_translated: m.introduction_translated,
            glossary: m.glossary,
            toc: m.toc,
            visited: m.visited,
            downloaded: m.downloaded,
            sync_at: m.sync_at.timestamp(),
        }
    }
}

/// A chapter with its titles and reading-order neighbours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookEpisodeDto {
    pub title_original: String,
    pub title_translated: Option<String>,
    pub prev_id: Option<String>,
    pub next_id: Option<String>,
    pub paragraphs_original: Vec<String>,
    pub paragraphs_translated: Option<Vec<String>>,
}

/// Human-readable progress of a listed book.
fn progress(count_original: u64, count_translated: u64, total: usize) -> String {
    format!(
        "Original({}/{}) Translated({}/{})",
        count_original, total, count_translated, total
    )
}

/// Read-side operations over the metadata and episode stores.
pub struct NovelService {
    metadata: Arc<dyn MetadataStore>,
    episodes: Arc<dyn EpisodeStore>,
}

impl NovelService {
    pub fn new(metadata: Arc<dyn MetadataStore>, episodes: Arc<dyn EpisodeStore>) -> Self {
        Self { metadata, episodes }
    }

    /// Lists stored books, each annotated with its translation progress.
    ///
    /// `page` below zero is treated as zero. An empty `provider_id` means no filter.
    pub async fn list(
        &self,
        page: i64,
        page_size: usize,
        provider_id: Option<&str>,
        sort: ListSort,
    ) -> Result<BookPageDto, ServiceError> {
        if page_size == 0 {
            return Err(ServiceError::new(
                ErrorKind::BadRequest,
                "page size must be positive",
            ));
        }
        let page = usize::try_from(page.max(0)).unwrap_or(usize::MAX);
        let provider_id = provider_id.filter(|id| !id.is_empty());

        let option = ListOption {
            provider_id: provider_id.map(str::to_string),
            sort,
        };
        let rows = self.metadata.list(page, page_size, &option).await?;

        let items = try_join_all(rows.into_iter().map(|row| self.annotate(row))).await?;

        let total = match provider_id {
            Some(id) => self.metadata.count_for_provider(id).await?,
            None => self.metadata.count().await?,
        };

        Ok(BookPageDto {
            page_number: total / page_size as u64,
            items,
        })
    }

    async fn annotate(&self, row: BookMetadata) -> Result<BookListItem, ServiceError> {
        let (count_original, count_translated) = try_join(
            self.episodes.count_original(&row.provider_id, &row.book_id),
            self.episodes.count_translated(&row.provider_id, &row.book_id),
        )
        .await?;
        let extra = progress(count_original, count_translated, row.chapter_count());

        Ok(BookListItem {
            provider_id: row.provider_id,
            book_id: row.book_id,
            title_original: row.title_original,
            title_translated: row.title_translated,
            extra,
        })
    }

    /// Live provider ranking. Always a single page.
    pub async fn list_rank(
        &self,
        provider_id: &str,
        options: &RankOptions,
    ) -> Result<BookPageDto, ServiceError> {
        let items = self.metadata.list_rank(provider_id, options).await?;
        Ok(BookPageDto {
            page_number: 1,
            items,
        })
    }

    pub async fn get_state(
        &self,
        provider_id: &str,
        book_id: &str,
    ) -> Result<BookStateDto, ServiceError> {
        let metadata = self.metadata.get(provider_id, book_id).await?;
        let (count_original, count_translated) = try_join(
            self.episodes.count_original(provider_id, book_id),
            self.episodes.count_translated(provider_id, book_id),
        )
        .await?;

        Ok(BookStateDto {
            total: metadata.chapter_count() as u64,
            count_original,
            count_translated,
        })
    }

    /// Returns the metadata projection and records a visit.
    ///
    /// The returned `visited` is the value read before this visit. A failed
    /// increment is logged and does not fail the read.
    pub async fn get_metadata(
        &self,
        provider_id: &str,
        book_id: &str,
    ) -> Result<BookMetadataDto, ServiceError> {
        let metadata = self.metadata.get(provider_id, book_id).await?;

        if let Err(e) = self.metadata.increase_visited(provider_id, book_id).await {
            tracing::warn!(
                provider = provider_id,
                book = book_id,
                error = %e,
                "failed to record visit"
            );
        }

        Ok(metadata.into())
    }

    /// Returns a chapter with prev/next ids taken from the chapter-only TOC.
    pub async fn get_episode(
        &self,
        provider_id: &str,
        book_id: &str,
        episode_id: &str,
    ) -> Result<BookEpisodeDto, ServiceError> {
        let metadata = self.metadata.get(provider_id, book_id).await?;

        let chapters: Vec<&TocItem> = metadata.chapters().collect();
        let index = chapters
            .iter()
            .position(|item| item.episode_id.as_deref() == Some(episode_id))
            .ok_or_else(|| ServiceError::internal("episode id not in toc"))?;

        let neighbour = |i: Option<usize>| {
            i.and_then(|i| chapters.get(i))
                .and_then(|item| item.episode_id.clone())
        };
        let prev_id = neighbour(index.checked_sub(1));
        let next_id = neighbour(Some(index + 1));

        let episode = self
            .episodes
            .get(provider_id, book_id, episode_id)
            .await?;
        let entry = chapters[index];

        Ok(BookEpisodeDto {
            title_original: entry.title_original.clone(),
            title_translated: entry.title_translated.clone(),
            prev_id,
            next_id,
            paragraphs_original: episode.paragraphs_original,
            paragraphs_translated: episode.paragraphs_translated,
        })
    }
}
