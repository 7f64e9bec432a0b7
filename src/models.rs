//! Canonical bilingual records.
//!
//! Every text field comes as an original-language value plus an optional
//! translated counterpart. The translated track may be missing entirely or
//! cover only part of the original.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookAuthor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// One table-of-contents entry.
///
/// Entries without an `episode_id` are structural headings (volume
/// separators and the like), not chapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocItem {
    pub title_original: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_translated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_id: Option<String>,
}

impl TocItem {
    pub fn is_chapter(&self) -> bool {
        self.episode_id.is_some()
    }
}

/// Book metadata, keyed by `(provider_id, book_id)`.
///
/// `toc` is in reading order and is never reordered after ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookMetadata {
    pub provider_id: String,
    pub book_id: String,
    pub title_original: String,
    pub title_translated: Option<String>,
    pub authors: Vec<BookAuthor>,
    pub introduction_original: String,
    pub introduction_translated: Option<String>,
    pub glossary: BTreeMap<String, String>,
    pub toc: Vec<TocItem>,
    pub visited: u64,
    pub downloaded: u64,
    pub created_at: DateTime<Utc>,
    pub sync_at: DateTime<Utc>,
}

impl BookMetadata {
    /// Chapters in reading order, with structural headings removed.
    pub fn chapters(&self) -> impl Iterator<Item = &TocItem> {
        self.toc.iter().filter(|item| item.is_chapter())
    }

    /// Number of chapter entries in the table of contents.
    pub fn chapter_count(&self) -> usize {
        self.chapters().count()
    }
}

/// One chapter body, keyed by `(provider_id, book_id, episode_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookEpisode {
    pub provider_id: String,
    pub book_id: String,
    pub episode_id: String,
    pub paragraphs_original: Vec<String>,
    pub paragraphs_translated: Option<Vec<String>>,
}

impl BookEpisode {
    pub fn is_translated(&self) -> bool {
        self.paragraphs_translated.is_some()
    }
}

/// Row of a listing or ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookListItem {
    pub provider_id: String,
    pub book_id: String,
    pub title_original: String,
    pub title_translated: Option<String>,
    pub extra: String,
}

/// Sort key for [`crate::store::MetadataStore::list`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListSort {
    /// Most recently ingested first.
    #[default]
    Created,
    /// Most recently synced with the provider first.
    Updated,
    /// Most visited first.
    Visited,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOption {
    pub provider_id: Option<String>,
    pub sort: ListSort,
}
