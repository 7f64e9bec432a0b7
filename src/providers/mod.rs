//! Provider trait and common types for upstream novel sites.
//!
//! Every site is wrapped in a [`Provider`] that hides its HTML or JSON shape
//! behind three operations. The [`ProviderRegistry`] resolves the string id
//! used in URLs and storage keys to the implementation.

mod kakuyomu;
mod pixiv;
mod syosetu;

pub use kakuyomu::KakuyomuProvider;
pub use pixiv::PixivProvider;
pub use syosetu::SyosetuProvider;

use crate::error::{NetworkError, ProviderError};
use crate::network::Network;
use async_trait::async_trait;
use scraper::ElementRef;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Opaque, provider-defined rank query parameters.
pub type RankOptions = HashMap<String, String>;

/// One row of a provider ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteListing {
    pub novel_id: String,
    pub title: String,
    /// Free-form summary line (author, genre, length...).
    pub meta: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteAuthor {
    pub name: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTocItem {
    pub title: String,
    /// `None` for volume or section headings.
    pub chapter_id: Option<String>,
}

impl RemoteTocItem {
    pub fn heading(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            chapter_id: None,
        }
    }

    pub fn chapter(title: impl Into<String>, chapter_id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            chapter_id: Some(chapter_id.into()),
        }
    }
}

/// Novel metadata as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteMetadata {
    pub title: String,
    pub authors: Vec<RemoteAuthor>,
    pub introduction: String,
    pub toc: Vec<RemoteTocItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteChapter {
    pub paragraphs: Vec<String>,
}

/// Trait for upstream novel sites.
///
/// None of the operations retry: a failure is returned once to the caller.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Identifier used in routes and storage keys (lowercase, no spaces).
    fn id(&self) -> &'static str;

    /// Fetches a ranking. `options` are forwarded to the site as given.
    async fn rank(&self, options: &RankOptions) -> Result<Vec<RemoteListing>, ProviderError>;

    /// Fetches novel metadata including the table of contents.
    async fn fetch_metadata(&self, novel_id: &str) -> Result<RemoteMetadata, ProviderError>;

    /// Fetches the paragraphs of one chapter.
    async fn fetch_chapter(
        &self,
        novel_id: &str,
        chapter_id: &str,
    ) -> Result<RemoteChapter, ProviderError>;
}

/// Registry of available providers, keyed by id.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in provider.
    ///
    /// With `isolate_sessions`, each provider gets its own cookie jar; otherwise
    /// all of them share the jar of `network`.
    pub fn with_builtin(network: &Network, isolate_sessions: bool) -> Result<Self, NetworkError> {
        let session = |id: &str| -> Result<Network, NetworkError> {
            if !isolate_sessions {
                return Ok(network.clone());
            }
            let isolated = network.isolated()?;
            isolated.seed_cookies(&[id]);
            Ok(isolated)
        };

        let mut registry = Self::new();
        registry.register(SyosetuProvider::new(session(syosetu::ID)?));
        registry.register(KakuyomuProvider::new(session(kakuyomu::ID)?));
        registry.register(PixivProvider::new(session(pixiv::ID)?));

        if !isolate_sessions {
            network.seed_cookies(&registry.ids());
        }
        Ok(registry)
    }

    /// Adds a provider, replacing any provider with the same id.
    pub fn register(&mut self, provider: impl Provider + 'static) {
        self.register_shared(Arc::new(provider));
    }

    /// Registers a provider the caller keeps a handle on.
    pub fn register_shared(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    /// Looks up a provider by id.
    pub fn get(&self, id: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::UnknownProvider(id.to_string()))
    }

    /// Returns the registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

/// Rank options as query pairs, sorted by key for stable URLs.
pub(crate) fn query_pairs(options: &RankOptions) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = options
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    pairs.sort();
    pairs
}

/// Collapsed, trimmed text content of an element.
pub(crate) fn element_text(elem: ElementRef) -> String {
    elem.text().collect::<String>().trim().to_string()
}

/// Text of an element with ruby annotations (`<rt>`, `<rp>`) left out.
pub(crate) fn text_without_ruby(elem: ElementRef) -> String {
    let mut text = String::new();

    for node in elem.descendants() {
        let Some(t) = node.value().as_text() else {
            continue;
        };
        let in_annotation = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|e| e.name() == "rt" || e.name() == "rp")
        });
        if !in_annotation {
            text.push_str(t);
        }
    }

    text
}

/// Resolves a possibly relative link against `base`.
pub(crate) fn resolve_url(base: &str, link: &str) -> String {
    url::Url::parse(base)
        .and_then(|base| base.join(link))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| link.to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted provider used by store and service tests.

    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeProvider {
        pub metadata: Option<RemoteMetadata>,
        pub chapters: HashMap<String, RemoteChapter>,
        pub listings: Vec<RemoteListing>,
        pub seen_options: Mutex<Vec<RankOptions>>,
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn id(&self) -> &'static str {
            "fake"
        }

        async fn rank(&self, options: &RankOptions) -> Result<Vec<RemoteListing>, ProviderError> {
            self.seen_options.lock().unwrap().push(options.clone());
            Ok(self.listings.clone())
        }

        async fn fetch_metadata(&self, novel_id: &str) -> Result<RemoteMetadata, ProviderError> {
            self.metadata
                .clone()
                .ok_or_else(|| ProviderError::NotFound(novel_id.to_string()))
        }

        async fn fetch_chapter(
            &self,
            novel_id: &str,
            chapter_id: &str,
        ) -> Result<RemoteChapter, ProviderError> {
            self.chapters
                .get(chapter_id)
                .cloned()
                .ok_or_else(|| ProviderError::NotFound(format!("{}/{}", novel_id, chapter_id)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    #[test]
    fn test_registry_resolves_builtin_ids() {
        let network = Network::new(&Default::default()).unwrap();
        let registry = ProviderRegistry::with_builtin(&network, false).unwrap();

        assert_eq!(registry.ids(), ["kakuyomu", "pixiv", "syosetu"]);
        assert_eq!(registry.get("syosetu").unwrap().id(), "syosetu");
    }

    #[test]
    fn test_registry_with_isolated_sessions() {
        let network = Network::new(&Default::default()).unwrap();
        let registry = ProviderRegistry::with_builtin(&network, true).unwrap();
        assert_eq!(registry.ids().len(), 3);
    }

    #[test]
    fn test_unknown_provider_is_an_error() {
        let registry = ProviderRegistry::new();
        let err = registry.get("hameln").err().unwrap();
        assert!(matches!(err, ProviderError::UnknownProvider(id) if id == "hameln"));
    }

    #[test]
    fn test_query_pairs_are_sorted_and_complete() {
        let options = RankOptions::from([
            ("type".to_string(), "weekly".to_string()),
            ("genre".to_string(), "101".to_string()),
        ]);
        assert_eq!(
            query_pairs(&options),
            vec![
                ("genre".to_string(), "101".to_string()),
                ("type".to_string(), "weekly".to_string()),
            ]
        );
    }

    #[test]
    fn test_text_without_ruby() {
        let doc = Html::parse_fragment(
            "<p><ruby>漢字<rp>(</rp><rt>かんじ</rt><rp>)</rp></ruby>を読む</p>",
        );
        let p = doc.select(&Selector::parse("p").unwrap()).next().unwrap();
        assert_eq!(text_without_ruby(p), "漢字を読む");
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            resolve_url("https://ncode.syosetu.com/n1234ab/", "/n1234ab/2/"),
            "https://ncode.syosetu.com/n1234ab/2/"
        );
        assert_eq!(
            resolve_url("https://ncode.syosetu.com/n1234ab/", "?p=2"),
            "https://ncode.syosetu.com/n1234ab/?p=2"
        );
        assert_eq!(
            resolve_url("https://ncode.syosetu.com/n1234ab/", "https://other.com/page"),
            "https://other.com/page"
        );
    }
}
