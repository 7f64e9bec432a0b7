//! Kakuyomu (kakuyomu.jp) provider.
//!
//! Everything is scraped from HTML. Kakuyomu uses generated class names, so
//! selectors match on class prefixes.

use super::{
    Provider, RankOptions, RemoteAuthor, RemoteChapter, RemoteListing, RemoteMetadata,
    RemoteTocItem, element_text, query_pairs, resolve_url,
};
use crate::error::ProviderError;
use crate::network::Network;
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;

pub(super) const ID: &str = "kakuyomu";

const BASE_URL: &str = "https://kakuyomu.jp";

/// Rank options that select the ranking page instead of being sent as query.
const OPTION_GENRE: &str = "genre";
const OPTION_PERIOD: &str = "period";

static NUMERIC_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").unwrap());

/// Regex to extract the work id from a link.
static WORK_HREF_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/works/(\d+)").unwrap());

/// Regex to extract the episode id from a link.
static EPISODE_HREF_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/works/\d+/episodes/(\d+)").unwrap());

struct Selectors {
    title: Selector,
    author: Selector,
    introduction: Selector,
    /// Section headings and episode links, in document order.
    toc: Selector,
    toc_link_title: Selector,
    content_paragraph: Selector,
    content: Selector,
    rank_item: Selector,
    rank_title: Selector,
    rank_author: Selector,
    rank_info: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    title: Selector::parse(r#"h1[class^="Heading_heading"] a"#).unwrap(),
    author: Selector::parse(r#"a[href^="/users/"]"#).unwrap(),
    introduction: Selector::parse(r#"div[class^="CollapseTextWithKakuyomuLinks"]"#).unwrap(),
    toc: Selector::parse(
        r#"h3[class^="WorkTocSection_title"], a[class^="WorkTocSection_link"]"#,
    )
    .unwrap(),
    toc_link_title: Selector::parse(r#"div[class^="WorkTocSection_title"]"#).unwrap(),
    content_paragraph: Selector::parse("div.widget-episodeBody p").unwrap(),
    content: Selector::parse("div.widget-episodeBody").unwrap(),
    rank_item: Selector::parse("div.widget-work").unwrap(),
    rank_title: Selector::parse("a.widget-workCard-titleLabel").unwrap(),
    rank_author: Selector::parse("a.widget-workCard-authorLabel").unwrap(),
    rank_info: Selector::parse(
        ".widget-workCard-genre, .widget-workCard-status, .widget-workCard-episodeCount",
    )
    .unwrap(),
});

/// Kakuyomu provider.
pub struct KakuyomuProvider {
    network: Network,
}

impl KakuyomuProvider {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    fn validate_id<'a>(kind: &str, id: &'a str) -> Result<&'a str, ProviderError> {
        if NUMERIC_ID_REGEX.is_match(id) {
            Ok(id)
        } else {
            Err(ProviderError::NotFound(format!("invalid {} id '{}'", kind, id)))
        }
    }

    /// Builds the ranking URL and the query pairs left over after picking the page.
    fn rank_request(options: &RankOptions) -> (String, Vec<(String, String)>) {
        let genre = options.get(OPTION_GENRE).map_or("all", String::as_str);
        let period = options.get(OPTION_PERIOD).map_or("daily", String::as_str);
        let url = format!("{}/rankings/{}/{}", BASE_URL, genre, period);

        let query = query_pairs(options)
            .into_iter()
            .filter(|(k, _)| k != OPTION_GENRE && k != OPTION_PERIOD)
            .collect();
        (url, query)
    }
}

fn parse_rank(html: &str) -> Vec<RemoteListing> {
    let doc = Html::parse_document(html);
    let sel = &*SELECTORS;

    doc.select(&sel.rank_item)
        .filter_map(|item| {
            let title = item.select(&sel.rank_title).next()?;
            let novel_id = WORK_HREF_REGEX
                .captures(title.value().attr("href")?)?
                .get(1)?
                .as_str()
                .to_string();

            let mut meta: Vec<String> = item.select(&sel.rank_author).map(element_text).collect();
            meta.extend(
                item.select(&sel.rank_info)
                    .map(element_text)
                    .filter(|s| !s.is_empty()),
            );

            Some(RemoteListing {
                novel_id,
                title: element_text(title),
                meta: meta.join(" / "),
            })
        })
        .collect()
}

fn parse_metadata(html: &str, page_url: &str) -> Result<RemoteMetadata, ProviderError> {
    let doc = Html::parse_document(html);
    let sel = &*SELECTORS;

    let title = doc
        .select(&sel.title)
        .next()
        .map(|elem| {
            elem.value()
                .attr("title")
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| element_text(elem))
        })
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ProviderError::ElementNotFound("novel title".to_string()))?;

    let authors = doc
        .select(&sel.author)
        .next()
        .map(|a| {
            vec![RemoteAuthor {
                name: element_text(a),
                link: a.value().attr("href").map(|href| resolve_url(page_url, href)),
            }]
        })
        .unwrap_or_default();

    let introduction = doc
        .select(&sel.introduction)
        .next()
        .map(element_text)
        .unwrap_or_default();

    let toc = doc
        .select(&sel.toc)
        .filter_map(|elem| {
            if elem.value().name() == "h3" {
                return Some(RemoteTocItem::heading(element_text(elem)));
            }
            let chapter_id = EPISODE_HREF_REGEX
                .captures(elem.value().attr("href")?)?
                .get(1)?
                .as_str();
            let title = elem
                .select(&sel.toc_link_title)
                .next()
                .map(element_text)
                .unwrap_or_else(|| element_text(elem));
            Some(RemoteTocItem::chapter(title, chapter_id))
        })
        .collect();

    Ok(RemoteMetadata {
        title,
        authors,
        introduction,
        toc,
    })
}

fn parse_chapter(html: &str) -> Result<RemoteChapter, ProviderError> {
    let doc = Html::parse_document(html);
    let sel = &*SELECTORS;

    let content = doc
        .select(&sel.content)
        .next()
        .ok_or_else(|| ProviderError::ElementNotFound("chapter content".to_string()))?;

    let mut paragraphs: Vec<String> = doc
        .select(&sel.content_paragraph)
        .map(|p| super::text_without_ruby(p).trim_end().to_string())
        .collect();

    if paragraphs.is_empty() {
        paragraphs = content
            .text()
            .collect::<String>()
            .lines()
            .map(|line| line.trim_end().to_string())
            .filter(|line| !line.is_empty())
            .collect();
    }

    Ok(RemoteChapter { paragraphs })
}

#[async_trait]
impl Provider for KakuyomuProvider {
    fn id(&self) -> &'static str {
        ID
    }

    async fn rank(&self, options: &RankOptions) -> Result<Vec<RemoteListing>, ProviderError> {
        let (url, query) = Self::rank_request(options);
        let html = self.network.get_text(&url, &query).await?;
        Ok(parse_rank(&html))
    }

    async fn fetch_metadata(&self, novel_id: &str) -> Result<RemoteMetadata, ProviderError> {
        let work_id = Self::validate_id("work", novel_id)?;
        let url = format!("{}/works/{}", BASE_URL, work_id);

        let html = self.network.get_text(&url, &[]).await?;
        parse_metadata(&html, &url)
    }

    async fn fetch_chapter(
        &self,
        novel_id: &str,
        chapter_id: &str,
    ) -> Result<RemoteChapter, ProviderError> {
        let work_id = Self::validate_id("work", novel_id)?;
        let episode_id = Self::validate_id("episode", chapter_id)?;
        let url = format!("{}/works/{}/episodes/{}", BASE_URL, work_id, episode_id);

        let html = self.network.get_text(&url, &[]).await?;
        parse_chapter(&html)
    }
}
