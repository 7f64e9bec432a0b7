//! Pixiv (pixiv.net/novel) provider.
//!
//! Uses Pixiv's AJAX API. A novel id of the form `s<digits>` names a series,
//! whose table of contents is paged from the series content endpoint; any
//! other numeric id is a standalone novel with a single chapter. Many works
//! are only visible to a logged-in session, which is why this provider relies
//! on cookies seeded into the shared jar.

use super::{
    Provider, RankOptions, RemoteAuthor, RemoteChapter, RemoteListing, RemoteMetadata,
    RemoteTocItem, query_pairs,
};
use crate::error::ProviderError;
use crate::network::Network;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;

pub(super) const ID: &str = "pixiv";

const AJAX_URL: &str = "https://www.pixiv.net/ajax";

/// Page size of the series content endpoint.
const SERIES_PAGE_LIMIT: usize = 30;

/// Rank option holding the search keyword.
const OPTION_WORD: &str = "word";

static NUMERIC_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").unwrap());

/// Regex for Unicode escape sequences left in some titles.
static UNICODE_ESCAPE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\u([0-9a-fA-F]{4})").unwrap());

/// Inline ruby markup: `[[rb:漢字 > かんじ]]`.
static RUBY_MARKUP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[rb:\s*(.+?)\s*>\s*.+?\]\]").unwrap());

/// Chapter title markup: `[chapter:タイトル]`.
static CHAPTER_MARKUP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[chapter:\s*(.+?)\s*\]").unwrap());

/// Remaining control markup (`[newpage]`, `[jump:2]`, `[pixivimage:123]`).
static CONTROL_MARKUP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(newpage|jump:\d+|pixivimage:[\d-]+|uploadedimage:\d+)\]").unwrap());

#[derive(Debug, Clone, PartialEq)]
enum PixivNovelId {
    Standalone(String),
    Series(String),
}

impl PixivNovelId {
    fn parse(novel_id: &str) -> Result<Self, ProviderError> {
        let (series, digits) = match novel_id.strip_prefix('s') {
            Some(rest) => (true, rest),
            None => (false, novel_id),
        };
        if !NUMERIC_ID_REGEX.is_match(digits) {
            return Err(ProviderError::NotFound(format!("invalid novel id '{}'", novel_id)));
        }
        Ok(if series {
            PixivNovelId::Series(digits.to_string())
        } else {
            PixivNovelId::Standalone(digits.to_string())
        })
    }
}

/// API response wrapper. On errors Pixiv sends `"body": []`, so the body is
/// only decoded into its real type once `error` is known to be false.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    error: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    body: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NovelBody {
    title: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    user_name: String,
    #[serde(default)]
    user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeriesBody {
    title: String,
    #[serde(default)]
    caption: String,
    #[serde(default)]
    user_name: String,
    #[serde(default)]
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct SeriesContentBody {
    page: SeriesPage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeriesPage {
    series_contents: Vec<SeriesContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeriesMetadata {
    content_order: u32,
}

#[derive(Debug, Deserialize)]
struct SeriesContent {
    id: String,
    title: Option<String>,
    series: SeriesMetadata,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    novel: SearchNovels,
}

#[derive(Debug, Deserialize)]
struct SearchNovels {
    data: Vec<SearchNovel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchNovel {
    id: String,
    title: String,
    #[serde(default)]
    user_name: String,
    #[serde(default)]
    text_count: u64,
    #[serde(default)]
    series_id: Option<String>,
}

/// Pixiv provider.
pub struct PixivProvider {
    network: Network,
}

impl PixivProvider {
    pub fn new(network: Network) -> Self {
        Self { network }
    }

    /// Calls an AJAX endpoint and unwraps the response envelope.
    async fn ajax<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{}", AJAX_URL, path);
        let response: ApiResponse = self.network.get_json(&url, query).await?;
        unwrap_envelope(response)
    }

    async fn series_toc(&self, series_id: &str) -> Result<Vec<RemoteTocItem>, ProviderError> {
        let mut contents: Vec<SeriesContent> = Vec::new();
        let mut last_order = 0u32;

        loop {
            let query = vec![
                ("limit".to_string(), SERIES_PAGE_LIMIT.to_string()),
                ("last_order".to_string(), last_order.to_string()),
                ("order_by".to_string(), "asc".to_string()),
            ];
            let body: SeriesContentBody = self
                .ajax(&format!("/novel/series_content/{}", series_id), &query)
                .await?;

            let page = body.page.series_contents;
            let page_len = page.len();
            let next_order = page.last().map_or(last_order, |c| c.series.content_order);
            contents.extend(page);

            if page_len < SERIES_PAGE_LIMIT || next_order <= last_order {
                break;
            }
            last_order = next_order;
        }

        Ok(series_toc_from(contents))
    }
}

/// Message fragments pixiv uses for deleted or nonexistent works.
const MISSING_WORK_MARKERS: [&str; 3] = ["存在しない", "削除", "not exist"];

fn unwrap_envelope<T: DeserializeOwned>(response: ApiResponse) -> Result<T, ProviderError> {
    if response.error {
        let message = format!("API error: {}", response.message);
        let missing = MISSING_WORK_MARKERS
            .iter()
            .any(|marker| response.message.contains(marker));
        return Err(if missing {
            ProviderError::NotFound(message)
        } else {
            ProviderError::ParseError(message)
        });
    }
    let body = response
        .body
        .ok_or_else(|| ProviderError::ParseError("API response missing body".to_string()))?;
    serde_json::from_value(body).map_err(|e| ProviderError::ParseError(e.to_string()))
}

fn series_toc_from(mut contents: Vec<SeriesContent>) -> Vec<RemoteTocItem> {
    contents.sort_by_key(|c| c.series.content_order);
    contents
        .into_iter()
        .map(|content| {
            let title = content
                .title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(unescape_unicode)
                .unwrap_or_else(|| format!("#{}", content.series.content_order));
            RemoteTocItem::chapter(title, content.id)
        })
        .collect()
}

fn user_link(user_id: &str) -> Option<String> {
    (!user_id.is_empty()).then(|| format!("https://www.pixiv.net/users/{}", user_id))
}

/// Splits novel text into paragraphs, rendering Pixiv's inline markup as text.
fn content_paragraphs(content: &str) -> Vec<String> {
    let content = unescape_unicode(content);
    let content = RUBY_MARKUP_REGEX.replace_all(&content, "$1");
    let content = CHAPTER_MARKUP_REGEX.replace_all(&content, "$1");
    let content = CONTROL_MARKUP_REGEX.replace_all(&content, "");

    content
        .lines()
        .map(|line| line.trim_end().to_string())
        .collect()
}

/// Unescapes Unicode escape sequences like `\u3042` to actual characters.
fn unescape_unicode(text: &str) -> String {
    if !text.contains("\\u") {
        return text.to_string();
    }

    UNICODE_ESCAPE_REGEX
        .replace_all(text, |caps: &regex::Captures| {
            u32::from_str_radix(&caps[1], 16)
                .ok()
                .and_then(char::from_u32)
                .map(|c| c.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}

fn search_listings(body: SearchBody) -> Vec<RemoteListing> {
    body.novel
        .data
        .into_iter()
        .map(|novel| {
            let novel_id = match novel.series_id {
                Some(series_id) if !series_id.is_empty() => format!("s{}", series_id),
                _ => novel.id,
            };
            RemoteListing {
                novel_id,
                title: unescape_unicode(&novel.title),
                meta: format!("{} / {}文字", novel.user_name, novel.text_count),
            }
        })
        .collect()
}

#[async_trait]
impl Provider for PixivProvider {
    fn id(&self) -> &'static str {
        ID
    }

    async fn rank(&self, options: &RankOptions) -> Result<Vec<RemoteListing>, ProviderError> {
        let word = options
            .get(OPTION_WORD)
            .filter(|w| !w.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::InvalidOption(format!("pixiv ranking needs a '{}'", OPTION_WORD))
            })?;

        let keyword: String = url::form_urlencoded::byte_serialize(word.as_bytes()).collect();
        let path = format!("/search/novels/{}", keyword);
        let body: SearchBody = self.ajax(&path, &query_pairs(options)).await?;
        Ok(search_listings(body))
    }

    async fn fetch_metadata(&self, novel_id: &str) -> Result<RemoteMetadata, ProviderError> {
        match PixivNovelId::parse(novel_id)? {
            PixivNovelId::Series(series_id) => {
                let body: SeriesBody = self
                    .ajax(&format!("/novel/series/{}", series_id), &[])
                    .await?;
                let toc = self.series_toc(&series_id).await?;

                Ok(RemoteMetadata {
                    title: unescape_unicode(&body.title),
                    authors: vec![RemoteAuthor {
                        name: body.user_name,
                        link: user_link(&body.user_id),
                    }],
                    introduction: body.caption,
                    toc,
                })
            }
            PixivNovelId::Standalone(id) => {
                let body: NovelBody = self.ajax(&format!("/novel/{}", id), &[]).await?;
                let title = unescape_unicode(&body.title);

                Ok(RemoteMetadata {
                    toc: vec![RemoteTocItem::chapter(title.clone(), id)],
                    title,
                    authors: vec![RemoteAuthor {
                        name: body.user_name,
                        link: user_link(&body.user_id),
                    }],
                    introduction: body.description,
                })
            }
        }
    }

    async fn fetch_chapter(
        &self,
        novel_id: &str,
        chapter_id: &str,
    ) -> Result<RemoteChapter, ProviderError> {
        PixivNovelId::parse(novel_id)?;
        if !NUMERIC_ID_REGEX.is_match(chapter_id) {
            return Err(ProviderError::NotFound(format!(
                "invalid chapter id '{}'",
                chapter_id
            )));
        }

        let body: NovelBody = self.ajax(&format!("/novel/{}", chapter_id), &[]).await?;
        let content = body
            .content
            .ok_or_else(|| ProviderError::NotFound("Novel content not found".to_string()))?;

        Ok(RemoteChapter {
            paragraphs: content_paragraphs(&content),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::decode_lenient;

    #[test]
    fn test_parse_novel_id() {
        assert_eq!(
            PixivNovelId::parse("12345").unwrap(),
            PixivNovelId::Standalone("12345".to_string())
        );
        assert_eq!(
            PixivNovelId::parse("s678").unwrap(),
            PixivNovelId::Series("678".to_string())
        );
        assert!(PixivNovelId::parse("s").is_err());
        assert!(PixivNovelId::parse("abc").is_err());
    }

    #[test]
    fn test_envelope_error_is_not_found() {
        let response: ApiResponse = decode_lenient(
            "u",
            r#"{"error":true,"message":"該当作品は削除されたか、存在しない作品IDです。","body":[]}"#,
        )
        .unwrap();
        assert!(matches!(
            unwrap_envelope::<NovelBody>(response),
            Err(ProviderError::NotFound(_))
        ));
    }

    #[test]
    fn test_envelope_login_wall_is_not_a_404() {
        let response: ApiResponse = decode_lenient(
            "u",
            r#"{"error":true,"message":"ログインしてください","body":[]}"#,
        )
        .unwrap();
        assert!(matches!(
            unwrap_envelope::<NovelBody>(response),
            Err(ProviderError::ParseError(msg)) if msg.contains("ログイン")
        ));
    }

    #[test]
    fn test_envelope_missing_body() {
        let response: ApiResponse = decode_lenient("u", r#"{"error":false,"message":""}"#).unwrap();
        assert!(matches!(
            unwrap_envelope::<NovelBody>(response),
            Err(ProviderError::ParseError(_))
        ));
    }

    #[test]
    fn test_series_toc_is_ordered() {
        let body: SeriesContentBody = decode_lenient(
            "u",
            r#"{"page":{"seriesContents":[
                {"id":"300","title":"第三話","series":{"contentOrder":3}},
                {"id":"100","title":"第一話","series":{"contentOrder":1}},
                {"id":"200","title":"  ","series":{"contentOrder":2}}
            ]}}"#,
        )
        .unwrap();

        assert_eq!(
            series_toc_from(body.page.series_contents),
            vec![
                RemoteTocItem::chapter("第一話", "100"),
                RemoteTocItem::chapter("#2", "200"),
                RemoteTocItem::chapter("第三話", "300"),
            ]
        );
    }

    #[test]
    fn test_content_paragraphs_render_markup() {
        let content = "[chapter:序章]\n[[rb:魔法 > まほう]]が使えた。\n\n[newpage]\n次のページ";
        assert_eq!(
            content_paragraphs(content),
            ["序章", "魔法が使えた。", "", "", "次のページ"]
        );
    }

    #[test]
    fn test_search_listings_prefer_series() {
        let body: SearchBody = decode_lenient(
            "u",
            r#"{"novel":{"data":[
                {"id":"1","title":"単発","userName":"A","textCount":1200},
                {"id":"2","title":"連載の一話","userName":"B","textCount":800,"seriesId":"77"}
            ],"total":2}}"#,
        )
        .unwrap();

        let listings = search_listings(body);
        assert_eq!(listings[0].novel_id, "1");
        assert_eq!(listings[0].meta, "A / 1200文字");
        assert_eq!(listings[1].novel_id, "s77");
    }

    #[test]
    fn test_unescape_unicode() {
        assert_eq!(unescape_unicode("\\u3042\\u3044\\u3046"), "あいう");
        assert_eq!(unescape_unicode("Plain"), "Plain");
        assert_eq!(unescape_unicode("\\uZZZZ"), "\\uZZZZ");
    }

    #[test]
    fn test_user_link() {
        assert_eq!(
            user_link("42").as_deref(),
            Some("https://www.pixiv.net/users/42")
        );
        assert_eq!(user_link(""), None);
    }
}
