//! Syosetu (ncode.syosetu.com) provider.
//!
//! Rankings come from the public novel API (JSON); metadata and chapters are
//! scraped from the reader pages. Both the current and the legacy page layout
//! are understood.

use super::{
    Provider, RankOptions, RemoteAuthor, RemoteChapter, RemoteListing, RemoteMetadata,
    RemoteTocItem, element_text, query_pairs, resolve_url, text_without_ruby,
};
use crate::error::ProviderError;
use crate::network::Network;
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::sync::LazyLock;

pub(super) const ID: &str = "syosetu";

const BASE_URL: &str = "https://ncode.syosetu.com";
const API_URL: &str = "https://api.syosetu.com/novelapi/api/";

/// Chapter id given to one-shot stories, whose text lives on the index page.
pub const ONESHOT_CHAPTER_ID: &str = "oneshot";

/// Default number of rank rows when the caller does not pass `lim`.
const DEFAULT_RANK_LIMIT: &str = "50";

/// Safety limit on index pagination.
const MAX_INDEX_PAGES: u32 = 100;

static NCODE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^n[0-9]+[a-z]+$").unwrap());

/// Matches chapter links such as `/n1234ab/12/`.
static CHAPTER_HREF_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/n[0-9a-z]+/(\d+)/?$").unwrap());

/// CSS selectors used for parsing.
struct Selectors {
    title: Selector,
    author: Selector,
    link: Selector,
    introduction: Selector,
    /// Chapter headings and chapter links, in document order.
    toc: Selector,
    heading_class: Vec<&'static str>,
    next_page: Selector,
    content: Selector,
    paragraph: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    title: Selector::parse(".p-novel__title, p.novel_title").unwrap(),
    author: Selector::parse(".p-novel__author, .novel_writername").unwrap(),
    link: Selector::parse("a").unwrap(),
    introduction: Selector::parse("#novel_ex, .p-novel__summary").unwrap(),
    toc: Selector::parse(
        ".p-eplist__chapter-title, .p-eplist__sublist > a, .chapter_title, .novel_sublist2 > dd > a",
    )
    .unwrap(),
    heading_class: vec!["p-eplist__chapter-title", "chapter_title"],
    next_page: Selector::parse(".c-pager__item--next").unwrap(),
    content: Selector::parse(
        ".p-novel__text.js-novel-text:not(.p-novel__text--preface):not(.p-novel__text--afterword), #novel_honbun",
    )
    .unwrap(),
    paragraph: Selector::parse("p").unwrap(),
});

/// Row of the novel API response.
#[derive(Debug, Deserialize)]
struct ApiNovel {
    ncode: String,
    title: String,
    #[serde(default)]
    writer: String,
    #[serde(default)]
    general_all_no: u32,
    /// 1 = serial, 2 = one-shot.
    #[serde(default)]
    noveltype: u8,
    /// 0 = completed, 1 = ongoing.
    #[serde(default)]
    end: u8,
}

/// One page of a novel index.
#[derive(Debug, Default)]
struct IndexPage {
    title: Option<String>,
    authors: Vec<RemoteAuthor>,
    introduction: String,
    toc: Vec<RemoteTocItem>,
    has_content: bool,
    next_page: Option<String>,
}

/// Syosetu provider.
pub struct SyosetuProvider {
    network: Network,
}

impl SyosetuProvider {
    pub fn new(network: Network) -> Self {
        // Adult-content interstitial; harmless for general novels.
        if let Ok(url) = reqwest::Url::parse(BASE_URL) {
            network
                .jar()
                .add_cookie_str("over18=yes; Domain=.syosetu.com; Path=/", &url);
        }
        Self { network }
    }

    fn index_url(ncode: &str) -> String {
        format!("{}/{}/", BASE_URL, ncode)
    }

    fn validate_ncode(novel_id: &str) -> Result<String, ProviderError> {
        let ncode = novel_id.to_ascii_lowercase();
        if NCODE_REGEX.is_match(&ncode) {
            Ok(ncode)
        } else {
            Err(ProviderError::NotFound(format!("invalid ncode '{}'", novel_id)))
        }
    }
}

/// Parses the API response. The first array element is a `{"allcount": N}` header.
fn parse_rank(rows: Vec<JsonValue>) -> Result<Vec<RemoteListing>, ProviderError> {
    rows.into_iter()
        .filter(|row| row.get("allcount").is_none())
        .map(|row| {
            let novel: ApiNovel = serde_json::from_value(row)
                .map_err(|e| ProviderError::ParseError(format!("rank row: {}", e)))?;

            let length = if novel.noveltype == 2 {
                "短編".to_string()
            } else {
                format!("全{}話", novel.general_all_no)
            };
            let status = if novel.end == 0 { "完結" } else { "連載中" };

            Ok(RemoteListing {
                novel_id: novel.ncode.to_ascii_lowercase(),
                title: novel.title,
                meta: format!("{} / {} / {}", novel.writer, length, status),
            })
        })
        .collect()
}

fn parse_index_page(html: &str, page_url: &str) -> IndexPage {
    let doc = Html::parse_document(html);
    let sel = &*SELECTORS;

    let title = doc
        .select(&sel.title)
        .map(element_text)
        .find(|t| !t.is_empty());

    let authors = doc
        .select(&sel.author)
        .next()
        .map(|elem| {
            let link = elem
                .select(&sel.link)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(|href| resolve_url(page_url, href));
            let name = element_text(elem)
                .trim_start_matches("作者：")
                .trim_start_matches("作者:")
                .trim()
                .to_string();
            vec![RemoteAuthor { name, link }]
        })
        .unwrap_or_default();

    let introduction = doc
        .select(&sel.introduction)
        .next()
        .map(|elem| elem.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let toc = doc
        .select(&sel.toc)
        .filter_map(|elem| {
            let is_heading = sel
                .heading_class
                .iter()
                .any(|class| elem.value().has_class(class, scraper::CaseSensitivity::CaseSensitive));
            if is_heading {
                return Some(RemoteTocItem::heading(element_text(elem)));
            }
            let href = elem.value().attr("href")?;
            let chapter_id = CHAPTER_HREF_REGEX.captures(href)?.get(1)?.as_str();
            Some(RemoteTocItem::chapter(element_text(elem), chapter_id))
        })
        .collect();

    let has_content = doc.select(&sel.content).next().is_some();

    let next_page = doc
        .select(&sel.next_page)
        .next()
        .and_then(|elem| elem.value().attr("href"))
        .map(|href| resolve_url(page_url, href));

    IndexPage {
        title,
        authors,
        introduction,
        toc,
        has_content,
        next_page,
    }
}

fn parse_chapter(html: &str) -> Result<RemoteChapter, ProviderError> {
    let doc = Html::parse_document(html);
    let sel = &*SELECTORS;

    let content = doc
        .select(&sel.content)
        .next()
        .ok_or_else(|| ProviderError::ElementNotFound("chapter content".to_string()))?;

    let mut paragraphs: Vec<String> = content
        .select(&sel.paragraph)
        .map(|p| text_without_ruby(p).trim_end().to_string())
        .collect();

    if paragraphs.is_empty() {
        paragraphs = text_without_ruby(content)
            .lines()
            .map(|line| line.trim_end().to_string())
            .collect();
    }

    Ok(RemoteChapter { paragraphs })
}

#[async_trait]
impl Provider for SyosetuProvider {
    fn id(&self) -> &'static str {
        ID
    }

    async fn rank(&self, options: &RankOptions) -> Result<Vec<RemoteListing>, ProviderError> {
        let mut query = vec![("out".to_string(), "json".to_string())];
        if !options.contains_key("lim") {
            query.push(("lim".to_string(), DEFAULT_RANK_LIMIT.to_string()));
        }
        query.extend(query_pairs(options));

        let rows: Vec<JsonValue> = self.network.get_json(API_URL, &query).await?;
        parse_rank(rows)
    }

    async fn fetch_metadata(&self, novel_id: &str) -> Result<RemoteMetadata, ProviderError> {
        let ncode = Self::validate_ncode(novel_id)?;
        let base = Self::index_url(&ncode);

        let html = self.network.get_text(&base, &[]).await?;
        let first = parse_index_page(&html, &base);
        let title = first
            .title
            .clone()
            .ok_or_else(|| ProviderError::ElementNotFound("novel title".to_string()))?;

        let mut toc = first.toc;
        let mut next = first.next_page;
        let mut pages = 1;
        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_INDEX_PAGES {
                tracing::warn!(ncode = %ncode, "Index pagination limit reached");
                break;
            }
            let html = self.network.get_text(&url, &[]).await?;
            let page = parse_index_page(&html, &url);
            toc.extend(page.toc);
            next = page.next_page;
        }

        if toc.is_empty() && first.has_content {
            toc.push(RemoteTocItem::chapter(title.clone(), ONESHOT_CHAPTER_ID));
        }

        Ok(RemoteMetadata {
            title,
            authors: first.authors,
            introduction: first.introduction,
            toc,
        })
    }

    async fn fetch_chapter(
        &self,
        novel_id: &str,
        chapter_id: &str,
    ) -> Result<RemoteChapter, ProviderError> {
        let ncode = Self::validate_ncode(novel_id)?;
        let url = if chapter_id == ONESHOT_CHAPTER_ID {
            Self::index_url(&ncode)
        } else {
            format!("{}{}/", Self::index_url(&ncode), chapter_id)
        };

        let html = self.network.get_text(&url, &[]).await?;
        parse_chapter(&html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX_PAGE: &str = r#"
<html><body>
  <h1 class="p-novel__title">転生したら図書館だった件</h1>
  <div class="p-novel__author">作者：<a href="https://mypage.syosetu.com/12345/">山田太郎</a></div>
  <div id="novel_ex">ある日、目が覚めると<br>図書館になっていた。</div>
  <div class="p-eplist">
    <div class="p-eplist__chapter-title">第一章 目覚め</div>
    <div class="p-eplist__sublist"><a href="/n1234ab/1/" class="p-eplist__subtitle">プロローグ</a></div>
    <div class="p-eplist__sublist"><a href="/n1234ab/2/" class="p-eplist__subtitle">司書がいない</a></div>
    <div class="p-eplist__chapter-title">第二章 来訪者</div>
    <div class="p-eplist__sublist"><a href="/n1234ab/3/" class="p-eplist__subtitle">最初の客</a></div>
  </div>
  <div class="c-pager"><a href="/n1234ab/?p=2" class="c-pager__item c-pager__item--next">次へ</a></div>
</body></html>
"#;

    const LEGACY_INDEX_PAGE: &str = r#"
<html><body>
  <p class="novel_title">旧レイアウト</p>
  <div class="novel_writername">作者：<a href="/u/1/">鈴木</a></div>
  <div class="index_box">
    <div class="chapter_title">第一部</div>
    <dl class="novel_sublist2"><dd class="subtitle"><a href="/n9999zz/1/">一話</a></dd></dl>
  </div>
</body></html>
"#;

    const ONESHOT_PAGE: &str = r#"
<html><body>
  <h1 class="p-novel__title">短いお話</h1>
  <div class="p-novel__body">
    <div class="p-novel__text js-novel-text"><p>一行目</p><p></p><p>三行目</p></div>
  </div>
</body></html>
"#;

    const CHAPTER_PAGE: &str = r#"
<html><body>
  <div class="p-novel__body">
    <div class="p-novel__text p-novel__text--preface js-novel-text"><p>前書き</p></div>
    <div class="p-novel__text js-novel-text">
      <p><ruby>司書<rp>(</rp><rt>ししょ</rt><rp>)</rp></ruby>はいない。</p>
      <p></p>
      <p>静かだった。  </p>
    </div>
    <div class="p-novel__text p-novel__text--afterword js-novel-text"><p>後書き</p></div>
  </div>
</body></html>
"#;

    #[test]
    fn test_parse_index_page() {
        let page = parse_index_page(INDEX_PAGE, "https://ncode.syosetu.com/n1234ab/");

        assert_eq!(page.title.as_deref(), Some("転生したら図書館だった件"));
        assert_eq!(
            page.authors,
            vec![RemoteAuthor {
                name: "山田太郎".to_string(),
                link: Some("https://mypage.syosetu.com/12345/".to_string()),
            }]
        );
        assert!(page.introduction.starts_with("ある日"));
        assert_eq!(
            page.toc,
            vec![
                RemoteTocItem::heading("第一章 目覚め"),
                RemoteTocItem::chapter("プロローグ", "1"),
                RemoteTocItem::chapter("司書がいない", "2"),
                RemoteTocItem::heading("第二章 来訪者"),
                RemoteTocItem::chapter("最初の客", "3"),
            ]
        );
        assert_eq!(
            page.next_page.as_deref(),
            Some("https://ncode.syosetu.com/n1234ab/?p=2")
        );
        assert!(!page.has_content);
    }

    #[test]
    fn test_parse_legacy_index_page() {
        let page = parse_index_page(LEGACY_INDEX_PAGE, "https://ncode.syosetu.com/n9999zz/");

        assert_eq!(page.title.as_deref(), Some("旧レイアウト"));
        assert_eq!(page.authors[0].name, "鈴木");
        assert_eq!(
            page.authors[0].link.as_deref(),
            Some("https://ncode.syosetu.com/u/1/")
        );
        assert_eq!(
            page.toc,
            vec![
                RemoteTocItem::heading("第一部"),
                RemoteTocItem::chapter("一話", "1"),
            ]
        );
        assert!(page.next_page.is_none());
    }

    #[test]
    fn test_oneshot_page_has_content() {
        let page = parse_index_page(ONESHOT_PAGE, "https://ncode.syosetu.com/n0001a/");
        assert!(page.toc.is_empty());
        assert!(page.has_content);

        let chapter = parse_chapter(ONESHOT_PAGE).unwrap();
        assert_eq!(chapter.paragraphs, ["一行目", "", "三行目"]);
    }

    #[test]
    fn test_parse_chapter_skips_preface_and_ruby() {
        let chapter = parse_chapter(CHAPTER_PAGE).unwrap();
        assert_eq!(chapter.paragraphs, ["司書はいない。", "", "静かだった。"]);
    }

    #[test]
    fn test_parse_chapter_without_content() {
        let err = parse_chapter("<html><body>メンテナンス中</body></html>").unwrap_err();
        assert!(matches!(err, ProviderError::ElementNotFound(_)));
    }

    #[test]
    fn test_parse_rank() {
        let rows: Vec<JsonValue> = serde_json::from_str(
            r#"[
                {"allcount": 2},
                {"ncode": "N1234AB", "title": "長編", "writer": "山田", "general_all_no": 120, "noveltype": 1, "end": 1, "genre": 201},
                {"ncode": "N0001A", "title": "短編", "writer": "鈴木", "general_all_no": 1, "noveltype": 2, "end": 0}
            ]"#,
        )
        .unwrap();

        let listings = parse_rank(rows).unwrap();
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].novel_id, "n1234ab");
        assert_eq!(listings[0].meta, "山田 / 全120話 / 連載中");
        assert_eq!(listings[1].meta, "鈴木 / 短編 / 完結");
    }

    #[test]
    fn test_validate_ncode() {
        assert_eq!(SyosetuProvider::validate_ncode("N1234AB").unwrap(), "n1234ab");
        assert!(SyosetuProvider::validate_ncode("../etc").is_err());
        assert!(SyosetuProvider::validate_ncode("1234").is_err());
    }
}
