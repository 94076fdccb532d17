//! MangaReader (www.mangareader.net) scraper implementation.

use super::{ChapterEntry, PageEntry, SearchResult, SiteProvider, number_chapters, number_pages};
use crate::error::ProviderError;
use crate::fetcher::Fetcher;
use crate::utils::{element_text, required_attr, resolve_url, select_first, url_with_query};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::sync::{Arc, LazyLock};
use tracing::warn;

const SITE_URL: &str = "https://www.mangareader.net";

/// Number of `|`-separated fields in a search response line.
const SEARCH_FIELDS: usize = 6;

struct Selectors {
    chapter_link: Selector,
    page_menu: Selector,
    page_option: Selector,
    image: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    chapter_link: Selector::parse("table#listing a").unwrap(),
    page_menu: Selector::parse("select#pageMenu").unwrap(),
    page_option: Selector::parse("option").unwrap(),
    image: Selector::parse("img#img").unwrap(),
});

pub struct MangaReaderProvider {
    fetcher: Arc<Fetcher>,
}

impl MangaReaderProvider {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

/// Parses the plain-text search response: one `|`-separated record per line,
/// with the title in the third field and the path in the fifth.
fn parse_search(body: &str) -> Vec<SearchResult> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() != SEARCH_FIELDS {
                warn!(%line, "unknown search result format");
                return None;
            }
            Some(SearchResult {
                title: fields[2].trim().to_string(),
                url: resolve_url(SITE_URL, fields[SEARCH_FIELDS - 2]),
            })
        })
        .collect()
}

fn parse_chapters(html: &str) -> Vec<(String, String)> {
    let doc = Html::parse_document(html);
    // Already oldest first.
    doc.select(&SELECTORS.chapter_link)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            Some((element_text(a), resolve_url(SITE_URL, href)))
        })
        .collect()
}

fn parse_pages(html: &str) -> Result<Vec<String>, ProviderError> {
    let doc = Html::parse_document(html);
    let menu = select_first(&doc, &SELECTORS.page_menu, "page menu")?;
    Ok(menu
        .select(&SELECTORS.page_option)
        .filter_map(|opt| opt.value().attr("value"))
        .map(|value| resolve_url(SITE_URL, value))
        .collect())
}

fn parse_image(html: &str) -> Result<String, ProviderError> {
    let doc = Html::parse_document(html);
    let img = select_first(&doc, &SELECTORS.image, "page image")?;
    Ok(resolve_url(SITE_URL, required_attr(img, "src", "page image")?))
}

#[async_trait]
impl SiteProvider for MangaReaderProvider {
    fn id(&self) -> &str {
        "mangareader"
    }

    fn name(&self) -> &str {
        "MangaReader"
    }

    fn lang(&self) -> &str {
        "en"
    }

    fn site_url(&self) -> &str {
        SITE_URL
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ProviderError> {
        let url = url_with_query(
            &format!("{SITE_URL}/actions/search/"),
            &[("q", query), ("limit", "100")],
        )?;
        let body = self.fetcher.fetch_text(&url).await?;
        Ok(parse_search(&body))
    }

    async fn list_chapters(&self, manga_ref: &str) -> Result<Vec<ChapterEntry>, ProviderError> {
        let html = self.fetcher.fetch_text(manga_ref).await?;
        Ok(number_chapters(parse_chapters(&html)))
    }

    async fn list_pages(&self, chapter_ref: &str) -> Result<Vec<PageEntry>, ProviderError> {
        let html = self.fetcher.fetch_text(chapter_ref).await?;
        Ok(number_pages(parse_pages(&html)?))
    }

    async fn resolve_image(&self, page_ref: &str) -> Result<String, ProviderError> {
        let html = self.fetcher.fetch_text(page_ref).await?;
        parse_image(&html)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::testing::MapTransport;

    #[test]
    fn test_parse_search_skips_malformed_lines() {
        let body = "x|y|Naruto|z|/naruto|1\n\
                    broken line\n\
                    x|y|Boruto|z|/boruto|2\n";
        let results = parse_search(body);
        assert_eq!(
            results,
            vec![
                SearchResult {
                    title: "Naruto".to_string(),
                    url: "https://www.mangareader.net/naruto".to_string(),
                },
                SearchResult {
                    title: "Boruto".to_string(),
                    url: "https://www.mangareader.net/boruto".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_chapters_keeps_order() {
        let html = r#"
            <table id="listing">
              <tr><td><a href="/naruto/1">Naruto 1</a></td></tr>
              <tr><td><a href="/naruto/2">Naruto 2</a></td></tr>
            </table>"#;
        let chapters = parse_chapters(html);
        assert_eq!(chapters[0].0, "Naruto 1");
        assert_eq!(chapters[1].1, "https://www.mangareader.net/naruto/2");
    }

    #[test]
    fn test_parse_pages_requires_menu() {
        assert!(matches!(
            parse_pages("<p>maintenance</p>"),
            Err(ProviderError::ElementNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_pages_and_image() {
        let transport = MapTransport::new();
        transport.route(
            "https://www.mangareader.net/naruto/1",
            r#"<select id="pageMenu"><option value="/naruto/1">1</option><option value="/naruto/1/2">2</option></select>"#,
        );
        transport.route(
            "https://www.mangareader.net/naruto/1/2",
            r#"<img id="img" src="https://i1.mangareader.net/naruto/1/naruto-2.jpg">"#,
        );
        let provider = MangaReaderProvider::new(transport.fetcher());

        let pages = provider.list_pages("https://www.mangareader.net/naruto/1").await.unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].index, 1);

        let image = provider.resolve_image(&pages[1].page_ref).await.unwrap();
        assert_eq!(image, "https://i1.mangareader.net/naruto/1/naruto-2.jpg");
    }

    #[tokio::test]
    async fn test_missing_manga_is_permanent() {
        let provider = MangaReaderProvider::new(MapTransport::new().fetcher());
        let err = provider
            .list_chapters("https://www.mangareader.net/gone")
            .await
            .unwrap_err();
        assert!(err.is_permanent());
    }
}
