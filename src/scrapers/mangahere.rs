//! MangaHere (www.mangahere.cc) scraper implementation.

use super::{ChapterEntry, PageEntry, SearchResult, SiteProvider, number_chapters, number_pages};
use crate::error::ProviderError;
use crate::fetcher::Fetcher;
use crate::utils::{element_text, required_attr, resolve_url, select_first, url_with_query};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::{Arc, LazyLock};

const SITE_URL: &str = "http://www.mangahere.cc";

/// Option in the page menu that links to an ad page instead of a manga page.
const FEATURED_OPTION: &str = "Featured";

struct Selectors {
    chapter_list: Selector,
    link: Selector,
    page_menu: Selector,
    page_option: Selector,
    image: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    chapter_list: Selector::parse("div.detail_list > ul").unwrap(),
    link: Selector::parse("a").unwrap(),
    page_menu: Selector::parse("select.wid60").unwrap(),
    page_option: Selector::parse("option").unwrap(),
    image: Selector::parse("img#image").unwrap(),
});

/// Response of the search suggestion endpoint: parallel title and URL lists.
#[derive(Debug, Deserialize)]
struct Suggestions {
    suggestions: Vec<String>,
    data: Vec<String>,
}

pub struct MangaHereProvider {
    fetcher: Arc<Fetcher>,
}

impl MangaHereProvider {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

fn parse_search(body: &str) -> Result<Vec<SearchResult>, ProviderError> {
    let found: Suggestions =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
    Ok(found
        .suggestions
        .into_iter()
        .zip(found.data)
        .map(|(title, url)| SearchResult {
            title,
            url: resolve_url(SITE_URL, &url),
        })
        .collect())
}

fn parse_chapters(html: &str) -> Result<Vec<(String, String)>, ProviderError> {
    let doc = Html::parse_document(html);
    let list = select_first(&doc, &SELECTORS.chapter_list, "chapter list")?;
    let mut chapters: Vec<(String, String)> = list
        .select(&SELECTORS.link)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            Some((element_text(a), resolve_url(SITE_URL, href)))
        })
        .collect();
    chapters.reverse();
    Ok(chapters)
}

fn parse_pages(html: &str) -> Result<Vec<String>, ProviderError> {
    let doc = Html::parse_document(html);
    let menu = select_first(&doc, &SELECTORS.page_menu, "page menu")?;
    Ok(menu
        .select(&SELECTORS.page_option)
        .filter(|opt| element_text(*opt) != FEATURED_OPTION)
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
impl SiteProvider for MangaHereProvider {
    fn id(&self) -> &str {
        "mangahere"
    }

    fn name(&self) -> &str {
        "MangaHere"
    }

    fn lang(&self) -> &str {
        "en"
    }

    fn site_url(&self) -> &str {
        SITE_URL
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ProviderError> {
        let url = url_with_query(&format!("{SITE_URL}/ajax/search.php"), &[("query", query)])?;
        let body = self.fetcher.fetch_text(&url).await?;
        parse_search(&body)
    }

    async fn list_chapters(&self, manga_ref: &str) -> Result<Vec<ChapterEntry>, ProviderError> {
        let html = self.fetcher.fetch_text(manga_ref).await?;
        Ok(number_chapters(parse_chapters(&html)?))
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

    #[test]
    fn test_parse_search() {
        let body = r#"{"query":"tower","suggestions":["Tower of God","Tower Dungeon"],"data":["//www.mangahere.cc/manga/tower_of_god/","//www.mangahere.cc/manga/tower_dungeon/"]}"#;
        let results = parse_search(body).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Tower of God");
        assert_eq!(results[0].url, "http://www.mangahere.cc/manga/tower_of_god/");
    }

    #[test]
    fn test_parse_chapters_uses_first_list() {
        let html = r#"
            <div class="detail_list">
              <ul>
                <li><a href="//www.mangahere.cc/manga/x/c002/">X 2</a></li>
                <li><a href="//www.mangahere.cc/manga/x/c001/">X 1</a></li>
              </ul>
            </div>"#;
        let chapters = parse_chapters(html).unwrap();
        assert_eq!(
            chapters,
            vec![
                ("X 1".to_string(), "http://www.mangahere.cc/manga/x/c001/".to_string()),
                ("X 2".to_string(), "http://www.mangahere.cc/manga/x/c002/".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_pages_skips_featured() {
        let html = r#"
            <select class="wid60">
              <option value="//www.mangahere.cc/manga/x/c001/1.html">1</option>
              <option value="//www.mangahere.cc/manga/x/c001/2.html">2</option>
              <option value="//www.mangahere.cc/manga/x/c001/featured.html">Featured</option>
            </select>"#;
        let pages = parse_pages(html).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1], "http://www.mangahere.cc/manga/x/c001/2.html");
    }

    #[test]
    fn test_parse_image() {
        let html = r#"<img id="image" src="https://l.mangatown.com/store/manga/1.jpg?token=a">"#;
        assert_eq!(
            parse_image(html).unwrap(),
            "https://l.mangatown.com/store/manga/1.jpg?token=a"
        );
        assert!(parse_image("<img id=\"other\">").is_err());
    }
}
