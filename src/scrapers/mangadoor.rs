//! MangaDoor (mangadoor.com) scraper implementation.

use super::{ChapterEntry, PageEntry, SearchResult, SiteProvider, number_chapters, number_pages};
use crate::error::ProviderError;
use crate::fetcher::Fetcher;
use crate::utils::{element_text, required_attr, resolve_url, select_first, url_with_query};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::{Arc, LazyLock};

const SITE_URL: &str = "http://mangadoor.com";

struct Selectors {
    chapter_list: Selector,
    link: Selector,
    page_menu: Selector,
    page_option: Selector,
    image: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    chapter_list: Selector::parse("ul.chapters").unwrap(),
    link: Selector::parse("a").unwrap(),
    page_menu: Selector::parse("select#page-list").unwrap(),
    page_option: Selector::parse("option").unwrap(),
    image: Selector::parse("div#ppp img").unwrap(),
});

#[derive(Debug, Deserialize)]
struct Suggestions {
    suggestions: Vec<Suggestion>,
}

/// `value` is the title, `data` the manga slug.
#[derive(Debug, Deserialize)]
struct Suggestion {
    value: String,
    data: String,
}

pub struct MangaDoorProvider {
    fetcher: Arc<Fetcher>,
}

impl MangaDoorProvider {
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
        .map(|s| SearchResult {
            title: s.value,
            url: format!("{SITE_URL}/manga/{}", s.data),
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

/// Page refs are the chapter URL followed by each option value.
fn parse_pages(html: &str, chapter_ref: &str) -> Result<Vec<String>, ProviderError> {
    let doc = Html::parse_document(html);
    let menu = select_first(&doc, &SELECTORS.page_menu, "page menu")?;
    let base = chapter_ref.trim_end_matches('/');
    Ok(menu
        .select(&SELECTORS.page_option)
        .filter_map(|opt| opt.value().attr("value"))
        .map(|value| format!("{base}/{}", value.trim()))
        .collect())
}

fn parse_image(html: &str) -> Result<String, ProviderError> {
    let doc = Html::parse_document(html);
    let img = select_first(&doc, &SELECTORS.image, "page image")?;
    Ok(resolve_url(SITE_URL, required_attr(img, "src", "page image")?))
}

#[async_trait]
impl SiteProvider for MangaDoorProvider {
    fn id(&self) -> &str {
        "mangadoor"
    }

    fn name(&self) -> &str {
        "MangaDoor"
    }

    fn lang(&self) -> &str {
        "es"
    }

    fn site_url(&self) -> &str {
        SITE_URL
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ProviderError> {
        let url = url_with_query(&format!("{SITE_URL}/search/"), &[("query", query)])?;
        let body = self.fetcher.fetch_text(&url).await?;
        parse_search(&body)
    }

    async fn list_chapters(&self, manga_ref: &str) -> Result<Vec<ChapterEntry>, ProviderError> {
        let html = self.fetcher.fetch_text(manga_ref).await?;
        Ok(number_chapters(parse_chapters(&html)?))
    }

    async fn list_pages(&self, chapter_ref: &str) -> Result<Vec<PageEntry>, ProviderError> {
        let html = self.fetcher.fetch_text(chapter_ref).await?;
        Ok(number_pages(parse_pages(&html, chapter_ref)?))
    }

    async fn resolve_image(&self, page_ref: &str) -> Result<String, ProviderError> {
        let html = self.fetcher.fetch_text(page_ref).await?;
        parse_image(&html)
    }
}
