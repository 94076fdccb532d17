//! HeavenManga (heavenmanga.com) scraper implementation.
//!
//! Chapter links lead to a cover page; the reader with the page menu sits
//! behind a "read" link on it.

use super::{ChapterEntry, PageEntry, SearchResult, SiteProvider, number_chapters, number_pages};
use crate::error::ProviderError;
use crate::fetcher::Fetcher;
use crate::utils::{element_text, required_attr, resolve_url, select_first};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::sync::{Arc, LazyLock};
use tracing::warn;

const SITE_URL: &str = "http://heavenmanga.com";

/// The site rejects shorter search terms.
const MIN_QUERY_CHARS: usize = 4;

struct Selectors {
    search_result: Selector,
    result_link: Selector,
    result_title: Selector,
    chapter_link: Selector,
    reader_link: Selector,
    page_menu: Selector,
    page_option: Selector,
    image: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    search_result: Selector::parse("div.cont_manga").unwrap(),
    result_link: Selector::parse("a").unwrap(),
    result_title: Selector::parse("header").unwrap(),
    chapter_link: Selector::parse("ul#holder a").unwrap(),
    reader_link: Selector::parse("a#l").unwrap(),
    page_menu: Selector::parse("select").unwrap(),
    page_option: Selector::parse("option").unwrap(),
    image: Selector::parse("img#p").unwrap(),
});

pub struct HeavenMangaProvider {
    fetcher: Arc<Fetcher>,
}

impl HeavenMangaProvider {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

fn search_url(query: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(query.trim().as_bytes()).collect();
    format!("{SITE_URL}/buscar/{encoded}.html")
}

fn parse_search(html: &str) -> Vec<SearchResult> {
    let doc = Html::parse_document(html);
    doc.select(&SELECTORS.search_result)
        .filter_map(|div| {
            let link = div.select(&SELECTORS.result_link).next()?;
            let href = link.value().attr("href")?;
            let title = link
                .select(&SELECTORS.result_title)
                .next()
                .map(element_text)
                .unwrap_or_else(|| element_text(link));
            Some(SearchResult {
                title,
                url: resolve_url(SITE_URL, href),
            })
        })
        .collect()
}

fn parse_chapters(html: &str) -> Vec<(String, String)> {
    let doc = Html::parse_document(html);
    let mut chapters: Vec<(String, String)> = doc
        .select(&SELECTORS.chapter_link)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let title = a
                .value()
                .attr("title")
                .map(str::to_string)
                .unwrap_or_else(|| element_text(a));
            Some((title, resolve_url(SITE_URL, href)))
        })
        .collect();
    chapters.reverse();
    chapters
}

fn parse_reader_link(html: &str) -> Result<String, ProviderError> {
    let doc = Html::parse_document(html);
    let link = select_first(&doc, &SELECTORS.reader_link, "reader link")?;
    Ok(resolve_url(SITE_URL, required_attr(link, "href", "reader link")?))
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
impl SiteProvider for HeavenMangaProvider {
    fn id(&self) -> &str {
        "heavenmanga"
    }

    fn name(&self) -> &str {
        "HeavenManga"
    }

    fn lang(&self) -> &str {
        "es"
    }

    fn site_url(&self) -> &str {
        SITE_URL
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ProviderError> {
        if query.trim().chars().count() < MIN_QUERY_CHARS {
            warn!(%query, "heavenmanga needs at least {MIN_QUERY_CHARS} characters to search");
            return Ok(Vec::new());
        }
        let html = self.fetcher.fetch_text(&search_url(query)).await?;
        Ok(parse_search(&html))
    }

    async fn list_chapters(&self, manga_ref: &str) -> Result<Vec<ChapterEntry>, ProviderError> {
        let html = self.fetcher.fetch_text(manga_ref).await?;
        Ok(number_chapters(parse_chapters(&html)))
    }

    async fn list_pages(&self, chapter_ref: &str) -> Result<Vec<PageEntry>, ProviderError> {
        let html = self.fetcher.fetch_text(chapter_ref).await?;
        let reader = parse_reader_link(&html)?;
        let html = self.fetcher.fetch_text(&reader).await?;
        Ok(number_pages(parse_pages(&html)?))
    }

    async fn resolve_image(&self, page_ref: &str) -> Result<String, ProviderError> {
        let html = self.fetcher.fetch_text(page_ref).await?;
        parse_image(&html)
    }
}
