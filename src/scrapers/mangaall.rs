//! MangaAll (mangaall.net) scraper implementation.
//!
//! Chapter pages do not list their pages; an inline script declares the page
//! count and every page is reached with a `?page=N` query on the chapter URL.

use super::{ChapterEntry, PageEntry, SearchResult, SiteProvider, number_chapters, number_pages};
use crate::error::ProviderError;
use crate::fetcher::Fetcher;
use crate::utils::{required_attr, resolve_url, select_first, url_with_query};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::{Arc, LazyLock};
use tracing::debug;

const SITE_URL: &str = "http://mangaall.net";

static PAGE_TOTAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"var _page_total = '(\d+)';").unwrap());

struct Selectors {
    search_result: Selector,
    link: Selector,
    chapter_link: Selector,
    script: Selector,
    image: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    search_result: Selector::parse("div.mainpage-manga div.media-body").unwrap(),
    link: Selector::parse("a").unwrap(),
    chapter_link: Selector::parse("section#examples a").unwrap(),
    script: Selector::parse("script").unwrap(),
    image: Selector::parse("div.each-page img").unwrap(),
});

pub struct MangaAllProvider {
    fetcher: Arc<Fetcher>,
}

impl MangaAllProvider {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

fn parse_search(html: &str) -> Vec<SearchResult> {
    let doc = Html::parse_document(html);
    doc.select(&SELECTORS.search_result)
        .filter_map(|body| {
            let a = body.select(&SELECTORS.link).next()?;
            let title = a.value().attr("title")?.trim();
            let href = a.value().attr("href")?;
            Some(SearchResult {
                title: title.to_string(),
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
            let title = a.value().attr("title")?.trim();
            let href = a.value().attr("href")?;
            Some((title.to_string(), resolve_url(SITE_URL, href)))
        })
        .collect();
    chapters.reverse();
    chapters
}

/// Reads the page count from the first script declaring one.
fn parse_page_total(html: &str) -> Result<usize, ProviderError> {
    let doc = Html::parse_document(html);
    doc.select(&SELECTORS.script)
        .find_map(|script| {
            let code = script.text().collect::<String>();
            PAGE_TOTAL
                .captures_iter(&code)
                .filter_map(|caps| caps[1].parse::<usize>().ok())
                .last()
        })
        .ok_or_else(|| ProviderError::ElementNotFound("page count script".to_string()))
}

fn page_refs(chapter_ref: &str, total: usize) -> Vec<String> {
    (1..=total)
        .map(|n| format!("{chapter_ref}?page={n}"))
        .collect()
}

fn parse_image(html: &str) -> Result<String, ProviderError> {
    let doc = Html::parse_document(html);
    let img = select_first(&doc, &SELECTORS.image, "page image")?;
    Ok(resolve_url(SITE_URL, required_attr(img, "src", "page image")?))
}

#[async_trait]
impl SiteProvider for MangaAllProvider {
    fn id(&self) -> &str {
        "mangaall"
    }

    fn name(&self) -> &str {
        "MangaAll"
    }

    fn lang(&self) -> &str {
        "en"
    }

    fn site_url(&self) -> &str {
        SITE_URL
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ProviderError> {
        let url = url_with_query(&format!("{SITE_URL}/search/"), &[("q", query)])?;
        let html = self.fetcher.fetch_text(&url).await?;
        Ok(parse_search(&html))
    }

    async fn list_chapters(&self, manga_ref: &str) -> Result<Vec<ChapterEntry>, ProviderError> {
        let html = self.fetcher.fetch_text(manga_ref).await?;
        Ok(number_chapters(parse_chapters(&html)))
    }

    async fn list_pages(&self, chapter_ref: &str) -> Result<Vec<PageEntry>, ProviderError> {
        let html = self.fetcher.fetch_text(chapter_ref).await?;
        let total = parse_page_total(&html)?;
        debug!(chapter = chapter_ref, pages = total, "page count declared");
        Ok(number_pages(page_refs(chapter_ref, total)))
    }

    async fn resolve_image(&self, page_ref: &str) -> Result<String, ProviderError> {
        let html = self.fetcher.fetch_text(page_ref).await?;
        parse_image(&html)
    }
}
