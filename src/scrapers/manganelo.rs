//! MangaNelo (manganelo.com) scraper implementation.
//!
//! Search goes through the site's JSON endpoint; everything else is HTML.
//! Page refs are direct image URLs, so no image resolution step is needed.

use super::{ChapterEntry, PageEntry, SearchResult, SiteProvider, number_chapters, number_pages};
use crate::error::ProviderError;
use crate::fetcher::Fetcher;
use crate::manga::MangaStatus;
use crate::utils::{element_text, resolve_url, select_first, url_with_query};
use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::Deserialize;
use std::sync::{Arc, LazyLock};

const SITE_URL: &str = "https://manganelo.com";

struct Selectors {
    chapter_list: Selector,
    link: Selector,
    reader: Selector,
    image: Selector,
    info_item: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    chapter_list: Selector::parse("div.chapter-list").unwrap(),
    link: Selector::parse("a").unwrap(),
    reader: Selector::parse("div#vungdoc").unwrap(),
    image: Selector::parse("img").unwrap(),
    info_item: Selector::parse("ul.manga-info-text li").unwrap(),
});

/// One hit from the JSON search endpoint.
#[derive(Debug, Deserialize)]
struct SearchHit {
    /// Title with highlight markup.
    name: String,
    /// URL slug of the manga.
    nameunsigned: String,
}

pub struct MangaNeloProvider {
    fetcher: Arc<Fetcher>,
}

impl MangaNeloProvider {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

/// The search endpoint wants words joined by `_`, with punctuation dropped.
fn search_word(query: &str) -> String {
    query
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

fn parse_search(body: &str) -> Result<Vec<SearchResult>, ProviderError> {
    let hits: Vec<SearchHit> =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
    Ok(hits
        .into_iter()
        .map(|hit| {
            let fragment = Html::parse_fragment(&hit.name);
            SearchResult {
                title: element_text(fragment.root_element()),
                url: format!("{SITE_URL}/manga/{}", hit.nameunsigned),
            }
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

fn parse_status(html: &str) -> MangaStatus {
    let doc = Html::parse_document(html);
    let completed = doc
        .select(&SELECTORS.info_item)
        .map(element_text)
        .find(|text| text.to_lowercase().starts_with("status"))
        .is_some_and(|text| text.to_lowercase().contains("completed"));
    if completed {
        MangaStatus::Complete
    } else {
        MangaStatus::Ongoing
    }
}

fn parse_pages(html: &str) -> Result<Vec<String>, ProviderError> {
    let doc = Html::parse_document(html);
    let reader = select_first(&doc, &SELECTORS.reader, "chapter reader")?;
    Ok(reader
        .select(&SELECTORS.image)
        .filter_map(|img| img.value().attr("src"))
        .map(|src| resolve_url(SITE_URL, src))
        .collect())
}

#[async_trait]
impl SiteProvider for MangaNeloProvider {
    fn id(&self) -> &str {
        "manganelo"
    }

    fn name(&self) -> &str {
        "MangaNelo"
    }

    fn lang(&self) -> &str {
        "en"
    }

    fn site_url(&self) -> &str {
        SITE_URL
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ProviderError> {
        let word = search_word(query);
        let url = url_with_query(
            &format!("{SITE_URL}/home_json_search/"),
            &[("search_style", "tentruyen"), ("searchword", &word)],
        )?;
        let body = self.fetcher.fetch_text(&url).await?;
        parse_search(&body)
    }

    async fn list_chapters(&self, manga_ref: &str) -> Result<Vec<ChapterEntry>, ProviderError> {
        let html = self.fetcher.fetch_text(manga_ref).await?;
        Ok(number_chapters(parse_chapters(&html)?))
    }

    async fn series_status(&self, manga_ref: &str) -> Result<MangaStatus, ProviderError> {
        let html = self.fetcher.fetch_text(manga_ref).await?;
        Ok(parse_status(&html))
    }

    async fn list_pages(&self, chapter_ref: &str) -> Result<Vec<PageEntry>, ProviderError> {
        let html = self.fetcher.fetch_text(chapter_ref).await?;
        Ok(number_pages(parse_pages(&html)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_word() {
        assert_eq!(search_word("Fate/Zero: the  movie!"), "Fate_Zero_the_movie");
        assert_eq!(search_word("  "), "");
    }

    #[test]
    fn test_parse_search_strips_markup() {
        let body = r#"[{"name":"<span style=\"color: #FF530D;font-weight: bold;\">One</span> Piece","nameunsigned":"read_one_piece"}]"#;
        let results = parse_search(body).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "One Piece");
        assert_eq!(results[0].url, "https://manganelo.com/manga/read_one_piece");
    }

    #[test]
    fn test_parse_search_rejects_garbage() {
        assert!(matches!(parse_search("<html>"), Err(ProviderError::Parse(_))));
    }

    #[test]
    fn test_parse_chapters_protocol_relative() {
        let html = r#"
            <div class="chapter-list">
              <div class="row"><span><a href="//manganelo.com/chapter/x/chapter_2">Chapter 2</a></span></div>
              <div class="row"><span><a href="https://manganelo.com/chapter/x/chapter_1">Chapter 1</a></span></div>
            </div>"#;
        let chapters = parse_chapters(html).unwrap();
        assert_eq!(chapters[0].0, "Chapter 1");
        assert_eq!(chapters[1].1, "https://manganelo.com/chapter/x/chapter_2");
    }

    #[test]
    fn test_parse_status() {
        let done = r#"<ul class="manga-info-text"><li>Author(s) : Oda</li><li>Status : Completed</li></ul>"#;
        assert_eq!(parse_status(done), MangaStatus::Complete);
        let ongoing = r#"<ul class="manga-info-text"><li>Status : Ongoing</li></ul>"#;
        assert_eq!(parse_status(ongoing), MangaStatus::Ongoing);
        assert_eq!(parse_status("<p></p>"), MangaStatus::Ongoing);
    }

    #[test]
    fn test_parse_pages() {
        let html = r#"
            <div id="vungdoc">
              <img src="https://s8.mkklcdnv8.com/1.jpg"><img src="https://s8.mkklcdnv8.com/2.jpg">
            </div>"#;
        assert_eq!(
            parse_pages(html).unwrap(),
            vec!["https://s8.mkklcdnv8.com/1.jpg", "https://s8.mkklcdnv8.com/2.jpg"]
        );
    }
}
