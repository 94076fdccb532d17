//! NineManga scraper, one provider per language subdomain.

use super::{ChapterEntry, PageEntry, SearchResult, SiteProvider, number_chapters, number_pages};
use crate::error::ProviderError;
use crate::fetcher::Fetcher;
use crate::utils::{element_text, required_attr, resolve_url, select_first, url_with_query};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// CSS selectors used for parsing.
struct Selectors {
    search_result: Selector,
    search_pages: Selector,
    adult_warning: Selector,
    chapter_list: Selector,
    chapter_link: Selector,
    page_menu: Selector,
    page_option: Selector,
    image: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    search_result: Selector::parse("ul.direlist a.bookname").unwrap(),
    search_pages: Selector::parse("ul.pagelist a").unwrap(),
    adult_warning: Selector::parse("div.warning a").unwrap(),
    chapter_list: Selector::parse("div.silde").unwrap(),
    chapter_link: Selector::parse("a.chapter_list_a").unwrap(),
    page_menu: Selector::parse("select#page").unwrap(),
    page_option: Selector::parse("option").unwrap(),
    image: Selector::parse("img.manga_pic").unwrap(),
});

/// What a manga page turned out to be.
#[derive(Debug, PartialEq, Eq)]
enum MangaPage {
    /// An adult-content interstitial linking to the real listing.
    Warning(String),
    /// The chapter listing, oldest first.
    Chapters(Vec<(String, String)>),
}

/// Provider for `{site}.ninemanga.com`.
pub struct NineMangaProvider {
    id: String,
    name: String,
    lang: String,
    site_url: String,
    fetcher: Arc<Fetcher>,
}

impl NineMangaProvider {
    /// Subdomains served by NineManga.
    pub const SITES: &'static [&'static str] = &["en", "es", "ru", "de", "it", "br"];

    /// Creates the provider for one subdomain. `br` is the Portuguese site.
    pub fn new(site: &str, fetcher: Arc<Fetcher>) -> Self {
        let lang = if site == "br" { "pt" } else { site };
        Self {
            id: format!("ninemanga-{site}"),
            name: format!("NineManga ({site})"),
            lang: lang.to_string(),
            site_url: format!("http://{site}.ninemanga.com"),
            fetcher,
        }
    }
}

fn parse_search(html: &str, base: &str) -> (Vec<SearchResult>, Vec<String>) {
    let doc = Html::parse_document(html);
    let results = doc
        .select(&SELECTORS.search_result)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            Some(SearchResult {
                title: element_text(a),
                url: resolve_url(base, href),
            })
        })
        .collect();

    // The pager starts with the current page and ends with "next".
    let links: Vec<String> = doc
        .select(&SELECTORS.search_pages)
        .filter_map(|a| a.value().attr("href"))
        .map(|href| resolve_url(base, href))
        .collect();
    let extra_pages = if links.len() > 2 {
        links[1..links.len() - 1].to_vec()
    } else {
        Vec::new()
    };

    (results, extra_pages)
}

fn parse_manga_page(html: &str, base: &str) -> Result<MangaPage, ProviderError> {
    let doc = Html::parse_document(html);
    if let Some(link) = doc.select(&SELECTORS.adult_warning).next() {
        let href = required_attr(link, "href", "adult warning link")?;
        return Ok(MangaPage::Warning(resolve_url(base, href)));
    }

    let list = select_first(&doc, &SELECTORS.chapter_list, "chapter list")?;
    let mut chapters: Vec<(String, String)> = list
        .select(&SELECTORS.chapter_link)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let title = a
                .value()
                .attr("title")
                .map(str::to_string)
                .unwrap_or_else(|| element_text(a));
            Some((title, resolve_url(base, href)))
        })
        .collect();
    // Listed newest first.
    chapters.reverse();
    Ok(MangaPage::Chapters(chapters))
}

fn parse_pages(html: &str, base: &str) -> Result<Vec<String>, ProviderError> {
    let doc = Html::parse_document(html);
    let menu = select_first(&doc, &SELECTORS.page_menu, "page menu")?;
    Ok(menu
        .select(&SELECTORS.page_option)
        .filter_map(|opt| opt.value().attr("value"))
        .map(|value| resolve_url(base, value))
        .collect())
}

fn parse_image(html: &str, base: &str) -> Result<String, ProviderError> {
    let doc = Html::parse_document(html);
    let img = select_first(&doc, &SELECTORS.image, "page image")?;
    Ok(resolve_url(base, required_attr(img, "src", "page image")?))
}

#[async_trait]
impl SiteProvider for NineMangaProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn lang(&self) -> &str {
        &self.lang
    }

    fn site_url(&self) -> &str {
        &self.site_url
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ProviderError> {
        let url = url_with_query(&format!("{}/search/", self.site_url), &[("wd", query)])?;
        let html = self.fetcher.fetch_text(&url).await?;
        let (mut results, extra_pages) = parse_search(&html, &self.site_url);

        for page in extra_pages {
            debug!(provider = %self.id, %page, "fetching more search results");
            let html = self.fetcher.fetch_text(&page).await?;
            results.extend(parse_search(&html, &self.site_url).0);
        }
        Ok(results)
    }

    async fn list_chapters(&self, manga_ref: &str) -> Result<Vec<ChapterEntry>, ProviderError> {
        let html = self.fetcher.fetch_text(manga_ref).await?;
        let page = parse_manga_page(&html, &self.site_url)?;
        let chapters = match page {
            MangaPage::Chapters(chapters) => chapters,
            MangaPage::Warning(url) => {
                let html = self.fetcher.fetch_text(&url).await?;
                match parse_manga_page(&html, &self.site_url)? {
                    MangaPage::Chapters(chapters) => chapters,
                    MangaPage::Warning(_) => {
                        return Err(ProviderError::Parse(
                            "adult warning shown twice".to_string(),
                        ));
                    }
                }
            }
        };
        Ok(number_chapters(chapters))
    }

    async fn list_pages(&self, chapter_ref: &str) -> Result<Vec<PageEntry>, ProviderError> {
        let html = self.fetcher.fetch_text(chapter_ref).await?;
        Ok(number_pages(parse_pages(&html, &self.site_url)?))
    }

    async fn resolve_image(&self, page_ref: &str) -> Result<String, ProviderError> {
        let html = self.fetcher.fetch_text(page_ref).await?;
        parse_image(&html, &self.site_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::testing::MapTransport;

    const BASE: &str = "http://en.ninemanga.com";

    #[test]
    fn test_parse_search() {
        let html = r#"
            <ul class="direlist">
              <li><a class="bookname" href="http://en.ninemanga.com/manga/One+Piece.html">One Piece</a></li>
              <li><a class="bookname" href="/manga/One+Punch-Man.html"> One Punch-Man </a></li>
            </ul>
            <ul class="pagelist">
              <a href="/search/?wd=one&page=1">1</a>
              <a href="/search/?wd=one&page=2">2</a>
              <a href="/search/?wd=one&page=2">Next</a>
            </ul>"#;
        let (results, extra) = parse_search(html, BASE);
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].title, "One Punch-Man");
        assert_eq!(results[1].url, "http://en.ninemanga.com/manga/One+Punch-Man.html");
        assert_eq!(extra, vec!["http://en.ninemanga.com/search/?wd=one&page=2"]);
    }

    #[test]
    fn test_parse_manga_page_reverses_listing() {
        let html = r#"
            <div class="silde">
              <a class="chapter_list_a" title="Berserk 2" href="/chapter/Berserk/2.html">2</a>
              <a class="chapter_list_a" title="Berserk 1" href="/chapter/Berserk/1.html">1</a>
            </div>"#;
        let page = parse_manga_page(html, BASE).unwrap();
        assert_eq!(
            page,
            MangaPage::Chapters(vec![
                (
                    "Berserk 1".to_string(),
                    "http://en.ninemanga.com/chapter/Berserk/1.html".to_string()
                ),
                (
                    "Berserk 2".to_string(),
                    "http://en.ninemanga.com/chapter/Berserk/2.html".to_string()
                ),
            ])
        );
    }

    #[test]
    fn test_parse_manga_page_warning() {
        let html = r#"<div class="warning"><a href="/manga/X.html?waring=1">Continue</a></div>"#;
        assert_eq!(
            parse_manga_page(html, BASE).unwrap(),
            MangaPage::Warning("http://en.ninemanga.com/manga/X.html?waring=1".to_string())
        );
    }

    #[test]
    fn test_parse_manga_page_missing_list() {
        assert!(matches!(
            parse_manga_page("<html></html>", BASE),
            Err(ProviderError::ElementNotFound(_))
        ));
    }

    #[test]
    fn test_parse_pages_and_image() {
        let html = r#"
            <select id="page">
              <option value="/chapter/X/1.html">1/2</option>
              <option value="/chapter/X/1-2.html">2/2</option>
            </select>"#;
        assert_eq!(
            parse_pages(html, BASE).unwrap(),
            vec![
                "http://en.ninemanga.com/chapter/X/1.html",
                "http://en.ninemanga.com/chapter/X/1-2.html"
            ]
        );

        let html = r#"<img class="manga_pic" src="http://img.ninemanga.com/1.jpg">"#;
        assert_eq!(parse_image(html, BASE).unwrap(), "http://img.ninemanga.com/1.jpg");
    }

    #[test]
    fn test_brazilian_site_is_portuguese() {
        let provider = NineMangaProvider::new("br", MapTransport::new().fetcher());
        assert_eq!(provider.id(), "ninemanga-br");
        assert_eq!(provider.lang(), "pt");
        assert_eq!(provider.site_url(), "http://br.ninemanga.com");
    }

    #[tokio::test]
    async fn test_list_chapters_follows_adult_warning() {
        let transport = MapTransport::new();
        transport.route(
            "http://en.ninemanga.com/manga/X.html",
            r#"<div class="warning"><a href="/manga/X.html?waring=1">Continue</a></div>"#,
        );
        transport.route(
            "http://en.ninemanga.com/manga/X.html?waring=1",
            r#"<div class="silde"><a class="chapter_list_a" title="X 1" href="/chapter/X/1.html">1</a></div>"#,
        );
        let provider = NineMangaProvider::new("en", transport.fetcher());

        let chapters = provider
            .list_chapters("http://en.ninemanga.com/manga/X.html")
            .await
            .unwrap();
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "X 1");
        assert_eq!(transport.requests().len(), 2);
    }
}
