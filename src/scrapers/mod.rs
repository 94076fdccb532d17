//! Site provider trait and common types for manga sites.
//!
//! This module defines the interface every supported site implements, along
//! with the listing types exchanged with the download session.

mod heavenmanga;
mod mangaall;
mod mangadoor;
mod mangahere;
mod manganelo;
mod mangareader;
mod ninemanga;

pub use heavenmanga::HeavenMangaProvider;
pub use mangaall::MangaAllProvider;
pub use mangadoor::MangaDoorProvider;
pub use mangahere::MangaHereProvider;
pub use manganelo::MangaNeloProvider;
pub use mangareader::MangaReaderProvider;
pub use ninemanga::NineMangaProvider;

use crate::error::ProviderError;
use crate::fetcher::Fetcher;
use crate::manga::MangaStatus;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A manga matched by a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,

    /// Provider handle for the manga, usually its URL.
    pub url: String,
}

/// One entry of a chapter listing, oldest chapter first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterEntry {
    /// 0-based position in the listing.
    pub index: usize,

    pub title: String,

    /// Provider handle used to list the chapter's pages.
    pub chapter_ref: String,
}

/// One page of a chapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageEntry {
    /// 0-based page number.
    pub index: usize,

    /// Image URL, or a handle [`SiteProvider::resolve_image`] turns into one.
    pub page_ref: String,
}

/// Trait for manga site providers.
///
/// Each provider handles one site (or one language of a site) and fetches
/// everything through the shared [`Fetcher`].
#[async_trait]
pub trait SiteProvider: Send + Sync {
    /// Returns the identifier stored in metadata (lowercase, no spaces).
    fn id(&self) -> &str;

    /// Returns the human-readable name of this provider.
    fn name(&self) -> &str;

    /// ISO 639-1 code of the site's language.
    fn lang(&self) -> &str;

    fn site_url(&self) -> &str;

    /// Searches the site for mangas matching `query`.
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ProviderError>;

    /// Lists the chapters of a manga, oldest first.
    async fn list_chapters(&self, manga_ref: &str) -> Result<Vec<ChapterEntry>, ProviderError>;

    /// Publication status of the series. Sites that don't show it report ongoing.
    async fn series_status(&self, _manga_ref: &str) -> Result<MangaStatus, ProviderError> {
        Ok(MangaStatus::Ongoing)
    }

    /// Lists the pages of a chapter in reading order.
    async fn list_pages(&self, chapter_ref: &str) -> Result<Vec<PageEntry>, ProviderError>;

    /// Turns a page ref into a direct image URL.
    async fn resolve_image(&self, page_ref: &str) -> Result<String, ProviderError> {
        Ok(page_ref.to_string())
    }
}

/// Numbers `(title, ref)` pairs into chapter entries, in the given order.
pub fn number_chapters(chapters: impl IntoIterator<Item = (String, String)>) -> Vec<ChapterEntry> {
    chapters
        .into_iter()
        .enumerate()
        .map(|(index, (title, chapter_ref))| ChapterEntry {
            index,
            title,
            chapter_ref,
        })
        .collect()
}

/// Numbers page refs into page entries.
pub fn number_pages(pages: impl IntoIterator<Item = String>) -> Vec<PageEntry> {
    pages
        .into_iter()
        .enumerate()
        .map(|(index, page_ref)| PageEntry { index, page_ref })
        .collect()
}

/// Registry of available site providers.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn SiteProvider>>,
}

impl ProviderRegistry {
    /// Creates a registry with every supported site, all sharing `fetcher`.
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        let mut providers: Vec<Arc<dyn SiteProvider>> = NineMangaProvider::SITES
            .iter()
            .map(|site| {
                Arc::new(NineMangaProvider::new(site, fetcher.clone())) as Arc<dyn SiteProvider>
            })
            .collect();
        providers.push(Arc::new(HeavenMangaProvider::new(fetcher.clone())));
        providers.push(Arc::new(MangaReaderProvider::new(fetcher.clone())));
        providers.push(Arc::new(MangaAllProvider::new(fetcher.clone())));
        providers.push(Arc::new(MangaDoorProvider::new(fetcher.clone())));
        providers.push(Arc::new(MangaNeloProvider::new(fetcher.clone())));
        providers.push(Arc::new(MangaHereProvider::new(fetcher)));

        Self { providers }
    }

    /// Creates a registry from explicit providers.
    pub fn with_providers(providers: Vec<Arc<dyn SiteProvider>>) -> Self {
        Self { providers }
    }

    /// Returns all registered providers.
    pub fn all(&self) -> &[Arc<dyn SiteProvider>] {
        &self.providers
    }

    /// Finds a provider by id, ignoring case.
    pub fn find(&self, id: &str) -> Option<Arc<dyn SiteProvider>> {
        self.providers
            .iter()
            .find(|p| p.id().eq_ignore_ascii_case(id.trim()))
            .cloned()
    }

    /// Providers for a language, or all of them when `lang` is `None`.
    pub fn filter_lang(&self, lang: Option<&str>) -> Vec<Arc<dyn SiteProvider>> {
        self.providers
            .iter()
            .filter(|p| lang.is_none_or(|l| p.lang().eq_ignore_ascii_case(l)))
            .cloned()
            .collect()
    }

    /// Distinct languages offered, sorted.
    pub fn langs(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.lang().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{Attempt, AttemptError, RetryPolicy, Transport};

    struct OfflineTransport;

    #[async_trait]
    impl Transport for OfflineTransport {
        async fn get(&self, _attempt: &Attempt<'_>) -> Result<Vec<u8>, AttemptError> {
            Err(AttemptError::Transient("offline".to_string()))
        }
    }

    fn registry() -> ProviderRegistry {
        let fetcher = Fetcher::new(Arc::new(OfflineTransport), RetryPolicy::immediate(0));
        ProviderRegistry::new(Arc::new(fetcher))
    }

    #[test]
    fn test_registry_contents() {
        let registry = registry();
        assert_eq!(registry.all().len(), 12);

        let ids: BTreeSet<&str> = registry.all().iter().map(|p| p.id()).collect();
        assert_eq!(ids.len(), registry.all().len(), "ids must be unique");
    }

    #[test]
    fn test_find_ignores_case() {
        let registry = registry();
        assert_eq!(registry.find("MangaReader").unwrap().id(), "mangareader");
        assert_eq!(registry.find("ninemanga-br").unwrap().lang(), "pt");
        assert!(registry.find("unknown").is_none());
    }

    #[test]
    fn test_filter_lang_and_langs() {
        let registry = registry();
        let spanish: Vec<String> = registry
            .filter_lang(Some("es"))
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        assert_eq!(spanish, vec!["ninemanga-es", "heavenmanga", "mangadoor"]);
        assert_eq!(registry.filter_lang(None).len(), registry.all().len());
        assert_eq!(registry.langs(), vec!["de", "en", "es", "it", "pt", "ru"]);
    }

    #[test]
    fn test_registry_from_explicit_providers() {
        let fetcher = Arc::new(Fetcher::new(Arc::new(OfflineTransport), RetryPolicy::immediate(0)));
        let providers: Vec<Arc<dyn SiteProvider>> = vec![
            Arc::new(MangaDoorProvider::new(fetcher.clone())),
            Arc::new(MangaAllProvider::new(fetcher)),
        ];
        let registry = ProviderRegistry::with_providers(providers);
        assert_eq!(registry.all().len(), 2);
        assert_eq!(registry.langs(), vec!["en", "es"]);
        assert_eq!(registry.find("MANGAALL").unwrap().name(), "MangaAll");
        assert!(registry.find("mangareader").is_none());
    }

    #[test]
    fn test_number_chapters() {
        let entries = number_chapters(vec![
            ("Ch 1".to_string(), "http://example.com/1".to_string()),
            ("Ch 2".to_string(), "http://example.com/2".to_string()),
        ]);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].index, 1);
        assert_eq!(entries[1].title, "Ch 2");
    }
}
