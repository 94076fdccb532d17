//! smd - manga downloader.
//!
//! This library provides functionality for:
//! - Searching and scraping manga sites (NineManga, MangaReader, MangaNelo, ...)
//! - Selecting chapters with compact expressions like `0:10,!5`
//! - Resumable downloads tracked in a per-manga metadata file

pub mod config;
pub mod console;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod manga;
pub mod metadata;
pub mod naming;
pub mod scrapers;
pub mod selector;
pub mod session;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use console::Console;
pub use error::{
    ConfigError, FetchError, MetadataError, ProviderError, SelectionError, SessionError,
};
pub use fetcher::{Fetcher, RetryPolicy};
pub use manga::{Chapter, ChapterStatus, Manga, MangaStatus};
pub use metadata::MetadataStore;
pub use scrapers::{ProviderRegistry, SearchResult, SiteProvider};
pub use selector::{ChapterSelection, select};
pub use session::{
    CancelFlag, DownloadSession, MangaRef, SessionMode, SessionRequest, SessionResult,
};
