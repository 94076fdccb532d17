//! Error types for smd.
//!
//! Uses `thiserror` for structured error definitions. Each concern gets its
//! own enum so callers can decide at which boundary an error stops.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while parsing or evaluating a chapter selection expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// A token could not be parsed. The whole expression is rejected.
    #[error("Invalid chapter selector: '{token}'")]
    Syntax { token: String },

    /// The expression was valid but selected nothing.
    #[error("Chapter selection '{expression}' did not select any chapters")]
    Empty { expression: String },
}

/// Errors raised by the fetcher.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Every attempt failed with a transient error.
    #[error("Giving up on {url} after {attempts} attempts: {cause}")]
    Exhausted {
        url: String,
        attempts: u32,
        cause: String,
    },

    /// The request failed in a way a retry cannot fix (4xx, malformed response).
    #[error("Request to {url} failed: {cause}")]
    Permanent {
        url: String,
        status: Option<u16>,
        cause: String,
    },

    /// The URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl FetchError {
    /// Returns true when retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Exhausted { .. })
    }
}

/// Error type for site provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The underlying request failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The required element isn't found in HTML
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// The page was found but its content could not be interpreted
    #[error("Failed to parse page: {0}")]
    Parse(String),

    /// Manga or chapter removed from the site
    #[error("Not found: {0}")]
    NotFound(String),

    /// The provider doesn't support this reference
    #[error("Unsupported reference: {0}")]
    Unsupported(String),
}

impl ProviderError {
    /// Returns true when the provider marks the failure as permanent.
    ///
    /// Markup changes are treated as transient: sites sometimes serve
    /// interstitial pages that parse as garbage.
    pub fn is_permanent(&self) -> bool {
        match self {
            ProviderError::Fetch(e) => !e.is_transient(),
            ProviderError::NotFound(_) | ProviderError::Unsupported(_) => true,
            ProviderError::ElementNotFound(_) | ProviderError::Parse(_) => false,
        }
    }
}

/// Errors raised by the metadata store.
#[derive(Error, Debug)]
pub enum MetadataError {
    /// The metadata file exists but cannot be interpreted.
    #[error("Metadata in '{}' is corrupt: {message}", .folder.display())]
    Corrupt { folder: PathBuf, message: String },

    /// Reading or writing the metadata file failed.
    #[error("Metadata I/O error in '{}': {source}", .folder.display())]
    Io {
        folder: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A chapter index unknown to the stored manga was referenced.
    #[error("Unknown chapter index {0}")]
    UnknownChapter(usize),
}

/// Error type for configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config: {0}")]
    ParseError(String),

    /// Invalid configuration value
    #[error("Invalid config value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Config directory not found
    #[error("Could not determine config directory")]
    NoConfigDir,
}

/// Errors that end a session for one manga.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The selection expression was rejected before any work started.
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// The stored metadata is unreadable or could not be written.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// The provider failed while resolving the manga.
    #[error("Could not resolve manga: {0}")]
    Provider(#[source] ProviderError),

    /// The folder holds no manga metadata.
    #[error("No manga found in '{}'", .0.display())]
    NotAManga(PathBuf),

    /// The manga belongs to a different site than the given provider.
    #[error("Manga belongs to site '{expected}', not '{actual}'")]
    SiteMismatch { expected: String, actual: String },

    /// Creating a manga or chapter folder failed.
    #[error("Failed to create folder '{}': {source}", .path.display())]
    Folder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
