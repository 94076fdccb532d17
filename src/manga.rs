//! Persisted manga and chapter state.
//!
//! A [`Manga`] owns its chapters. Chapter identity is the 0-based `index` in
//! the provider listing; titles are for display and folder naming only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Publication status of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MangaStatus {
    #[default]
    Ongoing,
    Complete,
}

/// Download status of a chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Failed,
}

/// Last failure recorded for a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterFailure {
    pub reason: String,
    /// The provider said retrying will not help.
    pub permanent: bool,
}

/// One chapter of a manga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// Position in the provider listing. Never renumbered.
    pub index: usize,

    /// Display title.
    pub title: String,

    /// Provider handle used to list the chapter's pages.
    pub source_ref: String,

    /// Folder name inside the manga folder, assigned on first download.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,

    #[serde(default)]
    pub status: ChapterStatus,

    /// Number of pages, once the page listing has been fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,

    /// Cached page refs from the provider, in page order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<String>,

    /// Pages confirmed written to disk, mapped to their file names.
    #[serde(default)]
    pub downloaded_pages: BTreeMap<usize, String>,

    /// Selected by some session; `--continue` picks these up.
    #[serde(default)]
    pub targeted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ChapterFailure>,
}

impl Chapter {
    pub fn new(index: usize, title: impl Into<String>, source_ref: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            source_ref: source_ref.into(),
            folder: None,
            status: ChapterStatus::Pending,
            page_count: None,
            pages: Vec::new(),
            downloaded_pages: BTreeMap::new(),
            targeted: false,
            failure: None,
        }
    }

    /// True when every page in `[0, page_count)` has been recorded.
    pub fn is_fully_downloaded(&self) -> bool {
        match self.page_count {
            Some(count) if count > 0 => {
                self.downloaded_pages.len() == count
                    && self.downloaded_pages.keys().copied().eq(0..count)
            }
            _ => false,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == ChapterStatus::Complete
    }

    /// Page indices still to download, ascending.
    pub fn missing_pages(&self) -> Vec<usize> {
        let count = self.page_count.unwrap_or(0);
        (0..count)
            .filter(|p| !self.downloaded_pages.contains_key(p))
            .collect()
    }

    /// Recomputes `status` from page coverage, keeping `Failed` while pages are missing.
    pub(crate) fn refresh_status(&mut self) {
        if self.is_fully_downloaded() {
            self.status = ChapterStatus::Complete;
            self.failure = None;
        } else if self.status == ChapterStatus::Complete {
            self.status = ChapterStatus::InProgress;
        } else if self.status == ChapterStatus::Pending && !self.downloaded_pages.is_empty() {
            self.status = ChapterStatus::InProgress;
        }
    }

    /// True when `--continue` should pick this chapter up.
    pub fn is_resumable(&self) -> bool {
        self.targeted
            && !self.is_complete()
            && !self.failure.as_ref().is_some_and(|f| f.permanent)
    }
}

/// A series being downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manga {
    pub title: String,

    /// Id of the site provider it came from.
    pub site_id: String,

    /// Provider handle used to re-resolve the series.
    pub source_ref: String,

    #[serde(default)]
    pub status: MangaStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,

    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

impl Manga {
    pub fn new(
        title: impl Into<String>,
        site_id: impl Into<String>,
        source_ref: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            site_id: site_id.into(),
            source_ref: source_ref.into(),
            status: MangaStatus::Ongoing,
            updated_at: None,
            chapters: Vec::new(),
        }
    }

    pub fn chapter(&self, index: usize) -> Option<&Chapter> {
        self.chapters.get(index).filter(|c| c.index == index)
    }

    pub(crate) fn chapter_mut(&mut self, index: usize) -> Option<&mut Chapter> {
        self.chapters.get_mut(index).filter(|c| c.index == index)
    }

    /// True if the same series on the same site.
    pub fn is_same_series(&self, site_id: &str, source_ref: &str) -> bool {
        self.site_id.eq_ignore_ascii_case(site_id) && self.source_ref == source_ref
    }

    /// Chapters that `--continue` would download.
    pub fn pending_chapters(&self) -> impl Iterator<Item = &Chapter> {
        self.chapters.iter().filter(|c| c.is_resumable())
    }

    pub fn has_pending_chapters(&self) -> bool {
        self.pending_chapters().next().is_some()
    }
}

impl std::fmt::Display for Manga {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.title)
    }
}
