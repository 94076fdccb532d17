//! Folder-local metadata store.
//!
//! Each manga folder holds a `manga.json` describing the series and the
//! download state of every chapter. The store is the single source of truth
//! for what has already been downloaded: every mutation is written through
//! immediately, and every write goes to a temporary file that is renamed over
//! the previous one, so a crash mid-write leaves the last good state intact.

use crate::error::MetadataError;
use crate::manga::{Chapter, ChapterFailure, ChapterStatus, Manga, MangaStatus};
use crate::scrapers::ChapterEntry;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, trace};

/// Metadata filename inside a manga folder.
pub const METADATA_FILE: &str = "manga.json";

/// Temporary file used while replacing the metadata file.
const TEMP_FILE: &str = ".manga.json.tmp";

/// Current on-disk format version.
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct MetadataFileRef<'a> {
    version: u32,
    manga: &'a Manga,
}

#[derive(Deserialize)]
struct MetadataFile {
    version: u32,
    manga: Manga,
}

/// Returns true if `folder` contains manga metadata.
pub fn is_manga_folder(folder: &Path) -> bool {
    folder.join(METADATA_FILE).is_file()
}

/// Finds every manga folder directly inside `root`, sorted by path.
pub fn find_manga_folders(root: &Path) -> Result<Vec<PathBuf>, MetadataError> {
    let io_err = |source| MetadataError::Io {
        folder: root.to_path_buf(),
        source,
    };
    let mut folders = Vec::new();
    for entry in fs::read_dir(root).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_dir() && is_manga_folder(&path) {
            folders.push(path);
        }
    }
    folders.sort();
    Ok(folders)
}

/// Chapters added by [`MetadataStore::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciled {
    /// Indices appended because the listing grew.
    pub new_chapters: Vec<usize>,
    /// Chapters the store knows about but the listing no longer has.
    pub missing_from_listing: usize,
}

/// Metadata for one manga folder. Single writer: hold it by `&mut`.
#[derive(Debug)]
pub struct MetadataStore {
    folder: PathBuf,
    manga: Manga,
    /// What `manga.json` currently holds, `None` before the first write.
    persisted: Option<Manga>,
}

impl MetadataStore {
    /// Reads the manga stored in `folder`.
    ///
    /// Returns `Ok(None)` when the folder has no metadata file, meaning the
    /// manga is new. An unreadable file is [`MetadataError::Corrupt`].
    pub fn load(folder: &Path) -> Result<Option<Manga>, MetadataError> {
        let path = folder.join(METADATA_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Err(MetadataError::Corrupt {
                    folder: folder.to_path_buf(),
                    message: e.to_string(),
                });
            }
            Err(source) => {
                return Err(MetadataError::Io {
                    folder: folder.to_path_buf(),
                    source,
                });
            }
        };

        let file: MetadataFile =
            serde_json::from_str(&content).map_err(|e| MetadataError::Corrupt {
                folder: folder.to_path_buf(),
                message: e.to_string(),
            })?;

        if file.version > FORMAT_VERSION {
            return Err(MetadataError::Corrupt {
                folder: folder.to_path_buf(),
                message: format!("unsupported metadata version {}", file.version),
            });
        }

        validate_indices(folder, &file.manga)?;
        Ok(Some(file.manga))
    }

    /// Opens the store of an existing manga folder.
    pub fn open(folder: &Path) -> Result<Option<Self>, MetadataError> {
        Ok(Self::load(folder)?.map(|manga| Self {
            folder: folder.to_path_buf(),
            persisted: Some(manga.clone()),
            manga,
        }))
    }

    /// Creates a store for a new manga and writes it out.
    pub fn create(folder: &Path, manga: Manga) -> Result<Self, MetadataError> {
        let mut store = Self {
            folder: folder.to_path_buf(),
            manga,
            persisted: None,
        };
        store.save()?;
        Ok(store)
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn manga(&self) -> &Manga {
        &self.manga
    }

    /// Writes the current state, replacing the previous file atomically.
    ///
    /// Does nothing when the state equals what was last written, so the file
    /// and its `updated_at` stamp only change along with the content.
    pub fn save(&mut self) -> Result<(), MetadataError> {
        if self.persisted.as_ref() == Some(&self.manga) {
            trace!(folder = %self.folder.display(), "metadata unchanged");
            return Ok(());
        }
        self.manga.updated_at = OffsetDateTime::now_utc().format(&Rfc3339).ok();

        let content = serde_json::to_string_pretty(&MetadataFileRef {
            version: FORMAT_VERSION,
            manga: &self.manga,
        })
        .map_err(|e| self.io_error(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let temp_path = self.folder.join(TEMP_FILE);
        let final_path = self.folder.join(METADATA_FILE);

        let write = || -> io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            // Data must be on disk before the rename makes it visible.
            file.sync_all()?;
            fs::rename(&temp_path, &final_path)
        };
        write().map_err(|e| self.io_error(e))?;
        self.persisted = Some(self.manga.clone());

        trace!(folder = %self.folder.display(), "metadata saved");
        Ok(())
    }

    /// Merges a fresh provider listing into the stored chapters.
    ///
    /// Existing indices keep their state, title and folder; only their
    /// provider handle is refreshed. Chapters past the stored ones are
    /// appended. Nothing is renumbered or removed. Not persisted until the
    /// next [`save`](Self::save).
    pub fn reconcile(&mut self, listing: &[ChapterEntry]) -> Reconciled {
        let known = self.manga.chapters.len();
        let mut new_chapters = Vec::new();

        for (position, entry) in listing.iter().enumerate() {
            if let Some(chapter) = self.manga.chapters.get_mut(position) {
                if chapter.source_ref != entry.chapter_ref {
                    debug!(index = position, "chapter reference changed");
                    chapter.source_ref = entry.chapter_ref.clone();
                }
            } else {
                self.manga
                    .chapters
                    .push(Chapter::new(position, &entry.title, &entry.chapter_ref));
                new_chapters.push(position);
            }
        }

        Reconciled {
            new_chapters,
            missing_from_listing: known.saturating_sub(listing.len()),
        }
    }

    /// Sets the series status. Not persisted until the next save.
    pub fn set_manga_status(&mut self, status: MangaStatus) {
        self.manga.status = status;
    }

    /// Marks chapters as selected by a session. Not persisted until the next save.
    pub fn set_targeted(&mut self, indices: &[usize]) -> Result<(), MetadataError> {
        for &index in indices {
            self.chapter_mut(index)?.targeted = true;
        }
        Ok(())
    }

    /// Records the folder name assigned to a chapter and persists it.
    pub fn assign_folder(&mut self, index: usize, folder: &str) -> Result<(), MetadataError> {
        self.chapter_mut(index)?.folder = Some(folder.to_string());
        self.save()
    }

    /// Stores the page listing of a chapter and persists it.
    ///
    /// Recorded pages beyond the new page count are dropped.
    pub fn set_pages(&mut self, index: usize, pages: Vec<String>) -> Result<(), MetadataError> {
        let chapter = self.chapter_mut(index)?;
        let count = pages.len();
        chapter.page_count = Some(count);
        chapter.pages = pages;
        chapter.downloaded_pages.retain(|&p, _| p < count);
        if chapter.status == ChapterStatus::Pending {
            chapter.status = ChapterStatus::InProgress;
        }
        chapter.refresh_status();
        self.save()
    }

    /// Marks a page as written to disk and persists immediately.
    ///
    /// Returns the chapter status afterwards; it becomes `Complete` once the
    /// recorded pages cover the whole chapter.
    pub fn record_page(
        &mut self,
        index: usize,
        page: usize,
        file_name: &str,
    ) -> Result<ChapterStatus, MetadataError> {
        let chapter = self.chapter_mut(index)?;
        chapter.downloaded_pages.insert(page, file_name.to_string());
        if chapter.status == ChapterStatus::Pending {
            chapter.status = ChapterStatus::InProgress;
        }
        chapter.refresh_status();
        let status = chapter.status;
        self.save()?;
        Ok(status)
    }

    /// Forgets recorded pages, e.g. because their files disappeared.
    pub fn forget_pages(&mut self, index: usize, pages: &[usize]) -> Result<(), MetadataError> {
        if pages.is_empty() {
            return Ok(());
        }
        let chapter = self.chapter_mut(index)?;
        for page in pages {
            chapter.downloaded_pages.remove(page);
        }
        chapter.refresh_status();
        self.save()
    }

    /// Marks a chapter failed, keeping the pages already downloaded.
    pub fn mark_chapter_failed(
        &mut self,
        index: usize,
        reason: &str,
        permanent: bool,
    ) -> Result<(), MetadataError> {
        let chapter = self.chapter_mut(index)?;
        chapter.status = ChapterStatus::Failed;
        chapter.failure = Some(ChapterFailure {
            reason: reason.to_string(),
            permanent,
        });
        self.save()
    }

    fn chapter_mut(&mut self, index: usize) -> Result<&mut Chapter, MetadataError> {
        self.manga
            .chapter_mut(index)
            .ok_or(MetadataError::UnknownChapter(index))
    }

    fn io_error(&self, source: io::Error) -> MetadataError {
        MetadataError::Io {
            folder: self.folder.clone(),
            source,
        }
    }
}

/// Chapters must sit at the position matching their index.
fn validate_indices(folder: &Path, manga: &Manga) -> Result<(), MetadataError> {
    for (position, chapter) in manga.chapters.iter().enumerate() {
        if chapter.index != position {
            return Err(MetadataError::Corrupt {
                folder: folder.to_path_buf(),
                message: format!(
                    "chapter at position {position} has index {}",
                    chapter.index
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn listing(n: usize) -> Vec<ChapterEntry> {
        (0..n)
            .map(|i| ChapterEntry {
                index: i,
                title: format!("Chapter {}", i + 1),
                chapter_ref: format!("http://example.com/c{}", i + 1),
            })
            .collect()
    }

    fn new_store(dir: &TempDir, chapters: usize) -> MetadataStore {
        let manga = Manga::new("Test Manga", "mock", "http://example.com/manga");
        let mut store = MetadataStore::create(dir.path(), manga).unwrap();
        store.reconcile(&listing(chapters));
        store.save().unwrap();
        store
    }

    #[test]
    fn test_load_absent_is_new() {
        let dir = TempDir::new().unwrap();
        assert!(MetadataStore::load(dir.path()).unwrap().is_none());
        assert!(MetadataStore::open(dir.path()).unwrap().is_none());
        assert!(!is_manga_folder(dir.path()));
    }

    #[test]
    fn test_save_then_load_is_identical() {
        let dir = TempDir::new().unwrap();
        let mut store = new_store(&dir, 3);
        store.set_targeted(&[0, 2]).unwrap();
        store.set_pages(0, vec!["p1".into(), "p2".into()]).unwrap();
        store.record_page(0, 0, "1.jpg").unwrap();
        store.mark_chapter_failed(2, "timeout", false).unwrap();

        let loaded = MetadataStore::load(dir.path()).unwrap().unwrap();
        assert_eq!(&loaded, store.manga());
        assert!(is_manga_folder(dir.path()));
    }

    #[test]
    fn test_unchanged_state_is_not_rewritten() {
        let dir = TempDir::new().unwrap();
        let mut store = new_store(&dir, 2);
        store.set_targeted(&[0]).unwrap();
        store.save().unwrap();
        let before = fs::read(dir.path().join(METADATA_FILE)).unwrap();

        let mut reopened = MetadataStore::open(dir.path()).unwrap().unwrap();
        assert!(reopened.reconcile(&listing(2)).new_chapters.is_empty());
        reopened.set_targeted(&[0]).unwrap();
        reopened.save().unwrap();
        assert_eq!(fs::read(dir.path().join(METADATA_FILE)).unwrap(), before);

        reopened.set_targeted(&[1]).unwrap();
        reopened.save().unwrap();
        assert_ne!(fs::read(dir.path().join(METADATA_FILE)).unwrap(), before);
        assert!(MetadataStore::load(dir.path()).unwrap().unwrap().chapters[1].targeted);
    }

    #[test]
    fn test_record_page_completes_chapter() {
        let dir = TempDir::new().unwrap();
        let mut store = new_store(&dir, 1);
        store
            .set_pages(0, vec!["a".into(), "b".into(), "c".into()])
            .unwrap();

        assert_eq!(store.record_page(0, 2, "3.png").unwrap(), ChapterStatus::InProgress);
        assert_eq!(store.record_page(0, 0, "1.png").unwrap(), ChapterStatus::InProgress);
        assert_eq!(store.record_page(0, 1, "2.png").unwrap(), ChapterStatus::Complete);

        // Persisted immediately.
        let loaded = MetadataStore::load(dir.path()).unwrap().unwrap();
        assert!(loaded.chapter(0).unwrap().is_complete());
    }

    #[test]
    fn test_failed_chapter_keeps_pages() {
        let dir = TempDir::new().unwrap();
        let mut store = new_store(&dir, 1);
        store.set_pages(0, vec!["a".into(), "b".into()]).unwrap();
        store.record_page(0, 0, "1.png").unwrap();
        store.mark_chapter_failed(0, "gave up", false).unwrap();

        let loaded = MetadataStore::load(dir.path()).unwrap().unwrap();
        let chapter = loaded.chapter(0).unwrap();
        assert_eq!(chapter.status, ChapterStatus::Failed);
        assert!(chapter.downloaded_pages.contains_key(&0));
        assert_eq!(chapter.missing_pages(), vec![1]);
        assert_eq!(chapter.failure.as_ref().unwrap().reason, "gave up");
    }

    #[test]
    fn test_reconcile_preserves_indices_and_appends() {
        let dir = TempDir::new().unwrap();
        let mut store = new_store(&dir, 2);
        store.assign_folder(1, "Chapter 2").unwrap();

        let mut grown = listing(4);
        grown[0].chapter_ref = "http://mirror.example.com/c1".to_string();
        let reconciled = store.reconcile(&grown);

        assert_eq!(reconciled.new_chapters, vec![2, 3]);
        let manga = store.manga();
        assert_eq!(manga.chapters.len(), 4);
        assert_eq!(manga.chapters[0].source_ref, "http://mirror.example.com/c1");
        assert_eq!(manga.chapters[1].folder.as_deref(), Some("Chapter 2"));
        assert!(manga.chapters.iter().enumerate().all(|(i, c)| c.index == i));
    }

    #[test]
    fn test_reconcile_never_removes() {
        let dir = TempDir::new().unwrap();
        let mut store = new_store(&dir, 3);
        let reconciled = store.reconcile(&listing(2));
        assert!(reconciled.new_chapters.is_empty());
        assert_eq!(reconciled.missing_from_listing, 1);
        assert_eq!(store.manga().chapters.len(), 3);
    }

    #[test]
    fn test_set_pages_drops_out_of_range_records() {
        let dir = TempDir::new().unwrap();
        let mut store = new_store(&dir, 1);
        store
            .set_pages(0, vec!["a".into(), "b".into(), "c".into()])
            .unwrap();
        store.record_page(0, 2, "3.png").unwrap();
        store.set_pages(0, vec!["a".into(), "b".into()]).unwrap();
        assert!(store.manga().chapter(0).unwrap().downloaded_pages.is_empty());
    }

    #[test]
    fn test_forget_pages_reopens_chapter() {
        let dir = TempDir::new().unwrap();
        let mut store = new_store(&dir, 1);
        store.set_pages(0, vec!["a".into()]).unwrap();
        store.record_page(0, 0, "1.png").unwrap();
        store.forget_pages(0, &[0]).unwrap();

        let chapter = store.manga().chapter(0).unwrap();
        assert_eq!(chapter.status, ChapterStatus::InProgress);
        assert_eq!(chapter.missing_pages(), vec![0]);
    }

    #[test]
    fn test_unknown_chapter() {
        let dir = TempDir::new().unwrap();
        let mut store = new_store(&dir, 1);
        assert!(matches!(
            store.record_page(5, 0, "1.png"),
            Err(MetadataError::UnknownChapter(5))
        ));
    }

    #[test]
    fn test_corrupt_file_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(METADATA_FILE), "{\"version\": 1, \"manga\": {").unwrap();
        let err = MetadataStore::load(dir.path()).unwrap_err();
        assert!(matches!(err, MetadataError::Corrupt { .. }));
        assert!(err.to_string().contains(&dir.path().display().to_string()));
    }

    #[test]
    fn test_misnumbered_chapters_are_corrupt() {
        let dir = TempDir::new().unwrap();
        let mut manga = Manga::new("T", "mock", "ref");
        manga.chapters.push(Chapter::new(1, "x", "y"));
        let mut store = MetadataStore {
            folder: dir.path().to_path_buf(),
            manga,
            persisted: None,
        };
        store.save().unwrap();
        assert!(matches!(
            MetadataStore::load(dir.path()),
            Err(MetadataError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_interrupted_write_keeps_previous_state() {
        let dir = TempDir::new().unwrap();
        let mut store = new_store(&dir, 2);
        store.set_targeted(&[1]).unwrap();
        store.save().unwrap();
        let good = store.manga().clone();

        // A crash mid-save leaves a truncated temp file behind.
        fs::write(dir.path().join(TEMP_FILE), "{\"version\": 1, \"man").unwrap();

        let loaded = MetadataStore::load(dir.path()).unwrap().unwrap();
        assert_eq!(loaded, good);

        // The next save replaces the stale temp file.
        store.set_targeted(&[0]).unwrap();
        store.save().unwrap();
        assert!(!dir.path().join(TEMP_FILE).exists());
    }

    #[test]
    fn test_find_manga_folders() {
        let root = TempDir::new().unwrap();
        for name in ["b", "a"] {
            let folder = root.path().join(name);
            fs::create_dir(&folder).unwrap();
            MetadataStore::create(&folder, Manga::new(name, "mock", name)).unwrap();
        }
        fs::create_dir(root.path().join("not-a-manga")).unwrap();

        let found = find_manga_folders(root.path()).unwrap();
        assert_eq!(found, vec![root.path().join("a"), root.path().join("b")]);
    }
}
