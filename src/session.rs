//! Download session for one manga.
//!
//! A session resolves the manga's chapter listing, reconciles it with the
//! stored metadata, picks the chapters to work on and downloads them one page
//! at a time. Every saved page is recorded before the next one is fetched, so
//! an interrupted session resumes at page granularity.
//!
//! Chapter failures are recorded and the session moves on. Only unreadable or
//! unwritable metadata aborts a session.

use crate::error::{MetadataError, ProviderError, SessionError};
use crate::fetcher::{FetchKind, Fetcher};
use crate::manga::{ChapterStatus, Manga, MangaStatus};
use crate::metadata::MetadataStore;
use crate::naming::{
    image_extension, negotiate_chapter_folder, negotiate_manga_folder, page_file_name,
    write_file_atomically,
};
use crate::scrapers::SiteProvider;
use crate::selector::ChapterSelection;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// How the chapters of a session are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Chapters named by the selection expression.
    New,
    /// Chapters targeted earlier and not yet complete.
    Continue,
    /// Chapters that appeared since the last run.
    Update,
}

/// What to download.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub selection: ChapterSelection,
    pub mode: SessionMode,
}

impl SessionRequest {
    pub fn new(selection: ChapterSelection) -> Self {
        Self {
            selection,
            mode: SessionMode::New,
        }
    }

    pub fn resume() -> Self {
        Self {
            selection: ChapterSelection::all(),
            mode: SessionMode::Continue,
        }
    }

    pub fn update() -> Self {
        Self {
            selection: ChapterSelection::all(),
            mode: SessionMode::Update,
        }
    }
}

/// The manga a session works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MangaRef {
    /// A search result not necessarily downloaded before.
    Remote { title: String, url: String },
    /// A folder holding manga metadata.
    Local(PathBuf),
}

/// Progress reported while a session runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent<'a> {
    Resolving { title: &'a str },
    ChaptersListed { total: usize, new: usize },
    Selected { count: usize },
    ChapterStarted { index: usize, title: &'a str, pages: usize },
    PageSaved { index: usize, page: usize, pages: usize },
    ChapterSkipped { index: usize, title: &'a str },
    ChapterCompleted { index: usize, title: &'a str },
    ChapterFailed { index: usize, title: &'a str, reason: &'a str },
}

/// Receives session progress.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: SessionEvent<'_>);
}

/// Discards all progress.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn on_event(&self, _event: SessionEvent<'_>) {}
}

/// Shared flag asking running sessions to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Cancels and returns whether cancellation had already been requested.
    pub fn cancel_again(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }
}

/// Outcome of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionResult {
    pub title: String,
    pub folder: PathBuf,
    /// Chapters completed by this session.
    pub completed: Vec<usize>,
    /// Chapters that failed, with the reason.
    pub failed: Vec<(usize, String)>,
    /// Chapters selected but already complete.
    pub skipped: Vec<usize>,
    /// The session stopped early because it was cancelled.
    pub interrupted: bool,
}

impl SessionResult {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.interrupted
    }
}

/// Why a chapter stopped.
#[derive(Debug)]
enum ChapterError {
    Provider(ProviderError),
    NoPages,
    MissingFiles(usize),
    Write(io::Error),
    Metadata(MetadataError),
    Cancelled,
}

impl ChapterError {
    fn is_permanent(&self) -> bool {
        match self {
            ChapterError::Provider(e) => e.is_permanent(),
            _ => false,
        }
    }

    fn reason(&self) -> String {
        match self {
            ChapterError::Provider(e) => e.to_string(),
            ChapterError::NoPages => "no pages found".to_string(),
            ChapterError::MissingFiles(n) => format!("{n} page files missing after download"),
            ChapterError::Write(e) => format!("failed to write page: {e}"),
            ChapterError::Metadata(e) => e.to_string(),
            ChapterError::Cancelled => "cancelled".to_string(),
        }
    }
}

impl From<ProviderError> for ChapterError {
    fn from(e: ProviderError) -> Self {
        ChapterError::Provider(e)
    }
}

impl From<MetadataError> for ChapterError {
    fn from(e: MetadataError) -> Self {
        ChapterError::Metadata(e)
    }
}

/// Downloads chapters of mangas from one site.
pub struct DownloadSession {
    provider: Arc<dyn SiteProvider>,
    fetcher: Arc<Fetcher>,
    manga_dir: PathBuf,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelFlag,
}

impl DownloadSession {
    /// Creates a session writing manga folders under `manga_dir`.
    pub fn new(provider: Arc<dyn SiteProvider>, fetcher: Arc<Fetcher>, manga_dir: &Path) -> Self {
        Self {
            provider,
            fetcher,
            manga_dir: manga_dir.to_path_buf(),
            sink: Arc::new(NullSink),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs the session for one manga.
    pub async fn run(
        &self,
        manga: &MangaRef,
        request: &SessionRequest,
    ) -> Result<SessionResult, SessionError> {
        let (mut store, new_chapters, was_complete) = self.resolve(manga).await?;

        let selected = self.select(&store, request, &new_chapters, was_complete)?;
        store.set_targeted(&selected)?;
        store.save()?;
        self.sink.on_event(SessionEvent::Selected {
            count: selected.len(),
        });
        info!(
            manga = %store.manga(),
            selected = selected.len(),
            mode = ?request.mode,
            "chapters selected"
        );

        let mut result = SessionResult {
            title: store.manga().title.clone(),
            folder: store.folder().to_path_buf(),
            ..SessionResult::default()
        };

        for index in selected {
            if self.cancel.is_cancelled() {
                result.interrupted = true;
                break;
            }

            let title = store
                .manga()
                .chapter(index)
                .map(|c| c.title.clone())
                .unwrap_or_default();

            if self.verify_complete(&mut store, index)? {
                debug!(index, "chapter already complete");
                self.sink.on_event(SessionEvent::ChapterSkipped {
                    index,
                    title: &title,
                });
                result.skipped.push(index);
                continue;
            }

            match self.download_chapter(&mut store, index).await {
                Ok(()) => {
                    info!(index, chapter = %title, "chapter complete");
                    self.sink.on_event(SessionEvent::ChapterCompleted {
                        index,
                        title: &title,
                    });
                    result.completed.push(index);
                }
                Err(ChapterError::Cancelled) => {
                    info!(index, "session cancelled");
                    result.interrupted = true;
                    break;
                }
                Err(ChapterError::Metadata(e)) => return Err(e.into()),
                Err(e) => {
                    let reason = e.reason();
                    warn!(index, chapter = %title, %reason, permanent = e.is_permanent(), "chapter failed");
                    store.mark_chapter_failed(index, &reason, e.is_permanent())?;
                    self.sink.on_event(SessionEvent::ChapterFailed {
                        index,
                        title: &title,
                        reason: &reason,
                    });
                    result.failed.push((index, reason));
                }
            }
        }

        Ok(result)
    }

    /// Finds the manga folder and merges a fresh chapter listing into it.
    ///
    /// Returns the store, the indices of newly listed chapters, and whether
    /// the series was already complete before this run.
    async fn resolve(
        &self,
        manga: &MangaRef,
    ) -> Result<(MetadataStore, Vec<usize>, bool), SessionError> {
        let provider = self.provider.as_ref();

        let (mut store, listing, first_run) = match manga {
            MangaRef::Remote { title, url } => {
                self.sink.on_event(SessionEvent::Resolving { title });
                let listing = provider
                    .list_chapters(url)
                    .await
                    .map_err(SessionError::Provider)?;
                let folder = negotiate_manga_folder(&self.manga_dir, title, provider.id(), url)?;
                match MetadataStore::open(&folder.path)? {
                    Some(store) => (store, listing, false),
                    None => {
                        let manga = Manga::new(title.as_str(), provider.id(), url.as_str());
                        (MetadataStore::create(&folder.path, manga)?, listing, true)
                    }
                }
            }
            MangaRef::Local(folder) => {
                let store = MetadataStore::open(folder)?
                    .ok_or_else(|| SessionError::NotAManga(folder.clone()))?;
                let stored = store.manga();
                if !stored.site_id.eq_ignore_ascii_case(provider.id()) {
                    return Err(SessionError::SiteMismatch {
                        expected: stored.site_id.clone(),
                        actual: provider.id().to_string(),
                    });
                }
                self.sink.on_event(SessionEvent::Resolving {
                    title: &stored.title,
                });
                let listing = provider
                    .list_chapters(&stored.source_ref)
                    .await
                    .map_err(SessionError::Provider)?;
                (store, listing, false)
            }
        };

        let was_complete = store.manga().status == MangaStatus::Complete;
        match provider.series_status(&store.manga().source_ref).await {
            Ok(status) => store.set_manga_status(status),
            Err(e) => warn!(manga = %store.manga(), error = %e, "could not read series status"),
        }

        let reconciled = store.reconcile(&listing);
        if reconciled.missing_from_listing > 0 {
            warn!(
                manga = %store.manga(),
                missing = reconciled.missing_from_listing,
                "site lists fewer chapters than stored"
            );
        }
        self.sink.on_event(SessionEvent::ChaptersListed {
            total: store.manga().chapters.len(),
            new: if first_run { 0 } else { reconciled.new_chapters.len() },
        });
        store.save()?;

        let new_chapters = if first_run {
            Vec::new()
        } else {
            reconciled.new_chapters
        };
        Ok((store, new_chapters, was_complete))
    }

    fn select(
        &self,
        store: &MetadataStore,
        request: &SessionRequest,
        new_chapters: &[usize],
        was_complete: bool,
    ) -> Result<Vec<usize>, SessionError> {
        let manga = store.manga();
        match request.mode {
            SessionMode::New => Ok(request.selection.resolve(manga.chapters.len())?),
            SessionMode::Continue => Ok(manga.pending_chapters().map(|c| c.index).collect()),
            SessionMode::Update => {
                if was_complete {
                    info!(manga = %manga, "series is complete, not looking for updates");
                    return Ok(Vec::new());
                }
                Ok(new_chapters.to_vec())
            }
        }
    }

    /// Forgets recorded pages whose files are gone. Returns true if the
    /// chapter is still complete afterwards.
    fn verify_complete(&self, store: &mut MetadataStore, index: usize) -> Result<bool, MetadataError> {
        let Some(chapter) = store.manga().chapter(index) else {
            return Err(MetadataError::UnknownChapter(index));
        };
        let vanished = match &chapter.folder {
            Some(folder) => {
                let dir = store.folder().join(folder);
                chapter
                    .downloaded_pages
                    .iter()
                    .filter(|(_, file)| !dir.join(file).is_file())
                    .map(|(&page, _)| page)
                    .collect()
            }
            None => chapter.downloaded_pages.keys().copied().collect::<Vec<_>>(),
        };
        if !vanished.is_empty() {
            info!(index, missing = vanished.len(), "page files disappeared, downloading again");
            store.forget_pages(index, &vanished)?;
        }
        Ok(store
            .manga()
            .chapter(index)
            .is_some_and(|c| c.is_complete()))
    }

    async fn download_chapter(
        &self,
        store: &mut MetadataStore,
        index: usize,
    ) -> Result<(), ChapterError> {
        let dir = self.chapter_dir(store, index)?;

        let chapter = store
            .manga()
            .chapter(index)
            .ok_or(MetadataError::UnknownChapter(index))?;
        let cached = !chapter.pages.is_empty() && chapter.page_count == Some(chapter.pages.len());
        if !cached {
            self.refresh_pages(store, index).await?;
        }

        let mut refreshed = !cached;
        loop {
            match self.fetch_missing_pages(store, index, &dir).await {
                // Cached page refs may have expired; list them again once.
                Err(ChapterError::Provider(e)) if !refreshed => {
                    debug!(index, error = %e, "page fetch failed with cached refs, relisting");
                    self.refresh_pages(store, index).await?;
                    refreshed = true;
                }
                other => break other?,
            }
        }

        // Everything recorded must still be on disk.
        let chapter = store
            .manga()
            .chapter(index)
            .ok_or(MetadataError::UnknownChapter(index))?;
        let missing = chapter.missing_pages().len();
        if missing > 0 || !self.verify_complete(store, index)? {
            return Err(ChapterError::MissingFiles(missing.max(1)));
        }
        Ok(())
    }

    /// Returns the chapter's folder, negotiating and creating it if needed.
    fn chapter_dir(&self, store: &mut MetadataStore, index: usize) -> Result<PathBuf, ChapterError> {
        let manga = store.manga();
        let chapter = manga
            .chapter(index)
            .ok_or(MetadataError::UnknownChapter(index))?;
        let assigned = chapter.folder.clone();
        let title = chapter.title.clone();

        let name = match assigned {
            Some(name) => name,
            None => {
                let taken: HashSet<String> = manga
                    .chapters
                    .iter()
                    .filter_map(|c| c.folder.clone())
                    .collect();
                let name = negotiate_chapter_folder(store.folder(), index, &title, &taken)
                    .map_err(ChapterError::Write)?;
                store.assign_folder(index, &name)?;
                name
            }
        };

        let dir = store.folder().join(name);
        fs::create_dir_all(&dir).map_err(ChapterError::Write)?;
        Ok(dir)
    }

    async fn refresh_pages(&self, store: &mut MetadataStore, index: usize) -> Result<(), ChapterError> {
        let chapter_ref = store
            .manga()
            .chapter(index)
            .map(|c| c.source_ref.clone())
            .ok_or(MetadataError::UnknownChapter(index))?;
        let pages = self.provider.list_pages(&chapter_ref).await?;
        let refs: Vec<String> = pages.into_iter().map(|p| p.page_ref).collect();
        debug!(index, pages = refs.len(), "page listing fetched");

        // An empty relisting must not replace the stored one.
        if refs.is_empty() {
            return Err(ChapterError::NoPages);
        }
        store.set_pages(index, refs)?;
        Ok(())
    }

    async fn fetch_missing_pages(
        &self,
        store: &mut MetadataStore,
        index: usize,
        dir: &Path,
    ) -> Result<(), ChapterError> {
        let chapter = store
            .manga()
            .chapter(index)
            .ok_or(MetadataError::UnknownChapter(index))?;
        let page_refs = chapter.pages.clone();
        let total = page_refs.len();
        let missing = chapter.missing_pages();

        self.sink.on_event(SessionEvent::ChapterStarted {
            index,
            title: &chapter.title,
            pages: total,
        });

        for page in missing {
            if self.cancel.is_cancelled() {
                return Err(ChapterError::Cancelled);
            }
            let Some(page_ref) = page_refs.get(page) else {
                return Err(ChapterError::NoPages);
            };

            let image_url = self.provider.resolve_image(page_ref).await?;
            let bytes = self
                .fetcher
                .fetch(&image_url, FetchKind::Image)
                .await
                .map_err(ProviderError::from)?;

            let file_name = page_file_name(page, total, image_extension(&bytes, &image_url));
            write_file_atomically(&dir.join(&file_name), &bytes).map_err(ChapterError::Write)?;

            let status = store.record_page(index, page, &file_name)?;
            self.sink.on_event(SessionEvent::PageSaved {
                index,
                page,
                pages: total,
            });
            if status == ChapterStatus::Complete {
                break;
            }
        }
        Ok(())
    }
}
