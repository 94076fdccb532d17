//! Folder and file naming.
//!
//! Titles come from web pages and can contain anything. Folder names are
//! negotiated: the sanitized title is tried first and, when it is invalid or
//! already taken by something else, fallbacks based on the site id or the
//! chapter index are used instead. A clash is never an error.

use crate::error::MetadataError;
use crate::metadata::MetadataStore;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};

/// Characters not allowed in file names on at least one common file system.
static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f\x7f]"#).unwrap());

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Device names Windows refuses as file names, with or without extension.
const RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Longest folder name produced, in characters.
const MAX_NAME_CHARS: usize = 100;

/// How many numbered fallbacks to try before giving up.
const MAX_FALLBACKS: usize = 100;

/// Extensions accepted when the image format has to be guessed from the URL.
const URL_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "avif"];

/// Makes `name` usable as a folder name, or returns `None` if nothing usable remains.
pub fn sanitize_folder_name(name: &str) -> Option<String> {
    let replaced = INVALID_CHARS.replace_all(name, " ");
    let collapsed = WHITESPACE_RUN.replace_all(replaced.trim(), " ");
    let truncated: String = collapsed.chars().take(MAX_NAME_CHARS).collect();
    let cleaned = truncated.trim_end_matches(['.', ' ']).trim_start();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return None;
    }

    let stem = cleaned.split('.').next().unwrap_or(cleaned).to_ascii_lowercase();
    if RESERVED_NAMES.contains(&stem.as_str()) {
        return None;
    }

    Some(cleaned.to_string())
}

/// Why a candidate name was passed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NameClash {
    /// Already used by another manga, chapter, or unrelated files.
    Taken,
    /// Rejected by the file system.
    Invalid,
}

/// A negotiated manga folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MangaFolder {
    pub path: PathBuf,
    /// The folder already holds metadata for this manga.
    pub existing: bool,
}

/// Finds or creates the folder for a manga under `root`.
///
/// A folder whose metadata describes the same series is reused. Unreadable
/// metadata in a candidate folder is reported rather than skipped, since it
/// may be this manga's own state.
pub fn negotiate_manga_folder(
    root: &Path,
    title: &str,
    site_id: &str,
    source_ref: &str,
) -> Result<MangaFolder, MetadataError> {
    let base = sanitize_folder_name(title).unwrap_or_else(|| format!("manga-{site_id}"));
    let candidates = std::iter::once(base.clone())
        .chain(std::iter::once(format!("{base} ({site_id})")))
        .chain((2..MAX_FALLBACKS).map(|n| format!("{base} ({site_id}) {n}")));

    fs::create_dir_all(root).map_err(|source| MetadataError::Io {
        folder: root.to_path_buf(),
        source,
    })?;

    for name in candidates {
        let path = root.join(&name);
        if path.is_dir() {
            match MetadataStore::load(&path)? {
                Some(manga) if manga.is_same_series(site_id, source_ref) => {
                    return Ok(MangaFolder {
                        path,
                        existing: true,
                    });
                }
                Some(_) => log_clash(&name, NameClash::Taken),
                None if is_empty_dir(&path) => {
                    return Ok(MangaFolder {
                        path,
                        existing: false,
                    });
                }
                None => log_clash(&name, NameClash::Taken),
            }
            continue;
        }
        if path.exists() {
            log_clash(&name, NameClash::Taken);
            continue;
        }
        match fs::create_dir(&path) {
            Ok(()) => {
                if name != base {
                    info!(folder = %name, "using fallback folder name for manga");
                }
                return Ok(MangaFolder {
                    path,
                    existing: false,
                });
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => log_clash(&name, NameClash::Taken),
            Err(e) if is_invalid_name_error(&e) => log_clash(&name, NameClash::Invalid),
            Err(source) => {
                return Err(MetadataError::Io {
                    folder: path,
                    source,
                });
            }
        }
    }

    Err(MetadataError::Io {
        folder: root.join(base),
        source: io::Error::new(io::ErrorKind::AlreadyExists, "no free folder name"),
    })
}

/// Creates a chapter folder inside `manga_folder` and returns its name.
///
/// `taken` holds the folder names already assigned to other chapters.
/// Candidates are the sanitized title, then the chapter index.
pub fn negotiate_chapter_folder(
    manga_folder: &Path,
    index: usize,
    title: &str,
    taken: &HashSet<String>,
) -> io::Result<String> {
    let taken: HashSet<String> = taken.iter().map(|n| n.to_lowercase()).collect();
    let candidates = sanitize_folder_name(title)
        .into_iter()
        .chain(std::iter::once(index.to_string()))
        .chain(std::iter::once(format!("chapter-{index}")))
        .chain((2..MAX_FALLBACKS).map(|n| format!("chapter-{index}-{n}")));

    for name in candidates {
        if taken.contains(&name.to_lowercase()) {
            log_clash(&name, NameClash::Taken);
            continue;
        }
        let path = manga_folder.join(&name);
        if path.exists() {
            if path.is_dir() && is_empty_dir(&path) {
                return Ok(name);
            }
            log_clash(&name, NameClash::Taken);
            continue;
        }
        match fs::create_dir(&path) {
            Ok(()) => return Ok(name),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => log_clash(&name, NameClash::Taken),
            Err(e) if is_invalid_name_error(&e) => log_clash(&name, NameClash::Invalid),
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free folder name for chapter {index}"),
    ))
}

/// File stem for a page: 1-based, zero-padded to the width of the page count.
pub fn page_file_stem(page: usize, page_count: usize) -> String {
    let width = page_count.max(1).to_string().len();
    format!("{:0width$}", page + 1)
}

/// Extension for downloaded image bytes, falling back to the URL's extension.
pub fn image_extension(bytes: &[u8], url: &str) -> Option<&'static str> {
    if let Some(ext) = image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
    {
        return Some(ext);
    }

    let path = url::Url::parse(url).ok()?.path().to_ascii_lowercase();
    let ext = path.rsplit_once('.')?.1;
    URL_IMAGE_EXTENSIONS.iter().copied().find(|known| *known == ext)
}

/// Full file name for a page.
pub fn page_file_name(page: usize, page_count: usize, extension: Option<&str>) -> String {
    let stem = page_file_stem(page, page_count);
    match extension {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

/// Writes `bytes` to `path` through a temporary file in the same folder.
pub fn write_file_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let temp_path = path.with_file_name(format!(".{file_name}.part"));
    fs::write(&temp_path, bytes)?;
    fs::rename(&temp_path, path)
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none())
}

fn is_invalid_name_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::InvalidInput | io::ErrorKind::NotFound
    )
}

fn log_clash(name: &str, clash: NameClash) {
    debug!(folder = %name, ?clash, "folder name unavailable, trying fallback");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manga::Manga;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_folder_name() {
        assert_eq!(sanitize_folder_name("One Piece").as_deref(), Some("One Piece"));
        assert_eq!(
            sanitize_folder_name("Fate/Zero: Vol.1?").as_deref(),
            Some("Fate Zero Vol.1")
        );
        assert_eq!(sanitize_folder_name("  a\tb\n c  ").as_deref(), Some("a b c"));
        assert_eq!(sanitize_folder_name("Chapter 10...").as_deref(), Some("Chapter 10"));
        assert_eq!(sanitize_folder_name("..."), None);
        assert_eq!(sanitize_folder_name("???"), None);
        assert_eq!(sanitize_folder_name("CON"), None);
        assert_eq!(sanitize_folder_name("nul.txt"), None);
        assert_eq!(sanitize_folder_name("Console").as_deref(), Some("Console"));
    }

    #[test]
    fn test_sanitize_truncates_long_titles() {
        let long = "あ".repeat(300);
        let name = sanitize_folder_name(&long).unwrap();
        assert_eq!(name.chars().count(), MAX_NAME_CHARS);
    }

    #[test]
    fn test_manga_folder_created_and_reused() {
        let root = TempDir::new().unwrap();
        let first = negotiate_manga_folder(root.path(), "Berserk", "mangareader", "ref").unwrap();
        assert_eq!(first.path, root.path().join("Berserk"));
        assert!(!first.existing);
        MetadataStore::create(&first.path, Manga::new("Berserk", "mangareader", "ref")).unwrap();

        let again = negotiate_manga_folder(root.path(), "Berserk", "mangareader", "ref").unwrap();
        assert_eq!(again.path, first.path);
        assert!(again.existing);
    }

    #[test]
    fn test_manga_folder_falls_back_on_clash() {
        let root = TempDir::new().unwrap();
        let folder = root.path().join("Berserk");
        fs::create_dir(&folder).unwrap();
        MetadataStore::create(&folder, Manga::new("Berserk", "mangahere", "other")).unwrap();

        let chosen = negotiate_manga_folder(root.path(), "Berserk", "mangareader", "ref").unwrap();
        assert_eq!(chosen.path, root.path().join("Berserk (mangareader)"));
        assert!(chosen.path.is_dir());

        // Unrelated files also count as taken.
        fs::write(root.path().join("Gantz"), b"x").unwrap();
        let chosen = negotiate_manga_folder(root.path(), "Gantz", "mangareader", "g").unwrap();
        assert_eq!(chosen.path, root.path().join("Gantz (mangareader)"));
    }

    #[test]
    fn test_manga_folder_invalid_title() {
        let root = TempDir::new().unwrap();
        let chosen = negotiate_manga_folder(root.path(), "???", "ninemanga-en", "r").unwrap();
        assert_eq!(chosen.path, root.path().join("manga-ninemanga-en"));
    }

    #[test]
    fn test_manga_folder_corrupt_metadata_reported() {
        let root = TempDir::new().unwrap();
        let folder = root.path().join("Berserk");
        fs::create_dir(&folder).unwrap();
        fs::write(folder.join(crate::metadata::METADATA_FILE), "not json").unwrap();

        let result = negotiate_manga_folder(root.path(), "Berserk", "mangareader", "ref");
        assert!(matches!(result, Err(MetadataError::Corrupt { .. })));
    }

    #[test]
    fn test_chapter_folder_fallbacks() {
        let root = TempDir::new().unwrap();
        let mut taken = HashSet::new();

        let name = negotiate_chapter_folder(root.path(), 0, "Vol.1 Ch.1", &taken).unwrap();
        assert_eq!(name, "Vol.1 Ch.1");
        taken.insert(name);

        // Same title again falls back to the index.
        let name = negotiate_chapter_folder(root.path(), 1, "vol.1 ch.1", &taken).unwrap();
        assert_eq!(name, "1");
        taken.insert(name);

        // Unusable title goes straight to the index.
        let name = negotiate_chapter_folder(root.path(), 2, "///", &taken).unwrap();
        assert_eq!(name, "2");
        assert!(root.path().join("2").is_dir());
    }

    #[test]
    fn test_chapter_folder_index_taken_by_title() {
        let root = TempDir::new().unwrap();
        let taken: HashSet<String> = ["Extra".to_string(), "3".to_string()].into();
        let name = negotiate_chapter_folder(root.path(), 3, "Extra", &taken).unwrap();
        assert_eq!(name, "chapter-3");
    }

    #[test]
    fn test_chapter_folder_skips_non_empty_dirs() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("Prologue")).unwrap();
        fs::write(root.path().join("Prologue").join("x.png"), b"x").unwrap();
        let name = negotiate_chapter_folder(root.path(), 0, "Prologue", &HashSet::new()).unwrap();
        assert_eq!(name, "0");
    }

    #[test]
    fn test_page_file_names() {
        assert_eq!(page_file_stem(0, 9), "1");
        assert_eq!(page_file_stem(0, 10), "01");
        assert_eq!(page_file_stem(99, 120), "100");
        assert_eq!(page_file_name(4, 20, Some("png")), "05.png");
        assert_eq!(page_file_name(4, 20, None), "05");
    }

    #[test]
    fn test_image_extension() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert_eq!(image_extension(&png, "http://x/y"), Some("png"));
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0];
        assert_eq!(image_extension(&jpeg, "http://x/y.png"), Some("jpg"));
        assert_eq!(image_extension(b"????", "http://x/a/b.WEBP?x=1"), Some("webp"));
        assert_eq!(image_extension(b"????", "http://x/a/b.php"), None);
    }

    #[test]
    fn test_write_file_atomically() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("01.png");
        write_file_atomically(&path, b"data").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"data");
        assert!(!dir.path().join(".01.png.part").exists());
    }
}
