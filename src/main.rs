//! smd CLI - manga downloader.

use anyhow::{Context, Result, bail};
use clap::Parser;
use smd::config::Config;
use smd::console::Console;
use smd::fetcher::Fetcher;
use smd::metadata::{MetadataStore, find_manga_folders};
use smd::scrapers::{ProviderRegistry, SiteProvider};
use smd::selector::ChapterSelection;
use smd::session::{CancelFlag, DownloadSession, MangaRef, SessionRequest, SessionResult};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Exit status after a second Ctrl-C, as shells report SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

/// Downloads manga from several sites, resuming where it left off.
#[derive(Parser, Debug)]
#[command(name = "smd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Manga titles to search for, or manga folders with --continue/--update.
    mangas: Vec<String>,

    /// List the supported sites and exit.
    #[arg(short, long)]
    list: bool,

    /// Site to download from (see --list).
    #[arg(short, long, conflicts_with = "lang")]
    site: Option<String>,

    /// Only offer sites in this language (ISO 639-1).
    #[arg(long)]
    lang: Option<String>,

    /// Chapters to download, 0-based: `0:10,!5`, `-1`, `3:`.
    #[arg(long, value_parser = parse_selection)]
    chapters: Option<ChapterSelection>,

    /// Folder holding the manga folders.
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Download chapters released since the last run.
    #[arg(short, long, conflicts_with_all = ["continue_", "chapters", "file", "tryall"])]
    update: bool,

    /// Finish interrupted or failed downloads.
    #[arg(short = 'c', long = "continue", conflicts_with_all = ["chapters", "file", "tryall"])]
    continue_: bool,

    /// Try other sites when a download fails.
    #[arg(long)]
    tryall: bool,

    /// Read manga titles from a file, one per line (`-` for stdin).
    #[arg(short, long, num_args = 0..=1, default_missing_value = "-")]
    file: Option<PathBuf>,

    /// Show debug output.
    #[arg(short, long)]
    verbose: bool,
}

fn parse_selection(expression: &str) -> Result<ChapterSelection, String> {
    ChapterSelection::parse(expression).map_err(|e| e.to_string())
}

/// Shared state of one invocation.
struct App {
    console: Arc<Console>,
    registry: ProviderRegistry,
    fetcher: Arc<Fetcher>,
    manga_dir: PathBuf,
    cancel: CancelFlag,
    results: Vec<SessionResult>,
    errors: usize,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let console = Arc::new(Console::new());

    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let log_dir = config.log_dir()?;
    let _log_guard = smd::logging::init(args.verbose, &config.logging, &log_dir)
        .context("Failed to set up logging")?;

    let fetcher = Arc::new(Fetcher::http(&config.fetch).context("Failed to create HTTP client")?);
    let registry = ProviderRegistry::new(fetcher.clone());

    if args.list {
        list_sites(&console, &registry);
        return Ok(ExitCode::SUCCESS);
    }

    let manga_dir = args
        .directory
        .clone()
        .unwrap_or_else(|| config.paths.manga_directory.clone());

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        let console = console.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                console.clear_line();
                if cancel.cancel_again() {
                    console.error("Interrupted");
                    std::process::exit(EXIT_INTERRUPTED);
                }
                console.warning("Cancelling after the current page... (Ctrl-C again to quit now)");
            }
        });
    }

    let mut app = App {
        console: console.clone(),
        registry,
        fetcher,
        manga_dir,
        cancel,
        results: Vec::new(),
        errors: 0,
    };

    if args.continue_ || args.update {
        let request = if args.update {
            SessionRequest::update()
        } else {
            SessionRequest::resume()
        };
        app.run_local(&args.mangas, &request).await?;
    } else {
        let mut titles = args.mangas.clone();
        if let Some(file) = &args.file {
            titles.extend(read_titles(file)?);
        }
        if titles.is_empty() {
            bail!("No manga given. Pass titles as arguments or use --file.");
        }

        let language = args.lang.as_deref().or(config.language());
        let mut candidates = app.candidate_providers(args.site.as_deref(), language)?;
        let request = SessionRequest::new(args.chapters.clone().unwrap_or_else(ChapterSelection::all));

        for title in titles {
            if app.cancel.is_cancelled() {
                break;
            }
            app.run_remote(&title, &mut candidates, &request, args.tryall)
                .await?;
        }
    }

    Ok(app.summary())
}

fn list_sites(console: &Console, registry: &ProviderRegistry) {
    console.section(&format!("Supported sites ({}):", registry.all().len()));
    for provider in registry.all() {
        println!(
            " * {} {} {}",
            provider.id(),
            console.muted(&format!("({})", provider.lang())),
            console.muted(provider.site_url())
        );
    }
}

/// Reads manga titles, one per line, skipping blank lines.
fn read_titles(path: &Path) -> Result<Vec<String>> {
    let content = if path.as_os_str() == "-" {
        io::read_to_string(io::stdin()).context("Failed to read titles from stdin")?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read titles from {}", path.display()))?
    };
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

impl App {
    fn session(&self, provider: Arc<dyn SiteProvider>) -> DownloadSession {
        DownloadSession::new(provider, self.fetcher.clone(), &self.manga_dir)
            .with_sink(self.console.clone())
            .with_cancel(self.cancel.clone())
    }

    /// Providers to offer for a search, honoring `--site` and the language filter.
    fn candidate_providers(
        &self,
        site: Option<&str>,
        language: Option<&str>,
    ) -> Result<Vec<Arc<dyn SiteProvider>>> {
        if let Some(site) = site {
            let provider = self
                .registry
                .find(site)
                .with_context(|| format!("Unknown site '{site}', see --list"))?;
            return Ok(vec![provider]);
        }

        let providers = self.registry.filter_lang(language);
        if !providers.is_empty() {
            return Ok(providers);
        }

        self.console
            .error(&format!("Unknown language: '{}'", language.unwrap_or_default()));
        let langs = self.registry.langs();
        let choice = self
            .console
            .choose_one(&mut io::stdin().lock(), "Available languages:", "Choose a language", &langs)?
            .context("No language selected")?;
        Ok(self.registry.filter_lang(Some(&langs[choice])))
    }

    /// Asks which provider to use. A single candidate is used directly.
    fn pick_provider(&self, candidates: &[Arc<dyn SiteProvider>]) -> Result<Option<usize>> {
        if candidates.len() <= 1 {
            return Ok((!candidates.is_empty()).then_some(0));
        }
        let names: Vec<String> = candidates
            .iter()
            .map(|p| format!("{} ({})", p.name(), p.lang()))
            .collect();
        Ok(self.console.choose_one(
            &mut io::stdin().lock(),
            "Supported sites:",
            "Choose a site",
            &names,
        )?)
    }

    /// Searches for `title` and downloads it, moving on to other sites with `tryall`.
    async fn run_remote(
        &mut self,
        title: &str,
        candidates: &mut Vec<Arc<dyn SiteProvider>>,
        request: &SessionRequest,
        tryall: bool,
    ) -> Result<()> {
        let mut remaining = candidates.clone();
        loop {
            let Some(choice) = self.pick_provider(&remaining)? else {
                self.errors += 1;
                return Ok(());
            };
            let provider = remaining.remove(choice);
            // Remember the choice for the next title.
            if let Some(pos) = candidates.iter().position(|p| p.id() == provider.id()) {
                let chosen = candidates.remove(pos);
                candidates.insert(0, chosen);
            }

            if self.download_from(title, provider.clone(), request).await? {
                return Ok(());
            }
            self.console
                .error(&format!("Download of '{title}' from {} has failed", provider.name()));
            if !tryall || remaining.is_empty() || self.cancel.is_cancelled() {
                self.errors += 1;
                return Ok(());
            }
        }
    }

    /// Returns false when the manga could not be found or resolved on this site.
    async fn download_from(
        &mut self,
        title: &str,
        provider: Arc<dyn SiteProvider>,
        request: &SessionRequest,
    ) -> Result<bool> {
        self.console
            .step(&format!("Searching for '{title}' on {}...", provider.name()));
        let results = match provider.search(title).await {
            Ok(results) => results,
            Err(e) => {
                error!(site = provider.id(), error = %e, "search failed");
                self.console.error(&format!("Search failed: {e}"));
                return Ok(false);
            }
        };
        if results.is_empty() {
            self.console.warning(&format!("No results for '{title}'"));
            return Ok(false);
        }

        let choice = if results.len() == 1 {
            0
        } else {
            let titles: Vec<String> = results.iter().map(|r| r.title.clone()).collect();
            match self.console.choose_one(
                &mut io::stdin().lock(),
                "Found:",
                "Select a manga",
                &titles,
            )? {
                Some(choice) => choice,
                None => return Ok(false),
            }
        };
        let found = &results[choice];

        let manga = MangaRef::Remote {
            title: found.title.clone(),
            url: found.url.clone(),
        };
        match self.session(provider).run(&manga, request).await {
            Ok(result) => {
                self.results.push(result);
                Ok(true)
            }
            Err(e) => {
                error!(manga = %found.title, error = %e, "session failed");
                self.console.error(&format!("{}: {e}", found.title));
                Ok(false)
            }
        }
    }

    /// Runs `--continue` or `--update` over manga folders.
    async fn run_local(&mut self, folders: &[String], request: &SessionRequest) -> Result<()> {
        let folders: Vec<PathBuf> = if folders.is_empty() {
            self.pick_local_mangas(request)?
        } else {
            folders.iter().map(PathBuf::from).collect()
        };

        for folder in folders {
            if self.cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.run_local_one(&folder, request).await {
                error!(folder = %folder.display(), error = %e, "session failed");
                self.console.error(&format!("{}: {e:#}", folder.display()));
                self.errors += 1;
            }
        }
        Ok(())
    }

    async fn run_local_one(&mut self, folder: &Path, request: &SessionRequest) -> Result<()> {
        let manga = MetadataStore::load(folder)?
            .with_context(|| format!("No manga found in '{}'", folder.display()))?;
        let provider = self
            .registry
            .find(&manga.site_id)
            .with_context(|| format!("Unknown site: '{}'", manga.site_id))?;

        self.console.section(&manga.title);
        let result = self
            .session(provider)
            .run(&MangaRef::Local(folder.to_path_buf()), request)
            .await?;
        self.results.push(result);
        Ok(())
    }

    /// Scans the manga directory and asks which mangas to work on.
    fn pick_local_mangas(&self, request: &SessionRequest) -> Result<Vec<PathBuf>> {
        let resuming = request.mode == smd::SessionMode::Continue;
        let mut found = Vec::new();
        for folder in find_manga_folders(&self.manga_dir)? {
            match MetadataStore::load(&folder) {
                Ok(Some(manga)) if !resuming || manga.has_pending_chapters() => {
                    found.push((folder, manga.title));
                }
                Ok(_) => {}
                Err(e) => self.console.warning(&e.to_string()),
            }
        }

        if found.is_empty() {
            if resuming {
                bail!("No unfinished download found in '{}'", self.manga_dir.display());
            }
            bail!("No manga found in '{}'", self.manga_dir.display());
        }

        let titles: Vec<String> = found.iter().map(|(_, title)| title.clone()).collect();
        let prompt = if resuming {
            "Select mangas to continue downloading"
        } else {
            "Select mangas to update"
        };
        let picked = self
            .console
            .choose(&mut io::stdin().lock(), "Found:", prompt, &titles, true)?
            .unwrap_or_default();
        info!(count = picked.len(), "mangas selected");
        Ok(picked.into_iter().map(|i| found[i].0.clone()).collect())
    }

    /// Prints what happened and returns the exit status.
    fn summary(&self) -> ExitCode {
        self.console.section("Summary");
        let mut failed = self.errors > 0;
        for result in &self.results {
            let line = format!(
                "{}: {} downloaded, {} already done, {} failed",
                result.title,
                self.console.count(result.completed.len()),
                result.skipped.len(),
                result.failed.len()
            );
            if result.is_success() {
                self.console.success(&line);
            } else {
                self.console.warning(&line);
            }
            for (index, reason) in &result.failed {
                println!("   {}", self.console.muted(&format!("chapter {index}: {reason}")));
            }
            if result.interrupted {
                println!("   {}", self.console.muted("interrupted, run with --continue to resume"));
            }
            failed |= !result.is_success();
        }

        if failed {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    }
}
