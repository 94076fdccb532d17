//! Console output formatting with ANSI color support.
//!
//! Provides styled terminal output with automatic TTY detection
//! and respect for the NO_COLOR environment variable, the numbered-list
//! prompts used to pick sites and mangas, and session progress rendering.

use crate::session::{ProgressSink, SessionEvent};
use std::io::{self, BufRead, IsTerminal, Write};

/// ANSI style codes for terminal formatting.
#[derive(Debug, Clone, Copy)]
pub enum Style {
    Bold,
    Dim,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    Gray,
}

impl Style {
    /// Returns the ANSI escape code for this style.
    fn code(self) -> &'static str {
        match self {
            Style::Bold => "1",
            Style::Dim => "2",
            Style::Red => "31",
            Style::Green => "32",
            Style::Yellow => "33",
            Style::Blue => "34",
            Style::Magenta => "35",
            Style::Cyan => "36",
            Style::Gray => "90",
        }
    }
}

const RESET: &str = "\x1b[0m";

/// Extra entry appended to multiple-choice lists.
const SELECT_ALL: &str = "[SELECT ALL]";

/// Console output handler with color support detection.
#[derive(Debug)]
pub struct Console {
    colors_enabled: bool,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    /// Creates a new Console instance, detecting color support.
    ///
    /// Colors are disabled if:
    /// - The `NO_COLOR` environment variable is set
    /// - stdout is not a terminal (TTY)
    pub fn new() -> Self {
        let colors_enabled = std::env::var("NO_COLOR").is_err() && io::stdout().is_terminal();

        Self { colors_enabled }
    }

    /// Creates a Console with colors explicitly enabled or disabled.
    pub fn with_colors(enabled: bool) -> Self {
        Self {
            colors_enabled: enabled,
        }
    }

    /// Applies ANSI styles to text if colors are enabled.
    pub fn style(&self, text: &str, styles: &[Style]) -> String {
        if !self.colors_enabled || styles.is_empty() {
            return text.to_string();
        }

        let codes: Vec<&str> = styles.iter().map(|s| s.code()).collect();
        format!("\x1b[{}m{}{}", codes.join(";"), text, RESET)
    }

    /// Creates a colored label like `[INFO]`.
    pub fn label(&self, label: &str, color: Style) -> String {
        let styled = self.style(label, &[color, Style::Bold]);
        format!("[{}]", styled)
    }

    /// Prints an info message with blue `[INFO]` label.
    pub fn info(&self, message: &str) {
        println!("{} {}", self.label("INFO", Style::Blue), message);
    }

    /// Prints a success message with green `[OK]` label.
    pub fn success(&self, message: &str) {
        println!("{} {}", self.label("OK", Style::Green), message);
    }

    /// Prints a warning message with yellow `[WARN]` label.
    pub fn warning(&self, message: &str) {
        println!("{} {}", self.label("WARN", Style::Yellow), message);
    }

    /// Prints an error message with red `[ERROR]` label.
    pub fn error(&self, message: &str) {
        eprintln!("{} {}", self.label("ERROR", Style::Red), message);
    }

    /// Prints a step message with cyan `[STEP]` label.
    pub fn step(&self, message: &str) {
        println!("{} {}", self.label("STEP", Style::Cyan), message);
    }

    /// Prints a section header in magenta bold.
    pub fn section(&self, message: &str) {
        println!();
        println!("{}", self.style(message, &[Style::Magenta, Style::Bold]));
    }

    /// Returns text styled as muted (dim gray).
    pub fn muted(&self, text: &str) -> String {
        self.style(text, &[Style::Gray, Style::Dim])
    }

    /// Clears the current line (for progress updates).
    pub fn clear_line(&self) {
        if self.colors_enabled {
            print!("\r\x1b[2K");
        } else {
            println!();
        }
        let _ = io::stdout().flush();
    }

    /// Prints a progress update on the same line.
    pub fn progress_update(&self, message: &str) {
        if self.colors_enabled {
            print!("\r\x1b[2K");
        }
        print!("{} {}", self.label("..", Style::Cyan), message);
        let _ = io::stdout().flush();
    }

    /// Formats a count with styling.
    pub fn count(&self, n: usize) -> String {
        self.style(&n.to_string(), &[Style::Green, Style::Bold])
    }

    /// Prints a numbered list, right-aligning the numbers.
    pub fn numbered_list(&self, header: &str, items: &[String]) {
        println!("{}", self.style(header, &[Style::Bold]));
        let width = items.len().to_string().len();
        for (i, item) in items.iter().enumerate() {
            println!("{:>width$}. {}", i + 1, item);
        }
    }

    /// Asks the user to pick entries from a numbered list.
    ///
    /// With `multiple`, a final "select all" entry is offered and several
    /// numbers may be given. Keeps asking until the answer is valid. Returns
    /// `None` when the input is closed.
    pub fn choose<R: BufRead>(
        &self,
        input: &mut R,
        header: &str,
        prompt: &str,
        items: &[String],
        multiple: bool,
    ) -> io::Result<Option<Vec<usize>>> {
        let mut shown = items.to_vec();
        if multiple {
            shown.push(SELECT_ALL.to_string());
        }
        self.numbered_list(header, &shown);

        loop {
            print!("{} [1-{}]: ", prompt, shown.len());
            io::stdout().flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                println!();
                return Ok(None);
            }
            match parse_choices(&line, items.len(), multiple) {
                Some(choices) => return Ok(Some(choices)),
                None => self.warning("Invalid selection. Try again."),
            }
        }
    }

    /// Asks for a single entry of a numbered list.
    pub fn choose_one<R: BufRead>(
        &self,
        input: &mut R,
        header: &str,
        prompt: &str,
        items: &[String],
    ) -> io::Result<Option<usize>> {
        Ok(self
            .choose(input, header, prompt, items, false)?
            .and_then(|choices| choices.first().copied()))
    }
}

/// Parses a prompt answer into 0-based item indices.
///
/// Numbers are 1-based and separated by commas or whitespace. With
/// `multiple`, the number after the last item selects everything. Returns
/// `None` for anything invalid.
pub fn parse_choices(answer: &str, count: usize, multiple: bool) -> Option<Vec<usize>> {
    let numbers: Vec<usize> = answer
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().ok())
        .collect::<Option<_>>()?;

    if numbers.is_empty() {
        return None;
    }

    if multiple {
        if numbers.contains(&(count + 1)) {
            return Some((0..count).collect());
        }
        if numbers.iter().any(|&n| n == 0 || n > count) {
            return None;
        }
        let mut picked: Vec<usize> = numbers.iter().map(|n| n - 1).collect();
        picked.sort_unstable();
        picked.dedup();
        return Some(picked);
    }

    match numbers.as_slice() {
        [n] if (1..=count).contains(n) => Some(vec![n - 1]),
        _ => None,
    }
}

impl ProgressSink for Console {
    fn on_event(&self, event: SessionEvent<'_>) {
        match event {
            SessionEvent::Resolving { title } => {
                self.step(&format!("Getting chapter list of '{title}'..."));
            }
            SessionEvent::ChaptersListed { total, new } => {
                if new > 0 {
                    self.info(&format!(
                        "Found {} chapters ({} new)",
                        self.count(total),
                        self.count(new)
                    ));
                } else {
                    self.info(&format!("Found {} chapters", self.count(total)));
                }
            }
            SessionEvent::Selected { count } => {
                if count == 0 {
                    self.warning("Nothing to download");
                } else {
                    self.info(&format!("Selected {} chapters", self.count(count)));
                }
            }
            SessionEvent::ChapterStarted { index, title, pages } => {
                self.step(&format!(
                    "Chapter {index}: {title} {}",
                    self.muted(&format!("({pages} pages)"))
                ));
            }
            SessionEvent::PageSaved { index, page, pages } => {
                self.progress_update(&format!("Chapter {index}: page {}/{pages}", page + 1));
            }
            SessionEvent::ChapterSkipped { index, title } => {
                self.info(&format!(
                    "Chapter {index}: {title} {}",
                    self.muted("(already downloaded)")
                ));
            }
            SessionEvent::ChapterCompleted { index, title } => {
                self.clear_line();
                self.success(&format!("Chapter {index}: {title}"));
            }
            SessionEvent::ChapterFailed {
                index,
                title,
                reason,
            } => {
                self.clear_line();
                self.error(&format!("Chapter {index}: {title} failed: {reason}"));
            }
        }
    }
}
