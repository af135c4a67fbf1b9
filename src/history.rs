//! Command history for segshell
//!
//! Provides history storage, zsh history import, and the completion list
//! shown under the prompt.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::{data_dir, home_dir};

/// Maximum number of history entries
const HISTORY_LIMIT: usize = 1000;

/// A single history entry
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryEntry {
    /// The command text
    pub command: String,
    /// Unix timestamp
    pub timestamp: u64,
}

/// Command history storage
pub struct CommandHistory {
    /// Own history entries (newest last)
    entries: Vec<HistoryEntry>,
    /// Commands imported from `~/.zsh_history` (newest last, read-only)
    imported: Vec<String>,
    /// File path for persistence
    file_path: Option<PathBuf>,
    /// Maximum entries
    max_entries: usize,
}

impl CommandHistory {
    /// Load `~/.segshell/history` and import `~/.zsh_history`.
    pub fn new() -> Self {
        let mut history = Self::with_path(data_dir().map(|dir| dir.join("history")));
        if let Some(home) = home_dir() {
            history.import_zsh(&home.join(".zsh_history"));
        }
        history
    }

    /// History persisted at `file_path` (in memory only when `None`)
    pub fn with_path(file_path: Option<PathBuf>) -> Self {
        let mut history = Self {
            entries: Vec::new(),
            imported: Vec::new(),
            file_path,
            max_entries: HISTORY_LIMIT,
        };
        history.load();
        history
    }

    /// Load history from file
    fn load(&mut self) {
        let Some(path) = &self.file_path else {
            return;
        };
        let Some(content) = read_optional(path) else {
            return;
        };
        for line in content.lines() {
            if let Some((ts_str, cmd)) = line.split_once(';') {
                if let Ok(timestamp) = ts_str.parse::<u64>() {
                    self.entries.push(HistoryEntry {
                        command: cmd.to_string(),
                        timestamp,
                    });
                }
            }
        }
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(..excess);
        }
    }

    /// Import commands from a zsh extended history file (`: ts:0;command`).
    pub fn import_zsh(&mut self, path: &Path) {
        let Some(content) = read_optional(path) else {
            return;
        };
        self.imported.extend(
            content
                .lines()
                .filter_map(parse_zsh_line)
                .map(str::to_string),
        );
    }

    /// Save history to file
    fn save(&self) {
        if let Some(ref path) = self.file_path {
            let content: String = self
                .entries
                .iter()
                .map(|e| format!("{};{}", e.timestamp, e.command))
                .collect::<Vec<_>>()
                .join("\n");
            if let Err(e) = fs::write(path, content) {
                warn!("Failed to save history to {}: {}", path.display(), e);
            }
        }
    }

    /// Add a command to history
    pub fn add(&mut self, command: &str) {
        // Skip empty or whitespace-only commands
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return;
        }

        // Skip if same as last command (dedup consecutive)
        if let Some(last) = self.entries.last() {
            if last.command == trimmed {
                return;
            }
        }

        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        self.entries.push(HistoryEntry {
            command: trimmed.to_string(),
            timestamp,
        });

        // Trim if exceeding limit
        while self.entries.len() > self.max_entries {
            self.entries.remove(0);
        }

        self.save();
    }

    /// Own entry at `index` (0 is the oldest)
    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.command.as_str())
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Completion candidates for `input`, newest first.
    ///
    /// Prefix matches from zsh history then own history; when there are none,
    /// substring matches in the same order. Exact matches and duplicates are
    /// skipped.
    pub fn matches(&self, input: &str) -> Vec<String> {
        if input.is_empty() {
            return Vec::new();
        }

        let candidates = || {
            self.imported
                .iter()
                .rev()
                .chain(self.entries.iter().rev().map(|e| &e.command))
                .filter(|cmd| cmd.as_str() != input)
        };

        let mut seen = HashSet::new();
        let mut matches: Vec<String> = candidates()
            .filter(|cmd| cmd.starts_with(input))
            .filter(|&cmd| seen.insert(cmd.as_str()))
            .cloned()
            .collect();

        if matches.is_empty() {
            matches = candidates()
                .filter(|cmd| cmd.contains(input))
                .filter(|&cmd| seen.insert(cmd.as_str()))
                .cloned()
                .collect();
        }
        matches
    }
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::with_path(None)
    }
}

/// Read a file that may legitimately be absent
fn read_optional(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

/// `": 1700000000:0;git status"` -> `"git status"`
fn parse_zsh_line(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(": ")?;
    let (timestamp, rest) = rest.split_once(':')?;
    let (duration, command) = rest.split_once(';')?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(timestamp) || !digits(duration) || command.is_empty() {
        return None;
    }
    Some(command)
}

/// Completion popup state
pub struct Completion {
    /// Candidate commands
    pub results: Vec<String>,
    /// Currently selected index
    pub selected: usize,
    /// Whether the popup is visible
    pub visible: bool,
    /// Scroll offset
    pub scroll_offset: usize,
    /// Maximum visible items
    pub max_visible: usize,
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            selected: 0,
            visible: false,
            scroll_offset: 0,
            max_visible: 10,
        }
    }

    /// Show the popup with `results`; stays hidden when there are none.
    pub fn show(&mut self, results: Vec<String>) {
        self.results = results;
        self.selected = 0;
        self.scroll_offset = 0;
        self.visible = !self.results.is_empty();
    }

    /// Hide the popup
    pub fn hide(&mut self) {
        self.visible = false;
        self.results.clear();
        self.selected = 0;
        self.scroll_offset = 0;
    }

    /// Move selection up, wrapping to the last entry
    pub fn select_up(&mut self) {
        if self.results.is_empty() {
            return;
        }
        self.selected = if self.selected == 0 {
            self.results.len() - 1
        } else {
            self.selected - 1
        };
        self.adjust_scroll();
    }

    /// Move selection down, wrapping to the first entry
    pub fn select_down(&mut self) {
        if self.results.is_empty() {
            return;
        }
        self.selected = (self.selected + 1) % self.results.len();
        self.adjust_scroll();
    }

    /// Scroll a page up
    pub fn page_up(&mut self) {
        self.selected = self.selected.saturating_sub(self.max_visible);
        self.adjust_scroll();
    }

    /// Scroll a page down
    pub fn page_down(&mut self) {
        if !self.results.is_empty() {
            self.selected = (self.selected + self.max_visible).min(self.results.len() - 1);
            self.adjust_scroll();
        }
    }

    /// Adjust scroll offset
    fn adjust_scroll(&mut self) {
        if self.selected < self.scroll_offset {
            self.scroll_offset = self.selected;
        } else if self.selected >= self.scroll_offset + self.max_visible {
            self.scroll_offset = self.selected - self.max_visible + 1;
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.results.get(self.selected).map(String::as_str)
    }

    /// Get visible items for rendering
    /// Returns: (display_index, command, is_selected)
    pub fn visible_items(&self) -> Vec<(usize, &str, bool)> {
        self.results
            .iter()
            .enumerate()
            .skip(self.scroll_offset)
            .take(self.max_visible)
            .map(|(idx, cmd)| {
                let display_idx = idx - self.scroll_offset;
                let is_selected = idx == self.selected;
                (display_idx, cmd.as_str(), is_selected)
            })
            .collect()
    }
}
