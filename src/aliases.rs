//! Alias table
//!
//! Aliases come from `~/.zshrc` (`alias name=value`) and then from
//! `~/.segshell/aliases` (`name=value`), the latter taking precedence. Only
//! the segshell file is ever written.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::{data_dir, home_dir};
use crate::shell::args::quote;

#[derive(Debug, Default)]
pub struct Aliases {
    table: BTreeMap<String, String>,
    file_path: Option<PathBuf>,
}

impl Aliases {
    /// Load from the user's files.
    pub fn load() -> Self {
        let mut aliases = Self::with_path(data_dir().map(|dir| dir.join("aliases")));
        if let Some(home) = home_dir() {
            aliases.load_zshrc(&home.join(".zshrc"));
        }
        if let Some(path) = aliases.file_path.clone() {
            aliases.load_own(&path);
        }
        aliases
    }

    /// Empty table persisted at `file_path`
    pub fn with_path(file_path: Option<PathBuf>) -> Self {
        Self {
            table: BTreeMap::new(),
            file_path,
        }
    }

    pub fn load_zshrc(&mut self, path: &Path) {
        if let Some(content) = read_optional(path) {
            self.table.extend(parse_zshrc(&content));
        }
    }

    pub fn load_own(&mut self, path: &Path) {
        if let Some(content) = read_optional(path) {
            self.table.extend(parse_own(&content));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.table.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.table.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Define or replace an alias and persist the table.
    pub fn set(&mut self, name: &str, value: &str) -> io::Result<()> {
        self.table.insert(name.to_string(), value.to_string());
        self.save()
    }

    /// Remove an alias. `Ok(false)` if it did not exist.
    pub fn remove(&mut self, name: &str) -> io::Result<bool> {
        if self.table.remove(name).is_none() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    fn save(&self) -> io::Result<()> {
        let Some(path) = &self.file_path else {
            return Ok(());
        };
        let content: String = self
            .table
            .iter()
            .map(|(name, value)| format!("{}={}\n", name, value))
            .collect();
        fs::write(path, content)
    }

    /// Replace the first word of `args` with its alias, if any.
    ///
    /// The result is a command line: the alias value followed by the
    /// remaining arguments, quoted where they contain whitespace.
    pub fn expand(&self, args: &[String]) -> Option<String> {
        let (first, rest) = args.split_first()?;
        let value = self.get(first)?;
        let mut line = value.to_string();
        for arg in rest {
            line.push(' ');
            line.push_str(&quote(arg));
        }
        Some(line)
    }
}

fn read_optional(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Failed to read aliases from {}: {}", path.display(), e);
            None
        }
    }
}

fn parse_zshrc(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| {
            let rest = line.strip_prefix("alias")?;
            if !rest.starts_with(char::is_whitespace) {
                return None;
            }
            let (name, value) = rest.trim_start().split_once('=')?;
            let value = value.trim_matches(|c| c == '"' || c == '\'');
            Some((name.to_string(), value.to_string()))
        })
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

fn parse_own(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}
