//! Configuration and color scheme management for segshell.
//!
//! This module provides:
//! - TOML configuration file loading from `~/.segshell/config.toml`
//! - Built-in color schemes (default, solarized-dark, nord)
//! - Conversion into the session settings used by the core
//!
//! # Configuration File
//!
//! ```toml
//! # Output ordering: append (oldest first) or prepend (newest command first)
//! order = "append"
//!
//! # Stream kind: auto (pty, falling back to pipes), pty, pipe
//! stream = "auto"
//!
//! exit_wait_secs = 5
//! read_chunk_size = 4096
//! locale = "en_US.UTF-8"
//! scrollback_limit = 20000
//! color_scheme = "nord"
//!
//! [retry]
//! max_attempts = 5
//! initial_backoff_ms = 10
//! multiplier = 2.0
//! max_backoff_ms = 200
//!
//! [env]
//! EDITOR = "vim"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::pty::StreamMode;
use crate::core::retry::RetryPolicy;
use crate::core::session::{SessionConfig, SessionStyles};
use crate::core::sink::OrderPolicy;
use crate::core::style::{Color, Style};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Read(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine config path")]
    NoHome,
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Output block ordering
    pub order: OrderPolicy,
    /// Stream kind for new sessions
    pub stream: StreamMode,
    /// Ceiling on waiting for an exit code after output ends
    pub exit_wait_secs: u64,
    /// Bytes per read from the child
    pub read_chunk_size: usize,
    /// Forced into LANG / LC_ALL of every child
    pub locale: String,
    /// Maximum number of stored output segments
    pub scrollback_limit: usize,
    /// Color scheme name
    pub color_scheme: String,
    /// Transient read error handling
    pub retry: RetryConfig,
    /// Initial environment overrides for children
    pub env: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            order: OrderPolicy::Append,
            stream: StreamMode::Auto,
            exit_wait_secs: 5,
            read_chunk_size: 4096,
            locale: "en_US.UTF-8".to_string(),
            scrollback_limit: 20_000,
            color_scheme: "default".to_string(),
            retry: RetryConfig::default(),
            env: BTreeMap::new(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            multiplier: policy.multiplier,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            multiplier: self.multiplier,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

impl Config {
    /// Load configuration from `~/.segshell/config.toml`, falling back to
    /// defaults when it is missing or malformed.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoHome)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    fn config_path() -> Option<PathBuf> {
        data_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get the color scheme
    pub fn get_color_scheme(&self) -> ColorScheme {
        ColorScheme::by_name(&self.color_scheme)
    }

    /// Settings for new sessions
    pub fn session_config(&self, scheme: &ColorScheme) -> SessionConfig {
        SessionConfig {
            exit_wait: Duration::from_secs(self.exit_wait_secs),
            read_chunk_size: self.read_chunk_size.max(1),
            retry: self.retry.policy(),
            styles: scheme.session_styles(),
        }
    }
}

/// Color scheme definition
#[derive(Debug, Clone, PartialEq)]
pub struct ColorScheme {
    pub name: String,

    // Prompt line
    pub prompt_dir: Color,
    pub prompt_symbol: Color,
    pub input_fg: Color,
    pub cursor_bg: Color,

    // Output
    /// Base for decoded child output (`None` keeps the terminal default)
    pub output_fg: Option<Color>,
    pub echo_fg: Color,
    pub info_fg: Color,
    pub success_fg: Color,
    pub failure_fg: Color,
    pub error_fg: Color,

    // Completion popup
    pub popup_bg: Color,
    pub popup_fg: Color,
    pub popup_selected_bg: Color,
    pub popup_selected_fg: Color,
    pub popup_border: Color,

    // Password mask overlay
    pub mask_fg: Color,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self::default_scheme()
    }
}

impl ColorScheme {
    /// Default color scheme
    pub fn default_scheme() -> Self {
        Self {
            name: "default".to_string(),

            prompt_dir: Color::BLUE,
            prompt_symbol: Color::GREEN,
            input_fg: Color::WHITE,
            cursor_bg: Color::WHITE,

            output_fg: None,
            echo_fg: Color::GRAY,
            info_fg: Color::CYAN,
            success_fg: Color::GREEN,
            failure_fg: Color::RED,
            error_fg: Color::RED,

            popup_bg: Color::Rgb(0, 0, 139),
            popup_fg: Color::Rgb(255, 255, 255),
            popup_selected_bg: Color::Rgb(255, 255, 255),
            popup_selected_fg: Color::Rgb(0, 0, 0),
            popup_border: Color::Rgb(100, 100, 255),

            mask_fg: Color::YELLOW,
        }
    }

    /// Solarized Dark scheme
    pub fn solarized_dark() -> Self {
        Self {
            name: "solarized-dark".to_string(),

            prompt_dir: Color::Rgb(38, 139, 210),
            prompt_symbol: Color::Rgb(133, 153, 0),
            input_fg: Color::Rgb(147, 161, 161),
            cursor_bg: Color::Rgb(147, 161, 161),

            output_fg: Some(Color::Rgb(131, 148, 150)),
            echo_fg: Color::Rgb(88, 110, 117),
            info_fg: Color::Rgb(42, 161, 152),
            success_fg: Color::Rgb(133, 153, 0),
            failure_fg: Color::Rgb(220, 50, 47),
            error_fg: Color::Rgb(203, 75, 22),

            popup_bg: Color::Rgb(0, 43, 54),
            popup_fg: Color::Rgb(147, 161, 161),
            popup_selected_bg: Color::Rgb(38, 139, 210),
            popup_selected_fg: Color::Rgb(253, 246, 227),
            popup_border: Color::Rgb(38, 139, 210),

            mask_fg: Color::Rgb(181, 137, 0),
        }
    }

    /// Nord scheme
    pub fn nord() -> Self {
        Self {
            name: "nord".to_string(),

            prompt_dir: Color::Rgb(136, 192, 208),
            prompt_symbol: Color::Rgb(163, 190, 140),
            input_fg: Color::Rgb(236, 239, 244),
            cursor_bg: Color::Rgb(216, 222, 233),

            output_fg: Some(Color::Rgb(216, 222, 233)),
            echo_fg: Color::Rgb(76, 86, 106),
            info_fg: Color::Rgb(143, 188, 187),
            success_fg: Color::Rgb(163, 190, 140),
            failure_fg: Color::Rgb(191, 97, 106),
            error_fg: Color::Rgb(208, 135, 112),

            popup_bg: Color::Rgb(46, 52, 64),
            popup_fg: Color::Rgb(216, 222, 233),
            popup_selected_bg: Color::Rgb(136, 192, 208),
            popup_selected_fg: Color::Rgb(46, 52, 64),
            popup_border: Color::Rgb(136, 192, 208),

            mask_fg: Color::Rgb(235, 203, 139),
        }
    }

    /// Get scheme by name
    pub fn by_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "solarized-dark" | "solarized_dark" | "solarized" => Self::solarized_dark(),
            "nord" => Self::nord(),
            _ => Self::default_scheme(),
        }
    }

    /// List available schemes
    pub fn list() -> Vec<&'static str> {
        vec!["default", "solarized-dark", "nord"]
    }

    /// Base style for child output
    pub fn output_style(&self) -> Style {
        Style {
            fg: self.output_fg,
            ..Style::default()
        }
    }

    pub fn echo_style(&self) -> Style {
        Style::new().fg(self.echo_fg)
    }

    pub fn info_style(&self) -> Style {
        Style::new().fg(self.info_fg)
    }

    pub fn error_style(&self) -> Style {
        Style::new().fg(self.error_fg).bold()
    }

    pub fn session_styles(&self) -> SessionStyles {
        SessionStyles {
            output: self.output_style(),
            success: Style::new().fg(self.success_fg),
            failure: Style::new().fg(self.failure_fg),
            diagnostic: self.error_style(),
        }
    }
}

/// `~/.segshell`, created on first use
pub fn data_dir() -> Option<PathBuf> {
    let dir = home_dir()?.join(".segshell");
    if !dir.exists() {
        let _ = fs::create_dir_all(&dir);
    }
    Some(dir)
}

// Get home directory
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
