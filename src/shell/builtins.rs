//! Built-in commands

use std::path::PathBuf;

use tracing::{info, warn};

use super::args::expand_vars;
use super::Shell;
use crate::config::{home_dir, ColorScheme};
use crate::core::ansi;
use crate::core::sink::lock_sink;
use crate::core::style::{Color, StyledSegment};

/// Commands handled without starting a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Builtin {
    Exit,
    Clear,
    Cd,
    Pwd,
    Echo,
    Alias,
    Unalias,
    Export,
    Env,
    History,
    Colors,
    Help,
    Run,
}

impl Builtin {
    pub(super) fn from_name(name: &str) -> Option<Self> {
        let builtin = match name {
            "exit" | "quit" => Builtin::Exit,
            "clear" => Builtin::Clear,
            "cd" => Builtin::Cd,
            "pwd" => Builtin::Pwd,
            "echo" => Builtin::Echo,
            "alias" => Builtin::Alias,
            "unalias" => Builtin::Unalias,
            "export" => Builtin::Export,
            "env" => Builtin::Env,
            "history" => Builtin::History,
            "colors" => Builtin::Colors,
            "help" => Builtin::Help,
            "run" => Builtin::Run,
            _ => return None,
        };
        Some(builtin)
    }
}

const HELP: &[(&str, &str)] = &[
    ("cd [dir]", "change directory (home by default)"),
    ("pwd", "print working directory"),
    ("echo text...", "print text; \\e and \\033 start colour codes"),
    ("alias [name[=cmd]]", "list, show or define aliases"),
    ("unalias name", "remove an alias"),
    ("export NAME=value", "set a variable for child processes"),
    ("env", "list exported variables"),
    ("history", "list command history"),
    ("colors [scheme]", "list or switch colour schemes"),
    ("run cmd args...", "run a program even if a builtin has its name"),
    ("clear", "clear the output"),
    ("exit, quit", "leave segshell"),
];

const KEYS: &[(&str, &str)] = &[
    ("Tab / Shift+Tab", "complete from history"),
    ("Up / Down", "walk history"),
    ("PageUp / PageDown", "scroll output"),
    ("Ctrl+C / Ctrl+Z / Ctrl+D", "interrupt / suspend / end input of the running program"),
    ("Ctrl+Q", "kill the running program, or quit when idle"),
];

impl Shell {
    pub(super) fn run_builtin(&mut self, builtin: Builtin, args: &[String]) {
        let rest = &args[1.min(args.len())..];
        match builtin {
            Builtin::Exit => {
                info!("Exit requested");
                self.quit = true;
            }
            Builtin::Clear => lock_sink(&self.sink).clear(),
            Builtin::Cd => self.change_dir(rest.first().map(String::as_str)),
            Builtin::Pwd => match std::env::current_dir() {
                Ok(dir) => self.print_info(dir.display().to_string()),
                Err(e) => self.print_error(format!("[pwd: {}]", e)),
            },
            Builtin::Echo => self.echo(rest),
            Builtin::Alias => self.alias(rest),
            Builtin::Unalias => self.unalias(rest),
            Builtin::Export => self.export(rest),
            Builtin::Env => self.list_env(),
            Builtin::History => self.list_history(),
            Builtin::Colors => self.colors(rest.first().map(String::as_str)),
            Builtin::Help => self.help(),
            Builtin::Run => {
                if rest.is_empty() {
                    self.print_error("[usage: run <command> [args...]]");
                } else {
                    self.launch(rest);
                }
            }
        }
    }

    fn change_dir(&mut self, target: Option<&str>) {
        let target = match target {
            Some(dir) => expand_home(&expand_vars(dir, &self.env)),
            None => match home_dir() {
                Some(home) => home,
                None => {
                    self.print_error("[cd: HOME not set]");
                    return;
                }
            },
        };

        match std::env::set_current_dir(&target) {
            Ok(()) => info!("Changed directory to {}", target.display()),
            Err(e) => self.print_error(format!("[cd: {}: {}]", target.display(), e)),
        }
    }

    fn echo(&mut self, rest: &[String]) {
        let text: Vec<String> = rest.iter().map(|a| expand_vars(a, &self.env)).collect();
        let base = self.scheme.output_style();
        let mut segments = ansi::decode(&unescape(&text.join(" ")), base);
        segments.push(StyledSegment::newline(base));

        let mut sink = lock_sink(&self.sink);
        sink.ensure_line_break(base);
        sink.push(segments);
    }

    fn alias(&mut self, rest: &[String]) {
        if rest.is_empty() {
            if self.aliases.is_empty() {
                self.print_info("no aliases defined; use alias name=command");
                return;
            }
            let listing: Vec<String> = self
                .aliases
                .iter()
                .map(|(name, value)| format!("{}='{}'", name, value))
                .collect();
            for line in listing {
                self.print_info(line);
            }
            return;
        }

        let definition = rest.join(" ");
        let Some((name, value)) = definition.split_once('=') else {
            match self.aliases.get(&definition) {
                Some(value) => self.print_info(format!("{}='{}'", definition, value)),
                None => self.print_error(format!("[alias: {}: not found]", definition)),
            }
            return;
        };

        let value = value.trim_matches(|c| c == '"' || c == '\'');
        if name.is_empty() || name.contains(char::is_whitespace) {
            self.print_error("[usage: alias name=command]");
            return;
        }

        match self.aliases.set(name, value) {
            Ok(()) => self.print_info(format!("alias {}='{}'", name, value)),
            Err(e) => {
                warn!("Failed to save aliases: {}", e);
                self.print_error(format!("[alias: failed to save: {}]", e));
            }
        }
    }

    fn unalias(&mut self, rest: &[String]) {
        let Some(name) = rest.first() else {
            self.print_error("[usage: unalias name]");
            return;
        };
        match self.aliases.remove(name) {
            Ok(true) => self.print_info(format!("alias {} removed", name)),
            Ok(false) => self.print_error(format!("[unalias: {}: not found]", name)),
            Err(e) => {
                warn!("Failed to save aliases: {}", e);
                self.print_error(format!("[unalias: failed to save: {}]", e));
            }
        }
    }

    fn export(&mut self, rest: &[String]) {
        if rest.is_empty() {
            self.list_env();
            return;
        }

        for assignment in rest {
            let Some((name, value)) = assignment.split_once('=') else {
                self.print_error(format!("[export: {}: expected NAME=value]", assignment));
                continue;
            };
            if !is_var_name(name) {
                self.print_error(format!("[export: {}: invalid name]", name));
                continue;
            }
            let value = expand_vars(value.trim_matches(|c| c == '"' || c == '\''), &self.env);
            self.print_info(format!("{}={}", name, value));
            self.env.insert(name.to_string(), value);
        }
    }

    fn list_env(&mut self) {
        if self.env.is_empty() {
            self.print_info("no variables exported");
            return;
        }
        let listing: Vec<String> = self
            .env
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        for line in listing {
            self.print_info(line);
        }
    }

    fn list_history(&mut self) {
        let listing: Vec<String> = self
            .history
            .entries()
            .iter()
            .enumerate()
            .map(|(i, entry)| format!("{:>4}  {}", i + 1, entry.command))
            .collect();
        for line in listing {
            self.print_info(line);
        }
    }

    fn colors(&mut self, name: Option<&str>) {
        let Some(name) = name else {
            for scheme in ColorScheme::list() {
                let marker = if scheme == self.scheme.name { "*" } else { " " };
                self.print_info(format!("{} {}", marker, scheme));
            }
            self.palette();
            return;
        };

        if !ColorScheme::list().contains(&name) {
            self.print_error(format!(
                "[colors: unknown scheme {}; available: {}]",
                name,
                ColorScheme::list().join(", ")
            ));
            return;
        }

        self.scheme = ColorScheme::by_name(name);
        self.config.color_scheme = name.to_string();
        info!("Switched color scheme to {}", name);
        if let Err(e) = self.config.save() {
            warn!("Failed to save config: {}", e);
            self.print_error(format!("[colors: failed to save config: {}]", e));
            return;
        }
        self.print_info(format!("color scheme set to {}", name));
    }

    /// One swatch per palette entry, normal then bright.
    fn palette(&mut self) {
        let base = self.scheme.output_style();
        let mut sink = lock_sink(&self.sink);
        sink.ensure_line_break(base);
        for row in [0u8, 8] {
            let mut segments: Vec<StyledSegment> = (row..row + 8)
                .map(|n| StyledSegment::new(format!(" {:>2} ", n), base.bg(Color::palette(n))))
                .collect();
            segments.push(StyledSegment::newline(base));
            sink.push(segments);
        }
    }

    fn help(&mut self) {
        let width = HELP
            .iter()
            .chain(KEYS)
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0);
        for (name, text) in HELP.iter().chain(KEYS) {
            self.print_info(format!("{:<width$}  {}", name, text, width = width));
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Turn `\e`, `\033` and `\x1b` into a real escape character.
fn unescape(text: &str) -> String {
    text.replace("\\033", "\x1b")
        .replace("\\x1b", "\x1b")
        .replace("\\x1B", "\x1b")
        .replace("\\e", "\x1b")
}

fn is_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
