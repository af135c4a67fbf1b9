//! segshell - an interactive shell front-end
//!
//! Reads a command line, runs it as a builtin or as a child process, and
//! streams the child's output back into a colour-aware scroll buffer while
//! the keyboard stays connected to the child.
//!
//! # Quick Start
//!
//! ```text
//! segshell                   # Start with settings from ~/.segshell/config.toml
//! segshell --order prepend   # Newest command output first
//! segshell --pipe            # Run children on pipes instead of a pseudo terminal
//! ```
//!
//! # Keys
//!
//! | Key | Idle | While a program runs |
//! |-----|------|----------------------|
//! | Enter | run the line | send CR |
//! | Tab / Shift+Tab | complete from history | send to program |
//! | Ctrl+C | quit | interrupt |
//! | Ctrl+Z / Ctrl+D | - | suspend / end of input |
//! | Ctrl+Q | quit | kill the program |
//! | PageUp / PageDown | scroll output | scroll output |

mod aliases;
mod config;
mod core;
mod editor;
mod history;
mod shell;
mod ui;

use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyEventKind};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::aliases::Aliases;
use crate::config::{data_dir, home_dir, ColorScheme, Config};
use crate::core::pty::StreamMode;
use crate::core::session::SessionEvent;
use crate::core::sink::{lock_sink, OrderPolicy, OutputSink};
use crate::history::CommandHistory;
use crate::shell::Shell;
use crate::ui::{Dispatch, InputDispatcher, Renderer, View};

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Input poll interval
const POLL_TIMEOUT: Duration = Duration::from_millis(20);

/// Cursor blink half-period
const BLINK_INTERVAL: Duration = Duration::from_millis(500);

/// Overrides from the command line
#[derive(Debug, Default, PartialEq)]
struct CliOptions {
    order: Option<OrderPolicy>,
    pipe: bool,
    scheme: Option<String>,
}

impl CliOptions {
    /// Apply on top of the config file
    fn apply(&self, config: &mut Config) {
        if let Some(order) = self.order {
            config.order = order;
        }
        if self.pipe {
            config.stream = StreamMode::Pipe;
        }
        if let Some(scheme) = &self.scheme {
            config.color_scheme = scheme.clone();
        }
    }
}

fn print_version() {
    eprintln!("segshell {}", VERSION);
}

fn print_help() {
    eprintln!("segshell {} - interactive shell front-end", VERSION);
    eprintln!();
    eprintln!("Usage: segshell [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --order <POLICY>      Output order: append (default) or prepend");
    eprintln!("  --pipe                Run programs on pipes instead of a pseudo terminal");
    eprintln!("  --scheme <NAME>       Color scheme: {}", ColorScheme::list().join(", "));
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Files:");
    eprintln!("  ~/.segshell/config.toml   settings");
    eprintln!("  ~/.segshell/history       command history");
    eprintln!("  ~/.segshell/aliases       aliases (name=command), over those in ~/.zshrc");
    eprintln!("  ~/.segshell/segshell.log  log (level via SEGSHELL_LOG, e.g. SEGSHELL_LOG=debug)");
    eprintln!();
    eprintln!("Type 'help' at the prompt for builtins and keys.");
}

enum Command {
    Run(CliOptions),
    Help,
    Version,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut options = CliOptions::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-v" | "--version" => return Ok(Command::Version),
            "--order" => {
                let value = iter.next().ok_or("Missing value for --order")?;
                let order = OrderPolicy::parse(value)
                    .ok_or_else(|| format!("Unknown order: {} (append or prepend)", value))?;
                options.order = Some(order);
            }
            "--pipe" => options.pipe = true,
            "--scheme" => {
                let value = iter.next().ok_or("Missing value for --scheme")?;
                if !ColorScheme::list().contains(&value.as_str()) {
                    return Err(format!("Unknown color scheme: {}", value));
                }
                options.scheme = Some(value.clone());
            }
            other => return Err(format!("Unknown argument: {}. Use -h for help.", other)),
        }
    }

    Ok(Command::Run(options))
}

/// Log to `~/.segshell/segshell.log`; the terminal belongs to the UI.
fn init_logging() {
    let Some(dir) = data_dir() else {
        return;
    };
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("segshell.log"));

    let Ok(file) = log_file else {
        return;
    };
    let filter = EnvFilter::try_from_env("SEGSHELL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(Command::Run(options)) => options,
        Ok(Command::Help) => {
            print_help();
            return Ok(());
        }
        Ok(Command::Version) => {
            print_version();
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(2);
        }
    };

    init_logging();
    info!("segshell {} starting", VERSION);

    let mut config = Config::load();
    options.apply(&mut config);
    info!(
        "Order: {:?}, stream: {:?}, scheme: {}",
        config.order, config.stream, config.color_scheme
    );

    let (events_tx, events_rx) = mpsc::channel();
    let sink = OutputSink::shared(config.order, config.scrollback_limit);
    let mut shell = Shell::new(
        config,
        Aliases::load(),
        CommandHistory::new(),
        sink,
        events_tx,
    );

    let (cols, rows) = Renderer::size()?;
    info!("Terminal size: {}x{}", cols, rows);
    shell.resize(cols, rows.saturating_sub(1));

    let mut renderer = Renderer::new();
    renderer.init()?;

    let result = run_main_loop(&mut shell, &mut renderer, &events_rx);

    shell.terminate();
    if let Err(e) = renderer.cleanup() {
        warn!("Terminal cleanup failed: {}", e);
    }
    info!("segshell exiting");
    result
}

fn run_main_loop(
    shell: &mut Shell,
    renderer: &mut Renderer,
    events: &Receiver<SessionEvent>,
) -> anyhow::Result<()> {
    let mut dispatcher = InputDispatcher::new();
    let mut scroll = 0usize;
    let mut cursor_visible = true;
    let mut last_blink = Instant::now();
    let mut dirty = true;

    loop {
        // Session workers
        while let Ok(event) = events.try_recv() {
            dirty |= shell.handle_event(event);
        }
        dispatcher.observe_output(shell);

        if last_blink.elapsed() >= BLINK_INTERVAL {
            cursor_visible = !cursor_visible;
            last_blink = Instant::now();
            dirty = true;
        }

        if dirty {
            scroll = draw(renderer, shell, &dispatcher, scroll, cursor_visible)?;
            dirty = false;
        }

        if !event::poll(POLL_TIMEOUT)? {
            continue;
        }

        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                match dispatcher.dispatch(&key, shell) {
                    Dispatch::Quit => break,
                    Dispatch::Redraw => {
                        // Typing returns to the newest output
                        scroll = 0;
                        cursor_visible = true;
                        last_blink = Instant::now();
                        dirty = true;
                    }
                    Dispatch::Scroll(delta) => {
                        scroll = scroll.saturating_add_signed(delta);
                        dirty = true;
                    }
                    Dispatch::Ignored => {}
                }
            }
            Event::Resize(cols, rows) => {
                shell.resize(cols, rows.saturating_sub(1));
                dirty = true;
            }
            _ => {}
        }

        if shell.should_quit() {
            break;
        }
    }

    Ok(())
}

/// Paint one frame. Returns the clamped scroll offset.
fn draw(
    renderer: &mut Renderer,
    shell: &Shell,
    dispatcher: &InputDispatcher,
    scroll: usize,
    cursor_visible: bool,
) -> anyhow::Result<usize> {
    let cwd = display_cwd();
    let input = dispatcher.editor().text();
    let running = shell.live_session().map(|s| s.command().to_string());
    let sink = lock_sink(shell.sink());

    let view = View {
        scheme: shell.scheme(),
        sink: &sink,
        cwd: &cwd,
        input: &input,
        cursor: dispatcher.editor().cursor(),
        cursor_visible,
        completion: Some(dispatcher.editor().completion()),
        running: running.as_deref(),
        masked: dispatcher.masked(),
        scroll,
    };
    Ok(renderer.render(&view)?)
}

/// Working directory with the home prefix shortened to `~`
fn display_cwd() -> String {
    let Ok(cwd) = std::env::current_dir() else {
        return "?".to_string();
    };
    if let Some(rest) = home_dir().and_then(|home| cwd.strip_prefix(home).ok().map(|p| p.to_path_buf())) {
        if rest.as_os_str().is_empty() {
            return "~".to_string();
        }
        return format!("~/{}", rest.display());
    }
    cwd.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn options(items: &[&str]) -> CliOptions {
        match parse_args(&args(items)) {
            Ok(Command::Run(options)) => options,
            _ => panic!("expected run options for {:?}", items),
        }
    }

    #[test]
    fn test_parse_args_options() {
        assert_eq!(options(&[]), CliOptions::default());
        assert_eq!(
            options(&["--order", "prepend", "--pipe", "--scheme", "nord"]),
            CliOptions {
                order: Some(OrderPolicy::Prepend),
                pipe: true,
                scheme: Some("nord".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_args_help_and_errors() {
        assert!(matches!(parse_args(&args(&["-h"])), Ok(Command::Help)));
        assert!(matches!(parse_args(&args(&["--version"])), Ok(Command::Version)));
        assert!(parse_args(&args(&["--order"])).is_err());
        assert!(parse_args(&args(&["--order", "sideways"])).is_err());
        assert!(parse_args(&args(&["--scheme", "nope"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let mut config = Config::default();
        options(&["--order", "prepend", "--pipe"]).apply(&mut config);
        assert_eq!(config.order, OrderPolicy::Prepend);
        assert_eq!(config.stream, StreamMode::Pipe);
        assert_eq!(config.color_scheme, "default");
    }
}
