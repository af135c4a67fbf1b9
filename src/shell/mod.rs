//! Command router
//!
//! [`Shell`] owns the at-most-one live [`Session`] and everything a
//! submitted line needs: aliases, history, environment overrides and the
//! shared output sink. A line is echoed, alias-expanded, and then either run
//! as a builtin or launched as a new session.

pub mod args;
mod builtins;

use std::collections::BTreeMap;
use std::sync::mpsc::Sender;

use tracing::{error, info, warn};

use crate::aliases::Aliases;
use crate::config::{ColorScheme, Config};
use crate::core::pty::SpawnRequest;
use crate::core::session::{Session, SessionEvent};
use crate::core::sink::{lock_sink, SharedSink};
use crate::core::style::Style;
use crate::history::CommandHistory;

use self::args::{expand_vars, parse_args};
use self::builtins::Builtin;

pub struct Shell {
    config: Config,
    scheme: ColorScheme,
    sink: SharedSink,
    aliases: Aliases,
    history: CommandHistory,
    /// Variables set with `export`, applied over the inherited environment
    env: BTreeMap<String, String>,
    session: Option<Session>,
    next_id: u64,
    events: Sender<SessionEvent>,
    cols: u16,
    rows: u16,
    quit: bool,
}

impl Shell {
    pub fn new(
        config: Config,
        aliases: Aliases,
        history: CommandHistory,
        sink: SharedSink,
        events: Sender<SessionEvent>,
    ) -> Self {
        let scheme = config.get_color_scheme();
        let env = config.env.clone();
        Self {
            config,
            scheme,
            sink,
            aliases,
            history,
            env,
            session: None,
            next_id: 1,
            events,
            cols: 80,
            rows: 24,
            quit: false,
        }
    }

    pub fn scheme(&self) -> &ColorScheme {
        &self.scheme
    }

    pub fn sink(&self) -> &SharedSink {
        &self.sink
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    /// The session, while it has not closed
    pub fn live_session(&self) -> Option<&Session> {
        self.session.as_ref().filter(|s| s.is_live())
    }

    /// Run one submitted line.
    ///
    /// Rejected with a diagnostic while a session is live, so at most one
    /// child ever runs.
    pub fn submit(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        if let Some(session) = self.live_session() {
            warn!(
                "Rejected {:?}: session {} is still live",
                line,
                session.id()
            );
            let message = format!("[busy: {} is still running]", session.command());
            self.print(message, self.scheme.error_style());
            return;
        }

        self.history.add(line);
        {
            let mut sink = lock_sink(&self.sink);
            sink.begin_block();
            sink.push_line(format!("> {}", line), self.scheme.echo_style());
        }

        let parsed = parse_args(line);
        let args = match self.aliases.expand(&parsed) {
            Some(expanded) => parse_args(&expanded),
            None => parsed,
        };
        let Some(name) = args.first() else {
            return;
        };

        match Builtin::from_name(name) {
            Some(builtin) => self.run_builtin(builtin, &args),
            None => self.launch(&args),
        }
    }

    /// Start a session for `argv`. Launch failures become one error line.
    fn launch(&mut self, argv: &[String]) {
        let argv: Vec<String> = argv.iter().map(|a| expand_vars(a, &self.env)).collect();
        let cwd = match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                self.print_error(format!("[cannot determine working directory: {}]", e));
                return;
            }
        };

        let request = SpawnRequest {
            argv,
            cwd,
            env: self.env.clone(),
            locale: self.config.locale.clone(),
            cols: self.cols,
            rows: self.rows,
            mode: self.config.stream,
        };

        let id = self.next_id;
        self.next_id += 1;
        let session_config = self.config.session_config(&self.scheme);

        match Session::start(
            id,
            &request,
            &session_config,
            self.sink.clone(),
            self.events.clone(),
        ) {
            Ok(session) => self.session = Some(session),
            Err(e) => {
                error!("Failed to launch {:?}: {}", request.argv, e);
                self.print_error(format!("[{}]", e));
            }
        }
    }

    /// React to a session worker notification. Returns true when the screen
    /// needs a redraw.
    pub fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Output => true,
            SessionEvent::Closed { id, outcome } => {
                if self.session.as_ref().is_some_and(|s| s.id() == id) {
                    info!("Session {} released: {}", id, outcome);
                    self.session = None;
                }
                true
            }
        }
    }

    /// Emergency stop of the live session.
    pub fn terminate(&mut self) {
        if let Some(session) = self.live_session() {
            session.terminate();
        }
    }

    /// Record the output area geometry and forward it to the live session.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.cols = cols.max(1);
        self.rows = rows.max(1);
        if let Some(session) = self.live_session() {
            if let Err(e) = session.resize(self.cols, self.rows) {
                warn!("Resize of session {} failed: {}", session.id(), e);
            }
        }
    }

    fn print(&self, text: impl Into<String>, style: Style) {
        lock_sink(&self.sink).push_line(text, style);
    }

    fn print_error(&self, text: impl Into<String>) {
        self.print(text, self.scheme.error_style());
    }

    fn print_info(&self, text: impl Into<String>) {
        self.print(text, self.scheme.info_style());
    }
}
