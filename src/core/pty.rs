//! Child process spawner
//!
//! Attaches a command to a duplex byte stream: a pseudo-terminal when one
//! can be opened, otherwise a pipe pair with stdout and stderr merged.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open pseudo terminal: {0}")]
    Open(String),

    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("Failed to create pipe: {0}")]
    Pipe(#[source] io::Error),

    #[error("Failed to resize pseudo terminal: {0}")]
    Resize(String),

    #[error("Empty command line")]
    EmptyCommand,
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// Which kind of stream to attach
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Pseudo-terminal, falling back to pipes
    #[default]
    Auto,
    Pty,
    Pipe,
}

impl StreamMode {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "auto" => Some(StreamMode::Auto),
            "pty" => Some(StreamMode::Pty),
            "pipe" => Some(StreamMode::Pipe),
            _ => None,
        }
    }
}

/// The kind of stream actually attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Pty,
    Pipe,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Pty => write!(f, "pty"),
            StreamKind::Pipe => write!(f, "pipe"),
        }
    }
}

/// Handle on a running child
pub trait ChildProcess: Send {
    fn pid(&self) -> Option<u32>;
    /// Exit code if the process has exited
    fn try_wait(&mut self) -> io::Result<Option<i32>>;
    fn kill(&mut self) -> io::Result<()>;
}

/// Forwards geometry changes to the terminal side of the stream
pub trait Resizer: Send {
    fn resize(&self, cols: u16, rows: u16) -> Result<()>;
}

/// A launched child and its stream
pub struct Attachment {
    pub kind: StreamKind,
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    pub process: Option<Box<dyn ChildProcess>>,
    pub resizer: Option<Box<dyn Resizer>>,
}

/// Everything needed to launch one command
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    /// Overrides applied on top of the inherited environment
    pub env: BTreeMap<String, String>,
    pub locale: String,
    pub cols: u16,
    pub rows: u16,
    pub mode: StreamMode,
}

/// Environment for a child: inherited, then overrides, then the forced
/// terminal and locale variables.
pub fn child_env(
    inherited: impl IntoIterator<Item = (String, String)>,
    overrides: &BTreeMap<String, String>,
    locale: &str,
) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = inherited.into_iter().collect();
    for (name, value) in overrides {
        env.insert(name.clone(), value.clone());
    }
    env.insert("TERM".to_string(), "xterm-256color".to_string());
    env.insert("COLORTERM".to_string(), "truecolor".to_string());
    env.insert("LANG".to_string(), locale.to_string());
    env.insert("LC_ALL".to_string(), locale.to_string());
    env
}

/// Launch the command described by `request`.
pub fn spawn(request: &SpawnRequest) -> Result<Attachment> {
    if request.argv.is_empty() {
        return Err(PtyError::EmptyCommand);
    }
    let env = child_env(std::env::vars(), &request.env, &request.locale);

    match request.mode {
        StreamMode::Pty => spawn_pty(request, &env),
        StreamMode::Pipe => spawn_pipe(request, &env),
        StreamMode::Auto => match spawn_pty(request, &env) {
            Err(PtyError::Open(reason)) => {
                warn!("PTY unavailable ({}), using pipes", reason);
                spawn_pipe(request, &env)
            }
            other => other,
        },
    }
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows: rows.max(1),
        cols: cols.max(1),
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn spawn_pty(request: &SpawnRequest, env: &BTreeMap<String, String>) -> Result<Attachment> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(pty_size(request.cols, request.rows))
        .map_err(|e| PtyError::Open(e.to_string()))?;

    let mut cmd = CommandBuilder::new(&request.argv[0]);
    cmd.args(&request.argv[1..]);
    cmd.cwd(&request.cwd);
    cmd.env_clear();
    for (name, value) in env {
        cmd.env(name, value);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| PtyError::Spawn {
            program: request.argv[0].clone(),
            reason: e.to_string(),
        })?;
    // The master only sees end-of-stream once every slave handle is closed
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| PtyError::Open(e.to_string()))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| PtyError::Open(e.to_string()))?;

    debug!("Spawned {:?} on pty (pid {:?})", request.argv, child.process_id());

    Ok(Attachment {
        kind: StreamKind::Pty,
        reader,
        writer,
        process: Some(Box::new(PtyChild(child))),
        resizer: Some(Box::new(PtyResizer(pair.master))),
    })
}

fn spawn_pipe(request: &SpawnRequest, env: &BTreeMap<String, String>) -> Result<Attachment> {
    let (reader, output) = io::pipe().map_err(PtyError::Pipe)?;
    let errors = output.try_clone().map_err(PtyError::Pipe)?;

    let mut child = {
        // The Command holds write ends of the pipe; it must be gone before
        // the reader can see end-of-stream
        let mut cmd = Command::new(&request.argv[0]);
        cmd.args(&request.argv[1..])
            .current_dir(&request.cwd)
            .env_clear()
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(output)
            .stderr(errors);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd.spawn().map_err(|e| PtyError::Spawn {
            program: request.argv[0].clone(),
            reason: e.to_string(),
        })?
    };

    let writer: Box<dyn Write + Send> = match child.stdin.take() {
        Some(stdin) => Box::new(stdin),
        None => Box::new(io::sink()),
    };

    debug!("Spawned {:?} on pipes (pid {})", request.argv, child.id());

    Ok(Attachment {
        kind: StreamKind::Pipe,
        reader: Box::new(reader),
        writer,
        process: Some(Box::new(child)),
        resizer: None,
    })
}

struct PtyChild(Box<dyn portable_pty::Child + Send + Sync>);

impl ChildProcess for PtyChild {
    fn pid(&self) -> Option<u32> {
        self.0.process_id()
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.0.try_wait()?.map(|status| status.exit_code() as i32))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.0.kill()
    }
}

impl ChildProcess for std::process::Child {
    fn pid(&self) -> Option<u32> {
        Some(self.id())
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(std::process::Child::try_wait(self)?.map(exit_code))
    }

    fn kill(&mut self) -> io::Result<()> {
        std::process::Child::kill(self)
    }
}

/// Exit code, with death-by-signal reported shell style (128 + signal)
fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

struct PtyResizer(Box<dyn MasterPty + Send>);

impl Resizer for PtyResizer {
    fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.0
            .resize(pty_size(cols, rows))
            .map_err(|e| PtyError::Resize(e.to_string()))
    }
}
