//! Session management
//!
//! A session is one live child process attached to a duplex stream. Two
//! worker threads run alongside the UI event loop:
//!
//! - the **reader** pulls chunks from the stream, filters and decodes them,
//!   and appends the segments to the output sink;
//! - the **waiter** polls the process for its exit code and closes the
//!   session once the reader has drained (or the exit-wait ceiling passes).
//!
//! A third thread owns the write side so that a child which stops reading
//! its input never stalls the caller of [`Session::write`].
//!
//! ```text
//! Starting ──> Running ──> Draining ──> Closed
//!                 └────────────────────────^  (terminate)
//! ```
//!
//! Whoever moves the state to `Closed` (compare-and-swap) owns cleanup: it
//! releases the stream and emits the single status line.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::ansi::AnsiDecoder;
use super::filter::ControlFilter;
use super::pty::{self, Attachment, ChildProcess, PtyError, Resizer, SpawnRequest, StreamKind};
use super::retry::{is_transient, RetryPolicy};
use super::signal::ControlSignal;
use super::sink::{lock_sink, SharedSink};
use super::style::{Color, Style, StyledSegment};
use super::utf8::Utf8Stream;

/// Interval between exit polls
const EXIT_POLL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error("No running process")]
    NotRunning,
}

/// Lifecycle state (`Idle` is the absence of a session)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Starting = 0,
    Running = 1,
    Draining = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Starting,
            1 => SessionState::Running,
            2 => SessionState::Draining,
            _ => SessionState::Closed,
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Succeeded,
    ExitCode(i32),
    TimedOut,
    Terminated,
    /// Stream ended and no process handle was available to ask
    Unknown,
}

impl ExitOutcome {
    fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => ExitOutcome::Succeeded,
            Some(n) => ExitOutcome::ExitCode(n),
            None => ExitOutcome::Unknown,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Succeeded | ExitOutcome::Unknown)
    }
}

impl std::fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitOutcome::Succeeded => write!(f, "succeeded"),
            ExitOutcome::ExitCode(n) => write!(f, "exited with code {}", n),
            ExitOutcome::TimedOut => write!(f, "timed out waiting for exit"),
            ExitOutcome::Terminated => write!(f, "terminated"),
            ExitOutcome::Unknown => write!(f, "finished"),
        }
    }
}

/// Session events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// New segments are in the sink
    Output,
    /// Session reached `Closed`
    Closed { id: u64, outcome: ExitOutcome },
}

/// Styles used for what a session writes into the sink
#[derive(Debug, Clone, Copy)]
pub struct SessionStyles {
    /// Base style the decoder resets to
    pub output: Style,
    pub success: Style,
    pub failure: Style,
    pub diagnostic: Style,
}

impl Default for SessionStyles {
    fn default() -> Self {
        Self {
            output: Style::default(),
            success: Style::new().fg(Color::GREEN),
            failure: Style::new().fg(Color::RED),
            diagnostic: Style::new().fg(Color::RED).bold(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Ceiling on waiting for the exit code once output has drained
    pub exit_wait: Duration,
    pub read_chunk_size: usize,
    pub retry: RetryPolicy,
    pub styles: SessionStyles,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            exit_wait: Duration::from_secs(5),
            read_chunk_size: 4096,
            retry: RetryPolicy::default(),
            styles: SessionStyles::default(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared by the session handle and its workers
struct Shared {
    id: u64,
    state: AtomicU8,
    sink: SharedSink,
    events: Sender<SessionEvent>,
    styles: SessionStyles,
    pid: Option<u32>,
    /// Queue to the writer thread; dropping it ends that thread
    input: Mutex<Option<Sender<Vec<u8>>>>,
    resizer: Mutex<Option<Box<dyn Resizer>>>,
    process: Mutex<Option<Box<dyn ChildProcess>>>,
    /// The process has been observed to exit
    exited: AtomicBool,
    /// The reader has stopped
    drained: AtomicBool,
}

impl Shared {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if moved {
            debug!("Session {}: {:?} -> {:?}", self.id, from, to);
        }
        moved
    }

    /// Move to `Closed`. Only the first caller gets `true`.
    fn close(&self) -> bool {
        let previous = self
            .state
            .swap(SessionState::Closed as u8, Ordering::SeqCst);
        previous != SessionState::Closed as u8
    }

    /// Drop the write side and the PTY master. Safe to call repeatedly.
    fn release(&self) {
        let input = lock(&self.input).take();
        let resizer = lock(&self.resizer).take();
        if input.is_some() || resizer.is_some() {
            debug!("Session {}: stream released", self.id);
        }
    }

    /// Append decoded output unless the session has already closed.
    fn emit(&self, segments: Vec<StyledSegment>) -> bool {
        if segments.is_empty() {
            return true;
        }
        {
            let mut sink = lock_sink(&self.sink);
            if self.state() == SessionState::Closed {
                return false;
            }
            sink.push(segments);
        }
        let _ = self.events.send(SessionEvent::Output);
        true
    }

    fn diagnostic(&self, message: &str) {
        lock_sink(&self.sink).push_line(format!("[{}]", message), self.styles.diagnostic);
        let _ = self.events.send(SessionEvent::Output);
    }

    /// Worker-side diagnostic; dropped once the status line is out.
    fn report(&self, message: &str) {
        {
            let mut sink = lock_sink(&self.sink);
            if self.state() == SessionState::Closed {
                return;
            }
            sink.push_line(format!("[{}]", message), self.styles.diagnostic);
        }
        let _ = self.events.send(SessionEvent::Output);
    }

    /// Kill the child, and its process group where there is one.
    fn kill(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            match super::signal::deliver(pid, libc::SIGKILL, true) {
                Ok(()) => return,
                Err(e) => warn!("Session {}: kill of group {} failed: {}", self.id, pid, e),
            }
        }
        if let Some(process) = lock(&self.process).as_mut() {
            if let Err(e) = process.kill() {
                warn!("Session {}: kill failed: {}", self.id, e);
            }
        }
    }

    /// Cleanup performed by whoever won [`Shared::close`]
    fn finish(&self, outcome: ExitOutcome) {
        self.release();
        info!("Session {} closed: {}", self.id, outcome);

        let style = if outcome.is_success() {
            self.styles.success
        } else {
            self.styles.failure
        };
        lock_sink(&self.sink).push_line(format!("[{}]", outcome), style);
        let _ = self.events.send(SessionEvent::Closed {
            id: self.id,
            outcome,
        });
    }

    fn finalize(&self, outcome: ExitOutcome) -> bool {
        if !self.close() {
            return false;
        }
        self.finish(outcome);
        true
    }

    /// Poll the process. `Some(code)` once it has exited (`Some(None)` if
    /// there is no handle or the code cannot be read).
    fn poll_exit(&self) -> Option<Option<i32>> {
        let mut process = lock(&self.process);
        let Some(child) = process.as_mut() else {
            return Some(None);
        };
        match child.try_wait() {
            Ok(Some(code)) => {
                self.exited.store(true, Ordering::SeqCst);
                Some(Some(code))
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Session {}: wait failed: {}", self.id, e);
                self.exited.store(true, Ordering::SeqCst);
                Some(None)
            }
        }
    }

    /// Collect the exit status of a killed child so it does not linger.
    fn reap(&self, limit: Duration) {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            match self.poll_exit() {
                Some(_) => return,
                None => thread::sleep(EXIT_POLL),
            }
        }
        warn!("Session {}: process not reaped", self.id);
    }
}

/// A shell session
pub struct Session {
    id: u64,
    command: String,
    kind: StreamKind,
    pid: Option<u32>,
    shared: Arc<Shared>,
    reader_thread: Option<JoinHandle<()>>,
    writer_thread: Option<JoinHandle<()>>,
    waiter_thread: Option<JoinHandle<()>>,
}

impl Session {
    /// Spawn `request` and start streaming its output into `sink`.
    ///
    /// A launch failure leaves nothing running and nothing in the sink; the
    /// caller reports it.
    pub fn start(
        id: u64,
        request: &SpawnRequest,
        config: &SessionConfig,
        sink: SharedSink,
        events: Sender<SessionEvent>,
    ) -> Result<Self, SessionError> {
        let attachment = pty::spawn(request)?;
        info!(
            "Session {} started: {:?} via {} ({}x{})",
            id, request.argv, attachment.kind, request.cols, request.rows
        );
        Ok(Self::attach(
            id,
            request.argv.join(" "),
            attachment,
            config,
            sink,
            events,
        ))
    }

    /// Run the session workers over an already launched child.
    pub fn attach(
        id: u64,
        command: impl Into<String>,
        attachment: Attachment,
        config: &SessionConfig,
        sink: SharedSink,
        events: Sender<SessionEvent>,
    ) -> Self {
        let Attachment {
            kind,
            reader,
            writer,
            process,
            resizer,
        } = attachment;
        let pid = process.as_ref().and_then(|p| p.pid());
        let (input, queued) = mpsc::channel();

        let shared = Arc::new(Shared {
            id,
            state: AtomicU8::new(SessionState::Starting as u8),
            sink,
            events,
            styles: config.styles,
            pid,
            input: Mutex::new(Some(input)),
            resizer: Mutex::new(resizer),
            process: Mutex::new(process),
            exited: AtomicBool::new(false),
            drained: AtomicBool::new(false),
        });

        // Workers must observe Running from their first iteration
        shared.transition(SessionState::Starting, SessionState::Running);

        let reader_thread = {
            let shared = shared.clone();
            let chunk = config.read_chunk_size.max(1);
            let retry = config.retry.clone();
            thread::spawn(move || read_output(shared, reader, chunk, retry))
        };

        let writer_thread = {
            let shared = shared.clone();
            thread::spawn(move || write_input(shared, writer, queued))
        };

        let waiter_thread = {
            let shared = shared.clone();
            let exit_wait = config.exit_wait;
            thread::spawn(move || watch_exit(shared, exit_wait))
        };

        Self {
            id,
            command: command.into(),
            kind,
            pid,
            shared,
            reader_thread: Some(reader_thread),
            writer_thread: Some(writer_thread),
            waiter_thread: Some(waiter_thread),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Accepting input
    pub fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    /// Not yet closed
    pub fn is_live(&self) -> bool {
        self.state() != SessionState::Closed
    }

    /// Queue raw bytes for the child. Never blocks; a failed write is
    /// reported by the writer thread, which moves the session to `Draining`.
    pub fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let queued = self.is_running()
            && lock(&self.shared.input)
                .as_ref()
                .is_some_and(|input| input.send(data.to_vec()).is_ok());
        if !queued {
            self.shared.diagnostic("no running process");
            return Err(SessionError::NotRunning);
        }
        Ok(())
    }

    /// Deliver a control signal, as an OS signal where the process handle
    /// allows it and as the in-band control byte otherwise.
    pub fn signal(&self, signal: ControlSignal) -> Result<(), SessionError> {
        if !self.is_running() {
            self.shared.diagnostic("no running process");
            return Err(SessionError::NotRunning);
        }

        #[cfg(unix)]
        if let (Some(signum), Some(pid)) = (signal.os_signal(), self.pid) {
            match super::signal::deliver(pid, signum, true) {
                Ok(()) => {
                    info!("Session {}: sent {} to group {}", self.id, signal.name(), pid);
                    return Ok(());
                }
                Err(e) => warn!(
                    "Session {}: {} via kill failed ({}), writing control byte",
                    self.id,
                    signal.name(),
                    e
                ),
            }
        }

        debug!("Session {}: writing {} byte", self.id, signal.name());
        self.write(&[signal.control_byte()])
    }

    /// Kill the child and close immediately. Does not wait for the workers.
    pub fn terminate(&self) {
        if !self.shared.close() {
            return;
        }
        info!("Session {}: terminating", self.id);
        self.shared.kill();
        self.shared.finish(ExitOutcome::Terminated);
    }

    /// Forward a geometry change to the PTY (no-op for pipes).
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        if let Some(resizer) = lock(&self.shared.resizer).as_ref() {
            resizer.resize(cols, rows)?;
            debug!("Session {}: resized to {}x{}", self.id, cols, rows);
        }
        Ok(())
    }

    /// Both workers have returned
    pub fn workers_finished(&self) -> bool {
        self.reader_thread.as_ref().is_none_or(|h| h.is_finished())
            && self.writer_thread.as_ref().is_none_or(|h| h.is_finished())
            && self.waiter_thread.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.terminate();

        // Join only workers that are already done; a reader blocked on a
        // stream held open by a grandchild stays detached
        for handle in [
            self.reader_thread.take(),
            self.writer_thread.take(),
            self.waiter_thread.take(),
        ]
        .into_iter()
            .flatten()
        {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

/// Reader worker
fn read_output(
    shared: Arc<Shared>,
    mut reader: Box<dyn Read + Send>,
    chunk: usize,
    retry: RetryPolicy,
) {
    let mut buffer = vec![0u8; chunk];
    let mut filter = ControlFilter::new();
    let mut text = Utf8Stream::new();
    let mut decoder = AnsiDecoder::new(shared.styles.output);
    let mut attempt = 0;

    loop {
        if shared.state() == SessionState::Closed {
            break;
        }

        match reader.read(&mut buffer) {
            Ok(0) => {
                debug!("Session {}: end of stream", shared.id);
                break;
            }
            Ok(n) => {
                attempt = 0;
                let bytes = filter.filter(&buffer[..n]);
                let segments = decoder.feed(&text.push(&bytes));
                if !shared.emit(segments) {
                    break;
                }
            }
            Err(e) if is_transient(&e) => {
                if shared.exited.load(Ordering::SeqCst) {
                    // A PTY reports EIO once the child is gone
                    debug!("Session {}: {} after exit, treating as end of stream", shared.id, e);
                    break;
                }
                attempt += 1;
                match retry.delay(attempt) {
                    Some(delay) => {
                        debug!("Session {}: read retry {} in {:?}: {}", shared.id, attempt, delay, e);
                        thread::sleep(delay);
                    }
                    None => {
                        warn!("Session {}: read failed after {} retries: {}", shared.id, attempt - 1, e);
                        shared.report(&format!("read failed: {}", e));
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("Session {}: read failed: {}", shared.id, e);
                shared.report(&format!("read failed: {}", e));
                break;
            }
        }
    }

    // Whatever was held back at a chunk boundary
    let mut tail = text.push(&filter.finish());
    tail.push_str(&text.flush());
    shared.emit(decoder.feed(&tail));

    shared.transition(SessionState::Running, SessionState::Draining);
    shared.drained.store(true, Ordering::SeqCst);
}

/// Writer worker. Ends when the queue is dropped or a write fails.
fn write_input(shared: Arc<Shared>, mut writer: Box<dyn Write + Send>, queued: Receiver<Vec<u8>>) {
    for data in queued {
        if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
            warn!("Session {}: write failed: {}", shared.id, e);
            shared.transition(SessionState::Running, SessionState::Draining);
            shared.report(&format!("write failed: {}", e));
            break;
        }
    }
    debug!("Session {}: writer stopped", shared.id);
}

/// Waiter worker
fn watch_exit(shared: Arc<Shared>, exit_wait: Duration) {
    let mut code: Option<Option<i32>> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        if shared.state() == SessionState::Closed {
            shared.reap(exit_wait);
            return;
        }

        if code.is_none() {
            code = shared.poll_exit();
            if let Some(c) = code {
                debug!("Session {}: process exited ({:?})", shared.id, c);
            }
        }

        let drained = shared.drained.load(Ordering::SeqCst);
        if let (true, Some(c)) = (drained, code) {
            shared.finalize(ExitOutcome::from_code(c));
            return;
        }

        // The ceiling starts once either side has finished
        if drained || code.is_some() {
            let deadline = *deadline.get_or_insert_with(|| Instant::now() + exit_wait);
            if Instant::now() >= deadline {
                match code {
                    Some(c) => {
                        warn!("Session {}: output still open after exit", shared.id);
                        shared.finalize(ExitOutcome::from_code(c));
                    }
                    // Closed its output but kept running
                    None if shared.close() => {
                        warn!("Session {}: no exit after {:?}, killing", shared.id, exit_wait);
                        shared.kill();
                        shared.finish(ExitOutcome::TimedOut);
                        shared.reap(exit_wait);
                    }
                    None => {}
                }
                return;
            }
        }

        thread::sleep(EXIT_POLL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sink::{OrderPolicy, OutputSink};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc::{self, Receiver};

    enum Chunk {
        Data(Vec<u8>),
        Fail(io::ErrorKind),
    }

    /// Blocks until the test sends a chunk; end of stream once the sender drops
    struct ChannelReader(Receiver<Chunk>);

    impl Read for ChannelReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.recv() {
                Ok(Chunk::Data(data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                }
                Ok(Chunk::Fail(kind)) => Err(io::Error::from(kind)),
                Err(_) => Ok(0),
            }
        }
    }

    #[derive(Clone, Default)]
    struct SharedWriter {
        written: Arc<Mutex<Vec<u8>>>,
        drops: Arc<AtomicUsize>,
        broken: bool,
    }

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.broken {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for SharedWriter {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    struct ScriptedProcess {
        exit: Arc<Mutex<Option<i32>>>,
        killed: Arc<AtomicBool>,
        /// Exit with 137 when killed
        dies_on_kill: bool,
    }

    impl ChildProcess for ScriptedProcess {
        fn pid(&self) -> Option<u32> {
            None
        }

        fn try_wait(&mut self) -> io::Result<Option<i32>> {
            Ok(*self.exit.lock().unwrap())
        }

        fn kill(&mut self) -> io::Result<()> {
            self.killed.store(true, Ordering::SeqCst);
            if self.dies_on_kill {
                *self.exit.lock().unwrap() = Some(137);
            }
            Ok(())
        }
    }

    struct Harness {
        session: Session,
        /// Dropping the sender ends the stream
        input: Option<Sender<Chunk>>,
        writer: SharedWriter,
        process: ScriptedProcess,
        sink: SharedSink,
        events: Receiver<SessionEvent>,
    }

    impl Harness {
        fn new(config: SessionConfig, process: ScriptedProcess, writer: SharedWriter) -> Self {
            let (input, chunks) = mpsc::channel();
            let (events_tx, events) = mpsc::channel();
            let sink = OutputSink::shared(OrderPolicy::Append, 1000);
            let attachment = Attachment {
                kind: StreamKind::Pipe,
                reader: Box::new(ChannelReader(chunks)),
                writer: Box::new(writer.clone()),
                process: Some(Box::new(process.clone())),
                resizer: None,
            };
            let session = Session::attach(7, "test", attachment, &config, sink.clone(), events_tx);
            Self {
                session,
                input: Some(input),
                writer,
                process,
                sink,
                events,
            }
        }

        fn simple() -> Self {
            Self::new(
                SessionConfig::default(),
                ScriptedProcess::default(),
                SharedWriter::default(),
            )
        }

        fn send(&self, chunk: Chunk) {
            if let Some(input) = &self.input {
                let _ = input.send(chunk);
            }
        }

        fn end_input(&mut self) {
            self.input.take();
        }

        fn written(&self) -> Vec<u8> {
            self.writer.written.lock().unwrap().clone()
        }

        fn exit_with(&self, code: i32) {
            *self.process.exit.lock().unwrap() = Some(code);
        }

        fn wait_closed(&self) -> ExitOutcome {
            let deadline = Instant::now() + Duration::from_secs(10);
            loop {
                let left = deadline.saturating_duration_since(Instant::now());
                match self.events.recv_timeout(left) {
                    Ok(SessionEvent::Closed { id, outcome }) => {
                        assert_eq!(id, 7);
                        return outcome;
                    }
                    Ok(SessionEvent::Output) => continue,
                    Err(e) => panic!("session did not close: {:?}", e),
                }
            }
        }

        fn texts(&self) -> Vec<String> {
            lock_sink(&self.sink).segments().map(|s| s.text.clone()).collect()
        }

        fn status_lines(&self) -> usize {
            const STATUSES: [&str; 5] = [
                "[succeeded]",
                "[exited with code",
                "[timed out waiting for exit]",
                "[terminated]",
                "[finished]",
            ];
            self.texts()
                .iter()
                .filter(|t| STATUSES.iter().any(|s| t.starts_with(s)))
                .count()
        }
    }

    fn wait_until(what: &str, condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_decoded_output_reaches_sink() {
        let mut h = Harness::simple();
        h.send(Chunk::Data(b"a\x1b[31mb\x1b[0mc".to_vec()));
        h.exit_with(0);
        h.end_input();

        assert_eq!(h.wait_closed(), ExitOutcome::Succeeded);

        let sink = lock_sink(&h.sink);
        let segments: Vec<&StyledSegment> = sink.segments().take(3).collect();
        assert_eq!(segments[0].text, "a");
        assert_eq!(segments[1].text, "b");
        assert_eq!(segments[2].text, "c");
        assert_eq!(segments[0].style.fg, None);
        assert_eq!(segments[1].style.fg, Some(Color::RED));
        assert_eq!(segments[2].style.fg, None);
    }

    #[test]
    fn test_clean_shutdown_releases_once_and_reports_once() {
        let mut h = Harness::simple();
        h.send(Chunk::Data(b"done\n".to_vec()));
        h.exit_with(0);
        h.end_input();

        h.wait_closed();
        assert_eq!(h.session.state(), SessionState::Closed);
        assert_eq!(h.status_lines(), 1);
        // The harness keeps one clone; the session's copy is dropped once
        wait_until("writer release", || h.writer.drops.load(Ordering::SeqCst) == 1);

        h.session.terminate();
        assert_eq!(h.status_lines(), 1);
        assert_eq!(h.writer.drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nonzero_exit_code_reported() {
        let mut h = Harness::simple();
        h.exit_with(3);
        h.end_input();
        assert_eq!(h.wait_closed(), ExitOutcome::ExitCode(3));
        assert!(h.texts().contains(&"[exited with code 3]".to_string()));
    }

    #[test]
    fn test_exit_wait_ceiling() {
        let config = SessionConfig {
            exit_wait: Duration::from_millis(50),
            ..SessionConfig::default()
        };
        let mut h = Harness::new(config, ScriptedProcess::default(), SharedWriter::default());
        h.end_input();

        assert_eq!(h.wait_closed(), ExitOutcome::TimedOut);
        assert!(h.texts().contains(&"[timed out waiting for exit]".to_string()));
        // A child that closed its output but keeps running is not left behind
        assert!(h.process.killed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_interrupt_without_pid_writes_control_byte() {
        let h = Harness::simple();
        h.session.signal(ControlSignal::Interrupt).unwrap();
        h.session.signal(ControlSignal::EndOfInput).unwrap();
        h.session.signal(ControlSignal::Raw(0x0C)).unwrap();
        wait_until("control bytes", || h.written() == vec![0x03, 0x04, 0x0C]);
    }

    #[test]
    fn test_write_forwards_bytes() {
        let h = Harness::simple();
        assert!(h.session.is_running());
        h.session.write(b"ls\r").unwrap();
        wait_until("written bytes", || h.written() == b"ls\r".to_vec());
    }

    #[test]
    fn test_write_after_close_is_rejected() {
        let mut h = Harness::simple();
        h.exit_with(0);
        h.end_input();
        h.wait_closed();

        let result = h.session.write(b"x");
        assert!(matches!(result, Err(SessionError::NotRunning)));
        assert!(h.texts().contains(&"[no running process]".to_string()));
        assert!(h.writer.written.lock().unwrap().is_empty());
    }

    #[test]
    fn test_write_failure_moves_to_draining() {
        let mut writer = SharedWriter::default();
        writer.broken = true;
        let h = Harness::new(SessionConfig::default(), ScriptedProcess::default(), writer);

        h.session.write(b"x").unwrap();
        wait_until("draining", || h.session.state() == SessionState::Draining);
        assert!(!h.session.is_running());
        wait_until("write diagnostic", || {
            h.texts().iter().any(|t| t.starts_with("[write failed"))
        });
        assert!(matches!(h.session.write(b"y"), Err(SessionError::NotRunning)));
    }

    /// Blocks every write until the gate's sender drops, like a child that
    /// never reads its input
    struct StalledWriter(Receiver<()>);

    impl Write for StalledWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_to_stalled_child_does_not_block() {
        let (gate, stalled) = mpsc::channel::<()>();
        let (input, chunks) = mpsc::channel::<Chunk>();
        let (events_tx, _events) = mpsc::channel();
        let sink = OutputSink::shared(OrderPolicy::Append, 1000);
        let process = ScriptedProcess {
            dies_on_kill: true,
            ..ScriptedProcess::default()
        };
        let attachment = Attachment {
            kind: StreamKind::Pipe,
            reader: Box::new(ChannelReader(chunks)),
            writer: Box::new(StalledWriter(stalled)),
            process: Some(Box::new(process)),
            resizer: None,
        };
        let session = Session::attach(9, "stalled", attachment, &SessionConfig::default(), sink.clone(), events_tx);

        let started = Instant::now();
        for _ in 0..10_000 {
            session.write(b"x").unwrap();
        }
        session.terminate();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(session.state(), SessionState::Closed);

        // The blocked write fails once released; nothing follows the status line
        drop(gate);
        drop(input);
        wait_until("workers", || session.workers_finished());
        let sink = lock_sink(&sink);
        let last = sink.segments().filter(|s| s.text != "\n").last();
        assert_eq!(last.map(|s| s.text.as_str()), Some("[terminated]"));
    }

    #[test]
    fn test_worker_diagnostic_after_close_is_dropped() {
        let h = Harness::simple();
        h.session.terminate();
        h.session.shared.report("read failed: late");
        let texts = h.texts();
        let last = texts.iter().filter(|t| t.as_str() != "\n").last();
        assert_eq!(last.map(String::as_str), Some("[terminated]"));
        assert!(!texts.iter().any(|t| t.starts_with("[read failed")));
    }

    #[test]
    fn test_transient_error_is_retried() {
        let mut h = Harness::simple();
        h.send(Chunk::Fail(io::ErrorKind::WouldBlock));
        h.send(Chunk::Fail(io::ErrorKind::Interrupted));
        h.send(Chunk::Data(b"ok".to_vec()));
        // Exit only after the data is through, or the retries would end the stream
        assert_eq!(
            h.events.recv_timeout(Duration::from_secs(5)).unwrap(),
            SessionEvent::Output
        );
        h.exit_with(0);
        h.end_input();

        assert_eq!(h.wait_closed(), ExitOutcome::Succeeded);
        let texts = h.texts();
        assert_eq!(texts[0], "ok");
        assert!(!texts.iter().any(|t| t.starts_with("[read failed")));
    }

    #[test]
    fn test_retries_exhausted_reports_diagnostic() {
        let config = SessionConfig {
            exit_wait: Duration::from_millis(50),
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                ..RetryPolicy::default()
            },
            ..SessionConfig::default()
        };
        // The process never exits, so every error goes through the policy
        let h = Harness::new(config, ScriptedProcess::default(), SharedWriter::default());
        for _ in 0..3 {
            h.send(Chunk::Fail(io::ErrorKind::WouldBlock));
        }

        assert_eq!(h.wait_closed(), ExitOutcome::TimedOut);
        assert!(h.texts().iter().any(|t| t.starts_with("[read failed")));
        assert_eq!(h.status_lines(), 1);
    }

    #[test]
    fn test_transient_error_after_exit_is_end_of_stream() {
        let config = SessionConfig {
            retry: RetryPolicy {
                max_attempts: 100,
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(5),
                ..RetryPolicy::default()
            },
            ..SessionConfig::default()
        };
        let h = Harness::new(config, ScriptedProcess::default(), SharedWriter::default());
        h.exit_with(0);
        for _ in 0..50 {
            h.send(Chunk::Fail(io::ErrorKind::WouldBlock));
        }

        assert_eq!(h.wait_closed(), ExitOutcome::Succeeded);
        assert!(!h.texts().iter().any(|t| t.starts_with("[read failed")));
    }

    #[test]
    fn test_other_error_goes_to_draining_with_diagnostic() {
        let h = Harness::simple();
        h.send(Chunk::Fail(io::ErrorKind::PermissionDenied));
        h.exit_with(0);

        assert_eq!(h.wait_closed(), ExitOutcome::Succeeded);
        assert!(h.texts().iter().any(|t| t.starts_with("[read failed")));
    }

    #[test]
    fn test_terminate_mid_read_closes_immediately() {
        // The process ignores the kill and the reader is blocked
        let h = Harness::simple();
        h.send(Chunk::Data(b"partial".to_vec()));

        h.session.terminate();
        assert_eq!(h.session.state(), SessionState::Closed);
        assert!(h.process.killed.load(Ordering::SeqCst));
        assert_eq!(h.wait_closed(), ExitOutcome::Terminated);

        h.session.terminate();
        assert_eq!(h.status_lines(), 1);
        assert!(h.texts().contains(&"[terminated]".to_string()));
        wait_until("writer release", || h.writer.drops.load(Ordering::SeqCst) == 1);
        assert!(matches!(
            h.session.signal(ControlSignal::Interrupt),
            Err(SessionError::NotRunning)
        ));
    }

    #[test]
    fn test_output_after_terminate_is_dropped() {
        let process = ScriptedProcess {
            dies_on_kill: true,
            ..ScriptedProcess::default()
        };
        let mut h = Harness::new(SessionConfig::default(), process, SharedWriter::default());
        h.session.terminate();
        h.wait_closed();
        h.send(Chunk::Data(b"late".to_vec()));
        h.end_input();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !h.session.workers_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!h.texts().contains(&"late".to_string()));
    }

    #[test]
    fn test_split_utf8_and_escape_across_reads() {
        let mut h = Harness::simple();
        let word = "жук".as_bytes();
        h.send(Chunk::Data(b"\x1b[3".to_vec()));
        h.send(Chunk::Data(b"2m".to_vec()));
        h.send(Chunk::Data(word[..1].to_vec()));
        h.send(Chunk::Data(word[1..].to_vec()));
        h.exit_with(0);
        h.end_input();

        h.wait_closed();
        let sink = lock_sink(&h.sink);
        let first = sink.segments().next().unwrap();
        assert_eq!(first.text, "жук");
        assert_eq!(first.style.fg, Some(Color::GREEN));
    }

    #[cfg(unix)]
    fn spawn_request(argv: &[&str], mode: pty::StreamMode) -> SpawnRequest {
        SpawnRequest {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            cwd: std::env::temp_dir(),
            env: Default::default(),
            locale: "en_US.UTF-8".to_string(),
            cols: 80,
            rows: 24,
            mode,
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_real_printf_over_pipes() {
        let sink = OutputSink::shared(OrderPolicy::Append, 1000);
        let (tx, rx) = mpsc::channel();
        let session = Session::start(
            1,
            &spawn_request(&["printf", "a\\033[31mb\\033[0mc"], pty::StreamMode::Pipe),
            &SessionConfig::default(),
            sink.clone(),
            tx,
        )
        .unwrap();

        let outcome = loop {
            match rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                SessionEvent::Closed { outcome, .. } => break outcome,
                SessionEvent::Output => {}
            }
        };
        assert_eq!(outcome, ExitOutcome::Succeeded);
        assert_eq!(session.state(), SessionState::Closed);

        let sink = lock_sink(&sink);
        let texts: Vec<&str> = sink.segments().map(|s| s.text.as_str()).collect();
        assert_eq!(&texts[..3], &["a", "b", "c"]);
        let red: Vec<bool> = sink
            .segments()
            .take(3)
            .map(|s| s.style.fg == Some(Color::RED))
            .collect();
        assert_eq!(red, vec![false, true, false]);
    }

    #[cfg(unix)]
    #[test]
    fn test_real_terminate_of_sleeping_child() {
        let sink = OutputSink::shared(OrderPolicy::Append, 1000);
        let (tx, rx) = mpsc::channel();
        let session = Session::start(
            2,
            &spawn_request(&["sleep", "30"], pty::StreamMode::Pipe),
            &SessionConfig::default(),
            sink,
            tx,
        )
        .unwrap();
        assert!(session.pid().is_some());

        let started = Instant::now();
        session.terminate();
        assert_eq!(session.state(), SessionState::Closed);

        let event = rx.recv_timeout(Duration::from_secs(5));
        assert_eq!(
            event,
            Ok(SessionEvent::Closed {
                id: 2,
                outcome: ExitOutcome::Terminated
            })
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_launch_failure_is_an_error() {
        let sink = OutputSink::shared(OrderPolicy::Append, 1000);
        let (tx, _rx) = mpsc::channel();
        let request = SpawnRequest {
            argv: vec!["/nonexistent/segshell-test".to_string()],
            cwd: std::env::temp_dir(),
            env: Default::default(),
            locale: "en_US.UTF-8".to_string(),
            cols: 80,
            rows: 24,
            mode: pty::StreamMode::Pipe,
        };
        let result = Session::start(3, &request, &SessionConfig::default(), sink.clone(), tx);
        assert!(matches!(result, Err(SessionError::Pty(_))));
        assert!(lock_sink(&sink).is_empty());
    }
}
