//! Input dispatcher
//!
//! Routes each key press either to the local line editor (no live session)
//! or to the live session as bytes or control signals. While the child is
//! showing a password prompt, keys go to the child verbatim and only a mask
//! count is kept for display.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::{debug, info};

use super::keymapper::KeyMapper;
use crate::core::session::Session;
use crate::core::signal::ControlSignal;
use crate::core::sink::lock_sink;
use crate::editor::{EditAction, LineEditor};
use crate::shell::Shell;

/// Lowercase markers of a password prompt
const PASSWORD_MARKERS: &[&str] = &[
    "password",
    "passphrase",
    "passwort",
    "пароль",
    "mot de passe",
    "contraseña",
];

/// Lines scrolled per PageUp / PageDown
const SCROLL_STEP: usize = 5;

/// What the event loop should do after a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Ignored,
    Redraw,
    /// Scroll the output view up (positive) or down (negative)
    Scroll(isize),
    Quit,
}

/// Does `line` look like it is asking for a password?
pub fn is_password_prompt(line: &str) -> bool {
    let line = line.to_lowercase();
    PASSWORD_MARKERS.iter().any(|marker| line.contains(marker))
}

#[derive(Default)]
pub struct InputDispatcher {
    editor: LineEditor,
    /// Keys forwarded while masking, `None` when not masking
    masked: Option<usize>,
    /// Prompt line the last masking pass ended on
    dismissed: Option<String>,
}

impl InputDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn editor(&self) -> &LineEditor {
        &self.editor
    }

    /// Number of characters to draw as `*`, while masking
    pub fn masked(&self) -> Option<usize> {
        self.masked
    }

    /// Check the line the child is writing for a password prompt.
    pub fn observe_output(&mut self, shell: &Shell) {
        if shell.live_session().is_none() {
            self.masked = None;
            self.dismissed = None;
            return;
        }
        if self.masked.is_some() {
            return;
        }
        let line = lock_sink(shell.sink()).current_line_text();
        if self.dismissed.as_deref() != Some(line.as_str()) && is_password_prompt(&line) {
            debug!("Password prompt detected, masking input");
            self.masked = Some(0);
        }
    }

    pub fn dispatch(&mut self, key: &KeyEvent, shell: &mut Shell) -> Dispatch {
        self.observe_output(shell);

        if key.modifiers.contains(KeyModifiers::SHIFT) {
            match key.code {
                KeyCode::PageUp => return Dispatch::Scroll(SCROLL_STEP as isize),
                KeyCode::PageDown => return Dispatch::Scroll(-(SCROLL_STEP as isize)),
                _ => {}
            }
        }

        match shell.live_session().map(Session::is_running) {
            Some(true) => self.dispatch_running(key, shell),
            // Draining: output may still arrive, input has nowhere to go
            Some(false) => {
                if is_ctrl(key, 'q') {
                    shell.terminate();
                    return Dispatch::Redraw;
                }
                Dispatch::Ignored
            }
            None => self.dispatch_idle(key, shell),
        }
    }

    fn dispatch_running(&mut self, key: &KeyEvent, shell: &Shell) -> Dispatch {
        let Some(session) = shell.live_session() else {
            return Dispatch::Ignored;
        };
        if self.masked.is_some() {
            self.dispatch_masked(key, session, shell)
        } else {
            self.dispatch_live(key, session)
        }
    }

    fn dispatch_live(&mut self, key: &KeyEvent, session: &Session) -> Dispatch {
        if is_ctrl(key, 'q') {
            info!("Emergency stop of session {}", session.id());
            session.terminate();
            return Dispatch::Redraw;
        }

        if let Some(signal) = control_signal(key) {
            if let Err(e) = session.signal(signal) {
                debug!("Signal {} not delivered: {}", signal.name(), e);
            }
            return Dispatch::Redraw;
        }

        match key.code {
            KeyCode::PageUp if key.modifiers.is_empty() => {
                return Dispatch::Scroll(SCROLL_STEP as isize)
            }
            KeyCode::PageDown if key.modifiers.is_empty() => {
                return Dispatch::Scroll(-(SCROLL_STEP as isize))
            }
            _ => {}
        }

        let Some(bytes) = KeyMapper::map(key) else {
            return Dispatch::Ignored;
        };
        if let Err(e) = session.write(&bytes) {
            debug!("Key not delivered: {}", e);
        }
        Dispatch::Redraw
    }

    fn dispatch_masked(&mut self, key: &KeyEvent, session: &Session, shell: &Shell) -> Dispatch {
        if is_ctrl(key, 'c') || key.code == KeyCode::Enter {
            self.masked = None;
            self.dismissed = Some(lock_sink(shell.sink()).current_line_text());
            return self.dispatch_live(key, session);
        }

        let Some(bytes) = KeyMapper::map(key) else {
            return Dispatch::Ignored;
        };
        if let Err(e) = session.write(&bytes) {
            debug!("Masked key not delivered: {}", e);
            self.masked = None;
            return Dispatch::Redraw;
        }

        if let Some(count) = self.masked.as_mut() {
            match key.code {
                KeyCode::Backspace => *count = count.saturating_sub(1),
                KeyCode::Char(_) if !key.modifiers.contains(KeyModifiers::CONTROL) => *count += 1,
                _ => {}
            }
        }
        Dispatch::Redraw
    }

    fn dispatch_idle(&mut self, key: &KeyEvent, shell: &mut Shell) -> Dispatch {
        self.masked = None;

        if is_ctrl(key, 'c') || is_ctrl(key, 'q') {
            return Dispatch::Quit;
        }

        match self.editor.handle_key(key, shell.history()) {
            EditAction::Submit(line) => {
                shell.submit(&line);
                if shell.should_quit() {
                    Dispatch::Quit
                } else {
                    Dispatch::Redraw
                }
            }
            EditAction::Edited => Dispatch::Redraw,
            EditAction::Ignored => match key.code {
                KeyCode::PageUp => Dispatch::Scroll(SCROLL_STEP as isize),
                KeyCode::PageDown => Dispatch::Scroll(-(SCROLL_STEP as isize)),
                _ => Dispatch::Ignored,
            },
        }
    }
}

fn is_ctrl(key: &KeyEvent, ch: char) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL)
        && matches!(key.code, KeyCode::Char(c) if c.eq_ignore_ascii_case(&ch))
}

/// Key combinations delivered as control signals to a live session
fn control_signal(key: &KeyEvent) -> Option<ControlSignal> {
    if key.code == KeyCode::Esc && key.modifiers.is_empty() {
        return Some(ControlSignal::Escape);
    }
    if !key.modifiers.contains(KeyModifiers::CONTROL) || key.modifiers.contains(KeyModifiers::ALT)
    {
        return None;
    }
    let KeyCode::Char(ch) = key.code else {
        return None;
    };
    match ch.to_ascii_lowercase() {
        'c' => Some(ControlSignal::Interrupt),
        'z' => Some(ControlSignal::Suspend),
        'd' => Some(ControlSignal::EndOfInput),
        other => KeyMapper::control_byte(other).map(ControlSignal::Raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{self, Receiver};
    use std::time::{Duration, Instant};

    use crate::aliases::Aliases;
    use crate::config::Config;
    use crate::core::pty::StreamMode;
    use crate::core::session::{ExitOutcome, SessionEvent};
    use crate::core::sink::OutputSink;
    use crate::history::CommandHistory;

    fn key(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    #[test]
    fn test_password_prompt_detection() {
        assert!(is_password_prompt("[sudo] password for user: "));
        assert!(is_password_prompt("Enter passphrase for key '/home/u/.ssh/id_ed25519': "));
        assert!(is_password_prompt("Пароль: "));
        assert!(is_password_prompt("Passwort:"));
        assert!(!is_password_prompt("Username: "));
    }

    #[test]
    fn test_control_signals() {
        let ctrl = |c| key(KeyCode::Char(c), KeyModifiers::CONTROL);
        assert_eq!(control_signal(&ctrl('c')), Some(ControlSignal::Interrupt));
        assert_eq!(control_signal(&ctrl('Z')), Some(ControlSignal::Suspend));
        assert_eq!(control_signal(&ctrl('d')), Some(ControlSignal::EndOfInput));
        assert_eq!(control_signal(&ctrl('l')), Some(ControlSignal::Raw(0x0C)));
        assert_eq!(
            control_signal(&key(KeyCode::Esc, KeyModifiers::NONE)),
            Some(ControlSignal::Escape)
        );
        assert_eq!(control_signal(&key(KeyCode::Char('c'), KeyModifiers::NONE)), None);
        assert_eq!(control_signal(&key(KeyCode::Enter, KeyModifiers::NONE)), None);
    }

    #[test]
    fn test_is_ctrl() {
        assert!(is_ctrl(&key(KeyCode::Char('Q'), KeyModifiers::CONTROL), 'q'));
        assert!(!is_ctrl(&key(KeyCode::Char('q'), KeyModifiers::NONE), 'q'));
    }

    fn shell() -> (Shell, Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel();
        let config = Config {
            stream: StreamMode::Pipe,
            ..Config::default()
        };
        let sink = OutputSink::shared(config.order, 1000);
        let shell = Shell::new(
            config,
            Aliases::with_path(None),
            CommandHistory::with_path(None),
            sink,
            tx,
        );
        (shell, rx)
    }

    fn press(dispatcher: &mut InputDispatcher, shell: &mut Shell, code: KeyCode) -> Dispatch {
        dispatcher.dispatch(&key(code, KeyModifiers::NONE), shell)
    }

    #[cfg(unix)]
    fn wait_for_output(shell: &Shell, needle: &str) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !lock_sink(shell.sink()).current_line_text().contains(needle) {
            assert!(Instant::now() < deadline, "no {:?} in output", needle);
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_idle_keys_edit_and_submit() {
        let (mut shell, _rx) = shell();
        let mut dispatcher = InputDispatcher::new();
        for ch in "echo hi".chars() {
            assert_eq!(press(&mut dispatcher, &mut shell, KeyCode::Char(ch)), Dispatch::Redraw);
        }
        assert_eq!(dispatcher.editor().text(), "echo hi");
        assert_eq!(press(&mut dispatcher, &mut shell, KeyCode::Enter), Dispatch::Redraw);
        assert_eq!(dispatcher.editor().text(), "");
        assert!(lock_sink(shell.sink()).segments().any(|s| s.text == "hi"));

        assert_eq!(
            press(&mut dispatcher, &mut shell, KeyCode::PageUp),
            Dispatch::Scroll(SCROLL_STEP as isize)
        );
        let quit = key(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(dispatcher.dispatch(&quit, &mut shell), Dispatch::Quit);
    }

    #[test]
    fn test_exit_builtin_quits() {
        let (mut shell, _rx) = shell();
        let mut dispatcher = InputDispatcher::new();
        for ch in "exit".chars() {
            press(&mut dispatcher, &mut shell, KeyCode::Char(ch));
        }
        assert_eq!(press(&mut dispatcher, &mut shell, KeyCode::Enter), Dispatch::Quit);
    }

    #[cfg(unix)]
    #[test]
    fn test_live_keys_reach_child_and_ctrl_q_terminates() {
        let (mut shell, rx) = shell();
        let mut dispatcher = InputDispatcher::new();
        shell.submit("cat");
        assert!(shell.live_session().is_some());

        press(&mut dispatcher, &mut shell, KeyCode::Char('h'));
        press(&mut dispatcher, &mut shell, KeyCode::Char('i'));
        wait_for_output(&shell, "hi");
        assert_eq!(dispatcher.editor().text(), "");

        let stop = key(KeyCode::Char('q'), KeyModifiers::CONTROL);
        assert_eq!(dispatcher.dispatch(&stop, &mut shell), Dispatch::Redraw);
        assert!(shell.live_session().is_none());
        loop {
            match rx.recv_timeout(Duration::from_secs(10)) {
                Ok(SessionEvent::Closed { outcome, .. }) => {
                    assert_eq!(outcome, ExitOutcome::Terminated);
                    break;
                }
                Ok(_) => {}
                Err(e) => panic!("no close event: {}", e),
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_password_prompt_masks_input() {
        let (mut shell, _rx) = shell();
        let mut dispatcher = InputDispatcher::new();
        shell.submit("sh -c \"printf 'Password: '; cat\"");
        wait_for_output(&shell, "Password: ");

        dispatcher.observe_output(&shell);
        assert_eq!(dispatcher.masked(), Some(0));

        press(&mut dispatcher, &mut shell, KeyCode::Char('a'));
        press(&mut dispatcher, &mut shell, KeyCode::Char('b'));
        assert_eq!(dispatcher.masked(), Some(2));
        press(&mut dispatcher, &mut shell, KeyCode::Backspace);
        assert_eq!(dispatcher.masked(), Some(1));
        assert_eq!(dispatcher.editor().text(), "");

        press(&mut dispatcher, &mut shell, KeyCode::Enter);
        assert_eq!(dispatcher.masked(), None);
        shell.terminate();
    }
}

