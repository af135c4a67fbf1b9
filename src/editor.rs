//! Local line editor
//!
//! Holds the command line being typed while no session is live, with
//! history navigation and the completion popup.

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::history::{CommandHistory, Completion};

/// What a key did to the editor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditAction {
    /// Key not used by the editor
    Ignored,
    /// Buffer, cursor or popup changed
    Edited,
    /// Enter on a non-empty line
    Submit(String),
}

#[derive(Default)]
pub struct LineEditor {
    buffer: Vec<char>,
    /// Cursor position in chars
    cursor: usize,
    /// Index into history while walking it with Up / Down
    history_pos: Option<usize>,
    completion: Completion,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(&self) -> String {
        self.buffer.iter().collect()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    pub fn handle_key(&mut self, key: &KeyEvent, history: &CommandHistory) -> EditAction {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char('a') => self.move_to(0),
                KeyCode::Char('e') => self.move_to(self.buffer.len()),
                KeyCode::Char('u') => {
                    self.clear();
                    EditAction::Edited
                }
                _ => EditAction::Ignored,
            };
        }

        match key.code {
            KeyCode::Enter => {
                if self.buffer.is_empty() {
                    return EditAction::Ignored;
                }
                let line = self.text();
                self.clear();
                EditAction::Submit(line)
            }
            KeyCode::Esc => {
                self.clear();
                EditAction::Edited
            }
            KeyCode::Char(ch) => {
                self.buffer.insert(self.cursor, ch);
                self.cursor += 1;
                self.refresh_completion(history);
                EditAction::Edited
            }
            KeyCode::Backspace => {
                if self.cursor == 0 {
                    return EditAction::Ignored;
                }
                self.cursor -= 1;
                self.buffer.remove(self.cursor);
                self.refresh_completion(history);
                EditAction::Edited
            }
            KeyCode::Delete => {
                if self.cursor >= self.buffer.len() {
                    return EditAction::Ignored;
                }
                self.buffer.remove(self.cursor);
                self.refresh_completion(history);
                EditAction::Edited
            }
            KeyCode::Left => self.move_to(self.cursor.saturating_sub(1)),
            KeyCode::Right => self.move_to((self.cursor + 1).min(self.buffer.len())),
            KeyCode::Home => self.move_to(0),
            KeyCode::End => self.move_to(self.buffer.len()),
            KeyCode::Up => self.history_up(history),
            KeyCode::Down => self.history_down(history),
            KeyCode::Tab => self.complete(history, true),
            KeyCode::BackTab => self.complete(history, false),
            KeyCode::PageUp if self.completion.visible => {
                self.completion.page_up();
                self.apply_selection();
                EditAction::Edited
            }
            KeyCode::PageDown if self.completion.visible => {
                self.completion.page_down();
                self.apply_selection();
                EditAction::Edited
            }
            _ => EditAction::Ignored,
        }
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.history_pos = None;
        self.completion.hide();
    }

    fn set_text(&mut self, text: &str) {
        self.buffer = text.chars().collect();
        self.cursor = self.buffer.len();
    }

    fn move_to(&mut self, pos: usize) -> EditAction {
        if pos == self.cursor {
            return EditAction::Ignored;
        }
        self.cursor = pos;
        EditAction::Edited
    }

    fn refresh_completion(&mut self, history: &CommandHistory) {
        self.history_pos = None;
        self.completion.show(history.matches(&self.text()));
    }

    fn history_up(&mut self, history: &CommandHistory) -> EditAction {
        let pos = match self.history_pos {
            None => history.len().checked_sub(1),
            Some(pos) => Some(pos.saturating_sub(1)),
        };
        let Some(command) = pos.and_then(|p| history.get(p)) else {
            return EditAction::Ignored;
        };
        self.set_text(command);
        self.history_pos = pos;
        self.completion.hide();
        EditAction::Edited
    }

    fn history_down(&mut self, history: &CommandHistory) -> EditAction {
        let Some(pos) = self.history_pos else {
            return EditAction::Ignored;
        };
        match history.get(pos + 1) {
            Some(command) => {
                self.set_text(command);
                self.history_pos = Some(pos + 1);
            }
            None => {
                self.buffer.clear();
                self.cursor = 0;
                self.history_pos = None;
            }
        }
        self.completion.hide();
        EditAction::Edited
    }

    /// Tab / Shift+Tab: open the popup on the first press and put its first
    /// candidate in the buffer, then cycle through the candidates.
    fn complete(&mut self, history: &CommandHistory, forward: bool) -> EditAction {
        if !self.completion.visible {
            self.completion.show(history.matches(&self.text()));
            if !self.completion.visible {
                return EditAction::Ignored;
            }
        } else if self.completion.current() == Some(self.text().as_str()) {
            if forward {
                self.completion.select_down();
            } else {
                self.completion.select_up();
            }
        }
        self.apply_selection();
        EditAction::Edited
    }

    fn apply_selection(&mut self) {
        if let Some(selected) = self.completion.current().map(str::to_string) {
            self.set_text(&selected);
        }
    }
}
