//! Output sink
//!
//! The ordered collection of styled segments holding everything printed so
//! far. Segments never contain a line break: text is split on `\n` and the
//! breaks are stored as explicit newline markers.
//!
//! # Ordering
//!
//! With [`OrderPolicy::Append`] everything is chronological. With
//! [`OrderPolicy::Prepend`] each command opens a block at the top (via
//! [`OutputSink::begin_block`]) and output inside a block stays
//! chronological, so the newest command is always nearest the prompt.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use super::style::{Style, StyledSegment};

/// Sink shared between the event loop and a session's workers
pub type SharedSink = Arc<Mutex<OutputSink>>;

/// Lock the sink, recovering the data if a worker panicked while holding it.
pub fn lock_sink(sink: &SharedSink) -> MutexGuard<'_, OutputSink> {
    sink.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Global ordering of output blocks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderPolicy {
    /// Oldest output first
    #[default]
    Append,
    /// Newest command block first
    Prepend,
}

impl OrderPolicy {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "append" => Some(OrderPolicy::Append),
            "prepend" => Some(OrderPolicy::Prepend),
            _ => None,
        }
    }
}

/// Explicit insertion position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Append,
    Prepend,
}

pub struct OutputSink {
    segments: VecDeque<StyledSegment>,
    policy: OrderPolicy,
    /// Where policy-ordered output goes next
    cursor: usize,
    /// Maximum stored segments
    limit: usize,
}

impl OutputSink {
    pub fn new(policy: OrderPolicy, limit: usize) -> Self {
        Self {
            segments: VecDeque::new(),
            policy,
            cursor: 0,
            limit: limit.max(1),
        }
    }

    pub fn shared(policy: OrderPolicy, limit: usize) -> SharedSink {
        Arc::new(Mutex::new(Self::new(policy, limit)))
    }

    pub fn policy(&self) -> OrderPolicy {
        self.policy
    }

    /// Insert at an explicit position, splitting on line breaks.
    pub fn insert(&mut self, segments: Vec<StyledSegment>, position: Position) {
        let at = match position {
            Position::Append => self.segments.len(),
            Position::Prepend => 0,
        };
        let old_len = self.segments.len();
        let added = self.insert_at(at, segments);
        // Shift the cursor when inserting before it, or follow the tail
        if at < self.cursor || self.cursor == old_len {
            self.cursor += added;
        }
        self.enforce_limit();
    }

    /// Insert according to the configured ordering policy.
    pub fn push(&mut self, segments: Vec<StyledSegment>) {
        let added = self.insert_at(self.cursor, segments);
        self.cursor += added;
        self.enforce_limit();
    }

    /// Push a complete line, breaking the current line first if needed.
    pub fn push_line(&mut self, text: impl Into<String>, style: Style) {
        self.ensure_line_break(style);
        self.push(vec![
            StyledSegment::new(text, style),
            StyledSegment::newline(style),
        ]);
    }

    /// Start a new output block (one per submitted command).
    pub fn begin_block(&mut self) {
        self.cursor = match self.policy {
            OrderPolicy::Append => self.segments.len(),
            OrderPolicy::Prepend => 0,
        };
    }

    /// Terminate the current line if something has been written to it.
    pub fn ensure_line_break(&mut self, style: Style) {
        if self.cursor > 0 && !self.segments[self.cursor - 1].is_newline() {
            self.push(vec![StyledSegment::newline(style)]);
        }
    }

    /// Drop all segments.
    pub fn clear(&mut self) {
        self.segments.clear();
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &StyledSegment> {
        self.segments.iter()
    }

    /// Segments grouped into display lines (storage order).
    pub fn lines(&self) -> Vec<Vec<&StyledSegment>> {
        let mut lines = vec![Vec::new()];
        for segment in &self.segments {
            if segment.is_newline() {
                lines.push(Vec::new());
            } else if let Some(line) = lines.last_mut() {
                line.push(segment);
            }
        }
        if lines.last().is_some_and(|l| l.is_empty()) && lines.len() > 1 {
            lines.pop();
        }
        lines
    }

    /// Text of the line currently being written, up to the insertion point.
    pub fn current_line_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for segment in self.segments.range(..self.cursor).rev() {
            if segment.is_newline() {
                break;
            }
            parts.push(&segment.text);
        }
        parts.reverse();
        parts.concat()
    }

    fn insert_at(&mut self, at: usize, segments: Vec<StyledSegment>) -> usize {
        let mut at = at.min(self.segments.len());
        let start = at;

        for segment in segments {
            let mut pieces = segment.text.split('\n').peekable();
            while let Some(piece) = pieces.next() {
                let has_break = pieces.peek().is_some();
                let piece = if has_break {
                    piece.strip_suffix('\r').unwrap_or(piece)
                } else {
                    piece
                };

                if !piece.is_empty() {
                    let merged = at > 0
                        && match self.segments.get_mut(at - 1) {
                            Some(prev) if !prev.is_newline() && prev.style == segment.style => {
                                prev.text.push_str(piece);
                                true
                            }
                            _ => false,
                        };
                    if !merged {
                        self.segments
                            .insert(at, StyledSegment::new(piece, segment.style));
                        at += 1;
                    }
                }

                if has_break {
                    self.segments.insert(at, StyledSegment::newline(segment.style));
                    at += 1;
                }
            }
        }

        at - start
    }

    fn enforce_limit(&mut self) {
        while self.segments.len() > self.limit {
            match self.policy {
                OrderPolicy::Append => {
                    self.segments.pop_front();
                    self.cursor = self.cursor.saturating_sub(1);
                }
                OrderPolicy::Prepend => {
                    self.segments.pop_back();
                }
            }
        }
        self.cursor = self.cursor.min(self.segments.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::style::Color;

    fn texts(sink: &OutputSink) -> Vec<String> {
        sink.segments().map(|s| s.text.clone()).collect()
    }

    #[test]
    fn test_splits_on_newlines_preserving_style() {
        let mut sink = OutputSink::new(OrderPolicy::Append, 100);
        let red = Style::new().fg(Color::RED);
        sink.push(vec![StyledSegment::new("one\ntwo\n", red)]);

        assert_eq!(texts(&sink), vec!["one", "\n", "two", "\n"]);
        assert!(sink.segments().all(|s| s.style == red));
    }

    #[test]
    fn test_crlf_becomes_single_marker() {
        let mut sink = OutputSink::new(OrderPolicy::Append, 100);
        sink.push(vec![StyledSegment::new("a\r\nb", Style::default())]);
        assert_eq!(texts(&sink), vec!["a", "\n", "b"]);
    }

    #[test]
    fn test_same_style_runs_merge_within_line() {
        let mut sink = OutputSink::new(OrderPolicy::Append, 100);
        sink.push(vec![StyledSegment::new("ab", Style::default())]);
        sink.push(vec![StyledSegment::new("cd", Style::default())]);
        assert_eq!(texts(&sink), vec!["abcd"]);
    }

    #[test]
    fn test_append_policy_is_chronological() {
        let mut sink = OutputSink::new(OrderPolicy::Append, 100);
        sink.begin_block();
        sink.push_line("first", Style::default());
        sink.begin_block();
        sink.push_line("second", Style::default());
        assert_eq!(texts(&sink), vec!["first", "\n", "second", "\n"]);
    }

    #[test]
    fn test_prepend_policy_orders_blocks_newest_first() {
        let mut sink = OutputSink::new(OrderPolicy::Prepend, 100);
        sink.begin_block();
        sink.push_line("> one", Style::default());
        sink.push(vec![StyledSegment::new("1a\n", Style::default())]);
        sink.begin_block();
        sink.push_line("> two", Style::default());
        // Streaming chunks inside the block stay in arrival order
        sink.push(vec![StyledSegment::new("2a\n", Style::default())]);
        sink.push(vec![StyledSegment::new("2b\n", Style::default())]);

        let lines: Vec<String> = sink
            .lines()
            .iter()
            .map(|l| l.iter().map(|s| s.text.as_str()).collect())
            .collect();
        assert_eq!(lines, vec!["> two", "2a", "2b", "> one", "1a"]);
    }

    #[test]
    fn test_explicit_positions() {
        let mut sink = OutputSink::new(OrderPolicy::Append, 100);
        sink.insert(vec![StyledSegment::new("mid\n", Style::default())], Position::Append);
        sink.insert(vec![StyledSegment::new("top\n", Style::default())], Position::Prepend);
        sink.insert(vec![StyledSegment::new("end", Style::default())], Position::Append);
        assert_eq!(texts(&sink), vec!["top", "\n", "mid", "\n", "end"]);
    }

    #[test]
    fn test_clear() {
        let mut sink = OutputSink::new(OrderPolicy::Append, 100);
        sink.push_line("x", Style::default());
        sink.clear();
        assert!(sink.is_empty());
        assert_eq!(sink.current_line_text(), "");
    }

    #[test]
    fn test_current_line_text() {
        let mut sink = OutputSink::new(OrderPolicy::Append, 100);
        sink.push(vec![
            StyledSegment::new("done\n[sudo] ", Style::default()),
            StyledSegment::new("password for me: ", Style::new().bold()),
        ]);
        assert_eq!(sink.current_line_text(), "[sudo] password for me: ");
    }

    #[test]
    fn test_line_break_only_when_needed() {
        let mut sink = OutputSink::new(OrderPolicy::Append, 100);
        sink.push_line("a", Style::default());
        sink.push(vec![StyledSegment::new("partial", Style::default())]);
        sink.push_line("status", Style::default());
        assert_eq!(
            texts(&sink),
            vec!["a", "\n", "partial", "\n", "status", "\n"]
        );
    }

    #[test]
    fn test_limit_evicts_oldest() {
        let mut sink = OutputSink::new(OrderPolicy::Append, 4);
        for word in ["a", "b", "c"] {
            sink.push_line(word, Style::default());
        }
        assert_eq!(texts(&sink), vec!["b", "\n", "c", "\n"]);

        let mut sink = OutputSink::new(OrderPolicy::Prepend, 4);
        for word in ["a", "b", "c"] {
            sink.begin_block();
            sink.push_line(word, Style::default());
        }
        assert_eq!(texts(&sink), vec!["c", "\n", "b", "\n"]);
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(OrderPolicy::parse("Prepend"), Some(OrderPolicy::Prepend));
        assert_eq!(OrderPolicy::parse("append"), Some(OrderPolicy::Append));
        assert_eq!(OrderPolicy::parse("sideways"), None);
    }
}
