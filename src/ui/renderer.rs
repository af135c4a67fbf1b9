//! Terminal renderer using crossterm
//!
//! Paints the prompt line at the top of the screen and the output sink
//! below it, with the completion popup and the password mask on top.

use std::io::{self, Write};
use std::ops::Range;

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute, queue,
    style::{Attribute, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{
        self, Clear, ClearType, DisableLineWrap, EnableLineWrap, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use unicode_width::UnicodeWidthChar;

use crate::config::ColorScheme;
use crate::core::sink::{OrderPolicy, OutputSink};
use crate::core::style::{AttrFlags, Color, Style, StyledSegment};
use crate::history::Completion;

const TAB_WIDTH: usize = 8;

/// One screen row of output: styled runs that fit the width
pub type Row = Vec<(String, Style)>;

/// Everything one frame shows
pub struct View<'a> {
    pub scheme: &'a ColorScheme,
    pub sink: &'a OutputSink,
    pub cwd: &'a str,
    /// Line editor contents and cursor (in chars)
    pub input: &'a str,
    pub cursor: usize,
    /// Blink phase of the input cursor
    pub cursor_visible: bool,
    pub completion: Option<&'a Completion>,
    /// Command of the live session
    pub running: Option<&'a str>,
    /// Characters typed at a password prompt
    pub masked: Option<usize>,
    /// Rows scrolled away from the newest output
    pub scroll: usize,
}

/// Terminal renderer
pub struct Renderer {
    /// Whether the terminal has been initialized
    initialized: bool,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        Self { initialized: false }
    }

    /// Enter raw mode and the alternate screen
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;

        let mut stdout = io::stdout();
        execute!(
            stdout,
            EnterAlternateScreen,
            DisableLineWrap,
            Hide,
            Clear(ClearType::All),
            MoveTo(0, 0)
        )?;
        self.initialized = true;
        Ok(())
    }

    /// Restore the terminal
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.initialized = false;

        let mut stdout = io::stdout();
        let _ = execute!(
            stdout,
            ResetColor,
            SetAttribute(Attribute::Reset),
            Show,
            EnableLineWrap,
            LeaveAlternateScreen
        );
        let _ = stdout.flush();

        terminal::disable_raw_mode()
    }

    /// Get terminal size
    pub fn size() -> io::Result<(u16, u16)> {
        terminal::size()
    }

    /// Draw a frame. Returns the scroll offset actually used, clamped to
    /// the available output.
    pub fn render(&mut self, view: &View) -> io::Result<usize> {
        let (cols, rows) = Self::size()?;
        let width = usize::from(cols.max(1));
        let height = usize::from(rows.saturating_sub(1));

        let output = layout(view.sink, width);
        let scroll = view.scroll.min(output.len().saturating_sub(height));
        let window = visible_window(output.len(), height, scroll, view.sink.policy());

        let mut stdout = io::BufWriter::new(io::stdout().lock());
        queue!(stdout, Hide)?;

        self.render_prompt(&mut stdout, view, width)?;

        let mut screen_row = 1u16;
        for row in &output[window] {
            queue!(stdout, MoveTo(0, screen_row), Clear(ClearType::CurrentLine))?;
            for (text, style) in row {
                apply_style(&mut stdout, style)?;
                write!(stdout, "{}", text)?;
            }
            queue!(stdout, ResetColor, SetAttribute(Attribute::Reset))?;
            screen_row += 1;
        }
        while screen_row < rows {
            queue!(stdout, MoveTo(0, screen_row), Clear(ClearType::CurrentLine))?;
            screen_row += 1;
        }

        if scroll > 0 {
            let marker = format!("[{} rows scrolled]", scroll);
            let x = width.saturating_sub(marker.len()) as u16;
            queue!(stdout, MoveTo(x, rows.saturating_sub(1)))?;
            apply_style(&mut stdout, &Style::new().fg(view.scheme.info_fg))?;
            write!(stdout, "{}", marker)?;
        }

        if let Some(completion) = view.completion.filter(|c| c.visible) {
            self.render_completion(&mut stdout, view.scheme, completion, width, height)?;
        }

        queue!(stdout, ResetColor, SetAttribute(Attribute::Reset))?;
        stdout.flush()?;
        Ok(scroll)
    }

    /// `cwd $ input`, with the cursor drawn as a coloured cell
    fn render_prompt<W: Write>(&self, stdout: &mut W, view: &View, width: usize) -> io::Result<()> {
        let cs = view.scheme;
        queue!(stdout, MoveTo(0, 0), Clear(ClearType::CurrentLine))?;

        apply_style(stdout, &Style::new().fg(cs.prompt_dir))?;
        write!(stdout, "{}", view.cwd)?;
        apply_style(stdout, &Style::new().fg(cs.prompt_symbol))?;
        write!(stdout, " $ ")?;
        let mut used = str_width(view.cwd) + 3;

        match (view.masked, view.running) {
            (Some(count), _) => {
                apply_style(stdout, &Style::new().fg(cs.mask_fg))?;
                let mask = "*".repeat(count.min(width.saturating_sub(used + 1)));
                write!(stdout, "{}", mask)?;
                self.render_cursor(stdout, cs, ' ', view.cursor_visible)?;
            }
            (None, Some(command)) => {
                apply_style(stdout, &Style::new().fg(cs.echo_fg))?;
                let label = format!("[{}] Ctrl+C interrupts, Ctrl+Q kills", command);
                write!(stdout, "{}", truncate(&label, width.saturating_sub(used)))?;
            }
            (None, None) => {
                let input: Vec<char> = view.input.chars().collect();
                // Keep the cursor on screen for long lines
                let room = width.saturating_sub(used + 1);
                let start = view.cursor.saturating_sub(room);
                apply_style(stdout, &Style::new().fg(cs.input_fg))?;
                for (i, ch) in input.iter().enumerate().skip(start) {
                    let w = ch.width().unwrap_or(0);
                    if used + w >= width {
                        break;
                    }
                    if i == view.cursor {
                        self.render_cursor(stdout, cs, *ch, view.cursor_visible)?;
                        apply_style(stdout, &Style::new().fg(cs.input_fg))?;
                    } else {
                        write!(stdout, "{}", ch)?;
                    }
                    used += w;
                }
                if view.cursor >= input.len() {
                    self.render_cursor(stdout, cs, ' ', view.cursor_visible)?;
                }
            }
        }

        queue!(stdout, ResetColor, SetAttribute(Attribute::Reset))?;
        Ok(())
    }

    fn render_cursor<W: Write>(
        &self,
        stdout: &mut W,
        cs: &ColorScheme,
        ch: char,
        visible: bool,
    ) -> io::Result<()> {
        if visible {
            apply_style(stdout, &Style::new().bg(cs.cursor_bg).fg(Color::BLACK))?;
        }
        write!(stdout, "{}", ch)?;
        queue!(stdout, ResetColor, SetAttribute(Attribute::Reset))?;
        Ok(())
    }

    /// Bordered candidate list under the prompt
    fn render_completion<W: Write>(
        &self,
        stdout: &mut W,
        cs: &ColorScheme,
        completion: &Completion,
        width: usize,
        height: usize,
    ) -> io::Result<()> {
        let items = completion.visible_items();
        let longest = items.iter().map(|(_, cmd, _)| str_width(cmd)).max().unwrap_or(0);
        let box_width = (longest + 4).max(20).min(width);
        let inner = box_width.saturating_sub(2);
        if box_width < 4 || height < 3 {
            return Ok(());
        }

        let border = Style::new().fg(cs.popup_border).bg(cs.popup_bg);
        let mut y = 1u16;

        apply_style(stdout, &border)?;
        queue!(stdout, MoveTo(0, y))?;
        let title = format!(" {}/{} ", completion.selected + 1, completion.results.len());
        let fill = inner.saturating_sub(title.len() + 1);
        write!(stdout, "┌─{}{}┐", truncate(&title, inner.saturating_sub(1)), "─".repeat(fill))?;

        for (_, command, selected) in items.iter().take(height.saturating_sub(2)) {
            y += 1;
            queue!(stdout, MoveTo(0, y))?;
            apply_style(stdout, &border)?;
            write!(stdout, "│")?;
            let style = if *selected {
                Style::new().fg(cs.popup_selected_fg).bg(cs.popup_selected_bg)
            } else {
                Style::new().fg(cs.popup_fg).bg(cs.popup_bg)
            };
            apply_style(stdout, &style)?;
            let text = truncate(command, inner.saturating_sub(1));
            let padding = inner.saturating_sub(str_width(&text) + 1);
            write!(stdout, " {}{:padding$}", text, "", padding = padding)?;
            apply_style(stdout, &border)?;
            write!(stdout, "│")?;
        }

        y += 1;
        queue!(stdout, MoveTo(0, y))?;
        apply_style(stdout, &border)?;
        write!(stdout, "└{}┘", "─".repeat(inner))?;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

/// Apply segment style
fn apply_style<W: Write>(stdout: &mut W, style: &Style) -> io::Result<()> {
    // Reset first
    queue!(stdout, SetAttribute(Attribute::Reset), ResetColor)?;

    if style.flags.contains(AttrFlags::BOLD) {
        queue!(stdout, SetAttribute(Attribute::Bold))?;
    }
    if style.flags.contains(AttrFlags::ITALIC) {
        queue!(stdout, SetAttribute(Attribute::Italic))?;
    }
    if style.flags.contains(AttrFlags::UNDERLINE) {
        queue!(stdout, SetAttribute(Attribute::Underlined))?;
    }
    if let Some(fg) = style.fg {
        queue!(stdout, SetForegroundColor(fg.to_crossterm()))?;
    }
    if let Some(bg) = style.bg {
        queue!(stdout, SetBackgroundColor(bg.to_crossterm()))?;
    }
    Ok(())
}

fn str_width(s: &str) -> usize {
    s.chars().map(|c| c.width().unwrap_or(0)).sum()
}

/// Longest prefix of `s` at most `max` columns wide
fn truncate(s: &str, max: usize) -> String {
    let mut used = 0;
    s.chars()
        .take_while(|c| {
            let w = c.width().unwrap_or(0);
            if used + w <= max {
                used += w;
                true
            } else {
                false
            }
        })
        .collect()
}

/// Break the sink's lines into screen rows of at most `width` columns.
///
/// Tabs expand to the next multiple of eight; other control characters are
/// not drawn.
pub fn layout(sink: &OutputSink, width: usize) -> Vec<Row> {
    let width = width.max(1);
    let mut rows = Vec::new();
    for line in sink.lines() {
        wrap_line(&line, width, &mut rows);
    }
    rows
}

fn wrap_line(line: &[&StyledSegment], width: usize, rows: &mut Vec<Row>) {
    let first = rows.len();
    let mut row: Row = Vec::new();
    let mut col = 0;

    for segment in line {
        for ch in segment.text.chars() {
            let (text, w) = match ch {
                '\t' => {
                    let spaces = (TAB_WIDTH - col % TAB_WIDTH).min(width - col);
                    (" ".repeat(spaces), spaces)
                }
                c if c.is_control() => continue,
                c => (c.to_string(), c.width().unwrap_or(0)),
            };
            if col + w > width && col > 0 {
                rows.push(std::mem::take(&mut row));
                col = 0;
            }
            match row.last_mut() {
                Some((last, style)) if *style == segment.style => last.push_str(&text),
                _ => row.push((text, segment.style)),
            }
            col += w;
            if col >= width {
                rows.push(std::mem::take(&mut row));
                col = 0;
            }
        }
    }

    // An empty line still takes a row
    if !row.is_empty() || rows.len() == first {
        rows.push(row);
    }
}

/// Rows of `total` shown in `height` screen rows. Appended output keeps the
/// newest rows at the bottom; prepended output keeps them at the top.
pub fn visible_window(total: usize, height: usize, scroll: usize, policy: OrderPolicy) -> Range<usize> {
    let shown = total.min(height);
    let scroll = scroll.min(total - shown);
    match policy {
        OrderPolicy::Append => {
            let end = total - scroll;
            end - shown..end
        }
        OrderPolicy::Prepend => scroll..scroll + shown,
    }
}
