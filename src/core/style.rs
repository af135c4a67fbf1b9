//! Style attributes carried by output segments.
//!
//! A [`Style`] only records what has been explicitly set. Unset colours
//! (`None`) and cleared flags inherit from whatever the renderer uses as its
//! default, so a segment decoded against [`Style::default()`] renders in the
//! host terminal's own colours.

use bitflags::bitflags;

bitflags! {
    /// Text attributes
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct AttrFlags: u8 {
        const BOLD      = 0b0001;
        const ITALIC    = 0b0010;
        const UNDERLINE = 0b0100;
    }
}

/// Colour definition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Color {
    /// 256-colour palette index (0-15 are the classic ANSI colours)
    Indexed(u8),
    /// 24-bit colour
    Rgb(u8, u8, u8),
}

impl Color {
    pub const BLACK: Color = Color::Indexed(0);
    pub const RED: Color = Color::Indexed(1);
    pub const GREEN: Color = Color::Indexed(2);
    pub const YELLOW: Color = Color::Indexed(3);
    pub const BLUE: Color = Color::Indexed(4);
    pub const MAGENTA: Color = Color::Indexed(5);
    pub const CYAN: Color = Color::Indexed(6);
    pub const WHITE: Color = Color::Indexed(7);
    pub const GRAY: Color = Color::Indexed(8);

    /// Entry `n` (0-15) of the fixed 16-colour palette.
    pub fn palette(n: u8) -> Self {
        Color::Indexed(n & 0x0F)
    }

    /// Convert to crossterm color
    pub fn to_crossterm(self) -> crossterm::style::Color {
        match self {
            Color::Indexed(n) => crossterm::style::Color::AnsiValue(n),
            Color::Rgb(r, g, b) => crossterm::style::Color::Rgb { r, g, b },
        }
    }
}

/// Foreground, background and attribute state of a run of text
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Style {
    pub fg: Option<Color>,
    pub bg: Option<Color>,
    pub flags: AttrFlags,
}

impl Style {
    pub const fn new() -> Self {
        Self {
            fg: None,
            bg: None,
            flags: AttrFlags::empty(),
        }
    }

    pub fn fg(mut self, color: Color) -> Self {
        self.fg = Some(color);
        self
    }

    pub fn bg(mut self, color: Color) -> Self {
        self.bg = Some(color);
        self
    }

    pub fn bold(mut self) -> Self {
        self.flags |= AttrFlags::BOLD;
        self
    }

    pub fn is_bold(&self) -> bool {
        self.flags.contains(AttrFlags::BOLD)
    }

    pub fn is_italic(&self) -> bool {
        self.flags.contains(AttrFlags::ITALIC)
    }

    pub fn is_underline(&self) -> bool {
        self.flags.contains(AttrFlags::UNDERLINE)
    }
}

/// A contiguous run of text sharing one style
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StyledSegment {
    pub text: String,
    pub style: Style,
}

impl StyledSegment {
    pub fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }

    /// Explicit line break marker
    pub fn newline(style: Style) -> Self {
        Self {
            text: "\n".to_string(),
            style,
        }
    }

    pub fn is_newline(&self) -> bool {
        self.text == "\n"
    }
}
