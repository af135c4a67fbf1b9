//! SGR decoder
//!
//! Turns text containing `ESC [ <params> m` sequences into styled segments.
//! Only colour and attribute codes are interpreted; any other CSI sequence
//! that reaches the decoder is dropped without affecting the style.

use super::style::{AttrFlags, Color, Style, StyledSegment};

const ESC: char = '\x1b';

/// Decode `raw` against `base` in one shot.
///
/// Concatenating the text of the returned segments yields `raw` with every
/// complete CSI sequence removed.
pub fn decode(raw: &str, base: Style) -> Vec<StyledSegment> {
    AnsiDecoder::new(base).feed(raw)
}

/// Streaming SGR decoder
///
/// Keeps the accumulated style between calls so a colour set at the end of
/// one read still applies to text arriving in the next.
#[derive(Debug, Clone)]
pub struct AnsiDecoder {
    base: Style,
    current: Style,
}

impl AnsiDecoder {
    pub fn new(base: Style) -> Self {
        Self {
            base,
            current: base,
        }
    }

    /// Style that will be applied to the next text run
    pub fn current(&self) -> Style {
        self.current
    }

    pub fn feed(&mut self, raw: &str) -> Vec<StyledSegment> {
        let mut segments: Vec<StyledSegment> = Vec::new();
        let mut run_start = 0;
        let mut i = 0;
        let bytes = raw.as_bytes();

        while i < bytes.len() {
            if bytes[i] != ESC as u8 || bytes.get(i + 1) != Some(&b'[') {
                i += 1;
                continue;
            }

            let Some(csi) = scan_csi(&bytes[i + 2..]) else {
                // Unterminated sequence stays in the text
                i += 1;
                continue;
            };

            push_run(&mut segments, &raw[run_start..i], self.current);

            if csi.final_byte == b'm' && csi.is_plain_params() {
                let params = &raw[i + 2..i + 2 + csi.params_len];
                self.apply(params);
            }

            i += 2 + csi.len;
            run_start = i;
        }

        push_run(&mut segments, &raw[run_start..], self.current);
        segments
    }

    fn apply(&mut self, params: &str) {
        let codes = parse_params(params);
        if codes.is_empty() {
            self.current = self.base;
            return;
        }

        let mut i = 0;
        while i < codes.len() {
            let code = codes[i];
            match code {
                0 => self.current = self.base,

                1 => self.current.flags |= AttrFlags::BOLD,
                3 => self.current.flags |= AttrFlags::ITALIC,
                4 => self.current.flags |= AttrFlags::UNDERLINE,
                22 => self.current.flags &= !AttrFlags::BOLD,
                23 => self.current.flags &= !AttrFlags::ITALIC,
                24 => self.current.flags &= !AttrFlags::UNDERLINE,

                30..=37 => self.current.fg = Some(Color::palette((code - 30) as u8)),
                90..=97 => self.current.fg = Some(Color::palette((code - 90 + 8) as u8)),
                39 => self.current.fg = self.base.fg,

                40..=47 => self.current.bg = Some(Color::palette((code - 40) as u8)),
                100..=107 => self.current.bg = Some(Color::palette((code - 100 + 8) as u8)),
                49 => self.current.bg = self.base.bg,

                38 | 48 => {
                    if let Some((color, consumed)) = extended_color(&codes[i + 1..]) {
                        if code == 38 {
                            self.current.fg = color.or(self.current.fg);
                        } else {
                            self.current.bg = color.or(self.current.bg);
                        }
                        i += consumed;
                    }
                }

                _ => {}
            }
            i += 1;
        }
    }
}

/// Parse the colour following a 38/48 code.
///
/// Returns the colour (if its components are in range) and the number of
/// parameters consumed, or `None` when the form is incomplete or unknown, in
/// which case the 38/48 itself is ignored.
fn extended_color(rest: &[u32]) -> Option<(Option<Color>, usize)> {
    match rest.first()? {
        5 => {
            let n = *rest.get(1)?;
            Some((u8::try_from(n).ok().map(Color::Indexed), 2))
        }
        2 => {
            let rgb = rest.get(1..4)?;
            let color = match (
                u8::try_from(rgb[0]),
                u8::try_from(rgb[1]),
                u8::try_from(rgb[2]),
            ) {
                (Ok(r), Ok(g), Ok(b)) => Some(Color::Rgb(r, g, b)),
                _ => None,
            };
            Some((color, 4))
        }
        _ => None,
    }
}

/// `"1;;31"` -> `[1, 0, 31]`; out-of-range numbers become `u32::MAX`.
fn parse_params(params: &str) -> Vec<u32> {
    if params.is_empty() {
        return Vec::new();
    }
    params
        .split(';')
        .map(|part| {
            if part.is_empty() {
                0
            } else {
                part.parse::<u32>().unwrap_or(u32::MAX)
            }
        })
        .collect()
}

fn push_run(segments: &mut Vec<StyledSegment>, text: &str, style: Style) {
    if text.is_empty() {
        return;
    }
    match segments.last_mut() {
        Some(last) if last.style == style => last.text.push_str(text),
        _ => segments.push(StyledSegment::new(text, style)),
    }
}

/// Shape of a CSI sequence body (the bytes after `ESC [`)
pub(crate) struct CsiScan {
    /// Length of the body including the final byte
    pub len: usize,
    /// Length of the parameter bytes
    pub params_len: usize,
    pub final_byte: u8,
    plain: bool,
}

impl CsiScan {
    /// Parameters consist solely of digits and `;`, with no intermediates
    pub fn is_plain_params(&self) -> bool {
        self.plain
    }
}

/// Scan a CSI body: parameter bytes 0x30-0x3F, intermediates 0x20-0x2F,
/// final byte 0x40-0x7E. `None` if the body is incomplete or malformed.
pub(crate) fn scan_csi(body: &[u8]) -> Option<CsiScan> {
    let mut i = 0;
    let mut plain = true;

    while let Some(&b) = body.get(i) {
        if !(0x30..=0x3F).contains(&b) {
            break;
        }
        if !(b.is_ascii_digit() || b == b';') {
            plain = false;
        }
        i += 1;
    }
    let params_len = i;

    while let Some(&b) = body.get(i) {
        if !(0x20..=0x2F).contains(&b) {
            break;
        }
        plain = false;
        i += 1;
    }

    let final_byte = *body.get(i)?;
    if !(0x40..=0x7E).contains(&final_byte) {
        return None;
    }

    Some(CsiScan {
        len: i + 1,
        params_len,
        final_byte,
        plain,
    })
}
