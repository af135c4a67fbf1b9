//! Control-sequence filter
//!
//! Strips escape sequences the segment buffer has no model for (cursor
//! movement, erase, mode switches, titles) while passing SGR colour
//! sequences through verbatim for the decoder.
//!
//! The filter is a byte state machine so a sequence split across two PTY
//! reads is still recognised: unfinished bytes are held until the sequence
//! completes.

const ESC: u8 = 0x1B;
const BEL: u8 = 0x07;

/// Longest CSI body kept pending before it is treated as garbage
const MAX_CSI_LEN: usize = 64;
/// Longest OSC payload kept pending before it is treated as garbage
const MAX_OSC_LEN: usize = 4096;

/// Filter a complete buffer in one shot.
pub fn filter(raw: &[u8]) -> Vec<u8> {
    let mut filter = ControlFilter::new();
    let mut out = filter.filter(raw);
    out.extend(filter.finish());
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FilterState {
    Ground,
    Escape,
    EscapeIntermediate,
    CsiParam,
    CsiIntermediate,
    Osc,
    OscEscape,
}

/// Streaming escape-sequence filter
pub struct ControlFilter {
    state: FilterState,
    /// Bytes of the sequence currently being recognised (starting with ESC)
    pending: Vec<u8>,
    /// Pending CSI parameters contain only digits and `;`
    plain_params: bool,
}

impl Default for ControlFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlFilter {
    pub fn new() -> Self {
        Self {
            state: FilterState::Ground,
            pending: Vec::with_capacity(16),
            plain_params: true,
        }
    }

    /// Filter a chunk, returning the bytes that are safe to decode.
    pub fn filter(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for &byte in data {
            self.feed(byte, &mut out);
        }
        out
    }

    /// Release any unfinished sequence as plain bytes.
    pub fn finish(&mut self) -> Vec<u8> {
        self.state = FilterState::Ground;
        std::mem::take(&mut self.pending)
    }

    fn feed(&mut self, byte: u8, out: &mut Vec<u8>) {
        match self.state {
            FilterState::Ground => {
                if byte == ESC {
                    self.start_escape();
                } else {
                    out.push(byte);
                }
            }
            FilterState::Escape => match byte {
                b'[' => {
                    self.pending.push(byte);
                    self.plain_params = true;
                    self.state = FilterState::CsiParam;
                }
                b']' => {
                    self.pending.push(byte);
                    self.state = FilterState::Osc;
                }
                0x20..=0x2F => {
                    self.pending.push(byte);
                    self.state = FilterState::EscapeIntermediate;
                }
                // Two-byte escape (ESC 7, ESC =, ESC M, ...)
                0x30..=0x7E => self.discard(),
                ESC => {
                    out.push(ESC);
                    self.start_escape();
                }
                _ => self.abandon(byte, out),
            },
            FilterState::EscapeIntermediate => match byte {
                0x20..=0x2F => self.pending.push(byte),
                0x30..=0x7E => self.discard(),
                _ => self.abandon(byte, out),
            },
            FilterState::CsiParam => match byte {
                0x30..=0x3F => {
                    if !(byte.is_ascii_digit() || byte == b';') {
                        self.plain_params = false;
                    }
                    self.push_csi(byte, out);
                }
                0x20..=0x2F => {
                    self.plain_params = false;
                    self.state = FilterState::CsiIntermediate;
                    self.push_csi(byte, out);
                }
                0x40..=0x7E => self.finish_csi(byte, out),
                _ => self.abandon(byte, out),
            },
            FilterState::CsiIntermediate => match byte {
                0x20..=0x2F => self.push_csi(byte, out),
                0x40..=0x7E => self.finish_csi(byte, out),
                _ => self.abandon(byte, out),
            },
            FilterState::Osc => match byte {
                BEL => self.discard(),
                ESC => {
                    self.pending.push(byte);
                    self.state = FilterState::OscEscape;
                }
                _ => {
                    self.pending.push(byte);
                    if self.pending.len() > MAX_OSC_LEN {
                        out.append(&mut self.pending);
                        self.state = FilterState::Ground;
                    }
                }
            },
            FilterState::OscEscape => {
                // ESC \ is the string terminator; any other byte ends the OSC
                // and starts a new escape sequence
                self.discard();
                if byte != b'\\' {
                    self.start_escape();
                    self.feed(byte, out);
                }
            }
        }
    }

    fn start_escape(&mut self) {
        self.pending.clear();
        self.pending.push(ESC);
        self.state = FilterState::Escape;
    }

    fn push_csi(&mut self, byte: u8, out: &mut Vec<u8>) {
        self.pending.push(byte);
        if self.pending.len() > MAX_CSI_LEN {
            out.append(&mut self.pending);
            self.state = FilterState::Ground;
        }
    }

    fn finish_csi(&mut self, final_byte: u8, out: &mut Vec<u8>) {
        if final_byte == b'm' && self.plain_params {
            out.append(&mut self.pending);
            out.push(final_byte);
        }
        self.discard();
    }

    /// Drop the pending sequence
    fn discard(&mut self) {
        self.pending.clear();
        self.state = FilterState::Ground;
    }

    /// Not an escape sequence after all: emit what was held
    fn abandon(&mut self, byte: u8, out: &mut Vec<u8>) {
        out.append(&mut self.pending);
        out.push(byte);
        self.state = FilterState::Ground;
    }
}
