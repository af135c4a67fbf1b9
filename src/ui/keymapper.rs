//! Key mapping for session input
//!
//! Converts key events to the byte sequences a terminal would send.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// Key mapper for converting key events to bytes
pub struct KeyMapper;

impl KeyMapper {
    /// Map a crossterm KeyEvent to bytes for the child
    pub fn map(event: &KeyEvent) -> Option<Vec<u8>> {
        let mods = Modifiers::from(event.modifiers);

        match event.code {
            // Character keys
            KeyCode::Char(ch) => Some(Self::map_char(ch, mods)),

            // Enter
            KeyCode::Enter => Some(vec![0x0D]),

            // Backspace
            KeyCode::Backspace => {
                if mods.contains(Modifiers::ALT) {
                    Some(vec![0x1B, 0x08])
                } else {
                    Some(vec![0x08])
                }
            }

            // Tab
            KeyCode::Tab => Some(vec![0x09]),
            KeyCode::BackTab => Some(b"\x1b[Z".to_vec()),

            // Escape
            KeyCode::Esc => Some(vec![0x1B]),

            // Arrow keys
            KeyCode::Up => Some(Self::special_key(b'A', mods)),
            KeyCode::Down => Some(Self::special_key(b'B', mods)),
            KeyCode::Right => Some(Self::special_key(b'C', mods)),
            KeyCode::Left => Some(Self::special_key(b'D', mods)),

            // Navigation keys
            KeyCode::Home => Some(Self::special_key(b'H', mods)),
            KeyCode::End => Some(Self::special_key(b'F', mods)),
            KeyCode::PageUp => Some(Self::tilde_key(5, mods)),
            KeyCode::PageDown => Some(Self::tilde_key(6, mods)),
            KeyCode::Insert => Some(Self::tilde_key(2, mods)),
            KeyCode::Delete => Some(Self::tilde_key(3, mods)),

            // Function keys
            KeyCode::F(n) => {
                let bytes = Self::function_key(n, mods);
                (!bytes.is_empty()).then_some(bytes)
            }

            _ => None,
        }
    }

    /// Control byte for Ctrl+`ch`, if the combination has one
    pub fn control_byte(ch: char) -> Option<u8> {
        match ch {
            'a'..='z' => Some(ch as u8 - b'a' + 1),
            'A'..='Z' => Some(ch as u8 - b'A' + 1),
            '@' | '`' | ' ' => Some(0x00),
            '[' => Some(0x1B),
            '\\' => Some(0x1C),
            ']' => Some(0x1D),
            '^' | '~' => Some(0x1E),
            '_' | '?' => Some(0x1F),
            _ => None,
        }
    }

    /// Map a character with modifiers
    fn map_char(ch: char, mods: Modifiers) -> Vec<u8> {
        let ctrl = mods.contains(Modifiers::CTRL);
        let alt = mods.contains(Modifiers::ALT);

        if ctrl {
            if let Some(byte) = Self::control_byte(ch) {
                // Ctrl+Alt+key = ESC + control byte
                return if alt { vec![0x1B, byte] } else { vec![byte] };
            }
        }

        let mut bytes = Vec::with_capacity(5);
        // Alt + key = ESC + key
        if alt {
            bytes.push(0x1B);
        }
        let mut buf = [0u8; 4];
        bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        bytes
    }

    /// Arrow, Home and End: ESC [ <key>, or ESC [ 1 ; <mod> <key>
    fn special_key(key: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            vec![0x1B, b'[', key]
        } else {
            let mod_code = Self::modifier_code(mods);
            format!("\x1b[1;{}{}", mod_code, key as char).into_bytes()
        }
    }

    /// Tilde key sequence (PageUp, PageDown, Insert, Delete)
    fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
        if mods.is_empty() {
            format!("\x1b[{}~", code).into_bytes()
        } else {
            let mod_code = Self::modifier_code(mods);
            format!("\x1b[{};{}~", code, mod_code).into_bytes()
        }
    }

    /// Function key sequence: F1-F4 as ESC O x, the rest as ESC [ NN ~
    fn function_key(n: u8, mods: Modifiers) -> Vec<u8> {
        let code = match n {
            1..=4 => {
                let key = b"PQRS"[usize::from(n - 1)];
                return if mods.is_empty() {
                    vec![0x1B, b'O', key]
                } else {
                    // ESC O X -> ESC [ 1 ; mod X
                    let mod_code = Self::modifier_code(mods);
                    format!("\x1b[1;{}{}", mod_code, key as char).into_bytes()
                };
            }
            5 => 15,
            6 => 17,
            7 => 18,
            8 => 19,
            9 => 20,
            10 => 21,
            11 => 23,
            12 => 24,
            _ => return vec![],
        };
        Self::tilde_key(code, mods)
    }

    /// Calculate xterm modifier code
    fn modifier_code(mods: Modifiers) -> u8 {
        1 + if mods.contains(Modifiers::SHIFT) { 1 } else { 0 }
            + if mods.contains(Modifiers::ALT) { 2 } else { 0 }
            + if mods.contains(Modifiers::CTRL) { 4 } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_event(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    #[test]
    fn test_char_keys() {
        // Normal character
        let event = key_event(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some(b"a".to_vec()));

        // Multi-byte character
        let event = key_event(KeyCode::Char('ж'), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some("ж".as_bytes().to_vec()));

        // Ctrl+C
        let event = key_event(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event), Some(vec![0x03]));

        // Alt+x
        let event = key_event(KeyCode::Char('x'), KeyModifiers::ALT);
        assert_eq!(KeyMapper::map(&event), Some(vec![0x1B, b'x']));
    }

    #[test]
    fn test_editing_keys() {
        let map = |code| KeyMapper::map(&key_event(code, KeyModifiers::NONE));
        assert_eq!(map(KeyCode::Enter), Some(vec![0x0D]));
        assert_eq!(map(KeyCode::Backspace), Some(vec![0x08]));
        assert_eq!(map(KeyCode::Tab), Some(vec![0x09]));
        assert_eq!(map(KeyCode::Esc), Some(vec![0x1B]));
        assert_eq!(map(KeyCode::Delete), Some(b"\x1b[3~".to_vec()));
        assert_eq!(map(KeyCode::CapsLock), None);
    }

    #[test]
    fn test_arrow_keys() {
        let event = key_event(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some(b"\x1b[A".to_vec()));

        // With Ctrl
        let event = key_event(KeyCode::Up, KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event), Some(b"\x1b[1;5A".to_vec()));
    }

    #[test]
    fn test_function_keys() {
        let event = key_event(KeyCode::F(1), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some(b"\x1bOP".to_vec()));

        let event = key_event(KeyCode::F(5), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), Some(b"\x1b[15~".to_vec()));

        let event = key_event(KeyCode::F(12), KeyModifiers::SHIFT);
        assert_eq!(KeyMapper::map(&event), Some(b"\x1b[24;2~".to_vec()));

        let event = key_event(KeyCode::F(2), KeyModifiers::CONTROL);
        assert_eq!(KeyMapper::map(&event), Some(b"\x1b[1;5Q".to_vec()));

        let event = key_event(KeyCode::F(20), KeyModifiers::NONE);
        assert_eq!(KeyMapper::map(&event), None);
    }

    #[test]
    fn test_control_byte() {
        assert_eq!(KeyMapper::control_byte('a'), Some(0x01));
        assert_eq!(KeyMapper::control_byte('Z'), Some(0x1A));
        assert_eq!(KeyMapper::control_byte('\\'), Some(0x1C));
        assert_eq!(KeyMapper::control_byte('1'), None);
    }
}
