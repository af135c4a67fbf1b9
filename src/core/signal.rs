//! Control signals forwarded to the live session.

/// A control request produced from a key combination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Ctrl+C
    Interrupt,
    /// Ctrl+Z
    Suspend,
    /// Ctrl+D
    EndOfInput,
    Escape,
    /// Any other control byte
    Raw(u8),
}

impl ControlSignal {
    /// In-band byte a terminal line discipline turns into this signal
    pub fn control_byte(self) -> u8 {
        match self {
            ControlSignal::Interrupt => 0x03,
            ControlSignal::Suspend => 0x1A,
            ControlSignal::EndOfInput => 0x04,
            ControlSignal::Escape => 0x1B,
            ControlSignal::Raw(b) => b,
        }
    }

    /// OS signal number, for signals that have one
    #[cfg(unix)]
    pub fn os_signal(self) -> Option<libc::c_int> {
        match self {
            ControlSignal::Interrupt => Some(libc::SIGINT),
            ControlSignal::Suspend => Some(libc::SIGTSTP),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ControlSignal::Interrupt => "interrupt",
            ControlSignal::Suspend => "suspend",
            ControlSignal::EndOfInput => "end-of-input",
            ControlSignal::Escape => "escape",
            ControlSignal::Raw(_) => "raw",
        }
    }
}

/// Deliver `signum` to process `pid`, or to its whole process group when
/// `group` is set (PTY children lead their own session).
#[cfg(unix)]
pub fn deliver(pid: u32, signum: libc::c_int, group: bool) -> std::io::Result<()> {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return Err(std::io::Error::from(std::io::ErrorKind::InvalidInput));
    };
    let target = if group { -pid } else { pid };
    // SAFETY: kill(2) has no memory-safety preconditions
    let rc = unsafe { libc::kill(target, signum) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
