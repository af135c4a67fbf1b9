//! Subprocess I/O bridge.
//!
//! - **style**: segment style model
//! - **filter**: strips non-colour escape sequences from raw bytes
//! - **ansi**: SGR decoder producing styled segments
//! - **utf8**: reassembles characters split across reads
//! - **sink**: the output buffer everything is printed into
//! - **pty**: spawns a child on a pseudo-terminal or pipes
//! - **session**: one live child plus its reader and waiter threads
//!
//! # Data flow
//!
//! ```text
//! child ──> pty reader ──> ControlFilter ──> Utf8Stream ──> AnsiDecoder ──> OutputSink
//!   ^                                                                         │
//!   └──── Session::write / signal <── dispatcher            renderer <────────┘
//! ```

pub mod ansi;
pub mod filter;
pub mod pty;
pub mod retry;
pub mod session;
pub mod signal;
pub mod sink;
pub mod style;
pub mod utf8;
