//! User interface rendering and input handling.
//!
//! - **renderer**: prompt line, output area and completion popup
//! - **dispatcher**: routes keys to the line editor or the live session
//! - **keymapper**: keyboard input to byte sequence mapping

pub mod dispatcher;
pub mod keymapper;
pub mod renderer;

pub use dispatcher::{Dispatch, InputDispatcher};
pub use renderer::{Renderer, View};
