//! Console front end for the bundled binary.
//!
//! - **renderer**: `DisplaySink` writing styled spans to the terminal
//! - **input**: line input source reading standard input

pub mod input;
pub mod renderer;

pub use input::{forward_input, InputEvent, LineReader};
pub use renderer::ConsoleSink;
