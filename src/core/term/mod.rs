//! ANSI output interpretation: style state, stream parser and text encoding.

pub mod encoding;
pub mod parser;
pub mod style;

pub use encoding::Encoding;
pub use parser::{AnsiParser, ParseEvent, ParserOptions};
pub use style::{ansi_color, Color, Rgb, StyleState, Weight};
