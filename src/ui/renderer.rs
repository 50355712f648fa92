//! Console display sink using crossterm
//!
//! Renders styled spans by emitting SGR attributes to an output stream.

use std::io::{self, Write};

use crossterm::{
    cursor::MoveTo,
    queue,
    style::{
        Attribute, Print, ResetColor, SetAttribute, SetBackgroundColor,
        SetForegroundColor,
    },
    terminal::{self, Clear, ClearType},
};
use tracing::warn;

use crate::core::session::DisplaySink;
use crate::core::term::StyleState;

/// Display sink writing to a terminal
pub struct ConsoleSink<W: Write> {
    out: W,
    /// Spans written since the last clear
    spans: usize,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Get the hosting terminal size, with an 80x24 fallback
    pub fn size() -> (u16, u16) {
        terminal::size().unwrap_or((80, 24))
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, spans: 0 }
    }

    pub fn spans_written(&self) -> usize {
        self.spans
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Leave the terminal with default attributes
    pub fn cleanup(&mut self) -> io::Result<()> {
        queue!(self.out, SetAttribute(Attribute::Reset), ResetColor)?;
        self.out.flush()
    }

    fn write_span(&mut self, text: &str, style: &StyleState) -> io::Result<()> {
        let weight = if style.is_bold() {
            Attribute::Bold
        } else {
            Attribute::NormalIntensity
        };
        queue!(
            self.out,
            SetAttribute(weight),
            SetForegroundColor(style.fg.to_crossterm()),
            SetBackgroundColor(style.bg.to_crossterm()),
            Print(text),
            SetAttribute(Attribute::Reset),
            ResetColor
        )?;
        self.out.flush()
    }

    fn write_clear(&mut self) -> io::Result<()> {
        queue!(self.out, Clear(ClearType::All), MoveTo(0, 0))?;
        self.out.flush()
    }
}

impl<W: Write> DisplaySink for ConsoleSink<W> {
    fn append_span(&mut self, text: &str, style: &StyleState) {
        match self.write_span(text, style) {
            Ok(()) => self.spans += 1,
            Err(e) => warn!("Failed to render output: {}", e),
        }
    }

    fn clear_all(&mut self) {
        if let Err(e) = self.write_clear() {
            warn!("Failed to clear display: {}", e);
        }
        self.spans = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::term::{Color, Weight};

    fn rendered(sink: ConsoleSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn test_styled_span() {
        let mut sink = ConsoleSink::new(Vec::new());
        let style = StyleState {
            weight: Weight::Bold,
            fg: Color::Indexed(1),
            bg: Color::Indexed(7),
        };

        sink.append_span("error", &style);
        assert_eq!(sink.spans_written(), 1);

        let out = rendered(sink);
        assert!(out.contains("\x1b[1m"), "{out:?}");
        assert!(out.contains("38;2;128;0;0"), "{out:?}");
        assert!(out.contains("48;2;192;192;192"), "{out:?}");
        assert!(out.contains("error"));
    }

    #[test]
    fn test_default_span_has_no_rgb() {
        let mut sink = ConsoleSink::new(Vec::new());
        sink.append_span("plain", &StyleState::default());

        let out = rendered(sink);
        assert!(out.contains("plain"));
        assert!(!out.contains("38;2;"));
        assert!(!out.contains("48;2;"));
    }

    #[test]
    fn test_clear_all() {
        let mut sink = ConsoleSink::new(Vec::new());
        sink.append_span("old", &StyleState::default());
        sink.clear_all();
        assert_eq!(sink.spans_written(), 0);

        let out = rendered(sink);
        assert!(out.contains("\x1b[2J"), "{out:?}");
        assert!(out.ends_with("\x1b[1;1H"), "{out:?}");
    }
}
