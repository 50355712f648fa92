//! ANSI stream parser
//!
//! Splits shell output into literal text spans and SGR escape codes, and
//! tracks the style state the codes produce. Only `ESC [ <params> m` and the
//! exact clear-screen sequence are interpreted; every other byte, including
//! any other escape sequence, is passed through as literal text.

use super::encoding::Encoding;
use super::style::StyleState;

const ESC: u8 = 0x1B;

/// `ESC [ H ESC [ 2 J`: cursor home followed by erase display
pub const CLEAR_SCREEN: &[u8] = b"\x1b[H\x1b[2J";

/// Longest trailing fragment held back waiting for the rest of a sequence
pub const MAX_PENDING: usize = 64;

/// Output of the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    /// Literal text, with the style in effect when it was emitted
    Text { text: String, style: StyleState },
    /// The screen-clear sequence was seen
    Clear,
}

/// Parser options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserOptions {
    /// Hold an incomplete trailing escape sequence (or multi-byte character)
    /// until the next chunk instead of emitting it as literal text.
    pub hold_partial_sequences: bool,
    /// Encoding used to turn literal bytes into text
    pub encoding: Encoding,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            hold_partial_sequences: true,
            encoding: Encoding::Utf8,
        }
    }
}

/// Scanner state
#[derive(Clone, Copy, PartialEq)]
enum ScanState {
    Literal,
    /// Inside a candidate escape starting at the given offset
    Escape(usize),
}

/// Streaming ANSI parser
pub struct AnsiParser {
    options: ParserOptions,
    /// Trailing bytes of the previous chunk not yet interpreted
    pending: Vec<u8>,
}

impl Default for AnsiParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AnsiParser {
    pub fn new() -> Self {
        Self::with_options(ParserOptions::default())
    }

    pub fn with_options(options: ParserOptions) -> Self {
        Self {
            options,
            pending: Vec::with_capacity(MAX_PENDING),
        }
    }

    pub fn options(&self) -> ParserOptions {
        self.options
    }

    /// Whether bytes are being held back for the next chunk
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Feed a chunk of shell output
    pub fn feed(&mut self, chunk: &[u8], style: &mut StyleState) -> Vec<ParseEvent> {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(chunk);

        let mut events = Vec::new();

        if find(&data, CLEAR_SCREEN).is_some() {
            events.push(ParseEvent::Clear);
            data = strip_all(&data, CLEAR_SCREEN);
        }

        let mut split = data.len();
        if self.options.hold_partial_sequences {
            if let Some(start) = partial_sequence_start(&data) {
                split = start;
            } else {
                split -= self.options.encoding.incomplete_tail_len(&data);
            }
        }

        self.scan(&data[..split], style, &mut events);

        if split < data.len() {
            tracing::trace!("Holding {} byte(s) for the next chunk", data.len() - split);
            self.pending.extend_from_slice(&data[split..]);
        }

        events
    }

    /// Release any held bytes as literal text
    pub fn flush(&mut self, style: &StyleState) -> Vec<ParseEvent> {
        if self.pending.is_empty() {
            return Vec::new();
        }
        let bytes = std::mem::take(&mut self.pending);
        vec![ParseEvent::Text {
            text: self.options.encoding.decode(&bytes),
            style: *style,
        }]
    }

    /// Walk the bytes once, emitting spans and applying SGR codes
    fn scan(&self, bytes: &[u8], style: &mut StyleState, events: &mut Vec<ParseEvent>) {
        let mut text: Vec<u8> = Vec::new();
        let mut state = ScanState::Literal;
        let mut i = 0;

        while i < bytes.len() {
            let b = bytes[i];
            match state {
                ScanState::Literal => {
                    if b == ESC {
                        state = ScanState::Escape(i);
                    } else {
                        text.push(b);
                    }
                    i += 1;
                }
                ScanState::Escape(start) => {
                    let introducer = i == start + 1;
                    if introducer && b == b'[' {
                        i += 1;
                    } else if !introducer && (b.is_ascii_digit() || b == b';') {
                        i += 1;
                    } else if !introducer && b == b'm' {
                        self.emit_text(&mut text, style, events);
                        style.apply_params(&bytes[start + 2..i]);
                        state = ScanState::Literal;
                        i += 1;
                    } else {
                        // Not SGR: the escape bytes are text, and `b` is
                        // looked at again in literal mode
                        text.extend_from_slice(&bytes[start..i]);
                        state = ScanState::Literal;
                    }
                }
            }
        }

        if let ScanState::Escape(start) = state {
            text.extend_from_slice(&bytes[start..]);
        }
        self.emit_text(&mut text, style, events);
    }

    fn emit_text(&self, text: &mut Vec<u8>, style: &StyleState, events: &mut Vec<ParseEvent>) {
        if text.is_empty() {
            return;
        }
        events.push(ParseEvent::Text {
            text: self.options.encoding.decode(text),
            style: *style,
        });
        text.clear();
    }
}

/// Offset of the earliest trailing escape that could still complete into
/// an SGR sequence or the clear-screen sequence.
fn partial_sequence_start(data: &[u8]) -> Option<usize> {
    let window = data.len().saturating_sub(MAX_PENDING);
    (window..data.len())
        .filter(|&i| data[i] == ESC)
        .find(|&i| is_incomplete_sequence(&data[i..]))
}

fn is_incomplete_sequence(tail: &[u8]) -> bool {
    if tail.len() < CLEAR_SCREEN.len() && CLEAR_SCREEN.starts_with(tail) {
        return true;
    }
    match tail {
        [ESC] => true,
        [ESC, b'[', params @ ..] => params.iter().all(|&b| b.is_ascii_digit() || b == b';'),
        _ => false,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Remove every non-overlapping occurrence, scanning left to right once
fn strip_all(data: &[u8], needle: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut rest = data;
    while let Some(pos) = find(rest, needle) {
        out.extend_from_slice(&rest[..pos]);
        rest = &rest[pos + needle.len()..];
    }
    out.extend_from_slice(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::super::style::{Color, Weight};
    use super::*;

    fn text(s: &str, style: StyleState) -> ParseEvent {
        ParseEvent::Text {
            text: s.to_string(),
            style,
        }
    }

    fn bold_red() -> StyleState {
        StyleState {
            weight: Weight::Bold,
            fg: Color::Indexed(1),
            bg: Color::Default,
        }
    }

    /// Per-chunk mode: nothing is carried between calls
    fn chunked_parser() -> AnsiParser {
        AnsiParser::with_options(ParserOptions {
            hold_partial_sequences: false,
            ..ParserOptions::default()
        })
    }

    fn concat_text(events: &[ParseEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                ParseEvent::Text { text, .. } => Some(text.as_str()),
                ParseEvent::Clear => None,
            })
            .collect()
    }

    #[test]
    fn test_plain_text_is_one_span() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();

        let events = parser.feed(b"total 12\r\ndrwxr-xr-x  2 user\r\n", &mut style);
        assert_eq!(
            events,
            vec![text("total 12\r\ndrwxr-xr-x  2 user\r\n", StyleState::default())]
        );
        assert_eq!(style, StyleState::default());
    }

    #[test]
    fn test_style_persists_across_chunks() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();

        assert!(parser.feed(b"\x1b[1m", &mut style).is_empty());
        let events = parser.feed(b"hi", &mut style);

        let bold = StyleState {
            weight: Weight::Bold,
            ..StyleState::default()
        };
        assert_eq!(events, vec![text("hi", bold)]);
    }

    #[test]
    fn test_reset() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();

        let first = parser.feed(b"\x1b[1;31mX", &mut style);
        let second = parser.feed(b"\x1b[0mY", &mut style);

        assert_eq!(first, vec![text("X", bold_red())]);
        assert_eq!(second, vec![text("Y", StyleState::default())]);
    }

    #[test]
    fn test_style_applies_after_code_only() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();

        let events = parser.feed(b"a\x1b[31mb\x1b[44mc\x1b[39;49md", &mut style);
        let red = StyleState {
            fg: Color::Indexed(1),
            ..StyleState::default()
        };
        let red_on_blue = StyleState {
            bg: Color::Indexed(4),
            ..red
        };
        assert_eq!(
            events,
            vec![
                text("a", StyleState::default()),
                text("b", red),
                text("c", red_on_blue),
                text("d", StyleState::default()),
            ]
        );
    }

    #[test]
    fn test_unknown_code_tolerated() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();
        parser.feed(b"\x1b[1;31m", &mut style);

        let events = parser.feed(b"\x1b[99mtext", &mut style);
        assert_eq!(events, vec![text("text", bold_red())]);
        assert_eq!(style, bold_red());
    }

    #[test]
    fn test_clear_screen_isolated() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();

        let events = parser.feed(b"\x1b[H\x1b[2Jok", &mut style);
        assert_eq!(
            events,
            vec![ParseEvent::Clear, text("ok", StyleState::default())]
        );
    }

    #[test]
    fn test_clear_screen_every_occurrence_stripped() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();

        let events = parser.feed(b"one\x1b[H\x1b[2Jtwo\x1b[H\x1b[2Jthree", &mut style);
        assert_eq!(events[0], ParseEvent::Clear);
        assert_eq!(events.iter().filter(|e| **e == ParseEvent::Clear).count(), 1);
        assert_eq!(concat_text(&events), "onetwothree");
    }

    #[test]
    fn test_lone_cursor_home_is_literal() {
        let mut parser = chunked_parser();
        let mut style = StyleState::new();

        let events = parser.feed(b"\x1b[Hx", &mut style);
        assert_eq!(events, vec![text("\x1b[Hx", StyleState::default())]);
    }

    #[test]
    fn test_non_sgr_sequences_pass_through() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();

        let events = parser.feed(b"up\x1b[2Adone\x1b]0;title\x07", &mut style);
        assert_eq!(
            events,
            vec![text("up\x1b[2Adone\x1b]0;title\x07", StyleState::default())]
        );
    }

    #[test]
    fn test_double_escape() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();

        let events = parser.feed(b"\x1b\x1b[32mgo", &mut style);
        let green = StyleState {
            fg: Color::Indexed(2),
            ..StyleState::default()
        };
        assert_eq!(
            events,
            vec![text("\x1b", StyleState::default()), text("go", green)]
        );
    }

    #[test]
    fn test_empty_sgr_is_not_reset() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();

        parser.feed(b"\x1b[1m", &mut style);
        let events = parser.feed(b"\x1b[mx", &mut style);
        assert!(matches!(&events[..], [ParseEvent::Text { style, .. }] if style.is_bold()));
    }

    #[test]
    fn test_text_reconstructed_without_escapes() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();

        let input: &[u8] = b"\x1b[01;34mdir\x1b[0m  file.txt  \x1b[01;32mrun.sh\x1b[0m\r\n$ ";
        let events = parser.feed(input, &mut style);
        assert_eq!(concat_text(&events), "dir  file.txt  run.sh\r\n$ ");
        assert!(!parser.has_pending());
    }

    // Sequences split across reads: the default parser holds the trailing
    // fragment, the per-chunk parser emits it as literal text. Neither
    // loses bytes.

    #[test]
    fn test_split_sequence_held() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();

        let first = parser.feed(b"abc\x1b", &mut style);
        assert_eq!(first, vec![text("abc", StyleState::default())]);
        assert!(parser.has_pending());

        let second = parser.feed(b"[31mdef", &mut style);
        let red = StyleState {
            fg: Color::Indexed(1),
            ..StyleState::default()
        };
        assert_eq!(second, vec![text("def", red)]);
        assert!(!parser.has_pending());
    }

    #[test]
    fn test_split_sequence_byte_at_a_time() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();

        let mut events = Vec::new();
        for byte in b"\x1b[1;31mX\x1b[0mY" {
            events.extend(parser.feed(&[*byte], &mut style));
        }
        assert_eq!(
            events,
            vec![text("X", bold_red()), text("Y", StyleState::default())]
        );
    }

    #[test]
    fn test_split_sequence_per_chunk_mode() {
        let mut parser = chunked_parser();
        let mut style = StyleState::new();

        let first = parser.feed(b"abc\x1b", &mut style);
        let second = parser.feed(b"[31mdef", &mut style);

        assert_eq!(first, vec![text("abc\x1b", StyleState::default())]);
        assert_eq!(second, vec![text("[31mdef", StyleState::default())]);
        assert!(!parser.has_pending());
    }

    #[test]
    fn test_split_clear_screen_held() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();

        let first = parser.feed(b"old\x1b[H\x1b[", &mut style);
        assert_eq!(first, vec![text("old", StyleState::default())]);

        let second = parser.feed(b"2Jnew", &mut style);
        assert_eq!(
            second,
            vec![ParseEvent::Clear, text("new", StyleState::default())]
        );
    }

    #[test]
    fn test_overlong_fragment_released() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();

        let mut input = b"\x1b[".to_vec();
        input.extend(std::iter::repeat(b'1').take(MAX_PENDING + 8));

        let events = parser.feed(&input, &mut style);
        assert_eq!(concat_text(&events).as_bytes(), &input[..]);
        assert!(!parser.has_pending());
    }

    #[test]
    fn test_flush_releases_pending() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();

        assert!(parser.feed(b"\x1b[3", &mut style).is_empty());
        let events = parser.flush(&style);
        assert_eq!(events, vec![text("\x1b[3", StyleState::default())]);
        assert!(parser.flush(&style).is_empty());
    }

    #[test]
    fn test_split_utf8_character() {
        let mut parser = AnsiParser::new();
        let mut style = StyleState::new();

        let first = parser.feed(b"caf\xc3", &mut style);
        let second = parser.feed(b"\xa9!", &mut style);
        assert_eq!(first, vec![text("caf", StyleState::default())]);
        assert_eq!(second, vec![text("é!", StyleState::default())]);
    }

    #[test]
    fn test_latin1_decoding() {
        let mut parser = AnsiParser::with_options(ParserOptions {
            encoding: Encoding::Latin1,
            ..ParserOptions::default()
        });
        let mut style = StyleState::new();

        let events = parser.feed(b"caf\xe9", &mut style);
        assert_eq!(events, vec![text("café", StyleState::default())]);
    }
}
