//! Line input source
//!
//! Turns raw bytes from standard input (or any reader) into submitted lines.

use std::io::{self, Read};

use tracing::{debug, warn};

use crate::core::pty::PtyIo;
use crate::core::session::{DisplaySink, SessionController};
use crate::core::term::Encoding;

/// Read buffer size
const INPUT_BUFFER_SIZE: usize = 8192;

/// Result of reading available input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// Zero or more completed lines, without their terminators
    Lines(Vec<String>),
    /// Input ended; an unterminated final line is still submitted
    Eof(Option<String>),
}

/// Splits input into lines
pub struct LineReader<R: Read> {
    reader: R,
    encoding: Encoding,
    /// Bytes after the last newline
    partial: Vec<u8>,
}

impl LineReader<io::Stdin> {
    pub fn stdin(encoding: Encoding) -> Self {
        Self::new(io::stdin(), encoding)
    }
}

impl<R: Read> LineReader<R> {
    pub fn new(reader: R, encoding: Encoding) -> Self {
        Self {
            reader,
            encoding,
            partial: Vec::new(),
        }
    }

    /// Perform one read; call when the reader is known to be readable
    pub fn read_available(&mut self) -> io::Result<InputEvent> {
        let mut buffer = [0u8; INPUT_BUFFER_SIZE];
        let n = loop {
            match self.reader.read(&mut buffer) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        };

        if n == 0 {
            let rest = std::mem::take(&mut self.partial);
            let trailing = (!rest.is_empty()).then(|| self.decode_line(&rest));
            return Ok(InputEvent::Eof(trailing));
        }

        self.partial.extend_from_slice(&buffer[..n]);

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.partial.drain(..=pos).collect();
            lines.push(self.decode_line(&line[..pos]));
        }
        Ok(InputEvent::Lines(lines))
    }

    fn decode_line(&self, bytes: &[u8]) -> String {
        let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
        self.encoding.decode(bytes)
    }
}

/// Hand the result of one `read_available` to the session.
///
/// Returns `false` once input is over, whether it ended or failed; the shell
/// is then sent EOF so it can finish on its own.
pub fn forward_input<P: PtyIo, S: DisplaySink>(
    session: &mut SessionController<P, S>,
    input: io::Result<InputEvent>,
) -> bool {
    // Write failures are logged by the controller
    match input {
        Ok(InputEvent::Lines(lines)) => {
            for line in lines {
                let _ = session.submit_line(&line);
            }
            true
        }
        Ok(InputEvent::Eof(trailing)) => {
            if let Some(line) = trailing {
                let _ = session.submit_line(&line);
            }
            debug!("Input closed, sending EOF to the shell");
            let _ = session.send_eof();
            false
        }
        Err(e) => {
            warn!("Failed to read input: {}; sending EOF to the shell", e);
            let _ = session.send_eof();
            false
        }
    }
}
