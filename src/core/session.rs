//! Session management
//!
//! Wires a PTY to the ANSI parser and a display sink: shell output is parsed
//! into styled spans for the sink, submitted lines are written to the shell.

use tracing::{debug, error, info, warn};

use super::pty::{PtyError, PtyIo, PtyRead, Result};
use super::term::{AnsiParser, Encoding, ParseEvent, ParserOptions, StyleState};

/// Default VEOF character
const EOT: u8 = 0x04;

/// Where parsed output goes
pub trait DisplaySink {
    /// Append text rendered with `style`
    fn append_span(&mut self, text: &str, style: &StyleState);
    /// Remove all text shown so far
    fn clear_all(&mut self);
}

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// PTY alive, output reads scheduled
    Running,
    /// Terminal state, no further I/O
    Closed,
}

/// A running shell session bound to a display sink
pub struct SessionController<P: PtyIo, S: DisplaySink> {
    pty: P,
    sink: S,
    parser: AnsiParser,
    /// Carried across reads
    style: StyleState,
    state: SessionState,
    /// Failed reads since the last successful one
    read_errors: u32,
}

impl<P: PtyIo, S: DisplaySink> SessionController<P, S> {
    /// Create a controller in the running state
    pub fn new(pty: P, sink: S, options: ParserOptions) -> Self {
        Self {
            pty,
            sink,
            parser: AnsiParser::with_options(options),
            style: StyleState::default(),
            state: SessionState::Running,
            read_errors: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if session is running
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    /// Style that will apply to the next text from the shell
    pub fn style(&self) -> &StyleState {
        &self.style
    }

    pub fn encoding(&self) -> Encoding {
        self.parser.options().encoding
    }

    pub fn pty(&self) -> &P {
        &self.pty
    }

    pub fn pty_mut(&mut self) -> &mut P {
        &mut self.pty
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Consecutive failed reads; zero after any successful read
    pub fn consecutive_read_errors(&self) -> u32 {
        self.read_errors
    }

    /// Called when the PTY has output available.
    ///
    /// Read errors are returned and the session keeps running; EOF closes it.
    pub fn handle_output_ready(&mut self) -> Result<SessionState> {
        if self.state == SessionState::Closed {
            return Ok(SessionState::Closed);
        }

        let read = self.pty.read_output();
        if read.is_ok() {
            self.read_errors = 0;
        }

        match read {
            Ok(PtyRead::Data(bytes)) => {
                let events = self.parser.feed(&bytes, &mut self.style);
                self.dispatch(events);
            }
            Ok(PtyRead::WouldBlock) => {}
            Ok(PtyRead::Eof) => {
                info!("Shell closed its terminal");
                self.finish();
            }
            Err(PtyError::Closed) => {
                warn!("PTY closed underneath the session");
                self.finish();
            }
            Err(e) => {
                self.read_errors += 1;
                // Only the first of a run of failures is logged as an error
                if self.read_errors == 1 {
                    error!("{}", e);
                } else {
                    debug!("{} ({} in a row)", e, self.read_errors);
                }
                return Err(e);
            }
        }

        Ok(self.state)
    }

    /// Send a submitted line to the shell, terminated with a newline
    pub fn submit_line(&mut self, line: &str) -> Result<()> {
        if self.state == SessionState::Closed {
            debug!("Dropping input for closed session: {:?}", line);
            return Err(PtyError::Closed);
        }

        let mut data = self.encoding().encode(line);
        data.push(b'\n');

        self.pty.write_input(&data).map_err(|e| {
            error!("{}", e);
            e
        })
    }

    /// Send the terminal's end-of-file character (Ctrl-D), so the shell
    /// sees its input end the way an interactive user would end it
    pub fn send_eof(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(PtyError::Closed);
        }
        self.pty.write_input(&[EOT])
    }

    /// Stop the session. Calling it again does nothing.
    pub fn shutdown(&mut self) {
        if self.state == SessionState::Running {
            info!("Session shut down");
            self.finish();
        }
    }

    /// Move to `Closed`: release held bytes to the sink, close the PTY
    fn finish(&mut self) {
        let events = self.parser.flush(&self.style);
        self.dispatch(events);
        self.pty.close();
        self.state = SessionState::Closed;
    }

    fn dispatch(&mut self, events: Vec<ParseEvent>) {
        for event in events {
            match event {
                ParseEvent::Text { text, style } => self.sink.append_span(&text, &style),
                ParseEvent::Clear => self.sink.clear_all(),
            }
        }
    }
}
