//! shellpane - an embeddable shell session
//!
//! Runs a shell inside a pseudo terminal, relays submitted lines to it, and
//! turns its output, including ANSI SGR color/weight codes, into styled
//! text spans for a display sink.
//!
//! ```no_run
//! # #[cfg(unix)]
//! # fn main() -> Result<(), shellpane::core::pty::PtyError> {
//! use shellpane::core::pty::PtySession;
//! use shellpane::core::session::SessionController;
//! use shellpane::core::term::ParserOptions;
//! use shellpane::ui::ConsoleSink;
//!
//! let pty = PtySession::open("/bin/sh", "xterm-256color")?;
//! let mut session = SessionController::new(pty, ConsoleSink::stdout(), ParserOptions::default());
//! session.submit_line("ls --color=always")?;
//! while session.is_running() {
//!     session.handle_output_ready()?;
//! }
//! # Ok(())
//! # }
//! # #[cfg(not(unix))]
//! # fn main() {}
//! ```

pub mod config;
pub mod core;
pub mod ui;
