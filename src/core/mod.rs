//! Core shell session components.
//!
//! - **pty**: POSIX pseudo-terminal wrapper (openpty/fork/exec) and the
//!   `PtyIo` transport trait
//! - **term**: ANSI SGR stream parser, style state and text encoding
//! - **session**: controller combining PTY + parser + display sink
//!
//! # Architecture
//!
//! ```text
//! SessionController
//! ├── PtyIo (PtySession: byte I/O with the shell process)
//! ├── AnsiParser (bytes -> styled spans / clear events)
//! ├── StyleState (carried across reads)
//! └── DisplaySink (append span / clear all)
//! ```

pub mod pty;
pub mod session;
pub mod term;
