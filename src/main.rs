//! shellpane - a shell in a pseudo terminal with styled output
//!
//! Lines typed on standard input are sent to the shell; the shell's output
//! is rendered with its SGR colors and weight. Only SGR codes and the
//! clear-screen sequence are interpreted, everything else is shown as text.
//!
//! # Quick Start
//!
//! ```text
//! shellpane                  # $SHELL, or /bin/sh
//! shellpane -s /bin/bash     # Specific shell
//! shellpane --latin1         # 8-bit output encoding
//! ```

use std::env;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use shellpane::config::Config;
use shellpane::core::term::Encoding;

/// Environment variable holding a log filter
const LOG_ENV: &str = "SHELLPANE_LOG";

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line overrides
#[derive(Debug, Default)]
struct CliOptions {
    shell: Option<String>,
    term: Option<String>,
    encoding: Option<Encoding>,
    hold_partial_sequences: Option<bool>,
}

fn print_version() {
    eprintln!("shellpane {}", VERSION);
}

fn print_help() {
    eprintln!("shellpane {} - a shell in a pseudo terminal with styled output", VERSION);
    eprintln!();
    eprintln!("Usage: shellpane [OPTIONS]");
    eprintln!();
    eprintln!("Shell options:");
    eprintln!("  (default)             From config.toml, then $SHELL, then /bin/sh");
    eprintln!("  -s, --shell <PATH>    Shell to run");
    eprintln!("  -t, --term <VALUE>    TERM value for the shell (default: xterm-256color)");
    eprintln!();
    eprintln!("Encoding options:");
    eprintln!("  (default)             From the locale (LC_ALL, LC_CTYPE, LANG)");
    eprintln!("  --utf8                UTF-8");
    eprintln!("  --latin1              Latin-1 (ISO-8859-1)");
    eprintln!();
    eprintln!("Other options:");
    eprintln!("  --no-hold             Do not hold escape sequences split across reads");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Configuration: ~/.shellpane/config.toml");
    eprintln!("Log file:      ~/.shellpane/shellpane.log ({} sets the filter)", LOG_ENV);
    eprintln!();
    eprintln!("Exit: type 'exit' in the shell, or end input with Ctrl+D");
}

fn parse_args() -> Result<CliOptions, String> {
    let args: Vec<String> = env::args().collect();
    let mut options = CliOptions::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-s" | "--shell" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing shell argument".to_string());
                }
                options.shell = Some(args[i].clone());
            }
            "-t" | "--term" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing TERM argument".to_string());
                }
                options.term = Some(args[i].clone());
            }
            "-u" | "--utf8" => {
                options.encoding = Some(Encoding::Utf8);
            }
            "--latin1" => {
                options.encoding = Some(Encoding::Latin1);
            }
            "--no-hold" => {
                options.hold_partial_sequences = Some(false);
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(options)
}

/// Install a file logger; stdout belongs to the shell's output
fn init_logging(config: &Config) {
    let log_path = Config::config_dir()
        .map(|dir| dir.join("shellpane.log"))
        .unwrap_or_else(|| PathBuf::from("shellpane.log"));

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_new(&config.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

fn main() -> anyhow::Result<()> {
    let cli = match parse_args() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    // Load config before logging so the log level can come from it; report
    // a bad file once the logger is up
    let loaded = Config::load();
    let mut config = loaded.as_ref().cloned().unwrap_or_default();
    init_logging(&config);
    if let Err(e) = &loaded {
        warn!("{}; using defaults", e);
        eprintln!("Warning: {}", e);
    }

    info!("shellpane {} starting...", VERSION);

    // Merge config: command line args override config file
    if cli.shell.is_some() {
        config.shell = cli.shell;
    }
    if let Some(term) = cli.term {
        config.term = term;
    }
    if let Some(encoding) = cli.encoding {
        config.encoding = encoding.name().to_string();
    }
    if let Some(hold) = cli.hold_partial_sequences {
        config.hold_partial_sequences = hold;
    }

    #[cfg(not(unix))]
    {
        error!("Unsupported platform");
        eprintln!("shellpane currently only supports POSIX systems.");
        std::process::exit(1);
    }

    #[cfg(unix)]
    {
        if let Err(e) = run::run_terminal(&config) {
            error!("{:#}", e);
            return Err(e);
        }
    }

    Ok(())
}

#[cfg(unix)]
mod run {
    use std::io;
    use std::os::fd::AsFd;
    use std::thread;
    use std::time::Duration;

    use anyhow::Context;
    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use tracing::{error, info, warn};

    use shellpane::config::Config;
    use shellpane::core::pty::PtySession;
    use shellpane::core::session::SessionController;
    use shellpane::ui::{forward_input, ConsoleSink, LineReader};

    type Session = SessionController<PtySession, ConsoleSink<io::Stdout>>;

    /// How long to wait for the shell after the session ends
    const EXIT_WAIT: Duration = Duration::from_secs(2);

    /// Give up after this many failed reads in a row
    const MAX_READ_ERRORS: u32 = 100;

    /// Start the shell and run until it exits
    pub fn run_terminal(config: &Config) -> anyhow::Result<()> {
        let shell = config.shell_command();
        let options = config.parser_options();
        let (cols, rows) = ConsoleSink::size();

        info!("Shell: {}", shell);
        info!("TERM: {}", config.term);
        info!("Encoding: {}", options.encoding.name());
        info!("Hold partial sequences: {}", options.hold_partial_sequences);
        info!("Terminal size: {}x{}", cols, rows);

        let mut pty = PtySession::open_sized(&shell, &config.term, cols, rows)
            .with_context(|| format!("Failed to start shell {}", shell))?;
        pty.set_chunk_size(config.chunk_size());

        let mut session = SessionController::new(pty, ConsoleSink::stdout(), options);
        let mut input = LineReader::stdin(options.encoding);

        let result = run_main_loop(&mut session, &mut input);

        session.shutdown();
        let _ = session.sink_mut().cleanup();
        // A shell ignoring hangup is left to the session's drop
        match session.pty_mut().wait_timeout(EXIT_WAIT) {
            Some(status) => info!("Shell exited: {}", status),
            None => warn!("Shell did not exit within {:?}", EXIT_WAIT),
        }

        result
    }

    /// Main event loop: wait for PTY output or an input line
    fn run_main_loop(session: &mut Session, input: &mut LineReader<io::Stdin>) -> anyhow::Result<()> {
        let mut stdin_open = true;

        while session.is_running() {
            let (output_ready, input_ready) = {
                let Some(master) = session.pty().master_fd() else {
                    break;
                };
                let stdin = io::stdin();

                let mut fds = vec![PollFd::new(master, PollFlags::POLLIN)];
                if stdin_open {
                    fds.push(PollFd::new(stdin.as_fd(), PollFlags::POLLIN));
                }

                match poll(&mut fds, PollTimeout::NONE) {
                    Ok(_) => {}
                    Err(Errno::EINTR) => continue,
                    Err(e) => return Err(io::Error::from(e)).context("poll failed"),
                }

                (is_ready(&fds[0]), fds.get(1).is_some_and(is_ready))
            };

            if output_ready && session.handle_output_ready().is_err() {
                // Logged by the controller; back off while the master keeps failing
                let failures = session.consecutive_read_errors();
                if failures >= MAX_READ_ERRORS {
                    error!("Giving up after {} failed reads", failures);
                    anyhow::bail!("PTY read failed {} times in a row", failures);
                }
                thread::sleep(Duration::from_millis(u64::from(failures.min(50)) * 10));
            }

            if input_ready {
                stdin_open = forward_input(session, input.read_available());
            }
        }

        info!("Session ended");
        Ok(())
    }

    fn is_ready(fd: &PollFd<'_>) -> bool {
        let ready = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
        fd.revents().is_some_and(|events| events.intersects(ready))
    }
}
