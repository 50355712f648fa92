//! POSIX pseudo-terminal wrapper
//!
//! This module provides a safe wrapper around `posix_openpt(3)` / `fork(2)` /
//! `execve(2)` (through `nix`) for running a shell attached to a pseudo
//! terminal, and the [`PtyIo`] trait the session controller talks to.

use std::fmt;
use std::io;

use thiserror::Error;

/// Default upper bound for a single read from the master side
pub const READ_CHUNK_SIZE: usize = 4096;

/// Largest accepted read chunk
pub const MAX_READ_CHUNK_SIZE: usize = 65536;

/// Setup step performed in the child between `fork` and `exec`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStep {
    /// Locating the shell executable (done before forking)
    Lookup,
    /// `setsid`
    NewSession,
    /// Making the slave the controlling terminal
    ControllingTerminal,
    /// Duplicating the slave onto stdin/stdout/stderr
    Redirect,
    /// Replacing the process image
    Exec,
}

impl ChildStep {
    fn code(self) -> i32 {
        match self {
            ChildStep::Lookup => 0,
            ChildStep::NewSession => 1,
            ChildStep::ControllingTerminal => 2,
            ChildStep::Redirect => 3,
            ChildStep::Exec => 4,
        }
    }

    fn from_code(code: i32) -> Self {
        match code {
            1 => ChildStep::NewSession,
            2 => ChildStep::ControllingTerminal,
            3 => ChildStep::Redirect,
            4 => ChildStep::Exec,
            _ => ChildStep::Lookup,
        }
    }
}

impl fmt::Display for ChildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChildStep::Lookup => "lookup",
            ChildStep::NewSession => "setsid",
            ChildStep::ControllingTerminal => "controlling terminal",
            ChildStep::Redirect => "redirect stdio",
            ChildStep::Exec => "exec",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to allocate pseudo terminal: {0}")]
    Allocation(#[source] io::Error),

    #[error("Failed to fork: {0}")]
    Fork(#[source] io::Error),

    #[error("Failed to start shell ({step}): {source}")]
    Exec {
        step: ChildStep,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read from PTY: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to write to PTY: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to resize PTY: {0}")]
    Resize(#[source] io::Error),

    #[error("PTY is closed")]
    Closed,
}

impl PtyError {
    /// Startup errors mean the session never ran
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PtyError::Allocation(_) | PtyError::Fork(_) | PtyError::Exec { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PtyError>;

/// Outcome of a single read from the master side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyRead {
    /// Bytes produced by the shell
    Data(Vec<u8>),
    /// Nothing available right now
    WouldBlock,
    /// The child closed its side of the terminal
    Eof,
}

/// Byte transport to a shell attached to a pseudo terminal
pub trait PtyIo {
    /// Read whatever is available, up to one chunk
    fn read_output(&mut self) -> Result<PtyRead>;

    /// Write all of `data` to the shell's input
    fn write_input(&mut self, data: &[u8]) -> Result<()>;

    /// Release the master side. Calling it again does nothing.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

#[cfg(unix)]
pub use self::unix::PtySession;

#[cfg(unix)]
mod unix {
    use std::env;
    use std::ffi::{CStr, CString, OsStr};
    use std::fs::{File, OpenOptions};
    use std::io::{self, Read, Write};
    use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    use std::os::unix::process::ExitStatusExt;
    use std::path::{Path, PathBuf};
    use std::process::ExitStatus;
    use std::thread;
    use std::time::{Duration, Instant};

    use nix::errno::Errno;
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    use nix::libc;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use nix::pty::{grantpt, posix_openpt, unlockpt, PtyMaster, Winsize};
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    use nix::unistd::{self, ForkResult, Pid};
    use tracing::{debug, info, warn};

    use super::{ChildStep, PtyError, PtyIo, PtyRead, Result, MAX_READ_CHUNK_SIZE, READ_CHUNK_SIZE};

    /// How long a write waits for the shell to drain its input queue
    const WRITE_TIMEOUT_MS: u16 = 2000;

    /// How long `Drop` waits for the shell before handing it to a reaper thread
    const DROP_REAP_TIMEOUT: Duration = Duration::from_millis(100);

    const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

    #[cfg(target_os = "linux")]
    const MASTER_CLOEXEC: OFlag = OFlag::O_CLOEXEC;
    #[cfg(not(target_os = "linux"))]
    const MASTER_CLOEXEC: OFlag = OFlag::empty();

    nix::ioctl_write_ptr_bad!(set_window_size, libc::TIOCSWINSZ, Winsize);
    nix::ioctl_write_int_bad!(set_controlling_terminal, libc::TIOCSCTTY);

    /// A shell running on the slave side of a pseudo terminal
    pub struct PtySession {
        /// Master side, `None` once closed
        master: Option<File>,
        pid: Pid,
        /// Cleared on EOF or once the child has been reaped
        alive: bool,
        /// Set once `waitpid` has collected the child (or reported it gone)
        reaped: bool,
        exit_status: Option<ExitStatus>,
        chunk_size: usize,
    }

    impl PtySession {
        /// Spawn `shell` with `TERM` set to `term`, 80x24
        pub fn open(shell: &str, term: &str) -> Result<Self> {
            Self::open_sized(shell, term, 80, 24)
        }

        /// Spawn `shell` on a terminal of the given size
        pub fn open_sized(shell: &str, term: &str, cols: u16, rows: u16) -> Result<Self> {
            // Everything the child needs is allocated before forking
            let lookup_err = |source| PtyError::Exec {
                step: ChildStep::Lookup,
                source,
            };
            let program = resolve_program(shell).map_err(lookup_err)?;
            let program_c = to_cstring(program.as_os_str()).map_err(lookup_err)?;
            let argv0 = to_cstring(program.file_name().unwrap_or(program.as_os_str()))
                .map_err(lookup_err)?;
            let argv = [argv0];
            let environment = child_environment(term);

            // Every descriptor is close-on-exec from creation, so a concurrent
            // spawn on another thread cannot inherit them
            let (master, slave) = open_pair(cols, rows).map_err(PtyError::Allocation)?;
            let (status_read, status_write) =
                status_pipe().map_err(|e| PtyError::Allocation(e.into()))?;

            let pid = match unsafe { unistd::fork() } {
                Ok(ForkResult::Child) => {
                    exec_child(&slave, &status_write, &program_c, &argv, &environment)
                }
                Ok(ForkResult::Parent { child }) => child,
                Err(e) => return Err(PtyError::Fork(e.into())),
            };

            // The slave belongs to the child's terminal now
            drop(slave);
            drop(status_write);

            if let Some((step, errno)) = read_child_status(status_read) {
                reap_blocking(pid);
                return Err(PtyError::Exec {
                    step,
                    source: io::Error::from_raw_os_error(errno),
                });
            }

            set_nonblocking(&master).map_err(|e| PtyError::Allocation(e.into()))?;

            info!(
                "Spawned {} (pid {}) on a {}x{} PTY",
                program.display(),
                pid,
                cols,
                rows
            );

            Ok(Self {
                master: Some(File::from(master)),
                pid,
                alive: true,
                reaped: false,
                exit_status: None,
                chunk_size: READ_CHUNK_SIZE,
            })
        }

        /// Set the largest number of bytes returned by one read
        pub fn set_chunk_size(&mut self, size: usize) {
            self.chunk_size = size.clamp(1, MAX_READ_CHUNK_SIZE);
        }

        pub fn chunk_size(&self) -> usize {
            self.chunk_size
        }

        pub fn pid(&self) -> u32 {
            self.pid.as_raw() as u32
        }

        pub fn raw_fd(&self) -> Option<RawFd> {
            self.master.as_ref().map(|file| file.as_raw_fd())
        }

        /// Master descriptor, for readiness polling
        pub fn master_fd(&self) -> Option<BorrowedFd<'_>> {
            self.master.as_ref().map(|file| file.as_fd())
        }

        /// Inform the kernel (and thus the child) that the terminal size changed
        pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
            let fd = self.raw_fd().ok_or(PtyError::Closed)?;
            unsafe { set_window_size(fd, &winsize(cols, rows)) }
                .map_err(|e| PtyError::Resize(e.into()))?;
            Ok(())
        }

        /// Check if the shell is still running, without blocking
        pub fn is_alive(&mut self) -> bool {
            self.alive && self.try_wait().is_none()
        }

        /// Reap the child if it has exited
        pub fn try_wait(&mut self) -> Option<ExitStatus> {
            if !self.reaped {
                self.reap(Some(WaitPidFlag::WNOHANG));
            }
            self.exit_status
        }

        /// Block until the child exits
        pub fn wait(&mut self) -> Option<ExitStatus> {
            if !self.reaped {
                self.reap(None);
            }
            self.exit_status
        }

        /// Wait up to `timeout` for the child to exit
        pub fn wait_timeout(&mut self, timeout: Duration) -> Option<ExitStatus> {
            let deadline = Instant::now() + timeout;
            loop {
                if let Some(status) = self.try_wait() {
                    return Some(status);
                }
                if self.reaped || Instant::now() >= deadline {
                    return None;
                }
                thread::sleep(REAP_POLL_INTERVAL);
            }
        }

        fn reap(&mut self, flags: Option<WaitPidFlag>) {
            loop {
                match waitpid(self.pid, flags) {
                    Ok(WaitStatus::StillAlive) => return,
                    Ok(status) => {
                        if let Some(exit) = exit_status(status) {
                            info!("Shell (pid {}) exited: {}", self.pid, exit);
                            self.exit_status = Some(exit);
                            self.alive = false;
                            self.reaped = true;
                        }
                        return;
                    }
                    Err(Errno::EINTR) => continue,
                    Err(e) => {
                        // ECHILD: already reaped elsewhere
                        debug!("waitpid({}) failed: {}", self.pid, e);
                        self.alive = false;
                        self.reaped = true;
                        return;
                    }
                }
            }
        }
    }

    impl PtyIo for PtySession {
        fn read_output(&mut self) -> Result<PtyRead> {
            let chunk_size = self.chunk_size;
            let master = self.master.as_mut().ok_or(PtyError::Closed)?;
            let mut buffer = vec![0u8; chunk_size];

            loop {
                match master.read(&mut buffer) {
                    Ok(0) => {
                        self.alive = false;
                        return Ok(PtyRead::Eof);
                    }
                    Ok(n) => {
                        buffer.truncate(n);
                        return Ok(PtyRead::Data(buffer));
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        return Ok(PtyRead::WouldBlock)
                    }
                    // Linux reports EIO on the master once the slave is gone
                    Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => {
                        self.alive = false;
                        return Ok(PtyRead::Eof);
                    }
                    Err(e) => return Err(PtyError::Read(e)),
                }
            }
        }

        fn write_input(&mut self, data: &[u8]) -> Result<()> {
            let master = self.master.as_mut().ok_or(PtyError::Closed)?;
            let mut remaining = data;

            while !remaining.is_empty() {
                match master.write(remaining) {
                    Ok(0) => return Err(PtyError::Write(io::ErrorKind::WriteZero.into())),
                    Ok(n) => remaining = &remaining[n..],
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        wait_writable(&*master).map_err(PtyError::Write)?;
                    }
                    Err(e) => return Err(PtyError::Write(e)),
                }
            }
            Ok(())
        }

        fn close(&mut self) {
            if let Some(master) = self.master.take() {
                drop(master);
                debug!("Closed PTY master for pid {}", self.pid);
                // The shell usually exits on hangup; collect it if it already has
                self.try_wait();
            }
        }

        fn is_closed(&self) -> bool {
            self.master.is_none()
        }
    }

    impl Drop for PtySession {
        fn drop(&mut self) {
            self.close();
            if self.wait_timeout(DROP_REAP_TIMEOUT).is_some() || self.reaped {
                return;
            }

            // Still running after hangup; something has to collect it later
            let pid = self.pid;
            debug!("Shell (pid {}) outlived its PTY, reaping in background", pid);
            let spawned = thread::Builder::new()
                .name(format!("reap-{}", pid))
                .spawn(move || reap_blocking(pid));
            if let Err(e) = spawned {
                warn!("Failed to start reaper for pid {}: {}", pid, e);
            }
        }
    }

    fn winsize(cols: u16, rows: u16) -> Winsize {
        Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        }
    }

    fn exit_status(status: WaitStatus) -> Option<ExitStatus> {
        match status {
            WaitStatus::Exited(_, code) => Some(ExitStatus::from_raw((code & 0xff) << 8)),
            WaitStatus::Signaled(_, signal, core_dumped) => {
                let core = if core_dumped { 0x80 } else { 0 };
                Some(ExitStatus::from_raw(signal as i32 | core))
            }
            _ => None,
        }
    }

    fn open_pair(cols: u16, rows: u16) -> io::Result<(OwnedFd, OwnedFd)> {
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | MASTER_CLOEXEC)?;
        grantpt(&master)?;
        unlockpt(&master)?;
        let slave_path = slave_name(&master)?;

        let master = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };
        #[cfg(not(target_os = "linux"))]
        set_cloexec(&master)?;

        // std opens with O_CLOEXEC
        let slave = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&slave_path)?;

        unsafe { set_window_size(master.as_raw_fd(), &winsize(cols, rows)) }?;
        Ok((master, OwnedFd::from(slave)))
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn slave_name(master: &PtyMaster) -> nix::Result<String> {
        nix::pty::ptsname_r(master)
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn slave_name(master: &PtyMaster) -> nix::Result<String> {
        use std::sync::Mutex;

        // ptsname returns a static buffer
        static PTSNAME: Mutex<()> = Mutex::new(());
        let _guard = PTSNAME.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        unsafe { nix::pty::ptsname(master) }
    }

    /// Pipe the child reports setup failures on. Both ends are close-on-exec,
    /// so a successful exec shows up as EOF in the parent.
    #[cfg(not(any(target_os = "macos", target_os = "ios")))]
    fn status_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
        unistd::pipe2(OFlag::O_CLOEXEC)
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    fn status_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
        let (read, write) = unistd::pipe()?;
        set_cloexec(&read)?;
        set_cloexec(&write)?;
        Ok((read, write))
    }

    #[cfg(not(target_os = "linux"))]
    fn set_cloexec(fd: &OwnedFd) -> nix::Result<()> {
        use nix::fcntl::FdFlag;

        fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        Ok(())
    }

    fn set_nonblocking(fd: &OwnedFd) -> nix::Result<()> {
        let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
        fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
        Ok(())
    }

    fn wait_writable(master: &File) -> io::Result<()> {
        let mut fds = [PollFd::new(master.as_fd(), PollFlags::POLLOUT)];
        loop {
            match poll(&mut fds, PollTimeout::from(WRITE_TIMEOUT_MS)) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "shell is not reading its input",
                    ))
                }
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Runs in the forked child. Never returns.
    ///
    /// The master, the slave and the status pipe are all close-on-exec, so
    /// after `exec` the shell holds only stdin/stdout/stderr.
    fn exec_child(
        slave: &OwnedFd,
        status: &OwnedFd,
        program: &CStr,
        argv: &[CString],
        envp: &[CString],
    ) -> ! {
        if let Err(errno) = unistd::setsid() {
            child_fail(status, ChildStep::NewSession, errno);
        }
        if let Err(errno) = unsafe { set_controlling_terminal(slave.as_raw_fd(), 0) } {
            child_fail(status, ChildStep::ControllingTerminal, errno);
        }
        let redirected = unistd::dup2_stdin(slave)
            .and_then(|()| unistd::dup2_stdout(slave))
            .and_then(|()| unistd::dup2_stderr(slave));
        if let Err(errno) = redirected {
            child_fail(status, ChildStep::Redirect, errno);
        }

        match unistd::execve(program, argv, envp) {
            Ok(never) => match never {},
            Err(errno) => child_fail(status, ChildStep::Exec, errno),
        }
    }

    fn child_fail(status: &OwnedFd, step: ChildStep, errno: Errno) -> ! {
        let mut report = [0u8; 8];
        report[..4].copy_from_slice(&step.code().to_ne_bytes());
        report[4..].copy_from_slice(&(errno as i32).to_ne_bytes());
        let _ = unistd::write(status, &report);
        unsafe { libc::_exit(127) }
    }

    /// `None` when the exec went through
    fn read_child_status(status: OwnedFd) -> Option<(ChildStep, i32)> {
        let mut report = Vec::with_capacity(8);
        if let Err(e) = File::from(status).read_to_end(&mut report) {
            warn!("Could not read child status: {}", e);
            return None;
        }
        if report.len() < 8 {
            return None;
        }
        let step = i32::from_ne_bytes([report[0], report[1], report[2], report[3]]);
        let errno = i32::from_ne_bytes([report[4], report[5], report[6], report[7]]);
        Some((ChildStep::from_code(step), errno))
    }

    fn reap_blocking(pid: Pid) {
        loop {
            match waitpid(pid, None) {
                Err(Errno::EINTR) => continue,
                Ok(status) => debug!("Reaped pid {}: {:?}", pid, status),
                Err(e) => debug!("waitpid({}) failed: {}", pid, e),
            }
            return;
        }
    }

    /// Inherited environment with `TERM` replaced
    fn child_environment(term: &str) -> Vec<CString> {
        env::vars_os()
            .filter(|(key, _)| key != "TERM")
            .filter_map(|(key, value)| {
                let mut entry = key.as_bytes().to_vec();
                entry.push(b'=');
                entry.extend_from_slice(value.as_bytes());
                CString::new(entry).ok()
            })
            .chain(CString::new(format!("TERM={}", term)).ok())
            .collect()
    }

    fn to_cstring(value: &OsStr) -> io::Result<CString> {
        CString::new(value.as_bytes()).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    /// Find `shell` on `PATH` unless it already names a path
    pub(super) fn resolve_program(shell: &str) -> io::Result<PathBuf> {
        if shell.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty shell command"));
        }
        if shell.contains('/') {
            return Ok(PathBuf::from(shell));
        }

        let path = env::var_os("PATH").unwrap_or_default();
        env::split_paths(&path)
            .map(|dir| dir.join(shell))
            .find(|candidate| is_executable(candidate))
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("{} not found in PATH", shell))
            })
    }

    fn is_executable(path: &Path) -> bool {
        path.metadata()
            .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
}
