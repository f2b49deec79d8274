//! Spawn engine.
//!
//! `execute` forks one child per command and wires them stdout to stdin.
//! All children share the stderr pipe and the termination pipe; each child
//! additionally gets a private close-on-exec error pipe over which anything
//! that goes wrong between `fork` and a successful `exec` is reported as
//! errno text. A successful `exec` closes that pipe, so the parent learns
//! the fate of every child before `execute` returns.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{self, fork, pipe2, ForkResult};
use tracing::{debug, warn};

use crate::error::{retry_eintr, PipelineError};
use crate::outcome::{ExitException, State};
use crate::pipeline::{
    Pipeline, PIPE_BUFFER_SIZE, PIPE_COUNT, STDERR_SLOT, STDOUT_SLOT, TERM_SLOT,
};
use crate::signals;
use crate::time::Timestamp;

/// Write ends destined for the children, owned here until the spawn
/// completes so that every failure path releases them by drop.
struct ChildPipes {
    /// Stdin for the child being created; `None` for the first child, which
    /// inherits the parent's stdin.
    stdin: Option<OwnedFd>,
    /// Stdout write end for the child being created.
    stdout: Option<OwnedFd>,
    /// Stderr write end shared by every child.
    stderr: OwnedFd,
    /// Termination-pipe write end shared by every child. Children keep it
    /// open across `exec` and never write to it; once the last child exits
    /// the parent sees EOF.
    term: OwnedFd,
}

impl Pipeline {
    /// Forks and execs the configured commands.
    ///
    /// On success the state becomes [`State::Executing`] and the parent
    /// holds exactly three pipe read ends: the last child's stdout, the
    /// shared stderr, and the termination pipe. On failure any children
    /// already forked are killed, every descriptor is closed, and the state
    /// becomes [`State::Error`] with [`error_string`](Self::error_string)
    /// describing the first failure. Calling while already executing is a
    /// no-op.
    ///
    /// The `SIGCHLD` disposition is process-wide state saved here and
    /// restored at cleanup; running two pipelines concurrently in one
    /// process is not supported.
    pub fn execute(&mut self) {
        if self.state == State::Executing {
            return;
        }
        if let Err(err) = self.try_execute() {
            self.fail_execute(err);
        }
    }

    fn try_execute(&mut self) -> Result<(), PipelineError> {
        self.initialize()?;

        // waitpid in the reaper needs SIGCHLD free of host-program handlers.
        self.saved_sigchld = signals::neutralize_sigchld().ok();

        let (stderr_read, stderr_write) = pipe2(OFlag::O_CLOEXEC)?;
        let (term_read, term_write) = pipe2(OFlag::O_CLOEXEC)?;
        self.pipes[STDERR_SLOT] = Some(stderr_read);
        self.pipes[TERM_SLOT] = Some(term_read);

        let mut child_pipes = ChildPipes {
            stdin: None,
            stdout: None,
            stderr: stderr_write,
            term: term_write,
        };

        // The timeout period starts now; the deadline itself is resolved on
        // the first drain.
        self.start_time = Timestamp::now();
        self.deadline = None;

        // `cursor` carries the read end of the pipe between consecutive
        // children; after the loop it is the last child's stdout.
        let mut cursor: Option<OwnedFd> = None;
        for index in 0..self.commands.len() {
            self.create_child(index, &mut child_pipes, &mut cursor)?;
        }
        self.pipes[STDOUT_SLOT] = cursor;

        // Children hold their own copies of the shared write ends.
        drop(child_pipes);

        self.pipes_left = PIPE_COUNT;
        self.state = State::Executing;
        debug!(commands = self.commands.len(), "pipeline started");
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), PipelineError> {
        if self.commands.is_empty() {
            return Err(PipelineError::NoCommand);
        }
        self.pipes = [None, None, None];
        self.ready = [false; PIPE_COUNT];
        self.pipes_left = 0;
        self.state = State::Starting;
        self.exit_exception = ExitException::None;
        self.exit_code = 1;
        self.exit_value = 1;
        self.killed = false;
        self.timeout_expired = false;
        self.poll_failed = false;
        self.error_message.clear();
        self.children = vec![None; self.commands.len()];
        self.command_statuses.clear();
        self.deadline = None;
        Ok(())
    }

    /// Tears down a partially constructed pipeline. Children that were
    /// already forked are killed, not reaped.
    fn fail_execute(&mut self, err: PipelineError) {
        for pid in self.children.iter().flatten() {
            let _ = kill(*pid, Signal::SIGKILL);
        }
        self.cleanup();
        self.error_message = err.to_string();
        self.state = State::Error;
        warn!(error = %self.error_message, "pipeline failed to start");
    }

    /// Creates child `index`: stdin from the previous child's stdout, a
    /// fresh stdout pipe whose read end becomes the new `cursor`, the
    /// shared stderr and termination pipes, and the per-child error pipe.
    fn create_child(
        &mut self,
        index: usize,
        child_pipes: &mut ChildPipes,
        cursor: &mut Option<OwnedFd>,
    ) -> Result<(), PipelineError> {
        // The first child inherits the parent's stdin; later children read
        // the previous child's stdout.
        child_pipes.stdin = if index > 0 { cursor.take() } else { None };

        let (stdout_read, stdout_write) = pipe2(OFlag::O_CLOEXEC)?;
        *cursor = Some(stdout_read);
        child_pipes.stdout = Some(stdout_write);

        let (error_read, error_write) = pipe2(OFlag::O_CLOEXEC)?;

        // exec arguments are prepared before the fork; the child side must
        // not allocate.
        let argv: Vec<CString> = self.commands[index]
            .iter()
            .map(|arg| CString::new(arg.as_str()).map_err(|_| PipelineError::EmbeddedNul))
            .collect::<Result<_, _>>()?;
        let workdir = self
            .working_directory
            .as_ref()
            .map(|dir| {
                CString::new(dir.as_os_str().as_bytes()).map_err(|_| PipelineError::EmbeddedNul)
            })
            .transpose()?;

        match unsafe { fork() } {
            Ok(ForkResult::Child) => exec_child(
                child_pipes,
                error_read.as_raw_fd(),
                &error_write,
                &argv,
                workdir.as_ref(),
            ),
            Ok(ForkResult::Parent { child }) => {
                self.children[index] = Some(child);
                drop(error_write);

                // A successful exec closes the error pipe and yields EOF;
                // any bytes mean the child died before its program started.
                let message = read_error_pipe(&error_read);
                drop(error_read);
                if !message.is_empty() {
                    return Err(PipelineError::ChildSetup(message));
                }

                // The parent keeps neither the previous stdin nor this
                // child's stdout write end.
                child_pipes.stdin = None;
                child_pipes.stdout = None;
                Ok(())
            }
            Err(errno) => Err(PipelineError::Os(errno)),
        }
    }
}

/// Child side of the fork. Never returns: either `exec` replaces the
/// process image or the errno text goes out over the error pipe and the
/// child exits with status 1. Only async-signal-safe calls happen here;
/// all allocation was done before the fork.
fn exec_child(
    child_pipes: &ChildPipes,
    error_read: RawFd,
    error_write: &OwnedFd,
    argv: &[CString],
    workdir: Option<&CString>,
) -> ! {
    let _ = unistd::close(error_read);

    if let Some(stdin) = &child_pipes.stdin {
        let _ = unistd::dup2(stdin.as_raw_fd(), 0);
    }
    if let Some(stdout) = &child_pipes.stdout {
        let _ = unistd::dup2(stdout.as_raw_fd(), 1);
    }
    let _ = unistd::dup2(child_pipes.stderr.as_raw_fd(), 2);

    // Descriptors 0..=2 and the termination pipe must survive exec; every
    // other pipe end stays close-on-exec. Descriptor 0 is included even for
    // the first child, where it was inherited rather than duplicated.
    for fd in [0, 1, 2, child_pipes.term.as_raw_fd()] {
        let _ = fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()));
    }

    signals::restore_default_handlers();

    if let Some(dir) = workdir {
        if let Err(errno) = retry_eintr(|| unistd::chdir(dir.as_c_str())) {
            child_error_exit(errno, error_write);
        }
    }

    match unistd::execvp(&argv[0], argv) {
        Ok(never) => match never {},
        Err(errno) => child_error_exit(errno, error_write),
    }
}

/// Reports errno text to the parent over the error pipe and terminates the
/// child without cleanup.
fn child_error_exit(errno: Errno, error_pipe: &OwnedFd) -> ! {
    let _ = unistd::write(error_pipe, errno.desc().as_bytes());
    unsafe { libc::_exit(1) }
}

/// Reads the exec-error pipe to EOF, capped at the scratch-buffer size.
/// Read failures end the message like EOF does.
fn read_error_pipe(fd: &OwnedFd) -> String {
    let mut buf = [0u8; PIPE_BUFFER_SIZE];
    let mut total = 0;
    while total < PIPE_BUFFER_SIZE {
        match retry_eintr(|| unistd::read(fd.as_raw_fd(), &mut buf[total..])) {
            Ok(0) | Err(_) => break,
            Ok(n) => total += n,
        }
    }
    String::from_utf8_lossy(&buf[..total]).into_owned()
}
