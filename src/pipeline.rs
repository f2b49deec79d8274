//! Pipeline control block.
//!
//! Owns the command list, the read ends of the three output pipes, the
//! timeout bookkeeping, and the outcome projection. The spawn engine,
//! drain loop, and reaper live in their own modules and operate on this
//! structure.

use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};

use nix::sys::signal::SigAction;
use nix::unistd::Pid;

use crate::outcome::{ExitException, Outcome, State};
use crate::time::Timestamp;

/// Number of output pipes the parent drains: stdout, stderr, termination.
pub(crate) const PIPE_COUNT: usize = 3;
/// Slot of the last child's stdout read end.
pub(crate) const STDOUT_SLOT: usize = 0;
/// Slot of the stderr read end shared by all children.
pub(crate) const STDERR_SLOT: usize = 1;
/// Slot of the termination pipe. Children never write to it; its EOF means
/// every child has exited.
pub(crate) const TERM_SLOT: usize = 2;

/// Most bytes handed out per [`Pipeline::wait_for_data`] call.
pub(crate) const PIPE_BUFFER_SIZE: usize = 1024;

/// Requests stdout in a [`Pipeline::wait_for_data`] mask.
pub const PIPE_STDOUT: u8 = 1 << STDOUT_SLOT;
/// Requests stderr in a [`Pipeline::wait_for_data`] mask.
pub const PIPE_STDERR: u8 = 1 << STDERR_SLOT;

/// An ordered chain of child processes connected stdout to stdin, managed
/// as one unit.
///
/// The lifecycle is linear: configure, [`execute`](Self::execute), drain
/// with [`wait_for_data`](Self::wait_for_data), then finish with
/// [`wait_for_exit`](Self::wait_for_exit) or [`kill`](Self::kill). After a
/// terminal state is reached the same pipeline may be executed again with
/// the same or changed configuration.
pub struct Pipeline {
    /// Command vectors in pipeline order; element 0 of each is the program,
    /// located through the `PATH` search of `exec`.
    pub(crate) commands: Vec<Vec<String>>,
    /// Directory each child changes into before `exec`.
    pub(crate) working_directory: Option<PathBuf>,
    /// Wall-clock timeout in seconds; zero means no pipeline timeout.
    pub(crate) timeout: f64,
    /// Moment `execute` forked the children.
    pub(crate) start_time: Timestamp,
    /// `start_time + timeout`, resolved lazily on the first drain. `None`
    /// before resolution and whenever `timeout` is zero.
    pub(crate) deadline: Option<Timestamp>,
    /// One process id per command; `None` marks a slot whose fork never ran.
    pub(crate) children: Vec<Option<Pid>>,
    /// Read ends of the stdout, stderr, and termination pipes; `None` once
    /// closed.
    pub(crate) pipes: [Option<OwnedFd>; PIPE_COUNT],
    /// Readiness learned from the last poll, serviced before polling again.
    pub(crate) ready: [bool; PIPE_COUNT],
    /// Open read ends remaining; the drain loop runs while this is
    /// non-zero.
    pub(crate) pipes_left: usize,
    /// Scratch buffer lent out by `wait_for_data`.
    pub(crate) buffer: [u8; PIPE_BUFFER_SIZE],
    pub(crate) state: State,
    pub(crate) exit_exception: ExitException,
    /// Raw wait status of the last child.
    pub(crate) exit_code: i32,
    /// Normalised exit value (0..=255) of the last child.
    pub(crate) exit_value: i32,
    pub(crate) killed: bool,
    pub(crate) timeout_expired: bool,
    /// Set when polling itself failed and the children were torn down.
    pub(crate) poll_failed: bool,
    pub(crate) error_message: String,
    /// Raw wait status per command, filled by the reaper in command order.
    pub(crate) command_statuses: Vec<i32>,
    /// `SIGCHLD` disposition to restore at cleanup.
    pub(crate) saved_sigchld: Option<SigAction>,
}

impl Pipeline {
    /// Creates an empty pipeline in [`State::Starting`].
    pub fn new() -> Self {
        Self {
            commands: Vec::new(),
            working_directory: None,
            timeout: 0.0,
            start_time: Timestamp::default(),
            deadline: None,
            children: Vec::new(),
            pipes: [None, None, None],
            ready: [false; PIPE_COUNT],
            pipes_left: 0,
            buffer: [0; PIPE_BUFFER_SIZE],
            state: State::Starting,
            exit_exception: ExitException::None,
            exit_code: 1,
            exit_value: 1,
            killed: false,
            timeout_expired: false,
            poll_failed: false,
            error_message: String::new(),
            command_statuses: Vec::new(),
            saved_sigchld: None,
        }
    }

    /// Replaces the whole command list with a single command. The argv is
    /// copied. Returns `false` while executing or for an empty argv.
    pub fn set_command<S: AsRef<str>>(&mut self, argv: &[S]) -> bool {
        if self.state == State::Executing {
            return false;
        }
        self.commands.clear();
        self.add_command(argv)
    }

    /// Removes every configured command. No-op while executing.
    pub fn clear_commands(&mut self) {
        if self.state == State::Executing {
            return;
        }
        self.commands.clear();
    }

    /// Appends a command to the pipeline. The argv is copied; element 0 is
    /// the program. Returns `false` while executing or for an empty argv.
    pub fn add_command<S: AsRef<str>>(&mut self, argv: &[S]) -> bool {
        if self.state == State::Executing || argv.is_empty() {
            return false;
        }
        self.commands
            .push(argv.iter().map(|arg| arg.as_ref().to_owned()).collect());
        true
    }

    /// Sets the pipeline timeout in wall-clock seconds. Zero disables it;
    /// negative or non-finite values clamp to zero. No-op while executing.
    pub fn set_timeout(&mut self, seconds: f64) {
        if self.state == State::Executing {
            return;
        }
        self.timeout = if seconds.is_finite() && seconds > 0.0 {
            seconds
        } else {
            0.0
        };
    }

    /// Sets or clears the directory each child changes into before `exec`.
    /// The path is copied. No-op while executing.
    pub fn set_working_directory(&mut self, dir: Option<&Path>) {
        if self.state == State::Executing {
            return;
        }
        if self.working_directory.as_deref() != dir {
            self.working_directory = dir.map(Path::to_path_buf);
        }
    }

    /// Reserved for future use; always returns 0.
    pub fn get_option(&self, _option: i32) -> i32 {
        0
    }

    /// Reserved for future use; ignores its arguments.
    pub fn set_option(&mut self, _option: i32, _value: i32) {}

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Classification of the terminating signal, meaningful in
    /// [`State::Exception`].
    pub fn exit_exception(&self) -> ExitException {
        self.exit_exception
    }

    /// Raw OS wait status of the last child.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Exit value (0..=255) of the last child, meaningful in
    /// [`State::Exited`].
    pub fn exit_value(&self) -> i32 {
        self.exit_value
    }

    /// Error description while in [`State::Error`], `None` otherwise.
    pub fn error_string(&self) -> Option<&str> {
        (self.state == State::Error).then_some(self.error_message.as_str())
    }

    /// Raw wait status of each command, in pipeline order. Empty until a
    /// run has been fully reaped.
    pub fn command_exit_codes(&self) -> &[i32] {
        &self.command_statuses
    }

    /// Single-variant summary of the finished run; `None` while the
    /// pipeline is still starting or executing.
    pub fn outcome(&self) -> Option<Outcome> {
        match self.state {
            State::Starting | State::Executing => None,
            State::Error => Some(Outcome::Failed(self.error_message.clone())),
            State::Exception => Some(Outcome::Signaled(self.exit_exception)),
            State::Exited => Some(Outcome::Exited(self.exit_value)),
            State::Expired => Some(Outcome::Expired),
            State::Killed => Some(Outcome::Killed),
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Pipeline {
    /// Waits for a still-executing pipeline to finish, ignoring any pending
    /// data, before releasing its resources.
    fn drop(&mut self) {
        if self.state == State::Executing {
            self.wait_for_exit(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_pipeline_is_starting() {
        let pipeline = Pipeline::new();
        assert_eq!(pipeline.state(), State::Starting);
        assert_eq!(pipeline.exit_exception(), ExitException::None);
        assert!(pipeline.error_string().is_none());
        assert!(pipeline.outcome().is_none());
        assert!(pipeline.command_exit_codes().is_empty());
    }

    #[test]
    fn test_add_command_rejects_empty_argv() {
        let mut pipeline = Pipeline::new();
        let empty: [&str; 0] = [];
        assert!(!pipeline.add_command(&empty));
        assert!(pipeline.commands.is_empty());
    }

    #[test]
    fn test_set_command_replaces_the_list() {
        let mut pipeline = Pipeline::new();
        assert!(pipeline.add_command(&["cat"]));
        assert!(pipeline.add_command(&["wc", "-l"]));
        assert!(pipeline.set_command(&["true"]));
        assert_eq!(pipeline.commands, vec![vec!["true".to_owned()]]);
    }

    #[test]
    fn test_clear_commands_empties_the_list() {
        let mut pipeline = Pipeline::new();
        assert!(pipeline.add_command(&["true"]));
        pipeline.clear_commands();
        assert!(pipeline.commands.is_empty());
    }

    #[test]
    fn test_negative_timeout_clamps_to_zero() {
        let mut pipeline = Pipeline::new();
        pipeline.set_timeout(-3.5);
        assert_eq!(pipeline.timeout, 0.0);
        pipeline.set_timeout(f64::NAN);
        assert_eq!(pipeline.timeout, 0.0);
        pipeline.set_timeout(1.5);
        assert_eq!(pipeline.timeout, 1.5);
    }

    #[test]
    fn test_working_directory_set_and_clear() {
        let mut pipeline = Pipeline::new();
        pipeline.set_working_directory(Some(Path::new("/tmp")));
        assert_eq!(pipeline.working_directory.as_deref(), Some(Path::new("/tmp")));
        pipeline.set_working_directory(Some(Path::new("/tmp")));
        assert_eq!(pipeline.working_directory.as_deref(), Some(Path::new("/tmp")));
        pipeline.set_working_directory(None);
        assert!(pipeline.working_directory.is_none());
    }

    #[test]
    fn test_configuration_is_frozen_while_executing() {
        let mut pipeline = Pipeline::new();
        assert!(pipeline.add_command(&["true"]));
        pipeline.state = State::Executing;
        assert!(!pipeline.add_command(&["false"]));
        assert!(!pipeline.set_command(&["false"]));
        pipeline.set_timeout(9.0);
        pipeline.set_working_directory(Some(Path::new("/tmp")));
        pipeline.clear_commands();
        assert_eq!(pipeline.commands, vec![vec!["true".to_owned()]]);
        assert_eq!(pipeline.timeout, 0.0);
        assert!(pipeline.working_directory.is_none());
        // Restore a non-executing state so drop does not try to reap.
        pipeline.state = State::Starting;
    }

    #[test]
    fn test_reserved_options_are_inert() {
        let mut pipeline = Pipeline::new();
        assert_eq!(pipeline.get_option(42), 0);
        pipeline.set_option(42, 7);
        assert_eq!(pipeline.get_option(42), 0);
    }
}
