//! Reaper.
//!
//! `wait_for_exit` drains the pipes to EOF, waits for every child, and
//! collapses the raw wait statuses plus the kill/timeout bookkeeping into
//! the terminal state. `kill` only signals; the drain loop then observes
//! the pipes closing and the reaper finishes the transition.

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use tracing::{debug, warn};

use crate::drain::Wait;
use crate::error::{retry_eintr, PipelineError};
use crate::outcome::{classify_signal, ExitException, State};
use crate::pipeline::{Pipeline, PIPE_COUNT};
use crate::signals;

impl Pipeline {
    /// Waits for the pipeline to finish, discarding any remaining output,
    /// and classifies the outcome.
    ///
    /// Returns `false` only when `user_timeout` expired first; the pipeline
    /// then keeps running and the call may be repeated with a fresh budget.
    /// Returns `true` once the pipeline is in a terminal state, including
    /// when it already was one.
    pub fn wait_for_exit(&mut self, mut user_timeout: Option<&mut f64>) -> bool {
        if self.state != State::Executing {
            return true;
        }

        loop {
            match self.wait_for_data(0, user_timeout.as_deref_mut()) {
                Wait::Timeout => return false,
                Wait::Done => break,
                // Mask 0 requests nothing; data is drained internally.
                Wait::Stdout(_) | Wait::Stderr(_) => {}
            }
        }

        // The termination pipe's EOF means the children are already gone;
        // these waits should not block.
        for index in 0..self.children.len() {
            let status = match self.children[index] {
                Some(pid) => {
                    let mut status: libc::c_int = 0;
                    let result = retry_eintr(|| {
                        match unsafe { libc::waitpid(pid.as_raw(), &mut status, 0) } {
                            rc if rc < 0 => Err(Errno::last()),
                            rc => Ok(rc),
                        }
                    });
                    if let Err(errno) = result {
                        warn!(pid = pid.as_raw(), error = %errno, "waitpid failed");
                        if self.state != State::Error {
                            self.error_message = errno.desc().to_owned();
                            self.state = State::Error;
                        }
                    }
                    status
                }
                None => 0,
            };
            self.command_statuses.push(status);
        }

        if self.state == State::Error {
            // The wait failure message is already in place.
            self.cleanup();
            return true;
        }

        if self.poll_failed {
            // The poll failure message is already in place.
            self.cleanup();
            self.state = State::Error;
            return true;
        }

        // The last command's status is the pipeline outcome.
        let status = self.command_statuses.last().copied().unwrap_or(0);

        if self.killed {
            self.state = State::Killed;
        } else if self.timeout_expired {
            self.state = State::Expired;
        } else if libc::WIFEXITED(status) {
            self.state = State::Exited;
            self.exit_exception = ExitException::None;
            self.exit_code = status;
            self.exit_value = libc::WEXITSTATUS(status);
        } else if libc::WIFSIGNALED(status) {
            self.state = State::Exception;
            self.exit_exception = classify_signal(libc::WTERMSIG(status));
            self.exit_code = status;
        } else {
            self.error_message = PipelineError::BadWaitStatus.to_string();
            self.state = State::Error;
        }

        debug!(state = ?self.state, "pipeline finished");
        self.cleanup();
        true
    }

    /// Sends `SIGKILL` to every child. Does not reap: the next drain
    /// observes the pipes closing and [`wait_for_exit`](Self::wait_for_exit)
    /// completes the transition to [`State::Killed`]. No-op unless
    /// executing.
    pub fn kill(&mut self) {
        if self.state != State::Executing {
            return;
        }
        self.killed = true;
        for pid in self.children.iter().flatten() {
            debug!(pid = pid.as_raw(), "killing child");
            let _ = kill(*pid, Signal::SIGKILL);
        }
    }

    /// Releases everything `execute` acquired: restores the saved `SIGCHLD`
    /// disposition, forgets the child ids, and closes any remaining pipe
    /// read ends. Never touches the error message.
    pub(crate) fn cleanup(&mut self) {
        if let Some(saved) = self.saved_sigchld.take() {
            signals::restore_sigchld(&saved);
        }
        self.children.clear();
        self.pipes = [None, None, None];
        self.ready = [false; PIPE_COUNT];
        self.pipes_left = 0;
    }
}
