//! Drain loop.
//!
//! `wait_for_data` multiplexes reads over the open pipe read ends and is
//! the only place the library blocks besides the reaper's waits. Two
//! deadlines govern each call: the pipeline's own timeout, whose expiry
//! kills the children, and an optional per-call budget supplied by the
//! caller, whose expiry merely returns control.

use std::os::fd::{AsFd, AsRawFd};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::unistd;
use tracing::warn;

use crate::error::retry_eintr;
use crate::pipeline::{Pipeline, PIPE_COUNT, STDOUT_SLOT, TERM_SLOT};
use crate::time::Timestamp;

/// One turn of the drain loop.
#[derive(Debug, PartialEq, Eq)]
pub enum Wait<'a> {
    /// Stdout bytes from the last child. Consume before the next call; the
    /// underlying scratch buffer is reused.
    Stdout(&'a [u8]),
    /// Stderr bytes from any child. Same buffer contract as `Stdout`.
    Stderr(&'a [u8]),
    /// The caller's own timeout expired; the pipeline is still running.
    Timeout,
    /// No more data will arrive: every pipe reached EOF, the pipeline
    /// timeout fired, or polling failed.
    Done,
}

enum PollStep {
    Ready(Vec<usize>),
    Expired,
    Failed(Errno),
}

impl Pipeline {
    /// Blocks until one of the requested pipes yields data, every pipe has
    /// closed, or a deadline expires.
    ///
    /// `pipes` is a bitmask of [`PIPE_STDOUT`](crate::PIPE_STDOUT) and
    /// [`PIPE_STDERR`](crate::PIPE_STDERR); data arriving on an unrequested
    /// pipe is read and discarded. `user_timeout` is a per-call budget in
    /// seconds, decremented in place by the elapsed wall time. When that
    /// budget is the deadline that fires, the call returns
    /// [`Wait::Timeout`] and the children keep running; when the pipeline's
    /// own timeout fires instead, the children are killed and the run will
    /// finish as expired.
    pub fn wait_for_data(&mut self, pipes: u8, mut user_timeout: Option<&mut f64>) -> Wait<'_> {
        let user_start = user_timeout.as_ref().map(|_| Timestamp::now());
        let user_secs = user_timeout.as_deref().copied();
        let (deadline, user_deadline) = self.effective_deadline(user_secs);

        let mut delivered: Option<(usize, usize)> = None;
        let mut expired = false;

        while self.pipes_left > 0 {
            // Service readiness learned from an earlier poll before polling
            // again.
            for slot in 0..PIPE_COUNT {
                if !self.ready[slot] {
                    continue;
                }
                self.ready[slot] = false;
                let Some(fd) = self.pipes[slot].as_ref().map(|fd| fd.as_raw_fd()) else {
                    continue;
                };
                match retry_eintr(|| unistd::read(fd, &mut self.buffer)) {
                    Ok(n) if n > 0 => {
                        if slot == TERM_SLOT {
                            // The termination pipe carries no payload.
                        } else if pipes & (1 << slot) != 0 {
                            delivered = Some((slot, n));
                            break;
                        }
                        // Unrequested data is dropped on the floor.
                    }
                    // EOF, or a read failure treated as one.
                    _ => {
                        self.pipes[slot] = None;
                        self.pipes_left -= 1;
                    }
                }
            }

            if delivered.is_some() {
                break;
            }

            // Every pipe has closed; the children are done.
            if self.pipes_left == 0 {
                break;
            }

            match self.poll_once(deadline) {
                PollStep::Ready(slots) => {
                    for slot in slots {
                        self.ready[slot] = true;
                    }
                }
                PollStep::Expired => {
                    expired = true;
                    break;
                }
                PollStep::Failed(errno) => {
                    warn!(error = %errno, "poll failed; killing children");
                    self.error_message = errno.desc().to_owned();
                    self.kill();
                    self.killed = false;
                    self.poll_failed = true;
                    self.pipes_left = 0;
                }
            }
        }

        // Charge the elapsed wall time to the caller's budget.
        if let (Some(remaining), Some(start)) = (user_timeout.as_deref_mut(), user_start) {
            let elapsed = Timestamp::now() - start;
            *remaining = (*remaining - elapsed.as_secs_f64()).max(0.0);
        }

        if let Some((slot, len)) = delivered {
            let data = &self.buffer[..len];
            return if slot == STDOUT_SLOT {
                Wait::Stdout(data)
            } else {
                Wait::Stderr(data)
            };
        }

        if expired {
            if user_deadline {
                return Wait::Timeout;
            }
            // The pipeline's own deadline fired: the run is over.
            self.kill();
            self.killed = false;
            self.timeout_expired = true;
            self.pipes_left = 0;
        }

        Wait::Done
    }

    /// Resolves the pipeline deadline on first use and folds in the
    /// caller's budget. Returns the earlier deadline and whether it is the
    /// caller's.
    fn effective_deadline(&mut self, user_secs: Option<f64>) -> (Option<Timestamp>, bool) {
        if self.timeout > 0.0 && self.deadline.is_none() {
            self.deadline = Some(self.start_time + Timestamp::from_secs_f64(self.timeout));
        }

        let mut deadline = self.deadline;
        let mut user = false;
        if let Some(secs) = user_secs {
            let candidate = Timestamp::now() + Timestamp::from_secs_f64(secs);
            if deadline.map_or(true, |at| candidate < at) {
                deadline = Some(candidate);
                user = true;
            }
        }
        (deadline, user)
    }

    /// One poll over the open read ends, honouring `deadline`.
    fn poll_once(&self, deadline: Option<Timestamp>) -> PollStep {
        let timeout = match deadline {
            None => PollTimeout::NONE,
            Some(at) => {
                let now = Timestamp::now();
                if at <= now {
                    return PollStep::Expired;
                }
                let millis = (at - now).as_millis_ceil().min(i64::from(i32::MAX)) as i32;
                PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX)
            }
        };

        let mut slots = Vec::with_capacity(PIPE_COUNT);
        let mut fds = Vec::with_capacity(PIPE_COUNT);
        for (slot, pipe) in self.pipes.iter().enumerate() {
            if let Some(fd) = pipe {
                slots.push(slot);
                fds.push(PollFd::new(fd.as_fd(), PollFlags::POLLIN));
            }
        }

        match retry_eintr(|| poll(&mut fds, timeout)) {
            Ok(0) => PollStep::Expired,
            Ok(_) => {
                let wake = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
                let ready = fds
                    .iter()
                    .zip(&slots)
                    .filter(|(fd, _)| fd.revents().is_some_and(|revents| revents.intersects(wake)))
                    .map(|(_, slot)| *slot)
                    .collect();
                PollStep::Ready(ready)
            }
            Err(errno) => PollStep::Failed(errno),
        }
    }
}
