//! Terminal classification of a pipeline run.
//!
//! The legacy projection (`State` + `ExitException` + raw status fields)
//! and the tagged [`Outcome`] describe the same facts; both are derived
//! from the last child's wait status and the kill/timeout bookkeeping.

/// Lifecycle state of a [`Pipeline`](crate::Pipeline).
///
/// Discriminant values are fixed and form the numeric surface shared with
/// non-Rust callers; do not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum State {
    /// Configured but not yet executed. Initial state.
    Starting = 0,
    /// The library itself failed; `error_string` describes why.
    Error = 1,
    /// The last child was terminated by a signal.
    Exception = 2,
    /// Children are running.
    Executing = 3,
    /// The last child exited normally.
    Exited = 4,
    /// The pipeline timeout expired and the children were killed.
    Expired = 5,
    /// The caller killed the pipeline.
    Killed = 6,
}

/// Classification of the signal that terminated the last child.
///
/// Meaningful while the pipeline is in [`State::Exception`]. Discriminant
/// values are fixed; do not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitException {
    /// No exceptional termination.
    None = 0,
    /// Segmentation fault or bus error.
    Fault = 1,
    /// Illegal instruction.
    Illegal = 2,
    /// Interrupt.
    Interrupt = 3,
    /// Floating-point exception.
    Numerical = 4,
    /// Any other signal.
    Other = 5,
}

impl std::fmt::Display for ExitException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitException::None => write!(f, "none"),
            ExitException::Fault => write!(f, "address fault"),
            ExitException::Illegal => write!(f, "illegal instruction"),
            ExitException::Interrupt => write!(f, "interrupt"),
            ExitException::Numerical => write!(f, "numerical error"),
            ExitException::Other => write!(f, "other signal"),
        }
    }
}

/// Maps a terminating signal number to its exception class.
pub(crate) fn classify_signal(signal: i32) -> ExitException {
    match signal {
        libc::SIGSEGV | libc::SIGBUS => ExitException::Fault,
        libc::SIGFPE => ExitException::Numerical,
        libc::SIGILL => ExitException::Illegal,
        libc::SIGINT => ExitException::Interrupt,
        _ => ExitException::Other,
    }
}

/// Single-variant summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Normal exit with the given exit value (0..=255).
    Exited(i32),
    /// Terminated by a signal of the given class.
    Signaled(ExitException),
    /// Killed by the caller.
    Killed,
    /// The pipeline timeout expired.
    Expired,
    /// The library failed; the message matches `error_string`.
    Failed(String),
}

impl Outcome {
    /// True for a normal exit with value 0.
    pub fn success(&self) -> bool {
        matches!(self, Outcome::Exited(0))
    }
}
