//! Error types for proc_pipeline.
//!
//! [`PipelineError`] is the internal currency of the spawn and reap paths.
//! Its rendered message is what [`Pipeline::error_string`] exposes, so OS
//! failures read as plain errno text and a child that failed between `fork`
//! and `exec` reports the exact text it wrote to the exec-error pipe.
//!
//! [`Pipeline::error_string`]: crate::Pipeline::error_string

use nix::errno::Errno;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// An OS call failed in the parent.
    #[error("{}", .0.desc())]
    Os(#[from] Errno),

    /// A child reported a failure over its exec-error pipe before its
    /// program started. Carries the child's errno text verbatim.
    #[error("{0}")]
    ChildSetup(String),

    /// `execute` was called without any configured command.
    #[error("no command has been configured")]
    NoCommand,

    /// A command argument or working directory contains an interior NUL
    /// byte and cannot be passed to `exec`.
    #[error("command string contains an embedded NUL byte")]
    EmbeddedNul,

    /// A child's wait status was neither a normal exit nor a signal.
    #[error("Error getting child return code.")]
    BadWaitStatus,
}

/// Retries an interruptible OS call until it completes or fails for a
/// reason other than `EINTR`.
pub(crate) fn retry_eintr<T>(mut call: impl FnMut() -> nix::Result<T>) -> nix::Result<T> {
    loop {
        match call() {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_errors_render_as_plain_errno_text() {
        let err = PipelineError::from(Errno::ENOENT);
        assert_eq!(err.to_string(), "No such file or directory");
    }

    #[test]
    fn test_child_setup_keeps_the_transported_text() {
        let err = PipelineError::ChildSetup("Permission denied".to_owned());
        assert_eq!(err.to_string(), "Permission denied");
    }

    #[test]
    fn test_retry_eintr_retries_until_success() {
        let mut attempts = 0;
        let result: nix::Result<i32> = retry_eintr(|| {
            attempts += 1;
            if attempts < 3 {
                Err(Errno::EINTR)
            } else {
                Ok(7)
            }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(attempts, 3);
    }
}
