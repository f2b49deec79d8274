//! Collected execution.
//!
//! [`Pipeline::run`] drives a pipeline to completion and keeps everything
//! the children wrote, for callers that have no use for the turn-by-turn
//! drain loop.

use crate::drain::Wait;
use crate::outcome::Outcome;
use crate::pipeline::{Pipeline, PIPE_STDERR, PIPE_STDOUT};

/// Everything a completed pipeline run produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Bytes the last child wrote to stdout.
    pub stdout: Vec<u8>,
    /// Bytes any child wrote to stderr.
    pub stderr: Vec<u8>,
    /// Terminal classification of the run.
    pub outcome: Outcome,
}

impl RunOutput {
    /// Stdout as a string (lossy UTF-8 conversion).
    pub fn stdout_string(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr as a string (lossy UTF-8 conversion).
    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// True when the last child exited normally with value 0.
    pub fn success(&self) -> bool {
        self.outcome.success()
    }
}

impl Pipeline {
    /// Executes the configured commands, drains both output streams to
    /// completion, reaps the children, and returns what they produced.
    pub fn run(&mut self) -> RunOutput {
        self.execute();

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        loop {
            match self.wait_for_data(PIPE_STDOUT | PIPE_STDERR, None) {
                Wait::Stdout(data) => stdout.extend_from_slice(data),
                Wait::Stderr(data) => stderr.extend_from_slice(data),
                Wait::Timeout => continue,
                Wait::Done => break,
            }
        }
        self.wait_for_exit(None);

        let outcome = self
            .outcome()
            .unwrap_or_else(|| Outcome::Failed("pipeline did not reach a terminal state".to_owned()));
        RunOutput {
            stdout,
            stderr,
            outcome,
        }
    }
}
