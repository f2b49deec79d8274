//! # proc_pipeline
//!
//! Chains of Unix child processes connected stdout to stdin, managed as
//! one unit: concurrent draining of stdout and stderr, a wall-clock
//! timeout that kills the whole chain, and a precise post-mortem for the
//! last child (exit value, terminating-signal class, or library error).
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use proc_pipeline::{Pipeline, Wait, PIPE_STDERR, PIPE_STDOUT};
//!
//! let mut pipeline = Pipeline::new();
//! pipeline.add_command(&["printf", "a\nb\nc\n"]);
//! pipeline.add_command(&["wc", "-l"]);
//! pipeline.set_timeout(30.0);
//!
//! pipeline.execute();
//! loop {
//!     match pipeline.wait_for_data(PIPE_STDOUT | PIPE_STDERR, None) {
//!         Wait::Stdout(data) => print!("{}", String::from_utf8_lossy(data)),
//!         Wait::Stderr(data) => eprint!("{}", String::from_utf8_lossy(data)),
//!         Wait::Timeout => continue,
//!         Wait::Done => break,
//!     }
//! }
//! pipeline.wait_for_exit(None);
//! ```
//!
//! Or collected in one call:
//!
//! ```rust,no_run
//! use proc_pipeline::Pipeline;
//!
//! let mut pipeline = Pipeline::new();
//! pipeline.add_command(&["pwd"]);
//! let output = pipeline.run();
//! assert!(output.success());
//! ```
//!
//! ## Design notes
//!
//! - **Synchronous driver**: the caller turns the state machine by calling
//!   [`Pipeline::wait_for_data`] as fast as it wishes; the only blocking
//!   points are the poll in the drain loop and the waits in
//!   [`Pipeline::wait_for_exit`].
//! - **Two deadlines**: the pipeline timeout is sticky and kills the
//!   children when it fires; the optional per-call budget returns control
//!   to the caller and leaves the children running.
//! - **No shell**: commands are argv vectors passed straight to `exec`;
//!   there is no quoting, globbing, or redirection layer.
//! - **One pipeline at a time**: executing saves and restores the
//!   process-wide `SIGCHLD` disposition, so two pipelines must not execute
//!   concurrently in the same process.
//!
//! ## Platform Support
//!
//! Unix only (Linux, macOS). The stdin-to-stdout chain, the shared
//! termination pipe, and exec-failure reporting rely on `fork`, `dup2`,
//! and descriptor-inheritance semantics that Windows process creation
//! does not provide.

#[cfg(windows)]
compile_error!(
    "proc_pipeline does not support Windows. \
     The pipeline wiring relies on fork/dup2 and file-descriptor \
     inheritance, which CreateProcess cannot express."
);

mod drain;
mod error;
mod outcome;
mod output;
mod pipeline;
mod reap;
mod signals;
mod spawn;
mod time;

pub use drain::Wait;
pub use error::PipelineError;
pub use outcome::{ExitException, Outcome, State};
pub use output::RunOutput;
pub use pipeline::{Pipeline, PIPE_STDERR, PIPE_STDOUT};
