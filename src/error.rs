//! Error conditions raised by the rebuild pipeline.
//!
//! Every failure is fatal. The variants here exist so callers can tell the
//! classes apart (and so the binaries can surface a child's exit status),
//! not so anything can recover from them.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("not run from a staging directory: '{}' does not end in '/{}'", .path.display(), .suffix)]
    NotStagingDirectory { path: PathBuf, suffix: &'static str },

    #[error("could not find file '{}'", .0.display())]
    MissingFile(PathBuf),

    #[error("none of {candidates:?} found in $PATH")]
    RuntimeNotFound { candidates: Vec<&'static str> },

    #[error("patch '{}' listed in series does not exist in build context '{}'", .patch, .context.display())]
    UnresolvablePatch { patch: String, context: PathBuf },

    #[error("unexpected HTTP status code for {url}: got {got}, want 200")]
    HttpStatus { url: String, got: u16 },

    #[error("{command}: {reason}")]
    CommandFailed {
        command: String,
        reason: String,
        code: Option<i32>,
    },

    #[error("invalid build target: {0}")]
    InvalidTarget(String),

    #[error("{0}")]
    WrongEnvironment(String),
}

/// Process exit status for a failed run.
///
/// A failed child command propagates its own exit code; every other failure
/// maps to 1.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| match cause.downcast_ref::<RebuildError>() {
            Some(RebuildError::CommandFailed { code: Some(code), .. }) if *code != 0 => Some(*code),
            _ => None,
        })
        .unwrap_or(1)
}
