//! The error type shared by the coordinator and the worker processes.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong in a mapreduce run. All variants are fatal for the process
/// that observes them; there is no retry anywhere.
#[derive(Error, Debug)]
pub enum Error {
    /// A pipe, fork or wait call failed.
    #[error("{op} failed: {source}")]
    Setup {
        op: &'static str,
        #[source]
        source: nix::errno::Errno,
    },

    /// Opening, creating or closing a named file failed.
    #[error("{}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A frame or message on a pipe or in an output file was truncated or malformed.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A bounded field exceeded its maximum length.
    #[error("{what} is {len} bytes long, the maximum is {max}")]
    TooLong {
        what: &'static str,
        len: usize,
        max: usize,
    },

    #[error("file lister `{program}` failed: {reason}")]
    Lister { program: String, reason: String },

    /// A reaped worker process did not exit with status 0.
    #[error("{role} worker {index} (pid {pid}) {state}")]
    WorkerFailed {
        role: &'static str,
        index: usize,
        pid: i32,
        state: String,
    },
}

impl Error {
    pub fn setup(op: &'static str, source: nix::errno::Errno) -> Error {
        Error::Setup { op, source }
    }

    pub fn file(path: impl Into<PathBuf>, source: io::Error) -> Error {
        Error::File {
            path: path.into(),
            source,
        }
    }

    /// The process exit code this error maps to. Every failure is a setup or I/O failure from
    /// the point of view of the caller.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

pub type Result<T> = std::result::Result<T, Error>;
