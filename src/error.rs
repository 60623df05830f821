// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Exit code used for an invalid plan or command line
pub const USAGE_EXIT_CODE: i32 = 2;

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
    #[error("failed to start `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to open log file {}: {source}", .path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("bootstrap `{name}` failed: {status}")]
    BootstrapFailed { name: String, status: ExitStatus },
    #[error("invalid plan: {0}")]
    Plan(String),
    #[error("could not parse plan: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("an error occured: {0}")]
    ErrorMsg(String),
    #[error("an error occured: {0}")]
    ErrorStr(&'static str),
}

#[derive(Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// The code the entrypoint should exit with for this error
    ///
    /// Follows the shell: a failed bootstrap hands its own status through, a missing
    /// executable is 127 and one that could not be executed is 126.
    pub fn exit_code(&self) -> i32 {
        match &self.0 {
            ErrorKind::BootstrapFailed { status, .. } => exit_code(*status),
            ErrorKind::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound => 127,
            ErrorKind::Spawn { .. } => 126,
            ErrorKind::Plan(_) | ErrorKind::Toml(_) => USAGE_EXIT_CODE,
            _ => 1,
        }
    }
}

/// Shell style exit code for a child status, `128 + signal` when it was killed
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

impl<E> From<E> for Error
where
    E: Into<ErrorKind>,
{
    fn from(err: E) -> Self {
        Self::from_kind(err.into())
    }
}

impl From<&'static str> for Error {
    fn from(err: &'static str) -> Self {
        Self::from_kind(ErrorKind::ErrorStr(err))
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::from_kind(ErrorKind::ErrorMsg(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_status_is_handed_through() {
        let err = Error::from(ErrorKind::BootstrapFailed {
            name: "display".to_string(),
            status: ExitStatus::from_raw(3 << 8),
        });

        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_signalled_bootstrap() {
        // SIGKILL, no core
        let status = ExitStatus::from_raw(9);
        assert_eq!(exit_code(status), 137);
    }

    #[test]
    fn test_spawn_exit_codes() {
        let missing = Error::from(ErrorKind::Spawn {
            name: "display".to_string(),
            source: io::Error::from(io::ErrorKind::NotFound),
        });
        let denied = Error::from(ErrorKind::Spawn {
            name: "display".to_string(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        });

        assert_eq!(missing.exit_code(), 127);
        assert_eq!(denied.exit_code(), 126);
    }

    #[test]
    fn test_plan_errors_are_usage_errors() {
        let err = Error::from(ErrorKind::Plan("empty".to_string()));
        assert_eq!(err.exit_code(), USAGE_EXIT_CODE);

        let err = Error::from("boom");
        assert_eq!(err.exit_code(), 1);
    }
}
