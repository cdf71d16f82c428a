//! Error taxonomy shared by packing and extraction

use std::path::PathBuf;

use thiserror::Error;

use crate::archive::TypeTag;

pub type Result<T> = std::result::Result<T, SedaError>;

#[derive(Debug, Error)]
pub enum SedaError {
    /// Pack root is missing or not a directory
    #[error("source directory '{}' does not exist", .0.display())]
    SourceNotFound(PathBuf),

    /// A source file whose name cannot be stored as an entry path
    #[error("cannot pack '{}': {reason}", .path.display())]
    UnpackablePath { path: PathBuf, reason: &'static str },

    /// Escaped text still contains a delimiter line. Never user-facing in
    /// practice: the escaper is total, so this marks a broken invariant.
    #[error("internal error: delimiter collision left unresolved in '{path}'")]
    DelimiterCollision { path: String },

    /// The carrier cannot be deserialized
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("unsupported archive format version '{0}'")]
    UnsupportedFormat(String),

    #[error("unknown archive type tag '{0}'")]
    UnknownType(String),

    #[error("unsupported archive combination: {0}")]
    UnsupportedCombination(String),

    #[error("{kind} archive requires a passphrase")]
    PassphraseRequired { kind: TypeTag },

    #[error("incorrect passphrase for {kind} archive")]
    PassphraseIncorrect { kind: TypeTag },

    /// A post-extraction command failed; `code` is `None` when the process
    /// could not be spawned or was killed by a signal
    #[error("{kind} archive: command `{command}` failed{}", exit_suffix(.code))]
    CommandFailure {
        kind: TypeTag,
        command: String,
        code: Option<i32>,
    },

    #[error("{kind} archive: validation failed, commit message withheld: {reason}")]
    ValidationFailed { kind: TypeTag, reason: String },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" (exit code {})", code),
        None => String::new(),
    }
}

impl SedaError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SedaError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        SedaError::CorruptArchive(msg.into())
    }

    /// Process exit code a runner should use for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SedaError::CommandFailure { code: Some(code), .. } if *code != 0 => *code,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failure_message_names_command_and_type() {
        let err = SedaError::CommandFailure {
            kind: TypeTag::Construct,
            command: "make install".to_string(),
            code: Some(2),
        };
        let msg = err.to_string();
        assert!(msg.contains("construct"));
        assert!(msg.contains("make install"));
        assert!(msg.contains("exit code 2"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_io_error_names_path() {
        let err = SedaError::io(
            "out/file.txt",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().starts_with("out/file.txt"));
        assert_eq!(err.exit_code(), 1);
    }
}
