use flexi_logger::FlexiLoggerError;
use rusqlite::Error as RusqliteError;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::upgrade::coordinator::UpgradeFailure;

#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("{action} '{}' failed: {source}", .path.display())]
    Resource {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError),

    #[error("Migration failed in {step}: {message}")]
    Migration { step: String, message: String },

    #[error("Operator aborted: {0}")]
    OperatorAbort(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] Box<figment::Error>),

    #[error("Logger error: {0}")]
    LoggerError(#[from] FlexiLoggerError),

    #[error("{0}")]
    Aborted(Box<UpgradeFailure>),
}

/// Coarse failure classes that decide how an aborted upgrade is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PreconditionFailure,
    ResourceFailure,
    MigrationFailure,
    OperatorAbort,
    Internal,
}

impl ErrorKind {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::PreconditionFailure => 2,
            ErrorKind::ResourceFailure => 3,
            ErrorKind::MigrationFailure => 4,
            ErrorKind::OperatorAbort => 5,
            ErrorKind::Internal => 1,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::PreconditionFailure => "precondition failure",
            ErrorKind::ResourceFailure => "resource failure",
            ErrorKind::MigrationFailure => "migration failure",
            ErrorKind::OperatorAbort => "operator abort",
            ErrorKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

impl UpgradeError {
    pub fn precondition(msg: impl Into<String>) -> Self {
        UpgradeError::Precondition(msg.into())
    }

    pub fn migration(step: impl Into<String>, msg: impl fmt::Display) -> Self {
        UpgradeError::Migration {
            step: step.into(),
            message: msg.to_string(),
        }
    }

    /// Wraps an I/O error with the action and path it happened on.
    pub fn resource(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        UpgradeError::Resource {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UpgradeError::Precondition(_) => ErrorKind::PreconditionFailure,
            UpgradeError::IoError(_)
            | UpgradeError::Resource { .. }
            | UpgradeError::DatabaseError(_) => ErrorKind::ResourceFailure,
            UpgradeError::Migration { .. } => ErrorKind::MigrationFailure,
            UpgradeError::OperatorAbort(_) => ErrorKind::OperatorAbort,
            UpgradeError::ConfigError(_) | UpgradeError::LoggerError(_) => ErrorKind::Internal,
            UpgradeError::Aborted(failure) => failure.kind(),
        }
    }
}

impl From<UpgradeFailure> for UpgradeError {
    fn from(failure: UpgradeFailure) -> Self {
        UpgradeError::Aborted(Box::new(failure))
    }
}

impl From<figment::Error> for UpgradeError {
    fn from(err: figment::Error) -> Self {
        UpgradeError::ConfigError(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            UpgradeError::precondition("x").kind(),
            ErrorKind::PreconditionFailure
        );
        assert_eq!(
            UpgradeError::migration("SystemDB_1_0_0_To_1_1_0.sql", "boom").kind(),
            ErrorKind::MigrationFailure
        );
        assert_eq!(
            UpgradeError::OperatorAbort("eof".into()).kind(),
            ErrorKind::OperatorAbort
        );
        let io = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(
            UpgradeError::resource("Copy", "/tmp/a", io).kind(),
            ErrorKind::ResourceFailure
        );
    }

    #[test]
    fn test_exit_codes_are_distinct_and_nonzero() {
        let kinds = [
            ErrorKind::PreconditionFailure,
            ErrorKind::ResourceFailure,
            ErrorKind::MigrationFailure,
            ErrorKind::OperatorAbort,
            ErrorKind::Internal,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|k| k.exit_code()).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn test_resource_error_message_names_path() {
        let io = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = UpgradeError::resource("Delete", "/opt/irontest/irontest-1.0.0.jar", io);
        let msg = err.to_string();
        assert!(msg.contains("Delete"));
        assert!(msg.contains("irontest-1.0.0.jar"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_aborted_upgrade_keeps_failure_kind_and_report() {
        use crate::upgrade::coordinator::UpgradeStep;
        use std::path::PathBuf;

        let failure = UpgradeFailure {
            step: UpgradeStep::StageDb,
            error: UpgradeError::migration("db/SystemDB_1_1_0_To_1_2_0.sql", "no such table"),
            workspace: Some(PathBuf::from("/tmp/upgrade-x")),
            log_file: Some(PathBuf::from("/tmp/upgrade-x/upgrade.log")),
        };

        let err = UpgradeError::from(failure);

        assert_eq!(err.kind(), ErrorKind::MigrationFailure);
        assert_eq!(err.kind().exit_code(), ErrorKind::MigrationFailure.exit_code());
        let msg = err.to_string();
        assert!(msg.contains("Upgrade aborted at STAGE_DB"));
        assert!(msg.contains("Refer to /tmp/upgrade-x/upgrade.log for upgrade logs."));
    }
}
