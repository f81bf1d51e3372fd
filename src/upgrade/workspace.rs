use std::fs;
use std::path::{Path, PathBuf};

use crate::error::UpgradeError;
use crate::version::Version;

const WORKSPACE_PREFIX: &str = "irontest-upgrade-";
const DATABASE_DIR: &str = "database";

/// Scratch directory for one upgrade run.
///
/// The directory is never removed by the upgrade itself: it holds the log
/// file and, for database upgrades, the pre- and post-migration copies of
/// the system database for post-mortem inspection.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
}

/// The `old/database` and `new/database` staging folders.
#[derive(Debug, Clone)]
pub struct StagingDirs {
    pub old_database: PathBuf,
    pub new_database: PathBuf,
}

impl Workspace {
    /// Creates a uniquely named directory under `parent`, or under the system
    /// temp directory when no parent is given.
    pub fn create(parent: Option<&Path>) -> Result<Self, UpgradeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let temp_dir = match parent {
            Some(parent) => builder
                .tempdir_in(parent)
                .map_err(|e| UpgradeError::resource("Create workspace in", parent, e))?,
            None => builder
                .tempdir()
                .map_err(|e| UpgradeError::resource("Create workspace in", std::env::temp_dir(), e))?,
        };

        Ok(Self {
            root: temp_dir.keep(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_file_path(&self, installed: Option<&Version>, executable: &Version) -> PathBuf {
        self.root.join(log_file_name(installed, executable))
    }

    /// Creates the staging folders on first use. Calling it again returns the
    /// same paths.
    pub fn staging_dirs(&self) -> Result<StagingDirs, UpgradeError> {
        let dirs = StagingDirs {
            old_database: self.root.join("old").join(DATABASE_DIR),
            new_database: self.root.join("new").join(DATABASE_DIR),
        };
        for dir in [&dirs.old_database, &dirs.new_database] {
            fs::create_dir_all(dir).map_err(|e| UpgradeError::resource("Create directory", dir, e))?;
        }
        Ok(dirs)
    }
}

/// `upgrade-from-v<old>-to-v<new>.log`, with `unknown` in place of the old
/// version when it could not be determined.
pub fn log_file_name(installed: Option<&Version>, executable: &Version) -> String {
    match installed {
        Some(installed) => format!("upgrade-from-v{}-to-v{}.log", installed, executable),
        None => format!("upgrade-from-unknown-to-v{}.log", executable),
    }
}
