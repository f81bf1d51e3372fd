use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info};

use crate::error::UpgradeError;
use crate::version::Version;

/// Replaces the versioned executable artefact (`irontest-<version>.jar`) in
/// an installation with the one from the distribution.
pub struct ExecutableSwapper<'a> {
    product_name: &'a str,
    extension: &'a str,
    dist_root: &'a Path,
    home: &'a Path,
}

impl<'a> ExecutableSwapper<'a> {
    pub fn new(product_name: &'a str, extension: &'a str, dist_root: &'a Path, home: &'a Path) -> Self {
        Self {
            product_name,
            extension,
            dist_root,
            home,
        }
    }

    pub fn artefact_name(&self, version: &Version) -> String {
        format!("{}-{}.{}", self.product_name, version, self.extension)
    }

    fn is_artefact(&self, file_name: &str) -> bool {
        file_name
            .strip_prefix(self.product_name)
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|rest| rest.strip_suffix(self.extension))
            .and_then(|rest| rest.strip_suffix('.'))
            .is_some()
    }

    /// Artefacts currently in the installation root, sorted by path.
    pub fn installed_artefacts(&self) -> Result<Vec<PathBuf>, UpgradeError> {
        let entries =
            fs::read_dir(self.home).map_err(|e| UpgradeError::resource("Read directory", self.home, e))?;
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() && self.is_artefact(&entry.file_name().to_string_lossy()) {
                found.push(entry.path());
            }
        }
        found.sort();
        Ok(found)
    }

    /// Verifies the swap can happen without touching anything, returning the
    /// path of the new artefact in the distribution.
    pub fn check(&self, version: &Version) -> Result<PathBuf, UpgradeError> {
        if !self.home.is_dir() {
            return Err(UpgradeError::precondition(format!(
                "installation directory {} does not exist",
                self.home.display()
            )));
        }

        let dist = dunce::canonicalize(self.dist_root)
            .map_err(|e| UpgradeError::resource("Resolve distribution directory", self.dist_root, e))?;
        let home = dunce::canonicalize(self.home)
            .map_err(|e| UpgradeError::resource("Resolve installation directory", self.home, e))?;
        if dist == home {
            return Err(UpgradeError::precondition(format!(
                "distribution directory and installation directory are both {}",
                home.display()
            )));
        }

        let source = self.dist_root.join(self.artefact_name(version));
        if !source.is_file() {
            return Err(UpgradeError::precondition(format!(
                "new executable {} does not exist",
                source.display()
            )));
        }
        Ok(source)
    }

    /// Deletes every installed artefact, then copies in the one for `version`.
    pub fn swap(&self, version: &Version) -> Result<(), UpgradeError> {
        let source = self.check(version)?;

        for old in self.installed_artefacts()? {
            if let Err(e) = fs::remove_file(&old) {
                error!("Could not delete {}: {}", old.display(), e);
                return Err(UpgradeError::resource("Delete", old, e));
            }
            info!("Deleted {}.", old.display());
        }

        let target = self.home.join(self.artefact_name(version));
        fs::copy(&source, &target).map_err(|e| UpgradeError::resource("Copy to", &target, e))?;
        info!("Copied {} to {}.", source.display(), target.display());
        Ok(())
    }
}
