use std::fs;
use std::path::Path;

use log::info;

use crate::error::UpgradeError;
use crate::upgrade::catalog::{select_applicable, MigrationKind, VersionStep};
use crate::version::{UpgradeWindow, Version};

/// Files shipped in the distribution that replace their counterparts in the
/// installation when crossing one version step. Paths are relative, source
/// to the distribution root and destination to the installation root.
#[derive(Debug, Clone)]
pub struct FileCopyManifest {
    pub from: Version,
    pub to: Version,
    pub files: &'static [(&'static str, &'static str)],
}

impl VersionStep for FileCopyManifest {
    fn from_version(&self) -> &Version {
        &self.from
    }

    fn to_version(&self) -> &Version {
        &self.to
    }
}

pub static COPY_FILES: &[FileCopyManifest] = &[
    FileCopyManifest {
        from: Version::new(0, 15, 0),
        to: Version::new(0, 16, 0),
        files: &[("start.bat", "start.bat"), ("start.sh", "start.sh")],
    },
    FileCopyManifest {
        from: Version::new(0, 16, 0),
        to: Version::new(0, 17, 0),
        files: &[("config.yml", "config.yml")],
    },
];

/// Copies manifest files from a distribution into an installation.
pub struct FileMigrator<'a> {
    dist_root: &'a Path,
    home: &'a Path,
}

impl<'a> FileMigrator<'a> {
    pub fn new(dist_root: &'a Path, home: &'a Path) -> Self {
        Self { dist_root, home }
    }

    /// Applies every manifest inside `window`, oldest step first, overwriting
    /// existing files. Returns the number of files copied.
    pub fn apply_manifests(
        &self,
        manifests: &[FileCopyManifest],
        window: &UpgradeWindow,
    ) -> Result<usize, UpgradeError> {
        let mut copied = 0;
        for manifest in select_applicable(manifests, window) {
            let step = format!(
                "{} {} -> {}",
                MigrationKind::FileCopyManifest,
                manifest.from,
                manifest.to
            );
            for (source, destination) in manifest.files {
                let source_path = self.dist_root.join(source);
                let target_path = self.home.join(destination);

                if !source_path.is_file() {
                    return Err(UpgradeError::migration(
                        &step,
                        format!("source file {} does not exist", source_path.display()),
                    ));
                }
                match target_path.parent() {
                    Some(parent) if parent.is_dir() => {}
                    _ => {
                        return Err(UpgradeError::migration(
                            &step,
                            format!("target folder for {} does not exist", target_path.display()),
                        ))
                    }
                }

                fs::copy(&source_path, &target_path)
                    .map_err(|e| UpgradeError::resource("Copy to", &target_path, e))?;
                info!(
                    "Copied {} to {}.",
                    source_path.display(),
                    target_path.display()
                );
                copied += 1;
            }
        }
        Ok(copied)
    }
}
