use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use rust_embed::RustEmbed;

use crate::error::UpgradeError;
use crate::version::{UpgradeWindow, Version};

// Everything under resources/upgrade/ is compiled into the binary. Scripts
// live in per-kind sub packages, e.g. db/SystemDB_0_16_0_To_0_17_0.sql
#[derive(RustEmbed)]
#[folder = "resources/upgrade/"]
struct UpgradeAssets;

/// A read-only tree of migration resources addressed by `/`-separated paths.
pub trait ResourceTree {
    /// All resource paths below `sub_package`, relative to the tree root.
    fn list(&self, sub_package: &str) -> Result<Vec<String>, UpgradeError>;

    fn read_to_string(&self, path: &str) -> Result<String, UpgradeError>;
}

/// Resources embedded into the executable at build time.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedResources;

impl ResourceTree for EmbeddedResources {
    fn list(&self, sub_package: &str) -> Result<Vec<String>, UpgradeError> {
        let prefix = format!("{}/", sub_package.trim_end_matches('/'));
        Ok(UpgradeAssets::iter()
            .filter(|path| path.starts_with(&prefix))
            .map(|path| path.into_owned())
            .collect())
    }

    fn read_to_string(&self, path: &str) -> Result<String, UpgradeError> {
        let file = UpgradeAssets::get(path).ok_or_else(|| {
            UpgradeError::precondition(format!("embedded resource '{}' does not exist", path))
        })?;
        String::from_utf8(file.data.into_owned()).map_err(|e| {
            UpgradeError::precondition(format!("embedded resource '{}' is not UTF-8: {}", path, e))
        })
    }
}

/// Resources read from a directory on disk. Used to override the embedded
/// set and by tests.
#[derive(Debug, Clone)]
pub struct DirectoryResources {
    root: PathBuf,
}

impl DirectoryResources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ResourceTree for DirectoryResources {
    fn list(&self, sub_package: &str) -> Result<Vec<String>, UpgradeError> {
        let base = self.root.join(sub_package);
        if !base.is_dir() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let mut queue = VecDeque::from([base]);
        while let Some(dir) = queue.pop_front() {
            let entries =
                fs::read_dir(&dir).map_err(|e| UpgradeError::resource("Read directory", &dir, e))?;
            for entry in entries {
                let path = entry?.path();
                if path.is_dir() {
                    queue.push_back(path);
                } else if let Some(relative) = relative_resource_path(&self.root, &path) {
                    paths.push(relative);
                }
            }
        }
        Ok(paths)
    }

    fn read_to_string(&self, path: &str) -> Result<String, UpgradeError> {
        let full = self.root.join(path);
        fs::read_to_string(&full).map_err(|e| UpgradeError::resource("Read resource", full, e))
    }
}

fn relative_resource_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationKind {
    SqlScript,
    FileCopyManifest,
}

impl fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationKind::SqlScript => f.write_str("sql-script"),
            MigrationKind::FileCopyManifest => f.write_str("file-copy-manifest"),
        }
    }
}

/// Anything authored for exactly one (from, to) version step.
pub trait VersionStep {
    fn from_version(&self) -> &Version;
    fn to_version(&self) -> &Version;
}

/// Keeps the steps lying inside `window`, ordered by from version then to
/// version. Input order only matters between steps with identical spans.
pub fn select_applicable<T: VersionStep + Clone>(steps: &[T], window: &UpgradeWindow) -> Vec<T> {
    let mut selected: Vec<T> = steps
        .iter()
        .filter(|step| window.covers(step.from_version(), step.to_version()))
        .cloned()
        .collect();
    selected.sort_by(|a, b| {
        a.from_version()
            .cmp(b.from_version())
            .then_with(|| a.to_version().cmp(b.to_version()))
    });
    selected
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationResource {
    pub path: String,
    pub from: Version,
    pub to: Version,
    pub kind: MigrationKind,
}

impl VersionStep for MigrationResource {
    fn from_version(&self) -> &Version {
        &self.from
    }

    fn to_version(&self) -> &Version {
        &self.to
    }
}

/// Where one kind of migration resource lives and how its files are named:
/// `<sub_package>/<prefix>_<from>_To_<to>.<extension>`.
#[derive(Debug, Clone, Copy)]
pub struct ResourcePattern {
    pub sub_package: &'static str,
    pub prefix: &'static str,
    pub extension: &'static str,
    pub kind: MigrationKind,
}

pub const SYSTEM_DB_SCRIPTS: ResourcePattern = ResourcePattern {
    sub_package: "db",
    prefix: "SystemDB",
    extension: "sql",
    kind: MigrationKind::SqlScript,
};

const VERSION_SEPARATOR: &str = "_To_";

impl ResourcePattern {
    /// Parses a resource path into a migration. Returns `Ok(None)` for files
    /// that are not named like this pattern at all, and an error for files
    /// that look like migrations but carry unparseable versions.
    pub fn parse(&self, path: &str) -> Result<Option<MigrationResource>, UpgradeError> {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let stem = match file_name
            .strip_prefix(self.prefix)
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|rest| rest.strip_suffix(self.extension))
            .and_then(|rest| rest.strip_suffix('.'))
        {
            Some(stem) => stem,
            None => return Ok(None),
        };

        let malformed = |detail: String| {
            UpgradeError::precondition(format!("malformed migration file name '{}': {}", path, detail))
        };

        let (from_token, to_token) = stem
            .split_once(VERSION_SEPARATOR)
            .ok_or_else(|| malformed(format!("missing '{}'", VERSION_SEPARATOR)))?;
        let from = Version::from_file_token(from_token).map_err(|e| malformed(detail(e)))?;
        let to = Version::from_file_token(to_token).map_err(|e| malformed(detail(e)))?;
        if from >= to {
            return Err(malformed(format!(
                "from version {} is not older than to version {}",
                from, to
            )));
        }

        Ok(Some(MigrationResource {
            path: path.to_owned(),
            from,
            to,
            kind: self.kind,
        }))
    }
}

// The bare message of a precondition failure, for nesting in another one
fn detail(err: UpgradeError) -> String {
    match err {
        UpgradeError::Precondition(message) => message,
        other => other.to_string(),
    }
}

/// Discovers migration resources and selects the ones an upgrade needs.
pub struct MigrationCatalog<'a> {
    resources: &'a dyn ResourceTree,
}

impl<'a> MigrationCatalog<'a> {
    pub fn new(resources: &'a dyn ResourceTree) -> Self {
        Self { resources }
    }

    /// Every well-formed resource matching `pattern`, in discovery order.
    pub fn discover(&self, pattern: &ResourcePattern) -> Result<Vec<MigrationResource>, UpgradeError> {
        let mut found = Vec::new();
        let mut spans = HashSet::new();
        for path in self.resources.list(pattern.sub_package)? {
            if let Some(resource) = pattern.parse(&path)? {
                if !spans.insert((resource.from.clone(), resource.to.clone())) {
                    return Err(UpgradeError::precondition(format!(
                        "more than one {} migrates {} to {} (found again at '{}')",
                        pattern.kind, resource.from, resource.to, resource.path
                    )));
                }
                found.push(resource);
            }
        }
        Ok(found)
    }

    /// The migrations of `pattern` lying inside `window`, in application
    /// order. Gaps between steps are allowed; overlapping steps are refused
    /// because applying both would replay part of a version span.
    pub fn applicable_migrations(
        &self,
        window: &UpgradeWindow,
        pattern: &ResourcePattern,
    ) -> Result<Vec<MigrationResource>, UpgradeError> {
        let discovered = self.discover(pattern)?;
        let selected = select_applicable(&discovered, window);

        for pair in selected.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.from < prev.to {
                return Err(UpgradeError::precondition(format!(
                    "migrations '{}' ({} -> {}) and '{}' ({} -> {}) overlap",
                    prev.path, prev.from, prev.to, next.path, next.from, next.to
                )));
            }
            if next.from > prev.to {
                debug!(
                    "No {} migration between {} and {}",
                    pattern.kind, prev.to, next.from
                );
            }
        }

        Ok(selected)
    }

    pub fn load(&self, resource: &MigrationResource) -> Result<String, UpgradeError> {
        self.resources.read_to_string(&resource.path)
    }
}
