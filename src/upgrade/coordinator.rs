use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::error::{ErrorKind, UpgradeError};
use crate::hash::Hash;
use crate::logging::LogTarget;
use crate::upgrade::advisory::{BrowserCacheAdvisory, CacheInterval};
use crate::upgrade::catalog::{MigrationCatalog, MigrationResource, ResourceTree, SYSTEM_DB_SCRIPTS};
use crate::upgrade::database::{ConnectionFactory, Credentials, DatabaseMigrator, DatabaseUrl};
use crate::upgrade::executable::ExecutableSwapper;
use crate::upgrade::files::{FileCopyManifest, FileMigrator};
use crate::upgrade::prompt::Confirm;
use crate::upgrade::workspace::Workspace;
use crate::version::{UpgradeWindow, Version};

const LINE_DELIMITER: &str =
    "------------------------------------------------------------------------";

pub const BACKUP_PROMPT: &str = "Please manually backup <IronTest_Home>/database folder to your normal maintenance backup location. Type y and then Enter to confirm backup completion.";
pub const CACHE_PROMPT: &str = "Please clear browser cached images and files (last hour is enough). Type y and then Enter to confirm clear completion.";

/// Where the installation is and how to reach its pieces.
#[derive(Debug, Clone)]
pub struct UpgradeSettings {
    pub home: PathBuf,
    /// Database URL as given by the operator; parsed once the upgrade log
    /// is open.
    pub db_url: String,
    pub credentials: Credentials,
    pub dist_root: PathBuf,
    pub product_name: String,
    pub executable_extension: String,
    pub workspace_parent: Option<PathBuf>,
    pub log_target: LogTarget,
}

impl UpgradeSettings {
    pub fn database_url(&self) -> Result<DatabaseUrl, UpgradeError> {
        DatabaseUrl::parse(&self.db_url)
    }

    pub fn live_database(&self) -> Result<PathBuf, UpgradeError> {
        Ok(self.database_url()?.live_path(&self.home))
    }

    fn swapper(&self) -> ExecutableSwapper<'_> {
        ExecutableSwapper::new(
            &self.product_name,
            &self.executable_extension,
            &self.dist_root,
            &self.home,
        )
    }
}

/// How the currently installed version is determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstalledVersion {
    Given(Version),
    /// Read from the `version` row of the live system database.
    FromDatabase,
}

impl InstalledVersion {
    pub fn resolve(&self, settings: &UpgradeSettings) -> Result<Version, UpgradeError> {
        match self {
            InstalledVersion::Given(version) => Ok(version.clone()),
            InstalledVersion::FromDatabase => ConnectionFactory::new(settings.credentials.clone())
                .read_version(&settings.live_database()?),
        }
    }
}

/// The migration material shipped with a release.
#[derive(Clone, Copy)]
pub struct UpgradeSources<'a> {
    pub resources: &'a dyn ResourceTree,
    pub copy_files: &'a [FileCopyManifest],
    pub cache_intervals: &'a [CacheInterval],
}

/// Steps of an upgrade run, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeStep {
    Init,
    Plan,
    BackupConfirm,
    StageDb,
    CopyFiles,
    SwapExec,
    CacheConfirm,
    CommitDb,
    Done,
}

impl fmt::Display for UpgradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpgradeStep::Init => "INIT",
            UpgradeStep::Plan => "PLAN",
            UpgradeStep::BackupConfirm => "BACKUP_CONFIRM",
            UpgradeStep::StageDb => "STAGE_DB",
            UpgradeStep::CopyFiles => "COPY_FILES",
            UpgradeStep::SwapExec => "SWAP_EXEC",
            UpgradeStep::CacheConfirm => "CACHE_CONFIRM",
            UpgradeStep::CommitDb => "COMMIT_DB",
            UpgradeStep::Done => "DONE",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Default)]
struct StepTracker {
    visited: Vec<UpgradeStep>,
}

impl StepTracker {
    fn enter(&mut self, step: UpgradeStep) {
        debug!("Entering step {}", step);
        self.visited.push(step);
    }

    fn current(&self) -> UpgradeStep {
        self.visited.last().copied().unwrap_or(UpgradeStep::Init)
    }
}

/// What a completed upgrade did.
#[derive(Debug)]
pub struct UpgradeReport {
    pub workspace: PathBuf,
    pub log_file: PathBuf,
    pub sql_scripts: Vec<String>,
    pub files_copied: usize,
    pub cache_advised: bool,
    pub database_committed: bool,
    pub steps: Vec<UpgradeStep>,
}

/// An aborted upgrade: the step that failed, why, and where to look.
#[derive(Debug)]
pub struct UpgradeFailure {
    pub step: UpgradeStep,
    pub error: UpgradeError,
    pub workspace: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

impl UpgradeFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl fmt::Display for UpgradeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Upgrade aborted at {} ({}): {}", self.step, self.kind(), self.error)?;
        if let Some(workspace) = &self.workspace {
            write!(f, "\nUpgrade workspace kept at {}", workspace.display())?;
        }
        if let Some(log_file) = &self.log_file {
            write!(f, "\nRefer to {} for upgrade logs.", log_file.display())?;
        }
        Ok(())
    }
}

impl std::error::Error for UpgradeFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Runs an upgrade of one installation from its installed version to the
/// executable's version.
///
/// The live database is only written at the very end (`CommitDb`), after
/// every other step has succeeded. The executable is swapped before that, so
/// between `SwapExec` and `CommitDb` the installation must not be started.
pub struct UpgradeCoordinator<'a> {
    settings: &'a UpgradeSettings,
    sources: UpgradeSources<'a>,
}

impl<'a> UpgradeCoordinator<'a> {
    pub fn new(settings: &'a UpgradeSettings, sources: UpgradeSources<'a>) -> Self {
        Self { settings, sources }
    }

    pub fn run(
        &self,
        installed: InstalledVersion,
        executable: Version,
        prompt: &mut dyn Confirm,
    ) -> Result<UpgradeReport, UpgradeFailure> {
        let workspace = Workspace::create(self.settings.workspace_parent.as_deref()).map_err(|error| {
            UpgradeFailure {
                step: UpgradeStep::Init,
                error,
                workspace: None,
                log_file: None,
            }
        })?;

        // An unreadable installed version still gets a log, named without it
        let resolved = installed.resolve(self.settings);
        let log_file = workspace.log_file_path(resolved.as_ref().ok(), &executable);
        let _log_stream = match self.settings.log_target.attach(&log_file) {
            Ok(stream) => stream,
            Err(error) => {
                return Err(UpgradeFailure {
                    step: UpgradeStep::Init,
                    error,
                    workspace: Some(workspace.root().to_path_buf()),
                    log_file: None,
                })
            }
        };
        info!("Created temp upgrade directory {}", workspace.root().display());

        let mut steps = StepTracker::default();
        steps.enter(UpgradeStep::Init);

        let result = resolved.and_then(|installed| {
            info!("Upgrading Iron Test from v{} to v{}.", installed, executable);
            self.execute(&installed, &executable, &workspace, &mut steps, prompt)
        });

        match result {
            Ok(outcome) => {
                info!("{}", LINE_DELIMITER);
                info!("UPGRADE SUCCESS");
                info!("{}", LINE_DELIMITER);
                info!("You can start Iron Test now.");
                if outcome.cache_advised {
                    info!("If Iron Test page is already open, refresh the page (no need to restart browser).");
                }
                info!("{}", LINE_DELIMITER);
                info!("Refer to {} for upgrade logs.", log_file.display());

                Ok(UpgradeReport {
                    workspace: workspace.root().to_path_buf(),
                    log_file,
                    sql_scripts: outcome.sql_scripts,
                    files_copied: outcome.files_copied,
                    cache_advised: outcome.cache_advised,
                    database_committed: outcome.database_committed,
                    steps: steps.visited,
                })
            }
            Err(err) => Err(report_failure(steps.current(), err, &workspace, log_file)),
        }
    }

    fn execute(
        &self,
        installed: &Version,
        executable: &Version,
        workspace: &Workspace,
        steps: &mut StepTracker,
        prompt: &mut dyn Confirm,
    ) -> Result<Outcome, UpgradeError> {
        steps.enter(UpgradeStep::Plan);
        let window = UpgradeWindow::new(installed.clone(), executable.clone())?;
        let catalog = MigrationCatalog::new(self.sources.resources);
        let sql_scripts = catalog.applicable_migrations(&window, &SYSTEM_DB_SCRIPTS)?;
        let mut outcome = Outcome {
            sql_scripts: sql_scripts.iter().map(|s| s.path.clone()).collect(),
            ..Outcome::default()
        };

        if window.is_noop() {
            info!("Iron Test is already at v{}; there is nothing to upgrade.", executable);
            steps.enter(UpgradeStep::Done);
            return Ok(outcome);
        }

        let swapper = self.settings.swapper();
        swapper.check(executable)?;
        let db_url = self.settings.database_url()?;
        let live_db = db_url.live_path(&self.settings.home);
        if !sql_scripts.is_empty() && !live_db.is_file() {
            return Err(UpgradeError::precondition(format!(
                "system database {} does not exist",
                live_db.display()
            )));
        }
        for script in &sql_scripts {
            info!("Planned SQL script {} ({} -> {}).", script.path, script.from, script.to);
        }

        let mut staged_db = None;
        if !sql_scripts.is_empty() {
            steps.enter(UpgradeStep::BackupConfirm);
            prompt.confirm(BACKUP_PROMPT)?;
            info!("User confirmed system database backup completion.");

            steps.enter(UpgradeStep::StageDb);
            staged_db = Some(self.stage_database(
                workspace,
                &db_url,
                &live_db,
                &catalog,
                &sql_scripts,
                executable,
            )?);
        }

        steps.enter(UpgradeStep::CopyFiles);
        outcome.files_copied = FileMigrator::new(&self.settings.dist_root, &self.settings.home)
            .apply_manifests(self.sources.copy_files, &window)?;

        steps.enter(UpgradeStep::SwapExec);
        swapper.swap(executable)?;

        outcome.cache_advised = BrowserCacheAdvisory::new(self.sources.cache_intervals).needed(&window);
        if outcome.cache_advised {
            steps.enter(UpgradeStep::CacheConfirm);
            prompt.confirm(CACHE_PROMPT)?;
            info!("User confirmed browser cache clear completion.");
        }

        if let Some(staged_db) = staged_db {
            steps.enter(UpgradeStep::CommitDb);
            commit_database(&staged_db, &live_db)?;
            outcome.database_committed = true;
        }

        steps.enter(UpgradeStep::Done);
        Ok(outcome)
    }

    /// Copies the live database into `old/` and `new/`, then migrates the
    /// `new/` copy. Returns the path of the migrated copy.
    fn stage_database(
        &self,
        workspace: &Workspace,
        db_url: &DatabaseUrl,
        live_db: &Path,
        catalog: &MigrationCatalog<'_>,
        scripts: &[MigrationResource],
        executable: &Version,
    ) -> Result<PathBuf, UpgradeError> {
        let dirs = workspace.staging_dirs()?;
        let file_name = db_url.file_name();
        let live_hash = Hash::compute_sha2_hash(live_db)?;

        for dir in [&dirs.old_database, &dirs.new_database] {
            let target = dir.join(&file_name);
            fs::copy(live_db, &target).map_err(|e| UpgradeError::resource("Copy to", &target, e))?;
            if Hash::compute_sha2_hash(&target)? != live_hash {
                return Err(UpgradeError::resource(
                    "Verify copy",
                    target,
                    io::Error::new(io::ErrorKind::InvalidData, "checksum differs from live database"),
                ));
            }
            info!(
                "Copied current system database to {} (sha256 {}).",
                dir.display(),
                Hash::short_sha2(&live_hash)
            );
        }

        let staged = dirs.new_database.join(&file_name);
        let connections = ConnectionFactory::new(self.settings.credentials.clone());
        DatabaseMigrator::new(catalog, &connections).migrate(&staged, scripts, executable)?;
        Ok(staged)
    }
}

/// Records a failure that happened before an upgrade could be set up, e.g.
/// an unreadable configuration, so that the operator still gets a workspace
/// holding a log of it.
pub fn abort_before_start(
    workspace_parent: Option<&Path>,
    log_target: &LogTarget,
    executable: &Version,
    error: UpgradeError,
) -> UpgradeFailure {
    let workspace = match Workspace::create(workspace_parent) {
        Ok(workspace) => workspace,
        Err(_) => {
            return UpgradeFailure {
                step: UpgradeStep::Init,
                error,
                workspace: None,
                log_file: None,
            }
        }
    };
    let log_file = workspace.log_file_path(None, executable);
    let _log_stream = match log_target.attach(&log_file) {
        Ok(stream) => stream,
        Err(_) => {
            return UpgradeFailure {
                step: UpgradeStep::Init,
                error,
                workspace: Some(workspace.root().to_path_buf()),
                log_file: None,
            }
        }
    };
    info!("Created temp upgrade directory {}", workspace.root().display());
    report_failure(UpgradeStep::Init, error, &workspace, log_file)
}

fn report_failure(
    step: UpgradeStep,
    error: UpgradeError,
    workspace: &Workspace,
    log_file: PathBuf,
) -> UpgradeFailure {
    error!("Step {} failed ({}): {}", step, error.kind(), error);
    error!("{}", LINE_DELIMITER);
    error!("UPGRADE FAILURE");
    error!("{}", LINE_DELIMITER);
    if step_after_swap(step) {
        warn!("The executable has already been replaced but the database has not been upgraded. Do not start Iron Test; restore the previous executable and the database backup.");
    } else {
        info!("The live database has not been changed.");
    }
    info!("Upgrade workspace kept at {}", workspace.root().display());
    info!("Refer to {} for upgrade logs.", log_file.display());

    UpgradeFailure {
        step,
        error,
        workspace: Some(workspace.root().to_path_buf()),
        log_file: Some(log_file),
    }
}

#[derive(Debug, Default)]
struct Outcome {
    sql_scripts: Vec<String>,
    files_copied: usize,
    cache_advised: bool,
    database_committed: bool,
}

fn step_after_swap(step: UpgradeStep) -> bool {
    matches!(step, UpgradeStep::SwapExec | UpgradeStep::CacheConfirm | UpgradeStep::CommitDb)
}

/// Replaces the live database with the upgraded copy. The copy is written
/// next to the live file first and renamed over it, so the live file is
/// either the old or the new database, never a partial one.
fn commit_database(staged_db: &Path, live_db: &Path) -> Result<(), UpgradeError> {
    let mut pending = live_db.as_os_str().to_owned();
    pending.push(".upgrading");
    let pending = PathBuf::from(pending);

    fs::copy(staged_db, &pending).map_err(|e| UpgradeError::resource("Copy to", &pending, e))?;
    if let Err(e) = fs::rename(&pending, live_db) {
        // Leave no half-committed file behind next to the live database
        let _ = fs::remove_file(&pending);
        return Err(UpgradeError::resource("Replace", live_db, e));
    }
    info!("Copied {} to {}.", staged_db.display(), live_db.display());
    Ok(())
}
