use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::UpgradeConfig;
use crate::error::UpgradeError;
use crate::logging::LogTarget;
use crate::upgrade::advisory::{BrowserCacheAdvisory, CacheInterval, CLEAR_BROWSER_CACHE};
use crate::upgrade::catalog::{
    select_applicable, DirectoryResources, EmbeddedResources, MigrationCatalog, ResourceTree,
    SYSTEM_DB_SCRIPTS,
};
use crate::upgrade::coordinator::{abort_before_start, InstalledVersion};
use crate::upgrade::database::Credentials;
use crate::upgrade::files::{FileCopyManifest, COPY_FILES};
use crate::upgrade::prompt::{Confirm, OperatorPrompt};
use crate::upgrade::{UpgradeCoordinator, UpgradeSettings, UpgradeSources};
use crate::version::{UpgradeWindow, Version};

#[derive(Parser)]
#[command(
    name = "irontest-upgrade",
    version,
    about = "Upgrades an Iron Test installation in place"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Upgrade the installation to the version of this executable
    Run(InstallationArgs),

    /// Show what an upgrade would do without changing anything
    Plan(InstallationArgs),

    /// Print the effective configuration
    #[command(name = "show-config")]
    ShowConfig {
        /// Iron Test installation directory
        #[arg(long = "home")]
        home: PathBuf,
    },
}

#[derive(Args, Debug, Clone)]
pub struct InstallationArgs {
    /// Iron Test installation directory
    #[arg(long = "home")]
    pub home: PathBuf,

    /// System database URL, e.g. jdbc:h2:./database/irontest;IFEXISTS=TRUE
    #[arg(long = "db-url")]
    pub db_url: String,

    /// System database user (overrides config)
    #[arg(long = "user")]
    pub user: Option<String>,

    /// System database password (overrides config)
    #[arg(long = "password")]
    pub password: Option<String>,

    /// Installed version (default: read from the system database)
    #[arg(long = "from", value_parser = parse_version)]
    pub from: Option<Version>,

    /// Target version (default: the version of this executable)
    #[arg(long = "to", value_parser = parse_version)]
    pub to: Option<Version>,

    /// Distribution directory holding the new executable and files (overrides config)
    #[arg(long = "dist")]
    pub dist: Option<PathBuf>,

    /// Read migration resources from this directory instead of the built-in set
    #[arg(long = "resources")]
    pub resources: Option<PathBuf>,

    /// Directory in which to create the upgrade workspace (overrides config)
    #[arg(long = "workspace-parent")]
    pub workspace_parent: Option<PathBuf>,
}

fn parse_version(s: &str) -> Result<Version, String> {
    Version::parse(s).map_err(|e| e.to_string())
}

impl InstallationArgs {
    fn apply_overrides(&self, config: &mut UpgradeConfig) {
        if let Some(user) = &self.user {
            config.db_user = user.clone();
        }
        if let Some(password) = &self.password {
            config.db_password = password.clone();
        }
        if let Some(dist) = &self.dist {
            config.dist_root = dist.clone();
        }
        if let Some(parent) = &self.workspace_parent {
            config.workspace_parent = Some(parent.clone());
        }
    }

    fn resource_tree(&self) -> Box<dyn ResourceTree> {
        match &self.resources {
            Some(dir) => Box::new(DirectoryResources::new(dir)),
            None => Box::new(EmbeddedResources),
        }
    }

    fn settings(&self, config: &UpgradeConfig) -> UpgradeSettings {
        UpgradeSettings {
            home: self.home.clone(),
            db_url: self.db_url.clone(),
            credentials: Credentials {
                user: config.db_user.clone(),
                password: config.db_password.clone(),
            },
            dist_root: config.dist_root.clone(),
            product_name: config.product_name.clone(),
            executable_extension: config.executable_extension.clone(),
            workspace_parent: config.workspace_parent.clone(),
            log_target: LogTarget::ConsoleAndFile {
                level: config.log_level.clone(),
            },
        }
    }

    fn installed_version(&self) -> InstalledVersion {
        match &self.from {
            Some(version) => InstalledVersion::Given(version.clone()),
            None => InstalledVersion::FromDatabase,
        }
    }

    fn executable_version(&self) -> Result<Version, UpgradeError> {
        match &self.to {
            Some(version) => Ok(version.clone()),
            None => Version::current_executable(),
        }
    }
}

impl Cli {
    pub fn handle_command_line() -> Result<(), UpgradeError> {
        let args = Cli::parse();

        match args.command {
            Command::Run(install_args) => {
                Self::run_upgrade(&install_args, &mut OperatorPrompt::stdio())
            }
            Command::Plan(install_args) => Self::print_plan(&install_args),
            Command::ShowConfig { home } => {
                let config = UpgradeConfig::load(&home)?;
                print!("{}", config.to_display_toml()?);
                Ok(())
            }
        }
    }

    fn load_config(install_args: &InstallationArgs) -> Result<UpgradeConfig, UpgradeError> {
        let mut config = UpgradeConfig::load(&install_args.home)?;
        install_args.apply_overrides(&mut config);
        Ok(config)
    }

    fn run_upgrade(install_args: &InstallationArgs, prompt: &mut dyn Confirm) -> Result<(), UpgradeError> {
        let executable = install_args.executable_version()?;
        let config = match Self::load_config(install_args) {
            Ok(config) => config,
            Err(err) => {
                // No config means no configured log level or workspace parent
                let log_target = LogTarget::ConsoleAndFile {
                    level: UpgradeConfig::default().log_level,
                };
                let failure = abort_before_start(
                    install_args.workspace_parent.as_deref(),
                    &log_target,
                    &executable,
                    err,
                );
                return Err(failure.into());
            }
        };
        let settings = install_args.settings(&config);

        let resources = install_args.resource_tree();
        let sources = UpgradeSources {
            resources: resources.as_ref(),
            copy_files: COPY_FILES,
            cache_intervals: CLEAR_BROWSER_CACHE,
        };

        UpgradeCoordinator::new(&settings, sources)
            .run(install_args.installed_version(), executable, prompt)
            .map(|_| ())
            .map_err(UpgradeError::from)
    }

    fn print_plan(install_args: &InstallationArgs) -> Result<(), UpgradeError> {
        let config = Self::load_config(install_args)?;
        let settings = install_args.settings(&config);
        let installed = install_args.installed_version().resolve(&settings)?;
        let window = UpgradeWindow::new(installed, install_args.executable_version()?)?;

        let resources = install_args.resource_tree();
        for line in plan_lines(&window, resources.as_ref(), COPY_FILES, CLEAR_BROWSER_CACHE)? {
            println!("{}", line);
        }
        Ok(())
    }
}

/// Describes the work an upgrade across `window` would do.
fn plan_lines(
    window: &UpgradeWindow,
    resources: &dyn ResourceTree,
    copy_files: &[FileCopyManifest],
    cache_intervals: &[CacheInterval],
) -> Result<Vec<String>, UpgradeError> {
    let mut lines = vec![format!(
        "Upgrade from v{} to v{}",
        window.installed(),
        window.executable()
    )];
    if window.is_noop() {
        lines.push("Nothing to upgrade.".to_owned());
        return Ok(lines);
    }

    let scripts = MigrationCatalog::new(resources).applicable_migrations(window, &SYSTEM_DB_SCRIPTS)?;
    if scripts.is_empty() {
        lines.push("SQL scripts: none".to_owned());
    } else {
        lines.push("SQL scripts:".to_owned());
        lines.extend(scripts.iter().map(|s| format!("  {}", s.path)));
    }

    let manifests = select_applicable(copy_files, window);
    if manifests.is_empty() {
        lines.push("File copies: none".to_owned());
    } else {
        lines.push("File copies:".to_owned());
        for manifest in &manifests {
            for (source, destination) in manifest.files {
                lines.push(format!("  {} -> {}", source, destination));
            }
        }
    }

    let advised = BrowserCacheAdvisory::new(cache_intervals).needed(window);
    lines.push(format!(
        "Browser cache clear: {}",
        if advised { "required" } else { "not required" }
    ));
    Ok(lines)
}
