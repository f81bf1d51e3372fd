use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::UpgradeError;

/// Upgrade settings, layered as: built-in defaults, then
/// `<home>/upgrade.toml`, then `IRONTEST_UPGRADE_*` environment variables.
/// Command line flags are applied on top by the caller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UpgradeConfig {
    pub product_name: String,
    pub executable_extension: String,
    pub log_level: String,
    pub db_user: String,
    pub db_password: String,
    pub dist_root: PathBuf,
    pub workspace_parent: Option<PathBuf>,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        UpgradeConfig {
            product_name: Self::PRODUCT_NAME.to_owned(),
            executable_extension: Self::EXECUTABLE_EXTENSION.to_owned(),
            log_level: Self::LOG_LEVEL.to_owned(),
            db_user: "sa".to_owned(),
            db_password: String::new(),
            dist_root: PathBuf::from("."),
            workspace_parent: None,
        }
    }
}

impl UpgradeConfig {
    pub const CONFIG_FILE: &str = "upgrade.toml";
    pub const ENV_PREFIX: &str = "IRONTEST_UPGRADE_";

    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const LOG_LEVEL: &str = "info";
    const PRODUCT_NAME: &str = "irontest";
    const EXECUTABLE_EXTENSION: &str = "jar";

    pub fn figment(home: &Path) -> Figment {
        Figment::from(Serialized::defaults(UpgradeConfig::default()))
            .merge(Toml::file(home.join(Self::CONFIG_FILE)))
            .merge(Env::prefixed(Self::ENV_PREFIX))
    }

    pub fn load(home: &Path) -> Result<Self, UpgradeError> {
        let mut config: UpgradeConfig = Self::figment(home).extract()?;
        config.ensure_valid();
        Ok(config)
    }

    fn ensure_valid(&mut self) {
        // Bad values fall back to defaults rather than failing: none of them
        // can make the upgrade itself unsafe
        let str_original = self.log_level.clone();
        self.log_level = self.log_level.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.log_level.as_str()) {
            eprintln!(
                "Config error: log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::LOG_LEVEL
            );
            self.log_level = Self::LOG_LEVEL.to_owned();
        }

        if self.product_name.trim().is_empty() {
            eprintln!(
                "Config error: product name is empty - using default of '{}'",
                Self::PRODUCT_NAME
            );
            self.product_name = Self::PRODUCT_NAME.to_owned();
        }

        let extension = self.executable_extension.trim().trim_start_matches('.');
        if extension.is_empty() {
            eprintln!(
                "Config error: executable extension is empty - using default of '{}'",
                Self::EXECUTABLE_EXTENSION
            );
            self.executable_extension = Self::EXECUTABLE_EXTENSION.to_owned();
        } else {
            self.executable_extension = extension.to_owned();
        }
    }

    /// The effective configuration as TOML, with the password masked.
    pub fn to_display_toml(&self) -> Result<String, UpgradeError> {
        let mut shown = self.clone();
        if !shown.db_password.is_empty() {
            shown.db_password = "********".to_owned();
        }
        toml::to_string_pretty(&shown)
            .map_err(|e| UpgradeError::precondition(format!("Failed to serialize config: {}", e)))
    }
}
