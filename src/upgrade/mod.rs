pub mod advisory;
pub mod catalog;
pub mod coordinator;
pub mod database;
pub mod executable;
pub mod files;
pub mod prompt;
pub mod workspace;

#[cfg(test)]
pub(crate) mod test_support;

pub use coordinator::{UpgradeCoordinator, UpgradeSettings, UpgradeSources};
