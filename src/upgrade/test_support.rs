//! Builders for throwaway installations used across the upgrade tests.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tempfile::TempDir;

pub fn create_system_db(path: &Path, version: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE version (version TEXT NOT NULL, updated TIMESTAMP);
         CREATE TABLE teststep (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
         INSERT INTO teststep (name) VALUES ('Invoke SOAP endpoint');",
    )
    .unwrap();
    conn.execute(
        "INSERT INTO version (version, updated) VALUES (?1, '2020-01-01 00:00:00')",
        [version],
    )
    .unwrap();
}

/// Returns `(version, updated)` from the version table.
pub fn read_version_row(path: &Path) -> (String, String) {
    let conn = Connection::open(path).unwrap();
    conn.query_row("SELECT version, updated FROM version", [], |row| {
        Ok((row.get(0)?, row.get(1)?))
    })
    .unwrap()
}

/// Writes `db/<name>` under a resource tree root.
pub fn write_script(resources_root: &Path, name: &str, sql: &str) {
    let dir = resources_root.join("db");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(name), sql).unwrap();
}

/// An installation directory, a distribution directory next to it, a
/// resource tree and a parent for workspaces, all under one temp dir.
pub struct Installation {
    _dir: TempDir,
    pub home: PathBuf,
    pub dist: PathBuf,
    pub resources: PathBuf,
    pub workspaces: PathBuf,
}

pub const DB_URL: &str = "jdbc:h2:./database/irontest;IFEXISTS=TRUE";

impl Installation {
    /// Installation at `installed` with its executable, a distribution holding
    /// the `executable` artefact, and an empty resource tree.
    pub fn new(installed: &str, executable: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("irontest");
        let dist = dir.path().join("dist");
        let resources = dir.path().join("resources");
        let workspaces = dir.path().join("workspaces");
        for d in [&home, &dist, &resources, &workspaces] {
            fs::create_dir_all(d).unwrap();
        }

        create_system_db(&home.join("database").join("irontest.mv.db"), installed);
        fs::write(
            home.join(format!("irontest-{}.jar", installed)),
            format!("jar {}", installed),
        )
        .unwrap();
        fs::write(
            dist.join(format!("irontest-{}.jar", executable)),
            format!("jar {}", executable),
        )
        .unwrap();

        Self {
            _dir: dir,
            home,
            dist,
            resources,
            workspaces,
        }
    }

    pub fn live_db(&self) -> PathBuf {
        self.home.join("database").join("irontest.mv.db")
    }

    pub fn jars(&self) -> Vec<String> {
        let mut jars: Vec<String> = fs::read_dir(&self.home)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("irontest-") && name.ends_with(".jar"))
            .collect();
        jars.sort();
        jars
    }

    pub fn workspace_roots(&self) -> Vec<PathBuf> {
        fs::read_dir(&self.workspaces)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect()
    }
}
