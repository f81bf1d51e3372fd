use std::fmt;
use std::path::{Path, PathBuf};

use log::{info, Level};
use logging_timer::timer;
use rusqlite::{Connection, OpenFlags};

use crate::error::UpgradeError;
use crate::upgrade::catalog::{MigrationCatalog, MigrationResource};
use crate::version::Version;

const URL_SCHEMES: [&str; 3] = ["jdbc:h2:", "jdbc:sqlite:", "sqlite:"];
const DB_FILE_SUFFIX: &str = ".mv.db";

/// Location of the system database as given on the command line, e.g.
/// `jdbc:h2:./database/irontest;IFEXISTS=TRUE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseUrl {
    base_name: String,
}

impl DatabaseUrl {
    pub fn parse(url: &str) -> Result<Self, UpgradeError> {
        // Option lists after ';' don't affect where the file is
        let base = url.split(';').next().unwrap_or_default().trim();
        let path = URL_SCHEMES
            .iter()
            .find_map(|scheme| base.strip_prefix(scheme))
            .unwrap_or(base);
        let base_name = path
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .trim_end_matches(DB_FILE_SUFFIX);

        if base_name.is_empty() {
            return Err(UpgradeError::precondition(format!(
                "database URL '{}' does not name a database file",
                url
            )));
        }

        Ok(Self {
            base_name: base_name.to_owned(),
        })
    }

    /// File name of the database inside `<home>/database/`.
    pub fn file_name(&self) -> String {
        format!("{}{}", self.base_name, DB_FILE_SUFFIX)
    }

    pub fn live_path(&self, home: &Path) -> PathBuf {
        home.join("database").join(self.file_name())
    }
}

#[derive(Clone, Default)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Opens connections to existing system database files.
///
/// SQLite has no user accounts, so credentials are only carried along for
/// logging.
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    credentials: Credentials,
}

impl ConnectionFactory {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Opens `path` read-write. Never creates the file: a missing database is
    /// an error, not an empty database.
    pub fn open_existing(&self, path: &Path) -> Result<Connection, UpgradeError> {
        if !path.is_file() {
            return Err(UpgradeError::precondition(format!(
                "database file {} does not exist",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        log::debug!(
            "Opened {} as user '{}'",
            path.display(),
            self.credentials.user
        );
        Ok(conn)
    }

    /// Reads the single row of the `version` table.
    pub fn read_version(&self, path: &Path) -> Result<Version, UpgradeError> {
        let conn = self.open_existing(path)?;
        let rows: Vec<String> = {
            let mut stmt = conn.prepare("SELECT version FROM version")?;
            let rows = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            rows
        };
        close(conn)?;

        match rows.as_slice() {
            [version] => Version::parse(version),
            _ => Err(UpgradeError::precondition(format!(
                "version table in {} has {} rows, expected exactly one",
                path.display(),
                rows.len()
            ))),
        }
    }
}

fn close(conn: Connection) -> Result<(), UpgradeError> {
    conn.close().map_err(|(_, e)| UpgradeError::DatabaseError(e))
}

/// Applies SQL migration scripts to a staged copy of the system database.
pub struct DatabaseMigrator<'a> {
    catalog: &'a MigrationCatalog<'a>,
    connections: &'a ConnectionFactory,
}

impl<'a> DatabaseMigrator<'a> {
    pub fn new(catalog: &'a MigrationCatalog<'a>, connections: &'a ConnectionFactory) -> Self {
        Self {
            catalog,
            connections,
        }
    }

    /// Runs `scripts` in order, each in its own transaction, then stamps the
    /// version row with `target`. Stops at the first failing script; the
    /// staged file is left as it is for inspection.
    pub fn migrate(
        &self,
        staged_db: &Path,
        scripts: &[MigrationResource],
        target: &Version,
    ) -> Result<(), UpgradeError> {
        let mut conn = self.connections.open_existing(staged_db)?;

        for script in scripts {
            let sql = self.catalog.load(script)?;
            let _tmr = timer!(Level::Debug; "DatabaseMigrator::execute_script", "{}", script.path);

            let tx = conn
                .transaction()
                .map_err(|e| UpgradeError::migration(&script.path, e))?;
            tx.execute_batch(&sql)
                .map_err(|e| UpgradeError::migration(&script.path, e))?;
            tx.commit()
                .map_err(|e| UpgradeError::migration(&script.path, e))?;

            info!(
                "Executed SQL script {} in {}.",
                script.path,
                staged_db.display()
            );
        }

        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE version SET version = ?1, updated = CURRENT_TIMESTAMP",
            [target.to_string()],
        )?;
        if updated != 1 {
            return Err(UpgradeError::migration(
                "version stamp",
                format!("expected to update exactly one version row, updated {}", updated),
            ));
        }
        tx.commit()?;
        info!("Updated Version to {} in {}.", target, staged_db.display());

        close(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::upgrade::catalog::{DirectoryResources, SYSTEM_DB_SCRIPTS};
    use crate::upgrade::test_support::{create_system_db, read_version_row, write_script};
    use crate::version::UpgradeWindow;
    use chrono::{NaiveDateTime, Utc};

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_url_parsing() {
        let url = DatabaseUrl::parse("jdbc:h2:./database/irontest;IFEXISTS=TRUE;AUTO_SERVER=TRUE").unwrap();
        assert_eq!(url.file_name(), "irontest.mv.db");

        let url = DatabaseUrl::parse(r"jdbc:h2:C:\irontest\database\systemdb").unwrap();
        assert_eq!(url.file_name(), "systemdb.mv.db");

        let url = DatabaseUrl::parse("sqlite:/opt/irontest/database/irontest.mv.db").unwrap();
        assert_eq!(url.file_name(), "irontest.mv.db");
        assert_eq!(
            url.live_path(Path::new("/opt/irontest")),
            Path::new("/opt/irontest/database/irontest.mv.db")
        );
    }

    #[test]
    fn test_url_without_file_rejected() {
        assert!(DatabaseUrl::parse("jdbc:h2:./database/;IFEXISTS=TRUE").is_err());
        assert!(DatabaseUrl::parse("").is_err());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials {
            user: "sa".into(),
            password: "secret".into(),
        };
        let debug = format!("{:?}", creds);
        assert!(debug.contains("sa"));
        assert!(!debug.contains("secret"));
    }

    #[test]
    fn test_open_existing_never_creates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.mv.db");
        let factory = ConnectionFactory::new(Credentials::default());
        assert!(factory.open_existing(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_read_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("irontest.mv.db");
        create_system_db(&path, "1.0.0");
        let factory = ConnectionFactory::new(Credentials::default());
        assert_eq!(factory.read_version(&path).unwrap(), v("1.0.0"));
    }

    #[test]
    fn test_read_version_requires_single_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("irontest.mv.db");
        create_system_db(&path, "1.0.0");
        let conn = Connection::open(&path).unwrap();
        conn.execute("INSERT INTO version (version) VALUES ('1.1.0')", [])
            .unwrap();
        drop(conn);

        let factory = ConnectionFactory::new(Credentials::default());
        let err = factory.read_version(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailure);
    }

    #[test]
    fn test_migrate_applies_scripts_in_order_and_stamps_version() {
        let dir = tempfile::tempdir().unwrap();
        let resources_root = dir.path().join("resources");
        write_script(
            &resources_root,
            "SystemDB_1_0_0_To_1_1_0.sql",
            "ALTER TABLE teststep ADD COLUMN description TEXT;",
        );
        write_script(
            &resources_root,
            "SystemDB_1_1_0_To_1_2_0.sql",
            "UPDATE teststep SET description = 'migrated'; CREATE TABLE endpoint (id INTEGER PRIMARY KEY);",
        );
        let db_path = dir.path().join("irontest.mv.db");
        create_system_db(&db_path, "1.0.0");

        let resources = DirectoryResources::new(&resources_root);
        let catalog = MigrationCatalog::new(&resources);
        let window = UpgradeWindow::new(v("1.0.0"), v("1.2.0")).unwrap();
        let scripts = catalog
            .applicable_migrations(&window, &SYSTEM_DB_SCRIPTS)
            .unwrap();
        let factory = ConnectionFactory::new(Credentials::default());

        let started = Utc::now().naive_utc() - chrono::Duration::seconds(1);
        DatabaseMigrator::new(&catalog, &factory)
            .migrate(&db_path, &scripts, &v("1.2.0"))
            .unwrap();

        let (version, updated) = read_version_row(&db_path);
        assert_eq!(version, "1.2.0");
        let updated = NaiveDateTime::parse_from_str(&updated, "%Y-%m-%d %H:%M:%S").unwrap();
        assert!(updated >= started);

        let conn = Connection::open(&db_path).unwrap();
        let description: String = conn
            .query_row("SELECT description FROM teststep LIMIT 1", [], |row| row.get(0))
            .unwrap();
        assert_eq!(description, "migrated");
    }

    #[test]
    fn test_failing_script_rolls_back_its_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let resources_root = dir.path().join("resources");
        write_script(
            &resources_root,
            "SystemDB_1_0_0_To_1_1_0.sql",
            "CREATE TABLE dataset (id INTEGER PRIMARY KEY); INSERT INTO no_such_table VALUES (1);",
        );
        let db_path = dir.path().join("irontest.mv.db");
        create_system_db(&db_path, "1.0.0");

        let resources = DirectoryResources::new(&resources_root);
        let catalog = MigrationCatalog::new(&resources);
        let window = UpgradeWindow::new(v("1.0.0"), v("1.1.0")).unwrap();
        let scripts = catalog
            .applicable_migrations(&window, &SYSTEM_DB_SCRIPTS)
            .unwrap();
        let factory = ConnectionFactory::new(Credentials::default());

        let err = DatabaseMigrator::new(&catalog, &factory)
            .migrate(&db_path, &scripts, &v("1.1.0"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MigrationFailure);
        assert!(err.to_string().contains("SystemDB_1_0_0_To_1_1_0.sql"));

        let conn = Connection::open(&db_path).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name='dataset'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);
        drop(conn);
        assert_eq!(read_version_row(&db_path).0, "1.0.0");
    }

    #[test]
    fn test_missing_version_row_is_migration_failure() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("irontest.mv.db");
        create_system_db(&db_path, "1.0.0");
        Connection::open(&db_path)
            .unwrap()
            .execute("DELETE FROM version", [])
            .unwrap();

        let resources = DirectoryResources::new(dir.path().join("resources"));
        let catalog = MigrationCatalog::new(&resources);
        let factory = ConnectionFactory::new(Credentials::default());
        let err = DatabaseMigrator::new(&catalog, &factory)
            .migrate(&db_path, &[], &v("1.1.0"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MigrationFailure);
    }
}
