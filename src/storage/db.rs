use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::debug;
use rusqlite::{Connection, OpenFlags};

use super::migrations;

pub const DB_FILE_NAME: &str = "sslreseller.sqlite";

/// Shared handle to the single SQLite connection holding canonical orders,
/// the legacy order tables, the product catalog and provider settings.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl Db {
    pub fn initialize_with_path(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

        let db_path = data_dir.join(DB_FILE_NAME);
        let flags = OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let conn = Connection::open_with_flags(&db_path, flags)
            .with_context(|| format!("cannot open order database {}", db_path.display()))?;

        Self::configure_connection(&conn)?;
        migrations::run_all(&conn)?;
        Self::restrict_permissions(&db_path)?;
        debug!("[db] opened {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(db_path),
        })
    }

    /// Private in-memory database, mostly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory SQLite")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|err| anyhow!("order db mutex poisoned: {err}"))
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("cannot set busy timeout on order database")?;
        Ok(())
    }

    /// Order payloads may contain contact details, so the file is owner-only.
    #[cfg(unix)]
    fn restrict_permissions(db_path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let mode = fs::metadata(db_path)?.permissions().mode();
        if mode & 0o077 != 0 {
            fs::set_permissions(db_path, fs::Permissions::from_mode(0o600))
                .with_context(|| format!("failed to restrict {}", db_path.display()))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn restrict_permissions(_db_path: &Path) -> Result<()> {
        Ok(())
    }
}
