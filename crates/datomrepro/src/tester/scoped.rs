use tracing::warn;

use crate::config::DatabaseConfig;
use crate::engine::{DatomConnection, DatomEngine};
use crate::error::{ReproError, Result};

/// A freshly created database owned by one run.
///
/// Acquiring deletes whatever is left under the name and creates it again. The
/// connection is released and the database deleted on `teardown`, or on drop if
/// `teardown` was never reached.
pub struct ScopedDatabase<'e, E: DatomEngine> {
    engine: &'e E,
    config: DatabaseConfig,
    conn: Option<E::Connection>,
    torn_down: bool,
}

impl<E: DatomEngine> std::fmt::Debug for ScopedDatabase<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedDatabase")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<'e, E: DatomEngine> ScopedDatabase<'e, E> {
    pub fn acquire(engine: &'e E, config: DatabaseConfig) -> Result<Self> {
        engine
            .delete_database(&config)
            .map_err(|err| ReproError::setup("delete stale database", err))?;
        engine
            .create_database(&config)
            .map_err(|err| ReproError::setup("create database", err))?;

        let mut scoped = Self {
            engine,
            config,
            conn: None,
            torn_down: false,
        };
        // On connect failure the guard drops here and deletes the new database.
        let conn = engine
            .connect(&scoped.config)
            .map_err(|err| ReproError::setup("connect", err))?;
        scoped.conn = Some(conn);
        Ok(scoped)
    }

    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn connection(&mut self) -> Result<&mut E::Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| ReproError::Internal("scoped database has no connection".to_string()))
    }

    pub fn teardown(mut self) -> Result<()> {
        self.release_and_delete()
    }

    fn release_and_delete(&mut self) -> Result<()> {
        if self.torn_down {
            return Ok(());
        }
        self.torn_down = true;

        let released = match self.conn.take() {
            Some(conn) => conn.release(),
            None => Ok(()),
        };
        let deleted = self.engine.delete_database(&self.config);
        released.map_err(|err| ReproError::setup("release connection", err))?;
        deleted.map_err(|err| ReproError::setup("delete database", err))
    }
}

impl<E: DatomEngine> Drop for ScopedDatabase<'_, E> {
    fn drop(&mut self) {
        if let Err(err) = self.release_and_delete() {
            warn!(database = %self.config.name, error = %err, "scoped database cleanup failed");
        }
    }
}
