//! Test engine that loses upserts once the installed schema is large enough.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::config::DatabaseConfig;
use crate::engine::{DatomConnection, DatomEngine, SqliteConnection, SqliteEngine};
use crate::error::{ReproError, Result};
use crate::models::{Datom, EntityId, SchemaAttribute, TxId, TxOp, TxReport, Value};

#[derive(Debug, Default)]
pub(crate) struct EngineEvents {
    pub(crate) created: Vec<String>,
    pub(crate) deleted: Vec<String>,
    pub(crate) released: usize,
}

/// Drops upserts of an attribute that already has `kept_versions` or more prior
/// versions when `installed > threshold`, i.e. when the bloat size is at least
/// `threshold`. The default of 3 trips both probe checks.
#[derive(Debug, Clone)]
pub(crate) struct StaleUpsertEngine {
    inner: SqliteEngine,
    threshold: usize,
    kept_versions: usize,
    fail_schema: bool,
    pub(crate) events: Rc<RefCell<EngineEvents>>,
}

impl StaleUpsertEngine {
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            inner: SqliteEngine,
            threshold,
            kept_versions: 3,
            fail_schema: false,
            events: Rc::new(RefCell::new(EngineEvents::default())),
        }
    }

    /// With 5, the first probe sequence survives and only the second check fails.
    pub(crate) fn keeping_versions(self, kept_versions: usize) -> Self {
        Self {
            kept_versions,
            ..self
        }
    }

    pub(crate) fn failing_schema() -> Self {
        Self {
            fail_schema: true,
            ..Self::new(usize::MAX)
        }
    }
}

impl DatomEngine for StaleUpsertEngine {
    type Connection = StaleUpsertConnection;

    fn database_exists(&self, config: &DatabaseConfig) -> Result<bool> {
        self.inner.database_exists(config)
    }

    fn create_database(&self, config: &DatabaseConfig) -> Result<()> {
        self.events.borrow_mut().created.push(config.name.clone());
        self.inner.create_database(config)
    }

    fn delete_database(&self, config: &DatabaseConfig) -> Result<()> {
        self.events.borrow_mut().deleted.push(config.name.clone());
        self.inner.delete_database(config)
    }

    fn connect(&self, config: &DatabaseConfig) -> Result<StaleUpsertConnection> {
        Ok(StaleUpsertConnection {
            inner: self.inner.connect(config)?,
            threshold: self.threshold,
            kept_versions: self.kept_versions,
            fail_schema: self.fail_schema,
            installed: 0,
            versions: BTreeMap::new(),
            events: Rc::clone(&self.events),
        })
    }
}

#[derive(Debug)]
pub(crate) struct StaleUpsertConnection {
    inner: SqliteConnection,
    threshold: usize,
    kept_versions: usize,
    fail_schema: bool,
    installed: usize,
    versions: BTreeMap<String, usize>,
    events: Rc<RefCell<EngineEvents>>,
}

impl DatomConnection for StaleUpsertConnection {
    fn transact(&mut self, ops: &[TxOp]) -> Result<TxReport> {
        let installs = ops
            .iter()
            .filter(|op| matches!(op, TxOp::InstallAttribute(_)))
            .count();
        if installs > 0 && self.fail_schema {
            return Err(ReproError::Sqlite(rusqlite::Error::InvalidQuery));
        }
        self.installed += installs;

        let mut kept = Vec::with_capacity(ops.len());
        for op in ops {
            if let TxOp::Upsert { attribute, .. } = op {
                let prior = self.versions.entry(attribute.clone()).or_insert(0);
                let stale = self.installed > self.threshold && *prior >= self.kept_versions;
                *prior += 1;
                if stale {
                    continue;
                }
            }
            kept.push(op.clone());
        }
        self.inner.transact(&kept)
    }

    fn pull(&self, entity: EntityId, attribute: &str) -> Result<Option<Value>> {
        self.inner.pull(entity, attribute)
    }

    fn history_datoms(&self) -> Result<Vec<Datom>> {
        self.inner.history_datoms()
    }

    fn max_tx(&self) -> Result<TxId> {
        self.inner.max_tx()
    }

    fn set_max_tx(&mut self, tx: TxId) -> Result<()> {
        self.inner.set_max_tx(tx)
    }

    fn max_eid(&self) -> Result<EntityId> {
        self.inner.max_eid()
    }

    fn load_datoms(&mut self, datoms: &[Datom]) -> Result<()> {
        self.installed += datoms
            .iter()
            .filter(|datom| datom.attribute == "db/ident")
            .count();
        self.inner.load_datoms(datoms)
    }

    fn schema(&self) -> Result<BTreeMap<String, SchemaAttribute>> {
        self.inner.schema()
    }

    fn release(self) -> Result<()> {
        self.events.borrow_mut().released += 1;
        self.inner.release()
    }
}
