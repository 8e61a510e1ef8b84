use std::collections::BTreeMap;

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{Datom, EntityId, SchemaAttribute, TxId, TxOp, TxReport, Value};

mod sqlite;

pub use sqlite::{SqliteConnection, SqliteEngine, TX0};

/// Database lifecycle operations the harness needs from an engine.
pub trait DatomEngine {
    type Connection: DatomConnection;

    fn database_exists(&self, config: &DatabaseConfig) -> Result<bool>;

    /// Fails with `Conflict` when a database with this name already exists.
    fn create_database(&self, config: &DatabaseConfig) -> Result<()>;

    /// Idempotent: deleting a missing database succeeds.
    fn delete_database(&self, config: &DatabaseConfig) -> Result<()>;

    fn connect(&self, config: &DatabaseConfig) -> Result<Self::Connection>;
}

pub trait DatomConnection {
    fn transact(&mut self, ops: &[TxOp]) -> Result<TxReport>;

    fn pull(&self, entity: EntityId, attribute: &str) -> Result<Option<Value>>;

    /// Full history in EAVT order, retractions included.
    fn history_datoms(&self) -> Result<Vec<Datom>>;

    fn max_tx(&self) -> Result<TxId>;

    fn set_max_tx(&mut self, tx: TxId) -> Result<()>;

    fn max_eid(&self) -> Result<EntityId>;

    /// Inserts historical datoms verbatim. Never advances the tx counter.
    fn load_datoms(&mut self, datoms: &[Datom]) -> Result<()>;

    fn schema(&self) -> Result<BTreeMap<String, SchemaAttribute>>;

    fn release(self) -> Result<()>
    where
        Self: Sized;
}
