use std::collections::BTreeMap;
use std::path::PathBuf;

use rusqlite::{Connection, OptionalExtension, params};

use crate::config::DatabaseConfig;
use crate::error::{ReproError, Result};
use crate::models::{
    Cardinality, Datom, EntityId, EntityRef, SchemaAttribute, TxId, TxOp, TxReport, Uniqueness,
    Value, ValueType,
};

use super::{DatomConnection, DatomEngine};

/// Initial tx counter; the first transaction is assigned `TX0 + 1`.
pub const TX0: TxId = 536_870_912;

const ATTR_IDENT: &str = "db/ident";
const ATTR_VALUE_TYPE: &str = "db/valueType";
const ATTR_CARDINALITY: &str = "db/cardinality";
const ATTR_UNIQUE: &str = "db/unique";
const ATTR_INDEX: &str = "db/index";
const SYSTEM_NAMESPACE: &str = "db/";

const META_MAX_TX: &str = "max_tx";
const META_MAX_EID: &str = "max_eid";

const ENGINE_SCHEMA_SQL: &str = r"
    CREATE TABLE IF NOT EXISTS datoms (
        e INTEGER NOT NULL,
        a TEXT NOT NULL,
        v TEXT NOT NULL,
        tx INTEGER NOT NULL,
        added INTEGER NOT NULL,
        PRIMARY KEY (e, a, v, tx, added)
    );

    CREATE INDEX IF NOT EXISTS idx_datoms_avet
    ON datoms(a, v, e);

    CREATE TABLE IF NOT EXISTS engine_meta (
        key TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    );
";

/// Reference engine: one SQLite file per database name under `DatabaseConfig::dir`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteEngine;

impl SqliteEngine {
    fn database_path(config: &DatabaseConfig) -> Result<PathBuf> {
        config.validate()?;
        Ok(config.dir.join(format!("{}.sqlite3", config.name.trim())))
    }
}

fn sidecar_paths(path: &std::path::Path) -> Vec<PathBuf> {
    ["-journal", "-wal", "-shm"]
        .iter()
        .map(|suffix| {
            let mut os = path.as_os_str().to_os_string();
            os.push(suffix);
            PathBuf::from(os)
        })
        .collect()
}

impl DatomEngine for SqliteEngine {
    type Connection = SqliteConnection;

    fn database_exists(&self, config: &DatabaseConfig) -> Result<bool> {
        Ok(Self::database_path(config)?.exists())
    }

    fn create_database(&self, config: &DatabaseConfig) -> Result<()> {
        let path = Self::database_path(config)?;
        if path.exists() {
            return Err(ReproError::Conflict(format!(
                "database already exists: {}",
                config.name
            )));
        }
        std::fs::create_dir_all(&config.dir)?;
        let conn = Connection::open(&path)?;
        conn.execute_batch(ENGINE_SCHEMA_SQL)?;
        conn.execute(
            "INSERT INTO engine_meta(key, value) VALUES (?1, ?2), (?3, ?4)",
            params![META_MAX_TX, TX0, META_MAX_EID, 0_i64],
        )?;
        conn.close().map_err(|(_, err)| err)?;
        Ok(())
    }

    fn delete_database(&self, config: &DatabaseConfig) -> Result<()> {
        let path = Self::database_path(config)?;
        let mut candidates = sidecar_paths(&path);
        candidates.push(path);
        for candidate in candidates {
            match std::fs::remove_file(&candidate) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn connect(&self, config: &DatabaseConfig) -> Result<SqliteConnection> {
        let path = Self::database_path(config)?;
        if !path.exists() {
            return Err(ReproError::NotFound(format!("database {}", config.name)));
        }
        let conn = Connection::open(&path)?;
        Ok(SqliteConnection { conn, schema: None })
    }
}

pub struct SqliteConnection {
    conn: Connection,
    schema: Option<BTreeMap<String, SchemaAttribute>>,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection").finish_non_exhaustive()
    }
}

impl DatomConnection for SqliteConnection {
    fn transact(&mut self, ops: &[TxOp]) -> Result<TxReport> {
        let mut schema = match self.schema.take() {
            Some(schema) => schema,
            None => load_schema(&self.conn)?,
        };
        let report = apply_transaction(&mut self.conn, &mut schema, ops)?;
        self.schema = Some(schema);
        Ok(report)
    }

    fn pull(&self, entity: EntityId, attribute: &str) -> Result<Option<Value>> {
        Ok(current_values(&self.conn, entity, attribute)?
            .pop()
            .map(|(value, _)| value))
    }

    fn history_datoms(&self) -> Result<Vec<Datom>> {
        let mut stmt = self
            .conn
            .prepare("SELECT e, a, v, tx, added FROM datoms ORDER BY e, a, v, tx, added")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (entity, attribute, raw_value, tx, added) = row?;
            out.push(Datom {
                entity,
                attribute,
                value: serde_json::from_str(&raw_value)?,
                tx,
                added,
            });
        }
        Ok(out)
    }

    fn max_tx(&self) -> Result<TxId> {
        read_meta(&self.conn, META_MAX_TX)
    }

    fn set_max_tx(&mut self, tx: TxId) -> Result<()> {
        write_meta(&self.conn, META_MAX_TX, tx)
    }

    fn max_eid(&self) -> Result<EntityId> {
        read_meta(&self.conn, META_MAX_EID)
    }

    fn load_datoms(&mut self, datoms: &[Datom]) -> Result<()> {
        let db_tx = self.conn.transaction()?;
        let mut max_eid = read_meta(&db_tx, META_MAX_EID)?;
        for datom in datoms {
            insert_datom(&db_tx, datom)?;
            max_eid = max_eid.max(datom.entity);
        }
        write_meta(&db_tx, META_MAX_EID, max_eid)?;
        db_tx.commit()?;
        self.schema = None;
        Ok(())
    }

    fn schema(&self) -> Result<BTreeMap<String, SchemaAttribute>> {
        match &self.schema {
            Some(schema) => Ok(schema.clone()),
            None => load_schema(&self.conn),
        }
    }

    fn release(self) -> Result<()> {
        self.conn.close().map_err(|(_, err)| ReproError::from(err))
    }
}

fn read_meta(conn: &Connection, key: &str) -> Result<i64> {
    conn.query_row(
        "SELECT value FROM engine_meta WHERE key = ?1",
        params![key],
        |row| row.get::<_, i64>(0),
    )
    .optional()?
    .ok_or_else(|| ReproError::Internal(format!("engine metadata missing: {key}")))
}

fn write_meta(conn: &Connection, key: &str, value: i64) -> Result<()> {
    conn.execute(
        "UPDATE engine_meta SET value = ?1 WHERE key = ?2",
        params![value, key],
    )?;
    Ok(())
}

fn insert_datom(conn: &Connection, datom: &Datom) -> Result<()> {
    conn.execute(
        "INSERT INTO datoms(e, a, v, tx, added) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            datom.entity,
            datom.attribute,
            serde_json::to_string(&datom.value)?,
            datom.tx,
            datom.added
        ],
    )?;
    Ok(())
}

/// Live values of `(entity, attribute)` ordered by the tx that asserted them.
fn current_values(conn: &Connection, entity: EntityId, attribute: &str) -> Result<Vec<(Value, TxId)>> {
    let mut stmt = conn.prepare_cached(
        "SELECT v, tx, added FROM datoms WHERE e = ?1 AND a = ?2 ORDER BY tx ASC, added ASC",
    )?;
    let rows = stmt.query_map(params![entity, attribute], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, bool>(2)?,
        ))
    })?;

    let mut live = BTreeMap::<Value, TxId>::new();
    for row in rows {
        let (raw_value, tx, added) = row?;
        let value: Value = serde_json::from_str(&raw_value)?;
        if added {
            live.insert(value, tx);
        } else {
            live.remove(&value);
        }
    }

    let mut out = live.into_iter().collect::<Vec<_>>();
    out.sort_by_key(|(_, tx)| *tx);
    Ok(out)
}

fn entities_with_value(conn: &Connection, attribute: &str, value: &Value) -> Result<Vec<EntityId>> {
    let candidates = {
        let mut stmt =
            conn.prepare_cached("SELECT DISTINCT e FROM datoms WHERE a = ?1 AND v = ?2 ORDER BY e")?;
        let rows = stmt.query_map(params![attribute, serde_json::to_string(value)?], |row| {
            row.get::<_, i64>(0)
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut owners = Vec::new();
    for entity in candidates {
        if current_values(conn, entity, attribute)?
            .iter()
            .any(|(live, _)| live == value)
        {
            owners.push(entity);
        }
    }
    Ok(owners)
}

fn keyword_value(entity: EntityId, attribute: &str, value: Option<Value>) -> Result<Option<String>> {
    match value {
        None => Ok(None),
        Some(Value::Keyword(keyword)) => Ok(Some(keyword)),
        Some(other) => Err(ReproError::Validation(format!(
            "entity {entity} has non-keyword {attribute}: {other}"
        ))),
    }
}

fn load_schema(conn: &Connection) -> Result<BTreeMap<String, SchemaAttribute>> {
    let entities = {
        let mut stmt = conn.prepare("SELECT DISTINCT e FROM datoms WHERE a = ?1 ORDER BY e")?;
        let rows = stmt.query_map(params![ATTR_IDENT], |row| row.get::<_, i64>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut schema = BTreeMap::new();
    for entity in entities {
        let read = |attribute: &str| -> Result<Option<Value>> {
            Ok(current_values(conn, entity, attribute)?
                .pop()
                .map(|(value, _)| value))
        };
        let Some(ident) = keyword_value(entity, ATTR_IDENT, read(ATTR_IDENT)?)? else {
            continue;
        };
        let value_type = keyword_value(entity, ATTR_VALUE_TYPE, read(ATTR_VALUE_TYPE)?)?
            .ok_or_else(|| ReproError::Validation(format!("attribute {ident} has no value type")))?;
        let cardinality = keyword_value(entity, ATTR_CARDINALITY, read(ATTR_CARDINALITY)?)?
            .ok_or_else(|| ReproError::Validation(format!("attribute {ident} has no cardinality")))?;
        let unique = keyword_value(entity, ATTR_UNIQUE, read(ATTR_UNIQUE)?)?
            .map(|raw| Uniqueness::parse(&raw))
            .transpose()?;
        let indexed = matches!(read(ATTR_INDEX)?, Some(Value::Boolean(true)));

        schema.insert(
            ident.clone(),
            SchemaAttribute {
                ident,
                value_type: ValueType::parse(&value_type)?,
                cardinality: Cardinality::parse(&cardinality)?,
                unique,
                indexed,
            },
        );
    }
    Ok(schema)
}

struct TxState {
    tx: TxId,
    max_eid: EntityId,
    tempids: BTreeMap<String, EntityId>,
    datoms: Vec<Datom>,
    asserted: BTreeMap<(EntityId, String), Value>,
}

impl TxState {
    fn record(&mut self, conn: &Connection, datom: Datom) -> Result<()> {
        insert_datom(conn, &datom)?;
        self.datoms.push(datom);
        Ok(())
    }

    fn allocate(&mut self) -> Result<EntityId> {
        self.max_eid = self
            .max_eid
            .checked_add(1)
            .ok_or_else(|| ReproError::Internal("entity id space exhausted".to_string()))?;
        Ok(self.max_eid)
    }
}

fn apply_transaction(
    conn: &mut Connection,
    schema: &mut BTreeMap<String, SchemaAttribute>,
    ops: &[TxOp],
) -> Result<TxReport> {
    let db_tx = conn.transaction()?;
    let tx = read_meta(&db_tx, META_MAX_TX)?
        .checked_add(1)
        .ok_or_else(|| ReproError::Internal("tx id space exhausted".to_string()))?;
    let mut state = TxState {
        tx,
        max_eid: read_meta(&db_tx, META_MAX_EID)?,
        tempids: BTreeMap::new(),
        datoms: Vec::new(),
        asserted: BTreeMap::new(),
    };

    bind_identity_tempids(&db_tx, schema, ops, &mut state)?;

    for op in ops {
        match op {
            TxOp::InstallAttribute(attribute) => {
                install_attribute(&db_tx, schema, attribute, &mut state)?;
            }
            TxOp::Upsert {
                entity,
                attribute,
                value,
            } => {
                let installed = installed_attribute(schema, attribute, value)?;
                let entity = resolve_entity(&db_tx, schema, entity, &mut state)?;
                assert_value(&db_tx, &installed, entity, value, &mut state)?;
            }
            TxOp::Retract {
                entity,
                attribute,
                value,
            } => {
                installed_attribute(schema, attribute, value)?;
                if matches!(entity, EntityRef::TempId(_)) {
                    return Err(ReproError::Validation(
                        "cannot retract from a temp id".to_string(),
                    ));
                }
                let entity = resolve_entity(&db_tx, schema, entity, &mut state)?;
                if current_values(&db_tx, entity, attribute)?
                    .iter()
                    .any(|(live, _)| live == value)
                {
                    let datom = Datom::retraction(entity, attribute.clone(), value.clone(), state.tx);
                    state.record(&db_tx, datom)?;
                }
            }
        }
    }

    write_meta(&db_tx, META_MAX_TX, state.tx)?;
    write_meta(&db_tx, META_MAX_EID, state.max_eid)?;
    db_tx.commit()?;

    Ok(TxReport {
        tx: state.tx,
        tempids: state.tempids,
        datoms: state.datoms,
    })
}

/// A temp id asserted with a unique-identity value that already exists becomes that entity.
fn bind_identity_tempids(
    conn: &Connection,
    schema: &BTreeMap<String, SchemaAttribute>,
    ops: &[TxOp],
    state: &mut TxState,
) -> Result<()> {
    for op in ops {
        let TxOp::Upsert {
            entity: EntityRef::TempId(label),
            attribute,
            value,
        } = op
        else {
            continue;
        };
        let is_identity = schema
            .get(attribute)
            .is_some_and(|installed| installed.unique == Some(Uniqueness::Identity));
        if !is_identity {
            continue;
        }
        if let Some(owner) = entities_with_value(conn, attribute, value)?.first().copied() {
            match state.tempids.get(label) {
                Some(bound) if *bound != owner => {
                    return Err(ReproError::Conflict(format!(
                        "temp id {label} resolves to both {bound} and {owner}"
                    )));
                }
                _ => {
                    state.tempids.insert(label.clone(), owner);
                }
            }
        }
    }
    Ok(())
}

fn installed_attribute(
    schema: &BTreeMap<String, SchemaAttribute>,
    attribute: &str,
    value: &Value,
) -> Result<SchemaAttribute> {
    let installed = schema
        .get(attribute)
        .ok_or_else(|| ReproError::Validation(format!("unknown attribute: {attribute}")))?;
    if value.value_type() != installed.value_type {
        return Err(ReproError::Validation(format!(
            "attribute {attribute} expects {}, got {value}",
            installed.value_type.as_str()
        )));
    }
    Ok(installed.clone())
}

fn resolve_entity(
    conn: &Connection,
    schema: &BTreeMap<String, SchemaAttribute>,
    entity: &EntityRef,
    state: &mut TxState,
) -> Result<EntityId> {
    match entity {
        EntityRef::Id(id) => {
            if *id <= 0 || *id > state.max_eid {
                return Err(ReproError::NotFound(format!("entity {id}")));
            }
            Ok(*id)
        }
        EntityRef::TempId(label) => {
            if let Some(bound) = state.tempids.get(label) {
                return Ok(*bound);
            }
            let allocated = state.allocate()?;
            state.tempids.insert(label.clone(), allocated);
            Ok(allocated)
        }
        EntityRef::Lookup { attribute, value } => {
            let unique = schema.get(attribute).and_then(|installed| installed.unique);
            if unique.is_none() {
                return Err(ReproError::Validation(format!(
                    "lookup attribute {attribute} is not unique"
                )));
            }
            entities_with_value(conn, attribute, value)?
                .first()
                .copied()
                .ok_or_else(|| ReproError::NotFound(format!("entity with {attribute} = {value}")))
        }
    }
}

fn assert_value(
    conn: &Connection,
    attribute: &SchemaAttribute,
    entity: EntityId,
    value: &Value,
    state: &mut TxState,
) -> Result<()> {
    let key = (entity, attribute.ident.clone());
    if attribute.cardinality == Cardinality::One
        && let Some(previous) = state.asserted.get(&key)
        && previous != value
    {
        return Err(ReproError::Conflict(format!(
            "entity {entity} gets both {previous} and {value} for {} in one transaction",
            attribute.ident
        )));
    }

    let current = current_values(conn, entity, &attribute.ident)?;
    if current.iter().any(|(live, _)| live == value) {
        return Ok(());
    }

    if attribute.unique.is_some()
        && let Some(owner) = entities_with_value(conn, &attribute.ident, value)?
            .into_iter()
            .find(|owner| *owner != entity)
    {
        return Err(ReproError::Conflict(format!(
            "{} = {value} already belongs to entity {owner}",
            attribute.ident
        )));
    }

    if attribute.cardinality == Cardinality::One {
        for (previous, _) in current {
            let datom = Datom::retraction(entity, attribute.ident.clone(), previous, state.tx);
            state.record(conn, datom)?;
        }
    }
    let datom = Datom::assertion(entity, attribute.ident.clone(), value.clone(), state.tx);
    state.record(conn, datom)?;
    state.asserted.insert(key, value.clone());
    Ok(())
}

fn install_attribute(
    conn: &Connection,
    schema: &mut BTreeMap<String, SchemaAttribute>,
    attribute: &SchemaAttribute,
    state: &mut TxState,
) -> Result<()> {
    if let Some(existing) = schema.get(&attribute.ident) {
        if existing == attribute {
            return Ok(());
        }
        return Err(ReproError::Conflict(format!(
            "attribute {} is already installed with a different definition",
            attribute.ident
        )));
    }
    if attribute.ident.trim().is_empty() || attribute.ident.starts_with(SYSTEM_NAMESPACE) {
        return Err(ReproError::Validation(format!(
            "invalid attribute ident: {:?}",
            attribute.ident
        )));
    }

    let entity = state.allocate()?;
    let mut facts = vec![
        (ATTR_IDENT, Value::keyword(attribute.ident.clone())),
        (ATTR_VALUE_TYPE, Value::keyword(attribute.value_type.as_str())),
        (ATTR_CARDINALITY, Value::keyword(attribute.cardinality.as_str())),
    ];
    if let Some(unique) = attribute.unique {
        facts.push((ATTR_UNIQUE, Value::keyword(unique.as_str())));
    }
    facts.push((ATTR_INDEX, Value::Boolean(attribute.indexed)));

    for (ident, value) in facts {
        state.record(conn, Datom::assertion(entity, ident, value, state.tx))?;
    }
    schema.insert(attribute.ident.clone(), attribute.clone());
    Ok(())
}
