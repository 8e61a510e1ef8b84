use std::path::Path;
use std::time::Instant;

use serde_json::json;
use tracing::info;

use crate::config::HarnessConfig;
use crate::datom_log::{export_datoms, import_datoms};
use crate::engine::{DatomConnection, DatomEngine};
use crate::error::{ReproError, Result};
use crate::models::{
    EntityId, EntityRef, ImportSummary, ProbeObservation, ReplayReport, SizeReport, TxOp, Value,
};
use crate::probe::{SEED_VALUE, automatic_probe, manual_probe};
use crate::run_log::RunLog;
use crate::schema::{TRACKED_ATTRIBUTE, bloat_schema, install_ops};
use crate::search::{SearchBound, SearchOutcome, find_first_vulnerable, find_first_vulnerable_within};

mod scoped;

#[cfg(test)]
pub(crate) mod fault;

pub use scoped::ScopedDatabase;

const OP_TEST_SIZE: &str = "test_size";
const OP_REPLAY_CASE: &str = "replay_case";
const OP_REPLAY_MANUAL: &str = "replay_manual";
const REPLAY_NAMESPACE: &str = "replay";

pub struct VulnerabilityTester<E: DatomEngine> {
    engine: E,
    config: HarnessConfig,
    run_log: RunLog,
}

impl<E: DatomEngine> std::fmt::Debug for VulnerabilityTester<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulnerabilityTester")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E: DatomEngine> VulnerabilityTester<E> {
    pub fn new(engine: E, config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let run_log = RunLog::new(config.run_log_path.clone());
        Ok(Self {
            engine,
            config,
            run_log,
        })
    }

    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn is_vulnerable(&self, size: u64) -> Result<bool> {
        Ok(self.test_size(size)?.vulnerable())
    }

    /// Fresh database, bloat schema of `size`, seed fact, automatic probe.
    /// On divergence the history is exported to `export_path` before teardown.
    pub fn test_size(&self, size: u64) -> Result<SizeReport> {
        let run_id = RunLog::new_run_id();
        let started = Instant::now();
        let outcome = self.run_size(size);
        match &outcome {
            Ok(report) => self.run_log.record_status(
                &run_id,
                OP_TEST_SIZE,
                if report.vulnerable() { "vulnerable" } else { "clean" },
                Some(size),
                started,
                Some(json!({
                    "error1": report.probe.error1,
                    "error2": report.probe.error2,
                    "case": report.case,
                })),
            ),
            Err(err) => {
                self.run_log
                    .record_error(&run_id, OP_TEST_SIZE, Some(size), started, err);
            }
        }
        outcome
    }

    fn run_size(&self, size: u64) -> Result<SizeReport> {
        let mut db = ScopedDatabase::acquire(&self.engine, self.config.database.clone())?;
        let outcome = probe_fresh_database(db.connection()?, size, &self.config.export_path);
        let teardown = db.teardown();
        let report = outcome?;
        teardown?;
        Ok(report)
    }

    /// Unbounded: returns only once a vulnerable size is found.
    pub fn search(&self, start: u64) -> Result<u64> {
        find_first_vulnerable(start, |size| self.is_vulnerable(size))
    }

    pub fn search_within(&self, start: u64, bound: SearchBound) -> Result<SearchOutcome> {
        find_first_vulnerable_within(start, bound, |size| self.is_vulnerable(size))
    }

    pub fn search_configured(&self, start: u64) -> Result<SearchOutcome> {
        self.search_within(start, self.config.search)
    }

    /// Rehydrates a frozen case into a scratch database and runs the automatic probe on it.
    pub fn replay_case(&self, path: &Path) -> Result<ReplayReport> {
        let run_id = RunLog::new_run_id();
        let started = Instant::now();
        let outcome = self
            .with_replayed_case(path, |conn, entity| automatic_probe(conn, entity, TRACKED_ATTRIBUTE))
            .map(|(import, entity, probe)| ReplayReport {
                import,
                entity,
                probe,
            });
        match &outcome {
            Ok(report) => self.run_log.record_status(
                &run_id,
                OP_REPLAY_CASE,
                if report.probe.diverged() { "vulnerable" } else { "clean" },
                None,
                started,
                Some(json!({
                    "path": path.display().to_string(),
                    "datoms": report.import.datoms,
                    "entity": report.entity,
                    "error1": report.probe.error1,
                    "error2": report.probe.error2,
                })),
            ),
            Err(err) => self
                .run_log
                .record_error(&run_id, OP_REPLAY_CASE, None, started, err),
        }
        outcome
    }

    /// Rehydrates a frozen case and reports write/read pairs for `values`.
    pub fn replay_manual(&self, path: &Path, values: &[Value]) -> Result<Vec<ProbeObservation>> {
        let run_id = RunLog::new_run_id();
        let started = Instant::now();
        let outcome = self
            .with_replayed_case(path, |conn, entity| {
                manual_probe(conn, entity, TRACKED_ATTRIBUTE, values)
            })
            .map(|(_, _, observations)| observations);
        match &outcome {
            Ok(observations) => self.run_log.record_status(
                &run_id,
                OP_REPLAY_MANUAL,
                "observed",
                None,
                started,
                Some(json!({ "observations": observations })),
            ),
            Err(err) => self
                .run_log
                .record_error(&run_id, OP_REPLAY_MANUAL, None, started, err),
        }
        outcome
    }

    fn with_replayed_case<T>(
        &self,
        path: &Path,
        probe: impl FnOnce(&mut E::Connection, EntityId) -> Result<T>,
    ) -> Result<(ImportSummary, EntityId, T)> {
        let config = self.config.database.namespaced(REPLAY_NAMESPACE);
        let mut db = ScopedDatabase::acquire(&self.engine, config)?;
        let outcome = match db.connection() {
            Ok(conn) => replay_into(conn, path, self.config.import_batch_size, probe),
            Err(err) => Err(err),
        };
        let teardown = db.teardown();
        let result = outcome?;
        teardown?;
        Ok(result)
    }
}

fn probe_fresh_database<C: DatomConnection>(
    conn: &mut C,
    size: u64,
    export_path: &Path,
) -> Result<SizeReport> {
    conn.transact(&install_ops(&bloat_schema(size)))
        .map_err(|err| ReproError::setup("schema transact", err))?;
    conn.transact(&[TxOp::upsert(
        EntityRef::temp("seed"),
        TRACKED_ATTRIBUTE,
        Value::string(SEED_VALUE),
    )])
    .map_err(|err| ReproError::setup("seed transact", err))?;

    let entity = conn.max_eid()?;
    let probe = automatic_probe(conn, entity, TRACKED_ATTRIBUTE)?;
    let case = if probe.diverged() {
        Some(export_datoms(conn, export_path)?)
    } else {
        None
    };
    info!(
        size,
        entity,
        vulnerable = probe.diverged(),
        "bloat size tested"
    );
    Ok(SizeReport { size, probe, case })
}

fn replay_into<C: DatomConnection, T>(
    conn: &mut C,
    path: &Path,
    batch_size: usize,
    probe: impl FnOnce(&mut C, EntityId) -> Result<T>,
) -> Result<(ImportSummary, EntityId, T)> {
    let import = import_datoms(conn, path, batch_size)?;
    let entity = tracked_entity(conn)?;
    info!(
        path = %path.display(),
        datoms = import.datoms,
        entity,
        "frozen case rehydrated"
    );
    let observed = probe(conn, entity)?;
    Ok((import, entity, observed))
}

/// Highest entity that currently holds the tracked attribute.
fn tracked_entity<C: DatomConnection>(conn: &C) -> Result<EntityId> {
    let mut candidates = conn
        .history_datoms()?
        .into_iter()
        .filter(|datom| datom.attribute == TRACKED_ATTRIBUTE && datom.added)
        .map(|datom| datom.entity)
        .collect::<Vec<_>>();
    candidates.sort_unstable();
    candidates.dedup();

    for entity in candidates.into_iter().rev() {
        if conn.pull(entity, TRACKED_ATTRIBUTE)?.is_some() {
            return Ok(entity);
        }
    }
    Err(ReproError::NotFound(format!(
        "no entity holds {TRACKED_ATTRIBUTE} in the replayed log"
    )))
}
