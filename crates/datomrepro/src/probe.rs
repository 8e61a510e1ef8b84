use tracing::{debug, info};

use crate::engine::DatomConnection;
use crate::error::Result;
use crate::models::{EntityId, EntityRef, ProbeObservation, ProbeResult, TxOp, Value};

/// Probe values share this prefix so an off-by-one resolution reads back a sibling value.
pub const PROBE_VALUE_PREFIX: &str = "upsert-probe-";
pub const SEED_VALUE: &str = "upsert-probe-0";

#[must_use]
pub fn probe_value(index: u8) -> Value {
    Value::string(format!("{PROBE_VALUE_PREFIX}{index}"))
}

fn upsert<C: DatomConnection>(
    conn: &mut C,
    entity: EntityId,
    attribute: &str,
    value: &Value,
) -> Result<()> {
    let report = conn.transact(&[TxOp::upsert(
        EntityRef::Id(entity),
        attribute,
        value.clone(),
    )])?;
    debug!(
        entity,
        attribute,
        tx = report.tx,
        datoms = report.datoms.len(),
        "upsert committed"
    );
    Ok(())
}

/// Writes each value in turn and reads it straight back. No verdict; callers compare.
pub fn manual_probe<C: DatomConnection>(
    conn: &mut C,
    entity: EntityId,
    attribute: &str,
    values: &[Value],
) -> Result<Vec<ProbeObservation>> {
    let mut observations = Vec::with_capacity(values.len());
    for value in values {
        upsert(conn, entity, attribute, value)?;
        let read = conn.pull(entity, attribute)?;
        info!(
            entity,
            attribute,
            written = %value,
            read = ?read,
            "manual probe write/read"
        );
        observations.push(ProbeObservation {
            written: value.clone(),
            read,
        });
    }
    Ok(observations)
}

/// Seven-step sequence: V1 V2 V1 then check V1; V2 V3 V4 then check V4.
pub fn automatic_probe<C: DatomConnection>(
    conn: &mut C,
    entity: EntityId,
    attribute: &str,
) -> Result<ProbeResult> {
    let v1 = probe_value(1);
    let v2 = probe_value(2);
    let v3 = probe_value(3);
    let v4 = probe_value(4);

    for value in [&v1, &v2, &v1] {
        upsert(conn, entity, attribute, value)?;
    }
    let first_read = conn.pull(entity, attribute)?;
    let error1 = first_read.as_ref() != Some(&v1);

    for value in [&v2, &v3, &v4] {
        upsert(conn, entity, attribute, value)?;
    }
    let second_read = conn.pull(entity, attribute)?;
    let error2 = second_read.as_ref() != Some(&v4);

    let result = ProbeResult {
        error1,
        error2,
        first_read,
        second_read,
    };
    info!(
        entity,
        attribute,
        error1 = result.error1,
        error2 = result.error2,
        diverged = result.diverged(),
        "automatic probe finished"
    );
    Ok(result)
}
