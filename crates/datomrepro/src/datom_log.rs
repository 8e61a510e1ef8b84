//! Flat-file datom log: one JSON object per line, one line per datom.
//!
//! Export writes the snapshot's full EAVT history in index order. Import parses the
//! whole file before touching the database, repairs the tx counter from the highest
//! serialized tx, then replays the records as history in fixed-size batches.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::engine::DatomConnection;
use crate::error::{ReproError, Result};
use crate::jsonl::{parse_jsonl_line, to_jsonl_line};
use crate::models::{Datom, ImportSummary, TxId, VulnerableCase};

pub fn format_datom_line(datom: &Datom) -> Result<String> {
    to_jsonl_line(datom)
}

/// Strict parse: fields are never coerced and out-of-range ids are rejected.
pub fn parse_datom_line(line_no: usize, line: &str) -> Result<Datom> {
    let datom = parse_jsonl_line::<Datom>(line_no, line)?;
    let reject = |message: String| ReproError::LogParse {
        line: line_no,
        message,
    };
    if datom.entity <= 0 {
        return Err(reject(format!("entity id must be positive, got {}", datom.entity)));
    }
    if datom.attribute.trim().is_empty() {
        return Err(reject("attribute must not be empty".to_string()));
    }
    if datom.tx <= 0 {
        return Err(reject(format!("tx id must be positive, got {}", datom.tx)));
    }
    Ok(datom)
}

pub fn export_datoms<C: DatomConnection>(conn: &C, path: &Path) -> Result<VulnerableCase> {
    let datoms = conn.history_datoms()?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(path)?);
    let mut hasher = blake3::Hasher::new();
    let mut max_tx = None::<TxId>;
    for datom in &datoms {
        let line = format_datom_line(datom)?;
        hasher.update(line.as_bytes());
        writer.write_all(line.as_bytes())?;
        max_tx = Some(max_tx.map_or(datom.tx, |current| current.max(datom.tx)));
    }
    writer.flush()?;

    let case = VulnerableCase {
        path: path.to_path_buf(),
        datoms: datoms.len(),
        max_tx,
        content_hash: hasher.finalize().to_hex().to_string(),
    };
    info!(
        path = %path.display(),
        datoms = case.datoms,
        content_hash = %case.content_hash,
        "datom log exported"
    );
    Ok(case)
}

pub fn read_datom_log(path: &Path) -> Result<Vec<Datom>> {
    let file = File::open(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            ReproError::NotFound(format!("datom log {}", path.display()))
        } else {
            ReproError::Io(err)
        }
    })?;

    let mut datoms = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        datoms.push(parse_datom_line(index + 1, &line?)?);
    }

    // The log is a record set; each datom appears once.
    let mut seen = BTreeMap::<&Datom, usize>::new();
    for (index, datom) in datoms.iter().enumerate() {
        if let Some(first) = seen.insert(datom, index + 1) {
            return Err(ReproError::LogParse {
                line: index + 1,
                message: format!("duplicate of the datom on line {first}"),
            });
        }
    }
    Ok(datoms)
}

pub fn import_datoms<C: DatomConnection>(
    conn: &mut C,
    path: &Path,
    batch_size: usize,
) -> Result<ImportSummary> {
    if batch_size == 0 {
        return Err(ReproError::Validation(
            "import batch size must be at least 1".to_string(),
        ));
    }
    let datoms = read_datom_log(path)?;
    let max_tx = datoms.iter().map(|datom| datom.tx).max();

    // Replaying history does not advance the live counter.
    if let Some(max_tx) = max_tx {
        conn.set_max_tx(max_tx)?;
    }

    let total_batches = datoms.len().div_ceil(batch_size);
    let mut loaded = 0usize;
    for (index, batch) in datoms.chunks(batch_size).enumerate() {
        conn.load_datoms(batch)?;
        loaded += batch.len();
        info!(
            batch = index + 1,
            batches = total_batches,
            datoms = loaded,
            "datom log batch loaded"
        );
    }

    Ok(ImportSummary {
        datoms: datoms.len(),
        batches: total_batches,
        max_tx,
    })
}
