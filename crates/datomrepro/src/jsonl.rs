use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{ReproError, Result};

/// Parses one JSONL record. Blank lines are malformed: every line must carry a record.
pub(crate) fn parse_jsonl_line<T>(line_no: usize, line: &str) -> Result<T>
where
    T: DeserializeOwned,
{
    if line.trim().is_empty() {
        return Err(ReproError::LogParse {
            line: line_no,
            message: "blank line".to_string(),
        });
    }
    serde_json::from_str::<T>(line).map_err(|err| ReproError::LogParse {
        line: line_no,
        message: err.to_string(),
    })
}

pub(crate) fn to_jsonl_line<T>(item: &T) -> Result<String>
where
    T: Serialize,
{
    let mut line = serde_json::to_string(item)?;
    line.push('\n');
    Ok(line)
}

pub(crate) fn append_jsonl_line<T>(path: &Path, item: &T) -> Result<()>
where
    T: Serialize,
{
    let line = to_jsonl_line(item)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Row {
        id: u32,
    }

    #[test]
    fn parse_reports_line_number_on_failure() {
        let err = parse_jsonl_line::<Row>(4, r#"{"id":"x"}"#).expect_err("must fail");
        match err {
            ReproError::LogParse { line, .. } => assert_eq!(line, 4),
            other => panic!("unexpected error: {other}"),
        }
        assert!(parse_jsonl_line::<Row>(2, "   ").is_err());
        assert_eq!(parse_jsonl_line::<Row>(1, r#"{"id":3}"#).expect("parse"), Row { id: 3 });
    }

    #[test]
    fn append_creates_parent_and_accumulates_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("rows.jsonl");
        append_jsonl_line(&path, &Row { id: 1 }).expect("append 1");
        append_jsonl_line(&path, &Row { id: 2 }).expect("append 2");

        let raw = std::fs::read_to_string(&path).expect("read");
        assert_eq!(raw, "{\"id\":1}\n{\"id\":2}\n");
    }
}
