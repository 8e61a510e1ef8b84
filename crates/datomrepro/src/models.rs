use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ReproError, Result};

pub type EntityId = i64;
pub type TxId = i64;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    String(String),
    Long(i64),
    Boolean(bool),
    Keyword(String),
    Ref(EntityId),
}

impl Value {
    pub fn string(raw: impl Into<String>) -> Self {
        Self::String(raw.into())
    }

    pub fn keyword(raw: impl Into<String>) -> Self {
        Self::Keyword(raw.into())
    }

    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::String(_) => ValueType::String,
            Self::Long(_) => ValueType::Long,
            Self::Boolean(_) => ValueType::Boolean,
            Self::Keyword(_) => ValueType::Keyword,
            Self::Ref(_) => ValueType::Ref,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) | Self::Keyword(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(value) => write!(f, "{value:?}"),
            Self::Long(value) => write!(f, "{value}"),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::Keyword(value) => write!(f, ":{value}"),
            Self::Ref(value) => write!(f, "#ref {value}"),
        }
    }
}

/// One fact of the engine history. Field order is the EAVT index order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Datom {
    pub entity: EntityId,
    pub attribute: String,
    pub value: Value,
    pub tx: TxId,
    pub added: bool,
}

impl Datom {
    pub fn assertion(
        entity: EntityId,
        attribute: impl Into<String>,
        value: Value,
        tx: TxId,
    ) -> Self {
        Self {
            entity,
            attribute: attribute.into(),
            value,
            tx,
            added: true,
        }
    }

    pub fn retraction(
        entity: EntityId,
        attribute: impl Into<String>,
        value: Value,
        tx: TxId,
    ) -> Self {
        Self {
            entity,
            attribute: attribute.into(),
            value,
            tx,
            added: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Long,
    Boolean,
    Keyword,
    Ref,
}

impl ValueType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "db.type/string",
            Self::Long => "db.type/long",
            Self::Boolean => "db.type/boolean",
            Self::Keyword => "db.type/keyword",
            Self::Ref => "db.type/ref",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "db.type/string" => Ok(Self::String),
            "db.type/long" => Ok(Self::Long),
            "db.type/boolean" => Ok(Self::Boolean),
            "db.type/keyword" => Ok(Self::Keyword),
            "db.type/ref" => Ok(Self::Ref),
            other => Err(ReproError::Validation(format!("unknown value type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

impl Cardinality {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::One => "db.cardinality/one",
            Self::Many => "db.cardinality/many",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "db.cardinality/one" => Ok(Self::One),
            "db.cardinality/many" => Ok(Self::Many),
            other => Err(ReproError::Validation(format!("unknown cardinality: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Uniqueness {
    Identity,
    Value,
}

impl Uniqueness {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "db.unique/identity",
            Self::Value => "db.unique/value",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "db.unique/identity" => Ok(Self::Identity),
            "db.unique/value" => Ok(Self::Value),
            other => Err(ReproError::Validation(format!("unknown uniqueness: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaAttribute {
    pub ident: String,
    pub value_type: ValueType,
    pub cardinality: Cardinality,
    pub unique: Option<Uniqueness>,
    pub indexed: bool,
}

/// Entity reference inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Id(EntityId),
    TempId(String),
    Lookup { attribute: String, value: Value },
}

impl EntityRef {
    pub fn temp(label: impl Into<String>) -> Self {
        Self::TempId(label.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOp {
    Upsert {
        entity: EntityRef,
        attribute: String,
        value: Value,
    },
    Retract {
        entity: EntityRef,
        attribute: String,
        value: Value,
    },
    InstallAttribute(SchemaAttribute),
}

impl TxOp {
    pub fn upsert(entity: EntityRef, attribute: impl Into<String>, value: Value) -> Self {
        Self::Upsert {
            entity,
            attribute: attribute.into(),
            value,
        }
    }

    pub fn retract(entity: EntityRef, attribute: impl Into<String>, value: Value) -> Self {
        Self::Retract {
            entity,
            attribute: attribute.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxReport {
    pub tx: TxId,
    pub tempids: BTreeMap<String, EntityId>,
    pub datoms: Vec<Datom>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeObservation {
    pub written: Value,
    pub read: Option<Value>,
}

impl ProbeObservation {
    #[must_use]
    pub fn matches(&self) -> bool {
        self.read.as_ref() == Some(&self.written)
    }
}

/// Outcome of the seven-step upsert sequence. The two checks are reported separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub error1: bool,
    pub error2: bool,
    pub first_read: Option<Value>,
    pub second_read: Option<Value>,
}

impl ProbeResult {
    #[must_use]
    pub const fn diverged(&self) -> bool {
        self.error1 || self.error2
    }
}

/// A frozen reproduction written by export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VulnerableCase {
    pub path: PathBuf,
    pub datoms: usize,
    pub max_tx: Option<TxId>,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub datoms: usize,
    pub batches: usize,
    pub max_tx: Option<TxId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeReport {
    pub size: u64,
    pub probe: ProbeResult,
    pub case: Option<VulnerableCase>,
}

impl SizeReport {
    #[must_use]
    pub const fn vulnerable(&self) -> bool {
        self.probe.diverged()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub import: ImportSummary,
    pub entity: EntityId,
    pub probe: ProbeResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub run_id: String,
    pub operation: String,
    pub status: String,
    pub latency_ms: u128,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_serializes_with_explicit_type_tag() {
        let raw = serde_json::to_string(&Value::string("upsert-probe-1")).expect("serialize");
        assert_eq!(raw, r#"{"type":"string","value":"upsert-probe-1"}"#);
        let long: Value = serde_json::from_str(r#"{"type":"long","value":42}"#).expect("parse");
        assert_eq!(long, Value::Long(42));
    }

    #[test]
    fn value_rejects_coerced_payloads() {
        assert!(serde_json::from_str::<Value>(r#"{"type":"long","value":"42"}"#).is_err());
        assert!(serde_json::from_str::<Value>(r#"{"type":"float","value":1.5}"#).is_err());
    }

    #[test]
    fn schema_keywords_parse_back() {
        for value_type in [
            ValueType::String,
            ValueType::Long,
            ValueType::Boolean,
            ValueType::Keyword,
            ValueType::Ref,
        ] {
            assert_eq!(ValueType::parse(value_type.as_str()).expect("parse"), value_type);
        }
        assert_eq!(
            Cardinality::parse("db.cardinality/many").expect("parse"),
            Cardinality::Many
        );
        assert!(Uniqueness::parse("db.unique/maybe").is_err());
    }

    #[test]
    fn probe_result_combines_both_checks() {
        let mut result = ProbeResult {
            error1: false,
            error2: false,
            first_read: None,
            second_read: None,
        };
        assert!(!result.diverged());
        result.error2 = true;
        assert!(result.diverged());
    }
}
