use crate::models::{Cardinality, SchemaAttribute, TxOp, Uniqueness, ValueType};

pub const TRACKED_ATTRIBUTE: &str = "name";
pub const FILLER_ATTRIBUTE_PREFIX: &str = "attribute";

#[must_use]
pub fn tracked_attribute() -> SchemaAttribute {
    SchemaAttribute {
        ident: TRACKED_ATTRIBUTE.to_string(),
        value_type: ValueType::String,
        cardinality: Cardinality::One,
        unique: Some(Uniqueness::Identity),
        indexed: true,
    }
}

#[must_use]
pub fn filler_attribute(index: u64) -> SchemaAttribute {
    SchemaAttribute {
        ident: format!("{FILLER_ATTRIBUTE_PREFIX}{index}"),
        value_type: ValueType::String,
        cardinality: Cardinality::One,
        unique: None,
        indexed: true,
    }
}

/// The tracked attribute followed by `size` filler attributes `attribute0..attribute{size-1}`.
#[must_use]
pub fn bloat_schema(size: u64) -> Vec<SchemaAttribute> {
    std::iter::once(tracked_attribute())
        .chain((0..size).map(filler_attribute))
        .collect()
}

#[must_use]
pub fn install_ops(schema: &[SchemaAttribute]) -> Vec<TxOp> {
    schema.iter().cloned().map(TxOp::InstallAttribute).collect()
}
