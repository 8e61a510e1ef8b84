use std::str::FromStr;

use crate::error::{ReproError, Result};

#[must_use]
pub(super) fn read_non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name)
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(super) fn read_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
{
    let Some(raw) = read_non_empty(lookup, name) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| ReproError::Validation(format!("invalid {name}: {raw}")))
}

pub(super) fn read_usize_at_least(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    min_value: usize,
) -> Result<Option<usize>> {
    match read_parsed::<usize>(lookup, name)? {
        Some(value) if value < min_value => Err(ReproError::Validation(format!(
            "invalid {name}: {value} (expected >= {min_value})"
        ))),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_from(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |name: &str| {
            pairs
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value).to_string())
        }
    }

    #[test]
    fn blank_values_are_treated_as_unset() {
        let lookup = lookup_from(&[("A", "   "), ("B", " x ")]);
        assert_eq!(read_non_empty(&lookup, "A"), None);
        assert_eq!(read_non_empty(&lookup, "B").as_deref(), Some("x"));
        assert_eq!(read_non_empty(&lookup, "C"), None);
    }

    #[test]
    fn unparsable_numbers_are_rejected() {
        let lookup = lookup_from(&[("N", "ten")]);
        let err = read_parsed::<u64>(&lookup, "N").expect_err("must reject");
        assert!(err.to_string().contains("invalid N: ten"));
    }

    #[test]
    fn minimum_is_enforced() {
        let lookup = lookup_from(&[("N", "0"), ("M", "5")]);
        assert!(read_usize_at_least(&lookup, "N", 1).is_err());
        assert_eq!(read_usize_at_least(&lookup, "M", 1).expect("parse"), Some(5));
    }
}
