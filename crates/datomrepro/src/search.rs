//! Smallest-vulnerable-size search.
//!
//! Vulnerability is not assumed monotonic in the size, so every candidate from the
//! start value upward is tried in order and none is skipped. The scan itself is
//! unbounded; a bound, if any, is supplied by the caller as a [`SearchBound`].

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ReproError, Result};

/// Lazy, infinite stream of candidate sizes `start, start + 1, ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSizes {
    next: Option<u64>,
}

impl CandidateSizes {
    #[must_use]
    pub const fn starting_at(start: u64) -> Self {
        Self { next: Some(start) }
    }
}

impl Iterator for CandidateSizes {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let current = self.next?;
        self.next = current.checked_add(1);
        Some(current)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchBound {
    pub max_attempts: Option<usize>,
    pub deadline: Option<Duration>,
}

impl SearchBound {
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            max_attempts: None,
            deadline: None,
        }
    }

    #[must_use]
    pub const fn attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            deadline: None,
        }
    }

    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.max_attempts.is_none() && self.deadline.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SearchOutcome {
    Found { size: u64, attempts: usize },
    Exhausted { attempts: usize, last_size: Option<u64> },
}

impl SearchOutcome {
    #[must_use]
    pub const fn size(&self) -> Option<u64> {
        match self {
            Self::Found { size, .. } => Some(*size),
            Self::Exhausted { .. } => None,
        }
    }
}

/// Returns the first size at or above `start` for which `is_vulnerable` holds.
/// Runs until one is found; errors from `is_vulnerable` end the search.
pub fn find_first_vulnerable<F>(start: u64, is_vulnerable: F) -> Result<u64>
where
    F: FnMut(u64) -> Result<bool>,
{
    match find_first_vulnerable_within(start, SearchBound::unbounded(), is_vulnerable)? {
        SearchOutcome::Found { size, .. } => Ok(size),
        // Only reachable once the u64 range is exhausted.
        SearchOutcome::Exhausted { .. } => Err(ReproError::NotFound(format!(
            "no vulnerable size at or above {start}"
        ))),
    }
}

pub fn find_first_vulnerable_within<F>(
    start: u64,
    bound: SearchBound,
    mut is_vulnerable: F,
) -> Result<SearchOutcome>
where
    F: FnMut(u64) -> Result<bool>,
{
    let started = Instant::now();
    let mut attempts = 0usize;
    let mut last_size = None;

    for size in CandidateSizes::starting_at(start) {
        if bound.max_attempts.is_some_and(|max| attempts >= max)
            || bound.deadline.is_some_and(|deadline| started.elapsed() >= deadline)
        {
            info!(attempts, last_size = ?last_size, "search bound reached");
            return Ok(SearchOutcome::Exhausted {
                attempts,
                last_size,
            });
        }

        attempts += 1;
        last_size = Some(size);
        debug!(size, attempts, "testing candidate size");
        if is_vulnerable(size)? {
            info!(size, attempts, "first vulnerable size found");
            return Ok(SearchOutcome::Found { size, attempts });
        }
    }

    Ok(SearchOutcome::Exhausted {
        attempts,
        last_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_sizes_step_by_one_and_restart_anywhere() {
        let first = CandidateSizes::starting_at(0).take(4).collect::<Vec<_>>();
        assert_eq!(first, vec![0, 1, 2, 3]);
        let restarted = CandidateSizes::starting_at(17).take(2).collect::<Vec<_>>();
        assert_eq!(restarted, vec![17, 18]);
        let tail = CandidateSizes::starting_at(u64::MAX - 1).collect::<Vec<_>>();
        assert_eq!(tail, vec![u64::MAX - 1, u64::MAX]);
    }

    #[test]
    fn returns_first_true_size_without_skipping() {
        let mut tried = Vec::new();
        let size = find_first_vulnerable(0, |size| {
            tried.push(size);
            Ok(size >= 10)
        })
        .expect("search");
        assert_eq!(size, 10);
        assert_eq!(tried, (0..=10).collect::<Vec<_>>());
    }

    #[test]
    fn non_monotonic_predicate_returns_earliest_hit() {
        let size = find_first_vulnerable(3, |size| Ok(size == 5 || size > 8)).expect("search");
        assert_eq!(size, 5);
        let size = find_first_vulnerable(6, |size| Ok(size == 5 || size > 8)).expect("search");
        assert_eq!(size, 9);
    }

    #[test]
    fn start_size_itself_is_tested() {
        let size = find_first_vulnerable(42, |_| Ok(true)).expect("search");
        assert_eq!(size, 42);
    }

    #[test]
    fn attempt_bound_stops_the_scan() {
        let outcome =
            find_first_vulnerable_within(0, SearchBound::attempts(3), |_| Ok(false)).expect("search");
        assert_eq!(
            outcome,
            SearchOutcome::Exhausted {
                attempts: 3,
                last_size: Some(2)
            }
        );
        assert_eq!(outcome.size(), None);

        let found =
            find_first_vulnerable_within(0, SearchBound::attempts(3), |size| Ok(size == 2))
                .expect("search");
        assert_eq!(found, SearchOutcome::Found { size: 2, attempts: 3 });
    }

    #[test]
    fn zero_deadline_tries_nothing() {
        let bound = SearchBound {
            max_attempts: None,
            deadline: Some(Duration::ZERO),
        };
        let outcome = find_first_vulnerable_within(0, bound, |_| {
            panic!("must not be called");
        })
        .expect("search");
        assert_eq!(
            outcome,
            SearchOutcome::Exhausted {
                attempts: 0,
                last_size: None
            }
        );
    }

    #[test]
    fn predicate_error_aborts_search() {
        let err = find_first_vulnerable(0, |size| {
            if size == 2 {
                Err(ReproError::Setup("create database: locked".to_string()))
            } else {
                Ok(false)
            }
        })
        .expect_err("must fail");
        assert!(err.is_setup_failure());
    }
}
