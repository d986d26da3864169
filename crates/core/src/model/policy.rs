use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::question::Category;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PolicyError {
    #[error("policy requests no questions")]
    Empty,

    #[error("policy total ({total}) does not match category counts ({sum})")]
    TotalMismatch { total: u32, sum: u32 },

    #[error("policy counts overflow")]
    Overflow,
}

/// Declarative per-category question counts for assembling a session.
///
/// Categories are kept in key order so that serialization is stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PersistedPolicy", into = "PersistedPolicy")]
pub struct SessionPolicy {
    counts: BTreeMap<Category, u32>,
    total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedPolicy {
    counts: BTreeMap<Category, u32>,
    total: u32,
}

impl SessionPolicy {
    /// Build a policy from category counts; the total is derived.
    ///
    /// Zero-count categories are dropped.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::Empty` if nothing is requested, or
    /// `PolicyError::Overflow` if the counts do not fit in `u32`.
    pub fn new<I, C>(counts: I) -> Result<Self, PolicyError>
    where
        I: IntoIterator<Item = (C, u32)>,
        C: Into<Category>,
    {
        let mut map = BTreeMap::new();
        for (category, count) in counts {
            if count == 0 {
                continue;
            }
            let slot = map.entry(category.into()).or_insert(0_u32);
            *slot = slot.checked_add(count).ok_or(PolicyError::Overflow)?;
        }
        let total = sum_counts(&map)?;
        if total == 0 {
            return Err(PolicyError::Empty);
        }
        Ok(Self { counts: map, total })
    }

    /// Rehydrate a policy whose total was stored alongside the counts.
    ///
    /// # Errors
    ///
    /// Returns `PolicyError::TotalMismatch` if the stored total disagrees with the counts.
    pub fn from_persisted(
        counts: BTreeMap<Category, u32>,
        total: u32,
    ) -> Result<Self, PolicyError> {
        let sum = sum_counts(&counts)?;
        if sum != total {
            return Err(PolicyError::TotalMismatch { total, sum });
        }
        Self::new(counts)
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Required count for a category, zero if the policy does not mention it.
    #[must_use]
    pub fn count_for(&self, category: &Category) -> u32 {
        self.counts.get(category).copied().unwrap_or(0)
    }

    pub fn categories(&self) -> impl Iterator<Item = &Category> {
        self.counts.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Category, u32)> {
        self.counts.iter().map(|(c, n)| (c, *n))
    }
}

fn sum_counts(counts: &BTreeMap<Category, u32>) -> Result<u32, PolicyError> {
    counts
        .values()
        .try_fold(0_u32, |acc, n| acc.checked_add(*n))
        .ok_or(PolicyError::Overflow)
}

impl TryFrom<PersistedPolicy> for SessionPolicy {
    type Error = PolicyError;

    fn try_from(value: PersistedPolicy) -> Result<Self, Self::Error> {
        Self::from_persisted(value.counts, value.total)
    }
}

impl From<SessionPolicy> for PersistedPolicy {
    fn from(value: SessionPolicy) -> Self {
        Self {
            counts: value.counts,
            total: value.total,
        }
    }
}
