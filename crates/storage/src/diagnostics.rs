use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use exam_core::Clock;

use crate::repository::{KeyValueStore, StorageError, entry_size};
use crate::session_store::{DEFAULT_SESSION_PREFIX, loose_last_saved};

const LARGEST_ITEMS: usize = 5;

/// Coarse storage health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Good,
    Fair,
    Poor,
}

impl HealthStatus {
    /// `<= 50%` good, `<= 80%` fair, above that poor. Unknown quota is fair.
    #[must_use]
    pub fn classify(used_bytes: u64, quota_bytes: Option<u64>) -> Self {
        let Some(quota) = quota_bytes.filter(|q| *q > 0) else {
            return HealthStatus::Fair;
        };
        // compare used/quota against 1/2 and 4/5 without floats
        let used = u128::from(used_bytes);
        let quota = u128::from(quota);
        if used * 2 <= quota {
            HealthStatus::Good
        } else if used * 5 <= quota * 4 {
            HealthStatus::Fair
        } else {
            HealthStatus::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSize {
    pub key: String,
    pub bytes: u64,
    /// Days since the item was last saved; only known for session records.
    pub age_days: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageReport {
    pub total_bytes: u64,
    pub item_count: usize,
    pub session_count: usize,
    pub session_bytes: u64,
    pub oldest_session: Option<DateTime<Utc>>,
    pub newest_session: Option<DateTime<Utc>>,
    pub largest_items: Vec<ItemSize>,
    pub estimated_quota: Option<u64>,
    pub usage_ratio: Option<f64>,
    pub health: HealthStatus,
}

/// Read-only scanner over the shared store.
#[derive(Clone)]
pub struct DiagnosticsReporter {
    kv: Arc<dyn KeyValueStore>,
    clock: Clock,
    session_prefix: String,
}

impl DiagnosticsReporter {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, clock: Clock) -> Self {
        Self {
            kv,
            clock,
            session_prefix: DEFAULT_SESSION_PREFIX.to_owned(),
        }
    }

    #[must_use]
    pub fn with_session_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.session_prefix = prefix.into();
        self
    }

    /// Scan every key and summarize sizes, ages and quota usage.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub async fn run_diagnostics(&self) -> Result<StorageReport, StorageError> {
        let mut items = Vec::new();
        let mut total_bytes = 0_u64;
        let mut session_count = 0_usize;
        let mut session_bytes = 0_u64;
        let mut oldest: Option<DateTime<Utc>> = None;
        let mut newest: Option<DateTime<Utc>> = None;

        for key in self.kv.keys().await? {
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            let bytes = entry_size(&key, &raw);
            total_bytes = total_bytes.saturating_add(bytes);

            let mut age_days = None;
            if key.starts_with(&self.session_prefix) {
                session_count += 1;
                session_bytes = session_bytes.saturating_add(bytes);
                if let Some(saved) = loose_last_saved(&raw) {
                    age_days = Some(self.clock.age_in_days(saved));
                    oldest = Some(oldest.map_or(saved, |o| o.min(saved)));
                    newest = Some(newest.map_or(saved, |n| n.max(saved)));
                }
            }
            items.push(ItemSize {
                key,
                bytes,
                age_days,
            });
        }

        let item_count = items.len();
        items.sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.key.cmp(&b.key)));
        items.truncate(LARGEST_ITEMS);

        let estimated_quota = self.kv.quota_bytes();
        #[allow(clippy::cast_precision_loss)]
        let usage_ratio = estimated_quota
            .filter(|q| *q > 0)
            .map(|q| total_bytes as f64 / q as f64);

        Ok(StorageReport {
            total_bytes,
            item_count,
            session_count,
            session_bytes,
            oldest_session: oldest,
            newest_session: newest,
            largest_items: items,
            estimated_quota,
            usage_ratio,
            health: HealthStatus::classify(total_bytes, estimated_quota),
        })
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    pub async fn health_status(&self) -> Result<HealthStatus, StorageError> {
        let used = self.kv.used_bytes().await?;
        Ok(HealthStatus::classify(used, self.kv.quota_bytes()))
    }
}
