use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage operations observed by the telemetry wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageOperation {
    Save,
    Load,
    Delete,
    Optimize,
    Export,
    Import,
    Clear,
}

impl StorageOperation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StorageOperation::Save => "save",
            StorageOperation::Load => "load",
            StorageOperation::Delete => "delete",
            StorageOperation::Optimize => "optimize",
            StorageOperation::Export => "export",
            StorageOperation::Import => "import",
            StorageOperation::Clear => "clear",
        }
    }
}

impl fmt::Display for StorageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timed storage operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageMetric {
    pub operation: StorageOperation,
    pub duration_ms: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub store_size_bytes: u64,
    pub recorded_at: DateTime<Utc>,
}
