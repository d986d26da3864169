#![forbid(unsafe_code)]

pub mod diagnostics;
pub mod record;
pub mod repository;
pub mod session_store;
pub mod sqlite;

pub use diagnostics::{DiagnosticsReporter, HealthStatus, ItemSize, StorageReport};
pub use repository::{InMemoryStore, KeyValueStore, StorageError, entry_size};
pub use session_store::{SaveOutcome, SessionStore, SessionStoreConfig, SessionStoreError};
pub use sqlite::{SqliteInitError, SqliteStore};
