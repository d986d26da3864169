use std::sync::Arc;

use tracing::warn;

use exam_core::model::{ExamSettings, ExamSettingsDraft};
use storage::repository::KeyValueStore;

use crate::error::SettingsServiceError;

/// Key the engine settings are persisted under.
pub const SETTINGS_KEY: &str = "exam:settings";

#[derive(Clone)]
pub struct ExamSettingsService {
    kv: Arc<dyn KeyValueStore>,
}

impl ExamSettingsService {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Load persisted settings, or defaults if missing or unreadable.
    ///
    /// # Errors
    ///
    /// Returns `SettingsServiceError` on storage failures.
    pub async fn load(&self) -> Result<ExamSettings, SettingsServiceError> {
        let Some(raw) = self.kv.get(SETTINGS_KEY).await? else {
            return Ok(ExamSettings::default());
        };
        match serde_json::from_str::<ExamSettings>(&raw) {
            Ok(settings) => Ok(settings),
            Err(err) => {
                warn!(error = %err, "ignoring unreadable exam settings");
                Ok(ExamSettings::default())
            }
        }
    }

    /// Validate and persist new settings.
    ///
    /// # Errors
    ///
    /// Returns `SettingsServiceError` if validation fails or persistence fails.
    pub async fn save(&self, draft: ExamSettingsDraft) -> Result<ExamSettings, SettingsServiceError> {
        let settings = draft.validate()?;
        let raw = serde_json::to_string(&settings)?;
        self.kv.set(SETTINGS_KEY, &raw).await?;
        Ok(settings)
    }

    /// Apply `edit` to the current settings and persist the result.
    ///
    /// # Errors
    ///
    /// Returns `SettingsServiceError` if the edited draft is invalid or persistence fails.
    pub async fn update<F>(&self, edit: F) -> Result<ExamSettings, SettingsServiceError>
    where
        F: FnOnce(&mut ExamSettingsDraft),
    {
        let mut draft = self.load().await?.to_draft();
        edit(&mut draft);
        self.save(draft).await
    }

    /// Forget persisted settings.
    ///
    /// # Errors
    ///
    /// Returns `SettingsServiceError` on storage failures.
    pub async fn reset(&self) -> Result<ExamSettings, SettingsServiceError> {
        self.kv.remove(SETTINGS_KEY).await?;
        Ok(ExamSettings::default())
    }
}
