use crate::cadapter::{BackendError, RootPath, SafeBackend};
use crate::error::{VfsError, VfsResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub const SETTINGS_PATH: &str = "/settings.json";

/// Persisted registry of external domains shown under `/outside`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub alien_items: Vec<String>,
}

/// Reads and rewrites `settings.json` in the application area.
///
/// The backend cannot update an object in place, so every change deletes the
/// record and stores it again. Changes are serialized by `write_lock`.
pub struct SettingsStore {
    backend: Arc<dyn SafeBackend>,
    write_lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(backend: Arc<dyn SafeBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    /// Current record; a missing object reads as an empty registry.
    pub async fn load(&self) -> VfsResult<Settings> {
        match self.backend.get_file(RootPath::App, SETTINGS_PATH).await {
            Ok(body) => Ok(serde_json::from_slice(&body)?),
            Err(e) if e.is_not_found() => Ok(Settings::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Register `domain`; returns false if it was already present.
    pub async fn add(&self, domain: &str) -> VfsResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut settings = self.load().await?;
        if settings.alien_items.iter().any(|d| d == domain) {
            return Ok(false);
        }
        settings.alien_items.push(domain.to_string());
        self.store(&settings).await?;
        Ok(true)
    }

    /// Forget `domain`; returns false if it was not registered.
    pub async fn remove(&self, domain: &str) -> VfsResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut settings = self.load().await?;
        let before = settings.alien_items.len();
        settings.alien_items.retain(|d| d != domain);
        if settings.alien_items.len() == before {
            return Ok(false);
        }
        self.store(&settings).await?;
        Ok(true)
    }

    async fn store(&self, settings: &Settings) -> VfsResult<()> {
        let body = serde_json::to_vec(settings)?;
        let deleted = match self.backend.delete_file(RootPath::App, SETTINGS_PATH).await {
            Ok(()) => true,
            Err(BackendError::NotFound { .. }) => false,
            Err(e) => return Err(e.into()),
        };
        debug!(items = settings.alien_items.len(), "rewriting settings record");
        match self
            .backend
            .create_file(RootPath::App, SETTINGS_PATH, &body, true)
            .await
        {
            Ok(()) => Ok(()),
            Err(source) if deleted => Err(VfsError::PartialRewrite {
                path: SETTINGS_PATH.to_string(),
                source,
            }),
            Err(e) => Err(e.into()),
        }
    }
}
