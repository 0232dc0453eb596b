//! File-backed configuration and session store.
//!
//! # Design
//! - One JSON document holds both the configuration and the persisted session.
//! - Writes go to a sibling temporary file and are renamed into place while the
//!   document lock is held, so readers never observe a torn file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::defaults::STORE_FILE_NAME;
use crate::error::{ConfigError, ConfigResult};
use crate::model::{SessionConfig, SessionState, StoreDocument};
use crate::validate::validate_config;

/// Durable key/value store for the session configuration and job records.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    path: PathBuf,
    document: Mutex<StoreDocument>,
}

impl ConfigStore {
    /// Open the store file at `path`, creating parent directories as needed.
    ///
    /// A missing file yields the default document; nothing is written until the
    /// first mutation.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created, the file cannot
    /// be read, or its contents are not a valid store document.
    #[instrument(name = "config_store.open", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| ConfigError::io("store.create_dir", parent.to_path_buf(), source))?;
        }

        let document = match fs::read(&path).await {
            Ok(bytes) => {
                let document: StoreDocument = serde_json::from_slice(&bytes).map_err(|source| {
                    ConfigError::Parse {
                        path: path.clone(),
                        source,
                    }
                })?;
                if let Err(err) = validate_config(&document.config) {
                    warn!(error = %err, "stored configuration invalid; using defaults");
                    StoreDocument {
                        config: SessionConfig::default(),
                        session: document.session,
                    }
                } else {
                    document
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!("no configuration store found; starting from defaults");
                StoreDocument::default()
            }
            Err(source) => return Err(ConfigError::io("store.read", path, source)),
        };

        debug!(jobs = document.session.jobs.len(), "configuration store loaded");
        Ok(Self {
            inner: Arc::new(StoreInner {
                path,
                document: Mutex::new(document),
            }),
        })
    }

    /// Open the store under a data directory using the standard file name.
    ///
    /// # Errors
    ///
    /// See [`ConfigStore::open`].
    pub async fn open_in_dir(dir: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::open(dir.as_ref().join(STORE_FILE_NAME)).await
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Current configuration.
    pub async fn config(&self) -> SessionConfig {
        self.inner.document.lock().await.config.clone()
    }

    /// Validate and durably replace the configuration.
    ///
    /// # Errors
    ///
    /// Returns a validation error without touching the store, or an IO error
    /// when the write fails.
    #[instrument(name = "config_store.set_config", skip_all)]
    pub async fn set_config(&self, config: SessionConfig) -> ConfigResult<()> {
        validate_config(&config)?;
        let mut document = self.inner.document.lock().await;
        let mut next = document.clone();
        next.config = config;
        self.write_document(&next).await?;
        *document = next;
        Ok(())
    }

    /// Last persisted session state.
    pub async fn session(&self) -> SessionState {
        self.inner.document.lock().await.session.clone()
    }

    /// Durably replace the session state.
    ///
    /// # Errors
    ///
    /// Returns an error when the document cannot be serialised or written.
    #[instrument(name = "config_store.save_session", skip_all, fields(jobs = state.jobs.len()))]
    pub async fn save_session(&self, state: SessionState) -> ConfigResult<()> {
        let mut document = self.inner.document.lock().await;
        let mut next = document.clone();
        next.session = state;
        self.write_document(&next).await?;
        *document = next;
        Ok(())
    }

    async fn write_document(&self, document: &StoreDocument) -> ConfigResult<()> {
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|source| ConfigError::Serialize { source })?;
        let path = &self.inner.path;
        let tmp = temp_path(path);
        fs::write(&tmp, &bytes)
            .await
            .map_err(|source| ConfigError::io("store.write", tmp.clone(), source))?;
        if let Err(source) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(ConfigError::io("store.rename", path.clone(), source));
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
