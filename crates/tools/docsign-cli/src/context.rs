use async_trait::async_trait;
use docsign_config::DocsignConfig;
use docsign_core::{BundleSink, LogNotificationSender, NotifierError, SignedBundle, SigningService, SqliteSigningStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::cli::GlobalOpts;
use crate::error::{CliError, CliResult};

/// Writes each bundle as `document-<id>.bundle.json` into a directory.
pub struct DirectoryBundleSink {
    dir: PathBuf,
}

impl DirectoryBundleSink {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl BundleSink for DirectoryBundleSink {
    async fn deliver(&self, bundle: &SignedBundle) -> Result<(), NotifierError> {
        let json = serde_json::to_vec_pretty(bundle).map_err(|e| NotifierError::Delivery(e.to_string()))?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| NotifierError::Delivery(format!("create {}: {e}", self.dir.display())))?;

        let path = self.dir.join(format!("document-{}.bundle.json", bundle.document_id));
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| NotifierError::Delivery(format!("write {}: {e}", path.display())))?;
        info!("Wrote signed bundle to {:?}", path);
        Ok(())
    }
}

/// Shared state for one CLI invocation.
pub struct CliContext {
    pub store: Arc<SqliteSigningStore>,
    pub service: SigningService,
}

impl CliContext {
    pub fn new(config: &DocsignConfig, opts: &GlobalOpts) -> CliResult<Self> {
        let db_path = opts.db.clone().unwrap_or_else(|| config.storage.path.clone());
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| CliError::Config(format!("cannot create {}: {e}", parent.display())))?;
        }

        let store = Arc::new(SqliteSigningStore::open(&db_path)?);
        let service = SigningService::new(
            store.clone(),
            Arc::new(LogNotificationSender),
            Arc::new(DirectoryBundleSink::new(config.storage.bundle_dir.clone())),
            config,
        );

        Ok(Self { store, service })
    }

    /// Pretty-print a value as JSON on stdout.
    pub fn print_json<T: serde::Serialize>(&self, value: &T) -> CliResult {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}
