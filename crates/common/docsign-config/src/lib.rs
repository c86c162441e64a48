use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable consulted when no explicit config path is given.
pub const CONFIG_PATH_ENV: &str = "DOCSIGN_CONFIG";

/// Default file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "docsign.toml";

/// Top-level configuration for the signing subsystem and its front ends.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DocsignConfig {
    pub identity: IdentityConfig,
    pub signing: SigningConfig,
    pub storage: StorageConfig,
    pub notifications: NotificationConfig,
    pub logging: LoggingConfig,
}

/// How personal signing identities are issued.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct IdentityConfig {
    /// Organisation name placed in the certificate subject (`O=`).
    pub organization: String,
    /// Validity window of freshly issued certificates, in days.
    pub validity_days: u32,
    /// Cost of the passphrase-based key encryption.
    pub kdf: KdfConfig,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            organization: "Procurement".to_string(),
            // Two years
            validity_days: 730,
            kdf: KdfConfig::default(),
        }
    }
}

/// Argon2id parameters for the key-encryption key.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct KdfConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfConfig {
    /// Minimal-cost profile for tests and throwaway environments.
    pub fn insecure_fast() -> Self {
        Self {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Whether the signed content is embedded in the CMS blob.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignatureMode {
    #[default]
    Attached,
    Detached,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct SigningConfig {
    pub mode: SignatureMode,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file used by the CLI.
    pub path: PathBuf,
    /// Where packaged bundles of fully signed documents are written.
    pub bundle_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("docsign.db"),
            bundle_dir: PathBuf::from("bundles"),
        }
    }
}

/// Message templates. `{document_id}` is substituted on render.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct NotificationConfig {
    pub ready_subject: String,
    pub ready_body: String,
    pub pending_subject: String,
    pub pending_body: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            ready_subject: "Document #{document_id} is awaiting your signature".to_string(),
            ready_body: "All participants have signed document #{document_id}. Only your signature remains. Please open the system to approve it.".to_string(),
            pending_subject: "Document #{document_id} is awaiting your signature".to_string(),
            pending_body: "Document #{document_id} has been completed and is awaiting your signature.".to_string(),
        }
    }
}

impl NotificationConfig {
    pub fn render(template: &str, document_id: impl std::fmt::Display) -> String {
        template.replace("{document_id}", &document_id.to_string())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Load config from a TOML file.
pub fn load_config(path: &Path) -> anyhow::Result<DocsignConfig> {
    let config_content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file from {}: {}", path.display(), e))?;
    let config: DocsignConfig = toml::from_str(&config_content)
        .map_err(|e| anyhow::anyhow!("Failed to parse TOML config from {}: {}", path.display(), e))?;
    Ok(config)
}

/// Resolve the config: explicit path, then `$DOCSIGN_CONFIG`, then
/// `./docsign.toml` if present, otherwise defaults.
pub fn resolve_config(explicit: Option<&Path>) -> anyhow::Result<DocsignConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return load_config(Path::new(&path));
    }
    let fallback = Path::new(DEFAULT_CONFIG_FILE);
    if fallback.exists() {
        return load_config(fallback);
    }
    Ok(DocsignConfig::default())
}
