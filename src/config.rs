//! Run configuration and stored credentials.
//!
//! Credentials live in ~/.config/remend/config.json. The API key resolves
//! flag first, then the REMEND_API_KEY environment variable, then the
//! stored file; model and API base resolve flag first, then the stored
//! file, then the built-in default.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use url::Url;

use crate::llm::DEFAULT_API_BASE;
use crate::prompts::PromptMode;

pub const DEFAULT_MODEL: &str = "gpt-4o-2024-11-20";
pub const DEFAULT_OUT_DIR: &str = "result/defects4j";
pub const DEFAULT_RUNNER: &str = "defects4j";
pub const DEFAULT_WIDTH_TRY: u32 = 7;
pub const DEFAULT_DEEP_TRY: u32 = 5;
pub const DEFAULT_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_TEST_TIMEOUT_SECS: u64 = 1200;
pub const DEFAULT_DEBUG_INFO_DIR: &str = "data/output/DebugInfo";
pub const DEFAULT_METHOD_CALLS_DIR: &str = "data/output/MethodCalls";
pub const DEFAULT_DYNAMIC_DIR: &str = "data/dynamic";

const API_KEY_ENV: &str = "REMEND_API_KEY";

/// Everything one repair run needs, resolved from flags, the stored
/// config, and defaults.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub data_path: PathBuf,
    pub exceptions_path: PathBuf,
    pub base_dir: PathBuf,
    pub out_dir: PathBuf,
    pub mode: PromptMode,
    pub model: String,
    pub runner: String,
    pub width_try: u32,
    pub deep_try: u32,
    pub temperature: f64,
    pub early_stop: bool,
    pub test_timeout: Duration,
    pub debug_info_dir: PathBuf,
    pub method_calls_dir: PathBuf,
    pub dynamic_dir: PathBuf,
    pub fresh: bool,
}

/// On-disk settings, `~/.config/remend/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredConfig {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub model: Option<String>,
}

impl StoredConfig {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("remend"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load from disk, or return defaults. A corrupt file is moved aside
    /// so one bad edit does not wedge every run.
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        warn!(
                            path = %path.display(),
                            error = %err,
                            "config file was corrupt; a backup was saved and defaults loaded"
                        );
                    }
                }
            }
        }
        Self::default()
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir().context("could not determine the config directory")?;
        self.save_to(&dir)
    }

    fn save_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating config directory {}", dir.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(err) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                warn!(error = %err, "failed to restrict config directory permissions");
            }
        }

        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(self)?;
        write_config_atomic(&path, &content)
            .with_context(|| format!("writing config to {}", path.display()))
    }

    /// Apply non-blank overrides, validating the API base before anything
    /// is stored. Returns whether any field changed.
    pub fn update(
        &mut self,
        api_key: Option<String>,
        api_base: Option<String>,
        model: Option<String>,
    ) -> Result<bool> {
        let api_key = nonempty(api_key);
        let api_base = nonempty(api_base);
        let model = nonempty(model);

        if let Some(base) = &api_base {
            validate_api_base(base)?;
        }

        let changed = api_key.is_some() || api_base.is_some() || model.is_some();
        if let Some(key) = api_key {
            self.api_key = Some(key);
        }
        if let Some(base) = api_base {
            self.api_base = Some(base);
        }
        if let Some(model) = model {
            self.model = Some(model);
        }
        Ok(changed)
    }

    /// Config file location for display.
    pub fn location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/remend/config.json".to_string())
    }
}

/// Flag, then REMEND_API_KEY, then the stored config.
pub fn resolve_api_key(flag: Option<String>, stored: &StoredConfig) -> Result<String> {
    if let Some(key) = nonempty(flag) {
        return Ok(key);
    }
    if let Some(key) = nonempty(std::env::var(API_KEY_ENV).ok()) {
        return Ok(key);
    }
    if let Some(key) = nonempty(stored.api_key.clone()) {
        return Ok(key);
    }
    bail!(
        "no API key configured; pass --api-key, set {}, or store one with `remend config --api-key <key>` ({})",
        API_KEY_ENV,
        StoredConfig::location()
    )
}

/// Flag, then the stored config, then the OpenAI default. The result must
/// parse as an http(s) URL.
pub fn resolve_api_base(flag: Option<String>, stored: &StoredConfig) -> Result<String> {
    let base = nonempty(flag)
        .or_else(|| nonempty(stored.api_base.clone()))
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
    validate_api_base(&base)?;
    Ok(base)
}

pub fn resolve_model(flag: Option<String>, stored: &StoredConfig) -> String {
    nonempty(flag)
        .or_else(|| nonempty(stored.model.clone()))
        .unwrap_or_else(|| DEFAULT_MODEL.to_string())
}

fn validate_api_base(base: &str) -> Result<()> {
    let url = Url::parse(base).with_context(|| format!("invalid API base URL: {base}"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        bail!("API base URL must be http or https: {base}");
    }
    Ok(())
}

fn nonempty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

/// Write through a temp file so a crash never leaves a half-written
/// config, with owner-only permissions since the file may hold a key.
fn write_config_atomic(path: &Path, content: &str) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(err) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            warn!(error = %err, "failed to restrict config file permissions");
        }
    }

    file.write_all(content.as_bytes())?;
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}
