//! Configuration for the fix pipeline.
//!
//! Settings live in a `.tsugix.json` found in the working directory or the
//! user's home directory; `TSUGIX_CONFIG` overrides the search entirely. A
//! malformed file falls back to defaults rather than aborting a run whose
//! whole point is recovering from a failure.

use crate::llm::client::Provider;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const CONFIG_FILE_NAME: &str = ".tsugix.json";
pub const CONFIG_ENV_VAR: &str = "TSUGIX_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub provider: Provider,
    pub model: String,
    /// `None` means the provider's default endpoint.
    pub endpoint: Option<String>,
    pub max_tokens: u32,
    pub auto_backup: bool,
    pub auto_apply: bool,
    pub auto_rerun: bool,
    /// Per-LLM-call deadline, seconds.
    pub timeout: u64,
    pub retry_count: u32,
    /// Replaces the built-in system prompt verbatim when set.
    pub custom_prompt_template: Option<String>,
    pub temperature: f32,
    /// Root for path-safety checks and backups; `None` means the working
    /// directory.
    pub root_directory: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: "gpt-4o".to_string(),
            endpoint: None,
            max_tokens: 8000,
            auto_backup: true,
            auto_apply: false,
            auto_rerun: false,
            timeout: 30,
            retry_count: 1,
            custom_prompt_template: None,
            temperature: 0.2,
            root_directory: None,
        }
    }
}

impl Config {
    /// Load from the first config file found, or defaults when there is
    /// none or it cannot be parsed.
    pub fn load() -> Self {
        match Self::locate() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load a specific file, falling back entirely to defaults on any
    /// read or parse failure.
    pub fn load_from(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                warn!(path = %path.display(), %err, "config file unreadable, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                warn!(path = %path.display(), %err, "config file malformed, using defaults");
                Self::default()
            }
        }
    }

    /// `TSUGIX_CONFIG`, then `./.tsugix.json`, then `~/.tsugix.json`.
    fn locate() -> Option<PathBuf> {
        if let Ok(override_path) = std::env::var(CONFIG_ENV_VAR) {
            if !override_path.trim().is_empty() {
                return Some(PathBuf::from(override_path));
            }
        }
        if let Ok(cwd) = std::env::current_dir() {
            let local = cwd.join(CONFIG_FILE_NAME);
            if local.exists() {
                return Some(local);
            }
        }
        if let Some(home) = dirs::home_dir() {
            let user = home.join(CONFIG_FILE_NAME);
            if user.exists() {
                return Some(user);
            }
        }
        None
    }

    /// The effective patch/backup root.
    pub fn root_directory(&self, working_directory: &Path) -> PathBuf {
        self.root_directory
            .clone()
            .unwrap_or_else(|| working_directory.to_path_buf())
    }

    /// The system prompt this run should use.
    pub fn system_prompt(&self) -> &str {
        self.custom_prompt_template
            .as_deref()
            .unwrap_or(crate::llm::prompts::FIX_SYSTEM)
    }
}
