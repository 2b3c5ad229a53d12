//! Application configuration management.
//!
//! Configuration is stored at `~/.config/eduhub/config.json` and holds the
//! API base URL, the token store backend, and the last email used to sign
//! in. `EDUHUB_API_URL` and `EDUHUB_TOKEN_STORE` override the file.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::DEFAULT_API_URL;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "eduhub";

/// Config file name
const CONFIG_FILE: &str = "config.json";

pub const API_URL_ENV: &str = "EDUHUB_API_URL";
pub const TOKEN_STORE_ENV: &str = "EDUHUB_TOKEN_STORE";

/// Where the session's tokens are kept between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStoreKind {
    #[default]
    File,
    Keyring,
    /// Nothing persists; every run starts signed out.
    Memory,
}

impl FromStr for TokenStoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(TokenStoreKind::File),
            "keyring" | "keychain" => Ok(TokenStoreKind::Keyring),
            "memory" | "none" => Ok(TokenStoreKind::Memory),
            other => Err(format!("unknown token store '{}' (file, keyring, memory)", other)),
        }
    }
}

impl fmt::Display for TokenStoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TokenStoreKind::File => "file",
            TokenStoreKind::Keyring => "keyring",
            TokenStoreKind::Memory => "memory",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    pub api_url: Option<String>,
    #[serde(default)]
    pub token_store: TokenStoreKind,
    pub last_email: Option<String>,
}

impl Config {
    /// The stored configuration with environment overrides applied.
    pub fn load() -> Result<Self> {
        Ok(Self::load_file()?.with_overrides(|key| std::env::var(key).ok()))
    }

    fn load_file() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Record the last email used to sign in. Other stored settings are kept
    /// as they are in the file, without environment overrides.
    pub fn remember_email(email: &str) -> Result<()> {
        let mut config = Self::load_file()?;
        config.last_email = Some(email.to_string());
        config.save()
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Apply environment overrides. `lookup` is `std::env::var` outside tests.
    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(API_URL_ENV).filter(|u| !u.trim().is_empty()) {
            self.api_url = Some(url.trim().to_string());
        }
        if let Some(kind) = lookup(TOKEN_STORE_ENV) {
            match kind.parse() {
                Ok(kind) => self.token_store = kind,
                Err(e) => warn!(error = %e, "Ignoring {}", TOKEN_STORE_ENV),
            }
        }
        self
    }

    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }
}
