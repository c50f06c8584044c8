//! Run configuration.
//!
//! Connection strings come from the process environment, overlaid on values
//! read from `.env` and `.env.local`. The overlay never replaces a variable
//! the process was started with; `.env.local` wins over `.env`.

use anyhow::{Context, Result, bail};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

pub const BASE_ENV_FILE: &str = ".env";
pub const LOCAL_ENV_FILE: &str = ".env.local";

/// Variables read from the dotenv files, resolved behind the real environment.
#[derive(Debug, Default)]
pub struct EnvOverlay {
    vars: HashMap<String, String>,
}

impl EnvOverlay {
    /// Reads `.env` then `.env.local` from `dir`. Missing files are skipped,
    /// malformed ones are an error.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut overlay = Self::default();
        overlay.merge_file(&dir.join(BASE_ENV_FILE))?;
        overlay.merge_file(&dir.join(LOCAL_ENV_FILE))?;
        Ok(overlay)
    }

    fn merge_file(&mut self, path: &Path) -> Result<()> {
        let iter = match dotenvy::from_path_iter(path) {
            Ok(iter) => iter,
            Err(e) if e.not_found() => {
                debug!(path = %path.display(), "Env file not present, skipping");
                return Ok(());
            }
            Err(e) => return Err(e).with_context(|| format!("Error loading {}", path.display())),
        };

        let mut count = 0;
        for item in iter {
            let (key, value) = item.with_context(|| format!("Error parsing {}", path.display()))?;
            self.vars.insert(key, value);
            count += 1;
        }
        debug!(path = %path.display(), count, "Env file loaded");
        Ok(())
    }

    /// Looks `key` up in the process environment first, then in the files.
    pub fn get(&self, key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .or_else(|| self.vars.get(key).cloned())
    }
}

fn require(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => bail!("{key} not set in environment"),
    }
}

/// Endpoints for a source → destination record transfer.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub source_uri: String,
    pub dest_uri: String,
}

impl TransferConfig {
    pub fn from_env(env: &EnvOverlay) -> Result<Self> {
        Self::from_lookup(|key| env.get(key))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            source_uri: require(&lookup, "SOURCE_MONGO_URI")?,
            dest_uri: require(&lookup, "DEST_MONGO_URI")?,
        })
    }
}

/// Endpoint for the hourly aggregation.
#[derive(Debug, Clone)]
pub struct AggregateConfig {
    pub mongo_uri: String,
}

impl AggregateConfig {
    pub fn from_env(env: &EnvOverlay) -> Result<Self> {
        Self::from_lookup(|key| env.get(key))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            mongo_uri: require(&lookup, "MONGO_URI")?,
        })
    }
}
