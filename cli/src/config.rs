//! TOML configuration file for `subfont serve`.
//!
//! ```toml
//! bind = "0.0.0.0:8765"
//! mount = "/fonts"
//!
//! [serve]
//! root = "public/font"
//! dest = "dest"
//! gzip = true
//! layout = "nested"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use subfont_core::config::ServeConfig;
use thiserror::Error;

pub const DEFAULT_BIND: &str = "127.0.0.1:8765";
pub const DEFAULT_MOUNT: &str = "/";

#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("reading config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub mount: Option<String>,
    pub serve: ServeConfig,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigFileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

/// Mount prefixes always start with `/` and never end with one (except `/` itself).
pub fn normalize_mount(mount: &str) -> String {
    let trimmed = mount.trim().trim_matches('/');
    if trimmed.is_empty() {
        DEFAULT_MOUNT.to_string()
    } else {
        format!("/{trimmed}")
    }
}
