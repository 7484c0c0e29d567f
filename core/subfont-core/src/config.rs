//! Serving configuration (made by FontLab https://www.fontlab.com/)

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::request::FontFormat;

/// How artifacts are laid out under the destination directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLayout {
    /// `<dest>/<hash>.<ext>`
    #[default]
    Flat,
    /// `<dest>/<hash>/<hash>.<ext>`
    Nested,
}

/// Immutable options for a [`FontService`](crate::service::FontService).
///
/// Built once at setup; nothing mutates it per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Directory holding the source `.ttf` files.
    pub root: PathBuf,
    /// Cache subdirectory under `root`.
    pub dest: String,
    /// URL prefix used for font urls inside generated CSS. Defaults to `./<dest>/`.
    pub font_path: Option<String>,
    /// Gzip responses when the client accepts it.
    pub gzip: bool,
    /// Inline the TTF as a data URI in generated CSS.
    pub base64: bool,
    pub layout: CacheLayout,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            dest: "dest".to_string(),
            font_path: None,
            gzip: false,
            base64: false,
            layout: CacheLayout::Flat,
        }
    }
}

impl ServeConfig {
    /// Defaults for serving the fonts under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Cache directory name under the root (default `dest`).
    pub fn with_dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = dest.into();
        self
    }

    /// URL prefix written in front of every font file in generated CSS.
    pub fn with_font_path(mut self, font_path: impl Into<String>) -> Self {
        self.font_path = Some(font_path.into());
        self
    }

    /// Compress responses for clients that send `Accept-Encoding: gzip`.
    pub fn with_gzip(mut self, yes: bool) -> Self {
        self.gzip = yes;
        self
    }

    /// Inline the TrueType subset into the stylesheet as a data URI.
    pub fn with_base64(mut self, yes: bool) -> Self {
        self.base64 = yes;
        self
    }

    /// Choose between `dest/<hash>.<ext>` and `dest/<hash>/<hash>.<ext>`.
    pub fn with_layout(mut self, layout: CacheLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Reject configurations that could never serve a request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidArgument(
                "root path required".to_string(),
            ));
        }

        let dest = Path::new(&self.dest);
        let dest_ok = !self.dest.is_empty()
            && dest
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !dest_ok {
            return Err(ConfigError::InvalidArgument(format!(
                "dest must be a relative directory name without `..`, got {:?}",
                self.dest
            )));
        }

        Ok(())
    }

    /// Cache directory relative to the storage root.
    pub fn dest_dir(&self) -> &Path {
        Path::new(&self.dest)
    }

    /// Directory a pipeline run for `hash` writes into.
    pub fn artifact_dir(&self, hash: &str) -> PathBuf {
        match self.layout {
            CacheLayout::Flat => self.dest_dir().to_path_buf(),
            CacheLayout::Nested => self.dest_dir().join(hash),
        }
    }

    /// Storage key of one cached artifact.
    pub fn artifact_key(&self, hash: &str, format: FontFormat) -> PathBuf {
        self.artifact_dir(hash)
            .join(format!("{hash}.{}", format.extension()))
    }

    /// Prefix prepended to artifact file names in generated CSS.
    pub fn font_url_prefix(&self, hash: &str) -> String {
        let base = match &self.font_path {
            Some(path) if path.ends_with('/') => path.clone(),
            Some(path) => format!("{path}/"),
            None => format!("./{}/", self.dest.trim_end_matches('/')),
        };

        match self.layout {
            CacheLayout::Flat => base,
            CacheLayout::Nested => format!("{base}{hash}/"),
        }
    }

    /// Whether `pathname` points inside the cache directory.
    pub fn is_cache_path(&self, pathname: &str) -> bool {
        Path::new(pathname).starts_with(self.dest_dir())
    }
}
