//! Source font discovery (made by FontLab https://www.fontlab.com/)

use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Result};
use regex::Regex;
use serde::Serialize;
use walkdir::WalkDir;

use crate::request::FontRequest;

/// A `.ttf` under the serving root that requests can name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FontSource {
    pub path: PathBuf,
    /// Path relative to the root, `/`-separated; the request path minus its slash.
    pub key: String,
    pub basename: String,
}

impl FontSource {
    /// A request for this source's TrueType subset.
    pub fn request(&self, text: &str, family: Option<String>) -> FontRequest {
        FontRequest::new(&self.key, text, family)
    }
}

/// Enumerates servable sources from some backing store.
pub trait SourceDiscovery {
    fn discover(&self) -> Result<Vec<FontSource>>;
}

/// Walks the serving root, skipping the cache directory.
#[derive(Debug, Clone)]
pub struct RootScanner {
    root: PathBuf,
    dest: PathBuf,
    follow_symlinks: bool,
    name_patterns: Vec<Regex>,
}

impl RootScanner {
    pub fn new(root: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dest: dest.into(),
            follow_symlinks: false,
            name_patterns: Vec::new(),
        }
    }

    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Keep only sources whose basename matches any of `patterns`.
    pub fn with_name_patterns(mut self, patterns: Vec<Regex>) -> Self {
        self.name_patterns = patterns;
        self
    }

    fn matches_name(&self, basename: &str) -> bool {
        self.name_patterns.is_empty()
            || self
                .name_patterns
                .iter()
                .any(|pattern| pattern.is_match(basename))
    }
}

impl SourceDiscovery for RootScanner {
    fn discover(&self) -> Result<Vec<FontSource>> {
        if !self.root.exists() {
            return Err(anyhow!("root path does not exist: {}", self.root.display()));
        }

        let cache_dir = self.root.join(&self.dest);
        let mut found = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_entry(|entry| entry.path() != cache_dir);

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() || !is_source(entry.path()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let Some(key) = request_key(relative) else {
                continue;
            };
            let basename = relative
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !self.matches_name(&basename) {
                continue;
            }

            found.push(FontSource {
                path: entry.path().to_path_buf(),
                key,
                basename,
            });
        }

        found.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(found)
    }
}

/// Requests always derive `<stem>.ttf`, so only that exact spelling is servable.
fn is_source(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("ttf")
}

fn request_key(relative: &Path) -> Option<String> {
    let parts: Option<Vec<&str>> = relative
        .components()
        .map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    parts.map(|parts| parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn recognises_servable_extension_only() {
        assert!(is_source("/A/B/font.ttf".as_ref()));
        assert!(!is_source("/A/B/font.TTF".as_ref()));
        assert!(!is_source("/A/B/font.otf".as_ref()));
        assert!(!is_source("/A/B/font".as_ref()));
    }

    #[test]
    fn discovers_nested_sources_and_skips_cache() {
        let tmp = tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("brush")).expect("mkdir");
        fs::create_dir_all(tmp.path().join("dest")).expect("mkdir");
        fs::write(tmp.path().join("brush/SentyBrush.ttf"), b"").expect("touch");
        fs::write(tmp.path().join("Plain.ttf"), b"").expect("touch");
        fs::write(tmp.path().join("dest/SentyBrush-abc.ttf"), b"").expect("touch");

        let scanner = RootScanner::new(tmp.path(), "dest");
        let sources = scanner.discover().expect("discover");
        let keys: Vec<&str> = sources.iter().map(|source| source.key.as_str()).collect();

        assert_eq!(keys, vec!["Plain.ttf", "brush/SentyBrush.ttf"]);
        assert_eq!(sources[1].basename, "SentyBrush");
    }

    #[test]
    fn filters_by_name_pattern() {
        let tmp = tempdir().expect("tempdir");
        fs::write(tmp.path().join("SentyBrush.ttf"), b"").expect("touch");
        fs::write(tmp.path().join("Plain.ttf"), b"").expect("touch");

        let sources = RootScanner::new(tmp.path(), "dest")
            .with_name_patterns(vec![Regex::new("(?i)brush").expect("regex")])
            .discover()
            .expect("discover");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].key, "SentyBrush.ttf");
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = tempdir().expect("tempdir");
        assert!(RootScanner::new(tmp.path().join("nope"), "dest")
            .discover()
            .is_err());
    }

    #[test]
    fn source_builds_matching_request() {
        let source = FontSource {
            path: PathBuf::from("/srv/brush/SentyBrush.ttf"),
            key: "brush/SentyBrush.ttf".to_string(),
            basename: "SentyBrush".to_string(),
        };
        let request = source.request("abc", None);
        assert_eq!(request.source_path, PathBuf::from("brush/SentyBrush.ttf"));
        assert_eq!(request.text, "abc");
    }

    #[cfg(unix)]
    #[test]
    fn follows_symlinks_when_enabled() {
        use std::os::unix::fs::symlink;

        let tmp = tempdir().expect("tempdir");
        let outside = tempdir().expect("tempdir");
        fs::write(outside.path().join("Linked.ttf"), b"").expect("touch");
        symlink(outside.path(), tmp.path().join("link")).expect("symlink");

        let scanner = RootScanner::new(tmp.path(), "dest");
        let skipped = scanner.discover().expect("discover");
        assert!(skipped.is_empty());

        let sources = RootScanner::new(tmp.path(), "dest")
            .follow_symlinks(true)
            .discover()
            .expect("discover");
        assert_eq!(sources[0].key, "link/Linked.ttf");
    }
}
