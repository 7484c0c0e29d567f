//! Cache pre-warming (made by FontLab https://www.fontlab.com/)
//!
//! Builds the subset for the same text across every source under the root,
//! so the first visitor never waits on the pipeline.

use anyhow::{Context, Result};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use regex::Regex;
use serde::Serialize;

use crate::pipeline::ArtifactSet;
use crate::service::FontService;
use crate::sources::{FontSource, RootScanner, SourceDiscovery};

#[derive(Debug, Default, Clone)]
pub struct WarmOptions {
    pub follow_symlinks: bool,
    pub jobs: Option<usize>,
    pub name_patterns: Vec<Regex>,
    /// CSS family override baked into the generated stylesheets.
    pub family: Option<String>,
}

/// One source and what was cached for it.
#[derive(Debug, Clone, Serialize)]
pub struct WarmedFont {
    pub source: String,
    #[serde(flatten)]
    pub artifacts: ArtifactSet,
}

/// Sources under the service root that `opts` selects.
pub fn discover(service: &FontService, opts: &WarmOptions) -> Result<Vec<FontSource>> {
    let config = service.config();
    RootScanner::new(&config.root, config.dest_dir())
        .follow_symlinks(opts.follow_symlinks)
        .with_name_patterns(opts.name_patterns.clone())
        .discover()
}

/// Build (or reuse) the subset for `text` of every selected source.
pub fn warm(service: &FontService, text: &str, opts: &WarmOptions) -> Result<Vec<WarmedFont>> {
    let sources = discover(service, opts)?;

    let run_warm = || -> Result<Vec<WarmedFont>> {
        sources
            .par_iter()
            .map(|source| {
                let request = source.request(text, opts.family.clone());
                let artifacts = service
                    .prebuild(&request)
                    .with_context(|| format!("warming {}", source.key))?;
                Ok(WarmedFont {
                    source: source.key.clone(),
                    artifacts,
                })
            })
            .collect()
    };

    if let Some(jobs) = opts.jobs {
        let pool = ThreadPoolBuilder::new().num_threads(jobs).build()?;
        pool.install(run_warm)
    } else {
        run_warm()
    }
}
