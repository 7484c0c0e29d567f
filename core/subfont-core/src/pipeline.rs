//! The subset pipeline (made by FontLab https://www.fontlab.com/)
//!
//! A run reads one source font, pushes it through an ordered list of
//! [`Stage`]s, and commits whatever comes out the other end through a single
//! storage sink. Stages see the whole batch of files produced so far; most
//! append one new file, the glyph stage replaces the source outright.

use std::io::Read;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ServeConfig;
use crate::error::PipelineError;
use crate::request::{FontFormat, FontRequest};
use crate::storage::Storage;
use crate::transform::{
    CssStage, GlyphStage, RenameStage, Ttf2EotStage, Ttf2SvgStage, Ttf2WoffStage,
};

/// A file travelling between stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontFile {
    pub stem: String,
    pub format: FontFormat,
    pub bytes: Vec<u8>,
}

impl FontFile {
    pub fn new(stem: impl Into<String>, format: FontFormat, bytes: Vec<u8>) -> Self {
        Self {
            stem: stem.into(),
            format,
            bytes,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.stem, self.format.extension())
    }
}

/// One committed output of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Storage key the file was written to.
    pub path: PathBuf,
    pub format: FontFormat,
    pub size: u64,
}

/// Everything a run committed for one content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactSet {
    pub hash: String,
    pub artifacts: Vec<Artifact>,
}

impl ArtifactSet {
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            artifacts: Vec::new(),
        }
    }

    pub fn find(&self, format: FontFormat) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.format == format)
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }
}

/// What a stage may consult besides the files themselves.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub request: &'a FontRequest,
    pub config: &'a ServeConfig,
}

/// A single transformation step.
pub trait Stage: Send + Sync {
    /// Short name used in logs and in [`PipelineError::stage`].
    fn name(&self) -> &'static str;

    fn apply(&self, files: Vec<FontFile>, ctx: &StageContext<'_>) -> anyhow::Result<Vec<FontFile>>;
}

/// Produces the artifacts for one request.
///
/// The service only ever talks to this trait, so tests can swap in doubles
/// that count runs or fail on purpose.
pub trait Pipeline: Send + Sync {
    fn run(
        &self,
        request: &FontRequest,
        storage: &dyn Storage,
        config: &ServeConfig,
    ) -> Result<ArtifactSet, PipelineError>;
}

/// The standard chain: glyph → rename → ttf2eot → ttf2woff → ttf2svg → css.
pub struct SubsetPipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Default for SubsetPipeline {
    fn default() -> Self {
        Self::with_stages(vec![
            Box::new(GlyphStage),
            Box::new(RenameStage),
            Box::new(Ttf2EotStage),
            Box::new(Ttf2WoffStage),
            Box::new(Ttf2SvgStage),
            Box::new(CssStage),
        ])
    }
}

impl SubsetPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stages(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }
}

impl std::fmt::Debug for SubsetPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubsetPipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Pipeline for SubsetPipeline {
    fn run(
        &self,
        request: &FontRequest,
        storage: &dyn Storage,
        config: &ServeConfig,
    ) -> Result<ArtifactSet, PipelineError> {
        let started = Instant::now();
        let ctx = StageContext { request, config };

        let mut source = Vec::new();
        storage
            .open_source(&request.source_path)
            .map_err(anyhow::Error::from)
            .and_then(|mut reader| {
                reader
                    .read_to_end(&mut source)
                    .with_context(|| format!("reading {}", request.source_path.display()))
            })
            .map_err(|err| PipelineError::new("source", err))?;

        let stem = request.basename.clone();
        let mut files = vec![FontFile::new(stem, FontFormat::Ttf, source)];
        for stage in &self.stages {
            files = stage
                .apply(files, &ctx)
                .map_err(|err| PipelineError::new(stage.name(), err))?;
            debug!(stage = stage.name(), hash = %request.hash, files = files.len(), "stage done");
        }

        let dir = config.artifact_dir(&request.hash);
        let mut sink = storage
            .open_write_sink(&dir)
            .map_err(|err| PipelineError::new("dest", err))?;

        let mut set = ArtifactSet::new(&request.hash);
        for file in &files {
            let path = sink
                .write(&file.file_name(), &file.bytes)
                .map_err(|err| PipelineError::new("dest", err))?;
            set.artifacts.push(Artifact {
                path,
                format: file.format,
                size: file.bytes.len() as u64,
            });
        }
        sink.finish().map_err(|e| PipelineError::new("dest", e))?;

        info!(
            hash = %request.hash,
            artifacts = set.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "subset built"
        );
        Ok(set)
    }
}
