//! Request dispatcher (made by FontLab https://www.fontlab.com/)
//!
//! [`FontService::resolve`] is the whole request lifecycle minus HTTP: reject
//! what cannot be served, look in the cache, build on a miss, and return a
//! readable artifact. It blocks on storage and font work, so async callers
//! should run it on a blocking thread.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::config::ServeConfig;
use crate::error::{ConfigError, PipelineError, ServeError};
use crate::flight::InFlight;
use crate::pipeline::{Artifact, ArtifactSet, Pipeline, SubsetPipeline};
use crate::request::{FontFormat, FontRequest};
use crate::storage::{ArtifactStream, FsStorage, Storage};

/// Where a served artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Already in the cache.
    Hit,
    /// Built for this request (or by a concurrent one it waited on).
    Miss,
    /// Requested by its cache path.
    Direct,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Direct => "direct",
        }
    }
}

#[derive(Debug)]
pub struct ServedArtifact {
    /// Storage key of the artifact.
    pub path: PathBuf,
    pub format: FontFormat,
    pub status: CacheStatus,
    pub stream: ArtifactStream,
}

struct Inner {
    config: ServeConfig,
    storage: Arc<dyn Storage>,
    pipeline: Arc<dyn Pipeline>,
    in_flight: InFlight<Result<ArtifactSet, PipelineError>>,
}

/// Cheap to clone; clones share the cache and the in-flight registry.
#[derive(Clone)]
pub struct FontService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for FontService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontService")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl FontService {
    /// Serve fonts from `config.root` on the local filesystem.
    pub fn new(config: ServeConfig) -> Result<Self, ConfigError> {
        let storage = Arc::new(FsStorage::new(config.root.clone()));
        Self::with_storage(config, storage)
    }

    /// Serve from any [`Storage`] backend with the default [`SubsetPipeline`].
    ///
    /// Sources and the cache directory are both looked up in `storage`;
    /// `config.root` is only validated, never opened.
    pub fn with_storage(
        config: ServeConfig,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, ConfigError> {
        Self::with_parts(config, storage, Arc::new(SubsetPipeline::new()))
    }

    /// Full control over both seams: where bytes live and how artifacts are made.
    ///
    /// Fails with [`ConfigError::InvalidArgument`] when `config` cannot serve
    /// anything (no root, or a `dest` that escapes it).
    pub fn with_parts(
        config: ServeConfig,
        storage: Arc<dyn Storage>,
        pipeline: Arc<dyn Pipeline>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                storage,
                pipeline,
                in_flight: InFlight::default(),
            }),
        })
    }

    /// The configuration this service was built with.
    pub fn config(&self) -> &ServeConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &dyn Storage {
        self.inner.storage.as_ref()
    }

    /// Serve one request, building its artifacts first if needed.
    pub fn resolve(&self, request: &FontRequest) -> Result<ServedArtifact, ServeError> {
        let format = request
            .format()
            .ok_or_else(|| ServeError::UnsupportedFormat(request.extension.clone()))?;
        let storage = self.storage();

        if self.config().is_cache_path(&request.pathname) {
            let key = PathBuf::from(&request.pathname);
            debug!(path = %key.display(), "direct cache request");
            return match storage.open_read(&key)? {
                Some(stream) => Ok(ServedArtifact {
                    path: key,
                    format,
                    status: CacheStatus::Direct,
                    stream,
                }),
                None => Err(ServeError::ArtifactNotFound {
                    hash: request.basename.clone(),
                    extension: request.extension.clone(),
                }),
            };
        }

        self.ensure_source(request)?;

        let key = self.config().artifact_key(&request.hash, format);
        if storage.has(&key)? {
            debug!(hash = %request.hash, format = %format, "cache hit");
            return self.open(request, key, format, CacheStatus::Hit);
        }

        debug!(hash = %request.hash, format = %format, "cache miss");
        let set = self.build(request, format)?;
        if set.find(format).is_none() {
            return Err(self.not_found(request));
        }
        self.open(request, key, format, CacheStatus::Miss)
    }

    /// Build (or reuse) every artifact for `request` without serving one.
    pub fn prebuild(&self, request: &FontRequest) -> Result<ArtifactSet, ServeError> {
        if !request.is_supported() {
            return Err(ServeError::UnsupportedFormat(request.extension.clone()));
        }
        self.ensure_source(request)?;
        Ok(self.build(request, FontFormat::Css)?)
    }

    fn ensure_source(&self, request: &FontRequest) -> Result<(), ServeError> {
        if self.storage().has(&request.source_path)? {
            Ok(())
        } else {
            Err(ServeError::SourceNotFound(request.source_path.clone()))
        }
    }

    /// Run the pipeline once per hash. `wanted` is re-checked inside the flight
    /// so a run that committed just before we joined is not repeated.
    fn build(
        &self,
        request: &FontRequest,
        wanted: FontFormat,
    ) -> Result<ArtifactSet, PipelineError> {
        let inner = &self.inner;
        inner.in_flight.run(&request.hash, || {
            let wanted_key = inner.config.artifact_key(&request.hash, wanted);
            if matches!(inner.storage.has(&wanted_key), Ok(true)) {
                return Ok(self.cached_set(request));
            }
            inner
                .pipeline
                .run(request, inner.storage.as_ref(), &inner.config)
        })
    }

    /// Whatever is already cached for `request.hash`.
    fn cached_set(&self, request: &FontRequest) -> ArtifactSet {
        let mut set = ArtifactSet::new(&request.hash);
        for format in FontFormat::ALL {
            let path = self.config().artifact_key(&request.hash, format);
            if let Ok(Some(stream)) = self.storage().open_read(&path) {
                set.artifacts.push(Artifact {
                    path,
                    format,
                    size: stream.len.unwrap_or_default(),
                });
            }
        }
        set
    }

    fn open(
        &self,
        request: &FontRequest,
        key: PathBuf,
        format: FontFormat,
        status: CacheStatus,
    ) -> Result<ServedArtifact, ServeError> {
        match self.storage().open_read(&key)? {
            Some(stream) => Ok(ServedArtifact {
                path: key,
                format,
                status,
                stream,
            }),
            None => Err(self.not_found(request)),
        }
    }

    fn not_found(&self, request: &FontRequest) -> ServeError {
        ServeError::ArtifactNotFound {
            hash: request.hash.clone(),
            extension: request.extension.clone(),
        }
    }
}
