//! subfont-core: web fonts cut to measure, then remembered
//!
//! A browser asks for `SentyBrush.css?text=abc`. Rather than shipping the whole
//! brush-script family for three letters, this library trims the source font
//! down to the glyphs that text needs, dresses the result up as TTF, EOT, WOFF
//! and SVG, writes a matching `@font-face` stylesheet, and files the lot away
//! in a content-addressed cache so the next visitor with the same request gets
//! it straight off the shelf.
//!
//! ## How a request travels
//!
//! - [`request`]: turns `path + query` into a [`FontRequest`] (format, text,
//!   content hash, source path, optional family name)
//! - [`service`]: the dispatcher; checks the cache, runs the pipeline on a
//!   miss (one run per key, however many callers are waiting) and hands back a
//!   readable artifact
//! - [`pipeline`]: an ordered list of [`Stage`]s (glyph → rename → ttf2eot →
//!   ttf2woff → ttf2svg → css) whose output is committed through a storage sink
//! - [`storage`]: the only place bytes touch a backing store; filesystem and
//!   in-memory implementations ship here, anything else can be plugged in
//!
//! ## A Sample Conversation
//!
//! ```rust,no_run
//! use subfont_core::config::ServeConfig;
//! use subfont_core::request::FontRequest;
//! use subfont_core::service::FontService;
//!
//! let service = FontService::new(ServeConfig::new("public/font"))?;
//! let request = FontRequest::parse("/SentyBrush.css", Some("text=abc"));
//!
//! let served = service.resolve(&request)?;
//! println!("{} ({:?})", served.path.display(), served.status);
//! #
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ---
//!
//! Crafted with care at FontLab https://www.fontlab.com/

pub mod config;
pub mod error;
mod flight;
pub mod output;
pub mod pipeline;
pub mod request;
pub mod service;
pub mod sources;
pub mod storage;
pub mod transform;
pub mod warm;

#[cfg(test)]
pub(crate) mod test_fonts;

pub use crate::config::{CacheLayout, ServeConfig};
pub use crate::error::{ConfigError, PipelineError, ServeError, StorageError};
pub use crate::pipeline::{Artifact, ArtifactSet, FontFile, Pipeline, Stage, SubsetPipeline};
pub use crate::request::{FontFormat, FontRequest};
pub use crate::service::{CacheStatus, FontService, ServedArtifact};
pub use crate::storage::{FsStorage, MemoryStorage, Storage, WriteSink};
