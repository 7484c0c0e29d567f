//! HTTP front for subfont (made by FontLab https://www.fontlab.com/)
//!
//! Any GET that falls through to the font router is parsed as a font request:
//! `/<dir>/<Family>.<css|ttf|woff|eot|svg>?text=...&name=...`. The answer is
//! streamed straight from the cache, building it first when necessary.

use std::io::{self, Read};

use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt as _;
use subfont_core::error::ServeError;
use subfont_core::request::FontRequest;
use subfont_core::service::{FontService, ServedArtifact};
use subfont_core::storage::ByteStream;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::normalize_mount;

/// Diagnostic header telling whether the cache answered.
pub const CACHE_HEADER: &str = "x-subfont-cache";

const CHUNK_SIZE: usize = 64 * 1024;

/// Bind and serve until the process is stopped.
pub async fn serve(bind: &str, mount: &str, service: FontService) -> Result<()> {
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding HTTP server to {bind}"))?;
    let address = listener.local_addr().context("reading bound address")?;

    info!(
        %address,
        root = %service.config().root.display(),
        mount = %normalize_mount(mount),
        "subfont listening"
    );

    axum::serve(listener, router(service, mount))
        .await
        .context("serving HTTP")?;
    Ok(())
}

/// `/health` plus the font middleware mounted at `mount`.
pub fn router(service: FontService, mount: &str) -> Router {
    let fonts = font_router(service);
    let mount = normalize_mount(mount);
    let app = Router::new().route("/health", get(|| async { "ok" }));

    let app = if mount == "/" {
        app.fallback_service(fonts)
    } else {
        app.nest_service(&mount, fonts)
    };
    app.layer(TraceLayer::new_for_http())
}

/// The bare font middleware: every path is a font request.
pub fn font_router(service: FontService) -> Router {
    let gzip = service.config().gzip;
    let fonts = Router::new().fallback(font_handler).with_state(service);
    if gzip {
        fonts.layer(CompressionLayer::new().gzip(true))
    } else {
        fonts
    }
}

async fn font_handler(State(service): State<FontService>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET, HEAD")],
        )
            .into_response();
    }

    let request = FontRequest::parse(uri.path(), uri.query());
    let resolved = task::spawn_blocking(move || service.resolve(&request)).await;

    match resolved {
        Ok(Ok(served)) => artifact_response(served, method == Method::HEAD),
        Ok(Err(err)) => ServeFailure(err).into_response(),
        Err(err) => {
            error!(error = %err, "font request task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response()
        }
    }
}

fn artifact_response(served: ServedArtifact, head_only: bool) -> Response {
    debug!(
        path = %served.path.display(),
        cache = served.status.as_str(),
        "serving artifact"
    );

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, served.format.content_type())
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(CACHE_HEADER, served.status.as_str());
    if let Some(len) = served.stream.len {
        builder = builder.header(header::CONTENT_LENGTH, HeaderValue::from(len));
    }

    let body = if head_only {
        Body::empty()
    } else {
        stream_body(served.stream.reader)
    };
    builder.body(body).unwrap_or_else(|err| {
        error!(error = %err, "building artifact response");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}

/// Pump a blocking reader into the response body chunk by chunk.
fn stream_body(mut reader: ByteStream) -> Body {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(4);

    task::spawn_blocking(move || {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                        // client went away
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    let _ = tx.blocking_send(Err(err));
                    break;
                }
            }
        }
    });

    // fused: compression polls again after the end of the stream
    let chunks = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (chunk, rx))
    })
    .fuse();
    Body::from_stream(chunks)
}

/// A failed font request on its way to becoming an HTTP status.
#[derive(Debug)]
pub struct ServeFailure(pub ServeError);

impl ServeFailure {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ServeError::UnsupportedFormat(_)
            | ServeError::SourceNotFound(_)
            | ServeError::ArtifactNotFound { .. } => StatusCode::NOT_FOUND,
            ServeError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServeError::Pipeline(_) => StatusCode::BAD_GATEWAY,
            ServeError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServeFailure {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self.0 {
            ServeError::Pipeline(err) => {
                warn!(stage = err.stage(), error = %err, "font pipeline failed")
            }
            ServeError::Storage(err) => error!(error = %err, "storage failure"),
            other => debug!(error = %other, status = status.as_u16(), "font request rejected"),
        }

        let reason = status.canonical_reason().unwrap_or("error");
        (status, [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")], reason).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use flate2::read::GzDecoder;
    use http_body_util::BodyExt;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use subfont_core::config::ServeConfig;
    use subfont_core::error::{PipelineError, StorageError};
    use subfont_core::pipeline::{ArtifactSet, Pipeline, SubsetPipeline};
    use subfont_core::storage::{ArtifactStream, MemoryStorage, Storage, WriteSink};
    use tower::util::ServiceExt;

    const SENTY_BRUSH: &[u8] = include_bytes!("../../test-fonts/SentyBrush.ttf");

    fn fixture_storage() -> MemoryStorage {
        let storage = MemoryStorage::new();
        storage.insert("SentyBrush.ttf", SENTY_BRUSH.to_vec());
        storage
    }

    fn app_with(config: ServeConfig, storage: impl Storage + 'static) -> Router {
        let service = FontService::with_storage(config, Arc::new(storage)).expect("service");
        router(service, "/")
    }

    fn app() -> Router {
        app_with(ServeConfig::new("fonts"), fixture_storage())
    }

    async fn get(app: Router, uri: &str) -> Response {
        let request = Request::get(uri).body(Body::empty()).unwrap();
        app.oneshot(request).await.unwrap()
    }

    async fn body_text(response: Response) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).expect("utf8 body")
    }

    #[tokio::test]
    async fn css_request_builds_and_serves_stylesheet() {
        let response = get(app(), "/SentyBrush.css?text=abc").await;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/css; charset=utf-8");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[CACHE_HEADER], "miss");
        assert!(headers.contains_key(header::CONTENT_LENGTH));

        let css = body_text(response).await;
        assert!(css.contains("@font-face"), "{css}");
        for ext in ["eot", "woff", "ttf", "svg"] {
            assert!(css.contains(&format!(".{ext}")), "missing {ext} in {css}");
        }
        assert!(css.contains("font-family: \"SentyBrush\""));
    }

    #[tokio::test]
    async fn name_parameter_overrides_family() {
        let response = get(app(), "/SentyBrush.css?text=abc&name=target-font-family").await;
        let css = body_text(response).await;
        assert!(css.contains("font-family: \"target-font-family\""), "{css}");
    }

    #[tokio::test]
    async fn binary_formats_have_their_content_types() {
        let app = app();
        let cases: [(&str, &str, &[u8]); 3] = [
            ("ttf", "font/ttf", &[0, 1, 0, 0]),
            ("woff", "font/woff", b"wOFF"),
            ("svg", "image/svg+xml", b"<?xml"),
        ];
        for (ext, content_type, magic) in cases {
            let response = get(app.clone(), &format!("/SentyBrush.{ext}?text=ab")).await;
            assert_eq!(response.status(), StatusCode::OK, "{ext}");
            assert_eq!(response.headers()[header::CONTENT_TYPE], content_type);
            let body = response.into_body().collect().await.unwrap().to_bytes();
            assert!(body.starts_with(magic), "{ext}");
        }
    }

    #[tokio::test]
    async fn unsupported_format_is_not_found() {
        let response = get(app(), "/SentyBrush.woff2?text=abc").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_source_is_not_found() {
        let response = get(app(), "/Nowhere.css?text=abc").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[derive(Default)]
    struct CountingPipeline {
        runs: AtomicUsize,
    }

    impl Pipeline for CountingPipeline {
        fn run(
            &self,
            request: &FontRequest,
            storage: &dyn Storage,
            config: &ServeConfig,
        ) -> Result<ArtifactSet, PipelineError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            SubsetPipeline::new().run(request, storage, config)
        }
    }

    #[tokio::test]
    async fn repeat_request_is_served_from_cache() {
        let pipeline = Arc::new(CountingPipeline::default());
        let service = FontService::with_parts(
            ServeConfig::new("fonts"),
            Arc::new(fixture_storage()),
            pipeline.clone(),
        )
        .expect("service");
        let app = router(service, "/");

        let first = get(app.clone(), "/SentyBrush.woff?text=abc").await;
        assert_eq!(first.headers()[CACHE_HEADER], "miss");
        let second = get(app.clone(), "/SentyBrush.woff?text=cab").await;
        assert_eq!(second.headers()[CACHE_HEADER], "hit");
        let css = get(app, "/SentyBrush.css?text=abc").await;
        assert_eq!(css.headers()[CACHE_HEADER], "hit");

        assert_eq!(pipeline.runs.load(Ordering::SeqCst), 1);
    }

    /// Accepts writes but refuses to commit them.
    #[derive(Clone)]
    struct ReadOnlyCache(MemoryStorage);

    struct RefusingSink;

    impl WriteSink for RefusingSink {
        fn write(&mut self, name: &str, _bytes: &[u8]) -> Result<std::path::PathBuf, StorageError> {
            Ok(Path::new("dest").join(name))
        }

        fn finish(self: Box<Self>) -> Result<(), StorageError> {
            Err(StorageError::Io {
                path: "dest".into(),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
            })
        }
    }

    impl Storage for ReadOnlyCache {
        fn has(&self, key: &Path) -> Result<bool, StorageError> {
            self.0.has(key)
        }

        fn open_read(&self, key: &Path) -> Result<Option<ArtifactStream>, StorageError> {
            self.0.open_read(key)
        }

        fn open_source(&self, key: &Path) -> Result<ByteStream, StorageError> {
            self.0.open_source(key)
        }

        fn open_write_sink(&self, _dir: &Path) -> Result<Box<dyn WriteSink>, StorageError> {
            Ok(Box::new(RefusingSink))
        }
    }

    #[tokio::test]
    async fn pipeline_failure_is_bad_gateway() {
        let storage = ReadOnlyCache(fixture_storage());
        let app = app_with(ServeConfig::new("fonts"), storage.clone());

        let response = get(app, "/SentyBrush.css?text=abc").await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(storage.0.keys().len(), 1, "nothing committed");
    }

    /// Only ever produces a stylesheet.
    struct CssOnly;

    impl Pipeline for CssOnly {
        fn run(
            &self,
            request: &FontRequest,
            storage: &dyn Storage,
            config: &ServeConfig,
        ) -> Result<ArtifactSet, PipelineError> {
            let mut sink = storage
                .open_write_sink(&config.artifact_dir(&request.hash))
                .map_err(|err| PipelineError::new("dest", err))?;
            let path = sink
                .write(&format!("{}.css", request.hash), b"@font-face {}")
                .map_err(|err| PipelineError::new("dest", err))?;
            sink.finish().map_err(|e| PipelineError::new("dest", e))?;

            let mut set = ArtifactSet::new(&request.hash);
            set.artifacts.push(subfont_core::pipeline::Artifact {
                path,
                format: subfont_core::request::FontFormat::Css,
                size: 13,
            });
            Ok(set)
        }
    }

    #[tokio::test]
    async fn format_missing_from_output_is_not_found() {
        let service = FontService::with_parts(
            ServeConfig::new("fonts"),
            Arc::new(fixture_storage()),
            Arc::new(CssOnly),
        )
        .expect("service");
        let app = router(service, "/");

        let response = get(app.clone(), "/SentyBrush.woff?text=abc").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = get(app, "/SentyBrush.css?text=abc").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn directory_in_cache_is_forbidden() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("SentyBrush.ttf"), SENTY_BRUSH).expect("font");
        let hash = FontRequest::parse("/SentyBrush.css", Some("text=abc")).hash;
        std::fs::create_dir_all(temp.path().join("dest").join(format!("{hash}.css")))
            .expect("mkdir");

        let service = FontService::new(ServeConfig::new(temp.path())).expect("service");
        let response = get(router(service, "/"), "/SentyBrush.css?text=abc").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn gzip_when_enabled_and_accepted() {
        let app = app_with(ServeConfig::new("fonts").with_gzip(true), fixture_storage());
        let request = Request::get("/SentyBrush.css?text=abc")
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let mut css = String::new();
        GzDecoder::new(body.as_ref())
            .read_to_string(&mut css)
            .expect("gunzip");
        assert!(css.contains("@font-face"));
    }

    #[tokio::test]
    async fn base64_inlines_truetype() {
        let config = ServeConfig::new("fonts").with_base64(true);
        let app = app_with(config, fixture_storage());
        let css = body_text(get(app, "/SentyBrush.css?text=abc").await).await;
        assert!(
            css.contains("data:application/x-font-ttf;charset=utf-8;base64,"),
            "{css}"
        );
    }

    #[tokio::test]
    async fn urls_in_generated_css_resolve() {
        let app = app();
        let css = body_text(get(app.clone(), "/SentyBrush.css?text=abc").await).await;
        let hash = FontRequest::parse("/SentyBrush.css", Some("text=abc")).hash;
        assert!(css.contains(&format!("./dest/{hash}.woff")), "{css}");

        let url = format!("/dest/{hash}.woff");
        let response = get(app.clone(), &url).await;
        assert_eq!(response.status(), StatusCode::OK, "{url}");
        assert_eq!(response.headers()[CACHE_HEADER], "direct");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "font/woff");

        let missing = get(app, "/dest/SentyBrush-0000.woff").await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn head_returns_headers_only() {
        let request = Request::head("/SentyBrush.ttf?text=a")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(header::CONTENT_LENGTH));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn other_methods_are_not_allowed() {
        let request = Request::post("/SentyBrush.css?text=a")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let response = get(app(), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn mount_prefix_scopes_the_middleware() {
        let storage = Arc::new(fixture_storage());
        let config = ServeConfig::new("fonts");
        let service = FontService::with_storage(config, storage).expect("service");
        let app = router(service, "/static/");

        let inside = get(app.clone(), "/static/SentyBrush.css?text=abc").await;
        assert_eq!(inside.status(), StatusCode::OK);
        let outside = get(app, "/SentyBrush.css?text=abc").await;
        assert_eq!(outside.status(), StatusCode::NOT_FOUND);
    }
}
