//! Static asset pipeline
//!
//! Serves files from the configured root directory for requests that match
//! no proxy prefix. Paths are percent-decoded and sanitized before touching
//! the filesystem; directory requests serve their index.html, and unmatched
//! HTML navigations fall back to the root index.html when SPA fallback is
//! enabled.

use crate::error::{json_error_response, DevErrorCode};
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::header::HeaderValue;
use hyper::{Method, Response, StatusCode};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

const INDEX_FILE: &str = "index.html";

/// The static file server rooted at a single directory
pub struct AssetServer {
    root: PathBuf,
    spa_fallback: bool,
}

impl AssetServer {
    pub fn new(root: impl Into<PathBuf>, spa_fallback: bool) -> Self {
        Self {
            root: root.into(),
            spa_fallback,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serve a request for the given URL path
    ///
    /// `prefers_html` should reflect the request's Accept header; it gates
    /// the SPA fallback so asset requests still get a real 404.
    pub async fn serve(
        &self,
        method: &Method,
        path: &str,
        prefers_html: bool,
    ) -> Response<BoxBody<Bytes, hyper::Error>> {
        let head_only = match *method {
            Method::GET => false,
            Method::HEAD => true,
            _ => {
                return json_error_response(
                    DevErrorCode::MethodNotAllowed,
                    format!("Method {} not allowed for static files", method),
                );
            }
        };

        let decoded = match urlencoding::decode(path) {
            Ok(d) => d.into_owned(),
            Err(_) => {
                return json_error_response(DevErrorCode::BadRequest, "Invalid percent-encoding");
            }
        };

        let relative = match sanitize_path(&decoded) {
            Some(p) => p,
            None => {
                warn!(path, "Rejected static path escaping the root");
                return json_error_response(DevErrorCode::Forbidden, "Path is outside the served root");
            }
        };

        let mut file_path = self.root.join(&relative);
        if decoded.ends_with('/') || is_dir(&file_path).await {
            file_path.push(INDEX_FILE);
        }

        match tokio::fs::read(&file_path).await {
            Ok(contents) => {
                debug!(path, file = %file_path.display(), "Serving static file");
                file_response(&file_path, contents, head_only)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.spa_fallback && prefers_html {
                    self.serve_fallback(path, head_only).await
                } else {
                    json_error_response(
                        DevErrorCode::NotFound,
                        format!("No such file: {}", path),
                    )
                }
            }
            Err(e) => {
                warn!(path, file = %file_path.display(), error = %e, "Failed to read static file");
                json_error_response(DevErrorCode::InternalError, "Failed to read file")
            }
        }
    }

    async fn serve_fallback(
        &self,
        path: &str,
        head_only: bool,
    ) -> Response<BoxBody<Bytes, hyper::Error>> {
        let index = self.root.join(INDEX_FILE);
        match tokio::fs::read(&index).await {
            Ok(contents) => {
                debug!(path, "Serving SPA fallback index.html");
                file_response(&index, contents, head_only)
            }
            Err(_) => json_error_response(DevErrorCode::NotFound, format!("No such file: {}", path)),
        }
    }
}

/// Turn a decoded URL path into a safe path relative to the root
///
/// Returns None when the path tries to climb out of the root or contains
/// components the filesystem could misinterpret.
fn sanitize_path(decoded: &str) -> Option<PathBuf> {
    if decoded.contains('\0') {
        return None;
    }

    let trimmed = decoded.trim_start_matches('/');
    let mut clean = PathBuf::new();

    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            // ParentDir, RootDir and prefixes all escape the root
            _ => return None,
        }
    }

    Some(clean)
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

fn file_response(
    path: &Path,
    contents: Vec<u8>,
    head_only: bool,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let content_type =
        HeaderValue::from_str(mime.as_ref()).unwrap_or(HeaderValue::from_static("application/octet-stream"));

    let builder = Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, content_type)
        .header(hyper::header::CONTENT_LENGTH, contents.len());

    let body = if head_only {
        Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
    } else {
        Full::new(Bytes::from(contents))
            .map_err(|never| match never {})
            .boxed()
    };

    builder.body(body).expect("valid response builder")
}
