//! Built-in dev-server plugins
//!
//! Plugins are opaque capability bundles activated by name from the
//! `plugins` list in the config. They hook into the static pipeline only;
//! proxied responses pass through untouched.

use http_body_util::{combinators::BoxBody, BodyExt, Empty};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue};
use hyper::{Method, Response, StatusCode};
use std::sync::Arc;
use thiserror::Error;

/// A capability bundle applied to the static pipeline
pub trait DevPlugin: Send + Sync + std::fmt::Debug {
    /// Name this plugin is activated by in the config
    fn name(&self) -> &'static str;

    /// Optionally answer a request before the static pipeline runs
    fn on_request(
        &self,
        _method: &Method,
        _headers: &HeaderMap,
    ) -> Option<Response<BoxBody<Bytes, hyper::Error>>> {
        None
    }

    /// Adjust headers on a static response
    fn on_response(&self, _headers: &mut HeaderMap) {}
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Unknown plugin '{0}'")]
    Unknown(String),
}

/// Resolve configured plugin names against the built-in registry
pub fn resolve(names: &[String]) -> Result<Vec<Arc<dyn DevPlugin>>, PluginError> {
    names
        .iter()
        .map(|name| match name.as_str() {
            "cors" => Ok(Arc::new(CorsPlugin) as Arc<dyn DevPlugin>),
            "no-cache" => Ok(Arc::new(NoCachePlugin) as Arc<dyn DevPlugin>),
            other => Err(PluginError::Unknown(other.to_string())),
        })
        .collect()
}

/// Permissive CORS for local development
///
/// Answers OPTIONS preflights with 204 and stamps every static response
/// with a wildcard allow-origin.
#[derive(Debug)]
pub struct CorsPlugin;

impl DevPlugin for CorsPlugin {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn on_request(
        &self,
        method: &Method,
        _headers: &HeaderMap,
    ) -> Option<Response<BoxBody<Bytes, hyper::Error>>> {
        if *method != Method::OPTIONS {
            return None;
        }

        Some(
            Response::builder()
                .status(StatusCode::NO_CONTENT)
                .header("Access-Control-Allow-Origin", "*")
                .header(
                    "Access-Control-Allow-Methods",
                    "GET, POST, PUT, PATCH, DELETE, OPTIONS",
                )
                .header("Access-Control-Allow-Headers", "*")
                .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
                .expect("valid response with static headers"),
        )
    }

    fn on_response(&self, headers: &mut HeaderMap) {
        headers.insert(
            "Access-Control-Allow-Origin",
            HeaderValue::from_static("*"),
        );
    }
}

/// Force browser revalidation of served assets
#[derive(Debug)]
pub struct NoCachePlugin;

impl DevPlugin for NoCachePlugin {
    fn name(&self) -> &'static str {
        "no-cache"
    }

    fn on_response(&self, headers: &mut HeaderMap) {
        headers.insert(
            hyper::header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        );
    }
}
