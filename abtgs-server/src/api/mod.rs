//! HTTP API handlers for abtgs-server
//!
//! REST + SSE under `/api/v1`, health at the root.

pub mod batch;
pub mod health;
pub mod projects;
pub mod review;
pub mod sse;

pub use batch::batch_routes;
pub use health::health_routes;
pub use projects::project_routes;
pub use review::review_routes;
pub use sse::sse_routes;

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use uuid::Uuid;

use crate::services::{ExportedDocument, JobHandle, JobStore};
use crate::{ApiError, ApiResult, AppState};

/// Look up a job by its path id; malformed ids are reported as not found
pub(crate) async fn job_handle(state: &AppState, raw_id: &str) -> ApiResult<JobHandle> {
    let id = Uuid::parse_str(raw_id).map_err(|_| ApiError::NotFound(format!("Job {}", raw_id)))?;
    state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Job {}", raw_id)))
}

/// Peer address of the calling client
///
/// Taken from the connection; requests served without connect info (in-process
/// routers) share the unspecified address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub IpAddr);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        Ok(ClientAddr(ip))
    }
}

/// Binary download response with an RFC 6266 `Content-Disposition`
pub(crate) fn attachment(document: ExportedDocument) -> Response {
    let disposition = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_fallback(&document.filename),
        percent_encode(&document.filename)
    );
    let disposition = HeaderValue::from_str(&disposition)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(document.content_type)),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        document.bytes,
    )
        .into_response()
}

fn ascii_fallback(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' { c } else { '_' })
        .collect()
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}
