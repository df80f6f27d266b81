//! Transparent gzip for requests and responses
//!
//! - requests marked `Content-Encoding: gzip` are decompressed
//! - JSON and HTML responses below 300 are compressed when the client
//!   accepts gzip
//! - with a signing key, the final response body is signed

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tally_core::{codec, signing};
use tracing::error;

use super::{mentions_gzip, read_body, rebuild, MAX_BODY};
use crate::error::ApiError;

// `HashSHA256` in the lowercase form header maps store
const HASH_NAME: &str = "hashsha256";

fn is_compressible(response: &Response) -> bool {
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    response.status().as_u16() < 300
        && (content_type.contains("application/json") || content_type.contains("text/html"))
}

pub async fn transcode(State(key): State<Option<Arc<str>>>, request: Request, next: Next) -> Response {
    let accepts_gzip = mentions_gzip(request.headers(), header::ACCEPT_ENCODING);

    let request = if mentions_gzip(request.headers(), header::CONTENT_ENCODING) {
        let (mut parts, body) = match read_body(request).await {
            Ok(buffered) => buffered,
            Err(e) => return e.into_response(),
        };
        let plain = match codec::gzip_decompress(&body) {
            Ok(plain) => plain,
            Err(e) => return ApiError::from(e).into_response(),
        };
        parts.headers.remove(header::CONTENT_ENCODING);
        parts.headers.remove(header::CONTENT_LENGTH);
        rebuild(parts, plain)
    } else {
        request
    };

    let response = next.run(request).await;

    let compress = accepts_gzip && is_compressible(&response);
    if !compress && key.is_none() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY).await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            error!("Failed to buffer response body: {}", e);
            return ApiError::new(axum::http::StatusCode::INTERNAL_SERVER_ERROR, "response error")
                .into_response();
        }
    };

    let bytes = if compress {
        match codec::gzip_compress(&bytes) {
            Ok(packed) => {
                parts
                    .headers
                    .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                packed
            }
            Err(e) => {
                error!("Failed to compress response: {}", e);
                bytes
            }
        }
    } else {
        bytes
    };

    if let Some(key) = &key {
        match signing::sign(key, &bytes).map(|digest| HeaderValue::from_str(&digest)) {
            Ok(Ok(value)) => {
                parts.headers.insert(HeaderName::from_static(HASH_NAME), value);
            }
            _ => error!("Failed to sign response"),
        }
    }

    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(bytes))
}
