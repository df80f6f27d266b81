//! RSA-OAEP decryption of update bodies
//!
//! Applies to `POST /update/` and `POST /updates/` sent without the gzip
//! marker. The decrypted bytes are gzip, so the marker is set for the next
//! stage.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tally_core::crypto::{self, RsaPrivateKey};

use super::{mentions_gzip, read_body, rebuild};
use crate::error::ApiError;

fn is_sealed(request: &Request) -> bool {
    request.method() == Method::POST
        && matches!(request.uri().path(), "/update/" | "/updates/")
        && !mentions_gzip(request.headers(), header::CONTENT_ENCODING)
}

pub async fn decrypt_body(
    State(key): State<Arc<RsaPrivateKey>>,
    request: Request,
    next: Next,
) -> Response {
    if !is_sealed(&request) {
        return next.run(request).await;
    }

    let (mut parts, body) = match read_body(request).await {
        Ok(buffered) => buffered,
        Err(e) => return e.into_response(),
    };

    let plain = match crypto::decrypt(&key, &body) {
        Ok(plain) => plain,
        Err(e) => return ApiError::from(e).into_response(),
    };

    parts
        .headers
        .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    parts.headers.remove(header::CONTENT_LENGTH);
    next.run(rebuild(parts, plain)).await
}
