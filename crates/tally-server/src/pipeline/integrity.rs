//! `HashSHA256` verification over the received bytes
//!
//! Only requests carrying a non-empty header are checked.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tally_core::{signing, HASH_HEADER};

use super::{read_body, rebuild};
use crate::error::ApiError;

pub async fn verify_digest(State(key): State<Arc<str>>, request: Request, next: Next) -> Response {
    let Some(signature) = request
        .headers()
        .get(HASH_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
    else {
        return next.run(request).await;
    };

    let (parts, body) = match read_body(request).await {
        Ok(buffered) => buffered,
        Err(e) => return e.into_response(),
    };

    if let Err(e) = signing::verify(&key, &body, &signature) {
        return ApiError::from(e).into_response();
    }

    next.run(rebuild(parts, body)).await
}
