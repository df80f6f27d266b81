//! Ordered request pipeline wrapping the router
//!
//! Stages run outermost first:
//!
//! ```text
//! observe → origin → integrity → decrypt → gzip → router
//! ```
//!
//! Integrity sits outside decryption and decompression so the digest is
//! checked against the exact wire bytes. Each stage may short-circuit with
//! an error response, which skips every stage after it.

mod decrypt;
mod gzip;
mod integrity;
mod observe;
mod origin;

use axum::{body::Body, extract::Request, middleware, Router};
use ipnet::IpNet;
use std::sync::Arc;
use tally_core::crypto::RsaPrivateKey;
use tally_core::{ServerConfig, TallyError};

use crate::error::ApiError;

pub use origin::is_trusted as origin_is_trusted;

/// Upper bound on buffered request and response bodies
pub(crate) const MAX_BODY: usize = 32 * 1024 * 1024;

/// One request-transforming stage
#[derive(Clone)]
pub enum Stage {
    /// Logs method, path, duration, status and size
    Observe,
    /// Requires `X-Real-IP` inside the trusted subnet
    Origin(IpNet),
    /// Verifies `HashSHA256` over the received bytes
    Integrity(Arc<str>),
    /// RSA-OAEP decryption of update bodies sent without the gzip marker
    Decrypt(Arc<RsaPrivateKey>),
    /// Request decompression, response compression and response signing
    Gzip { key: Option<Arc<str>> },
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Observe => "observe",
            Stage::Origin(_) => "origin",
            Stage::Integrity(_) => "integrity",
            Stage::Decrypt(_) => "decrypt",
            Stage::Gzip { .. } => "gzip",
        }
    }

    fn wrap(self, router: Router) -> Router {
        match self {
            Stage::Observe => router.layer(middleware::from_fn(observe::log_request)),
            Stage::Origin(net) => {
                router.layer(middleware::from_fn_with_state(net, origin::check_origin))
            }
            Stage::Integrity(key) => {
                router.layer(middleware::from_fn_with_state(key, integrity::verify_digest))
            }
            Stage::Decrypt(key) => {
                router.layer(middleware::from_fn_with_state(key, decrypt::decrypt_body))
            }
            Stage::Gzip { key } => router.layer(middleware::from_fn_with_state(key, gzip::transcode)),
        }
    }
}

/// Explicit ordered list of stages
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage inside the ones already added
    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Build the standard pipeline for a server configuration
    ///
    /// Stages whose setting is absent are left out.
    pub fn from_config(config: &ServerConfig, private_key: Option<RsaPrivateKey>) -> tally_core::Result<Self> {
        let key: Option<Arc<str>> = config.key.as_deref().map(Arc::from);

        let mut pipeline = Pipeline::new().stage(Stage::Observe);

        if let Some(cidr) = &config.trusted_subnet {
            let net: IpNet = cidr
                .parse()
                .map_err(|e| TallyError::Config(format!("invalid trusted subnet {}: {}", cidr, e)))?;
            pipeline = pipeline.stage(Stage::Origin(net));
        }
        if let Some(key) = &key {
            pipeline = pipeline.stage(Stage::Integrity(Arc::clone(key)));
        }
        if let Some(private_key) = private_key {
            pipeline = pipeline.stage(Stage::Decrypt(Arc::new(private_key)));
        }

        Ok(pipeline.stage(Stage::Gzip { key }))
    }

    /// Stage names, outermost first
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Wrap `router` so the first stage is the outermost layer
    pub fn wrap(self, router: Router) -> Router {
        // Router::layer puts the newest layer outside, so apply innermost first
        self.stages
            .into_iter()
            .rev()
            .fold(router, |router, stage| stage.wrap(router))
    }
}

/// Buffer a request body, answering 400 when it cannot be read
pub(crate) async fn read_body(request: Request) -> Result<(axum::http::request::Parts, Vec<u8>), ApiError> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY)
        .await
        .map_err(|e| ApiError::bad_request(format!("unreadable body: {}", e)))?;
    Ok((parts, bytes.to_vec()))
}

pub(crate) fn rebuild(parts: axum::http::request::Parts, body: Vec<u8>) -> Request {
    Request::from_parts(parts, Body::from(body))
}

/// True when a header value list mentions gzip
pub(crate) fn mentions_gzip(headers: &axum::http::HeaderMap, name: axum::http::HeaderName) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("gzip"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_pipeline_order() {
        let config = ServerConfig {
            key: Some("secret".into()),
            trusted_subnet: Some("10.0.0.0/8".into()),
            ..ServerConfig::default()
        };
        let pipeline = Pipeline::from_config(&config, None).unwrap();
        assert_eq!(pipeline.names(), vec!["observe", "origin", "integrity", "gzip"]);
    }

    #[test]
    fn test_minimal_pipeline() {
        let pipeline = Pipeline::from_config(&ServerConfig::default(), None).unwrap();
        assert_eq!(pipeline.names(), vec!["observe", "gzip"]);
    }

    #[test]
    fn test_bad_subnet_rejected() {
        let config = ServerConfig {
            trusted_subnet: Some("not-a-cidr".into()),
            ..ServerConfig::default()
        };
        assert!(matches!(
            Pipeline::from_config(&config, None),
            Err(TallyError::Config(_))
        ));
    }
}
