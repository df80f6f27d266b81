//! Wire encoding for outbound payloads
//!
//! ```text
//! JSON → gzip (fast) → RSA-OAEP (optional) → HMAC-SHA256 over the result (optional)
//! ```
//!
//! An encrypted body is sent without `Content-Encoding: gzip` because the
//! receiver has to decrypt before it can decompress.

use serde::Serialize;
use tally_core::crypto::{self, RsaPublicKey};
use tally_core::{codec, signing, AgentConfig, Result};

/// Bytes ready for the wire plus the headers that describe them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBody {
    pub bytes: Vec<u8>,
    /// Whether to mark the body `Content-Encoding: gzip`
    pub gzip: bool,
    /// Hex HMAC-SHA256 of `bytes`
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Encoder {
    key: Option<String>,
    public_key: Option<RsaPublicKey>,
}

impl Encoder {
    pub fn new(key: Option<String>, public_key: Option<RsaPublicKey>) -> Self {
        Self { key, public_key }
    }

    /// Signing key and public key (loaded from its PEM path) from config
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let public_key = config
            .crypto_key
            .as_deref()
            .map(crypto::load_public_key)
            .transpose()?;
        Ok(Self::new(config.key.clone(), public_key))
    }

    pub fn encrypts(&self) -> bool {
        self.public_key.is_some()
    }

    pub fn encode<T: Serialize + ?Sized>(&self, payload: &T) -> Result<EncodedBody> {
        let json = serde_json::to_vec(payload)?;
        let packed = codec::gzip_compress(&json)?;

        let (bytes, gzip) = match &self.public_key {
            Some(key) => (crypto::encrypt(key, &packed)?, false),
            None => (packed, true),
        };

        let signature = self
            .key
            .as_deref()
            .map(|key| signing::sign(key, &bytes))
            .transpose()?;

        Ok(EncodedBody {
            bytes,
            gzip,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{Metric, MetricPayload};
    use tempfile::TempDir;

    fn payload() -> MetricPayload {
        Metric::gauge("Alloc", 42.5).into()
    }

    #[test]
    fn test_plain_encoding_is_gzip_json() {
        let body = Encoder::default().encode(&payload()).unwrap();

        assert!(body.gzip);
        assert!(body.signature.is_none());
        let json = codec::gzip_decompress(&body.bytes).unwrap();
        assert_eq!(json, serde_json::to_vec(&payload()).unwrap());
    }

    #[test]
    fn test_signature_covers_wire_bytes() {
        let encoder = Encoder::new(Some("secret".into()), None);
        let body = encoder.encode(&[payload(), payload()]).unwrap();

        let signature = body.signature.as_deref().unwrap();
        signing::verify("secret", &body.bytes, signature).unwrap();
        assert!(signing::verify("other", &body.bytes, signature).is_err());
    }

    #[test]
    fn test_encrypted_round_trip() {
        let dir = TempDir::new().unwrap();
        let private_path = dir.path().join("private.pem");
        let public_path = dir.path().join("public.pem");
        crypto::generate_key_pair(1024, &private_path, &public_path).unwrap();

        let config = AgentConfig {
            key: Some("secret".into()),
            crypto_key: Some(public_path),
            ..AgentConfig::default()
        };
        let encoder = Encoder::from_config(&config).unwrap();
        assert!(encoder.encrypts());

        // Large enough to need several OAEP blocks
        let batch: Vec<MetricPayload> = (0..50)
            .map(|i| Metric::counter(format!("counter-{}", i), i).into())
            .collect();
        let body = encoder.encode(&batch).unwrap();
        assert!(!body.gzip);

        // Receiver order: verify, decrypt, decompress
        signing::verify("secret", &body.bytes, body.signature.as_deref().unwrap()).unwrap();
        let private = crypto::load_private_key(&private_path).unwrap();
        let packed = crypto::decrypt(&private, &body.bytes).unwrap();
        let json = codec::gzip_decompress(&packed).unwrap();
        assert_eq!(json, serde_json::to_vec(&batch).unwrap());
    }

    #[test]
    fn test_missing_public_key_file() {
        let config = AgentConfig {
            crypto_key: Some("/nonexistent/public.pem".into()),
            ..AgentConfig::default()
        };
        assert!(Encoder::from_config(&config).is_err());
    }
}
