//! HMAC-SHA256 body signatures
//!
//! The digest is always computed over the exact bytes placed on the wire and
//! travels hex-encoded in the `HashSHA256` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{Result, TallyError};

type HmacSha256 = Hmac<Sha256>;

fn mac(key: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| TallyError::Crypto(format!("invalid signing key: {}", e)))
}

/// Sign `data`, returning the lowercase hex digest
pub fn sign(key: &str, data: &[u8]) -> Result<String> {
    let mut mac = mac(key)?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a hex digest in constant time
pub fn verify(key: &str, data: &[u8], signature: &str) -> Result<()> {
    let expected = hex::decode(signature.trim())
        .map_err(|e| TallyError::Integrity(format!("malformed digest: {}", e)))?;
    let mut mac = mac(key)?;
    mac.update(data);
    mac.verify_slice(&expected)
        .map_err(|_| TallyError::Integrity("digest mismatch".to_string()))
}
