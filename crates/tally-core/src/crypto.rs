//! RSA-OAEP (SHA-256) envelope for request bodies
//!
//! Payloads larger than one OAEP block are split into `k - 2*hLen - 2` byte
//! chunks, each encrypted on its own; the ciphertext is the concatenation of
//! the resulting `k`-byte blocks. A one-block payload is plain RSA-OAEP.

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::Oaep;
use sha2::Sha256;
use std::path::Path;

pub use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::{Result, TallyError};

/// SHA-256 output length
const HASH_LEN: usize = 32;

fn crypto_err(context: &str, e: impl std::fmt::Display) -> TallyError {
    TallyError::Crypto(format!("{}: {}", context, e))
}

/// Load a public key from PEM (SPKI or PKCS#1)
pub fn load_public_key(path: &Path) -> Result<RsaPublicKey> {
    let pem = std::fs::read_to_string(path)?;
    RsaPublicKey::from_public_key_pem(&pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))
        .map_err(|e| crypto_err(&format!("bad public key {}", path.display()), e))
}

/// Load a private key from PEM (PKCS#1 or PKCS#8)
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)?;
    RsaPrivateKey::from_pkcs1_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
        .map_err(|e| crypto_err(&format!("bad private key {}", path.display()), e))
}

/// Largest plaintext chunk one OAEP block can carry
fn chunk_len(key: &RsaPublicKey) -> Result<usize> {
    key.size()
        .checked_sub(2 * HASH_LEN + 2)
        .filter(|&len| len > 0)
        .ok_or_else(|| {
            TallyError::Crypto(format!(
                "{}-bit key is too small for OAEP-SHA256",
                key.size() * 8
            ))
        })
}

pub fn encrypt(key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>> {
    let chunk_len = chunk_len(key)?;
    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity((data.len() / chunk_len + 1) * key.size());
    for chunk in data.chunks(chunk_len) {
        let block = key
            .encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)
            .map_err(|e| crypto_err("encrypt", e))?;
        out.extend_from_slice(&block);
    }
    Ok(out)
}

pub fn decrypt(key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>> {
    let block_len = key.size();
    if data.len() % block_len != 0 {
        return Err(TallyError::Crypto(format!(
            "ciphertext length {} is not a multiple of {}",
            data.len(),
            block_len
        )));
    }

    let mut out = Vec::with_capacity(data.len());
    for block in data.chunks(block_len) {
        let plain = key
            .decrypt(Oaep::new::<Sha256>(), block)
            .map_err(|e| crypto_err("decrypt", e))?;
        out.extend_from_slice(&plain);
    }
    Ok(out)
}

/// Generate a key pair, writing a PKCS#1 private PEM and an SPKI public PEM
pub fn generate_key_pair(bits: usize, private_path: &Path, public_path: &Path) -> Result<()> {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, bits).map_err(|e| crypto_err("keygen", e))?;
    let public = RsaPublicKey::from(&private);

    let private_pem = private
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| crypto_err("encode private key", e))?;
    let public_pem = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| crypto_err("encode public key", e))?;

    std::fs::write(private_path, private_pem.as_bytes())?;
    std::fs::write(public_path, public_pem.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key_pair(dir: &TempDir) -> (RsaPrivateKey, RsaPublicKey) {
        let private_path = dir.path().join("private.pem");
        let public_path = dir.path().join("public.pem");
        generate_key_pair(1024, &private_path, &public_path).unwrap();
        (
            load_private_key(&private_path).unwrap(),
            load_public_key(&public_path).unwrap(),
        )
    }

    #[test]
    fn test_undersized_key_rejected() {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 512).unwrap();
        let public = RsaPublicKey::from(&private);

        let err = encrypt(&public, b"payload").unwrap_err();
        assert!(matches!(err, TallyError::Crypto(_)));
    }

    #[test]
    fn test_single_block_roundtrip() {
        let temp = TempDir::new().unwrap();
        let (private, public) = key_pair(&temp);

        let sealed = encrypt(&public, b"short payload").unwrap();
        assert_eq!(sealed.len(), public.size());
        assert_eq!(decrypt(&private, &sealed).unwrap(), b"short payload");
    }

    #[test]
    fn test_multi_block_roundtrip() {
        let temp = TempDir::new().unwrap();
        let (private, public) = key_pair(&temp);

        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let sealed = encrypt(&public, &payload).unwrap();
        let blocks = payload.len().div_ceil(chunk_len(&public).unwrap());
        assert_eq!(sealed.len(), blocks * public.size());
        assert_eq!(decrypt(&private, &sealed).unwrap(), payload);
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let temp = TempDir::new().unwrap();
        let (private, public) = key_pair(&temp);

        let sealed = encrypt(&public, b"payload").unwrap();
        let err = decrypt(&private, &sealed[..sealed.len() - 1]).unwrap_err();
        assert!(matches!(err, TallyError::Crypto(_)));
    }

    #[test]
    fn test_missing_key_file() {
        let temp = TempDir::new().unwrap();
        let err = load_public_key(&temp.path().join("nope.pem")).unwrap_err();
        assert!(matches!(err, TallyError::Io(_)));
    }
}
