//! gzip framing for request and response bodies

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::{Result, TallyError};

/// Compress at the fastest level
pub fn gzip_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 32), Compression::fast());
    encoder
        .write_all(data)
        .map_err(|e| TallyError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| TallyError::Compression(e.to_string()))
}

pub fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| TallyError::Compression(e.to_string()))?;
    Ok(out)
}
