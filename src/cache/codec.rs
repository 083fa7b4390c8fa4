//! Value compression for large cache entries.
//!
//! Deflate over the JSON bytes, base64-encoded so compressed entries stay valid
//! inside the JSON snapshot.

use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

pub fn compress(data: &[u8]) -> Result<String> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::compression(format!("deflate failed: {}", e)))?;
    let bytes = encoder
        .finish()
        .map_err(|e| Error::compression(format!("deflate failed: {}", e)))?;
    Ok(STANDARD.encode(bytes))
}

pub fn decompress(encoded: &str) -> Result<Vec<u8>> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| Error::compression(format!("invalid base64: {}", e)))?;
    let mut decoder = DeflateDecoder::new(bytes.as_slice());
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::compression(format!("inflate failed: {}", e)))?;
    Ok(out)
}
