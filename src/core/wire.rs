//! Canonical wire encoding shared by every argument and result field.
//!
//! Text goes through `hex(base64(text))`. File contents additionally pass
//! through gzip first: `hex(base64(gzip(bytes)))`.

use base64::Engine;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("hex decode failed: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decoded text is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("gzip stream failed: {0}")]
    Gzip(#[from] std::io::Error),
}

fn engine() -> &'static base64::engine::GeneralPurpose {
    &base64::engine::general_purpose::STANDARD
}

fn encode_bytes(bytes: &[u8]) -> String {
    hex::encode(engine().encode(bytes))
}

fn decode_bytes(input: &str) -> Result<Vec<u8>, WireError> {
    let b64 = hex::decode(input)?;
    Ok(engine().decode(b64)?)
}

pub fn encode(text: &str) -> String {
    encode_bytes(text.as_bytes())
}

pub fn decode(input: &str) -> Result<String, WireError> {
    Ok(String::from_utf8(decode_bytes(input)?)?)
}

pub fn encode_bin(bytes: &[u8]) -> Result<String, WireError> {
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(bytes)?;
    Ok(encode_bytes(&gz.finish()?))
}

/// Inverse of [`encode_bin`]; decompression runs last.
pub fn decode_bin(input: &str) -> Result<Vec<u8>, WireError> {
    let compressed = decode_bytes(input)?;
    let mut out = Vec::new();
    GzDecoder::new(&compressed[..]).read_to_end(&mut out)?;
    Ok(out)
}
