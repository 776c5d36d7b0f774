//! CLI command implementations.

pub mod info;
pub mod read;
pub mod write;

use kvwrap_core::{Config, Database, DbResult};
use kvwrap_engines::LogBackend;
use std::path::Path;
use thiserror::Error;

/// Prefix marking a hex-encoded key or value.
const HEX_PREFIX: &str = "hex:";

/// Errors parsing command-line byte strings.
#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    /// The text after `hex:` is not an even run of hex digits.
    #[error("invalid hex input: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Parses `text` as raw bytes, decoding a `hex:` prefix.
pub fn parse_bytes(text: &str) -> Result<Vec<u8>, ParseError> {
    match text.strip_prefix(HEX_PREFIX) {
        Some(digits) => Ok(hex::decode(digits)?),
        None => Ok(text.as_bytes().to_vec()),
    }
}

/// Renders bytes as text when they are printable UTF-8, else as `hex:`.
pub fn display_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) if !text.starts_with(HEX_PREFIX) && !text.chars().any(char::is_control) => {
            text.to_string()
        }
        _ => format!("{HEX_PREFIX}{}", hex::encode(bytes)),
    }
}

/// Opens the log database at `path`.
///
/// Only writers create a missing directory.
pub fn open_database(path: &Path, create: bool) -> DbResult<Database> {
    let config = Config::new().create_if_missing(create);
    Database::open(LogBackend::open(path, &config)?, &config)
}
