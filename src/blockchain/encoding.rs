//! Canonical encoding shared by transaction signing and block hashing.
//!
//! Values are serialized as JSON with keys sorted lexicographically, `", "` and
//! `": "` separators, and every character outside printable ASCII escaped as a
//! lowercase `\uXXXX` sequence. Hashes and signatures depend on this exact byte
//! string, so the format must never change.

use serde::Serialize;
use serde_json::ser::Formatter;
use sha2::{Digest, Sha256};
use thiserror::Error;

use std::io;

/// Errors that can occur while producing the canonical form
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Canonical form is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// JSON formatter producing the canonical separators and ASCII-only output
struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        for ch in fragment.chars() {
            if (' '..='~').contains(&ch) {
                writer.write_all(&[ch as u8])?;
            } else {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

/// Serializes a value into its canonical string form.
///
/// The value is first lifted into a `serde_json::Value`, whose object maps are
/// ordered by key, so struct field declaration order has no influence.
pub fn to_canonical_string<T: Serialize + ?Sized>(value: &T) -> Result<String, EncodingError> {
    let value = serde_json::to_value(value)?;

    let mut buffer = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, CanonicalFormatter);
    value.serialize(&mut serializer)?;

    Ok(String::from_utf8(buffer)?)
}

/// Lowercase hex SHA-256 digest of arbitrary bytes (64 characters)
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Lowercase hex SHA-256 digest of a value's canonical form
pub fn canonical_digest<T: Serialize + ?Sized>(value: &T) -> Result<String, EncodingError> {
    let canonical = to_canonical_string(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}
