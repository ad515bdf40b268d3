//! Content addressing: file identifiers and discovery content IDs.
//!
//! A [`FileId`] is the public handle of a seeded file: the first 16 hex
//! characters (64 bits) of the SHA-256 of its contents. The discovery layer
//! does not key on the `FileId` directly; it keys on a [`ContentId`] derived
//! from the namespaced string returned by [`discovery_key`]:
//!
//! ```text
//! key      = "/bt/file/" + file_id
//! digest   = SHA-256(key)
//! multihash = 0x12 (sha2-256) || 0x20 (32 bytes) || digest
//! cid       = 0x01 (CIDv1)    || 0x55 (raw)      || multihash
//! ```
//!
//! Every node derives the same bytes for the same `FileId`, so seeders and
//! leechers meet on the same discovery record.

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Namespace prefix for discovery keys.
pub const DISCOVERY_NAMESPACE: &str = "/bt/file/";

/// Number of hex characters kept from the file digest.
pub const FILE_ID_HEX_LEN: usize = 16;

const CID_VERSION: u64 = 1;
const MULTICODEC_RAW: u64 = 0x55;
const MULTIHASH_SHA2_256: u64 = 0x12;
const SHA2_256_LEN: u64 = 32;

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Truncated hex file digest used as the public file handle.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FileId(String);

impl FileId {
    /// Derive the identifier from a whole-file SHA-256 digest.
    #[must_use]
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        Self(hex::encode(&digest[..FILE_ID_HEX_LEN / 2]))
    }

    /// Parse a user-supplied identifier.
    ///
    /// Uppercase hex is accepted and normalised to lowercase.
    ///
    /// # Errors
    ///
    /// Returns [`ParseFileIdError`] unless the input is exactly 16 hex characters.
    pub fn parse(s: &str) -> Result<Self, ParseFileIdError> {
        let s = s.trim();
        if s.len() != FILE_ID_HEX_LEN {
            return Err(ParseFileIdError::Length(s.len()));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ParseFileIdError::NotHex);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileId({})", self.0)
    }
}

impl FromStr for FileId {
    type Err = ParseFileIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Errors from [`FileId::parse`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFileIdError {
    /// Wrong number of characters
    #[error("file ID must be {FILE_ID_HEX_LEN} hex characters, got {0}")]
    Length(usize),

    /// Non-hex characters present
    #[error("file ID must contain only hex characters")]
    NotHex,
}

/// Namespaced discovery key for a file.
#[must_use]
pub fn discovery_key(file_id: &FileId) -> String {
    format!("{DISCOVERY_NAMESPACE}{file_id}")
}

/// Discovery-service content identifier (CIDv1, raw codec, sha2-256 multihash).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContentId(Vec<u8>);

impl ContentId {
    /// Deterministically map a string key to a content identifier.
    #[must_use]
    pub fn for_key(key: &str) -> Self {
        let digest = Sha256::digest(key.as_bytes());

        let mut bytes = Vec::with_capacity(36);
        push_uvarint(&mut bytes, CID_VERSION);
        push_uvarint(&mut bytes, MULTICODEC_RAW);
        push_uvarint(&mut bytes, MULTIHASH_SHA2_256);
        push_uvarint(&mut bytes, SHA2_256_LEN);
        bytes.extend_from_slice(&digest);

        Self(bytes)
    }

    /// Content identifier for a file's discovery record.
    #[must_use]
    pub fn for_file(file_id: &FileId) -> Self {
        Self::for_key(&discovery_key(file_id))
    }

    /// Wrap raw CID bytes received from the network.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Binary CID.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The sha2-256 digest carried in the multihash.
    #[must_use]
    pub fn digest(&self) -> &[u8] {
        self.0.get(4..).unwrap_or_default()
    }
}

impl fmt::Display for ContentId {
    /// Multibase base32-lower text form (`b` prefix).
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("b")?;
        f.write_str(&base32_lower(&self.0))
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({self})")
    }
}

fn push_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// RFC 4648 base32, lowercase alphabet, no padding.
fn base32_lower(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;

    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }

    out
}
