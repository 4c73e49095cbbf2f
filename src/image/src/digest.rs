//! Content digests (`sha256:<hex>`).

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use skiff_core::error::{Result, SkiffError};

/// Algorithm prefix of every digest the engine handles.
pub const SHA256_PREFIX: &str = "sha256:";

const SHA256_HEX_LEN: usize = 64;

/// A validated `sha256:` content digest with a lowercase hex payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest(String);

impl Digest {
    /// Parse a digest string, rejecting anything but `sha256:` + 64 lowercase hex.
    pub fn parse(s: &str) -> Result<Self> {
        let hex_part = s.strip_prefix(SHA256_PREFIX).ok_or_else(|| {
            SkiffError::malformed(s, "digest must start with the 'sha256:' algorithm tag")
        })?;
        if !is_full_hex_id(hex_part) {
            return Err(SkiffError::malformed(
                s,
                "digest must be 64 lowercase hexadecimal characters",
            ));
        }
        Ok(Self(s.to_string()))
    }

    /// Digest of an in-memory buffer.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(format!("{}{}", SHA256_PREFIX, hex::encode(Sha256::digest(data))))
    }

    /// Digest of a file's contents, streamed.
    pub fn of_file(path: &Path) -> Result<(Self, u64)> {
        let mut file = std::fs::File::open(path).map_err(|e| {
            SkiffError::Store(format!("Failed to open {}: {}", path.display(), e))
        })?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        Ok((
            Self(format!("{}{}", SHA256_PREFIX, hex::encode(hasher.finalize()))),
            size,
        ))
    }

    /// The hex payload without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.0[SHA256_PREFIX.len()..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fail with `DigestMismatch` unless `data` hashes to this digest.
    /// `reference` names the source in the error.
    pub fn verify(&self, reference: &str, data: &[u8]) -> Result<()> {
        let actual = Self::of_bytes(data);
        if &actual != self {
            return Err(SkiffError::DigestMismatch {
                reference: reference.to_string(),
                expected: self.0.clone(),
                actual: actual.0,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Digest {
    type Err = SkiffError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Digest {
    type Error = SkiffError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Digest> for String {
    fn from(d: Digest) -> Self {
        d.0
    }
}

/// True for a 64-character lowercase hex string (a full image ID).
pub fn is_full_hex_id(s: &str) -> bool {
    s.len() == SHA256_HEX_LEN && is_lower_hex(s)
}

/// True for a non-empty lowercase hex string.
pub fn is_lower_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
