use std::{
    fmt::{self, Debug, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{StoreError, StoreResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A 32-byte SHA-256 content digest.
///
/// This is the identity of a chunk and of a blob: two chunks with equal digests are
/// interchangeable regardless of which layer or conversion produced them. Displayed and
/// parsed as lowercase hex, which is also the filename a blob is stored under in a blob
/// directory.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentDigest([u8; 32]);

/// An incremental SHA-256 digester.
///
/// Used by the blob writer to hash the full blob byte stream as chunks are appended, so the
/// blob digest is available the moment the writer is finalized without a second pass.
#[derive(Clone, Default)]
pub struct Digester {
    inner: Sha256,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ContentDigest {
    /// Computes the digest of the given bytes.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        Self(hasher.finalize().into())
    }

    /// Returns the raw digest bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Returns the digest as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Digester {
    /// Creates a new digester.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes into the digest.
    pub fn update(&mut self, bytes: impl AsRef<[u8]>) {
        self.inner.update(bytes.as_ref());
    }

    /// Consumes the digester and returns the final digest.
    pub fn finalize(self) -> ContentDigest {
        ContentDigest(self.inner.finalize().into())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

impl FromStr for ContentDigest {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        let bytes = hex::decode(s).map_err(|e| StoreError::InvalidDigest(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| StoreError::InvalidDigest(format!("expected 32 bytes, got {:?}", s)))?;
        Result::Ok(Self(bytes))
    }
}

impl From<[u8; 32]> for ContentDigest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl Debug for Digester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Digester").finish()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_hex_roundtrip() -> anyhow::Result<()> {
        let digest = ContentDigest::from_bytes(b"hello");
        let parsed: ContentDigest = digest.to_hex().parse()?;

        assert_eq!(digest, parsed);
        assert_eq!(digest.to_hex().len(), 64);

        Ok(())
    }

    #[test]
    fn test_digest_known_value() {
        // sha256("") is a well-known constant.
        let digest = ContentDigest::from_bytes(b"");
        assert_eq!(
            digest.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_digest_parse_rejects_garbage() {
        assert!("not-hex".parse::<ContentDigest>().is_err());
        assert!("abcd".parse::<ContentDigest>().is_err());
    }

    #[test]
    fn test_digester_matches_one_shot() {
        let mut digester = Digester::new();
        digester.update(b"hello ");
        digester.update(b"world");

        assert_eq!(digester.finalize(), ContentDigest::from_bytes(b"hello world"));
    }
}
