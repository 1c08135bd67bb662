//! Content digests in OCI format (`sha256:<hex>`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

const SHA256_PREFIX: &str = "sha256:";
const SHA256_HEX_LEN: usize = 64;

/// A validated SHA-256 content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    hex: String,
}

impl Digest {
    /// Compute the digest of a byte slice.
    #[must_use]
    pub fn sha256(bytes: &[u8]) -> Self {
        Self {
            hex: hex::encode(Sha256::digest(bytes)),
        }
    }

    /// Parse a digest in `sha256:<hex>` form.
    ///
    /// Returns the reason for rejection on failure.
    pub fn parse(value: &str) -> Result<Self, String> {
        let Some(hex) = value.strip_prefix(SHA256_PREFIX) else {
            return Err(format!("unsupported digest algorithm in '{value}'"));
        };
        if hex.len() != SHA256_HEX_LEN {
            return Err(format!(
                "expected {SHA256_HEX_LEN} hex characters, got {}",
                hex.len()
            ));
        }
        if !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(format!("digest '{value}' is not lowercase hex"));
        }
        Ok(Self {
            hex: hex.to_string(),
        })
    }

    /// The algorithm name (always `sha256`).
    #[must_use]
    pub const fn algorithm(&self) -> &'static str {
        "sha256"
    }

    /// The hex-encoded hash without the algorithm prefix.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SHA256_PREFIX}{}", self.hex)
    }
}

impl FromStr for Digest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(serde::de::Error::custom)
    }
}

/// Writer adapter that hashes and counts every byte written through it.
///
/// Wraps the sink of the compressed stream so the digest covers exactly the
/// bytes that end up in the blob.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> DigestWriter<W> {
    /// Wrap a writer.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Finish hashing, returning the digest, the byte count, and the inner writer.
    pub fn finalize(self) -> (Digest, u64, W) {
        let digest = Digest {
            hex: hex::encode(self.hasher.finalize()),
        };
        (digest, self.written, self.inner)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY: &str = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
    const HELLO: &str = "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_sha256_known_values() {
        assert_eq!(Digest::sha256(b"").to_string(), EMPTY);
        assert_eq!(Digest::sha256(b"hello").to_string(), HELLO);
    }

    #[test]
    fn test_parse_roundtrip() {
        let digest = Digest::parse(HELLO).unwrap();
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(digest.to_string(), HELLO);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Digest::parse("md5:abc").is_err());
        assert!(Digest::parse("sha256:abc").is_err());
        assert!(Digest::parse(&HELLO.to_uppercase().replace("SHA256", "sha256")).is_err());
    }

    #[test]
    fn test_digest_writer_matches_direct_hash() {
        let content: Vec<u8> = (0..20000).map(|i| (i % 251) as u8).collect();
        let mut writer = DigestWriter::new(Vec::new());
        for chunk in content.chunks(777) {
            writer.write_all(chunk).unwrap();
        }
        assert_eq!(writer.bytes_written(), content.len() as u64);

        let (digest, size, inner) = writer.finalize();
        assert_eq!(digest, Digest::sha256(&content));
        assert_eq!(size, content.len() as u64);
        assert_eq!(inner, content);
    }

    #[test]
    fn test_serde_as_string() {
        let digest = Digest::sha256(b"hello");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{HELLO}\""));
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
        assert!(serde_json::from_str::<Digest>("\"sha256:nothex\"").is_err());
    }
}
