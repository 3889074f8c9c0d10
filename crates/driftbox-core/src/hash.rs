//! Content address parsing and digest computation.
//!
//! A content address has the form `algorithm:hex`, e.g.
//! `sha256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08`.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;
use std::str::FromStr;

/// Errors produced while parsing a content address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HashError {
    #[error("content hash is missing the 'algorithm:' prefix: {0}")]
    MissingAlgorithm(String),

    #[error("unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid hex digest: {0}")]
    InvalidHex(String),

    #[error("expected {expected} digest bytes for {algorithm}, got {actual}")]
    InvalidLength {
        algorithm: HashAlgorithm,
        expected: usize,
        actual: usize,
    },
}

/// Digest algorithms accepted in a content address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "sha384" | "sha-384" => Ok(HashAlgorithm::Sha384),
            "sha512" | "sha-512" => Ok(HashAlgorithm::Sha512),
            _ => Err(HashError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// A parsed content address.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContentHash {
    algorithm: HashAlgorithm,
    digest: Vec<u8>,
}

impl ContentHash {
    /// Parse an `algorithm:hex` identifier.
    pub fn parse(s: &str) -> Result<Self, HashError> {
        let (algorithm, hex_digest) = s
            .split_once(':')
            .ok_or_else(|| HashError::MissingAlgorithm(s.to_string()))?;
        let algorithm: HashAlgorithm = algorithm.parse()?;
        let digest =
            hex::decode(hex_digest).map_err(|e| HashError::InvalidHex(e.to_string()))?;
        if digest.len() != algorithm.digest_len() {
            return Err(HashError::InvalidLength {
                algorithm,
                expected: algorithm.digest_len(),
                actual: digest.len(),
            });
        }
        Ok(Self { algorithm, digest })
    }

    /// Compute the content address of a byte buffer.
    pub fn compute(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new(algorithm);
        hasher.update(data);
        hasher.finalize()
    }

    /// Create an incremental hasher for this address's algorithm.
    pub fn hasher(&self) -> ContentHasher {
        ContentHasher::new(self.algorithm)
    }

    /// Recompute the digest over `data` and compare.
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(self.algorithm, data) == *self
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Lowercase hex digest without the algorithm prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.digest)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "ContentHash({}:{})", self.algorithm, &hex[..16.min(hex.len())])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Incremental hasher over one of the supported algorithms.
pub enum ContentHasher {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => ContentHasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => ContentHasher::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => ContentHasher::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            ContentHasher::Sha256(h) => h.update(data),
            ContentHasher::Sha384(h) => h.update(data),
            ContentHasher::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> ContentHash {
        let (algorithm, digest) = match self {
            ContentHasher::Sha256(h) => (HashAlgorithm::Sha256, h.finalize().to_vec()),
            ContentHasher::Sha384(h) => (HashAlgorithm::Sha384, h.finalize().to_vec()),
            ContentHasher::Sha512(h) => (HashAlgorithm::Sha512, h.finalize().to_vec()),
        };
        ContentHash { algorithm, digest }
    }
}
