//! The canonical digest string used to address content in the store.

use std::{fmt, str::FromStr};

use base64::{engine::general_purpose::STANDARD as BASE64_STD, Engine};
use sha2::Digest;

use crate::Sha256Hash;

/// The hash algorithm of an [`Integrity`] value.
///
/// The store only supports SHA-256. Parsing any other algorithm tag fails,
/// which keeps every digest in the system comparable byte-for-byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// The SHA-256 hash algorithm.
    Sha256,
}

impl Algorithm {
    /// The canonical name of the algorithm as it appears in integrity
    /// strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = ParseIntegrityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            _ => Err(ParseIntegrityError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// An error that can occur when parsing an [`Integrity`] string.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ParseIntegrityError {
    /// The string is missing the `<algorithm>-` prefix.
    #[error("missing algorithm prefix")]
    MissingAlgorithm,

    /// The algorithm is not supported by the store.
    #[error("unsupported hash algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    /// The digest part is not valid standard base64.
    #[error("invalid base64 digest")]
    InvalidBase64,

    /// The decoded digest has the wrong number of bytes for the algorithm.
    #[error("invalid digest length {0}, expected {1}")]
    InvalidLength(usize, usize),
}

/// A named hash rendered canonically as `<algorithm>-<base64>`, e.g.
/// `sha256-n4bQgYhMfWWaL+qgxVrQFaO/TxsrC4Is0V1sFbDwCgg=`.
///
/// Equality is byte-exact on the algorithm and the raw digest bytes, which is
/// the same as equality of the canonical string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde_with::SerializeDisplay, serde_with::DeserializeFromStr)
)]
pub struct Integrity {
    algorithm: Algorithm,
    bytes: Sha256Hash,
}

impl Integrity {
    /// Constructs an integrity value from a raw SHA-256 hash.
    pub fn from_sha256(hash: Sha256Hash) -> Self {
        Self {
            algorithm: Algorithm::Sha256,
            bytes: hash,
        }
    }

    /// Computes the integrity of the given bytes.
    pub fn of(bytes: impl AsRef<[u8]>) -> Self {
        Self::from_sha256(crate::compute_bytes_digest::<crate::Sha256>(bytes))
    }

    /// The hash algorithm of this value.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The raw SHA-256 digest bytes.
    pub fn sha256(&self) -> &Sha256Hash {
        &self.bytes
    }

    /// Returns true if the given bytes hash to this digest.
    pub fn matches(&self, bytes: impl AsRef<[u8]>) -> bool {
        self == &Self::of(bytes)
    }
}

impl fmt::Display for Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.algorithm, BASE64_STD.encode(&self.bytes))
    }
}

impl FromStr for Integrity {
    type Err = ParseIntegrityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, digest) = s
            .split_once('-')
            .ok_or(ParseIntegrityError::MissingAlgorithm)?;
        let algorithm = Algorithm::from_str(algorithm)?;
        let decoded = BASE64_STD
            .decode(digest)
            .map_err(|_| ParseIntegrityError::InvalidBase64)?;

        let expected_len = <crate::Sha256 as Digest>::output_size();
        if decoded.len() != expected_len {
            return Err(ParseIntegrityError::InvalidLength(
                decoded.len(),
                expected_len,
            ));
        }

        Ok(Integrity {
            algorithm,
            bytes: Sha256Hash::clone_from_slice(&decoded),
        })
    }
}

impl From<Sha256Hash> for Integrity {
    fn from(hash: Sha256Hash) -> Self {
        Integrity::from_sha256(hash)
    }
}
