//! Checksum algorithms understood by the `checksum` extension.
//!
//! Wire names are the lowercase tokens clients put in front of the digest in
//! `Upload-Checksum`; they are independent of the hashing crate in use.

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fmt;

/// A digest algorithm from the closed set advertised in `Tus-Checksum-Algorithm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {
    /// All supported algorithms, in advertisement order.
    pub const ALL: [ChecksumAlgorithm; 5] = [
        ChecksumAlgorithm::Md5,
        ChecksumAlgorithm::Sha1,
        ChecksumAlgorithm::Sha256,
        ChecksumAlgorithm::Sha384,
        ChecksumAlgorithm::Sha512,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }

    /// Look up an algorithm by its wire token. Unknown tokens yield `None`.
    pub fn for_wire_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|algorithm| algorithm.wire_name() == name.trim())
    }

    /// Look up the algorithm named in an `Upload-Checksum` value
    /// (`<algorithm> <digest>`).
    pub fn for_upload_checksum_header(value: &str) -> Option<Self> {
        let (token, _) = value.trim().split_once(' ')?;
        Self::for_wire_name(token)
    }

    /// Comma-joined list used for `Tus-Checksum-Algorithm`.
    pub fn advertised_list() -> String {
        Self::ALL
            .iter()
            .map(|algorithm| algorithm.wire_name())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Fresh stateful hasher for this algorithm.
    pub fn new_digest(self) -> RunningDigest {
        match self {
            Self::Md5 => RunningDigest::Md5(md5::Context::new()),
            Self::Sha1 => RunningDigest::Sha1(Sha1::new()),
            Self::Sha256 => RunningDigest::Sha256(Sha256::new()),
            Self::Sha384 => RunningDigest::Sha384(Sha384::new()),
            Self::Sha512 => RunningDigest::Sha512(Sha512::new()),
        }
    }

    /// One-shot digest over an in-memory buffer.
    pub fn compute_digest(self, bytes: &[u8]) -> Vec<u8> {
        let mut digest = self.new_digest();
        digest.update(bytes);
        digest.finalize()
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Hasher state fed chunk by chunk while a request body streams to disk.
#[derive(Clone)]
pub enum RunningDigest {
    Md5(md5::Context),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl RunningDigest {
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        match self {
            Self::Md5(_) => ChecksumAlgorithm::Md5,
            Self::Sha1(_) => ChecksumAlgorithm::Sha1,
            Self::Sha256(_) => ChecksumAlgorithm::Sha256,
            Self::Sha384(_) => ChecksumAlgorithm::Sha384,
            Self::Sha512(_) => ChecksumAlgorithm::Sha512,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Md5(ctx) => ctx.consume(bytes),
            Self::Sha1(hasher) => hasher.update(bytes),
            Self::Sha256(hasher) => hasher.update(bytes),
            Self::Sha384(hasher) => hasher.update(bytes),
            Self::Sha512(hasher) => hasher.update(bytes),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::Md5(ctx) => ctx.compute().0.to_vec(),
            Self::Sha1(hasher) => hasher.finalize().to_vec(),
            Self::Sha256(hasher) => hasher.finalize().to_vec(),
            Self::Sha384(hasher) => hasher.finalize().to_vec(),
            Self::Sha512(hasher) => hasher.finalize().to_vec(),
        }
    }
}

impl fmt::Debug for RunningDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RunningDigest")
            .field(&self.algorithm())
            .finish()
    }
}
