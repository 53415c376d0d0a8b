//! Conversion between the on-chain 32-byte SHA-256 digest and the
//! off-chain CID string used to address job/result documents.
//!
//! Encoding: prepend the two-byte multihash header `0x12 0x20`
//! (sha2-256, length 32) to the digest, then base58-encode the 34 bytes.
//! Decoding reverses this and drops the header.

use crate::error::NodeError;

const MULTIHASH_SHA256: u8 = 0x12;
const MULTIHASH_LEN: u8 = 0x20;

/// A content identifier for the off-chain object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid(String);

impl Cid {
    /// Encode a raw 32-byte SHA-256 digest as a CID string.
    pub fn encode(digest: [u8; 32]) -> Self {
        let mut buf = Vec::with_capacity(34);
        buf.push(MULTIHASH_SHA256);
        buf.push(MULTIHASH_LEN);
        buf.extend_from_slice(&digest);
        Cid(bs58::encode(buf).into_string())
    }

    /// Decode a CID string back to its raw 32-byte digest.
    pub fn decode(s: &str) -> Result<[u8; 32], NodeError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|err| NodeError::Decode(format!("cid {s:?}: {err}")))?;
        if bytes.len() != 34 || bytes[0] != MULTIHASH_SHA256 || bytes[1] != MULTIHASH_LEN {
            return Err(NodeError::Decode(format!(
                "cid {s:?}: not a 34-byte sha2-256 multihash"
            )));
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes[2..]);
        Ok(digest)
    }

    /// Parse an existing CID string without re-validating its header,
    /// for CIDs that arrived from trusted local state.
    pub fn from_string(s: String) -> Self {
        Cid(s)
    }

    /// Borrow the CID as its wire string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Cid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    #[test]
    fn round_trips_through_cid_string() {
        let digest: [u8; 32] = Sha256::digest(b"hello flow").into();
        let cid = Cid::encode(digest);
        let decoded = Cid::decode(cid.as_str()).unwrap();
        assert_eq!(decoded, digest);
    }

    #[test]
    fn round_trips_through_digest() {
        let digest = [7u8; 32];
        let cid = Cid::encode(digest);
        let reencoded = Cid::encode(Cid::decode(cid.as_str()).unwrap());
        assert_eq!(cid, reencoded);
    }

    #[test]
    fn rejects_malformed_cid() {
        let bogus = bs58::encode([0xff; 10]).into_string();
        assert!(Cid::decode(&bogus).is_err());
    }
}
