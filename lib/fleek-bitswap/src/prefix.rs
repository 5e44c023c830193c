//! The CID prefix that precedes every block payload.
//!
//! A prefix is four unsigned varints: CID version, codec, multihash code and digest length.
//! Together with the block bytes it is enough to rebuild the CID.
use cid::{Cid, Version};
use fleek_ipld::hasher::Hashers;
use unsigned_varint::{decode, encode};

use crate::errors::BitswapError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Prefix {
    pub version: u64,
    pub codec: u64,
    pub hash_code: u64,
    pub hash_len: u64,
}

impl From<&Cid> for Prefix {
    fn from(cid: &Cid) -> Self {
        Self {
            version: cid.version().into(),
            codec: cid.codec(),
            hash_code: cid.hash().code(),
            hash_len: cid.hash().size() as u64,
        }
    }
}

impl Prefix {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        for value in [self.version, self.codec, self.hash_code, self.hash_len] {
            out.extend_from_slice(encode::u64(value, &mut encode::u64_buffer()));
        }
        out
    }

    /// Decodes a prefix, ignoring anything after the fourth varint.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BitswapError> {
        let (version, rest) = decode::u64(bytes)?;
        let (codec, rest) = decode::u64(rest)?;
        let (hash_code, rest) = decode::u64(rest)?;
        let (hash_len, _) = decode::u64(rest)?;
        Ok(Self {
            version,
            codec,
            hash_code,
            hash_len,
        })
    }

    /// Hashes `data` the way this prefix says and returns the resulting CID.
    pub fn to_cid(&self, data: &[u8], hashers: &Hashers) -> Result<Cid, BitswapError> {
        let hash = hashers.digest(self.hash_code, data, Some(self.hash_len as usize))?;
        let version = Version::try_from(self.version)?;
        Ok(Cid::new(version, self.codec, hash)?)
    }
}
