//! Multihash verifiers, keyed by multihash code.
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use ipld_core::cid::multihash::Multihash;
use ipld_core::cid::Cid;
use sha2::{Digest, Sha256, Sha512};

use crate::errors::IpldError;

pub const IDENTITY: u64 = 0x00;
pub const SHA2_256: u64 = 0x12;
pub const SHA2_512: u64 = 0x13;
pub const BLAKE3: u64 = 0x1e;

pub trait MultihashHasher: Send + Sync {
    fn code(&self) -> u64;

    fn digest(&self, data: &[u8]) -> Vec<u8>;
}

pub struct Sha2_256;

impl MultihashHasher for Sha2_256 {
    fn code(&self) -> u64 {
        SHA2_256
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        Sha256::digest(data).to_vec()
    }
}

pub struct Sha2_512;

impl MultihashHasher for Sha2_512 {
    fn code(&self) -> u64 {
        SHA2_512
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        Sha512::digest(data).to_vec()
    }
}

pub struct Blake3;

impl MultihashHasher for Blake3 {
    fn code(&self) -> u64 {
        BLAKE3
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        blake3::hash(data).as_bytes().to_vec()
    }
}

/// Table of the hash functions we are able to verify blocks with.
///
/// Identity multihashes embed the content in the digest and never need an entry here.
#[derive(Clone)]
pub struct Hashers {
    inner: Arc<HashMap<u64, Arc<dyn MultihashHasher>>>,
}

impl Default for Hashers {
    fn default() -> Self {
        Self::empty().with(Sha2_256).with(Sha2_512).with(Blake3)
    }
}

impl fmt::Debug for Hashers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes = self.inner.keys().collect::<Vec<_>>();
        codes.sort();
        f.debug_struct("Hashers").field("codes", &codes).finish()
    }
}

impl Hashers {
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(HashMap::new()),
        }
    }

    pub fn with(mut self, hasher: impl MultihashHasher + 'static) -> Self {
        Arc::make_mut(&mut self.inner).insert(hasher.code(), Arc::new(hasher));
        self
    }

    pub fn get(&self, code: u64) -> Option<&Arc<dyn MultihashHasher>> {
        self.inner.get(&code)
    }

    /// Returns `true` if blocks hashed with `code` can be verified.
    pub fn supports(&self, code: u64) -> bool {
        code == IDENTITY || self.inner.contains_key(&code)
    }

    /// Hashes `data` with `code`, truncating the digest to `size` bytes when requested.
    pub fn digest(
        &self,
        code: u64,
        data: &[u8],
        size: Option<usize>,
    ) -> Result<Multihash<64>, IpldError> {
        let mut digest = if code == IDENTITY {
            data.to_vec()
        } else {
            self.get(code)
                .ok_or(IpldError::UnknownMultihash(code))?
                .digest(data)
        };
        if let Some(size) = size {
            digest.truncate(size);
        }
        Multihash::wrap(code, &digest).map_err(|e| IpldError::InvalidMultihash(e.to_string()))
    }

    /// Checks that `bytes` hash to the multihash claimed by `cid`.
    pub fn verify(&self, cid: &Cid, bytes: &[u8]) -> Result<(), IpldError> {
        let expected = cid.hash();
        let actual = self.digest(expected.code(), bytes, Some(expected.digest().len()))?;
        if actual.digest() == expected.digest() {
            Ok(())
        } else {
            Err(IpldError::MultihashError(*cid))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: u64 = 0x55;

    fn cid_for(code: u64, data: &[u8]) -> Cid {
        let hash = Hashers::default().digest(code, data, None).unwrap();
        Cid::new_v1(RAW, hash)
    }

    #[test]
    fn test_verify_known_hashers() {
        let data = b"hello world";
        let hashers = Hashers::default();
        for code in [SHA2_256, SHA2_512, BLAKE3, IDENTITY] {
            let cid = cid_for(code, data);
            assert!(hashers.verify(&cid, data).is_ok(), "code 0x{code:x}");
        }
    }

    #[test]
    fn test_verify_mismatch() {
        let cid = cid_for(SHA2_256, b"hello world");
        let result = Hashers::default().verify(&cid, b"goodbye world");
        assert!(matches!(result, Err(IpldError::MultihashError(c)) if c == cid));
    }

    #[test]
    fn test_unknown_multihash() {
        let cid = cid_for(SHA2_256, b"hello world");
        let hashers = Hashers::empty();
        assert!(!hashers.supports(SHA2_256));
        assert!(hashers.supports(IDENTITY));
        assert!(matches!(
            hashers.verify(&cid, b"hello world"),
            Err(IpldError::UnknownMultihash(SHA2_256))
        ));
    }
}
