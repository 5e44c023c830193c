//! Blocks and the `BlockSource` trait that traversals fetch them from.
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use ipld_core::cid::Cid;

use crate::errors::IpldError;
use crate::hasher::{Hashers, SHA2_256};
use crate::range::AbsoluteRange;
use crate::signal::AbortSignal;

/// Streamed block content.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, IpldError>> + Send + 'static>>;

/// A content addressed block: a CID and the bytes it addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    bytes: Bytes,
}

impl Block {
    pub fn new(cid: Cid, bytes: impl Into<Bytes>) -> Self {
        Self {
            cid,
            bytes: bytes.into(),
        }
    }

    /// Builds a CIDv1 block for `bytes`, hashed with sha2-256.
    pub fn encode(codec: u64, bytes: impl Into<Bytes>) -> Result<Self, IpldError> {
        let bytes = bytes.into();
        let hash = Hashers::default().digest(SHA2_256, &bytes, None)?;
        Ok(Self::new(Cid::new_v1(codec, hash), bytes))
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn into_parts(self) -> (Cid, Bytes) {
        (self.cid, self.bytes)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockStat {
    pub size: u64,
}

/// Slice `[range.start, range.end]` out of `bytes`, clamped to its length.
pub fn slice_bytes(bytes: &Bytes, range: Option<AbsoluteRange>) -> Bytes {
    match range {
        None => bytes.clone(),
        Some(range) => match range.clamp(bytes.len() as u64) {
            Some(range) => bytes.slice(range.start as usize..=range.end as usize),
            None => Bytes::new(),
        },
    }
}

/// Where blocks come from. Absence is reported as `Ok(None)`, never as an error.
///
/// **Note**: `async_trait` is not used here because the returned futures must stay `Send` without
/// boxing.
pub trait BlockSource: Clone + Send + Sync + 'static {
    fn get(
        &self,
        cid: &Cid,
        signal: &AbortSignal,
    ) -> impl std::future::Future<Output = Result<Option<Block>, IpldError>> + Send;

    /// Streams the block bytes, optionally limited to an inclusive byte range.
    fn stream(
        &self,
        cid: &Cid,
        range: Option<AbsoluteRange>,
        signal: &AbortSignal,
    ) -> impl std::future::Future<Output = Result<Option<ByteStream>, IpldError>> + Send {
        async move {
            let Some(block) = self.get(cid, signal).await? else {
                return Ok(None);
            };
            let bytes = slice_bytes(block.bytes(), range);
            let stream: ByteStream = Box::pin(futures::stream::once(async move { Ok(bytes) }));
            Ok(Some(stream))
        }
    }

    fn stat(
        &self,
        cid: &Cid,
        signal: &AbortSignal,
    ) -> impl std::future::Future<Output = Result<Option<BlockStat>, IpldError>> + Send {
        async move {
            Ok(self.get(cid, signal).await?.map(|block| BlockStat {
                size: block.bytes().len() as u64,
            }))
        }
    }
}
