//! Single block access on top of a [`DagWalker`].
use bytes::Bytes;
use ipld_core::cid::Cid;

use super::stream::DagWalker;
use crate::block::{slice_bytes, Block, BlockSource, BlockStat, ByteStream};
use crate::errors::IpldError;
use crate::hasher::IDENTITY;
use crate::range::AbsoluteRange;
use crate::signal::AbortSignal;

fn inline_bytes(cid: &Cid) -> Option<Bytes> {
    (cid.hash().code() == IDENTITY).then(|| Bytes::copy_from_slice(cid.hash().digest()))
}

impl<S: BlockSource> DagWalker<S> {
    /// Fetches one block and checks it against its CID.
    pub async fn get_block(&self, cid: &Cid, signal: &AbortSignal) -> Result<Block, IpldError> {
        let block = self.load(cid, signal).await?;
        self.hashers().verify(cid, block.bytes())?;
        Ok(block)
    }

    /// Streams the bytes of one block, optionally limited to an inclusive byte range.
    pub async fn stream_block(
        &self,
        cid: &Cid,
        range: Option<AbsoluteRange>,
        signal: &AbortSignal,
    ) -> Result<ByteStream, IpldError> {
        if signal.is_aborted() {
            return Err(signal.error());
        }
        if let Some(bytes) = inline_bytes(cid) {
            let bytes = slice_bytes(&bytes, range);
            return Ok(Box::pin(futures::stream::once(async move { Ok(bytes) })));
        }
        self.source()
            .stream(cid, range, signal)
            .await?
            .ok_or(IpldError::DontHave(*cid))
    }

    pub async fn stat_block(&self, cid: &Cid, signal: &AbortSignal) -> Result<BlockStat, IpldError> {
        if signal.is_aborted() {
            return Err(signal.error());
        }
        if let Some(bytes) = inline_bytes(cid) {
            return Ok(BlockStat {
                size: bytes.len() as u64,
            });
        }
        self.source()
            .stat(cid, signal)
            .await?
            .ok_or(IpldError::DontHave(*cid))
    }
}
