use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use ipld_core::cid::Cid;
use parking_lot::{Mutex, RwLock};

use crate::block::{Block, BlockSource};
use crate::errors::IpldError;
use crate::signal::AbortSignal;

/// In-memory block source, keyed by CID. Remembers every CID it was asked for.
#[derive(Clone, Default)]
pub struct MemoryBlockSource {
    inner: Arc<RwLock<HashMap<Cid, Bytes>>>,
    requested: Arc<Mutex<Vec<Cid>>>,
}

impl MemoryBlockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, block: Block) {
        let (cid, bytes) = block.into_parts();
        self.inner.write().insert(cid, bytes);
    }

    pub fn extend(&self, blocks: impl IntoIterator<Item = Block>) {
        let mut inner = self.inner.write();
        for block in blocks {
            let (cid, bytes) = block.into_parts();
            inner.insert(cid, bytes);
        }
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.inner.read().contains_key(cid)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// CIDs requested so far, in request order.
    pub fn requested(&self) -> Vec<Cid> {
        self.requested.lock().clone()
    }
}

impl BlockSource for MemoryBlockSource {
    async fn get(&self, cid: &Cid, signal: &AbortSignal) -> Result<Option<Block>, IpldError> {
        if signal.is_aborted() {
            return Err(signal.error());
        }
        self.requested.lock().push(*cid);
        Ok(self
            .inner
            .read()
            .get(cid)
            .map(|bytes| Block::new(*cid, bytes.clone())))
    }
}
