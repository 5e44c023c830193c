//! Reading UnixFS entries by path.
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use ipld_core::cid::Cid;
use tracing::debug;

use super::path::{DagScope, PathOptions};
use super::search::{GraphSelector, LinkFilter, Order};
use super::stream::{child_selectors, oversized_file, DagWalker};
use crate::block::{slice_bytes, Block, BlockSource, ByteStream};
use crate::decoder::Node;
use crate::errors::IpldError;
use crate::range::EntityBytes;
use crate::signal::AbortSignal;
use crate::unixfs::{DataType, UnixFs};

/// A UnixFS entry resolved from a path.
pub struct UnixFsEntry {
    pub cid: Cid,
    /// Metadata of the entry. Raw leaves are reported as a `Raw` node holding their bytes.
    pub unixfs: UnixFs,
    /// File content, limited to the requested range. Empty for directories.
    pub content: ByteStream,
}

impl UnixFsEntry {
    pub fn is_file(&self) -> bool {
        self.unixfs.is_file()
    }

    pub fn is_directory(&self) -> bool {
        self.unixfs.is_directory()
    }
}

impl std::fmt::Debug for UnixFsEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixFsEntry")
            .field("cid", &self.cid)
            .field("unixfs", &self.unixfs)
            .finish_non_exhaustive()
    }
}

impl<S: BlockSource> DagWalker<S> {
    /// Resolves `path` to a UnixFS entry. File content is read lazily through
    /// [`UnixFsEntry::content`], verified block by block, and limited to `range` when given.
    pub async fn get_unixfs(
        &self,
        path: &str,
        range: Option<EntityBytes>,
        signal: &AbortSignal,
    ) -> Result<UnixFsEntry, IpldError> {
        let options = PathOptions::builder()
            .dag_scope(DagScope::Block)
            .signal(signal.clone())
            .build();
        let mut blocks = self.get_path(path, options);
        let mut terminal = None;
        while let Some(block) = blocks.next().await {
            terminal = Some(block?);
        }
        let block = terminal.ok_or_else(|| IpldError::MalformedPath(path.to_string()))?;
        let cid = *block.cid();
        debug!("{path} resolved to {cid}");

        let node = self.decode(&block)?;
        let unixfs = match &node {
            Node::Raw(bytes) => UnixFs {
                kind: DataType::Raw,
                data: bytes.clone(),
                filesize: Some(bytes.len() as u64),
                ..Default::default()
            },
            _ => match node.unixfs() {
                Some(unixfs) => unixfs?,
                None => return Err(IpldError::UnsupportedUnixFsDataType(cid)),
            },
        };
        if !unixfs.is_file() {
            return Ok(UnixFsEntry {
                cid,
                unixfs,
                content: futures::stream::empty().boxed(),
            });
        }

        let range = match range {
            Some(bytes) => {
                let size = unixfs.size().ok_or_else(|| oversized_file(&cid))?;
                match bytes.resolve(size) {
                    Some(range) => Some(range),
                    None => {
                        return Ok(UnixFsEntry {
                            cid,
                            unixfs,
                            content: futures::stream::empty().boxed(),
                        });
                    },
                }
            },
            None => None,
        };

        let head = slice_bytes(&unixfs.data, range);
        let children = child_selectors(&GraphSelector::new(cid, range), &node, &LinkFilter::All)?;
        let walker = self.clone();
        let tail = self
            .traverse_selected(children, Order::DepthFirst, LinkFilter::All, signal.clone())
            .and_then(move |(selector, block)| {
                futures::future::ready(walker.chunk_content(&selector, &block))
            });
        let content = futures::stream::once(futures::future::ready(Ok(head)))
            .chain(tail)
            .try_filter(|bytes| futures::future::ready(!bytes.is_empty()))
            .boxed();
        Ok(UnixFsEntry {
            cid,
            unixfs,
            content,
        })
    }

    /// The file bytes held by one block of a file DAG, cut to the selector's range.
    fn chunk_content(&self, selector: &GraphSelector, block: &Block) -> Result<Bytes, IpldError> {
        let range = selector.range().copied();
        match self.decode(block)? {
            Node::Raw(bytes) => Ok(slice_bytes(&bytes, range)),
            node => match node.unixfs() {
                Some(unixfs) => Ok(slice_bytes(&unixfs?.data, range)),
                None => Err(IpldError::UnsupportedUnixFsDataType(*block.cid())),
            },
        }
    }
}
