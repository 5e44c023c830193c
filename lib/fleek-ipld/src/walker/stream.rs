//! Verified traversal of a DAG, streamed block by block.
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use ipld_core::cid::Cid;
use tracing::{debug, trace};
use typed_builder::TypedBuilder;

use super::search::{GraphSelector, LinkFilter, Order, Search};
use crate::block::{Block, BlockSource};
use crate::decoder::{Decoders, Link, Node};
use crate::errors::IpldError;
use crate::hasher::{Hashers, IDENTITY};
use crate::range::{chunk_ranges_from_sizes, intersect_relative, AbsoluteRange};
use crate::signal::AbortSignal;

pub type BlockStream = BoxStream<'static, Result<Block, IpldError>>;

/// Traversed blocks together with the selector that reached them.
pub(crate) type SelectedBlocks = BoxStream<'static, Result<(GraphSelector, Block), IpldError>>;

type Fetches = BoxStream<'static, (GraphSelector, Result<Block, IpldError>)>;

/// Why a fetched block could not be decoded.
pub(crate) enum DecodeFailure {
    /// No decoder or hasher for the block. The block is still handed out before failing.
    Unsupported(IpldError),
    /// The block does not match its CID or does not decode.
    Invalid(IpldError),
}

impl From<DecodeFailure> for IpldError {
    fn from(failure: DecodeFailure) -> Self {
        match failure {
            DecodeFailure::Unsupported(error) | DecodeFailure::Invalid(error) => error,
        }
    }
}

#[derive(Clone, Debug, Default, TypedBuilder)]
pub struct GetOptions {
    #[builder(default)]
    pub order: Order,
    #[builder(default)]
    pub filter: LinkFilter,
    /// Restricts file content to this inclusive byte range of every root.
    #[builder(default, setter(strip_option))]
    pub byte_range: Option<AbsoluteRange>,
    #[builder(default)]
    pub signal: AbortSignal,
}

/// Walks DAGs out of a [`BlockSource`], verifying every block against its CID before following
/// its links.
#[derive(Clone, TypedBuilder)]
pub struct DagWalker<S> {
    source: S,
    #[builder(default)]
    decoders: Decoders,
    #[builder(default)]
    hashers: Hashers,
}

impl<S: BlockSource> DagWalker<S> {
    pub fn new(source: S) -> Self {
        Self::builder().source(source).build()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn hashers(&self) -> &Hashers {
        &self.hashers
    }

    /// Streams every block reachable from `roots`, roots included.
    pub fn get<I>(&self, roots: I, options: GetOptions) -> BlockStream
    where
        I: IntoIterator<Item = Cid>,
    {
        let range = options.byte_range;
        let selectors = roots
            .into_iter()
            .map(|cid| GraphSelector::new(cid, range))
            .collect();
        self.traverse(selectors, options.order, options.filter, options.signal)
    }

    pub(crate) fn traverse(
        &self,
        selectors: Vec<GraphSelector>,
        order: Order,
        filter: LinkFilter,
        signal: AbortSignal,
    ) -> BlockStream {
        self.traverse_selected(selectors, order, filter, signal)
            .map(|item| item.map(|(_, block)| block))
            .boxed()
    }

    pub(crate) fn traverse_selected(
        &self,
        selectors: Vec<GraphSelector>,
        order: Order,
        filter: LinkFilter,
        signal: AbortSignal,
    ) -> SelectedBlocks {
        let traversal = Traversal {
            walker: self.clone(),
            search: Search::new(order),
            filter,
            signal,
            frontier: selectors,
            inflight: None,
            failure: None,
            done: false,
        };
        futures::stream::unfold(traversal, |mut traversal| async move {
            let item = traversal.next_block().await?;
            Some((item, traversal))
        })
        .boxed()
    }

    /// Fetches a block. Identity CIDs are answered from the CID itself.
    pub(crate) async fn load(&self, cid: &Cid, signal: &AbortSignal) -> Result<Block, IpldError> {
        if signal.is_aborted() {
            return Err(signal.error());
        }
        if cid.hash().code() == IDENTITY {
            return Ok(Block::new(*cid, Bytes::copy_from_slice(cid.hash().digest())));
        }
        self.source
            .get(cid, signal)
            .await?
            .ok_or(IpldError::DontHave(*cid))
    }

    pub(crate) fn decode(&self, block: &Block) -> Result<Node, DecodeFailure> {
        let cid = block.cid();
        if !self.decoders.supports(cid.codec()) {
            return Err(DecodeFailure::Unsupported(IpldError::UnknownCodec(
                *cid,
                cid.codec(),
            )));
        }
        let code = cid.hash().code();
        if !self.hashers.supports(code) {
            return Err(DecodeFailure::Unsupported(IpldError::UnknownMultihash(code)));
        }
        self.hashers
            .verify(cid, block.bytes())
            .map_err(DecodeFailure::Invalid)?;
        self.decoders
            .decode(cid, block.bytes())
            .map_err(DecodeFailure::Invalid)
    }
}

/// The links of `node` a traversal continues with.
///
/// When the selector carries a byte range and the node is a chunked UnixFS file, only the chunks
/// overlapping the range are kept, each with the range relative to its own content. Chunk sizes
/// that add up past `u64::MAX` fail the node.
pub(crate) fn child_selectors(
    selector: &GraphSelector,
    node: &Node,
    filter: &LinkFilter,
) -> Result<Vec<GraphSelector>, IpldError> {
    if let (Some(range), Some(pb), Some(Ok(unixfs))) =
        (selector.range(), node.as_dag_pb(), node.unixfs())
    {
        if unixfs.is_file() && unixfs.blocksizes.len() == pb.links.len() {
            let offset = unixfs.data.len() as u64;
            let chunks = chunk_ranges_from_sizes(&unixfs.blocksizes)
                .ok_or_else(|| oversized_file(selector.cid()))?;
            let mut children = Vec::new();
            for (link, chunk) in pb.links.iter().zip(chunks) {
                let Some(chunk) = chunk else {
                    continue;
                };
                let chunk = chunk
                    .shift(offset)
                    .ok_or_else(|| oversized_file(selector.cid()))?;
                let Some(relative) = intersect_relative(range, &chunk) else {
                    continue;
                };
                let link = Link::from(link);
                if filter.accepts(&link) {
                    children.push(GraphSelector::new(*link.cid(), Some(relative)));
                }
            }
            return Ok(children);
        }
    }
    Ok(node
        .links()
        .into_iter()
        .filter(|link| filter.accepts(link))
        .map(|link| GraphSelector::from(*link.cid()))
        .collect())
}

pub(crate) fn oversized_file(cid: &Cid) -> IpldError {
    IpldError::IpldCodecError(*cid, "file size exceeds u64::MAX".to_string())
}

struct Traversal<S> {
    walker: DagWalker<S>,
    search: Search,
    filter: LinkFilter,
    signal: AbortSignal,
    /// Links discovered in the current round.
    frontier: Vec<GraphSelector>,
    inflight: Option<Fetches>,
    /// Error to report once the block that caused it has been handed out.
    failure: Option<IpldError>,
    done: bool,
}

impl<S: BlockSource> Traversal<S> {
    async fn next_block(&mut self) -> Option<Result<(GraphSelector, Block), IpldError>> {
        loop {
            if self.done {
                return None;
            }
            if let Some(error) = self.failure.take() {
                self.finish();
                return Some(Err(error));
            }

            let Some(inflight) = self.inflight.as_mut() else {
                let links = std::mem::take(&mut self.frontier);
                let round = self.search.next(links);
                if round.is_empty() {
                    self.finish();
                    return None;
                }
                debug!("fetching {} blocks", round.len());
                self.inflight = Some(self.fetch(round));
                continue;
            };

            match inflight.next().await {
                Some((selector, Ok(block))) => match self.walker.decode(&block) {
                    Ok(node) => match child_selectors(&selector, &node, &self.filter) {
                        Ok(children) => {
                            trace!("{} has {} links to follow", block.cid(), children.len());
                            self.frontier.extend(children);
                            return Some(Ok((selector, block)));
                        },
                        Err(error) => {
                            self.failure = Some(error);
                            return Some(Ok((selector, block)));
                        },
                    },
                    Err(DecodeFailure::Unsupported(error)) => {
                        self.failure = Some(error);
                        return Some(Ok((selector, block)));
                    },
                    Err(DecodeFailure::Invalid(error)) => {
                        self.finish();
                        return Some(Err(error));
                    },
                },
                Some((selector, Err(error))) => {
                    debug!("failed to fetch {}: {error}", selector.cid());
                    self.finish();
                    return Some(Err(error));
                },
                None => self.inflight = None,
            }
        }
    }

    /// Requests every CID of the round at once. Depth first rounds yield in request order.
    fn fetch(&self, round: Vec<GraphSelector>) -> Fetches {
        let width = round.len();
        let fetches = round
            .into_iter()
            .map(|selector| {
                let walker = self.walker.clone();
                let signal = self.signal.child();
                async move {
                    let result = walker.load(selector.cid(), &signal).await;
                    (selector, result)
                }
            })
            .collect::<Vec<_>>();
        let fetches = futures::stream::iter(fetches);
        if self.search.is_ordered() {
            fetches.buffered(width).boxed()
        } else {
            fetches.buffer_unordered(width).boxed()
        }
    }

    /// Stops the traversal, dropping (and so cancelling) any outstanding fetch.
    fn finish(&mut self) {
        self.done = true;
        self.inflight = None;
        self.frontier.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::decoder::{DAG_CBOR, RAW};
    use crate::hasher::SHA2_512;
    use crate::test_utils::*;
    use crate::unixfs::UnixFs;
    use crate::walker::MemoryBlockSource;

    /// root -> [A, B, C]; A -> [l1, l2]; B -> [l3..l6]; C -> [l7..l9]
    fn fixture() -> (MemoryBlockSource, Vec<Block>) {
        let leaves = (1..=9)
            .map(|i| raw(format!("leaf {i}").as_bytes()))
            .collect::<Vec<_>>();
        let a = file(&[&leaves[0], &leaves[1]]);
        let b = file(&[&leaves[2], &leaves[3], &leaves[4], &leaves[5]]);
        let c = file(&[&leaves[6], &leaves[7], &leaves[8]]);
        let root = directory(&[("a", &a), ("b", &b), ("c", &c)]);

        let mut expected = vec![root, a];
        expected.extend(leaves[0..2].iter().cloned());
        expected.push(b);
        expected.extend(leaves[2..6].iter().cloned());
        expected.push(c);
        expected.extend(leaves[6..9].iter().cloned());

        let source = MemoryBlockSource::new();
        source.extend(expected.iter().cloned());
        (source, expected)
    }

    #[tokio::test]
    async fn test_get_depth_first_order() {
        let (source, expected) = fixture();
        let walker = DagWalker::new(source);
        let (cids, error) =
            collect_cids(walker.get([*expected[0].cid()], GetOptions::default())).await;
        assert!(error.is_none());
        assert_eq!(cids, expected.iter().map(|b| *b.cid()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_get_unordered_yields_same_set() {
        let (source, expected) = fixture();
        let walker = DagWalker::new(source);
        let options = GetOptions::builder().order(Order::Unordered).build();
        let (cids, error) = collect_cids(walker.get([*expected[0].cid()], options)).await;
        assert!(error.is_none());
        assert_eq!(cids.len(), expected.len());
        assert_eq!(
            cids.into_iter().collect::<HashSet<_>>(),
            expected.iter().map(|b| *b.cid()).collect::<HashSet<_>>()
        );
    }

    /// root -> [A, B, l5, l6, C, l9]; A -> [l1, l2]; B -> [l3, l4]; C -> [l7, l8]
    #[tokio::test]
    async fn test_get_depth_first_with_leaves_between_subtrees() {
        let l = (1..=9)
            .map(|i| raw(format!("l{i}").as_bytes()))
            .collect::<Vec<_>>();
        let a = file(&[&l[0], &l[1]]);
        let b = file(&[&l[2], &l[3]]);
        let c = file(&[&l[6], &l[7]]);
        let root = directory(&[
            ("a", &a),
            ("b", &b),
            ("l5", &l[4]),
            ("l6", &l[5]),
            ("c", &c),
            ("l9", &l[8]),
        ]);
        let expected = [
            &root, &a, &l[0], &l[1], &b, &l[2], &l[3], &l[4], &l[5], &c, &l[6], &l[7], &l[8],
        ]
        .map(|block| *block.cid())
        .to_vec();

        let source = MemoryBlockSource::new();
        source.extend([root.clone(), a, b, c]);
        source.extend(l.iter().cloned());
        let walker = DagWalker::new(source);

        let (cids, error) = collect_cids(walker.get([*root.cid()], GetOptions::default())).await;
        assert!(error.is_none());
        assert_eq!(cids, expected);

        let options = GetOptions::builder().order(Order::Unordered).build();
        let (cids, error) = collect_cids(walker.get([*root.cid()], options)).await;
        assert!(error.is_none());
        assert_eq!(cids.len(), expected.len());
        assert_eq!(
            cids.into_iter().collect::<HashSet<_>>(),
            expected.into_iter().collect::<HashSet<_>>()
        );
    }

    #[tokio::test]
    async fn test_get_multiple_roots() {
        let one = raw(b"one");
        let two = raw(b"two");
        let source = MemoryBlockSource::new();
        source.extend([one.clone(), two.clone()]);
        let walker = DagWalker::new(source);
        let (cids, error) = collect_cids(
            walker.get([*one.cid(), *two.cid()], GetOptions::default()),
        )
        .await;
        assert!(error.is_none());
        assert_eq!(cids, vec![*one.cid(), *two.cid()]);
    }

    #[tokio::test]
    async fn test_get_missing_block() {
        let (_, expected) = fixture();
        let b = *expected[4].cid();
        let source = MemoryBlockSource::new();
        source.extend(expected.iter().filter(|block| *block.cid() != b).cloned());

        let walker = DagWalker::new(source);
        let (cids, error) =
            collect_cids(walker.get([*expected[0].cid()], GetOptions::default())).await;
        // root, a and the two leaves of a made it out before b was found missing
        assert_eq!(cids.len(), 4);
        assert!(matches!(error, Some(IpldError::DontHave(cid)) if cid == b));
    }

    #[tokio::test]
    async fn test_get_byte_range() {
        let chunks = [raw(b"abcd"), raw(b"efgh"), raw(b"ijkl")];
        let root = file(&[&chunks[0], &chunks[1], &chunks[2]]);
        let source = MemoryBlockSource::new();
        source.put(root.clone());
        source.extend(chunks.iter().cloned());

        let walker = DagWalker::new(source);
        let options = GetOptions::builder()
            .byte_range(AbsoluteRange::new(5, 8))
            .build();
        let (cids, error) = collect_cids(walker.get([*root.cid()], options)).await;
        assert!(error.is_none());
        assert_eq!(cids, vec![*root.cid(), *chunks[1].cid(), *chunks[2].cid()]);
    }

    #[tokio::test]
    async fn test_get_byte_range_with_overflowing_chunk_sizes() {
        let chunks = [raw(b"abcd"), raw(b"efgh")];
        let links = chunks.iter().map(|c| pb_link(None, c)).collect::<Vec<_>>();
        let sums_past_max = dag_pb(UnixFs::file(Bytes::new(), vec![u64::MAX, 5]), links.clone());
        let shifts_past_max = dag_pb(
            UnixFs::file(Bytes::from_static(b"xy"), vec![u64::MAX, 0]),
            links,
        );
        let source = MemoryBlockSource::new();
        source.extend([sums_past_max.clone(), shifts_past_max.clone()]);
        source.extend(chunks.iter().cloned());
        let walker = DagWalker::new(source);

        for root in [sums_past_max, shifts_past_max] {
            let options = GetOptions::builder()
                .byte_range(AbsoluteRange::new(0, 3))
                .build();
            let (cids, error) = collect_cids(walker.get([*root.cid()], options)).await;
            assert_eq!(cids, vec![*root.cid()]);
            assert!(
                matches!(error, Some(IpldError::IpldCodecError(cid, _)) if cid == *root.cid())
            );
        }
    }

    #[tokio::test]
    async fn test_get_filter() {
        let (source, expected) = fixture();
        let walker = DagWalker::new(source);
        let options = GetOptions::builder()
            .filter(LinkFilter::custom(|link: &Link| {
                link.name().as_deref() == Some("c")
            }))
            .build();
        let (cids, error) = collect_cids(walker.get([*expected[0].cid()], options)).await;
        assert!(error.is_none());
        // the filter applies to every level, and file chunks are unnamed
        assert_eq!(cids, vec![*expected[0].cid(), *expected[9].cid()]);
    }

    #[tokio::test]
    async fn test_hash_mismatch_is_not_yielded() {
        let good = raw(b"expected");
        let source = MemoryBlockSource::new();
        source.put(Block::new(*good.cid(), &b"tampered"[..]));
        let walker = DagWalker::new(source);
        let (cids, error) = collect_cids(walker.get([*good.cid()], GetOptions::default())).await;
        assert!(cids.is_empty());
        assert!(matches!(error, Some(IpldError::MultihashError(cid)) if cid == *good.cid()));
    }

    #[tokio::test]
    async fn test_unknown_codec_yields_block_then_fails() {
        let block = Block::encode(0x300001, &b"mystery"[..]).unwrap();
        let source = MemoryBlockSource::new();
        source.put(block.clone());
        let walker = DagWalker::new(source);
        let (cids, error) = collect_cids(walker.get([*block.cid()], GetOptions::default())).await;
        assert_eq!(cids, vec![*block.cid()]);
        assert!(matches!(error, Some(IpldError::UnknownCodec(_, 0x300001))));
    }

    #[tokio::test]
    async fn test_unknown_hasher_yields_block_then_fails() {
        let bytes = b"sha512 content".to_vec();
        let hash = Hashers::default().digest(SHA2_512, &bytes, None).unwrap();
        let block = Block::new(Cid::new_v1(RAW, hash), bytes);
        let source = MemoryBlockSource::new();
        source.put(block.clone());

        let walker = DagWalker::builder()
            .source(source)
            .hashers(Hashers::empty().with(crate::hasher::Sha2_256))
            .build();
        let (cids, error) = collect_cids(walker.get([*block.cid()], GetOptions::default())).await;
        assert_eq!(cids, vec![*block.cid()]);
        assert!(matches!(error, Some(IpldError::UnknownMultihash(SHA2_512))));
    }

    #[tokio::test]
    async fn test_identity_cid_bypasses_source() {
        let hash = Hashers::default()
            .digest(IDENTITY, b"inline", None)
            .unwrap();
        let cid = Cid::new_v1(RAW, hash);
        let source = MemoryBlockSource::new();
        let walker = DagWalker::new(source.clone());
        let mut stream = walker.get([cid], GetOptions::default());
        let block = stream.next().await.unwrap().unwrap();
        assert_eq!(block.bytes().as_ref(), b"inline");
        assert!(stream.next().await.is_none());
        assert!(source.requested().is_empty());
    }

    #[tokio::test]
    async fn test_dag_cbor_links_are_followed() {
        use std::collections::BTreeMap;

        use ipld_core::ipld::Ipld;

        let leaf = raw(b"leaf");
        let value = Ipld::Map(BTreeMap::from([("leaf".to_string(), Ipld::Link(*leaf.cid()))]));
        let root = Block::encode(DAG_CBOR, serde_ipld_dagcbor::to_vec(&value).unwrap()).unwrap();
        let source = MemoryBlockSource::new();
        source.extend([root.clone(), leaf.clone()]);

        let walker = DagWalker::new(source);
        let (cids, error) = collect_cids(walker.get([*root.cid()], GetOptions::default())).await;
        assert!(error.is_none());
        assert_eq!(cids, vec![*root.cid(), *leaf.cid()]);
    }

    #[tokio::test]
    async fn test_aborted_signal() {
        let (source, expected) = fixture();
        let walker = DagWalker::new(source.clone());
        let signal = AbortSignal::new();
        signal.abort("not interested");
        let options = GetOptions::builder().signal(signal).build();
        let (cids, error) = collect_cids(walker.get([*expected[0].cid()], options)).await;
        assert!(cids.is_empty());
        assert!(matches!(error, Some(IpldError::Aborted(reason)) if reason == "not interested"));
        assert!(source.requested().is_empty());
    }
}
