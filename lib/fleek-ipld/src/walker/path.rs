//! Resolves `/ipfs/<cid>/<segments...>` paths, yielding every block loaded on the way, then the
//! DAG scope requested for the terminal entity.
use std::collections::VecDeque;
use std::str::FromStr;

use futures::StreamExt;
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use ipld_dagpb::PbNode;
use tracing::debug;
use typed_builder::TypedBuilder;

use super::search::{GraphSelector, LinkFilter, Order};
use super::stream::{child_selectors, oversized_file, BlockStream, DagWalker, DecodeFailure};
use crate::block::{Block, BlockSource};
use crate::decoder::Node;
use crate::errors::IpldError;
use crate::range::{hamt_pad_width, EntityBytes};
use crate::signal::AbortSignal;
use crate::unixfs::hamt::{self, HashBits, ShardLookup};
use crate::unixfs::{DataType, UnixFs};

const IPFS_PREFIX: &str = "/ipfs/";

/// How much of the DAG below a resolved path is returned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DagScope {
    /// The entire DAG below the terminal entity.
    #[default]
    All,
    /// Enough blocks to read the terminal entity: file content, or the shards of a sharded
    /// directory, but not the entries of a directory.
    Entity,
    /// Only the blocks needed to resolve the path.
    Block,
}

impl FromStr for DagScope {
    type Err = IpldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(DagScope::All),
            "entity" => Ok(DagScope::Entity),
            "block" => Ok(DagScope::Block),
            _ => Err(IpldError::MalformedPath(format!("unknown dag-scope {s}"))),
        }
    }
}

#[derive(Clone, Debug, Default, TypedBuilder)]
pub struct PathOptions {
    /// Defaults to `Entity` when `entity_bytes` is set and `All` otherwise.
    #[builder(default, setter(strip_option))]
    pub dag_scope: Option<DagScope>,
    #[builder(default, setter(strip_option))]
    pub entity_bytes: Option<EntityBytes>,
    #[builder(default)]
    pub order: Order,
    #[builder(default)]
    pub signal: AbortSignal,
}

impl PathOptions {
    pub fn scope(&self) -> DagScope {
        self.dag_scope.unwrap_or(if self.entity_bytes.is_some() {
            DagScope::Entity
        } else {
            DagScope::All
        })
    }
}

/// A root CID followed by the path segments to resolve below it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DagPath {
    root: Cid,
    segments: Vec<String>,
}

impl DagPath {
    pub fn new(root: Cid, segments: Vec<String>) -> Self {
        Self { root, segments }
    }

    pub fn root(&self) -> &Cid {
        &self.root
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl From<Cid> for DagPath {
    fn from(root: Cid) -> Self {
        Self::new(root, Vec::new())
    }
}

impl FromStr for DagPath {
    type Err = IpldError;

    /// Accepts `/ipfs/<cid>/a/b`, `/<cid>/a/b` and `<cid>/a/b`. Empty segments are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path = s.strip_prefix(IPFS_PREFIX).unwrap_or(s);
        let mut segments = path.split('/').filter(|segment| !segment.is_empty());
        let root = segments
            .next()
            .ok_or_else(|| IpldError::MalformedPath(format!("missing root CID in {s}")))?;
        Ok(Self {
            root: Cid::try_from(root)?,
            segments: segments.map(ToString::to_string).collect(),
        })
    }
}

/// The next block to load while resolving a path.
enum Step {
    Resolve {
        cid: Cid,
        segments: VecDeque<String>,
    },
    /// Looking `name` up in a nested HAMT shard.
    Shard {
        cid: Cid,
        name: String,
        bits: HashBits,
        segments: VecDeque<String>,
    },
}

impl Step {
    fn cid(&self) -> &Cid {
        match self {
            Step::Resolve { cid, .. } | Step::Shard { cid, .. } => cid,
        }
    }
}

enum Advance {
    Next(Step),
    Terminal(Cid, Node),
}

enum Phase {
    Walking(Step),
    Expanding(BlockStream),
    Failed(IpldError),
    Done,
}

impl<S: BlockSource> DagWalker<S> {
    /// Streams the blocks needed to resolve `path`, followed by the blocks `options` selects
    /// below the entity the path points at.
    pub fn get_path(&self, path: &str, options: PathOptions) -> BlockStream {
        match path.parse::<DagPath>() {
            Ok(path) => self.walk_path(path, options),
            Err(e) => futures::stream::once(async move { Err(e) }).boxed(),
        }
    }

    pub fn walk_path(&self, path: DagPath, options: PathOptions) -> BlockStream {
        let walk = PathWalk {
            walker: self.clone(),
            options,
            phase: Phase::Walking(Step::Resolve {
                cid: path.root,
                segments: path.segments.into(),
            }),
        };
        futures::stream::unfold(walk, |mut walk| async move {
            let item = walk.next_block().await?;
            Some((item, walk))
        })
        .boxed()
    }

    /// The traversal below the terminal entity, if the scope asks for one.
    fn expand(
        &self,
        cid: Cid,
        node: &Node,
        options: &PathOptions,
    ) -> Result<Option<BlockStream>, IpldError> {
        let scope = options.scope();
        if scope == DagScope::Block {
            return Ok(None);
        }
        let signal = options.signal.clone();
        let unixfs = node.unixfs().and_then(Result::ok);
        let (selector, filter) = match unixfs {
            Some(unixfs) if unixfs.kind == DataType::HAMTShard && scope == DagScope::Entity => {
                let pad = hamt_pad_width(unixfs.fanout.unwrap_or_default());
                (GraphSelector::from(cid), LinkFilter::NameLength(pad))
            },
            Some(unixfs) if unixfs.kind == DataType::Directory && scope == DagScope::Entity => {
                return Ok(None);
            },
            Some(unixfs) if unixfs.is_file() => {
                let range = match options.entity_bytes {
                    Some(bytes) => {
                        let size = unixfs.size().ok_or_else(|| oversized_file(&cid))?;
                        match bytes.resolve(size) {
                            Some(range) => Some(range),
                            None => return Ok(None),
                        }
                    },
                    None => None,
                };
                (GraphSelector::new(cid, range), LinkFilter::All)
            },
            _ => (GraphSelector::from(cid), LinkFilter::All),
        };
        let children = child_selectors(&selector, node, &filter)?;
        if children.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.traverse(children, options.order, filter, signal)))
    }
}

struct PathWalk<S> {
    walker: DagWalker<S>,
    options: PathOptions,
    phase: Phase,
}

impl<S: BlockSource> PathWalk<S> {
    async fn next_block(&mut self) -> Option<Result<Block, IpldError>> {
        match std::mem::replace(&mut self.phase, Phase::Done) {
            Phase::Done => None,
            Phase::Failed(error) => Some(Err(error)),
            Phase::Expanding(mut stream) => {
                let item = stream.next().await;
                if matches!(item, Some(Ok(_))) {
                    self.phase = Phase::Expanding(stream);
                }
                item
            },
            Phase::Walking(step) => {
                let cid = *step.cid();
                let block = match self.walker.load(&cid, &self.options.signal).await {
                    Ok(block) => block,
                    Err(error) => return Some(Err(error)),
                };
                let node = match self.walker.decode(&block) {
                    Ok(node) => node,
                    Err(DecodeFailure::Unsupported(error)) => {
                        self.phase = Phase::Failed(error);
                        return Some(Ok(block));
                    },
                    Err(DecodeFailure::Invalid(error)) => return Some(Err(error)),
                };
                self.phase = match advance(step, node) {
                    Ok(Advance::Next(step)) => Phase::Walking(step),
                    Ok(Advance::Terminal(cid, node)) => {
                        debug!("path resolved to {cid}");
                        match self.walker.expand(cid, &node, &self.options) {
                            Ok(Some(stream)) => Phase::Expanding(stream),
                            Ok(None) => Phase::Done,
                            Err(error) => Phase::Failed(error),
                        }
                    },
                    Err(error) => Phase::Failed(error),
                };
                Some(Ok(block))
            },
        }
    }
}

fn advance(step: Step, node: Node) -> Result<Advance, IpldError> {
    let cid = *step.cid();
    let next = match step {
        Step::Resolve { segments, .. } => resolve(&cid, &node, segments)?,
        Step::Shard {
            name,
            bits,
            segments,
            ..
        } => {
            let unixfs = node.unixfs().transpose()?;
            match (node.as_dag_pb(), unixfs) {
                (Some(pb), Some(unixfs)) if unixfs.kind == DataType::HAMTShard => {
                    Some(shard_step(&cid, pb, &unixfs, name, bits, segments)?)
                },
                _ => {
                    return Err(IpldError::MalformedPath(format!(
                        "{cid} is not a HAMT shard"
                    )));
                },
            }
        },
    };
    Ok(match next {
        Some(step) => Advance::Next(step),
        None => Advance::Terminal(cid, node),
    })
}

fn no_link(cid: &Cid, segment: &str) -> IpldError {
    IpldError::MalformedPath(format!("{cid} has no link named {segment}"))
}

/// Resolves the next segment within a loaded node. `None` when the node is the terminal entity.
fn resolve(
    cid: &Cid,
    node: &Node,
    mut segments: VecDeque<String>,
) -> Result<Option<Step>, IpldError> {
    let Some(segment) = segments.pop_front() else {
        return Ok(None);
    };
    match node {
        Node::DagPb(pb) => match node.unixfs().transpose()? {
            Some(unixfs) if unixfs.kind == DataType::HAMTShard => {
                let bits = HashBits::new(&segment)?;
                shard_step(cid, pb, &unixfs, segment, bits, segments).map(Some)
            },
            Some(unixfs) if !unixfs.is_directory() => Err(no_link(cid, &segment)),
            _ => {
                let link = pb
                    .links
                    .iter()
                    .find(|link| link.name.as_deref() == Some(segment.as_str()))
                    .ok_or_else(|| no_link(cid, &segment))?;
                Ok(Some(Step::Resolve {
                    cid: link.cid,
                    segments,
                }))
            },
        },
        Node::Ipld(ipld) => {
            segments.push_front(segment);
            resolve_ipld(cid, ipld, segments)
        },
        Node::Raw(_) => Err(no_link(cid, &segment)),
    }
}

/// Walks map keys and list indexes inside a value, crossing into the next block at a link.
fn resolve_ipld(
    cid: &Cid,
    ipld: &Ipld,
    mut segments: VecDeque<String>,
) -> Result<Option<Step>, IpldError> {
    let mut value = ipld;
    while let Some(segment) = segments.pop_front() {
        let next = match value {
            Ipld::Map(map) => map.get(&segment),
            Ipld::List(list) => segment.parse::<usize>().ok().and_then(|i| list.get(i)),
            _ => None,
        }
        .ok_or_else(|| no_link(cid, &segment))?;
        if let Ipld::Link(target) = next {
            return Ok(Some(Step::Resolve {
                cid: *target,
                segments,
            }));
        }
        value = next;
    }
    Ok(None)
}

fn shard_step(
    cid: &Cid,
    node: &PbNode,
    unixfs: &UnixFs,
    name: String,
    mut bits: HashBits,
    segments: VecDeque<String>,
) -> Result<Step, IpldError> {
    match hamt::lookup(node, unixfs, &name, &mut bits)? {
        ShardLookup::Found(target) => Ok(Step::Resolve {
            cid: target,
            segments,
        }),
        ShardLookup::Descend(shard) => Ok(Step::Shard {
            cid: shard,
            name,
            bits,
            segments,
        }),
        ShardLookup::NotFound => Err(no_link(cid, &name)),
    }
}
