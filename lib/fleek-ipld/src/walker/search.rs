//! Traversal orders and link filters.
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ipld_core::cid::Cid;

use crate::decoder::{Link, RAW};
use crate::errors::IpldError;
use crate::range::AbsoluteRange;

/// A CID to visit, with the byte range of its content that is still wanted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphSelector {
    cid: Cid,
    range: Option<AbsoluteRange>,
}

impl GraphSelector {
    pub fn new(cid: Cid, range: Option<AbsoluteRange>) -> Self {
        Self { cid, range }
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn range(&self) -> Option<&AbsoluteRange> {
        self.range.as_ref()
    }
}

impl From<Cid> for GraphSelector {
    fn from(cid: Cid) -> Self {
        Self::new(cid, None)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Order {
    /// Blocks are yielded in depth first order.
    #[default]
    DepthFirst,
    /// Every block of a round is requested at once and yielded as it arrives.
    Unordered,
}

impl FromStr for Order {
    type Err = IpldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dfs" => Ok(Order::DepthFirst),
            "unk" => Ok(Order::Unordered),
            _ => Err(IpldError::MalformedPath(format!("unknown order {s}"))),
        }
    }
}

/// Picks the batch of CIDs to fetch next out of the links found in the previous batch.
#[derive(Debug)]
pub(crate) enum Search {
    DepthFirst(VecDeque<GraphSelector>),
    Unordered,
}

impl Search {
    pub fn new(order: Order) -> Self {
        match order {
            Order::DepthFirst => Search::DepthFirst(VecDeque::new()),
            Order::Unordered => Search::Unordered,
        }
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self, Search::DepthFirst(_))
    }

    /// Depth first pushes `links` in front of the pending queue, then takes a run of raw leaves
    /// up to and including the first block that may have children of its own.
    pub fn next(&mut self, links: Vec<GraphSelector>) -> Vec<GraphSelector> {
        match self {
            Search::Unordered => links,
            Search::DepthFirst(queue) => {
                for link in links.into_iter().rev() {
                    queue.push_front(link);
                }
                let mut next = Vec::new();
                while let Some(selector) = queue.pop_front() {
                    let leaf = selector.cid().codec() == RAW;
                    next.push(selector);
                    if !leaf {
                        break;
                    }
                }
                next
            },
        }
    }
}

/// Custom link predicate for [`LinkFilter::Custom`].
pub trait LinkPredicate: Send + Sync {
    fn accepts(&self, link: &Link) -> bool;
}

impl<F> LinkPredicate for F
where
    F: Fn(&Link) -> bool + Send + Sync,
{
    fn accepts(&self, link: &Link) -> bool {
        self(link)
    }
}

/// Decides which links of a decoded block a traversal follows.
#[derive(Clone, Default)]
pub enum LinkFilter {
    #[default]
    All,
    /// Only links whose name is exactly this many bytes long, which in a HAMT shard selects the
    /// nested shards and skips the entries.
    NameLength(usize),
    Custom(Arc<dyn LinkPredicate>),
}

impl fmt::Debug for LinkFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkFilter::All => write!(f, "All"),
            LinkFilter::NameLength(len) => write!(f, "NameLength({len})"),
            LinkFilter::Custom(_) => write!(f, "Custom"),
        }
    }
}

impl LinkFilter {
    pub fn custom(predicate: impl LinkPredicate + 'static) -> Self {
        LinkFilter::Custom(Arc::new(predicate))
    }

    pub fn accepts(&self, link: &Link) -> bool {
        match self {
            LinkFilter::All => true,
            LinkFilter::NameLength(len) => link.name().as_ref().is_some_and(|n| n.len() == *len),
            LinkFilter::Custom(predicate) => predicate.accepts(link),
        }
    }
}
