//! Decoded block values and the links they carry.
use bytes::Bytes;
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use ipld_dagpb::{PbLink, PbNode};

use crate::errors::IpldError;
use crate::unixfs::UnixFs;

/// A link to another IPLD node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    cid: Cid,
    name: Option<String>,
    size: Option<u64>,
}

impl From<Cid> for Link {
    fn from(cid: Cid) -> Self {
        Self::new(cid, None, None)
    }
}

impl From<&PbLink> for Link {
    fn from(link: &PbLink) -> Self {
        Link::new(link.cid, link.name.clone(), link.size)
    }
}

impl Link {
    pub fn new(cid: Cid, name: Option<String>, size: Option<u64>) -> Self {
        Self { cid, name, size }
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn name(&self) -> &Option<String> {
        &self.name
    }

    pub fn size(&self) -> &Option<u64> {
        &self.size
    }

    pub fn get_links(links: &[PbLink]) -> Vec<Link> {
        links.iter().map(Into::into).collect()
    }
}

/// A block decoded with the codec named by its CID.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Raw(Bytes),
    DagPb(PbNode),
    Ipld(Ipld),
}

impl Node {
    /// Every link of the node, in encoding order.
    ///
    /// Links found inside IPLD values are named by their path within the value, e.g. `a/0/b`.
    /// Map entries follow DAG-CBOR key order: shorter keys first, then bytewise.
    pub fn links(&self) -> Vec<Link> {
        match self {
            Node::Raw(_) => Vec::new(),
            Node::DagPb(node) => Link::get_links(&node.links),
            Node::Ipld(ipld) => {
                let mut links = Vec::new();
                collect_links(ipld, String::new(), &mut links);
                links
            },
        }
    }

    pub fn as_dag_pb(&self) -> Option<&PbNode> {
        match self {
            Node::DagPb(node) => Some(node),
            _ => None,
        }
    }

    /// UnixFS metadata, for DAG-PB nodes that carry any.
    pub fn unixfs(&self) -> Option<Result<UnixFs, IpldError>> {
        self.as_dag_pb().and_then(UnixFs::from_node)
    }
}

fn collect_links(ipld: &Ipld, path: String, links: &mut Vec<Link>) {
    let join = |segment: &dyn std::fmt::Display| {
        if path.is_empty() {
            segment.to_string()
        } else {
            format!("{path}/{segment}")
        }
    };
    match ipld {
        Ipld::Link(cid) => {
            let name = (!path.is_empty()).then(|| path.clone());
            links.push(Link::new(*cid, name, None));
        },
        Ipld::List(list) => {
            for (index, item) in list.iter().enumerate() {
                collect_links(item, join(&index), links);
            }
        },
        Ipld::Map(map) => {
            let mut entries = map.iter().collect::<Vec<_>>();
            entries.sort_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
            for (key, value) in entries {
                collect_links(value, join(key), links);
            }
        },
        _ => {},
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::block::Block;

    #[test]
    fn test_ipld_links_are_named_by_path() {
        let a = *Block::encode(0x55, &b"a"[..]).unwrap().cid();
        let b = *Block::encode(0x55, &b"b"[..]).unwrap().cid();
        let node = Node::Ipld(Ipld::Map(BTreeMap::from([
            ("x".to_string(), Ipld::Link(a)),
            (
                "y".to_string(),
                Ipld::List(vec![Ipld::Integer(1), Ipld::Link(b)]),
            ),
        ])));
        assert_eq!(
            node.links(),
            vec![
                Link::new(a, Some("x".to_string()), None),
                Link::new(b, Some("y/1".to_string()), None),
            ]
        );
    }

    #[test]
    fn test_ipld_map_links_follow_cbor_key_order() {
        let cids = (0u8..3)
            .map(|i| *Block::encode(0x55, vec![i]).unwrap().cid())
            .collect::<Vec<_>>();
        let node = Node::Ipld(Ipld::Map(BTreeMap::from([
            ("aa".to_string(), Ipld::Link(cids[0])),
            ("b".to_string(), Ipld::Link(cids[1])),
            ("ab".to_string(), Ipld::Link(cids[2])),
        ])));
        let names = node
            .links()
            .into_iter()
            .map(|link| link.name().clone().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["b", "aa", "ab"]);
    }

    #[test]
    fn test_raw_has_no_links() {
        assert!(Node::Raw(Bytes::from_static(b"abc")).links().is_empty());
    }
}
