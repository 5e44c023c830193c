//! DAG builders shared by the traversal tests.
use std::collections::BTreeMap;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use ipld_core::cid::Cid;
use ipld_dagpb::{PbLink, PbNode};

use crate::block::Block;
use crate::decoder::{DAG_PB, RAW};
use crate::errors::IpldError;
use crate::range::hamt_pad_width;
use crate::unixfs::hamt::HashBits;
use crate::unixfs::UnixFs;

pub fn raw(bytes: &[u8]) -> Block {
    Block::encode(RAW, bytes.to_vec()).unwrap()
}

pub fn pb_link(name: Option<&str>, block: &Block) -> PbLink {
    PbLink {
        cid: *block.cid(),
        name: name.map(ToString::to_string),
        size: Some(block.bytes().len() as u64),
    }
}

pub fn dag_pb(unixfs: UnixFs, links: Vec<PbLink>) -> Block {
    let node = PbNode {
        links,
        data: Some(unixfs.encode().unwrap().into()),
    };
    Block::encode(DAG_PB, node.into_bytes()).unwrap()
}

/// A chunked file over `chunks`, each chunk a raw block.
pub fn file(chunks: &[&Block]) -> Block {
    let sizes = chunks.iter().map(|c| c.bytes().len() as u64).collect();
    let links = chunks.iter().map(|c| pb_link(None, c)).collect();
    dag_pb(UnixFs::file(Bytes::new(), sizes), links)
}

pub fn directory(entries: &[(&str, &Block)]) -> Block {
    let links = entries
        .iter()
        .map(|(name, block)| pb_link(Some(name), block))
        .collect();
    dag_pb(UnixFs::directory(), links)
}

/// Builds a HAMT sharded directory, pushing every shard it creates into `shards` (root last).
pub fn hamt(fanout: u64, entries: Vec<(String, Block)>, shards: &mut Vec<Block>) -> Block {
    build_hamt(fanout, entries, 0, shards)
}

fn build_hamt(
    fanout: u64,
    entries: Vec<(String, Block)>,
    depth: u32,
    shards: &mut Vec<Block>,
) -> Block {
    let width = fanout.trailing_zeros();
    let pad = hamt_pad_width(fanout);
    let mut buckets = BTreeMap::<u64, Vec<(String, Block)>>::new();
    for (name, block) in entries {
        let mut bits = HashBits::new(&name).unwrap();
        for _ in 0..depth {
            bits.next(width).unwrap();
        }
        let index = bits.next(width).unwrap();
        buckets.entry(index).or_default().push((name, block));
    }

    let mut links = Vec::new();
    for (index, mut bucket) in buckets {
        if bucket.len() == 1 {
            let (name, block) = bucket.remove(0);
            links.push(pb_link(Some(&format!("{index:0pad$X}{name}")), &block));
        } else {
            let shard = build_hamt(fanout, bucket, depth + 1, shards);
            links.push(pb_link(Some(&format!("{index:0pad$X}")), &shard));
        }
    }
    let shard = dag_pb(UnixFs::hamt_shard(fanout), links);
    shards.push(shard.clone());
    shard
}

pub async fn collect_cids(
    stream: impl Stream<Item = Result<Block, IpldError>>,
) -> (Vec<Cid>, Option<IpldError>) {
    let mut stream = Box::pin(stream);
    let mut cids = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(block) => cids.push(*block.cid()),
            Err(e) => return (cids, Some(e)),
        }
    }
    (cids, None)
}
