//! Name lookup inside UnixFS HAMT sharded directories.
use std::io::Cursor;

use ipld_core::cid::Cid;
use ipld_dagpb::PbNode;

use super::UnixFs;
use crate::errors::IpldError;
use crate::range::hamt_pad_width;

/// murmur3-x64-64, the only hash function sharded directories are built with.
pub const HAMT_HASH_FUNCTION: u64 = 0x22;

/// Hashes an entry name into the bits that pick its bucket at every level.
pub fn hash_name(name: &str) -> Result<[u8; 8], IpldError> {
    let hash = murmur3::murmur3_x64_128(&mut Cursor::new(name.as_bytes()), 0)
        .map_err(|e| IpldError::MalformedPath(e.to_string()))?;
    // The low half of the 128-bit result is the 64-bit variant.
    Ok((hash as u64).to_be_bytes())
}

/// Consumes a name hash most significant bit first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashBits {
    hash: [u8; 8],
    consumed: u32,
}

impl HashBits {
    pub fn new(name: &str) -> Result<Self, IpldError> {
        Ok(Self {
            hash: hash_name(name)?,
            consumed: 0,
        })
    }

    /// Takes the next `count` bits, or `None` when the hash is exhausted.
    pub fn next(&mut self, count: u32) -> Option<u64> {
        if count == 0 || self.consumed + count > 64 {
            return None;
        }
        let value = u64::from_be_bytes(self.hash);
        let bits = (value << self.consumed) >> (64 - count);
        self.consumed += count;
        Some(bits)
    }
}

/// Result of looking a name up in one shard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShardLookup {
    /// The entry itself.
    Found(Cid),
    /// The bucket holds a nested shard that has to be loaded next.
    Descend(Cid),
    NotFound,
}

/// Looks `name` up in a loaded shard node, consuming the next level of `bits`.
pub fn lookup(
    node: &PbNode,
    unixfs: &UnixFs,
    name: &str,
    bits: &mut HashBits,
) -> Result<ShardLookup, IpldError> {
    let fanout = unixfs
        .fanout
        .filter(|fanout| fanout.is_power_of_two() && *fanout > 1)
        .ok_or_else(|| IpldError::MalformedPath(format!("invalid HAMT fanout {:?}", unixfs.fanout)))?;
    if let Some(hash_type) = unixfs.hash_type {
        if hash_type != HAMT_HASH_FUNCTION {
            return Err(IpldError::UnknownMultihash(hash_type));
        }
    }

    let pad = hamt_pad_width(fanout);
    let index = bits
        .next(fanout.trailing_zeros())
        .ok_or_else(|| IpldError::MalformedPath(format!("HAMT too deep looking up {name}")))?;
    let prefix = format!("{index:0pad$X}");

    for link in &node.links {
        let Some(link_name) = link.name.as_deref() else {
            continue;
        };
        let Some(rest) = link_name.strip_prefix(&prefix) else {
            continue;
        };
        if rest.is_empty() {
            return Ok(ShardLookup::Descend(link.cid));
        }
        if rest == name {
            return Ok(ShardLookup::Found(link.cid));
        }
    }
    Ok(ShardLookup::NotFound)
}
