//! Verified traversal of IPLD DAGs over untrusted block sources.
//!
//! Blocks are fetched from a [`BlockSource`], checked against their CID, decoded, and streamed
//! back in depth first (or arrival) order while their links are followed.
pub mod block;
pub mod decoder;
pub mod errors;
pub mod hasher;
pub mod range;
pub mod signal;
pub mod unixfs;
pub mod walker;

#[cfg(test)]
mod test_utils;

pub use block::{Block, BlockSource, BlockStat, ByteStream};
pub use errors::IpldError;
pub use signal::AbortSignal;
pub use walker::{DagScope, DagWalker, GetOptions, LinkFilter, Order, PathOptions, UnixFsEntry};
