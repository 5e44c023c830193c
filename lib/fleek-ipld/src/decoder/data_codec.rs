//! Block decoders, keyed by multicodec code.
//!
//! A traversal only follows links out of blocks it can decode. Blocks whose codec has no entry in
//! the [`Decoders`] table are still handed to the caller, after which the traversal fails.
//!
//! On any doubts or question please refer to the [IPLD Spec](https://ipld.io/specs/about/).
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use ipld_core::cid::Cid;
use ipld_core::ipld::Ipld;
use ipld_dagpb::PbNode;

use super::fs::Node;
use crate::errors::IpldError;

pub const RAW: u64 = 0x55;
pub const DAG_PB: u64 = 0x70;
pub const DAG_CBOR: u64 = 0x71;
pub const DAG_JSON: u64 = 0x0129;

pub trait BlockDecoder: Send + Sync {
    fn code(&self) -> u64;

    fn decode(&self, cid: &Cid, bytes: &Bytes) -> Result<Node, IpldError>;
}

pub struct RawDecoder;

impl BlockDecoder for RawDecoder {
    fn code(&self) -> u64 {
        RAW
    }

    fn decode(&self, _cid: &Cid, bytes: &Bytes) -> Result<Node, IpldError> {
        Ok(Node::Raw(bytes.clone()))
    }
}

pub struct DagPbDecoder;

impl BlockDecoder for DagPbDecoder {
    fn code(&self) -> u64 {
        DAG_PB
    }

    fn decode(&self, _cid: &Cid, bytes: &Bytes) -> Result<Node, IpldError> {
        Ok(Node::DagPb(PbNode::from_bytes(bytes.clone())?))
    }
}

pub struct DagCborDecoder;

impl BlockDecoder for DagCborDecoder {
    fn code(&self) -> u64 {
        DAG_CBOR
    }

    fn decode(&self, cid: &Cid, bytes: &Bytes) -> Result<Node, IpldError> {
        serde_ipld_dagcbor::from_slice::<Ipld>(bytes)
            .map(Node::Ipld)
            .map_err(|e| IpldError::IpldCodecError(*cid, e.to_string()))
    }
}

pub struct DagJsonDecoder;

impl BlockDecoder for DagJsonDecoder {
    fn code(&self) -> u64 {
        DAG_JSON
    }

    fn decode(&self, cid: &Cid, bytes: &Bytes) -> Result<Node, IpldError> {
        serde_ipld_dagjson::from_slice::<Ipld>(bytes)
            .map(Node::Ipld)
            .map_err(|e| IpldError::IpldCodecError(*cid, e.to_string()))
    }
}

#[derive(Clone)]
pub struct Decoders {
    inner: Arc<HashMap<u64, Arc<dyn BlockDecoder>>>,
}

impl Default for Decoders {
    fn default() -> Self {
        Self::empty()
            .with(RawDecoder)
            .with(DagPbDecoder)
            .with(DagCborDecoder)
            .with(DagJsonDecoder)
    }
}

impl fmt::Debug for Decoders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes = self.inner.keys().collect::<Vec<_>>();
        codes.sort();
        f.debug_struct("Decoders").field("codes", &codes).finish()
    }
}

impl Decoders {
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(HashMap::new()),
        }
    }

    pub fn with(mut self, decoder: impl BlockDecoder + 'static) -> Self {
        Arc::make_mut(&mut self.inner).insert(decoder.code(), Arc::new(decoder));
        self
    }

    pub fn supports(&self, code: u64) -> bool {
        self.inner.contains_key(&code)
    }

    pub fn decode(&self, cid: &Cid, bytes: &Bytes) -> Result<Node, IpldError> {
        self.inner
            .get(&cid.codec())
            .ok_or(IpldError::UnknownCodec(*cid, cid.codec()))?
            .decode(cid, bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::block::Block;

    #[test]
    fn test_decode_dag_cbor() {
        let value = Ipld::Map(BTreeMap::from([(
            "hello".to_string(),
            Ipld::String("world".to_string()),
        )]));
        let bytes = serde_ipld_dagcbor::to_vec(&value).unwrap();
        let block = Block::encode(DAG_CBOR, bytes).unwrap();
        let node = Decoders::default()
            .decode(block.cid(), block.bytes())
            .unwrap();
        assert_eq!(node, Node::Ipld(value));
    }

    #[test]
    fn test_decode_dag_json() {
        let block = Block::encode(DAG_JSON, &br#"{"n":1}"#[..]).unwrap();
        let node = Decoders::default()
            .decode(block.cid(), block.bytes())
            .unwrap();
        assert_eq!(
            node,
            Node::Ipld(Ipld::Map(BTreeMap::from([(
                "n".to_string(),
                Ipld::Integer(1)
            )])))
        );
    }

    #[test]
    fn test_unknown_codec() {
        let block = Block::encode(0x300001, &b"?"[..]).unwrap();
        let result = Decoders::default().decode(block.cid(), block.bytes());
        assert!(matches!(result, Err(IpldError::UnknownCodec(_, 0x300001))));
    }

    #[test]
    fn test_invalid_dag_cbor() {
        let block = Block::encode(DAG_CBOR, vec![0xffu8, 0xff]).unwrap();
        let result = Decoders::default().decode(block.cid(), block.bytes());
        assert!(matches!(result, Err(IpldError::IpldCodecError(..))));
    }
}
