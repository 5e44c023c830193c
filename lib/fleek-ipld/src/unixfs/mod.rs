//! UnixFS metadata carried in the `Data` field of DAG-PB nodes.
pub mod hamt;
mod proto;

use std::borrow::Cow;

use bytes::Bytes;
use ipld_dagpb::PbNode;
pub use proto::mod_Data::DataType;
pub use proto::Data;
use quick_protobuf::{BytesReader, MessageRead, MessageWrite, Writer};

use crate::errors::IpldError;

impl<'a> TryFrom<&'a [u8]> for Data<'a> {
    type Error = IpldError;

    fn try_from(data: &'a [u8]) -> Result<Self, Self::Error> {
        Data::from_reader(&mut BytesReader::from_bytes(data), data).map_err(Into::into)
    }
}

/// Owned view over a UnixFS `Data` message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnixFs {
    pub kind: DataType,
    pub data: Bytes,
    pub filesize: Option<u64>,
    pub blocksizes: Vec<u64>,
    pub hash_type: Option<u64>,
    pub fanout: Option<u64>,
}

impl UnixFs {
    pub fn file(data: impl Into<Bytes>, blocksizes: Vec<u64>) -> Self {
        let data = data.into();
        let filesize = content_size(&data, &blocksizes);
        Self {
            kind: DataType::File,
            data,
            filesize,
            blocksizes,
            ..Default::default()
        }
    }

    pub fn directory() -> Self {
        Self {
            kind: DataType::Directory,
            ..Default::default()
        }
    }

    pub fn hamt_shard(fanout: u64) -> Self {
        Self {
            kind: DataType::HAMTShard,
            hash_type: Some(hamt::HAMT_HASH_FUNCTION),
            fanout: Some(fanout),
            ..Default::default()
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, IpldError> {
        let data = Data::try_from(bytes)?;
        Ok(Self {
            kind: data.Type,
            data: data
                .Data
                .map(|data| Bytes::copy_from_slice(&data))
                .unwrap_or_default(),
            filesize: data.filesize,
            blocksizes: data.blocksizes,
            hash_type: data.hashType,
            fanout: data.fanout,
        })
    }

    /// Reads the UnixFS metadata of a DAG-PB node, `None` when the node carries no data.
    pub fn from_node(node: &PbNode) -> Option<Result<Self, IpldError>> {
        node.data.as_deref().map(Self::decode)
    }

    pub fn encode(&self) -> Result<Vec<u8>, IpldError> {
        let data = Data {
            Type: self.kind,
            Data: (!self.data.is_empty()).then(|| Cow::Borrowed(self.data.as_ref())),
            filesize: self.filesize,
            blocksizes: self.blocksizes.clone(),
            hashType: self.hash_type,
            fanout: self.fanout,
        };
        let mut out = Vec::with_capacity(data.get_size());
        data.write_message(&mut Writer::new(&mut out))?;
        Ok(out)
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, DataType::Directory | DataType::HAMTShard)
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, DataType::File | DataType::Raw)
    }

    /// Size of the file content addressed by this node, or `None` when no `filesize` is
    /// recorded and the chunk sizes overflow.
    pub fn size(&self) -> Option<u64> {
        self.filesize.or_else(|| content_size(&self.data, &self.blocksizes))
    }
}

fn content_size(data: &Bytes, blocksizes: &[u64]) -> Option<u64> {
    blocksizes
        .iter()
        .try_fold(data.len() as u64, |total, size| total.checked_add(*size))
}
