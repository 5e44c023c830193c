use ipld_core::cid::Cid;
use thiserror::Error;

/// Error type for IPLD operations
#[derive(Debug, Error)]
pub enum IpldError {
    #[error("IPLD error: Error parsing Cid {0}")]
    CidParsingError(#[from] ipld_core::cid::Error),

    #[error("IPLD error: Invalid multihash {0}")]
    InvalidMultihash(String),

    #[error("IPLD error: Error decoding IPLD format - Cid {0} - {1}")]
    IpldCodecError(Cid, String),

    #[error("IPLD error: Error Decoding DAG-PB data {0}")]
    DagPbError(#[from] ipld_dagpb::Error),

    #[error("IPLD error: UnixFS error {0}")]
    UnixFsProtobufError(#[from] quick_protobuf::Error),

    #[error("IPLD error: Error processing UnixFS - Cid {0}")]
    UnsupportedUnixFsDataType(Cid),

    #[error("IPLD error: Peer does not have - Cid {0}")]
    DontHave(Cid),

    #[error("IPLD error: Unknown codec 0x{1:x} - Cid {0}")]
    UnknownCodec(Cid, u64),

    #[error("IPLD error: Unknown multihash code 0x{0:x}")]
    UnknownMultihash(u64),

    #[error("IPLD error: Error validating hash - Cid {0}")]
    MultihashError(Cid),

    #[error("IPLD error: Operation aborted: {0}")]
    Aborted(String),

    #[error("IPLD error: Malformed path {0}")]
    MalformedPath(String),

    #[error("IPLD error: Protocol error {0}")]
    ProtocolError(String),
}

impl IpldError {
    /// Returns `true` when the error was caused by a cancelled signal.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}
