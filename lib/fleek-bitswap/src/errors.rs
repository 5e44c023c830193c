use fleek_ipld::IpldError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BitswapError {
    #[error("Bitswap error: Malformed protobuf {0}")]
    Protobuf(#[from] quick_protobuf::Error),

    #[error("Bitswap error: Malformed varint {0}")]
    Varint(#[from] unsigned_varint::decode::Error),

    #[error("Bitswap error: Invalid Cid {0}")]
    Cid(#[from] cid::Error),

    #[error("Bitswap error: Frame of {0} bytes exceeds the limit of {1} bytes")]
    FrameTooLarge(usize, usize),

    #[error("Bitswap error: IO {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ipld(#[from] IpldError),
}

impl From<BitswapError> for IpldError {
    fn from(error: BitswapError) -> Self {
        match error {
            BitswapError::Ipld(error) => error,
            error => IpldError::ProtocolError(error.to_string()),
        }
    }
}
