pub mod data_codec;
pub mod fs;

pub use data_codec::{BlockDecoder, Decoders, DAG_CBOR, DAG_JSON, DAG_PB, RAW};
pub use fs::{Link, Node};
