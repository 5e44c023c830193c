use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use unsigned_varint::{decode, encode};

use crate::errors::BitswapError;
use crate::message::Message;

/// Frames messages with an unsigned varint length prefix.
#[derive(Clone, Debug)]
pub struct MessageCodec {
    max_frame_size: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(4 * 1024 * 1024)
    }
}

impl MessageCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = BitswapError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let (len, header) = match decode::usize(&src[..]) {
            Ok((len, rest)) => (len, src.len() - rest.len()),
            Err(decode::Error::Insufficient) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if len > self.max_frame_size {
            return Err(BitswapError::FrameTooLarge(len, self.max_frame_size));
        }
        if src.len() < header + len {
            src.reserve(header + len - src.len());
            return Ok(None);
        }
        src.advance(header);
        let frame = src.split_to(len);
        Message::decode(&frame).map(Some)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = BitswapError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = item.encode()?;
        if bytes.len() > self.max_frame_size {
            return Err(BitswapError::FrameTooLarge(bytes.len(), self.max_frame_size));
        }
        let mut buf = encode::usize_buffer();
        let header = encode::usize(bytes.len(), &mut buf);
        dst.reserve(header.len() + bytes.len());
        dst.extend_from_slice(header);
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cid::Cid;
    use fleek_ipld::hasher::{Hashers, SHA2_256};

    use super::*;
    use crate::message::{BlockPresence, Entry};

    fn message() -> Message {
        let cid = Cid::new_v1(0x55, Hashers::default().digest(SHA2_256, b"a", None).unwrap());
        let mut message = Message::new();
        message.add_wantlist_entry(Entry::new(cid)).unwrap();
        message.block_presences.push(BlockPresence::dont_have(cid));
        message
    }

    #[test]
    fn test_partial_frames() {
        let mut codec = MessageCodec::default();
        let mut encoded = BytesMut::new();
        codec.encode(message(), &mut encoded).unwrap();
        codec.encode(message(), &mut encoded).unwrap();

        let mut src = BytesMut::new();
        let mut decoded = Vec::new();
        for byte in encoded.iter() {
            src.extend_from_slice(&[*byte]);
            if let Some(message) = codec.decode(&mut src).unwrap() {
                decoded.push(message);
            }
        }
        assert_eq!(decoded, vec![message(), message()]);
        assert!(src.is_empty());
    }

    #[test]
    fn test_frame_too_large() {
        let mut codec = MessageCodec::new(16);
        let mut src = BytesMut::from(&[0x80, 0x01][..]);
        assert!(matches!(
            codec.decode(&mut src),
            Err(BitswapError::FrameTooLarge(128, 16))
        ));
        assert!(matches!(
            codec.encode(message(), &mut BytesMut::new()),
            Err(BitswapError::FrameTooLarge(_, 16))
        ));
    }
}
