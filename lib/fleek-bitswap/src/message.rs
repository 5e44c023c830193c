//! Typed bitswap 1.2.0 messages on top of the generated protobuf structs.
//!
//! Outgoing wantlists are filled through [`Message::add_wantlist_entry`], which keeps a running
//! size estimate so that a message never grows past its size limit.
use std::borrow::Cow;

use bytes::Bytes;
use cid::Cid;
use quick_protobuf::{BytesReader, MessageRead, MessageWrite, Writer};

use crate::errors::BitswapError;
use crate::prefix::Prefix;
use crate::proto;
pub use crate::proto::mod_Message::mod_Wantlist::WantType;
pub use crate::proto::mod_Message::BlockPresenceType;

pub const MAX_PRIORITY: i32 = i32::MAX;
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024;

const NON_EMPTY_OVERHEAD: usize = 10;
const NEW_ENTRY_OVERHEAD: usize = 10;
const ESTIMATE_MARGIN_PERCENT: usize = 10;

// Bitswap 1.0 blocks carry no prefix, they are always CIDv0.
const LEGACY_PREFIX: Prefix = Prefix {
    version: 0,
    codec: 0x70,
    hash_code: 0x12,
    hash_len: 32,
};

fn encode_proto<M: MessageWrite>(message: &M) -> Result<Vec<u8>, BitswapError> {
    let mut out = Vec::with_capacity(message.get_size());
    message.write_message(&mut Writer::new(&mut out))?;
    Ok(out)
}

fn decode_proto<'a, M: MessageRead<'a>>(bytes: &'a [u8]) -> Result<M, BitswapError> {
    Ok(M::from_reader(&mut BytesReader::from_bytes(bytes), bytes)?)
}

fn clamp_priority(priority: i64) -> i32 {
    priority.clamp(1, MAX_PRIORITY as i64) as i32
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub cid: Cid,
    pub priority: i32,
    pub cancel: bool,
    pub want_type: WantType,
    pub send_dont_have: bool,
}

impl Entry {
    pub fn new(cid: Cid) -> Self {
        Self {
            cid,
            priority: 1,
            cancel: false,
            want_type: WantType::Block,
            send_dont_have: false,
        }
    }

    /// Priorities are kept within `1..=MAX_PRIORITY`.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = clamp_priority(priority);
        self
    }

    pub fn with_cancel(mut self, cancel: bool) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_want_type(mut self, want_type: WantType) -> Self {
        self.want_type = want_type;
        self
    }

    pub fn with_send_dont_have(mut self, send_dont_have: bool) -> Self {
        self.send_dont_have = send_dont_have;
        self
    }

    pub fn encode(&self) -> Result<Vec<u8>, BitswapError> {
        encode_proto(&self.to_proto())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BitswapError> {
        Self::from_proto(decode_proto(bytes)?)
    }

    fn to_proto(&self) -> proto::mod_Message::mod_Wantlist::Entry<'static> {
        proto::mod_Message::mod_Wantlist::Entry {
            block: Cow::Owned(self.cid.to_bytes()),
            priority: self.priority,
            cancel: self.cancel,
            wantType: self.want_type,
            sendDontHave: self.send_dont_have,
        }
    }

    fn from_proto(entry: proto::mod_Message::mod_Wantlist::Entry<'_>) -> Result<Self, BitswapError> {
        Ok(Self {
            cid: Cid::try_from(entry.block.as_ref())?,
            priority: clamp_priority(entry.priority as i64),
            cancel: entry.cancel,
            want_type: entry.wantType,
            send_dont_have: entry.sendDontHave,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Wantlist {
    pub entries: Vec<Entry>,
    pub full: bool,
}

impl Wantlist {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>, BitswapError> {
        encode_proto(&self.to_proto())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BitswapError> {
        Self::from_proto(decode_proto(bytes)?)
    }

    fn to_proto(&self) -> proto::mod_Message::Wantlist<'static> {
        proto::mod_Message::Wantlist {
            entries: self.entries.iter().map(Entry::to_proto).collect(),
            full: self.full,
        }
    }

    fn from_proto(wantlist: proto::mod_Message::Wantlist<'_>) -> Result<Self, BitswapError> {
        Ok(Self {
            entries: wantlist
                .entries
                .into_iter()
                .map(Entry::from_proto)
                .collect::<Result<_, _>>()?,
            full: wantlist.full,
        })
    }
}

/// A block as it travels on the wire: the CID prefix and the raw bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockPayload {
    pub prefix: Prefix,
    pub data: Bytes,
}

impl BlockPayload {
    pub fn new(cid: &Cid, data: impl Into<Bytes>) -> Self {
        Self {
            prefix: Prefix::from(cid),
            data: data.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, BitswapError> {
        encode_proto(&self.to_proto())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BitswapError> {
        Self::from_proto(decode_proto(bytes)?)
    }

    fn to_proto(&self) -> proto::mod_Message::Block<'_> {
        proto::mod_Message::Block {
            prefix: Cow::Owned(self.prefix.to_bytes()),
            data: Cow::Borrowed(self.data.as_ref()),
        }
    }

    fn from_proto(block: proto::mod_Message::Block<'_>) -> Result<Self, BitswapError> {
        Ok(Self {
            prefix: Prefix::from_bytes(&block.prefix)?,
            data: Bytes::copy_from_slice(&block.data),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockPresence {
    pub cid: Cid,
    pub kind: BlockPresenceType,
}

impl BlockPresence {
    pub fn have(cid: Cid) -> Self {
        Self {
            cid,
            kind: BlockPresenceType::Have,
        }
    }

    pub fn dont_have(cid: Cid) -> Self {
        Self {
            cid,
            kind: BlockPresenceType::DontHave,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, BitswapError> {
        encode_proto(&self.to_proto())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BitswapError> {
        Self::from_proto(decode_proto(bytes)?)
    }

    fn to_proto(&self) -> proto::mod_Message::BlockPresence<'static> {
        proto::mod_Message::BlockPresence {
            cid: Cow::Owned(self.cid.to_bytes()),
            type_pb: self.kind,
        }
    }

    fn from_proto(presence: proto::mod_Message::BlockPresence<'_>) -> Result<Self, BitswapError> {
        Ok(Self {
            cid: Cid::try_from(presence.cid.as_ref())?,
            kind: presence.type_pb,
        })
    }
}

/// A bitswap message.
///
/// Equality ignores the size bookkeeping and only compares what goes on the wire.
#[derive(Clone, Debug)]
pub struct Message {
    pub wantlist: Wantlist,
    pub blocks: Vec<BlockPayload>,
    pub block_presences: Vec<BlockPresence>,
    pub pending_bytes: i32,
    estimated_len: usize,
    max_size: usize,
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.wantlist == other.wantlist
            && self.blocks == other.blocks
            && self.block_presences == other.block_presences
            && self.pending_bytes == other.pending_bytes
    }
}

impl Eq for Message {}

impl Message {
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_size(max_size: usize) -> Self {
        let mut message = Self {
            wantlist: Wantlist::default(),
            blocks: Vec::new(),
            block_presences: Vec::new(),
            pending_bytes: 0,
            estimated_len: 0,
            max_size,
        };
        message.estimated_len = message.encoded_len() + NON_EMPTY_OVERHEAD;
        message
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Upper bound for the encoded size of the message, kept up to date by
    /// [`Message::add_wantlist_entry`].
    pub fn estimated_len(&self) -> usize {
        self.estimated_len
    }

    pub fn encoded_len(&self) -> usize {
        self.to_proto().get_size()
    }

    /// Adds a wantlist entry unless the message would risk outgrowing its size limit.
    ///
    /// A rejected entry is handed back and the message is left untouched.
    pub fn add_wantlist_entry(&mut self, entry: Entry) -> Result<(), Entry> {
        let added = NEW_ENTRY_OVERHEAD + entry.cid.encoded_len();
        let projected = (self.estimated_len + added) * (100 + ESTIMATE_MARGIN_PERCENT);
        if projected.div_ceil(100) > self.max_size {
            return Err(entry);
        }
        self.wantlist.entries.push(entry);
        self.estimated_len += added;
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, BitswapError> {
        encode_proto(&self.to_proto())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BitswapError> {
        let message: proto::Message<'_> = decode_proto(bytes)?;
        let mut blocks = message
            .blocks
            .iter()
            .map(|data| BlockPayload {
                prefix: LEGACY_PREFIX,
                data: Bytes::copy_from_slice(data),
            })
            .collect::<Vec<_>>();
        for block in message.payload {
            blocks.push(BlockPayload::from_proto(block)?);
        }

        let mut decoded = Self {
            wantlist: message
                .wantlist
                .map(Wantlist::from_proto)
                .transpose()?
                .unwrap_or_default(),
            blocks,
            block_presences: message
                .blockPresences
                .into_iter()
                .map(BlockPresence::from_proto)
                .collect::<Result<_, _>>()?,
            pending_bytes: message.pendingBytes.max(0),
            estimated_len: 0,
            max_size: DEFAULT_MAX_MESSAGE_SIZE,
        };
        decoded.estimated_len = decoded.encoded_len() + NON_EMPTY_OVERHEAD;
        Ok(decoded)
    }

    fn to_proto(&self) -> proto::Message<'_> {
        proto::Message {
            wantlist: (!self.wantlist.is_empty() || self.wantlist.full)
                .then(|| self.wantlist.to_proto()),
            blocks: Vec::new(),
            payload: self.blocks.iter().map(BlockPayload::to_proto).collect(),
            blockPresences: self
                .block_presences
                .iter()
                .map(BlockPresence::to_proto)
                .collect(),
            pendingBytes: self.pending_bytes.max(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use fleek_ipld::hasher::{Hashers, SHA2_256};
    use pretty_assertions::assert_eq;

    use super::*;

    fn cid(data: &[u8]) -> Cid {
        Cid::new_v1(0x55, Hashers::default().digest(SHA2_256, data, None).unwrap())
    }

    #[test]
    fn test_priority_is_clamped() {
        let c = cid(b"a");
        assert_eq!(Entry::new(c).with_priority(0).priority, 1);
        assert_eq!(Entry::new(c).with_priority(-5).priority, 1);
        assert_eq!(Entry::new(c).with_priority(i64::MAX).priority, MAX_PRIORITY);
        assert_eq!(Entry::new(c).with_priority(7).priority, 7);
    }

    #[test]
    fn test_entry_roundtrip() {
        let entry = Entry::new(cid(b"a"))
            .with_priority(42)
            .with_want_type(WantType::Have)
            .with_send_dont_have(true);
        assert_eq!(Entry::decode(&entry.encode().unwrap()).unwrap(), entry);
    }

    #[test]
    fn test_parts_roundtrip() {
        let wantlist = Wantlist {
            entries: vec![Entry::new(cid(b"a")), Entry::new(cid(b"b")).with_cancel(true)],
            full: true,
        };
        assert_eq!(Wantlist::decode(&wantlist.encode().unwrap()).unwrap(), wantlist);

        let block = BlockPayload::new(&cid(b"a"), Bytes::from_static(b"a"));
        assert_eq!(BlockPayload::decode(&block.encode().unwrap()).unwrap(), block);

        let presence = BlockPresence::dont_have(cid(b"b"));
        assert_eq!(BlockPresence::decode(&presence.encode().unwrap()).unwrap(), presence);
    }

    #[test]
    fn test_message_roundtrip() {
        let empty = Message::new();
        assert!(empty.encode().unwrap().is_empty());
        assert_eq!(Message::decode(&[]).unwrap(), empty);

        let mut message = Message::new();
        message
            .add_wantlist_entry(Entry::new(cid(b"a")).with_send_dont_have(true))
            .unwrap();
        message
            .blocks
            .push(BlockPayload::new(&cid(b"b"), Bytes::from_static(b"b")));
        message.block_presences.push(BlockPresence::have(cid(b"c")));
        message.block_presences.push(BlockPresence::dont_have(cid(b"d")));
        message.pending_bytes = 1024;
        assert_eq!(Message::decode(&message.encode().unwrap()).unwrap(), message);
    }

    #[test]
    fn test_full_message_stays_under_limit() {
        let mut message = Message::new();
        let mut count = 0u32;
        while message
            .add_wantlist_entry(Entry::new(cid(&count.to_be_bytes())).with_send_dont_have(true))
            .is_ok()
        {
            count += 1;
        }
        assert!(count > 100);
        let encoded = message.encode().unwrap();
        assert!(encoded.len() <= DEFAULT_MAX_MESSAGE_SIZE);
        assert!(encoded.len() <= message.estimated_len());
        let decoded = Message::decode(&encoded).unwrap();
        assert_eq!(decoded.wantlist.entries.len(), count as usize);
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_rejected_entry_leaves_message_untouched() {
        let mut message = Message::with_max_size(100);
        message.add_wantlist_entry(Entry::new(cid(b"a"))).unwrap();
        let before = message.clone();
        let estimate = message.estimated_len();

        let rejected = message.add_wantlist_entry(Entry::new(cid(b"b"))).unwrap_err();
        assert_eq!(rejected.cid, cid(b"b"));
        assert_eq!(message, before);
        assert_eq!(message.estimated_len(), estimate);
    }

    #[test]
    fn test_unknown_enum_values_are_normalized() {
        let c = cid(b"a");
        let cid_bytes = c.to_bytes();
        let mut entry = vec![0x0a, cid_bytes.len() as u8];
        entry.extend_from_slice(&cid_bytes);
        entry.extend_from_slice(&[0x20, 0x07]);
        let decoded = Entry::decode(&entry).unwrap();
        assert_eq!(decoded.want_type, WantType::Block);
        assert_eq!(decoded.priority, 1);

        let mut presence = vec![0x0a, cid_bytes.len() as u8];
        presence.extend_from_slice(&cid_bytes);
        presence.extend_from_slice(&[0x10, 0x05]);
        assert_eq!(
            BlockPresence::decode(&presence).unwrap().kind,
            BlockPresenceType::Have
        );
    }

    #[test]
    fn test_negative_pending_bytes() {
        // field 5, varint -1
        let bytes = [0x28, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        assert_eq!(Message::decode(&bytes).unwrap().pending_bytes, 0);
    }

    #[test]
    fn test_legacy_blocks() {
        // field 2, raw block bytes
        let bytes = [0x12, 0x03, b'a', b'b', b'c'];
        let message = Message::decode(&bytes).unwrap();
        assert_eq!(message.blocks.len(), 1);
        assert_eq!(message.blocks[0].prefix, LEGACY_PREFIX);
        assert_eq!(message.blocks[0].data.as_ref(), b"abc");
    }
}
