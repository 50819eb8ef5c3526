//! Link channel messages: discovery, matching and data
//!
//! Every message starts with a `LinkHeader`; the header type selects the
//! body layout.

use bytes::{Buf, BufMut};
use catbus_core::{
    content_hash, CatbusError, CatbusResult, KeyHash, LinkHash, Origin, LINK_QUERY_LEN,
};

use crate::{ensure_remaining, DataItem, LinkHeader, LinkMsgType, LINK_HEADER_SIZE};

/// Encoded size of a tag query
pub const TAG_QUERY_SIZE: usize = 4 * LINK_QUERY_LEN;

/// Encoded size of a link definition
pub const LINK_DEF_SIZE: usize = 4 + 4 + TAG_QUERY_SIZE + 1 + 1 + 2;

/// Direction of a link
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LinkMode {
    /// Push the local source key to remote consumers
    Send = 0,
    /// Pull the source key from remote producers into the local dest key
    Recv = 1,
}

impl LinkMode {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(LinkMode::Send),
            1 => Some(LinkMode::Recv),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// How a leader combines contributions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Aggregation {
    Any = 0,
    Min = 1,
    Max = 2,
    Sum = 3,
    Avg = 4,
}

impl Aggregation {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Aggregation::Any),
            1 => Some(Aggregation::Min),
            2 => Some(Aggregation::Max),
            3 => Some(Aggregation::Sum),
            4 => Some(Aggregation::Avg),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Fixed-size tag filter; unused slots are `KeyHash::NONE`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TagQuery(pub [KeyHash; LINK_QUERY_LEN]);

impl TagQuery {
    /// Build from tag names, sorted so that tag order does not change the link hash.
    /// Extra tags beyond the query length are dropped.
    pub fn from_tags<S: AsRef<str>>(tags: &[S]) -> Self {
        let mut hashes: Vec<KeyHash> = tags
            .iter()
            .map(|t| KeyHash::from_name(t.as_ref()))
            .filter(|h| !h.is_none())
            .collect();
        hashes.sort();
        hashes.dedup();

        let mut query = [KeyHash::NONE; LINK_QUERY_LEN];
        for (slot, hash) in query.iter_mut().zip(hashes) {
            *slot = hash;
        }
        TagQuery(query)
    }

    /// Non-empty tag hashes
    pub fn tags(&self) -> impl Iterator<Item = KeyHash> + '_ {
        self.0.iter().copied().filter(|h| !h.is_none())
    }

    fn decode(buf: &mut impl Buf) -> CatbusResult<Self> {
        ensure_remaining(&*buf, TAG_QUERY_SIZE)?;
        let mut query = [KeyHash::NONE; LINK_QUERY_LEN];
        for slot in query.iter_mut() {
            *slot = KeyHash::new(buf.get_u32_le());
        }
        Ok(TagQuery(query))
    }

    fn encode(&self, buf: &mut impl BufMut) {
        for hash in &self.0 {
            buf.put_u32_le(hash.0);
        }
    }
}

/// Replication contract as exchanged by LinkAdd and hashed into the Team group
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkDef {
    pub source: KeyHash,
    pub dest: KeyHash,
    pub query: TagQuery,
    pub mode: LinkMode,
    pub aggregation: Aggregation,
    /// Milliseconds
    pub rate: u16,
}

impl LinkDef {
    /// Content hash of the definition; identical configs hash identically
    pub fn link_hash(&self) -> LinkHash {
        let mut buf = Vec::with_capacity(LINK_DEF_SIZE);
        self.encode(&mut buf);
        LinkHash::new(content_hash(&buf))
    }

    pub fn decode(buf: &mut impl Buf) -> CatbusResult<Self> {
        ensure_remaining(&*buf, LINK_DEF_SIZE)?;
        let source = KeyHash::new(buf.get_u32_le());
        let dest = KeyHash::new(buf.get_u32_le());
        let query = TagQuery::decode(buf)?;
        let mode = decode_mode(buf.get_u8())?;
        let raw_agg = buf.get_u8();
        let aggregation = Aggregation::from_byte(raw_agg)
            .ok_or_else(|| CatbusError::InvalidWireFormat(format!("Unknown aggregation {}", raw_agg)))?;
        let rate = buf.get_u16_le();

        Ok(LinkDef {
            source,
            dest,
            query,
            mode,
            aggregation,
            rate,
        })
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.source.0);
        buf.put_u32_le(self.dest.0);
        self.query.encode(buf);
        buf.put_u8(self.mode.to_byte());
        buf.put_u8(self.aggregation.to_byte());
        buf.put_u16_le(self.rate);
    }
}

fn decode_mode(b: u8) -> CatbusResult<LinkMode> {
    LinkMode::from_byte(b).ok_or_else(|| CatbusError::InvalidWireFormat(format!("Unknown link mode {}", b)))
}

/// Link channel message bodies
#[derive(Clone, Debug, PartialEq)]
pub enum LinkMessage {
    /// Leader of a SEND link looking for nodes holding the dest key
    ConsumerQuery {
        key: KeyHash,
        query: TagQuery,
        mode: LinkMode,
        hash: LinkHash,
    },
    /// Leader of a RECV link looking for nodes holding the source key
    ProducerQuery {
        key: KeyHash,
        query: TagQuery,
        rate: u16,
        hash: LinkHash,
    },
    /// Reply to a consumer query, and follower re-announcement
    ConsumerMatch { hash: LinkHash },
    /// Producer to leader
    ProducerData { hash: LinkHash, data: DataItem },
    /// Leader to consumer, written into `key` on arrival
    ConsumerData {
        hash: LinkHash,
        key: KeyHash,
        data: DataItem,
    },
    LinkAdd { def: LinkDef },
    LinkDelete { hash: LinkHash },
}

impl LinkMessage {
    pub fn msg_type(&self) -> LinkMsgType {
        match self {
            LinkMessage::ConsumerQuery { .. } => LinkMsgType::ConsumerQuery,
            LinkMessage::ProducerQuery { .. } => LinkMsgType::ProducerQuery,
            LinkMessage::ConsumerMatch { .. } => LinkMsgType::ConsumerMatch,
            LinkMessage::ProducerData { .. } => LinkMsgType::ProducerData,
            LinkMessage::ConsumerData { .. } => LinkMsgType::ConsumerData,
            LinkMessage::LinkAdd { .. } => LinkMsgType::LinkAdd,
            LinkMessage::LinkDelete { .. } => LinkMsgType::LinkDelete,
        }
    }

    fn decode_body(msg_type: LinkMsgType, buf: &mut impl Buf) -> CatbusResult<Self> {
        let msg = match msg_type {
            LinkMsgType::ConsumerQuery => {
                ensure_remaining(&*buf, 4 + TAG_QUERY_SIZE + 1 + 8)?;
                let key = KeyHash::new(buf.get_u32_le());
                let query = TagQuery::decode(buf)?;
                let mode = decode_mode(buf.get_u8())?;
                let hash = LinkHash::new(buf.get_u64_le());
                LinkMessage::ConsumerQuery {
                    key,
                    query,
                    mode,
                    hash,
                }
            }
            LinkMsgType::ProducerQuery => {
                ensure_remaining(&*buf, 4 + TAG_QUERY_SIZE + 2 + 8)?;
                let key = KeyHash::new(buf.get_u32_le());
                let query = TagQuery::decode(buf)?;
                let rate = buf.get_u16_le();
                let hash = LinkHash::new(buf.get_u64_le());
                LinkMessage::ProducerQuery {
                    key,
                    query,
                    rate,
                    hash,
                }
            }
            LinkMsgType::ConsumerMatch => {
                ensure_remaining(&*buf, 8)?;
                LinkMessage::ConsumerMatch {
                    hash: LinkHash::new(buf.get_u64_le()),
                }
            }
            LinkMsgType::ProducerData => {
                ensure_remaining(&*buf, 8)?;
                let hash = LinkHash::new(buf.get_u64_le());
                let data = DataItem::decode(buf)?;
                LinkMessage::ProducerData { hash, data }
            }
            LinkMsgType::ConsumerData => {
                ensure_remaining(&*buf, 12)?;
                let hash = LinkHash::new(buf.get_u64_le());
                let key = KeyHash::new(buf.get_u32_le());
                let data = DataItem::decode(buf)?;
                LinkMessage::ConsumerData { hash, key, data }
            }
            LinkMsgType::LinkAdd => LinkMessage::LinkAdd {
                def: LinkDef::decode(buf)?,
            },
            LinkMsgType::LinkDelete => {
                ensure_remaining(&*buf, 8)?;
                LinkMessage::LinkDelete {
                    hash: LinkHash::new(buf.get_u64_le()),
                }
            }
        };

        Ok(msg)
    }

    fn encode_body(&self, buf: &mut impl BufMut) {
        match self {
            LinkMessage::ConsumerQuery {
                key,
                query,
                mode,
                hash,
            } => {
                buf.put_u32_le(key.0);
                query.encode(buf);
                buf.put_u8(mode.to_byte());
                buf.put_u64_le(hash.0);
            }
            LinkMessage::ProducerQuery {
                key,
                query,
                rate,
                hash,
            } => {
                buf.put_u32_le(key.0);
                query.encode(buf);
                buf.put_u16_le(*rate);
                buf.put_u64_le(hash.0);
            }
            LinkMessage::ConsumerMatch { hash } | LinkMessage::LinkDelete { hash } => {
                buf.put_u64_le(hash.0);
            }
            LinkMessage::ProducerData { hash, data } => {
                buf.put_u64_le(hash.0);
                data.encode(buf);
            }
            LinkMessage::ConsumerData { hash, key, data } => {
                buf.put_u64_le(hash.0);
                buf.put_u32_le(key.0);
                data.encode(buf);
            }
            LinkMessage::LinkAdd { def } => def.encode(buf),
        }
    }
}

/// A complete link channel datagram
#[derive(Clone, Debug, PartialEq)]
pub struct LinkPacket {
    pub header: LinkHeader,
    pub message: LinkMessage,
}

impl LinkPacket {
    pub fn new(origin: Origin, universe: u32, message: LinkMessage) -> Self {
        LinkPacket {
            header: LinkHeader::new(message.msg_type(), origin, universe),
            message,
        }
    }

    pub fn decode(data: &[u8]) -> CatbusResult<Self> {
        let mut buf = data;
        let header = LinkHeader::decode(&mut buf)?;
        let message = LinkMessage::decode_body(header.msg_type, &mut buf)?;
        Ok(LinkPacket { header, message })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(LINK_HEADER_SIZE + 64);
        let mut header = self.header.clone();
        header.msg_type = self.message.msg_type();
        header.encode(&mut buf);
        self.message.encode_body(&mut buf);
        buf
    }
}
