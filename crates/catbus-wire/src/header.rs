//! Fixed headers for the Catbus channels
//!
//! Service header is 15 bytes:
//! - Bytes 0-3: Magic (LE)
//! - Byte 4: Version
//! - Byte 5: Message type
//! - Byte 6: Flags
//! - Bytes 7-14: Origin (LE)
//!
//! Link header is 20 bytes:
//! - Bytes 0-3: Magic (LE)
//! - Byte 4: Message type
//! - Byte 5: Version
//! - Byte 6: Flags
//! - Byte 7: Reserved
//! - Bytes 8-15: Origin (LE)
//! - Bytes 16-19: Universe (LE)

use bytes::{Buf, BufMut};
use catbus_core::{CatbusError, CatbusResult, Origin, LINK_MAGIC, LINK_VERSION, SERVICES_MAGIC, SERVICES_VERSION};

use crate::{ensure_remaining, HeaderFlags};

pub const SERVICE_HEADER_SIZE: usize = 15;
pub const LINK_HEADER_SIZE: usize = 20;

/// Service channel message types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServiceMsgType {
    Offer = 1,
    Query = 2,
}

impl ServiceMsgType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(ServiceMsgType::Offer),
            2 => Some(ServiceMsgType::Query),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Service channel header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceHeader {
    pub version: u8,
    pub msg_type: ServiceMsgType,
    pub flags: HeaderFlags,
    pub origin: Origin,
}

impl ServiceHeader {
    pub fn new(msg_type: ServiceMsgType, origin: Origin) -> Self {
        ServiceHeader {
            version: SERVICES_VERSION,
            msg_type,
            flags: HeaderFlags::NONE,
            origin,
        }
    }

    /// Parse and validate a header, advancing `buf` past it
    pub fn decode(buf: &mut impl Buf) -> CatbusResult<Self> {
        ensure_remaining(&*buf, SERVICE_HEADER_SIZE)?;

        let magic = buf.get_u32_le();
        if magic != SERVICES_MAGIC {
            return Err(CatbusError::BadMagic(magic));
        }

        let version = buf.get_u8();
        if version != SERVICES_VERSION {
            return Err(CatbusError::UnsupportedVersion(version));
        }

        let raw_type = buf.get_u8();
        let msg_type =
            ServiceMsgType::from_byte(raw_type).ok_or(CatbusError::UnknownMessageType(raw_type))?;
        let flags = HeaderFlags::new(buf.get_u8());
        let origin = Origin::new(buf.get_u64_le());

        Ok(ServiceHeader {
            version,
            msg_type,
            flags,
            origin,
        })
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(SERVICES_MAGIC);
        buf.put_u8(self.version);
        buf.put_u8(self.msg_type.to_byte());
        buf.put_u8(self.flags.0);
        buf.put_u64_le(self.origin.0);
    }
}

/// Link channel message types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LinkMsgType {
    ConsumerQuery = 1,
    ProducerQuery = 2,
    ConsumerMatch = 3,
    ProducerData = 4,
    ConsumerData = 5,
    LinkAdd = 6,
    LinkDelete = 7,
}

impl LinkMsgType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(LinkMsgType::ConsumerQuery),
            2 => Some(LinkMsgType::ProducerQuery),
            3 => Some(LinkMsgType::ConsumerMatch),
            4 => Some(LinkMsgType::ProducerData),
            5 => Some(LinkMsgType::ConsumerData),
            6 => Some(LinkMsgType::LinkAdd),
            7 => Some(LinkMsgType::LinkDelete),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Link channel header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkHeader {
    pub msg_type: LinkMsgType,
    pub version: u8,
    pub flags: u8,
    pub origin: Origin,
    pub universe: u32,
}

impl LinkHeader {
    pub fn new(msg_type: LinkMsgType, origin: Origin, universe: u32) -> Self {
        LinkHeader {
            msg_type,
            version: LINK_VERSION,
            flags: 0,
            origin,
            universe,
        }
    }

    pub fn decode(buf: &mut impl Buf) -> CatbusResult<Self> {
        ensure_remaining(&*buf, LINK_HEADER_SIZE)?;

        let magic = buf.get_u32_le();
        if magic != LINK_MAGIC {
            return Err(CatbusError::BadMagic(magic));
        }

        let raw_type = buf.get_u8();
        let msg_type =
            LinkMsgType::from_byte(raw_type).ok_or(CatbusError::UnknownMessageType(raw_type))?;

        let version = buf.get_u8();
        if version != LINK_VERSION {
            return Err(CatbusError::UnsupportedVersion(version));
        }

        let flags = buf.get_u8();
        buf.advance(1); // reserved
        let origin = Origin::new(buf.get_u64_le());
        let universe = buf.get_u32_le();

        Ok(LinkHeader {
            msg_type,
            version,
            flags,
            origin,
            universe,
        })
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(LINK_MAGIC);
        buf.put_u8(self.msg_type.to_byte());
        buf.put_u8(self.version);
        buf.put_u8(self.flags);
        buf.put_u8(0);
        buf.put_u64_le(self.origin.0);
        buf.put_u32_le(self.universe);
    }
}
