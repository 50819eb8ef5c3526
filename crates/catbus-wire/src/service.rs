//! Service channel messages: offer broadcasts and queries

use bytes::{Buf, BufMut};
use catbus_core::{CatbusError, CatbusResult, ServiceKey, SERVICE_MAX_OFFERS};

use crate::{ensure_remaining, OfferFlags, ServiceHeader, ServiceMsgType, SERVICE_HEADER_SIZE};

/// Wire size of one offer record
pub const OFFER_RECORD_SIZE: usize = 21;

/// One offer as carried on the wire; the origin comes from the header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OfferRecord {
    pub service_id: u32,
    pub group: u64,
    pub priority: u16,
    pub port: u16,
    /// Whole seconds
    pub uptime: u32,
    pub flags: OfferFlags,
}

impl OfferRecord {
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(self.service_id, self.group)
    }

    fn decode(buf: &mut impl Buf) -> CatbusResult<Self> {
        ensure_remaining(&*buf, OFFER_RECORD_SIZE)?;
        Ok(OfferRecord {
            service_id: buf.get_u32_le(),
            group: buf.get_u64_le(),
            priority: buf.get_u16_le(),
            port: buf.get_u16_le(),
            uptime: buf.get_u32_le(),
            flags: OfferFlags::new(buf.get_u8()),
        })
    }

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.service_id);
        buf.put_u64_le(self.group);
        buf.put_u16_le(self.priority);
        buf.put_u16_le(self.port);
        buf.put_u32_le(self.uptime);
        buf.put_u8(self.flags.0);
    }
}

/// A decoded service channel message
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceMessage {
    Offers {
        header: ServiceHeader,
        offers: Vec<OfferRecord>,
    },
    Query {
        header: ServiceHeader,
        key: ServiceKey,
    },
}

impl ServiceMessage {
    pub fn header(&self) -> &ServiceHeader {
        match self {
            ServiceMessage::Offers { header, .. } => header,
            ServiceMessage::Query { header, .. } => header,
        }
    }

    pub fn decode(data: &[u8]) -> CatbusResult<Self> {
        let mut buf = data;
        let header = ServiceHeader::decode(&mut buf)?;

        match header.msg_type {
            ServiceMsgType::Offer => {
                ensure_remaining(&buf, 1)?;
                let count = buf.get_u8() as usize;
                if count > SERVICE_MAX_OFFERS {
                    return Err(CatbusError::InvalidWireFormat(format!(
                        "Too many offers: {} > {}",
                        count, SERVICE_MAX_OFFERS
                    )));
                }

                let offers = (0..count)
                    .map(|_| OfferRecord::decode(&mut buf))
                    .collect::<CatbusResult<Vec<_>>>()?;

                Ok(ServiceMessage::Offers { header, offers })
            }
            ServiceMsgType::Query => {
                ensure_remaining(&buf, 12)?;
                let service_id = buf.get_u32_le();
                let group = buf.get_u64_le();
                Ok(ServiceMessage::Query {
                    header,
                    key: ServiceKey::new(service_id, group),
                })
            }
        }
    }

    pub fn encode(&self) -> CatbusResult<Vec<u8>> {
        match self {
            ServiceMessage::Offers { header, offers } => {
                if offers.len() > SERVICE_MAX_OFFERS {
                    return Err(CatbusError::InvalidWireFormat(format!(
                        "Too many offers: {} > {}",
                        offers.len(),
                        SERVICE_MAX_OFFERS
                    )));
                }

                let mut buf =
                    Vec::with_capacity(SERVICE_HEADER_SIZE + 1 + offers.len() * OFFER_RECORD_SIZE);
                header.encode(&mut buf);
                buf.put_u8(offers.len() as u8);
                for offer in offers {
                    offer.encode(&mut buf);
                }
                Ok(buf)
            }
            ServiceMessage::Query { header, key } => {
                let mut buf = Vec::with_capacity(SERVICE_HEADER_SIZE + 12);
                header.encode(&mut buf);
                buf.put_u32_le(key.service_id);
                buf.put_u64_le(key.group);
                Ok(buf)
            }
        }
    }
}
