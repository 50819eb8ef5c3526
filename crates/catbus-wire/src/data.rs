//! Typed data payloads carried by link data messages
//!
//! Payload layout:
//! - Byte 0: Data type
//! - Bytes 1-2: Array length (LE)
//! - Values, each in the type's native little-endian width

use bytes::{Buf, BufMut};
use catbus_core::{content_hash, CatbusError, CatbusResult, MAX_ARRAY_LEN};

use crate::ensure_remaining;

/// Value type of a database item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    Bool = 1,
    Uint8 = 2,
    Int8 = 3,
    Uint16 = 4,
    Int16 = 5,
    Uint32 = 6,
    Int32 = 7,
    Uint64 = 8,
    Int64 = 9,
    Float = 10,
}

impl DataType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(DataType::Bool),
            2 => Some(DataType::Uint8),
            3 => Some(DataType::Int8),
            4 => Some(DataType::Uint16),
            5 => Some(DataType::Int16),
            6 => Some(DataType::Uint32),
            7 => Some(DataType::Int32),
            8 => Some(DataType::Uint64),
            9 => Some(DataType::Int64),
            10 => Some(DataType::Float),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Encoded width of one value in bytes
    pub fn size(self) -> usize {
        match self {
            DataType::Bool | DataType::Uint8 | DataType::Int8 => 1,
            DataType::Uint16 | DataType::Int16 => 2,
            DataType::Uint32 | DataType::Int32 | DataType::Float => 4,
            DataType::Uint64 | DataType::Int64 => 8,
        }
    }

    #[inline]
    pub fn is_float(self) -> bool {
        self == DataType::Float
    }
}

/// A single numeric value
///
/// `Uint64` items keep the raw bit pattern in `Int`; read them back with
/// `as_u64`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
}

impl Value {
    pub fn as_i64(self) -> i64 {
        match self {
            Value::Int(v) => v,
            Value::Float(v) => v as i64,
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Value::Int(v) => v as u64,
            Value::Float(v) => v as u64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Value::Int(v) => v as f64,
            Value::Float(v) => v,
        }
    }
}

/// A typed value or array, as stored in the database and sent by links
#[derive(Clone, Debug, PartialEq)]
pub struct DataItem {
    pub data_type: DataType,
    pub values: Vec<Value>,
}

impl DataItem {
    pub fn new(data_type: DataType, values: Vec<Value>) -> Self {
        DataItem { data_type, values }
    }

    pub fn scalar(data_type: DataType, value: Value) -> Self {
        DataItem {
            data_type,
            values: vec![value],
        }
    }

    pub fn int32(value: i32) -> Self {
        Self::scalar(DataType::Int32, Value::Int(value as i64))
    }

    pub fn uint64(value: u64) -> Self {
        Self::scalar(DataType::Uint64, Value::Int(value as i64))
    }

    pub fn float(value: f32) -> Self {
        Self::scalar(DataType::Float, Value::Float(value as f64))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Encoded size in bytes
    pub fn encoded_size(&self) -> usize {
        3 + self.values.len() * self.data_type.size()
    }

    /// Hash over the encoded bytes; equal items hash equal
    pub fn content_hash(&self) -> u64 {
        let mut buf = Vec::with_capacity(self.encoded_size());
        self.encode(&mut buf);
        content_hash(&buf)
    }

    pub fn decode(buf: &mut impl Buf) -> CatbusResult<Self> {
        ensure_remaining(&*buf, 3)?;

        let raw_type = buf.get_u8();
        let data_type = DataType::from_byte(raw_type).ok_or(CatbusError::UnknownDataType(raw_type))?;
        let count = buf.get_u16_le() as usize;
        if count > MAX_ARRAY_LEN {
            return Err(CatbusError::InvalidWireFormat(format!(
                "Array too long: {} > {}",
                count, MAX_ARRAY_LEN
            )));
        }

        ensure_remaining(&*buf, count * data_type.size())?;

        let values = (0..count)
            .map(|_| match data_type {
                DataType::Bool | DataType::Uint8 => Value::Int(buf.get_u8() as i64),
                DataType::Int8 => Value::Int(buf.get_i8() as i64),
                DataType::Uint16 => Value::Int(buf.get_u16_le() as i64),
                DataType::Int16 => Value::Int(buf.get_i16_le() as i64),
                DataType::Uint32 => Value::Int(buf.get_u32_le() as i64),
                DataType::Int32 => Value::Int(buf.get_i32_le() as i64),
                DataType::Uint64 => Value::Int(buf.get_u64_le() as i64),
                DataType::Int64 => Value::Int(buf.get_i64_le()),
                DataType::Float => Value::Float(buf.get_f32_le() as f64),
            })
            .collect();

        Ok(DataItem { data_type, values })
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.data_type.to_byte());
        buf.put_u16_le(self.values.len() as u16);

        for value in &self.values {
            match self.data_type {
                DataType::Bool => buf.put_u8((value.as_i64() != 0) as u8),
                DataType::Uint8 => buf.put_u8(value.as_i64() as u8),
                DataType::Int8 => buf.put_i8(value.as_i64() as i8),
                DataType::Uint16 => buf.put_u16_le(value.as_i64() as u16),
                DataType::Int16 => buf.put_i16_le(value.as_i64() as i16),
                DataType::Uint32 => buf.put_u32_le(value.as_i64() as u32),
                DataType::Int32 => buf.put_i32_le(value.as_i64() as i32),
                DataType::Uint64 => buf.put_u64_le(value.as_i64() as u64),
                DataType::Int64 => buf.put_i64_le(value.as_i64()),
                DataType::Float => buf.put_f32_le(value.as_f64() as f32),
            }
        }
    }
}
