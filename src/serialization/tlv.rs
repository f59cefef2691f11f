//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Tag-length-value serializer implementation.
//!
//! Every value is encoded as a one-byte tag, a variable-length length, and
//! the value bytes:
//!
//! ```text
//! +-----------+------------------+------------------+
//! | Tag (1)   | Length (1..n)    | Value (N bytes)  |
//! +-----------+------------------+------------------+
//! ```
//!
//! - **Tag**: bit 6 is the frame-type bit (reserved for private frames),
//!   bit 5 marks composite values whose payload is itself a TLV stream,
//!   and the low five bits carry the kind identifier.
//! - **Length**: base-128 with the high bit of each byte as a continuation
//!   flag, least-significant group first.
//! - **Value**: big-endian scalars, UTF-8 text, or a concatenation of
//!   nested TLV records for composites. Struct fields are positional.
//!
//! Integers auto-shrink to the smallest width that holds the value on
//! encode; decoding sign-extends signed kinds and zero-extends unsigned
//! kinds back to the caller's width. The width tests below pin both
//! directions down.

use crate::serialization::{DeserializationError, SerializationError, Serializer as WireSerializer};
use serde::de::{self, DeserializeOwned, Visitor};
use serde::ser::{self, Serialize};
use std::fmt;

/// Frame-type bit: set for private (application-defined) frames.
const FRAME_TYPE_PRIVATE: u8 = 0x40;
/// Data-type bit: set when the value bytes are a nested TLV stream.
const DATA_TYPE_COMPOSITE: u8 = 0x20;
/// Mask for the kind identifier in a single-byte tag.
const KIND_MASK: u8 = 0x1f;

/// Kind identifiers carried in the tag's low five bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Kind {
    Invalid = 0,
    Bool = 1,
    Int8 = 3,
    Int16 = 4,
    Int32 = 5,
    Int64 = 6,
    Uint8 = 8,
    Uint16 = 9,
    Uint32 = 10,
    Uint64 = 11,
    Float32 = 13,
    Float64 = 14,
    Map = 21,
    Slice = 23,
    String = 24,
    Struct = 25,
}

impl Kind {
    fn from_id(id: u8) -> Option<Kind> {
        Some(match id {
            0 => Kind::Invalid,
            1 => Kind::Bool,
            3 => Kind::Int8,
            4 => Kind::Int16,
            5 => Kind::Int32,
            6 => Kind::Int64,
            8 => Kind::Uint8,
            9 => Kind::Uint16,
            10 => Kind::Uint32,
            11 => Kind::Uint64,
            13 => Kind::Float32,
            14 => Kind::Float64,
            21 => Kind::Map,
            23 => Kind::Slice,
            24 => Kind::String,
            25 => Kind::Struct,
            _ => return None,
        })
    }

    fn is_signed_int(self) -> bool {
        matches!(self, Kind::Int8 | Kind::Int16 | Kind::Int32 | Kind::Int64)
    }

    fn is_unsigned_int(self) -> bool {
        matches!(self, Kind::Uint8 | Kind::Uint16 | Kind::Uint32 | Kind::Uint64)
    }
}

/// Internal error type shared by the encoder and decoder.
#[derive(Debug)]
pub struct TlvError(String);

impl fmt::Display for TlvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TlvError {}

impl ser::Error for TlvError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        TlvError(msg.to_string())
    }
}

impl de::Error for TlvError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        TlvError(msg.to_string())
    }
}

/// Serializes a value to TLV bytes.
pub fn to_vec<T>(value: &T) -> Result<Vec<u8>, SerializationError>
where
    T: Serialize + ?Sized,
{
    let mut encoder = Encoder::new();
    value
        .serialize(&mut encoder)
        .map_err(|e| SerializationError::with_source("TLV serialization failed", e))?;
    Ok(encoder.out)
}

/// Deserializes a value from TLV bytes.
pub fn from_slice<T>(bytes: &[u8]) -> Result<T, DeserializationError>
where
    T: DeserializeOwned,
{
    let mut decoder = Decoder::new(bytes);
    T::deserialize(&mut decoder)
        .map_err(|e| DeserializationError::with_source("TLV deserialization failed", e))
}

/// TLV serializer, registered under the wire name `"tlv"`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TlvSerializer;

impl TlvSerializer {
    /// Creates a new TLV serializer.
    pub fn new() -> Self {
        Self
    }
}

impl WireSerializer for TlvSerializer {
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, SerializationError>
    where
        T: serde::Serialize + ?Sized,
    {
        to_vec(value)
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, DeserializationError>
    where
        T: serde::de::DeserializeOwned,
    {
        from_slice(bytes)
    }

    fn name(&self) -> &'static str {
        "tlv"
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

struct Encoder {
    out: Vec<u8>,
}

impl Encoder {
    fn new() -> Self {
        Self { out: Vec::new() }
    }

    fn put_record(&mut self, kind: Kind, composite: bool, payload: &[u8]) {
        let mut tag = kind as u8 & KIND_MASK;
        if composite {
            tag |= DATA_TYPE_COMPOSITE;
        }
        debug_assert_eq!(tag & FRAME_TYPE_PRIVATE, 0);
        self.out.push(tag);
        put_length(&mut self.out, payload.len());
        self.out.extend_from_slice(payload);
    }

    fn put_varint(&mut self, value: i64) {
        if i64::from(value as i8) == value {
            self.put_record(Kind::Int8, false, &(value as i8).to_be_bytes());
        } else if i64::from(value as i16) == value {
            self.put_record(Kind::Int16, false, &(value as i16).to_be_bytes());
        } else if i64::from(value as i32) == value {
            self.put_record(Kind::Int32, false, &(value as i32).to_be_bytes());
        } else {
            self.put_record(Kind::Int64, false, &value.to_be_bytes());
        }
    }

    fn put_varuint(&mut self, value: u64) {
        if value <= u64::from(u8::MAX) {
            self.put_record(Kind::Uint8, false, &(value as u8).to_be_bytes());
        } else if value <= u64::from(u16::MAX) {
            self.put_record(Kind::Uint16, false, &(value as u16).to_be_bytes());
        } else if value <= u64::from(u32::MAX) {
            self.put_record(Kind::Uint32, false, &(value as u32).to_be_bytes());
        } else {
            self.put_record(Kind::Uint64, false, &value.to_be_bytes());
        }
    }
}

fn put_length(out: &mut Vec<u8>, mut n: usize) {
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Compound serializer for composites: elements accumulate in a scratch
/// encoder and land in the parent as one record on `end()`.
struct Compound<'a> {
    parent: &'a mut Encoder,
    inner: Encoder,
    kind: Kind,
}

impl<'a> Compound<'a> {
    fn new(parent: &'a mut Encoder, kind: Kind) -> Self {
        Self {
            parent,
            inner: Encoder::new(),
            kind,
        }
    }

    fn finish(self) -> Result<(), TlvError> {
        self.parent.put_record(self.kind, true, &self.inner.out);
        Ok(())
    }
}

impl<'a> ser::SerializeSeq for Compound<'a> {
    type Ok = ();
    type Error = TlvError;

    fn serialize_element<T>(&mut self, value: &T) -> Result<(), TlvError>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(&mut self.inner)
    }

    fn end(self) -> Result<(), TlvError> {
        self.finish()
    }
}

impl<'a> ser::SerializeTuple for Compound<'a> {
    type Ok = ();
    type Error = TlvError;

    fn serialize_element<T>(&mut self, value: &T) -> Result<(), TlvError>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(&mut self.inner)
    }

    fn end(self) -> Result<(), TlvError> {
        self.finish()
    }
}

impl<'a> ser::SerializeTupleStruct for Compound<'a> {
    type Ok = ();
    type Error = TlvError;

    fn serialize_field<T>(&mut self, value: &T) -> Result<(), TlvError>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(&mut self.inner)
    }

    fn end(self) -> Result<(), TlvError> {
        self.finish()
    }
}

impl<'a> ser::SerializeTupleVariant for Compound<'a> {
    type Ok = ();
    type Error = TlvError;

    fn serialize_field<T>(&mut self, value: &T) -> Result<(), TlvError>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(&mut self.inner)
    }

    fn end(self) -> Result<(), TlvError> {
        self.finish()
    }
}

impl<'a> ser::SerializeMap for Compound<'a> {
    type Ok = ();
    type Error = TlvError;

    fn serialize_key<T>(&mut self, key: &T) -> Result<(), TlvError>
    where
        T: Serialize + ?Sized,
    {
        key.serialize(&mut self.inner)
    }

    fn serialize_value<T>(&mut self, value: &T) -> Result<(), TlvError>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(&mut self.inner)
    }

    fn end(self) -> Result<(), TlvError> {
        self.finish()
    }
}

impl<'a> ser::SerializeStruct for Compound<'a> {
    type Ok = ();
    type Error = TlvError;

    fn serialize_field<T>(&mut self, _key: &'static str, value: &T) -> Result<(), TlvError>
    where
        T: Serialize + ?Sized,
    {
        // Fields are positional; the name is not encoded.
        value.serialize(&mut self.inner)
    }

    fn end(self) -> Result<(), TlvError> {
        self.finish()
    }
}

impl<'a> ser::SerializeStructVariant for Compound<'a> {
    type Ok = ();
    type Error = TlvError;

    fn serialize_field<T>(&mut self, _key: &'static str, value: &T) -> Result<(), TlvError>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(&mut self.inner)
    }

    fn end(self) -> Result<(), TlvError> {
        self.finish()
    }
}

impl<'a> ser::Serializer for &'a mut Encoder {
    type Ok = ();
    type Error = TlvError;
    type SerializeSeq = Compound<'a>;
    type SerializeTuple = Compound<'a>;
    type SerializeTupleStruct = Compound<'a>;
    type SerializeTupleVariant = Compound<'a>;
    type SerializeMap = Compound<'a>;
    type SerializeStruct = Compound<'a>;
    type SerializeStructVariant = Compound<'a>;

    fn serialize_bool(self, v: bool) -> Result<(), TlvError> {
        self.put_record(Kind::Bool, false, &[u8::from(v)]);
        Ok(())
    }

    fn serialize_i8(self, v: i8) -> Result<(), TlvError> {
        self.put_varint(i64::from(v));
        Ok(())
    }

    fn serialize_i16(self, v: i16) -> Result<(), TlvError> {
        self.put_varint(i64::from(v));
        Ok(())
    }

    fn serialize_i32(self, v: i32) -> Result<(), TlvError> {
        self.put_varint(i64::from(v));
        Ok(())
    }

    fn serialize_i64(self, v: i64) -> Result<(), TlvError> {
        self.put_varint(v);
        Ok(())
    }

    fn serialize_u8(self, v: u8) -> Result<(), TlvError> {
        self.put_varuint(u64::from(v));
        Ok(())
    }

    fn serialize_u16(self, v: u16) -> Result<(), TlvError> {
        self.put_varuint(u64::from(v));
        Ok(())
    }

    fn serialize_u32(self, v: u32) -> Result<(), TlvError> {
        self.put_varuint(u64::from(v));
        Ok(())
    }

    fn serialize_u64(self, v: u64) -> Result<(), TlvError> {
        self.put_varuint(v);
        Ok(())
    }

    fn serialize_f32(self, v: f32) -> Result<(), TlvError> {
        self.put_record(Kind::Float32, false, &v.to_be_bytes());
        Ok(())
    }

    fn serialize_f64(self, v: f64) -> Result<(), TlvError> {
        self.put_record(Kind::Float64, false, &v.to_be_bytes());
        Ok(())
    }

    fn serialize_char(self, v: char) -> Result<(), TlvError> {
        let mut buf = [0u8; 4];
        let s = v.encode_utf8(&mut buf);
        self.serialize_str(s)
    }

    fn serialize_str(self, v: &str) -> Result<(), TlvError> {
        self.put_record(Kind::String, false, v.as_bytes());
        Ok(())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<(), TlvError> {
        self.put_record(Kind::Slice, false, v);
        Ok(())
    }

    fn serialize_none(self) -> Result<(), TlvError> {
        self.put_record(Kind::Invalid, false, &[]);
        Ok(())
    }

    fn serialize_some<T>(self, value: &T) -> Result<(), TlvError>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<(), TlvError> {
        self.put_record(Kind::Invalid, false, &[]);
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<(), TlvError> {
        self.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
    ) -> Result<(), TlvError> {
        self.put_varuint(u64::from(variant_index));
        Ok(())
    }

    fn serialize_newtype_struct<T>(self, _name: &'static str, value: &T) -> Result<(), TlvError>
    where
        T: Serialize + ?Sized,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        value: &T,
    ) -> Result<(), TlvError>
    where
        T: Serialize + ?Sized,
    {
        let mut inner = Encoder::new();
        inner.put_varuint(u64::from(variant_index));
        value.serialize(&mut inner)?;
        self.put_record(Kind::Struct, true, &inner.out);
        Ok(())
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Compound<'a>, TlvError> {
        Ok(Compound::new(self, Kind::Slice))
    }

    fn serialize_tuple(self, _len: usize) -> Result<Compound<'a>, TlvError> {
        Ok(Compound::new(self, Kind::Slice))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Compound<'a>, TlvError> {
        Ok(Compound::new(self, Kind::Struct))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Compound<'a>, TlvError> {
        let mut compound = Compound::new(self, Kind::Struct);
        compound.inner.put_varuint(u64::from(variant_index));
        Ok(compound)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Compound<'a>, TlvError> {
        Ok(Compound::new(self, Kind::Map))
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Compound<'a>, TlvError> {
        Ok(Compound::new(self, Kind::Struct))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Compound<'a>, TlvError> {
        let mut compound = Compound::new(self, Kind::Struct);
        compound.inner.put_varuint(u64::from(variant_index));
        Ok(compound)
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Tag {
    kind: Kind,
    composite: bool,
}

struct Decoder<'de> {
    input: &'de [u8],
    pos: usize,
}

impl<'de> Decoder<'de> {
    fn new(input: &'de [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn next_byte(&mut self) -> Result<u8, TlvError> {
        let byte = *self
            .input
            .get(self.pos)
            .ok_or_else(|| TlvError("unexpected end of input".to_string()))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_tag(&mut self) -> Result<Tag, TlvError> {
        let first = self.next_byte()?;
        let composite = first & DATA_TYPE_COMPOSITE != 0;
        let id = if first & 0x80 == 0 {
            first & KIND_MASK
        } else {
            // Extended tag: the identifier continues in base-128 groups,
            // least-significant group first.
            let mut value: u32 = 0;
            let mut power: u32 = 1;
            loop {
                let byte = self.next_byte()?;
                value = value
                    .checked_add(u32::from(byte & 0x7f).wrapping_mul(power))
                    .ok_or_else(|| TlvError("tag identifier overflow".to_string()))?;
                if byte & 0x80 == 0 {
                    break;
                }
                power = power.wrapping_mul(128);
            }
            u8::try_from(value).map_err(|_| TlvError("tag identifier overflow".to_string()))?
        };
        let kind =
            Kind::from_id(id).ok_or_else(|| TlvError(format!("unknown kind identifier {id}")))?;
        Ok(Tag { kind, composite })
    }

    fn read_length(&mut self) -> Result<usize, TlvError> {
        let mut length: usize = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.next_byte()?;
            length |= usize::from(byte & 0x7f)
                .checked_shl(shift)
                .ok_or_else(|| TlvError("length overflow".to_string()))?;
            if byte & 0x80 == 0 {
                return Ok(length);
            }
            shift += 7;
            if shift > usize::BITS {
                return Err(TlvError("length overflow".to_string()));
            }
        }
    }

    fn read_record(&mut self) -> Result<(Tag, &'de [u8]), TlvError> {
        let tag = self.read_tag()?;
        let length = self.read_length()?;
        let end = self
            .pos
            .checked_add(length)
            .filter(|end| *end <= self.input.len())
            .ok_or_else(|| TlvError("record length exceeds input".to_string()))?;
        let value = &self.input[self.pos..end];
        self.pos = end;
        Ok((tag, value))
    }

    fn peek_tag(&self) -> Result<Tag, TlvError> {
        let mut probe = Decoder {
            input: self.input,
            pos: self.pos,
        };
        probe.read_tag()
    }

    fn read_signed(&mut self) -> Result<i64, TlvError> {
        let (tag, value) = self.read_record()?;
        if tag.kind.is_signed_int() {
            Ok(sign_extend(value)?)
        } else if tag.kind.is_unsigned_int() {
            let v = zero_extend(value)?;
            i64::try_from(v).map_err(|_| TlvError(format!("value {v} out of signed range")))
        } else {
            Err(TlvError(format!(
                "expected integer, found {:?}",
                tag.kind
            )))
        }
    }

    fn read_unsigned(&mut self) -> Result<u64, TlvError> {
        let (tag, value) = self.read_record()?;
        if tag.kind.is_unsigned_int() {
            zero_extend(value)
        } else if tag.kind.is_signed_int() {
            let v = sign_extend(value)?;
            u64::try_from(v).map_err(|_| TlvError(format!("value {v} out of unsigned range")))
        } else {
            Err(TlvError(format!(
                "expected integer, found {:?}",
                tag.kind
            )))
        }
    }

    fn read_composite(&mut self, expected: &[Kind]) -> Result<Decoder<'de>, TlvError> {
        let (tag, value) = self.read_record()?;
        if !tag.composite || !expected.contains(&tag.kind) {
            return Err(TlvError(format!(
                "expected composite {:?}, found {:?}",
                expected, tag.kind
            )));
        }
        Ok(Decoder::new(value))
    }
}

fn sign_extend(value: &[u8]) -> Result<i64, TlvError> {
    match value.len() {
        1 => Ok(i64::from(value[0] as i8)),
        2 => Ok(i64::from(i16::from_be_bytes([value[0], value[1]]))),
        4 => Ok(i64::from(i32::from_be_bytes([
            value[0], value[1], value[2], value[3],
        ]))),
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(value);
            Ok(i64::from_be_bytes(buf))
        }
        n => Err(TlvError(format!("invalid integer width {n}"))),
    }
}

fn zero_extend(value: &[u8]) -> Result<u64, TlvError> {
    match value.len() {
        1 => Ok(u64::from(value[0])),
        2 => Ok(u64::from(u16::from_be_bytes([value[0], value[1]]))),
        4 => Ok(u64::from(u32::from_be_bytes([
            value[0], value[1], value[2], value[3],
        ]))),
        8 => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(value);
            Ok(u64::from_be_bytes(buf))
        }
        n => Err(TlvError(format!("invalid integer width {n}"))),
    }
}

struct SeqReader<'de> {
    decoder: Decoder<'de>,
}

impl<'de> de::SeqAccess<'de> for SeqReader<'de> {
    type Error = TlvError;

    fn next_element_seed<T>(&mut self, seed: T) -> Result<Option<T::Value>, TlvError>
    where
        T: de::DeserializeSeed<'de>,
    {
        if self.decoder.at_end() {
            return Ok(None);
        }
        seed.deserialize(&mut self.decoder).map(Some)
    }
}

struct MapReader<'de> {
    decoder: Decoder<'de>,
}

impl<'de> de::MapAccess<'de> for MapReader<'de> {
    type Error = TlvError;

    fn next_key_seed<K>(&mut self, seed: K) -> Result<Option<K::Value>, TlvError>
    where
        K: de::DeserializeSeed<'de>,
    {
        if self.decoder.at_end() {
            return Ok(None);
        }
        seed.deserialize(&mut self.decoder).map(Some)
    }

    fn next_value_seed<V>(&mut self, seed: V) -> Result<V::Value, TlvError>
    where
        V: de::DeserializeSeed<'de>,
    {
        seed.deserialize(&mut self.decoder)
    }
}

struct EnumReader<'de> {
    decoder: Decoder<'de>,
}

impl<'de> de::EnumAccess<'de> for EnumReader<'de> {
    type Error = TlvError;
    type Variant = VariantReader<'de>;

    fn variant_seed<V>(mut self, seed: V) -> Result<(V::Value, VariantReader<'de>), TlvError>
    where
        V: de::DeserializeSeed<'de>,
    {
        let index = self.decoder.read_unsigned()?;
        let index =
            u32::try_from(index).map_err(|_| TlvError("variant index overflow".to_string()))?;
        let value = seed.deserialize(de::value::U32Deserializer::<TlvError>::new(index))?;
        Ok((value, VariantReader {
            decoder: self.decoder,
        }))
    }
}

struct VariantReader<'de> {
    decoder: Decoder<'de>,
}

impl<'de> de::VariantAccess<'de> for VariantReader<'de> {
    type Error = TlvError;

    fn unit_variant(self) -> Result<(), TlvError> {
        Ok(())
    }

    fn newtype_variant_seed<T>(mut self, seed: T) -> Result<T::Value, TlvError>
    where
        T: de::DeserializeSeed<'de>,
    {
        seed.deserialize(&mut self.decoder)
    }

    fn tuple_variant<V>(self, _len: usize, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_seq(SeqReader {
            decoder: self.decoder,
        })
    }

    fn struct_variant<V>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_seq(SeqReader {
            decoder: self.decoder,
        })
    }
}

impl<'de, 'a> de::Deserializer<'de> for &'a mut Decoder<'de> {
    type Error = TlvError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        let tag = self.peek_tag()?;
        match (tag.kind, tag.composite) {
            (Kind::Bool, _) => self.deserialize_bool(visitor),
            (k, _) if k.is_signed_int() => visitor.visit_i64(self.read_signed()?),
            (k, _) if k.is_unsigned_int() => visitor.visit_u64(self.read_unsigned()?),
            (Kind::Float32, _) | (Kind::Float64, _) => self.deserialize_f64(visitor),
            (Kind::String, _) => self.deserialize_str(visitor),
            (Kind::Slice, false) => self.deserialize_bytes(visitor),
            (Kind::Slice, true) | (Kind::Struct, true) => self.deserialize_seq(visitor),
            (Kind::Map, true) => self.deserialize_map(visitor),
            (Kind::Invalid, _) => self.deserialize_unit(visitor),
            (kind, composite) => Err(TlvError(format!(
                "cannot infer value shape from kind {kind:?} (composite: {composite})"
            ))),
        }
    }

    fn deserialize_bool<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        let (tag, value) = self.read_record()?;
        if tag.kind != Kind::Bool || value.len() != 1 {
            return Err(TlvError(format!("expected bool, found {:?}", tag.kind)));
        }
        visitor.visit_bool(value[0] != 0)
    }

    fn deserialize_i8<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_i64(self.read_signed()?)
    }

    fn deserialize_i16<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_i64(self.read_signed()?)
    }

    fn deserialize_i32<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_i64(self.read_signed()?)
    }

    fn deserialize_i64<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_i64(self.read_signed()?)
    }

    fn deserialize_u8<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_u64(self.read_unsigned()?)
    }

    fn deserialize_u16<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_u64(self.read_unsigned()?)
    }

    fn deserialize_u32<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_u64(self.read_unsigned()?)
    }

    fn deserialize_u64<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_u64(self.read_unsigned()?)
    }

    fn deserialize_f32<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        self.deserialize_f64(visitor)
    }

    fn deserialize_f64<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        let (tag, value) = self.read_record()?;
        match tag.kind {
            Kind::Float32 if value.len() == 4 => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(value);
                visitor.visit_f32(f32::from_be_bytes(buf))
            }
            Kind::Float64 if value.len() == 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(value);
                visitor.visit_f64(f64::from_be_bytes(buf))
            }
            kind => Err(TlvError(format!("expected float, found {kind:?}"))),
        }
    }

    fn deserialize_char<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        let (tag, value) = self.read_record()?;
        if tag.kind != Kind::String {
            return Err(TlvError(format!("expected char, found {:?}", tag.kind)));
        }
        let s = std::str::from_utf8(value)
            .map_err(|e| TlvError(format!("invalid UTF-8 in char: {e}")))?;
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => visitor.visit_char(c),
            _ => Err(TlvError("expected a single-character string".to_string())),
        }
    }

    fn deserialize_str<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        let (tag, value) = self.read_record()?;
        if tag.kind != Kind::String {
            return Err(TlvError(format!("expected string, found {:?}", tag.kind)));
        }
        let s = std::str::from_utf8(value)
            .map_err(|e| TlvError(format!("invalid UTF-8 in string: {e}")))?;
        visitor.visit_borrowed_str(s)
    }

    fn deserialize_string<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        let (tag, value) = self.read_record()?;
        if tag.kind != Kind::Slice || tag.composite {
            return Err(TlvError(format!("expected bytes, found {:?}", tag.kind)));
        }
        visitor.visit_borrowed_bytes(value)
    }

    fn deserialize_byte_buf<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        if self.peek_tag()?.kind == Kind::Invalid {
            let _ = self.read_record()?;
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_unit<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        let (tag, _) = self.read_record()?;
        if tag.kind != Kind::Invalid {
            return Err(TlvError(format!("expected unit, found {:?}", tag.kind)));
        }
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        let decoder = self.read_composite(&[Kind::Slice, Kind::Struct])?;
        visitor.visit_seq(SeqReader { decoder })
    }

    fn deserialize_tuple<V>(self, _len: usize, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        let decoder = self.read_composite(&[Kind::Map])?;
        visitor.visit_map(MapReader { decoder })
    }

    fn deserialize_struct<V>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        // Struct fields are positional, so a struct decodes as a sequence.
        let decoder = self.read_composite(&[Kind::Struct, Kind::Slice])?;
        visitor.visit_seq(SeqReader { decoder })
    }

    fn deserialize_enum<V>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        let tag = self.peek_tag()?;
        if tag.composite {
            let decoder = self.read_composite(&[Kind::Struct])?;
            visitor.visit_enum(EnumReader { decoder })
        } else {
            // Unit variant: a bare integer index.
            let index = self.read_unsigned()?;
            let index =
                u32::try_from(index).map_err(|_| TlvError("variant index overflow".to_string()))?;
            visitor.visit_enum(de::value::U32Deserializer::<TlvError>::new(index))
        }
    }

    fn deserialize_identifier<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        visitor.visit_u64(self.read_unsigned()?)
    }

    fn deserialize_ignored_any<V>(self, visitor: V) -> Result<V::Value, TlvError>
    where
        V: Visitor<'de>,
    {
        let _ = self.read_record()?;
        visitor.visit_unit()
    }

    fn is_human_readable(&self) -> bool {
        false
    }
}
