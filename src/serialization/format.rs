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

//! Wire format registry.
//!
//! [`WireFormat`] is the tagged-variant dispatch over the registered
//! serialization formats. The connection prelude carries a format name;
//! [`WireFormat::from_name`] is the negotiation lookup, and an unknown name
//! causes the server to drop the connection.

use crate::serialization::{
    DeserializationError, JsonSerializer, PostcardSerializer, SerializationError, Serializer,
    TlvSerializer,
};

/// Wire name of the self-describing JSON format. This is the default codec
/// and the format always used for the handshake prelude.
pub const JSON_FORMAT: &str = "json";

/// Wire name of the compact postcard format.
pub const POSTCARD_FORMAT: &str = "postcard";

/// Wire name of the tag-length-value format.
pub const TLV_FORMAT: &str = "tlv";

/// A registered serialization format, negotiated once per connection.
///
/// Method bodies on the wire are opaque byte strings; this enum is the
/// seam through which both endpoints turn typed values into those bytes
/// and back. Keeping the dispatch in a closed enum (rather than trait
/// objects) lets typed encode/decode stay generic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireFormat {
    /// Self-describing JSON.
    Json,
    /// Compact postcard binary.
    Postcard,
    /// Tag-length-value binary.
    Tlv,
}

impl WireFormat {
    /// Looks up a format by its wire name.
    ///
    /// Returns `None` for unregistered names; during connection setup that
    /// is a fatal negotiation failure.
    pub fn from_name(name: &str) -> Option<WireFormat> {
        match name {
            JSON_FORMAT => Some(WireFormat::Json),
            POSTCARD_FORMAT => Some(WireFormat::Postcard),
            TLV_FORMAT => Some(WireFormat::Tlv),
            _ => None,
        }
    }

    /// Returns the wire name of this format.
    pub fn name(&self) -> &'static str {
        match self {
            WireFormat::Json => JSON_FORMAT,
            WireFormat::Postcard => POSTCARD_FORMAT,
            WireFormat::Tlv => TLV_FORMAT,
        }
    }

    /// Serializes a value with this format.
    pub fn to_vec<T>(&self, value: &T) -> Result<Vec<u8>, SerializationError>
    where
        T: serde::Serialize + ?Sized,
    {
        match self {
            WireFormat::Json => JsonSerializer.serialize(value),
            WireFormat::Postcard => PostcardSerializer.serialize(value),
            WireFormat::Tlv => TlvSerializer.serialize(value),
        }
    }

    /// Deserializes a value with this format.
    pub fn from_slice<T>(&self, bytes: &[u8]) -> Result<T, DeserializationError>
    where
        T: serde::de::DeserializeOwned,
    {
        match self {
            WireFormat::Json => JsonSerializer.deserialize(bytes),
            WireFormat::Postcard => PostcardSerializer.deserialize(bytes),
            WireFormat::Tlv => TlvSerializer.deserialize(bytes),
        }
    }
}
