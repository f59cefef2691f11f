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

//! Serialization trait definitions.

use crate::serialization::{DeserializationError, SerializationError};

/// Trait for serializing and deserializing values.
///
/// The `Serializer` trait is the pluggable seam between the framed wire
/// layer and a concrete encoding. Implementations must be thread-safe;
/// they are shared across the receive loop and concurrent senders.
///
/// # Examples
///
/// ```rust
/// use wirecall::serialization::{PostcardSerializer, Serializer};
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Serialize, Deserialize, Debug, PartialEq)]
/// struct Message {
///     id: u32,
///     text: String,
/// }
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let serializer = PostcardSerializer::default();
/// let message = Message { id: 42, text: "Hello".to_string() };
///
/// let bytes = serializer.serialize(&message)?;
/// let decoded: Message = serializer.deserialize(&bytes)?;
/// assert_eq!(message, decoded);
/// # Ok(())
/// # }
/// ```
pub trait Serializer: Send + Sync + 'static {
    /// Serializes a value to bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`SerializationError`] if the value cannot be represented
    /// in this format.
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, SerializationError>
    where
        T: serde::Serialize + ?Sized;

    /// Deserializes a value from bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`DeserializationError`] if the bytes are not a valid
    /// encoding of `T` in this format.
    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, DeserializationError>
    where
        T: serde::de::DeserializeOwned;

    /// Returns the wire name of this serialization format.
    ///
    /// This is the name carried in the connection prelude during codec
    /// negotiation.
    fn name(&self) -> &'static str;
}
