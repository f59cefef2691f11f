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

//! JSON serializer implementation.
//!
//! JSON is the crate's self-describing format: a receiver can decode a
//! JSON frame without prior knowledge of the sender's schema, which is why
//! the connection prelude is always encoded with it regardless of the
//! codec negotiated for the request/response frames that follow.

use crate::serialization::{DeserializationError, SerializationError, Serializer};

/// JSON serializer.
///
/// Human-readable and self-describing. Slower and larger on the wire than
/// the binary formats, but invaluable for debugging and required for the
/// handshake prelude.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    /// Creates a new JSON serializer.
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for JsonSerializer {
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, SerializationError>
    where
        T: serde::Serialize + ?Sized,
    {
        serde_json::to_vec(value).map_err(Into::into)
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, DeserializationError>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(bytes).map_err(Into::into)
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
