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

//! Postcard serializer implementation.
//!
//! Postcard is a compact, non-self-describing binary format. It is the
//! recommended codec when both endpoints run this crate and throughput
//! matters more than wire-level inspectability.

use crate::serialization::{DeserializationError, SerializationError, Serializer};

/// Postcard (compact binary) serializer.
#[derive(Clone, Copy, Debug, Default)]
pub struct PostcardSerializer;

impl PostcardSerializer {
    /// Creates a new postcard serializer.
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for PostcardSerializer {
    fn serialize<T>(&self, value: &T) -> Result<Vec<u8>, SerializationError>
    where
        T: serde::Serialize + ?Sized,
    {
        postcard::to_allocvec(value)
            .map_err(|e| SerializationError::with_source("postcard serialization failed", e))
    }

    fn deserialize<T>(&self, bytes: &[u8]) -> Result<T, DeserializationError>
    where
        T: serde::de::DeserializeOwned,
    {
        postcard::from_bytes(bytes)
            .map_err(|e| DeserializationError::with_source("postcard deserialization failed", e))
    }

    fn name(&self) -> &'static str {
        "postcard"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct TestMessage {
        id: u32,
        text: String,
        values: Vec<i32>,
    }

    #[test]
    fn test_postcard_round_trip() {
        let serializer = PostcardSerializer::default();
        let message = TestMessage {
            id: 42,
            text: "Hello, world!".to_string(),
            values: vec![1, 2, 3, 4, 5],
        };

        let bytes = serializer.serialize(&message).unwrap();
        let decoded: TestMessage = serializer.deserialize(&bytes).unwrap();

        assert_eq!(message, decoded);
    }

    #[test]
    fn test_postcard_smaller_than_json() {
        use crate::serialization::JsonSerializer;

        let message = TestMessage {
            id: 7,
            text: "compactness".to_string(),
            values: vec![1, 2, 3],
        };

        let compact = PostcardSerializer::default().serialize(&message).unwrap();
        let json = JsonSerializer::default().serialize(&message).unwrap();
        assert!(compact.len() < json.len());
    }

    #[test]
    fn test_postcard_truncated_input() {
        let serializer = PostcardSerializer::default();
        let message = TestMessage {
            id: 9,
            text: "truncate me".to_string(),
            values: vec![1],
        };

        let bytes = serializer.serialize(&message).unwrap();
        let result: Result<TestMessage, _> = serializer.deserialize(&bytes[..bytes.len() / 2]);
        assert!(result.is_err());
    }

    #[test]
    fn test_postcard_name() {
        assert_eq!(PostcardSerializer::default().name(), "postcard");
    }
}
