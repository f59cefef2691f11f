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

//! Connection options and the handshake prelude.
//!
//! The first bytes on every connection are a JSON frame carrying
//! [`Options`]: the protocol magic, the codec name for all following
//! frames, and the negotiated timeouts. The server echoes the prelude back
//! before any codec-framed traffic; the options are never re-negotiated.

use crate::codec::framing;
use crate::codec::CodecError;
use crate::serialization::{JSON_FORMAT, JsonSerializer, Serializer};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// Protocol magic number carried in every prelude. A connection whose
/// prelude carries anything else is dropped.
pub const MAGIC: u32 = 0x3bef5c;

/// Default connection establishment timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-connection options exchanged in the handshake prelude.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Protocol magic; must equal [`MAGIC`].
    pub magic: u32,
    /// Wire name of the codec for all frames after the prelude.
    pub codec: String,
    /// Bound on connection establishment (TCP connect plus client
    /// construction). Zero disables the bound.
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
    /// Server-side bound on a single method invocation. Zero disables the
    /// bound.
    #[serde(with = "duration_millis")]
    pub handle_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            codec: JSON_FORMAT.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handle_timeout: Duration::ZERO,
        }
    }
}

impl Options {
    /// Creates default options with the given codec name.
    pub fn with_codec(codec: impl Into<String>) -> Self {
        Self {
            codec: codec.into(),
            ..Self::default()
        }
    }

    /// Returns a normalized copy: the magic is pinned and an empty codec
    /// name falls back to the default. Dialing always normalizes its own
    /// copy, so option values are never shared or mutated across dials.
    pub fn normalized(mut self) -> Self {
        self.magic = MAGIC;
        if self.codec.is_empty() {
            self.codec = JSON_FORMAT.to_string();
        }
        self
    }
}

/// Writes the prelude as a JSON frame.
pub async fn write_prelude<W>(writer: &mut W, options: &Options) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let payload = JsonSerializer
        .serialize(options)
        .map_err(|source| CodecError::HeaderEncode { source })?;
    framing::write_frame(writer, &payload).await
}

/// Reads the prelude from a JSON frame.
pub async fn read_prelude<R>(reader: &mut R) -> Result<Options, CodecError>
where
    R: AsyncRead + Unpin,
{
    let payload = framing::read_frame(reader).await?;
    JsonSerializer
        .deserialize(&payload)
        .map_err(|source| CodecError::HeaderDecode { source })
}

mod duration_millis {
    //! Durations travel as integer milliseconds.

    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.magic, MAGIC);
        assert_eq!(options.codec, "json");
        assert_eq!(options.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(options.handle_timeout, Duration::ZERO);
    }

    #[test]
    fn test_normalized_fills_empty_codec() {
        let options = Options {
            magic: 0,
            codec: String::new(),
            connect_timeout: Duration::from_secs(1),
            handle_timeout: Duration::ZERO,
        }
        .normalized();
        assert_eq!(options.magic, MAGIC);
        assert_eq!(options.codec, "json");
        assert_eq!(options.connect_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_prelude_round_trip() {
        let options = Options::with_codec("postcard");
        let mut buffer = Vec::new();
        write_prelude(&mut buffer, &options).await.unwrap();

        let mut reader = &buffer[..];
        let decoded = read_prelude(&mut reader).await.unwrap();
        assert_eq!(decoded, options);
    }

    #[test]
    fn test_duration_serialized_as_millis() {
        let options = Options {
            connect_timeout: Duration::from_millis(1500),
            ..Options::default()
        };
        let json = serde_json::to_string(&options).unwrap();
        assert!(json.contains("\"connect_timeout\":1500"));
    }
}
