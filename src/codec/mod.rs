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

//! Framed message codecs.
//!
//! A codec owns a duplex byte stream and moves `{header, body}` message
//! pairs across it. The header is a small fixed-shape struct encoded with
//! the connection's negotiated [`WireFormat`]; bodies are opaque byte
//! strings the caller encodes and decodes with the same format.
//!
//! Per connection the wire carries, in order: a JSON-framed [`Options`]
//! prelude, the server's echo of that prelude, then any number of framed
//! header/body pairs.

pub mod framed;
pub mod framing;
pub mod options;

pub use framed::FramedCodec;
pub use options::{DEFAULT_CONNECT_TIMEOUT, MAGIC, Options};

use crate::serialization::{DeserializationError, SerializationError, WireFormat};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Message header, one per request and one per reply.
///
/// `error` is empty on client-originated frames and on successful server
/// replies; a failed reply carries the failure text here and a placeholder
/// body.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Qualified `Service.Method` name being invoked.
    pub service_method: String,
    /// Request sequence number; pairs replies with in-flight calls.
    pub seq: u64,
    /// Error text for failed replies, empty otherwise.
    pub error: String,
}

impl Header {
    /// Creates a request header for the given method and sequence number.
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }
}

/// Errors produced by the codec layer.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Reading from the underlying stream failed (including EOF).
    #[error("read failed: {source}")]
    Read {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Writing to the underlying stream failed; the stream has been shut
    /// down.
    #[error("write failed: {source}")]
    Write {
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A frame exceeded the maximum allowed size.
    #[error("frame size {size} exceeds maximum allowed size {max}")]
    Oversize {
        /// Observed frame size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },

    /// A header frame could not be decoded in the negotiated format.
    #[error("header decode failed: {source}")]
    HeaderDecode {
        /// The underlying decode error.
        #[source]
        source: DeserializationError,
    },

    /// A header could not be encoded in the negotiated format.
    #[error("header encode failed: {source}")]
    HeaderEncode {
        /// The underlying encode error.
        #[source]
        source: SerializationError,
    },
}

impl CodecError {
    /// Returns `true` if this error is an end-of-stream condition.
    ///
    /// The server treats EOF on a header read as a clean shutdown rather
    /// than a fault worth logging.
    pub fn is_eof(&self) -> bool {
        matches!(
            self,
            CodecError::Read { source } if source.kind() == io::ErrorKind::UnexpectedEof
        )
    }
}

/// Bidirectional framed encoder/decoder over a byte stream.
///
/// Implementations must serialize concurrent `write` calls internally so a
/// header frame and its body frame are adjacent on the wire; this lock is
/// also the server's per-connection send mutex. Reads are only issued from
/// a single task (the receive or serve loop).
#[async_trait]
pub trait Codec: Send + Sync {
    /// Returns the negotiated wire format for typed body encode/decode.
    fn format(&self) -> WireFormat;

    /// Reads the next message header.
    async fn read_header(&self) -> Result<Header, CodecError>;

    /// Reads the next message body as raw bytes.
    async fn read_body(&self) -> Result<Vec<u8>, CodecError>;

    /// Writes a header and body as one atomic unit and flushes.
    ///
    /// On any write error the underlying stream is shut down before the
    /// error is returned.
    async fn write(&self, header: &Header, body: &[u8]) -> Result<(), CodecError>;

    /// Shuts the write side of the stream down.
    async fn close(&self) -> Result<(), CodecError>;
}
