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

//! Length-prefixed message framing.
//!
//! Every message on a connection is a frame: a 4-byte big-endian length
//! followed by that many payload bytes.
//!
//! ```text
//! +------------------+------------------+
//! | Length (4 bytes) | Payload (N bytes)|
//! +------------------+------------------+
//! ```
//!
//! A request or response is two adjacent frames, header then body; the
//! codec layer guarantees the pair is written as one unit.

use crate::codec::CodecError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (16 MB). Bounds per-message allocation on reads.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Size of the frame length prefix in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Appends a length-prefixed frame to a buffer.
///
/// # Errors
///
/// Returns [`CodecError::Oversize`] if the payload exceeds
/// [`MAX_FRAME_SIZE`].
pub fn put_frame(buf: &mut Vec<u8>, payload: &[u8]) -> Result<(), CodecError> {
    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(CodecError::Oversize {
            size: payload.len(),
            max: MAX_FRAME_SIZE as usize,
        });
    }
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(())
}

/// Writes a single length-prefixed frame to an async writer and flushes.
///
/// Used for the handshake prelude; request/response frames go through the
/// codec so a header and its body share one write.
///
/// # Errors
///
/// Returns [`CodecError::Oversize`] for oversized payloads and
/// [`CodecError::Write`] for I/O failures.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    put_frame(&mut buf, payload)?;
    writer
        .write_all(&buf)
        .await
        .map_err(|source| CodecError::Write { source })?;
    writer
        .flush()
        .await
        .map_err(|source| CodecError::Write { source })?;
    Ok(())
}

/// Reads a single length-prefixed frame from an async reader.
///
/// # Errors
///
/// Returns [`CodecError::Read`] for I/O failures (including EOF, which
/// callers can distinguish with [`CodecError::is_eof`]) and
/// [`CodecError::Oversize`] if the prefix exceeds [`MAX_FRAME_SIZE`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; FRAME_HEADER_SIZE];
    reader
        .read_exact(&mut len_bytes)
        .await
        .map_err(|source| CodecError::Read { source })?;

    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_SIZE {
        return Err(CodecError::Oversize {
            size: len as usize,
            max: MAX_FRAME_SIZE as usize,
        });
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|source| CodecError::Read { source })?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_frame() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"Hello, world!").await.unwrap();

        let mut reader = &buffer[..];
        let decoded = read_frame(&mut reader).await.unwrap();
        assert_eq!(decoded, b"Hello, world!");
    }

    #[tokio::test]
    async fn test_empty_frame() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, b"").await.unwrap();

        let mut reader = &buffer[..];
        let decoded = read_frame(&mut reader).await.unwrap();
        assert!(decoded.is_empty());
    }

    #[tokio::test]
    async fn test_multiple_frames_stay_aligned() {
        let mut buffer = Vec::new();
        let messages: [&[u8]; 3] = [b"first", b"second", b"third"];
        for msg in &messages {
            write_frame(&mut buffer, msg).await.unwrap();
        }

        let mut reader = &buffer[..];
        for expected in &messages {
            let decoded = read_frame(&mut reader).await.unwrap();
            assert_eq!(&decoded[..], *expected);
        }
    }

    #[tokio::test]
    async fn test_oversize_write_rejected() {
        let payload = vec![0u8; (MAX_FRAME_SIZE + 1) as usize];
        let mut buffer = Vec::new();
        let result = write_frame(&mut buffer, &payload).await;
        assert!(matches!(result, Err(CodecError::Oversize { .. })));
    }

    #[tokio::test]
    async fn test_oversize_read_rejected() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&(MAX_FRAME_SIZE + 1).to_be_bytes());

        let mut reader = &buffer[..];
        let result = read_frame(&mut reader).await;
        assert!(matches!(result, Err(CodecError::Oversize { .. })));
    }

    #[tokio::test]
    async fn test_truncated_frame() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&10u32.to_be_bytes());
        buffer.extend_from_slice(b"short");

        let mut reader = &buffer[..];
        let result = read_frame(&mut reader).await;
        assert!(matches!(result, Err(CodecError::Read { .. })));
    }

    #[tokio::test]
    async fn test_eof_detection() {
        let mut reader: &[u8] = &[];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(err.is_eof());
    }
}
