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

//! The framed codec implementation.

use crate::codec::framing::{self, FRAME_HEADER_SIZE};
use crate::codec::{Codec, CodecError, Header};
use crate::serialization::WireFormat;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

/// Framed codec over a split byte stream.
///
/// The read half sits behind its own lock and is only touched by the
/// owning receive/serve loop; the write half's lock is the per-connection
/// send mutex. `write` assembles the header frame and body frame into one
/// buffer and issues a single write+flush, so the pair can never interleave
/// with another request on the same connection.
pub struct FramedCodec<R, W> {
    format: WireFormat,
    reader: Mutex<BufReader<R>>,
    writer: Mutex<W>,
}

impl<R, W> FramedCodec<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a codec over the two halves of a connection.
    pub fn new(format: WireFormat, reader: R, writer: W) -> Self {
        Self {
            format,
            reader: Mutex::new(BufReader::new(reader)),
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<R, W> Codec for FramedCodec<R, W>
where
    R: AsyncRead + Unpin + Send + Sync,
    W: AsyncWrite + Unpin + Send + Sync,
{
    fn format(&self) -> WireFormat {
        self.format
    }

    async fn read_header(&self) -> Result<Header, CodecError> {
        let mut reader = self.reader.lock().await;
        let frame = framing::read_frame(&mut *reader).await?;
        self.format
            .from_slice(&frame)
            .map_err(|source| CodecError::HeaderDecode { source })
    }

    async fn read_body(&self) -> Result<Vec<u8>, CodecError> {
        let mut reader = self.reader.lock().await;
        framing::read_frame(&mut *reader).await
    }

    async fn write(&self, header: &Header, body: &[u8]) -> Result<(), CodecError> {
        let header_bytes = self
            .format
            .to_vec(header)
            .map_err(|source| CodecError::HeaderEncode { source })?;

        let mut buf =
            Vec::with_capacity(2 * FRAME_HEADER_SIZE + header_bytes.len() + body.len());
        framing::put_frame(&mut buf, &header_bytes)?;
        framing::put_frame(&mut buf, body)?;

        let mut writer = self.writer.lock().await;
        let result = async {
            writer
                .write_all(&buf)
                .await
                .map_err(|source| CodecError::Write { source })?;
            writer
                .flush()
                .await
                .map_err(|source| CodecError::Write { source })
        }
        .await;

        if result.is_err() {
            // A half-written frame leaves the stream unusable.
            let _ = writer.shutdown().await;
        }
        result
    }

    async fn close(&self) -> Result<(), CodecError> {
        let mut writer = self.writer.lock().await;
        writer
            .shutdown()
            .await
            .map_err(|source| CodecError::Write { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pair() -> (
        FramedCodec<tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>>,
        FramedCodec<tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>>,
    ) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        (
            FramedCodec::new(WireFormat::Json, ar, aw),
            FramedCodec::new(WireFormat::Json, br, bw),
        )
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (client, server) = pair();
        let header = Header::request("Echo.Say", 1);
        client.write(&header, b"\"hello\"").await.unwrap();

        let received = server.read_header().await.unwrap();
        assert_eq!(received, header);
        let body = server.read_body().await.unwrap();
        assert_eq!(body, b"\"hello\"");
    }

    #[tokio::test]
    async fn test_header_body_pairs_never_interleave() {
        let (client, server) = pair();
        let client = Arc::new(client);

        let mut handles = Vec::new();
        for seq in 1..=16u64 {
            let client = Arc::clone(&client);
            handles.push(tokio::spawn(async move {
                let header = Header::request("Echo.Say", seq);
                let body = client.format().to_vec(&format!("payload-{seq}")).unwrap();
                client.write(&header, &body).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Every header must be immediately followed by its own body.
        for _ in 0..16 {
            let header = server.read_header().await.unwrap();
            let body: String = server
                .format()
                .from_slice(&server.read_body().await.unwrap())
                .unwrap();
            assert_eq!(body, format!("payload-{}", header.seq));
        }
    }

    #[tokio::test]
    async fn test_eof_after_peer_close() {
        let (client, server) = pair();
        client.close().await.unwrap();
        drop(client);

        let err = server.read_header().await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn test_format_accessor() {
        let (client, _server) = pair();
        assert_eq!(client.format(), WireFormat::Json);
    }
}
