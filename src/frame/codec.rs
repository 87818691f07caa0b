//! Tokio codec for HDLC framing.
//!
//! Adapts the raw streaming codec to `tokio_util::codec` so the framing
//! layer can be used on its own over any `AsyncRead + AsyncWrite`
//! transport. Unlike the link layer, which treats corrupt frames as
//! silence, the standalone adapter surfaces them: decode failures come
//! back as [`Error::Frame`](crate::Error::Frame) and transport failures
//! as [`Error::Io`](crate::Error::Io). The decoder has already
//! resynchronized when an error is returned, so callers may keep
//! reading.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::error::Error;
use crate::types::CrcType;

use super::decoder::{Decoded, FrameDecoder};
use super::encoder::encode_bytes;
use super::{Control, Frame};

/// Tokio codec for link frames.
pub struct FrameCodec {
    crc_type: CrcType,
    decoder: FrameDecoder,
}

impl FrameCodec {
    /// Create a codec sized for `mtu`-byte payloads.
    pub fn new(crc_type: CrcType, mtu: usize) -> Self {
        Self {
            crc_type,
            decoder: FrameDecoder::new(crc_type, mtu),
        }
    }

    /// Wrap an async byte transport into a framed stream/sink.
    pub fn wrap<T>(self, io: T) -> Framed<T, FrameCodec>
    where
        T: AsyncRead + AsyncWrite,
    {
        Framed::new(io, self)
    }
}

impl tokio_util::codec::Encoder<&Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: &Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = encode_bytes(self.crc_type, frame.control, &frame.payload);
        dst.reserve(bytes.len());
        dst.put_slice(&bytes);
        Ok(())
    }
}

impl tokio_util::codec::Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while !src.is_empty() {
            let (consumed, event) = self.decoder.feed(&src[..]);
            src.advance(consumed);

            match event {
                Some(Decoded::Frame) => {
                    let (_, control, payload) = self.decoder.frame();
                    let control = Control::decode(control)?;
                    return Ok(Some(Frame {
                        control,
                        payload: payload.to_vec(),
                    }));
                }
                Some(Decoded::Discarded(e)) => return Err(e.into()),
                None => break,
            }
        }
        Ok(None)
    }
}
