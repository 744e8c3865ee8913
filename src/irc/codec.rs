/// IRC line codec — frames a TCP byte stream into text lines.
///
/// Inbound lines are split on `\n` with any trailing `\r` removed, so both
/// RFC 2812 `\r\n` and bare-newline servers work. Outgoing [`Outbound`]
/// messages are serialized with `\r\n` termination.
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::Outbound;

/// Maximum line length (including the terminator).
/// RFC 2812 says 512 bytes. IRCv3 `message-tags` can push this to 8191.
pub const MAX_LINE_LENGTH: usize = 8191;

/// Codec error: either an oversized line or an I/O error.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_LINE_LENGTH} bytes)")]
    LineTooLong,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A tokio codec that frames newline-delimited IRC lines.
#[derive(Debug, Default)]
pub struct LineCodec;

/// Turn raw line bytes into text, dropping `\r` left over from `\r\n`.
fn decode_line(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    text.trim_end_matches('\r').to_owned()
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src.iter().position(|b| *b == b'\n') {
            Some(pos) => {
                if pos + 1 > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong);
                }
                let line_bytes = src.split_to(pos);
                src.advance(1); // skip \n
                Ok(Some(decode_line(&line_bytes)))
            }
            None => {
                // No complete line yet. Check if buffer is getting too large.
                if src.len() > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong);
                }
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        // Server closed mid-line: hand out what we have.
        if src.is_empty() {
            Ok(None)
        } else {
            let rest = src.split();
            Ok(Some(decode_line(&rest)))
        }
    }
}

impl Encoder<Outbound> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Outbound, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.to_wire();
        dst.reserve(wire.len() + 2);
        dst.put_slice(wire.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
