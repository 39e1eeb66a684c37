//! Command encoder and incremental frame decoder.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::domain::Command;
use crate::error::ProbeError;

/// Size of the big-endian length prefix of a framed message.
pub const FRAME_HEADER_LEN: usize = 4;

/// Body length of every framed message: code plus backward port.
pub const FRAME_BODY_LEN: u32 = 3;

/// How commands are laid out on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// One octet per message.
    #[default]
    Byte,
    /// Seven octets per message, see the [module docs](super).
    Framed,
}

impl Encoding {
    /// Encodes `command` for the wire.
    ///
    /// `backward_port` is only carried by [`Encoding::Framed`].
    #[must_use]
    pub fn encode(self, command: Command, backward_port: u16) -> Bytes {
        match self {
            Self::Byte => Bytes::copy_from_slice(&[command.code()]),
            Self::Framed => {
                let mut buf = BytesMut::with_capacity(self.message_len());
                buf.put_u32(FRAME_BODY_LEN);
                buf.put_u8(command.code());
                buf.put_u16(backward_port);
                buf.freeze()
            }
        }
    }

    /// Number of octets one encoded message occupies.
    #[must_use]
    pub const fn message_len(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Framed => FRAME_HEADER_LEN + FRAME_BODY_LEN as usize,
        }
    }
}

impl FromStr for Encoding {
    type Err = ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "byte" => Ok(Self::Byte),
            "framed" => Ok(Self::Framed),
            _ => Err(ProbeError::UnknownEncoding(s.to_string())),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Byte => "byte",
            Self::Framed => "framed",
        })
    }
}

/// A decoded command message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// The command carried by the message.
    pub command: Command,
    /// Backward port advertised by the sender (0 for byte encoding).
    pub backward_port: u16,
}

/// Reassembles command messages from arbitrarily split input.
///
/// Feed received bytes with [`FrameDecoder::push`], then drain complete
/// messages with [`FrameDecoder::next_frame`] until it returns `None`.
#[derive(Debug)]
pub struct FrameDecoder {
    encoding: Encoding,
    buf: BytesMut,
}

impl FrameDecoder {
    /// Creates an empty decoder for `encoding`.
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            buf: BytesMut::with_capacity(64),
        }
    }

    /// Appends received bytes to the internal buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decodes the next complete message.
    ///
    /// Returns `None` when more input is needed. An unknown command code
    /// consumes its message and yields an error; decoding can continue.
    /// A framed length other than 3 clears the buffer, since there is no
    /// delimiter to resynchronise on.
    pub fn next_frame(&mut self) -> Option<Result<Frame, ProbeError>> {
        match self.encoding {
            Encoding::Byte => {
                if self.buf.is_empty() {
                    return None;
                }
                let code = self.buf.get_u8();
                Some(Command::try_from(code).map(|command| Frame {
                    command,
                    backward_port: 0,
                }))
            }
            Encoding::Framed => {
                if self.buf.len() < FRAME_HEADER_LEN {
                    return None;
                }
                let mut header: &[u8] = self.buf.as_ref();
                let body_len = header.get_u32();
                if body_len != FRAME_BODY_LEN {
                    self.buf.clear();
                    return Some(Err(ProbeError::Frame(format!(
                        "unexpected frame length {body_len}"
                    ))));
                }
                if self.buf.len() < self.encoding.message_len() {
                    return None;
                }
                self.buf.advance(FRAME_HEADER_LEN);
                let code = self.buf.get_u8();
                let backward_port = self.buf.get_u16();
                Some(Command::try_from(code).map(|command| Frame {
                    command,
                    backward_port,
                }))
            }
        }
    }
}
