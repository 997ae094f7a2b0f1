//! RFC 6455 frame encoding and decoding.
//!
//! The frame layer knows nothing about messages. It turns a byte stream into
//! [`Frame`]s and back, handling the three length tiers and client masking.
//!
//! ```text
//!  0               1               2               3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |           (16/64)             |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                 Masking-key, if MASK set to 1                 |
//! +---------------------------------------------------------------+
//! |                         Payload Data                          |
//! +---------------------------------------------------------------+
//! ```

use bytes::{Buf, BufMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::FrameError;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const OPCODE_MASK: u8 = 0x0F;
const LEN_MASK: u8 = 0x7F;

/// 7-bit length value announcing a 16-bit extended length.
const LEN_16_SENTINEL: u8 = 126;
/// 7-bit length value announcing a 64-bit extended length.
const LEN_64_SENTINEL: u8 = 127;

/// Largest payload that fits the inline 7-bit length.
pub const MAX_INLINE_LEN: u64 = 125;
/// Largest payload that fits the 16-bit extended length.
pub const MAX_LEN_16: u64 = u16::MAX as u64;

/// Frame opcode (low four bits of the first header byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Any of the reserved opcodes 0x3-0x7 and 0xB-0xF.
    Reserved(u8),
}

impl Opcode {
    pub fn from_u8(value: u8) -> Self {
        match value & OPCODE_MASK {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
            Self::Reserved(value) => value & OPCODE_MASK,
        }
    }

    /// Control frames are close, ping, and pong.
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// One transport frame.
///
/// After [`read_frame`] the payload is already unmasked; `mask_key` records
/// the key that was on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub masked: bool,
    pub payload_len: u64,
    pub mask_key: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

/// What the session loop should do with a decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame; the payload goes to the message codec.
    Text(Vec<u8>),
    /// A ping; answer with a pong carrying the same bytes.
    Ping(Vec<u8>),
    /// A close frame; the session ends.
    Close,
    /// Binary, pong, continuation, and reserved frames are skipped.
    Skipped(Opcode),
}

impl Frame {
    /// A final, unmasked frame.
    pub fn new(opcode: Opcode, payload: Vec<u8>) -> Self {
        Self {
            fin: true,
            opcode,
            masked: false,
            payload_len: payload.len() as u64,
            mask_key: None,
            payload,
        }
    }

    pub fn text(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Text, payload.into())
    }

    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Pong, payload.into())
    }

    pub fn close() -> Self {
        Self::new(Opcode::Close, Vec::new())
    }

    /// Marks the frame as client-to-server with the given mask key.
    pub fn with_mask(mut self, key: [u8; 4]) -> Self {
        self.masked = true;
        self.mask_key = Some(key);
        self
    }

    /// Serializes the frame. The stored payload is plaintext and is masked
    /// on the way out when a mask key is set.
    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len() as u64;
        let mut out = Vec::with_capacity(self.payload.len() + 14);

        let fin = if self.fin { FIN_BIT } else { 0 };
        out.put_u8(fin | self.opcode.as_u8());

        let mask = if self.mask_key.is_some() { MASK_BIT } else { 0 };
        if len <= MAX_INLINE_LEN {
            out.put_u8(mask | len as u8);
        } else if len <= MAX_LEN_16 {
            out.put_u8(mask | LEN_16_SENTINEL);
            out.put_u16(len as u16);
        } else {
            out.put_u8(mask | LEN_64_SENTINEL);
            out.put_u64(len);
        }

        match self.mask_key {
            Some(key) => {
                out.put_slice(&key);
                let start = out.len();
                out.put_slice(&self.payload);
                apply_mask(&mut out[start..], key);
            }
            None => out.put_slice(&self.payload),
        }
        out
    }

    pub fn into_inbound(self) -> Inbound {
        match self.opcode {
            Opcode::Text => Inbound::Text(self.payload),
            Opcode::Ping => Inbound::Ping(self.payload),
            Opcode::Close => Inbound::Close,
            other => Inbound::Skipped(other),
        }
    }
}

/// Encodes a final, unmasked text frame, the only data frame the server sends.
pub fn encode_text(payload: &[u8]) -> Vec<u8> {
    Frame::text(payload).encode()
}

/// XORs `data` in place with the repeating four-byte key.
///
/// Masking is its own inverse, so the same call masks and unmasks.
pub fn apply_mask(data: &mut [u8], key: [u8; 4]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Reads one frame from `reader`.
///
/// Returns `Ok(None)` when the stream ends, including in the middle of a
/// frame: a peer that hangs up mid-frame is a closed connection, not a
/// protocol violation.
pub async fn read_frame<R>(
    reader: &mut R,
    max_payload: u64,
) -> Result<Option<Frame>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    if !read_full(reader, &mut header).await? {
        return Ok(None);
    }

    let fin = header[0] & FIN_BIT != 0;
    let opcode = Opcode::from_u8(header[0]);
    let masked = header[1] & MASK_BIT != 0;

    let payload_len = match header[1] & LEN_MASK {
        LEN_16_SENTINEL => {
            let mut ext = [0u8; 2];
            if !read_full(reader, &mut ext).await? {
                return Ok(None);
            }
            u64::from((&ext[..]).get_u16())
        }
        LEN_64_SENTINEL => {
            let mut ext = [0u8; 8];
            if !read_full(reader, &mut ext).await? {
                return Ok(None);
            }
            let len = (&ext[..]).get_u64();
            if len >> 63 != 0 {
                return Err(FrameError::InvalidLength(len));
            }
            len
        }
        inline => u64::from(inline),
    };

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            len: payload_len,
            max: max_payload,
        });
    }

    let mask_key = if masked {
        let mut key = [0u8; 4];
        if !read_full(reader, &mut key).await? {
            return Ok(None);
        }
        Some(key)
    } else {
        None
    };

    let len = usize::try_from(payload_len)
        .map_err(|_| FrameError::PayloadTooLarge { len: payload_len, max: max_payload })?;
    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload).await? {
        return Ok(None);
    }
    if let Some(key) = mask_key {
        apply_mask(&mut payload, key);
    }

    Ok(Some(Frame {
        fin,
        opcode,
        masked,
        payload_len,
        mask_key,
        payload,
    }))
}

/// Fills `buf` completely. `Ok(false)` means the stream hit EOF first.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<bool, FrameError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(FrameError::Io(e)),
    }
}
