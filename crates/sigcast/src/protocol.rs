// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Signal wire protocol.
//!
//! Every message on the wire is a frame: a fixed 8-byte header followed by a
//! payload. All integers are big-endian (network byte order).
//!
//! ```text
//! +----------------+-------------+----------+----------------+-------------+
//! | Signature (2B) | Version (1B)| Kind (1B)| Length (4B BE) | Payload ... |
//! +----------------+-------------+----------+----------------+-------------+
//! ```
//!
//! Frame kinds:
//! - `0x01` subscribe (client to server): payload is exactly one filter byte.
//! - `0x02` data (server to client): payload is zero or more 13-byte records,
//!   `id: u32 BE | kind: u8 | value: f64 bits BE`.
//! - `0x03` alive (server to client): empty payload, accepted and ignored.
//!
//! A frame is a whole unit: a reader consumes a complete frame or fails the
//! connection. Frames whose declared payload exceeds [`MAX_PAYLOAD_LEN`] are
//! refused before the payload is read.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Header signature, first two bytes of every frame.
pub const SIGNATURE: u16 = 0xAA55;

/// Protocol version carried in every header.
pub const VERSION: u8 = 1;

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 8;

/// Size of one data record in bytes (id + kind + value).
pub const RECORD_LEN: usize = 13;

/// Maximum accepted payload size. Larger frames close the connection.
pub const MAX_PAYLOAD_LEN: usize = 10 * 1024 * 1024;

/// Protocol error types.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("bad signature: 0x{0:04x}")]
    BadSignature(u16),

    #[error("unsupported version: {0}")]
    BadVersion(u8),

    #[error("unknown frame kind: 0x{0:02x}")]
    UnknownFrameKind(u8),

    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: u32, max: usize },

    #[error("invalid signal kind bits: 0b{0:02b}")]
    InvalidSignalKind(u8),

    #[error("subscribe payload empty")]
    EmptySubscribe,

    #[error("truncated data record: {0} trailing bytes")]
    TruncatedRecord(usize),

    #[error("connection closed mid-frame")]
    ShortRead,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Frame kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Client requests a subscription (one filter byte).
    Subscribe = 0x01,
    /// Server pushes signal records.
    Data = 0x02,
    /// Server keep-alive, no payload.
    Alive = 0x03,
}

impl FrameKind {
    pub fn from_byte(b: u8) -> Result<Self, ProtocolError> {
        match b {
            0x01 => Ok(Self::Subscribe),
            0x02 => Ok(Self::Data),
            0x03 => Ok(Self::Alive),
            other => Err(ProtocolError::UnknownFrameKind(other)),
        }
    }
}

/// Signal kind, transmitted as a one-hot bitflag byte so subscription
/// filters are plain bitmasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SignalKind {
    Discrete = 0b01,
    Analog = 0b10,
}

impl SignalKind {
    /// Flag bit for this kind. Exactly one bit is ever set.
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte. Zero, multiple bits, or unknown bits are invalid.
    pub fn from_bits(bits: u8) -> Result<Self, ProtocolError> {
        match bits {
            0b01 => Ok(Self::Discrete),
            0b10 => Ok(Self::Analog),
            other => Err(ProtocolError::InvalidSignalKind(other)),
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discrete => write!(f, "discrete"),
            Self::Analog => write!(f, "analog"),
        }
    }
}

impl Serialize for SignalKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Discrete => serializer.serialize_str("discrete"),
            Self::Analog => serializer.serialize_str("analog"),
        }
    }
}

impl<'de> Deserialize<'de> for SignalKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "discrete" => Ok(Self::Discrete),
            "analog" => Ok(Self::Analog),
            other => Err(serde::de::Error::custom(format!(
                "unknown signal kind: {other:?} (expected \"discrete\" or \"analog\")"
            ))),
        }
    }
}

/// Subscription filter: a bitmask over [`SignalKind`] flags.
///
/// The byte is carried verbatim in the subscribe payload; a signal passes
/// the filter when its kind bit is set in the mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalFilter(u8);

impl SignalFilter {
    pub const DISCRETE: Self = Self(SignalKind::Discrete as u8);
    pub const ANALOG: Self = Self(SignalKind::Analog as u8);
    pub const ALL: Self = Self(0b11);

    /// Build a filter from a raw mask byte.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn matches(self, kind: SignalKind) -> bool {
        self.0 & kind.bits() != 0
    }
}

impl Default for SignalFilter {
    fn default() -> Self {
        Self::ALL
    }
}

impl std::fmt::Display for SignalFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0b{:02b}", self.0)
    }
}

impl Serialize for SignalFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.0)
    }
}

impl<'de> Deserialize<'de> for SignalFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self(u8::deserialize(deserializer)?))
    }
}

/// An id-tagged, kind-tagged, timestamped scalar.
///
/// The timestamp is monotonic (see [`monotonic_now`]) and never crosses the
/// wire; it exists to order racing writes to the same id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal {
    pub id: u32,
    pub kind: SignalKind,
    pub value: f64,
    pub ts: Duration,
}

impl Signal {
    pub fn new(id: u32, kind: SignalKind, value: f64, ts: Duration) -> Self {
        Self {
            id,
            kind,
            value,
            ts,
        }
    }

    /// Build a signal stamped with the current monotonic time.
    pub fn stamped(id: u32, kind: SignalKind, value: f64) -> Self {
        Self::new(id, kind, value, monotonic_now())
    }
}

/// Monotonic time since the first call in this process.
///
/// Timestamps from this clock are comparable to each other but carry no
/// wall-clock meaning, which is all the write admission rule needs.
pub fn monotonic_now() -> Duration {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed()
}

/// One decoded data record: the wire triple without a timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalRecord {
    pub id: u32,
    pub kind: SignalKind,
    pub value: f64,
}

impl From<&Signal> for SignalRecord {
    fn from(s: &Signal) -> Self {
        Self {
            id: s.id,
            kind: s.kind,
            value: s.value,
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub len: u32,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, len: u32) -> Self {
        Self { kind, len }
    }

    /// Serialize to the 8-byte wire form.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&SIGNATURE.to_be_bytes());
        buf[2] = VERSION;
        buf[3] = self.kind as u8;
        buf[4..8].copy_from_slice(&self.len.to_be_bytes());
        buf
    }

    /// Parse and validate the 8-byte wire form.
    ///
    /// Checks signature, version, and frame kind. The payload length cap is
    /// enforced by the reader (see [`read_frame`]) so that oversize frames
    /// are refused before any payload byte is consumed.
    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        let signature = u16::from_be_bytes([buf[0], buf[1]]);
        if signature != SIGNATURE {
            return Err(ProtocolError::BadSignature(signature));
        }
        if buf[2] != VERSION {
            return Err(ProtocolError::BadVersion(buf[2]));
        }
        let kind = FrameKind::from_byte(buf[3])?;
        let len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Ok(Self { kind, len })
    }
}

/// Encode a subscribe frame carrying the filter byte.
pub fn encode_subscribe(filter: SignalFilter) -> Vec<u8> {
    let header = FrameHeader::new(FrameKind::Subscribe, 1);
    let mut frame = Vec::with_capacity(HEADER_LEN + 1);
    frame.extend_from_slice(&header.encode());
    frame.push(filter.bits());
    frame
}

/// Encode a data frame from a batch of signals.
pub fn encode_data<'a, I>(signals: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a Signal>,
{
    let mut payload = Vec::new();
    for s in signals {
        encode_record(s, &mut payload);
    }
    let header = FrameHeader::new(FrameKind::Data, payload.len() as u32);
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(&payload);
    frame
}

/// Encode an alive frame (empty payload).
pub fn encode_alive() -> [u8; HEADER_LEN] {
    FrameHeader::new(FrameKind::Alive, 0).encode()
}

fn encode_record(s: &Signal, out: &mut Vec<u8>) {
    out.extend_from_slice(&s.id.to_be_bytes());
    out.push(s.kind.bits());
    out.extend_from_slice(&s.value.to_bits().to_be_bytes());
}

/// Decode a data payload into records.
///
/// The payload must be an exact multiple of [`RECORD_LEN`]; trailing bytes
/// reject the whole frame.
pub fn decode_records(payload: &[u8]) -> Result<Vec<SignalRecord>, ProtocolError> {
    let trailing = payload.len() % RECORD_LEN;
    if trailing != 0 {
        return Err(ProtocolError::TruncatedRecord(trailing));
    }

    let mut records = Vec::with_capacity(payload.len() / RECORD_LEN);
    for chunk in payload.chunks_exact(RECORD_LEN) {
        let id = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let kind = SignalKind::from_bits(chunk[4])?;
        let bits = u64::from_be_bytes([
            chunk[5], chunk[6], chunk[7], chunk[8], chunk[9], chunk[10], chunk[11], chunk[12],
        ]);
        records.push(SignalRecord {
            id,
            kind,
            value: f64::from_bits(bits),
        });
    }
    Ok(records)
}

/// Read one whole frame from the stream.
///
/// Returns `Ok(None)` when the peer closed the connection at a frame
/// boundary. A close mid-frame, a header that fails validation, or a
/// payload length above `max_payload` is an error; the caller is expected
/// to drop the connection.
pub async fn read_frame<R>(
    reader: &mut R,
    max_payload: usize,
) -> Result<Option<(FrameHeader, Vec<u8>)>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Ok(None);
        }
        Err(e) => return Err(ProtocolError::Io(e)),
    }

    let header = FrameHeader::decode(&header_buf)?;
    if header.len as usize > max_payload {
        return Err(ProtocolError::PayloadTooLarge {
            len: header.len,
            max: max_payload,
        });
    }

    let mut payload = vec![0u8; header.len as usize];
    if !payload.is_empty() {
        match reader.read_exact(&mut payload).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::ShortRead);
            }
            Err(e) => return Err(ProtocolError::Io(e)),
        }
    }

    Ok(Some((header, payload)))
}
