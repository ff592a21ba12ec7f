//! Wire catalog: identifier-keyed, fixed-layout little-endian records.
//!
//! Each message kind is a tagged variant with an explicit id↔variant
//! mapping. Every decode validates the payload length, finiteness of
//! floats and reserved bits before a typed value is produced.
//!
//! - [`ids`] - numeric identifiers
//! - [`command`] - inbound [`Command`] records
//! - [`status`] - outbound [`StatusRecord`] telemetry
//! - [`broadcast`] - destination-less [`Broadcast`] records

pub mod broadcast;
pub mod command;
pub mod ids;
pub mod status;

use thiserror::Error;

use crate::consts::MAX_PAYLOAD;

pub use broadcast::Broadcast;
pub use command::{Command, EnableFlags, GainSelector, TrajectoryPoint};
pub use status::{ErrorCode, MotorStatusFlags, StatusRecord};

/// Encoded record payload.
pub type Payload = heapless::Vec<u8, MAX_PAYLOAD>;

/// Wire decode failure. Never raises a fault by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown message id 0x{0:03X}")]
    UnknownId(u16),

    #[error("id 0x{id:03X}: expected {expected} bytes, got {actual}")]
    Length {
        id: u16,
        expected: usize,
        actual: usize,
    },

    #[error("id 0x{id:03X}: non-finite float in field `{field}`")]
    NonFinite { id: u16, field: &'static str },

    #[error("id 0x{id:03X}: reserved bits set in field `{field}`")]
    ReservedBits { id: u16, field: &'static str },

    #[error("id 0x{id:03X}: invalid value in field `{field}`")]
    InvalidField { id: u16, field: &'static str },
}

/// Any record a node may receive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InboundFrame {
    Command(Command),
    Broadcast(Broadcast),
}

impl InboundFrame {
    /// Decode an inbound frame by id range.
    pub fn decode(id: u16, bytes: &[u8]) -> Result<Self, DecodeError> {
        if ids::is_broadcast(id) {
            Broadcast::decode(id, bytes).map(Self::Broadcast)
        } else {
            Command::decode(id, bytes).map(Self::Command)
        }
    }

    pub fn id(&self) -> u16 {
        match self {
            Self::Command(c) => c.id(),
            Self::Broadcast(b) => b.id(),
        }
    }
}

// ─── Codec helpers ──────────────────────────────────────────────────

/// Little-endian cursor over a length-checked payload.
pub(crate) struct Reader<'a> {
    id: u16,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Fails unless `bytes` is exactly `expected` long.
    pub(crate) fn exact(id: u16, bytes: &'a [u8], expected: usize) -> Result<Self, DecodeError> {
        if bytes.len() != expected {
            return Err(DecodeError::Length {
                id,
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            id,
            buf: bytes,
            pos: 0,
        })
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    pub(crate) fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    pub(crate) fn i8(&mut self) -> i8 {
        i8::from_le_bytes(self.take())
    }

    pub(crate) fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    pub(crate) fn i16(&mut self) -> i16 {
        i16::from_le_bytes(self.take())
    }

    pub(crate) fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    pub(crate) fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    pub(crate) fn f32(&mut self, field: &'static str) -> Result<f32, DecodeError> {
        let v = f32::from_le_bytes(self.take());
        if v.is_finite() {
            Ok(v)
        } else {
            Err(DecodeError::NonFinite { id: self.id, field })
        }
    }
}

/// Little-endian payload builder. Layouts are static and never exceed
/// `MAX_PAYLOAD`.
#[derive(Default)]
pub(crate) struct Writer {
    buf: Payload,
}

impl Writer {
    fn put(mut self, bytes: &[u8]) -> Self {
        let fits = self.buf.extend_from_slice(bytes).is_ok();
        debug_assert!(fits, "record layout exceeds MAX_PAYLOAD");
        self
    }

    pub(crate) fn u8(self, v: u8) -> Self {
        self.put(&[v])
    }

    pub(crate) fn i8(self, v: i8) -> Self {
        self.put(&v.to_le_bytes())
    }

    pub(crate) fn u16(self, v: u16) -> Self {
        self.put(&v.to_le_bytes())
    }

    pub(crate) fn i16(self, v: i16) -> Self {
        self.put(&v.to_le_bytes())
    }

    pub(crate) fn u32(self, v: u32) -> Self {
        self.put(&v.to_le_bytes())
    }

    pub(crate) fn i32(self, v: i32) -> Self {
        self.put(&v.to_le_bytes())
    }

    pub(crate) fn f32(self, v: f32) -> Self {
        self.put(&v.to_le_bytes())
    }

    pub(crate) fn finish(self) -> Payload {
        self.buf
    }
}
