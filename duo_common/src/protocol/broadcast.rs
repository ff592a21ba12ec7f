//! Broadcast records, consumed identically by every node.

use super::{DecodeError, Payload, Reader, Writer, ids};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Broadcast {
    /// Non-maskable stop for every node on the bus.
    GlobalEstop,
    /// A peer `node` reports a watchdog expiry.
    WatchdogAlert { node: u8 },
    /// Bus-wide time reference.
    SyncPulse { timestamp_ms: u32 },
}

impl Broadcast {
    pub fn id(&self) -> u16 {
        match self {
            Self::GlobalEstop => ids::GLOBAL_ESTOP,
            Self::WatchdogAlert { .. } => ids::WATCHDOG_ALERT,
            Self::SyncPulse { .. } => ids::SYNC_PULSE,
        }
    }

    pub fn decode(id: u16, bytes: &[u8]) -> Result<Self, DecodeError> {
        match id {
            ids::GLOBAL_ESTOP => Reader::exact(id, bytes, 0).map(|_| Self::GlobalEstop),
            ids::WATCHDOG_ALERT => {
                let mut r = Reader::exact(id, bytes, 1)?;
                Ok(Self::WatchdogAlert { node: r.u8() })
            }
            ids::SYNC_PULSE => {
                let mut r = Reader::exact(id, bytes, 4)?;
                Ok(Self::SyncPulse {
                    timestamp_ms: r.u32(),
                })
            }
            _ => Err(DecodeError::UnknownId(id)),
        }
    }

    pub fn encode(&self) -> Payload {
        let w = Writer::default();
        match *self {
            Self::GlobalEstop => w,
            Self::WatchdogAlert { node } => w.u8(node),
            Self::SyncPulse { timestamp_ms } => w.u32(timestamp_ms),
        }
        .finish()
    }
}
