//! Frame transports: in-process channel and recording sink.

use std::sync::Mutex;

use tokio::sync::mpsc;

use duo_common::consts::MAX_PAYLOAD;
use duo_common::hal::{FrameTransport, TransportError};
use duo_common::protocol::{InboundFrame, Payload, StatusRecord};

/// One identifier-keyed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: u16,
    pub payload: Payload,
}

impl Frame {
    pub fn new(id: u16, bytes: &[u8]) -> Result<Self, TransportError> {
        let payload =
            Payload::from_slice(bytes).map_err(|_| TransportError::PayloadTooLong(bytes.len()))?;
        Ok(Self { id, payload })
    }

    /// Decode as a status record (host side).
    pub fn status(&self) -> Option<StatusRecord> {
        StatusRecord::decode(self.id, &self.payload).ok()
    }

    /// Decode as an inbound command or broadcast.
    pub fn inbound(&self) -> Option<InboundFrame> {
        InboundFrame::decode(self.id, &self.payload).ok()
    }
}

/// Transmits into a bounded tokio channel; never blocks.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Frame>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx }
    }
}

impl FrameTransport for ChannelTransport {
    fn transmit(&self, id: u16, payload: &[u8]) -> Result<(), TransportError> {
        let frame = Frame::new(id, payload)?;
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => {
                TransportError::BusUnavailable("channel closed".into())
            }
        })
    }
}

/// Keeps every transmitted frame. For tests and the demo host.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    frames: Mutex<Vec<Frame>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything sent so far.
    pub fn take(&self) -> Vec<Frame> {
        self.frames
            .lock()
            .map(|mut f| std::mem::take(&mut *f))
            .unwrap_or_default()
    }

    /// Decoded status records sent so far (not drained).
    pub fn status_records(&self) -> Vec<StatusRecord> {
        self.frames
            .lock()
            .map(|f| f.iter().filter_map(Frame::status).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameTransport for RecordingTransport {
    fn transmit(&self, id: u16, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(TransportError::PayloadTooLong(payload.len()));
        }
        let frame = Frame::new(id, payload)?;
        self.frames
            .lock()
            .map_err(|_| TransportError::BusUnavailable("recorder poisoned".into()))?
            .push(frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duo_common::protocol::ids;

    #[test]
    fn recording_transport_keeps_frames() {
        let t = RecordingTransport::new();
        t.transmit(ids::PONG, &7u32.to_le_bytes()).unwrap();
        assert_eq!(t.status_records(), vec![StatusRecord::Pong(7)]);
        assert_eq!(t.take().len(), 1);
        assert!(t.is_empty());
    }

    #[test]
    fn oversize_payload_rejected() {
        let t = RecordingTransport::new();
        assert_eq!(
            t.transmit(ids::PONG, &[0u8; 17]),
            Err(TransportError::PayloadTooLong(17))
        );
    }

    #[test]
    fn channel_transport_reports_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let t = ChannelTransport::new(tx);
        t.transmit(ids::PONG, &1u32.to_le_bytes()).unwrap();
        assert_eq!(
            t.transmit(ids::PONG, &2u32.to_le_bytes()),
            Err(TransportError::QueueFull)
        );
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.status(), Some(StatusRecord::Pong(1)));
    }
}
