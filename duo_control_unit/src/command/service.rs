//! Async service loop driving the dispatcher.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use duo_common::hal::FrameTransport;

use super::dispatcher::ProtocolDispatcher;
use crate::transport::Frame;

/// Serve inbound frames and the telemetry interval until `shutdown`
/// flips to `true` or every inbound sender is dropped. Returns the
/// dispatcher for inspection.
pub async fn serve<T: FrameTransport>(
    mut dispatcher: ProtocolDispatcher<T>,
    mut inbound: mpsc::Receiver<Frame>,
    telemetry_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> ProtocolDispatcher<T> {
    let mut ticker = tokio::time::interval(telemetry_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    info!(interval_ms = telemetry_interval.as_millis() as u64, "Dispatcher started");

    loop {
        tokio::select! {
            frame = inbound.recv() => match frame {
                Some(frame) => {
                    // Rejections are reported on the bus and logged inside.
                    let _ = dispatcher.handle_frame(frame.id, &frame.payload);
                }
                None => break,
            },
            _ = ticker.tick() => {
                if let Err(e) = dispatcher.publish_telemetry() {
                    debug!(error = %e, "Telemetry dropped");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(rejected = dispatcher.rejected_count(), "Dispatcher stopped");
    dispatcher
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimNode;
    use duo_common::config::DriveConfig;
    use duo_common::protocol::{Command, StatusRecord};

    #[tokio::test]
    async fn serves_until_inbound_closes() {
        let node = SimNode::new(DriveConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel(8);
        let (_stop_tx, stop_rx) = watch::channel(false);
        let ping = Command::Ping(42);
        tx.send(Frame::new(ping.id(), &ping.encode()).unwrap())
            .await
            .unwrap();
        drop(tx);

        let dispatcher = serve(node.dispatcher, rx, Duration::from_millis(10), stop_rx).await;
        let records = dispatcher.transport().status_records();
        assert!(records.contains(&StatusRecord::Pong(42)));
    }

    #[tokio::test]
    async fn stops_on_shutdown_signal() {
        let node = SimNode::new(DriveConfig::default()).unwrap();
        let (_tx, rx) = mpsc::channel::<Frame>(8);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(serve(node.dispatcher, rx, Duration::from_millis(5), stop_rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop_tx.send(true).unwrap();
        let dispatcher = handle.await.unwrap();
        assert!(!dispatcher.transport().is_empty());
    }
}
