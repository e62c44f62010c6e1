//! MIDI input listeners
//!
//! One OS thread per input device blocks on the device's message stream and hands
//! each message to the async side through an mpsc channel. [`run_pump`] drains that
//! channel into the [`BroadcastHub`] on the runtime.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::hub::BroadcastHub;
use crate::midi::MidiMessage;
use crate::ports::MidiPorts;

/// Capacity of the listener → runtime channel
pub const INBOUND_CHANNEL_CAPACITY: usize = 1000;

/// A message received on some input port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMidi {
    pub device: String,
    pub message: MidiMessage,
}

/// Why a listener thread stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerExit {
    /// The port could not be opened
    OpenFailed(String),
    /// The device's message stream ended
    StreamEnded,
    /// Nobody is receiving on the runtime side anymore
    ChannelClosed,
}

/// Handle on a running listener thread
pub struct ListenerHandle {
    pub device: String,
    pub thread: JoinHandle<ListenerExit>,
}

/// Start one listener thread per input device
///
/// Enumeration failures are treated as "no devices". Returns the handles of the
/// threads that were started; they are never restarted.
pub fn spawn_listeners(
    ports: Arc<dyn MidiPorts>,
    tx: mpsc::Sender<InboundMidi>,
) -> Vec<ListenerHandle> {
    let devices = match ports.input_names() {
        Ok(devices) => devices,
        Err(e) => {
            warn!("Failed to enumerate MIDI inputs: {}", e);
            Vec::new()
        }
    };

    if devices.is_empty() {
        info!("No MIDI input devices found.");
        return Vec::new();
    }

    let mut handles = Vec::with_capacity(devices.len());
    for device in devices {
        info!("Starting MIDI listener for: {}", device);

        let ports = ports.clone();
        let tx = tx.clone();
        let thread_device = device.clone();

        let spawned = thread::Builder::new()
            .name(format!("midi-in:{}", device))
            .spawn(move || listen(ports.as_ref(), &thread_device, &tx));

        match spawned {
            Ok(thread) => handles.push(ListenerHandle { device, thread }),
            Err(e) => error!("Failed to spawn listener thread for '{}': {}", device, e),
        }
    }

    handles
}

/// Body of a listener thread
fn listen(ports: &dyn MidiPorts, device: &str, tx: &mpsc::Sender<InboundMidi>) -> ListenerExit {
    let stream = match ports.open_input(device) {
        Ok(stream) => stream,
        Err(e) => {
            error!("Error in MIDI listener for '{}': {}", device, e);
            return ListenerExit::OpenFailed(e.to_string());
        }
    };

    info!("Listening to MIDI input: {}", device);

    for message in stream {
        debug!("Received MIDI from '{}': {}", device, message);

        let inbound = InboundMidi {
            device: device.to_string(),
            message,
        };
        if tx.blocking_send(inbound).is_err() {
            debug!("Inbound channel closed, listener for '{}' exiting", device);
            return ListenerExit::ChannelClosed;
        }
    }

    warn!("MIDI input '{}' stream ended, listener stopped", device);
    ListenerExit::StreamEnded
}

/// Publish every inbound message on the hub until all listeners are gone
pub async fn run_pump(hub: Arc<BroadcastHub>, mut rx: mpsc::Receiver<InboundMidi>) {
    while let Some(inbound) = rx.recv().await {
        hub.publish(&inbound.message, &inbound.device);
    }
    debug!("All MIDI listeners stopped, pump exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::stub::StubPorts;
    use std::time::Duration;

    fn join(handles: Vec<ListenerHandle>) -> Vec<(String, ListenerExit)> {
        let mut exits: Vec<_> = handles
            .into_iter()
            .map(|h| (h.device, h.thread.join().unwrap()))
            .collect();
        exits.sort_by(|a, b| a.0.cmp(&b.0));
        exits
    }

    #[test]
    fn test_no_devices_starts_nothing() {
        let (tx, _rx) = mpsc::channel(8);
        assert!(spawn_listeners(Arc::new(StubPorts::new()), tx.clone()).is_empty());

        let failing = StubPorts::new().with_inputs(["Keys"]).failing_enumeration();
        assert!(spawn_listeners(Arc::new(failing), tx).is_empty());
    }

    #[test]
    fn test_one_failing_device_does_not_affect_others() {
        let stub = StubPorts::new()
            .with_inputs(["Broken", "Keys"])
            .failing_open("Broken");
        let feed = stub.input_feed("Keys");
        let (tx, mut rx) = mpsc::channel(8);

        let handles = spawn_listeners(Arc::new(stub), tx);
        assert_eq!(handles.len(), 2);

        feed.send(MidiMessage::control_change(1, 7, 42)).unwrap();
        drop(feed);

        let exits = join(handles);
        assert!(matches!(exits[0].1, ListenerExit::OpenFailed(_)));
        assert_eq!(exits[1].1, ListenerExit::StreamEnded);

        assert_eq!(
            rx.try_recv().unwrap(),
            InboundMidi {
                device: "Keys".to_string(),
                message: MidiMessage::control_change(1, 7, 42),
            }
        );
    }

    #[test]
    fn test_listener_exits_when_runtime_side_is_gone() {
        let stub = StubPorts::new().with_inputs(["Keys"]);
        let feed = stub.input_feed("Keys");
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let handles = spawn_listeners(Arc::new(stub), tx);
        feed.send(MidiMessage::Start).unwrap();

        assert_eq!(join(handles)[0].1, ListenerExit::ChannelClosed);
    }

    #[tokio::test]
    async fn test_pump_publishes_to_hub() {
        let hub = Arc::new(BroadcastHub::default());
        let (_id, mut frames) = hub.subscribe();

        let stub = StubPorts::new().with_inputs(["Pads"]);
        let feed = stub.input_feed("Pads");
        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

        let pump = tokio::spawn(run_pump(hub.clone(), rx));
        let handles = spawn_listeners(Arc::new(stub), tx);

        feed.send(MidiMessage::NoteOn {
            channel: 9,
            note: 36,
            velocity: 90,
        })
        .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), frames.recv())
            .await
            .unwrap()
            .unwrap();
        let frame: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(frame["device"], "Pads");

        // Ending the stream drops the last sender, so the pump finishes
        drop(feed);
        for handle in handles {
            tokio::task::spawn_blocking(move || handle.thread.join().unwrap())
                .await
                .unwrap();
        }
        tokio::time::timeout(Duration::from_secs(5), pump)
            .await
            .unwrap()
            .unwrap();
    }
}
