//! MIDI port access
//!
//! The gateway only talks to MIDI through the [`MidiPorts`] trait: enumerate device
//! names, open an input as a blocking stream of messages, open an output to send to.
//! [`MidirPorts`] is the hardware backend; [`stub::StubPorts`] records traffic in memory.

mod midir_backend;
pub mod stub;

use crossbeam::channel::Receiver;
use serde::Serialize;
use std::any::Any;
use tracing::warn;

use crate::error::PortError;
use crate::midi::MidiMessage;

pub use midir_backend::MidirPorts;

/// Source of MIDI devices
///
/// Implementations must be usable from request handlers and listener threads at once.
pub trait MidiPorts: Send + Sync {
    /// Names of the available input ports
    fn input_names(&self) -> Result<Vec<String>, PortError>;

    /// Names of the available output ports
    fn output_names(&self) -> Result<Vec<String>, PortError>;

    /// Open an input port; the returned stream blocks until the next message arrives
    fn open_input(&self, name: &str) -> Result<InputStream, PortError>;

    /// Open an output port; the port closes when the box is dropped
    fn open_output(&self, name: &str) -> Result<Box<dyn OutputPort>, PortError>;
}

/// An open MIDI output
pub trait OutputPort: Send {
    /// Resolved port name
    fn name(&self) -> &str;

    /// Send one message
    fn send(&mut self, message: &MidiMessage) -> Result<(), PortError>;
}

/// Blocking, non-restartable sequence of messages from one input port
///
/// Iteration ends once every sender feeding the stream is gone. The backend
/// connection, if any, stays open for as long as the stream lives.
pub struct InputStream {
    rx: Receiver<MidiMessage>,
    _connection: Option<Box<dyn Any + Send>>,
}

impl InputStream {
    /// Stream backed by a live connection that owns the sending half
    pub fn new<C: Any + Send>(rx: Receiver<MidiMessage>, connection: C) -> Self {
        Self {
            rx,
            _connection: Some(Box::new(connection)),
        }
    }

    /// Stream fed directly by a channel
    pub fn from_receiver(rx: Receiver<MidiMessage>) -> Self {
        Self {
            rx,
            _connection: None,
        }
    }
}

impl Iterator for InputStream {
    type Item = MidiMessage;

    fn next(&mut self) -> Option<MidiMessage> {
        self.rx.recv().ok()
    }
}

/// Snapshot of the device names on both sides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceList {
    pub input: Vec<String>,
    pub output: Vec<String>,
}

impl DeviceList {
    /// Enumerate both directions; a failing side is logged and reported as empty
    pub fn enumerate(ports: &dyn MidiPorts) -> Self {
        let input = ports.input_names().unwrap_or_else(|e| {
            warn!("Failed to list MIDI inputs: {}", e);
            Vec::new()
        });
        let output = ports.output_names().unwrap_or_else(|e| {
            warn!("Failed to list MIDI outputs: {}", e);
            Vec::new()
        });

        Self { input, output }
    }
}

/// Resolve a requested port name against the available names
///
/// Exact match wins; otherwise the first case-insensitive substring match.
pub(crate) fn resolve_port_name(available: &[String], requested: &str) -> Option<usize> {
    if let Some(index) = available.iter().position(|name| name == requested) {
        return Some(index);
    }

    let needle = requested.to_lowercase();
    if needle.is_empty() {
        return None;
    }
    available
        .iter()
        .position(|name| name.to_lowercase().contains(&needle))
}

#[cfg(test)]
mod tests {
    use super::stub::StubPorts;
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_prefers_exact_match() {
        let available = names(&["Launch Control XL MIDI 1", "Launch Control XL"]);
        assert_eq!(resolve_port_name(&available, "Launch Control XL"), Some(1));
    }

    #[test]
    fn test_resolve_falls_back_to_substring() {
        let available = names(&["Midi Through Port-0", "nanoKONTROL2 MIDI 1"]);
        assert_eq!(resolve_port_name(&available, "nanokontrol"), Some(1));
        assert_eq!(resolve_port_name(&available, "launchpad"), None);
        assert_eq!(resolve_port_name(&available, ""), None);
    }

    #[test]
    fn test_enumerate_degrades_to_empty() {
        let ports = StubPorts::new().failing_enumeration();
        assert_eq!(DeviceList::enumerate(&ports), DeviceList::default());
    }

    #[test]
    fn test_input_stream_ends_when_senders_drop() {
        let (tx, rx) = crossbeam::channel::unbounded();
        let mut stream = InputStream::from_receiver(rx);

        tx.send(MidiMessage::Start).unwrap();
        drop(tx);

        assert_eq!(stream.next(), Some(MidiMessage::Start));
        assert_eq!(stream.next(), None);
    }
}
