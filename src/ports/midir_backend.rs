//! Hardware MIDI backend on top of midir

use crossbeam::channel::{bounded, TrySendError};
use midir::{Ignore, MidiIO, MidiInput, MidiOutput, MidiOutputConnection};
use tracing::{debug, info, trace, warn};

use super::{resolve_port_name, InputStream, MidiPorts, OutputPort};
use crate::error::PortError;
use crate::midi::{format_hex, MidiMessage};

/// Messages buffered per input port before new ones are dropped
const INPUT_QUEUE_CAPACITY: usize = 1000;

/// MIDI ports provided by the operating system
#[derive(Debug, Clone)]
pub struct MidirPorts {
    client_name: String,
}

impl MidirPorts {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn input_client(&self, role: &str) -> Result<MidiInput, PortError> {
        MidiInput::new(&format!("{}-{}", self.client_name, role))
            .map_err(|e| PortError::Backend(e.to_string()))
    }

    fn output_client(&self, role: &str) -> Result<MidiOutput, PortError> {
        MidiOutput::new(&format!("{}-{}", self.client_name, role))
            .map_err(|e| PortError::Backend(e.to_string()))
    }
}

impl Default for MidirPorts {
    fn default() -> Self {
        Self::new("MIDI-WS-GW")
    }
}

/// All ports of a client with their names, skipping ports whose name can't be read
fn named_ports<T: MidiIO>(io: &T) -> Vec<(T::Port, String)> {
    io.ports()
        .into_iter()
        .filter_map(|port| io.port_name(&port).ok().map(|name| (port, name)))
        .collect()
}

/// Find a port by exact name, then by case-insensitive substring
fn find_port<T: MidiIO>(io: &T, requested: &str) -> Option<(T::Port, String)> {
    let mut ports = named_ports(io);
    let names: Vec<String> = ports.iter().map(|(_, name)| name.clone()).collect();
    let index = resolve_port_name(&names, requested)?;
    let found = ports.swap_remove(index);
    debug!("Found port '{}' for '{}'", found.1, requested);
    Some(found)
}

impl MidiPorts for MidirPorts {
    fn input_names(&self) -> Result<Vec<String>, PortError> {
        let midi_in = self.input_client("scan")?;
        Ok(named_ports(&midi_in).into_iter().map(|(_, name)| name).collect())
    }

    fn output_names(&self) -> Result<Vec<String>, PortError> {
        let midi_out = self.output_client("scan")?;
        Ok(named_ports(&midi_out)
            .into_iter()
            .map(|(_, name)| name)
            .collect())
    }

    fn open_input(&self, name: &str) -> Result<InputStream, PortError> {
        let mut midi_in = self.input_client("in")?;
        // Forward everything, including sysex, clock and active sensing
        midi_in.ignore(Ignore::None);

        let (port, port_name) =
            find_port(&midi_in, name).ok_or_else(|| PortError::InputNotFound(name.to_string()))?;

        info!("Connecting to input port: {}", port_name);

        let (tx, rx) = bounded(INPUT_QUEUE_CAPACITY);
        let callback_port = port_name.clone();

        let connection = midi_in
            .connect(
                &port,
                &self.client_name,
                move |_timestamp, data, _| match MidiMessage::parse(data) {
                    Some(message) => match tx.try_send(message) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!("Input queue full for '{}', dropping message", callback_port)
                        }
                        Err(TrySendError::Disconnected(_)) => {}
                    },
                    None => trace!("Failed to parse MIDI: {}", format_hex(data)),
                },
                (),
            )
            .map_err(|e| PortError::Connect {
                port: port_name.clone(),
                reason: e.to_string(),
            })?;

        Ok(InputStream::new(rx, connection))
    }

    fn open_output(&self, name: &str) -> Result<Box<dyn OutputPort>, PortError> {
        let midi_out = self.output_client("out")?;

        let (port, port_name) = find_port(&midi_out, name)
            .ok_or_else(|| PortError::OutputNotFound(name.to_string()))?;

        debug!("Connecting to output port: {}", port_name);

        let connection = midi_out
            .connect(&port, &self.client_name)
            .map_err(|e| PortError::Connect {
                port: port_name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(MidirOutput {
            name: port_name,
            connection,
        }))
    }
}

/// Open midir output connection
struct MidirOutput {
    name: String,
    connection: MidiOutputConnection,
}

impl OutputPort for MidirOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, message: &MidiMessage) -> Result<(), PortError> {
        let data = message.encode();

        self.connection
            .send(&data)
            .map_err(|e| PortError::Send {
                port: self.name.clone(),
                reason: e.to_string(),
            })?;

        trace!("Sent: {} | {}", format_hex(&data), message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_discovery() {
        // Hosts without a MIDI subsystem report a backend error instead of ports
        let ports = MidirPorts::default();
        for listing in [ports.input_names(), ports.output_names()] {
            match listing {
                Ok(_) => {}
                Err(PortError::Backend(_)) => {}
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
    }

    #[test]
    fn test_unknown_output_is_reported() {
        let ports = MidirPorts::default();
        match ports.open_output("no such port \u{1F3B9}") {
            Err(PortError::OutputNotFound(name)) => assert_eq!(name, "no such port \u{1F3B9}"),
            Err(PortError::Backend(_)) => {}
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("opened a port that does not exist"),
        }
    }
}
