//! MIDI WS GW
//!
//! Streams MIDI input from every connected device to WebSocket clients and
//! sends MIDI fade-outs on request over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod fade;
pub mod hub;
pub mod listener;
pub mod midi;
pub mod ports;
pub mod version;

pub use error::{FadeError, PortError};
pub use hub::BroadcastHub;
pub use midi::MidiMessage;
pub use ports::{MidiPorts, MidirPorts};
