//! Error types for MIDI port access and fades

use thiserror::Error;

/// Failure talking to the MIDI backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("MIDI backend unavailable: {0}")]
    Backend(String),

    #[error("MIDI input port '{0}' not found")]
    InputNotFound(String),

    #[error("MIDI output port '{0}' not found")]
    OutputNotFound(String),

    #[error("Failed to connect to '{port}': {reason}")]
    Connect { port: String, reason: String },

    #[error("Failed to send to '{port}': {reason}")]
    Send { port: String, reason: String },
}

/// Why a fade did not complete
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FadeError {
    #[error("Fade needs at least one step")]
    NoSteps,

    #[error("No MIDI output device available")]
    NoDevice,

    #[error("Failed to open MIDI output: {0}")]
    Open(#[source] PortError),

    #[error("MIDI fade aborted after {sent} messages: {source}")]
    Send {
        sent: usize,
        #[source]
        source: PortError,
    },
}
