//! Timed MIDI fade-out
//!
//! Walks a controller from 127 down in equal steps, sending one control change per
//! channel per step and sleeping between steps without blocking the runtime.

use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::FadeError;
use crate::midi::MidiMessage;
use crate::ports::MidiPorts;

/// Highest 7-bit controller value; every fade starts here
pub const FADE_START: u8 = 127;

/// Parameters of one fade
#[derive(Debug, Clone, PartialEq)]
pub struct FadeRequest {
    /// Output port name (exact, or a case-insensitive substring)
    pub device: String,
    /// Channels to fade, in send order
    pub channels: Vec<u8>,
    /// Number of values sent per channel
    pub steps: u32,
    /// Pause after each step
    pub step_delay: Duration,
    /// Controller number
    pub control: u8,
}

/// What a completed fade sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FadeSummary {
    pub device: String,
    pub steps: u32,
    pub messages_sent: usize,
}

impl fmt::Display for FadeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MIDI fade-out sent ({} steps)", self.steps)
    }
}

/// Controller values of a fade, one per step
///
/// The step size is `127 / steps` (integer division, at least 1), so the values are
/// 127, 127 - step, 127 - 2 * step, ... and bottom out at 0 for very long fades.
/// Values are computed as they are consumed; `steps` can be any `u32`.
pub fn fade_values(steps: u32) -> impl ExactSizeIterator<Item = u8> {
    let start = u32::from(FADE_START);
    let step = (start / steps.max(1)).max(1);
    (0..steps).map(move |i| start.saturating_sub(i.saturating_mul(step)) as u8)
}

/// Run a fade to completion
///
/// Messages already sent when an error occurs are not undone.
pub async fn run_fade(
    ports: &dyn MidiPorts,
    request: &FadeRequest,
) -> Result<FadeSummary, FadeError> {
    if request.steps == 0 {
        return Err(FadeError::NoSteps);
    }

    let mut output = ports.open_output(&request.device).map_err(|e| {
        warn!("Fade aborted, cannot open '{}': {}", request.device, e);
        FadeError::Open(e)
    })?;

    info!(
        "Fading CC{} on '{}' channels {:?}: {} steps, {:?} apart",
        request.control,
        output.name(),
        request.channels,
        request.steps,
        request.step_delay
    );

    let mut sent = 0;
    for value in fade_values(request.steps) {
        for &channel in &request.channels {
            let message = MidiMessage::control_change(channel, request.control, value);
            if let Err(source) = output.send(&message) {
                warn!("Fade aborted after {} messages: {}", sent, source);
                return Err(FadeError::Send { sent, source });
            }
            sent += 1;
        }

        debug!("Fade step at value {} sent", value);
        tokio::time::sleep(request.step_delay).await;
    }

    let summary = FadeSummary {
        device: output.name().to_string(),
        steps: request.steps,
        messages_sent: sent,
    };
    info!("{} to '{}'", summary, summary.device);
    Ok(summary)
}
