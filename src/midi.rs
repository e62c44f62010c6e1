//! MIDI message types
//!
//! Provides MIDI message parsing, encoding, and the JSON shape streamed to WebSocket clients.

use serde::Serialize;
use std::fmt;

/// MIDI message types
///
/// Serialized with a snake_case `type` tag, e.g.
/// `{"type":"control_change","channel":0,"control":7,"value":100}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MidiMessage {
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (0-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Polyphonic Key Pressure: channel (0-15), note (0-127), value (0-127)
    #[serde(rename = "polytouch")]
    PolyPressure { channel: u8, note: u8, value: u8 },

    /// Control Change: channel (0-15), control (0-127), value (0-127)
    ControlChange { channel: u8, control: u8, value: u8 },

    /// Program Change: channel (0-15), program (0-127)
    ProgramChange { channel: u8, program: u8 },

    /// Channel Pressure: channel (0-15), value (0-127)
    #[serde(rename = "aftertouch")]
    ChannelPressure { channel: u8, value: u8 },

    /// Pitch Bend: channel (0-15), pitch (-8192..8191, 0 is centre)
    #[serde(rename = "pitchwheel")]
    PitchBend { channel: u8, pitch: i16 },

    /// System Exclusive payload without the F0/F7 framing
    Sysex { data: Vec<u8> },

    /// MIDI Time Code Quarter Frame: frame_type (0-7), frame_value (0-15)
    QuarterFrame { frame_type: u8, frame_value: u8 },

    /// Song Position Pointer
    #[serde(rename = "songpos")]
    SongPosition { pos: u16 },

    SongSelect { song: u8 },
    TuneRequest,
    Clock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    Reset,
}

impl MidiMessage {
    /// Build a control-change message
    pub fn control_change(channel: u8, control: u8, value: u8) -> Self {
        MidiMessage::ControlChange {
            channel,
            control,
            value,
        }
    }

    /// Parse a MIDI message from raw bytes
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;

        // Running status needs state we don't keep
        if status < 0x80 {
            return None;
        }

        let byte = |i: usize| rest.get(i).map(|b| b & 0x7F);

        if status < 0xF0 {
            let channel = status & 0x0F;
            return match status & 0xF0 {
                0x80 => Some(MidiMessage::NoteOff {
                    channel,
                    note: byte(0)?,
                    velocity: byte(1)?,
                }),
                0x90 => Some(MidiMessage::NoteOn {
                    channel,
                    note: byte(0)?,
                    velocity: byte(1)?,
                }),
                0xA0 => Some(MidiMessage::PolyPressure {
                    channel,
                    note: byte(0)?,
                    value: byte(1)?,
                }),
                0xB0 => Some(MidiMessage::ControlChange {
                    channel,
                    control: byte(0)?,
                    value: byte(1)?,
                }),
                0xC0 => Some(MidiMessage::ProgramChange {
                    channel,
                    program: byte(0)?,
                }),
                0xD0 => Some(MidiMessage::ChannelPressure {
                    channel,
                    value: byte(0)?,
                }),
                0xE0 => {
                    let raw = ((byte(1)? as u16) << 7) | byte(0)? as u16;
                    Some(MidiMessage::PitchBend {
                        channel,
                        pitch: raw as i16 - 8192,
                    })
                }
                _ => None,
            };
        }

        match status {
            0xF0 => {
                let end = rest.iter().position(|&b| b == 0xF7)?;
                Some(MidiMessage::Sysex {
                    data: rest[..end].to_vec(),
                })
            }
            0xF1 => {
                let value = byte(0)?;
                Some(MidiMessage::QuarterFrame {
                    frame_type: value >> 4,
                    frame_value: value & 0x0F,
                })
            }
            0xF2 => Some(MidiMessage::SongPosition {
                pos: ((byte(1)? as u16) << 7) | byte(0)? as u16,
            }),
            0xF3 => Some(MidiMessage::SongSelect { song: byte(0)? }),
            0xF6 => Some(MidiMessage::TuneRequest),
            0xF8 => Some(MidiMessage::Clock),
            0xFA => Some(MidiMessage::Start),
            0xFB => Some(MidiMessage::Continue),
            0xFC => Some(MidiMessage::Stop),
            0xFE => Some(MidiMessage::ActiveSensing),
            0xFF => Some(MidiMessage::Reset),
            _ => None,
        }
    }

    /// Encode the message to MIDI bytes
    ///
    /// Out-of-range fields are masked rather than rejected: channels to 4 bits,
    /// data bytes to 7 bits.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => vec![0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            MidiMessage::PolyPressure {
                channel,
                note,
                value,
            } => vec![0xA0 | (channel & 0x0F), note & 0x7F, value & 0x7F],
            MidiMessage::ControlChange {
                channel,
                control,
                value,
            } => vec![0xB0 | (channel & 0x0F), control & 0x7F, value & 0x7F],
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::ChannelPressure { channel, value } => {
                vec![0xD0 | (channel & 0x0F), value & 0x7F]
            }
            MidiMessage::PitchBend { channel, pitch } => {
                let raw = (pitch.clamp(-8192, 8191) + 8192) as u16;
                vec![
                    0xE0 | (channel & 0x0F),
                    (raw & 0x7F) as u8,
                    ((raw >> 7) & 0x7F) as u8,
                ]
            }
            MidiMessage::Sysex { ref data } => {
                let mut result = Vec::with_capacity(data.len() + 2);
                result.push(0xF0);
                result.extend(data.iter().map(|b| b & 0x7F));
                result.push(0xF7);
                result
            }
            MidiMessage::QuarterFrame {
                frame_type,
                frame_value,
            } => vec![0xF1, ((frame_type & 0x07) << 4) | (frame_value & 0x0F)],
            MidiMessage::SongPosition { pos } => {
                vec![0xF2, (pos & 0x7F) as u8, ((pos >> 7) & 0x7F) as u8]
            }
            MidiMessage::SongSelect { song } => vec![0xF3, song & 0x7F],
            MidiMessage::TuneRequest => vec![0xF6],
            MidiMessage::Clock => vec![0xF8],
            MidiMessage::Start => vec![0xFA],
            MidiMessage::Continue => vec![0xFB],
            MidiMessage::Stop => vec![0xFC],
            MidiMessage::ActiveSensing => vec![0xFE],
            MidiMessage::Reset => vec![0xFF],
        }
    }

    /// Get the channel for channel messages (0-15), None for system messages
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOff { channel, .. }
            | MidiMessage::NoteOn { channel, .. }
            | MidiMessage::PolyPressure { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => Some(channel),
            _ => None,
        }
    }

    /// JSON encoding of this message, as carried in the `data` field of a broadcast envelope
    ///
    /// Carries a `time` of 0 next to the message fields; received messages have no
    /// delta time.
    pub fn to_json(&self) -> String {
        let timed = TimedMessage {
            message: self,
            time: 0,
        };
        // A unit-or-struct enum of integers cannot fail to serialize
        serde_json::to_string(&timed).unwrap_or_default()
    }
}

#[derive(Serialize)]
struct TimedMessage<'a> {
    #[serde(flatten)]
    message: &'a MidiMessage,
    time: u32,
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => write!(f, "NoteOff ch:{} n:{} v:{}", u16::from(channel) + 1, note, velocity),
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => write!(f, "NoteOn ch:{} n:{} v:{}", u16::from(channel) + 1, note, velocity),
            MidiMessage::ControlChange {
                channel,
                control,
                value,
            } => write!(f, "CC ch:{} cc:{} v:{}", u16::from(channel) + 1, control, value),
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "ProgramChange ch:{} p:{}", u16::from(channel) + 1, program)
            }
            MidiMessage::PitchBend { channel, pitch } => {
                write!(f, "PitchBend ch:{} v:{}", u16::from(channel) + 1, pitch)
            }
            MidiMessage::Sysex { ref data } => write!(f, "SysEx {} bytes", data.len()),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_control_change() {
        let msg = MidiMessage::parse(&[0xB2, 7, 100]).unwrap();
        assert_eq!(msg, MidiMessage::control_change(2, 7, 100));
        assert_eq!(msg.encode(), vec![0xB2, 7, 100]);
    }

    #[test]
    fn test_note_on_velocity_zero_is_kept() {
        // Devices use this as note off; forward exactly what was received
        let msg = MidiMessage::parse(&[0x90, 60, 0]).unwrap();
        assert_eq!(
            msg,
            MidiMessage::NoteOn {
                channel: 0,
                note: 60,
                velocity: 0
            }
        );
    }

    #[test]
    fn test_pitch_bend_is_signed_around_centre() {
        let msg = MidiMessage::parse(&[0xE0, 0x00, 0x40]).unwrap();
        assert_eq!(msg, MidiMessage::PitchBend { channel: 0, pitch: 0 });

        let low = MidiMessage::parse(&[0xE1, 0x00, 0x00]).unwrap();
        assert_eq!(
            low,
            MidiMessage::PitchBend {
                channel: 1,
                pitch: -8192
            }
        );
        assert_eq!(low.encode(), vec![0xE1, 0x00, 0x00]);
    }

    #[test]
    fn test_truncated_and_running_status_rejected() {
        assert_eq!(MidiMessage::parse(&[]), None);
        assert_eq!(MidiMessage::parse(&[0xB0, 7]), None);
        assert_eq!(MidiMessage::parse(&[0x40, 0x7F]), None);
        assert_eq!(MidiMessage::parse(&[0xF0, 0x01, 0x02]), None);
    }

    #[test]
    fn test_sysex() {
        let msg = MidiMessage::parse(&[0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7]).unwrap();
        assert_eq!(
            msg,
            MidiMessage::Sysex {
                data: vec![0x7E, 0x7F, 0x06, 0x01]
            }
        );
    }

    #[test]
    fn test_encode_masks_out_of_range_values() {
        let msg = MidiMessage::control_change(17, 200, 255);
        assert_eq!(msg.encode(), vec![0xB1, 200 & 0x7F, 0x7F]);
    }

    #[test]
    fn test_json_shape() {
        let cc: serde_json::Value =
            serde_json::from_str(&MidiMessage::control_change(0, 7, 100).to_json()).unwrap();
        assert_eq!(
            cc,
            json!({"type": "control_change", "time": 0, "channel": 0, "control": 7, "value": 100})
        );

        let clock: serde_json::Value =
            serde_json::from_str(&MidiMessage::Clock.to_json()).unwrap();
        assert_eq!(clock, json!({"type": "clock", "time": 0}));

        let frame: serde_json::Value =
            serde_json::from_str(&MidiMessage::parse(&[0xF1, 0x35]).unwrap().to_json()).unwrap();
        assert_eq!(
            frame,
            json!({"type": "quarter_frame", "time": 0, "frame_type": 3, "frame_value": 5})
        );

        let bend: serde_json::Value = serde_json::to_value(MidiMessage::PitchBend {
            channel: 3,
            pitch: -10,
        })
        .unwrap();
        assert_eq!(bend, json!({"type": "pitchwheel", "channel": 3, "pitch": -10}));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            MidiMessage::control_change(0, 7, 64).to_string(),
            "CC ch:1 cc:7 v:64"
        );
        assert_eq!(format_hex(&[0xB0, 0x07, 0x40]), "B0 07 40");
    }

    #[test]
    fn test_display_out_of_range_channel() {
        assert_eq!(
            MidiMessage::control_change(255, 7, 1).to_string(),
            "CC ch:256 cc:7 v:1"
        );
        let bend = MidiMessage::PitchBend {
            channel: 255,
            pitch: 0,
        };
        assert_eq!(bend.to_string(), "PitchBend ch:256 v:0");
    }

    #[test]
    fn test_quarter_frame_round_trip_bytes() {
        let msg = MidiMessage::parse(&[0xF1, 0x7A]).unwrap();
        assert_eq!(
            msg,
            MidiMessage::QuarterFrame {
                frame_type: 7,
                frame_value: 10
            }
        );
        assert_eq!(msg.encode(), vec![0xF1, 0x7A]);
    }
}
