// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Channel voice messages sent to the MIDI sink.

use super::messages;

/// Outbound MIDI channel message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note On: channel (0-15), note (0-127), velocity (0-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },
    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },
    /// Poly Aftertouch: channel (0-15), note (0-127), pressure (0-127)
    PolyAftertouch { channel: u8, note: u8, pressure: u8 },
    /// Control Change: channel (0-15), controller (0-127), value (0-127)
    ControlChange { channel: u8, controller: u8, value: u8 },
    /// Program Change: channel (0-15), program (0-127)
    ProgramChange { channel: u8, program: u8 },
    /// Channel Aftertouch: channel (0-15), pressure (0-127)
    ChannelAftertouch { channel: u8, pressure: u8 },
    /// Pitch Bend: channel (0-15), value (-8192 to 8191)
    PitchBend { channel: u8, value: i16 },
}

impl MidiMessage {
    /// Encode as raw MIDI bytes. Channels and data bytes are masked to their
    /// valid ranges.
    pub fn to_bytes(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => vec![status(messages::NOTE_ON, channel), note & 0x7F, velocity & 0x7F],
            MidiMessage::NoteOff {
                channel,
                note,
                velocity,
            } => vec![status(messages::NOTE_OFF, channel), note & 0x7F, velocity & 0x7F],
            MidiMessage::PolyAftertouch {
                channel,
                note,
                pressure,
            } => vec![
                status(messages::POLY_AFTERTOUCH, channel),
                note & 0x7F,
                pressure & 0x7F,
            ],
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => vec![
                status(messages::CONTROL_CHANGE, channel),
                controller & 0x7F,
                value & 0x7F,
            ],
            MidiMessage::ProgramChange { channel, program } => {
                vec![status(messages::PROGRAM_CHANGE, channel), program & 0x7F]
            }
            MidiMessage::ChannelAftertouch { channel, pressure } => {
                vec![status(messages::CHANNEL_AFTERTOUCH, channel), pressure & 0x7F]
            }
            MidiMessage::PitchBend { channel, value } => {
                let raw = (value.clamp(-8192, 8191) + 8192) as u16;
                vec![
                    status(messages::PITCH_BEND, channel),
                    (raw & 0x7F) as u8,
                    ((raw >> 7) & 0x7F) as u8,
                ]
            }
        }
    }

    /// Parse raw MIDI bytes. Returns `None` for anything that is not a
    /// complete channel voice message.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let status = *data.first()?;
        let msg_type = status & 0xF0;
        let channel = status & 0x0F;

        match msg_type {
            messages::NOTE_OFF if data.len() >= 3 => Some(MidiMessage::NoteOff {
                channel,
                note: data[1] & 0x7F,
                velocity: data[2] & 0x7F,
            }),
            messages::NOTE_ON if data.len() >= 3 => Some(MidiMessage::NoteOn {
                channel,
                note: data[1] & 0x7F,
                velocity: data[2] & 0x7F,
            }),
            messages::POLY_AFTERTOUCH if data.len() >= 3 => Some(MidiMessage::PolyAftertouch {
                channel,
                note: data[1] & 0x7F,
                pressure: data[2] & 0x7F,
            }),
            messages::CONTROL_CHANGE if data.len() >= 3 => Some(MidiMessage::ControlChange {
                channel,
                controller: data[1] & 0x7F,
                value: data[2] & 0x7F,
            }),
            messages::PROGRAM_CHANGE if data.len() >= 2 => Some(MidiMessage::ProgramChange {
                channel,
                program: data[1] & 0x7F,
            }),
            messages::CHANNEL_AFTERTOUCH if data.len() >= 2 => {
                Some(MidiMessage::ChannelAftertouch {
                    channel,
                    pressure: data[1] & 0x7F,
                })
            }
            messages::PITCH_BEND if data.len() >= 3 => {
                let lsb = (data[1] & 0x7F) as i16;
                let msb = (data[2] & 0x7F) as i16;
                let value = ((msb << 7) | lsb) - 8192;
                Some(MidiMessage::PitchBend { channel, value })
            }
            _ => None,
        }
    }

    pub fn channel(&self) -> u8 {
        match *self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::PolyAftertouch { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelAftertouch { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => channel,
        }
    }
}

fn status(kind: u8, channel: u8) -> u8 {
    kind | (channel & 0x0F)
}
