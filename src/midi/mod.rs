// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! MIDI output abstraction layer.
//!
//! The playback engine only ever talks to a [`MidiOutput`], so the midir
//! backend, a file recorder or a test double can be used interchangeably.

pub mod message;
pub mod midir_backend;

use anyhow::Result;

pub use message::MidiMessage;
pub use midir_backend::{list_destinations, print_destinations, MidirOutput};

/// Trait for MIDI output implementations.
///
/// Outputs accept discrete messages and give no feedback the engine depends
/// on.
pub trait MidiOutput: Send {
    /// Send a MIDI message immediately.
    ///
    /// # Arguments
    /// * `message` - Raw MIDI bytes (e.g., `[0x90, 60, 127]` for Note On)
    ///
    /// # Returns
    /// * `Ok(())` on success
    /// * `Err` if the message could not be sent
    fn send(&mut self, message: &[u8]) -> Result<()>;

    /// Send a channel message
    fn send_message(&mut self, message: &MidiMessage) -> Result<()> {
        self.send(&message.to_bytes())
    }
}

impl<T: MidiOutput + ?Sized> MidiOutput for Box<T> {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        (**self).send(message)
    }
}

/// MIDI message constants
pub mod messages {
    // Channel Voice Messages (upper nibble, lower nibble is channel 0-15)
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_AFTERTOUCH: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_AFTERTOUCH: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;
}

/// Output that records every message, for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct RecordingOutput {
    messages: std::sync::Arc<std::sync::Mutex<Vec<Vec<u8>>>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw bytes of every message sent so far
    pub fn raw(&self) -> Vec<Vec<u8>> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Every message sent so far, parsed
    pub fn messages(&self) -> Vec<MidiMessage> {
        self.raw()
            .iter()
            .filter_map(|m| MidiMessage::parse(m))
            .collect()
    }

    /// Forget recorded messages
    pub fn clear(&self) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.clear();
        }
    }
}

impl MidiOutput for RecordingOutput {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_vec());
        }
        Ok(())
    }
}
