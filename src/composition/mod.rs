// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Composition data model.
//!
//! A composition is a set of circular tracks. Each track carries sections at
//! fixed positions around its loop; every section points at a trigger, a
//! reusable bundle of MIDI and control events. The model is immutable once
//! built and is shared read-only by the scheduler and the dispatcher.

pub mod loader;
pub mod watcher;

pub use loader::CompositionFile;
pub use watcher::{CompositionEvent, CompositionWatcher};

use std::collections::HashSet;

use crate::error::{CompositionError, Result};

/// Identifier of a track, unique within a composition
pub type TrackId = u32;

/// Identifier of a trigger, unique within a composition
pub type TriggerId = u32;

/// Default track length, one full revolution in degrees
pub const DEFAULT_TRACK_LENGTH: u32 = 360;

/// Kind of MIDI message a trigger event produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MidiEventKind {
    NoteOn,
    NoteOff,
    KeyPressure,
    ChannelPressure,
    ControlChange,
    ProgramChange,
    PitchWheel,
    Meta,
    SysEx,
}

impl MidiEventKind {
    /// Parse an event kind name, case-insensitively. `cc` is accepted for
    /// control change.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name.to_lowercase().as_str() {
            "noteon" => MidiEventKind::NoteOn,
            "noteoff" => MidiEventKind::NoteOff,
            "keypressure" => MidiEventKind::KeyPressure,
            "channelpressure" => MidiEventKind::ChannelPressure,
            "controlchange" | "cc" => MidiEventKind::ControlChange,
            "programchange" => MidiEventKind::ProgramChange,
            "pitchwheel" => MidiEventKind::PitchWheel,
            "meta" => MidiEventKind::Meta,
            "sysex" => MidiEventKind::SysEx,
            _ => return None,
        };
        Some(kind)
    }

    /// Canonical name, as written in composition documents
    pub fn name(&self) -> &'static str {
        match self {
            MidiEventKind::NoteOn => "NoteOn",
            MidiEventKind::NoteOff => "NoteOff",
            MidiEventKind::KeyPressure => "KeyPressure",
            MidiEventKind::ChannelPressure => "ChannelPressure",
            MidiEventKind::ControlChange => "CC",
            MidiEventKind::ProgramChange => "ProgramChange",
            MidiEventKind::PitchWheel => "PitchWheel",
            MidiEventKind::Meta => "Meta",
            MidiEventKind::SysEx => "SysEx",
        }
    }
}

/// Message template carried by a MIDI trigger event.
///
/// The template is resolved against the firing track and section at dispatch
/// time: an unset channel falls back to the track default and the note is
/// shifted by the section transpose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiTemplate {
    pub kind: MidiEventKind,
    pub note: u8,
    /// `None` means "use the track's default channel"
    pub channel: Option<u8>,
    pub velocity: u8,
    pub value: i32,
    /// Controller number for control changes
    pub number: u8,
}

impl MidiTemplate {
    pub fn new(kind: MidiEventKind) -> Self {
        Self {
            kind,
            note: 60,
            channel: None,
            velocity: 60,
            value: 0,
            number: 0,
        }
    }

    pub fn note_on(note: u8, velocity: u8) -> Self {
        Self {
            note,
            velocity,
            ..Self::new(MidiEventKind::NoteOn)
        }
    }

    pub fn note_off(note: u8) -> Self {
        Self {
            note,
            velocity: 0,
            ..Self::new(MidiEventKind::NoteOff)
        }
    }

    pub fn control_change(number: u8, value: i32) -> Self {
        Self {
            number,
            value,
            ..Self::new(MidiEventKind::ControlChange)
        }
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = Some(channel);
        self
    }
}

/// A MIDI event inside a trigger
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiEvent {
    /// Offset in milliseconds from the nominal firing time
    pub delay: i64,
    /// Note length in milliseconds; a positive value schedules an implicit
    /// note-off
    pub duration: i64,
    pub message: MidiTemplate,
}

impl MidiEvent {
    pub fn new(message: MidiTemplate) -> Self {
        Self {
            delay: 0,
            duration: 0,
            message,
        }
    }

    pub fn with_delay(mut self, delay: i64) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }
}

/// One event of a trigger
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerEvent {
    NoOp,
    Midi(MidiEvent),
    /// Stop the track whose section fired the trigger
    Stop,
    /// Start another track
    Start { target: TrackId },
    /// Reset another track to its initial state
    Reset { target: TrackId },
}

impl TriggerEvent {
    /// Short name used in logs and dumps
    pub fn label(&self) -> &'static str {
        match self {
            TriggerEvent::NoOp => "NoOp",
            TriggerEvent::Midi(_) => "Midi",
            TriggerEvent::Stop => "Stop",
            TriggerEvent::Start { .. } => "Start",
            TriggerEvent::Reset { .. } => "Reset",
        }
    }
}

/// A named, reusable bundle of events
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub id: TriggerId,
    pub events: Vec<TriggerEvent>,
}

impl Trigger {
    pub fn new(id: TriggerId) -> Self {
        Self {
            id,
            events: Vec::new(),
        }
    }

    pub fn with_event(mut self, event: TriggerEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Check this trigger on its own
    pub fn validate(&self) -> Result<()> {
        if self.events.is_empty() {
            return Err(CompositionError::NoEvents { trigger: self.id });
        }
        for event in &self.events {
            if let TriggerEvent::Midi(midi) = event {
                if let Some(channel) = midi.message.channel {
                    if channel > 15 {
                        return Err(CompositionError::InvalidEventChannel {
                            trigger: self.id,
                            channel: channel as i64,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// A position on a track's loop that fires a trigger
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Section {
    /// Position within `[0, length)` of the owning track
    pub offset: f64,
    /// Unset when the document names no trigger; such a section fires nothing
    pub trigger: Option<TriggerId>,
    /// Semitone shift applied to note numbers
    pub transpose: i8,
}

impl Section {
    pub fn new(offset: f64, trigger: TriggerId) -> Self {
        Self {
            offset,
            trigger: Some(trigger),
            transpose: 0,
        }
    }

    /// A section without a trigger
    pub fn unbound(offset: f64) -> Self {
        Self {
            offset,
            trigger: None,
            transpose: 0,
        }
    }

    pub fn with_transpose(mut self, transpose: i8) -> Self {
        self.transpose = transpose;
        self
    }
}

/// One circular lane of the composition
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    /// Position in the composition, assigned when the composition is built
    pub index: usize,
    /// Position units per second
    pub tempo: f64,
    /// Loop length in position units
    pub length: u32,
    pub auto_start: bool,
    /// Channel used by events that leave theirs unset (0-15)
    pub midi_channel: u8,
    /// Number of laps to play, 0 loops forever
    pub loop_count: u32,
    /// Phase deltas between consecutive axles
    pub axle_offsets: Vec<f64>,
    pub sections: Vec<Section>,
}

impl Track {
    pub fn new(id: TrackId, tempo: f64) -> Self {
        Self {
            id,
            index: 0,
            tempo,
            length: DEFAULT_TRACK_LENGTH,
            auto_start: true,
            midi_channel: 0,
            loop_count: 0,
            axle_offsets: Vec::new(),
            sections: Vec::new(),
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_channel(mut self, channel: u8) -> Self {
        self.midi_channel = channel;
        self
    }

    pub fn with_loop_count(mut self, loop_count: u32) -> Self {
        self.loop_count = loop_count;
        self
    }

    pub fn with_axle_offsets(mut self, offsets: Vec<f64>) -> Self {
        self.axle_offsets = offsets;
        self
    }

    pub fn with_section(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    /// One virtual axle at phase 0 plus one per offset
    pub fn axle_count(&self) -> usize {
        self.axle_offsets.len() + 1
    }

    /// Cumulative phase of each axle, starting at 0
    pub fn axle_phases(&self) -> Vec<f64> {
        let mut phase = 0.0;
        let mut phases = Vec::with_capacity(self.axle_count());
        phases.push(phase);
        for offset in &self.axle_offsets {
            phase += offset;
            phases.push(phase);
        }
        phases
    }

    /// Convert a position on the loop to milliseconds
    pub fn position_to_ms(&self, position: f64) -> i64 {
        ((position / self.tempo) * 1000.0) as i64
    }

    /// Duration of one lap in milliseconds, or `None` when the tempo makes
    /// the loop unplayable
    pub fn length_ms(&self) -> Option<i64> {
        if !(self.tempo.is_finite() && self.tempo > 0.0) {
            return None;
        }
        let length = self.position_to_ms(self.length as f64);
        (length > 0).then_some(length)
    }

    /// Check this track on its own. `position` is used in error messages.
    pub fn validate(&self, position: usize) -> Result<()> {
        if !(self.tempo.is_finite() && self.tempo > 0.0) {
            return Err(CompositionError::InvalidTempo {
                track: position,
                tempo: self.tempo,
            });
        }
        if self.length == 0 {
            return Err(CompositionError::InvalidLength { track: position });
        }
        if self.length_ms().is_none() {
            return Err(CompositionError::TrackTooShort { track: position });
        }
        if self.midi_channel > 15 {
            return Err(CompositionError::InvalidTrackChannel {
                track: position,
                channel: self.midi_channel as i64,
            });
        }
        if let Some(&offset) = self
            .axle_offsets
            .iter()
            .find(|o| !(o.is_finite() && **o > 0.0))
        {
            return Err(CompositionError::InvalidAxleOffset {
                track: position,
                offset,
            });
        }
        if self.sections.is_empty() {
            return Err(CompositionError::NoSections { track: position });
        }
        for section in &self.sections {
            if !(section.offset >= 0.0 && section.offset < self.length as f64) {
                return Err(CompositionError::InvalidSectionOffset {
                    track: position,
                    offset: section.offset,
                    length: self.length,
                });
            }
        }
        Ok(())
    }
}

/// A complete, validated composition
#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    name: String,
    tracks: Vec<Track>,
    triggers: Vec<Trigger>,
}

impl Composition {
    /// Build a composition, assigning each track its index, and validate it.
    /// Nothing is returned unless every track and trigger is valid.
    pub fn new(
        name: impl Into<String>,
        mut tracks: Vec<Track>,
        triggers: Vec<Trigger>,
    ) -> Result<Self> {
        for (index, track) in tracks.iter_mut().enumerate() {
            track.index = index;
        }
        let composition = Self {
            name: name.into(),
            tracks,
            triggers,
        };
        composition.validate()?;
        Ok(composition)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn trigger(&self, index: usize) -> Option<&Trigger> {
        self.triggers.get(index)
    }

    /// Index of the trigger with the given id
    pub fn trigger_index(&self, id: TriggerId) -> Option<usize> {
        self.triggers.iter().position(|t| t.id == id)
    }

    pub fn track_by_id(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    /// Check the whole composition
    pub fn validate(&self) -> Result<()> {
        if self.tracks.is_empty() {
            return Err(CompositionError::NoTracks);
        }
        if self.triggers.is_empty() {
            return Err(CompositionError::NoTriggers);
        }

        let mut track_ids = HashSet::new();
        for (position, track) in self.tracks.iter().enumerate() {
            if !track_ids.insert(track.id) {
                return Err(CompositionError::DuplicateTrack(track.id));
            }
            track.validate(position)?;
        }

        let mut trigger_ids = HashSet::new();
        for trigger in &self.triggers {
            if !trigger_ids.insert(trigger.id) {
                return Err(CompositionError::DuplicateTrigger(trigger.id));
            }
            trigger.validate()?;
        }

        for track in &self.tracks {
            self.check_targets(track)?;
        }

        Ok(())
    }

    /// A track may not start or reset itself
    fn check_targets(&self, track: &Track) -> Result<()> {
        let triggers = track
            .sections
            .iter()
            .filter_map(|s| s.trigger)
            .filter_map(|id| self.triggers.iter().find(|t| t.id == id));
        for trigger in triggers {
            for event in &trigger.events {
                let kind = match event {
                    TriggerEvent::Start { target } if *target == track.id => "Start",
                    TriggerEvent::Reset { target } if *target == track.id => "Reset",
                    _ => continue,
                };
                return Err(CompositionError::SelfTarget {
                    track: track.id,
                    trigger: trigger.id,
                    event: kind,
                });
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}
