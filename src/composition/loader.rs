// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Composition documents.
//!
//! Compositions are stored as YAML (JSON documents parse as well, being
//! valid YAML flow syntax). The document structs here mirror the file
//! layout; converting them into a [`Composition`] performs all validation,
//! so a document either loads completely or not at all.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    Composition, MidiEvent, MidiEventKind, MidiTemplate, Section, Track, TrackId, Trigger,
    TriggerEvent, TriggerId, DEFAULT_TRACK_LENGTH,
};
use crate::error::{CompositionError, Result};

/// Root of a composition document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "PascalCase")]
pub struct CompositionFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tracks: Vec<TrackConfig>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
}

/// Track entry of a composition document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TrackConfig {
    /// Assigned automatically when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TrackId>,
    /// Position units per second
    #[serde(default)]
    pub tempo: f64,
    #[serde(default = "default_length")]
    pub length: u32,
    /// Number of laps to play, 0 loops forever
    #[serde(default, rename = "Loop")]
    pub loop_count: u32,
    /// Whether the track starts with playback
    #[serde(default = "default_start", rename = "Start")]
    pub auto_start: bool,
    #[serde(default)]
    pub midi_channel: i64,
    #[serde(default)]
    pub axle_offsets: Vec<f64>,
    #[serde(default)]
    pub sections: Vec<SectionConfig>,
}

fn default_length() -> u32 {
    DEFAULT_TRACK_LENGTH
}
fn default_start() -> bool {
    true
}

/// Section entry of a track
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct SectionConfig {
    #[serde(default)]
    pub offset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerId>,
    #[serde(default)]
    pub transpose: i8,
}

/// Trigger entry of a composition document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TriggerConfig {
    #[serde(default)]
    pub id: Option<TriggerId>,
    #[serde(default)]
    pub events: Vec<EventConfig>,
}

/// Trigger event, tagged by its `Type` field
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "Type")]
pub enum EventConfig {
    Midi(MidiEventConfig),
    Stop,
    Start(TargetConfig),
    Reset(TargetConfig),
}

/// Fields of a `Midi` event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MidiEventConfig {
    #[serde(default)]
    pub delay: i64,
    #[serde(default)]
    pub duration: i64,
    /// MIDI event kind name, e.g. `NoteOn` or `CC`
    #[serde(default)]
    pub event: String,
    #[serde(default = "default_note")]
    pub note: u8,
    /// -1 leaves the channel to the track default
    #[serde(default = "default_event_channel")]
    pub channel: i64,
    #[serde(default = "default_velocity")]
    pub velocity: u8,
    #[serde(default)]
    pub value: i32,
    #[serde(default)]
    pub number: u8,
}

fn default_note() -> u8 {
    60
}
fn default_event_channel() -> i64 {
    -1
}
fn default_velocity() -> u8 {
    60
}

/// Fields of `Start` and `Reset` events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TargetConfig {
    #[serde(default)]
    pub target: Option<TrackId>,
}

impl CompositionFile {
    /// Load a composition document from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|source| {
            CompositionError::Io {
                path: path.as_ref().to_path_buf(),
                source,
            }
        })?;
        Self::from_yaml(&contents)
    }

    /// Parse a composition document.
    ///
    /// Only checks the document shape; use [`CompositionFile::into_composition`]
    /// to validate the content.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let root: serde_yaml::Value =
            serde_yaml::from_str(yaml).map_err(|e| CompositionError::Parse(e.to_string()))?;
        if !root.is_mapping() {
            return Err(CompositionError::Parse(
                "Expected a root-level object in the document".to_string(),
            ));
        }
        serde_yaml::from_value(root).map_err(|e| CompositionError::Parse(e.to_string()))
    }

    /// Serialize to a YAML string
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| CompositionError::Parse(e.to_string()))
    }

    /// Describe an existing composition as a document
    pub fn from_composition(composition: &Composition) -> Self {
        let tracks = composition
            .tracks()
            .iter()
            .map(|t| TrackConfig {
                id: Some(t.id),
                tempo: t.tempo,
                length: t.length,
                loop_count: t.loop_count,
                auto_start: t.auto_start,
                midi_channel: t.midi_channel as i64,
                axle_offsets: t.axle_offsets.clone(),
                sections: t
                    .sections
                    .iter()
                    .map(|s| SectionConfig {
                        offset: Some(s.offset),
                        trigger: s.trigger,
                        transpose: s.transpose,
                    })
                    .collect(),
            })
            .collect();

        let triggers = composition
            .triggers()
            .iter()
            .map(|t| TriggerConfig {
                id: Some(t.id),
                events: t.events.iter().filter_map(event_to_config).collect(),
            })
            .collect();

        Self {
            name: Some(composition.name().to_string()),
            tracks,
            triggers,
        }
    }

    /// Validate the document and build the composition it describes
    pub fn into_composition(self) -> Result<Composition> {
        let mut max_id: TrackId = 0;
        let mut tracks = Vec::with_capacity(self.tracks.len());
        for (position, config) in self.tracks.into_iter().enumerate() {
            let track = config.into_track(position, &mut max_id)?;
            track.validate(position)?;
            tracks.push(track);
        }

        let mut triggers = Vec::with_capacity(self.triggers.len());
        for (position, config) in self.triggers.into_iter().enumerate() {
            let trigger = config.into_trigger(position)?;
            trigger.validate()?;
            triggers.push(trigger);
        }

        Composition::new(self.name.unwrap_or_default(), tracks, triggers)
    }
}

impl TrackConfig {
    fn into_track(self, position: usize, max_id: &mut TrackId) -> Result<Track> {
        let id = match self.id {
            Some(id) => {
                *max_id = (*max_id).max(id);
                id
            }
            None => {
                *max_id += 1;
                *max_id
            }
        };

        if !(0..=15).contains(&self.midi_channel) {
            return Err(CompositionError::InvalidTrackChannel {
                track: position,
                channel: self.midi_channel,
            });
        }

        let mut sections = Vec::with_capacity(self.sections.len());
        for section in self.sections {
            let offset = section.offset.ok_or(CompositionError::IncompleteSection {
                track: position,
                field: "Offset",
            })?;
            sections.push(Section {
                offset,
                trigger: section.trigger,
                transpose: section.transpose,
            });
        }

        Ok(Track {
            id,
            index: position,
            tempo: self.tempo,
            length: self.length,
            auto_start: self.auto_start,
            midi_channel: self.midi_channel as u8,
            loop_count: self.loop_count,
            axle_offsets: self.axle_offsets,
            sections,
        })
    }
}

impl TriggerConfig {
    fn into_trigger(self, position: usize) -> Result<Trigger> {
        let id = self
            .id
            .ok_or(CompositionError::MissingTriggerId { trigger: position })?;

        let mut trigger = Trigger::new(id);
        for event in self.events {
            trigger.events.push(event.into_event(id)?);
        }
        Ok(trigger)
    }
}

impl EventConfig {
    fn into_event(self, trigger: TriggerId) -> Result<TriggerEvent> {
        let event = match self {
            EventConfig::Midi(midi) => {
                let kind = MidiEventKind::from_name(&midi.event).ok_or_else(|| {
                    CompositionError::InvalidMidiEvent {
                        trigger,
                        kind: midi.event.clone(),
                    }
                })?;
                let channel = match midi.channel {
                    -1 => None,
                    c @ 0..=15 => Some(c as u8),
                    c => {
                        return Err(CompositionError::InvalidEventChannel {
                            trigger,
                            channel: c,
                        })
                    }
                };
                TriggerEvent::Midi(MidiEvent {
                    delay: midi.delay,
                    duration: midi.duration,
                    message: MidiTemplate {
                        kind,
                        note: midi.note,
                        channel,
                        velocity: midi.velocity,
                        value: midi.value,
                        number: midi.number,
                    },
                })
            }
            EventConfig::Stop => TriggerEvent::Stop,
            EventConfig::Start(t) => TriggerEvent::Start {
                target: t.target.ok_or(CompositionError::MissingTarget {
                    trigger,
                    event: "Start",
                })?,
            },
            EventConfig::Reset(t) => TriggerEvent::Reset {
                target: t.target.ok_or(CompositionError::MissingTarget {
                    trigger,
                    event: "Reset",
                })?,
            },
        };
        Ok(event)
    }
}

fn event_to_config(event: &TriggerEvent) -> Option<EventConfig> {
    let config = match event {
        TriggerEvent::NoOp => return None,
        TriggerEvent::Midi(midi) => EventConfig::Midi(MidiEventConfig {
            delay: midi.delay,
            duration: midi.duration,
            event: midi.message.kind.name().to_string(),
            note: midi.message.note,
            channel: midi.message.channel.map_or(-1, |c| c as i64),
            velocity: midi.message.velocity,
            value: midi.message.value,
            number: midi.message.number,
        }),
        TriggerEvent::Stop => EventConfig::Stop,
        TriggerEvent::Start { target } => EventConfig::Start(TargetConfig {
            target: Some(*target),
        }),
        TriggerEvent::Reset { target } => EventConfig::Reset(TargetConfig {
            target: Some(*target),
        }),
    };
    Some(config)
}

impl Composition {
    /// Load and validate a composition file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let result = CompositionFile::load(path.as_ref()).and_then(|f| f.into_composition());
        match &result {
            Ok(comp) => info!(
                "Loaded composition '{}' from {:?}: {} tracks, {} triggers",
                comp.name(),
                path.as_ref(),
                comp.tracks().len(),
                comp.triggers().len()
            ),
            Err(e) => debug!("Rejected composition {:?}: {}", path.as_ref(), e),
        }
        result
    }

    /// Parse and validate a composition from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        CompositionFile::from_yaml(yaml)?.into_composition()
    }

    /// Serialize to a YAML document
    pub fn to_yaml(&self) -> Result<String> {
        CompositionFile::from_composition(self).to_yaml()
    }

    /// Save to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = self.to_yaml()?;
        fs::write(path.as_ref(), yaml).map_err(|source| CompositionError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })
    }
}
