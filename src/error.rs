// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Load-time errors for compositions.
//!
//! Every variant rejects the whole composition: a document that fails any of
//! these checks is discarded and never partially applied.

use std::path::PathBuf;

use thiserror::Error;

use crate::composition::{TrackId, TriggerId};

#[derive(Error, Debug)]
pub enum CompositionError {
    #[error("Failed to read composition file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse composition: {0}")]
    Parse(String),

    #[error("Composition has no tracks")]
    NoTracks,

    #[error("Composition has no triggers")]
    NoTriggers,

    #[error("Duplicate track id {0}")]
    DuplicateTrack(TrackId),

    #[error("Duplicate trigger id {0}")]
    DuplicateTrigger(TriggerId),

    #[error("Track #{track}: tempo must be a positive number, got {tempo}")]
    InvalidTempo { track: usize, tempo: f64 },

    #[error("Track #{track}: length must be positive")]
    InvalidLength { track: usize },

    #[error("Track #{track}: one loop lasts less than a millisecond")]
    TrackTooShort { track: usize },

    #[error("Track #{track}: incorrect axle offset {offset}")]
    InvalidAxleOffset { track: usize, offset: f64 },

    #[error("Track #{track}: no sections")]
    NoSections { track: usize },

    #[error("Track #{track}: incompletely specified section (missing {field})")]
    IncompleteSection { track: usize, field: &'static str },

    #[error("Track #{track}: section offset {offset} outside [0, {length})")]
    InvalidSectionOffset {
        track: usize,
        offset: f64,
        length: u32,
    },

    #[error("Track #{track}: MIDI channel {channel} out of range 0-15")]
    InvalidTrackChannel { track: usize, channel: i64 },

    #[error("Trigger #{trigger}: missing Id")]
    MissingTriggerId { trigger: usize },

    #[error("Trigger {trigger}: no events")]
    NoEvents { trigger: TriggerId },

    #[error("Trigger {trigger}: invalid MIDI event '{kind}'")]
    InvalidMidiEvent { trigger: TriggerId, kind: String },

    #[error("Trigger {trigger}: MIDI channel {channel} out of range 0-15")]
    InvalidEventChannel { trigger: TriggerId, channel: i64 },

    #[error("Trigger {trigger}: {event} event is missing its Target")]
    MissingTarget {
        trigger: TriggerId,
        event: &'static str,
    },

    #[error("Track {track}: trigger {trigger} has a {event} event targeting the track itself")]
    SelfTarget {
        track: TrackId,
        trigger: TriggerId,
        event: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, CompositionError>;
