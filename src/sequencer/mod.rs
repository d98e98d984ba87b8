// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Sequencer core for scheduling and playing compositions.
//!
//! This module provides the playback engine:
//! - Flattening of tracks into per-lap event lists
//! - Per-track event queues with lap bookkeeping
//! - Dispatch of due events to MIDI with note-off safety
//! - The playback thread and its control handle

pub mod dispatcher;
pub mod flatten;
pub mod player;
pub mod queue;

pub use dispatcher::{Dispatcher, NoteKey};
pub use flatten::{flatten, flatten_track, EntryKind, EventRef, FlatTrack, QueueEntry};
pub use player::{Command, Player};
pub use queue::{DueEvent, EventQueue, TrackPosition, TrackQueue};
