// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! MidiTrain: a looping multi-track MIDI composition player.
//!
//! A [`Composition`] is loaded from YAML, flattened into per-track event
//! lists and played on a dedicated thread by a [`Player`], which sends the
//! resulting messages to a [`MidiOutput`].

pub mod composition;
pub mod config;
pub mod error;
pub mod midi;
pub mod sequencer;
pub mod timing;

pub use composition::{Composition, Section, Track, Trigger, TriggerEvent};
pub use config::PlayerSettings;
pub use error::CompositionError;
pub use midi::{MidiMessage, MidiOutput};
pub use sequencer::{Dispatcher, EventQueue, Player};
pub use timing::{Clock, ManualClock, SystemClock};
