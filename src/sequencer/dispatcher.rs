// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Turns due queue events into MIDI messages and track control.
//!
//! The dispatcher counts note activations per (queue, channel, note) so that
//! overlapping copies of the same note fired by several axles are each
//! released, and so that stopping or resetting a track never leaves a note
//! sounding.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, trace};

use super::flatten::{EntryKind, EventRef};
use super::queue::{DueEvent, EventQueue};
use crate::composition::{Composition, MidiEventKind, MidiTemplate, Section, Track, TriggerEvent};
use crate::midi::{MidiMessage, MidiOutput};

/// Key of a sounding note
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NoteKey {
    /// Index of the track queue that started the note
    pub queue: usize,
    pub channel: u8,
    pub note: u8,
}

/// Dispatches due events to a MIDI output
#[derive(Debug)]
pub struct Dispatcher {
    composition: Arc<Composition>,
    active: BTreeMap<NoteKey, u32>,
}

impl Dispatcher {
    pub fn new(composition: Arc<Composition>) -> Self {
        Self {
            composition,
            active: BTreeMap::new(),
        }
    }

    pub fn composition(&self) -> &Arc<Composition> {
        &self.composition
    }

    /// Replace the composition events are resolved against.
    ///
    /// Sounding notes must be flushed first; their keys refer to the queues of
    /// the previous composition.
    pub fn set_composition(&mut self, composition: Arc<Composition>) {
        self.composition = composition;
    }

    /// Outstanding activations of a note
    pub fn active_count(&self, key: NoteKey) -> u32 {
        self.active.get(&key).copied().unwrap_or(0)
    }

    /// Total outstanding activations across all tracks
    pub fn active_total(&self) -> u32 {
        self.active.values().sum()
    }

    /// Outstanding activations started by one track queue
    pub fn active_for_queue(&self, queue: usize) -> u32 {
        self.active
            .iter()
            .filter(|(key, _)| key.queue == queue)
            .map(|(_, count)| count)
            .sum()
    }

    /// Handle one due event.
    ///
    /// Control events act on `queue` at time `now`. Returns the first error
    /// from the output; bookkeeping is updated even when a send fails.
    pub fn dispatch<O>(
        &mut self,
        event: &DueEvent,
        queue: &mut EventQueue,
        output: &mut O,
        now: i64,
    ) -> Result<()>
    where
        O: MidiOutput + ?Sized,
    {
        let Some(tq) = queue.track(event.queue) else {
            return Ok(());
        };
        let track_id = tq.track_id();
        let loop_count = tq.loop_count();
        let track_index = tq.track_index();

        match event.kind {
            EntryKind::LoopBegin => {
                if loop_count > 0 && event.lap >= loop_count as i64 {
                    info!("Track {} finished {} loops", track_id, loop_count);
                    let result = self.flush_queue(event.queue, output);
                    queue.stop_queue(event.queue, now);
                    return result;
                }
                Ok(())
            }
            EntryKind::Trigger(handle) => {
                let composition = Arc::clone(&self.composition);
                let Some((track, section, trigger_event)) =
                    resolve(&composition, track_index, handle)
                else {
                    return Ok(());
                };

                match trigger_event {
                    TriggerEvent::NoOp => Ok(()),
                    TriggerEvent::Midi(midi) => {
                        self.play(event.queue, track, section, &midi.message, output)
                    }
                    TriggerEvent::Stop => {
                        debug!("Track {} stopped by trigger", track_id);
                        let result = self.flush_queue(event.queue, output);
                        queue.stop_queue(event.queue, now);
                        result
                    }
                    TriggerEvent::Start { target } | TriggerEvent::Reset { target }
                        if queue.find(*target) == Some(event.queue) =>
                    {
                        debug!("Track {}: ignoring {} of itself", track_id, trigger_event.label());
                        Ok(())
                    }
                    TriggerEvent::Start { target } => {
                        if queue.start_track(*target, now) {
                            debug!("Track {} started by track {}", target, track_id);
                        } else {
                            debug!("Track {}: start target {} does not exist", track_id, target);
                        }
                        Ok(())
                    }
                    TriggerEvent::Reset { target } => match queue.find(*target) {
                        Some(index) => {
                            debug!("Track {} reset by track {}", target, track_id);
                            let result = self.flush_queue(index, output);
                            queue.reset_queue(index, now);
                            result
                        }
                        None => {
                            debug!("Track {}: reset target {} does not exist", track_id, target);
                            Ok(())
                        }
                    },
                }
            }
            EntryKind::ImplicitNoteOff(handle) => {
                let composition = Arc::clone(&self.composition);
                let Some((track, section, TriggerEvent::Midi(midi))) =
                    resolve(&composition, track_index, handle)
                else {
                    return Ok(());
                };
                if midi.message.kind != MidiEventKind::NoteOn {
                    return Ok(());
                }

                let key = note_key(event.queue, track, section, &midi.message);
                if self.release(key) {
                    output.send_message(&MidiMessage::NoteOff {
                        channel: key.channel,
                        note: key.note,
                        velocity: 0,
                    })
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Release every note started by one track queue, one note-off per
    /// activation
    pub fn flush_queue<O>(&mut self, queue: usize, output: &mut O) -> Result<()>
    where
        O: MidiOutput + ?Sized,
    {
        let keys: Vec<NoteKey> = self
            .active
            .keys()
            .filter(|key| key.queue == queue)
            .copied()
            .collect();
        self.flush_keys(keys, output)
    }

    /// Release every sounding note of every track
    pub fn all_notes_off<O>(&mut self, output: &mut O) -> Result<()>
    where
        O: MidiOutput + ?Sized,
    {
        let keys: Vec<NoteKey> = self.active.keys().copied().collect();
        if !keys.is_empty() {
            info!("All notes off ({} sounding)", self.active_total());
        }
        self.flush_keys(keys, output)
    }

    fn flush_keys<O>(&mut self, keys: Vec<NoteKey>, output: &mut O) -> Result<()>
    where
        O: MidiOutput + ?Sized,
    {
        let mut result = Ok(());
        for key in keys {
            let count = self.active.remove(&key).unwrap_or(0);
            trace!(
                "Flushing note {} on channel {} ({} activations)",
                key.note,
                key.channel,
                count
            );
            for _ in 0..count {
                let sent = output.send_message(&MidiMessage::NoteOff {
                    channel: key.channel,
                    note: key.note,
                    velocity: 0,
                });
                if result.is_ok() {
                    result = sent;
                }
            }
        }
        result
    }

    fn play<O>(
        &mut self,
        queue: usize,
        track: &Track,
        section: &Section,
        template: &MidiTemplate,
        output: &mut O,
    ) -> Result<()>
    where
        O: MidiOutput + ?Sized,
    {
        let key = note_key(queue, track, section, template);
        let NoteKey { channel, note, .. } = key;

        let message = match template.kind {
            MidiEventKind::NoteOn => {
                *self.active.entry(key).or_insert(0) += 1;
                MidiMessage::NoteOn {
                    channel,
                    note,
                    velocity: template.velocity,
                }
            }
            MidiEventKind::NoteOff => {
                self.release(key);
                MidiMessage::NoteOff {
                    channel,
                    note,
                    velocity: template.velocity,
                }
            }
            MidiEventKind::KeyPressure => MidiMessage::PolyAftertouch {
                channel,
                note,
                pressure: data_byte(template.value),
            },
            MidiEventKind::ChannelPressure => MidiMessage::ChannelAftertouch {
                channel,
                pressure: data_byte(template.value),
            },
            MidiEventKind::ControlChange => MidiMessage::ControlChange {
                channel,
                controller: template.number,
                value: data_byte(template.value),
            },
            MidiEventKind::ProgramChange => MidiMessage::ProgramChange {
                channel,
                program: data_byte(template.value),
            },
            MidiEventKind::PitchWheel => MidiMessage::PitchBend {
                channel,
                value: template.value.clamp(-8192, 8191) as i16,
            },
            MidiEventKind::Meta | MidiEventKind::SysEx => {
                debug!(
                    "Track {}: {} events are not sent",
                    track.id,
                    template.kind.name()
                );
                return Ok(());
            }
        };

        output.send_message(&message)
    }

    /// Release one activation. Returns false if the note was not sounding.
    fn release(&mut self, key: NoteKey) -> bool {
        match self.active.get_mut(&key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.active.remove(&key);
                true
            }
            None => false,
        }
    }
}

fn resolve(
    composition: &Composition,
    track: usize,
    handle: EventRef,
) -> Option<(&Track, &Section, &TriggerEvent)> {
    let track = composition.track(track)?;
    let section = track.sections.get(handle.section)?;
    let event = composition.trigger(handle.trigger)?.events.get(handle.event)?;
    Some((track, section, event))
}

/// Channel falls back to the track's, note is transposed and clamped
fn note_key(queue: usize, track: &Track, section: &Section, template: &MidiTemplate) -> NoteKey {
    let note = (template.note as i16 + section.transpose as i16).clamp(0, 127) as u8;
    NoteKey {
        queue,
        channel: template.channel.unwrap_or(track.midi_channel),
        note,
    }
}

fn data_byte(value: i32) -> u8 {
    value.clamp(0, 127) as u8
}
