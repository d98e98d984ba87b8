// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Flattening of tracks into absolute, time-ordered event lists.
//!
//! Every section of a track fires its trigger once per axle and revolution.
//! Flattening expands sections, axles and trigger events into one list of
//! timestamps within a single lap, so the scheduler only has to walk a
//! cursor around it.

use tracing::debug;

use crate::composition::{Composition, Track, TriggerEvent};

/// Handle to a trigger event as fired by a particular section.
///
/// All indices point into the composition the list was flattened from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventRef {
    /// Index of the section within its track
    pub section: usize,
    /// Index of the trigger within the composition
    pub trigger: usize,
    /// Index of the event within the trigger
    pub event: usize,
}

/// What a queue entry does when it comes due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Start of a lap, used for bounded looping
    LoopBegin,
    /// A trigger event fired by a section
    Trigger(EventRef),
    /// Release of a note started by a MIDI event with a duration
    ImplicitNoteOff(EventRef),
}

/// One entry of a flattened track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    /// Milliseconds from the start of the lap, within `[0, length)`
    pub timestamp: i64,
    pub kind: EntryKind,
}

impl QueueEntry {
    pub fn new(timestamp: i64, kind: EntryKind) -> Self {
        Self { timestamp, kind }
    }
}

/// A track flattened into a single lap of events
#[derive(Debug, Clone, PartialEq)]
pub struct FlatTrack {
    /// Index of the track within the composition
    pub track: usize,
    /// Lap length in milliseconds
    pub length: i64,
    /// Entries sorted by timestamp; ties keep their insertion order
    pub events: Vec<QueueEntry>,
}

/// Flatten one track.
///
/// Returns `None` when the track's tempo does not give a playable loop;
/// validated compositions never contain such tracks.
pub fn flatten_track(track: &Track, composition: &Composition) -> Option<FlatTrack> {
    let length = track.length_ms()?;
    let phases = track.axle_phases();

    let mut events = vec![QueueEntry::new(0, EntryKind::LoopBegin)];

    for (section_index, section) in track.sections.iter().enumerate() {
        let Some(trigger_index) = section.trigger.and_then(|id| composition.trigger_index(id))
        else {
            debug!(
                "Track {}: section {} has no known trigger ({:?})",
                track.id, section_index, section.trigger
            );
            continue;
        };
        let trigger = &composition.triggers()[trigger_index];

        for (axle, phase) in phases.iter().enumerate() {
            let base = track.position_to_ms(section.offset + phase);

            for (event_index, event) in trigger.events.iter().enumerate() {
                let handle = EventRef {
                    section: section_index,
                    trigger: trigger_index,
                    event: event_index,
                };

                match event {
                    TriggerEvent::Midi(midi) => {
                        let at = base + midi.delay;
                        events.push(QueueEntry::new(
                            at.rem_euclid(length),
                            EntryKind::Trigger(handle),
                        ));
                        if midi.duration > 0 {
                            events.push(QueueEntry::new(
                                (at + midi.duration).rem_euclid(length),
                                EntryKind::ImplicitNoteOff(handle),
                            ));
                        }
                    }
                    // Control events fire once per revolution, on the first axle
                    TriggerEvent::Stop | TriggerEvent::Start { .. } | TriggerEvent::Reset { .. } => {
                        if axle == 0 {
                            events.push(QueueEntry::new(
                                base.rem_euclid(length),
                                EntryKind::Trigger(handle),
                            ));
                        }
                    }
                    TriggerEvent::NoOp => {}
                }
            }
        }
    }

    // Stable: LoopBegin stays first and simultaneous entries keep their order
    events.sort_by_key(|e| e.timestamp);

    Some(FlatTrack {
        track: track.index,
        length,
        events,
    })
}

/// Flatten every playable track of a composition, in declaration order
pub fn flatten(composition: &Composition) -> Vec<FlatTrack> {
    composition
        .tracks()
        .iter()
        .filter_map(|track| {
            let flat = flatten_track(track, composition);
            if flat.is_none() {
                debug!("Track {} has no playable loop, skipping", track.id);
            }
            flat
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::{MidiEvent, MidiTemplate, Section, Trigger};

    fn note(note: u8) -> TriggerEvent {
        TriggerEvent::Midi(MidiEvent::new(MidiTemplate::note_on(note, 100)))
    }

    fn comp(track: Track, triggers: Vec<Trigger>) -> Composition {
        Composition::new("test", vec![track], triggers).unwrap()
    }

    fn timestamps(flat: &FlatTrack) -> Vec<i64> {
        flat.events.iter().map(|e| e.timestamp).collect()
    }

    #[test]
    fn test_single_note_track() {
        let c = comp(
            Track::new(1, 120.0).with_section(Section::new(90.0, 1)),
            vec![Trigger::new(1).with_event(note(60))],
        );
        let flat = flatten_track(&c.tracks()[0], &c).unwrap();

        assert_eq!(flat.length, 3000);
        assert_eq!(flat.track, 0);
        assert_eq!(timestamps(&flat), vec![0, 750]);
        assert_eq!(flat.events[0].kind, EntryKind::LoopBegin);
        assert_eq!(
            flat.events[1].kind,
            EntryKind::Trigger(EventRef {
                section: 0,
                trigger: 0,
                event: 0
            })
        );
    }

    #[test]
    fn test_one_entry_per_axle() {
        let c = comp(
            Track::new(1, 120.0)
                .with_axle_offsets(vec![90.0, 90.0, 45.0])
                .with_section(Section::new(10.0, 1)),
            vec![Trigger::new(1).with_event(note(60))],
        );
        let flat = flatten_track(&c.tracks()[0], &c).unwrap();

        let triggers: Vec<i64> = flat
            .events
            .iter()
            .filter(|e| matches!(e.kind, EntryKind::Trigger(_)))
            .map(|e| e.timestamp)
            .collect();
        // Angles 10, 100, 190, 235 at 120 units per second
        assert_eq!(triggers, vec![83, 833, 1583, 1958]);
    }

    #[test]
    fn test_axle_duplicates_wrap_around_the_loop() {
        let c = comp(
            Track::new(1, 120.0)
                .with_axle_offsets(vec![180.0])
                .with_section(Section::new(270.0, 1)),
            vec![Trigger::new(1).with_event(note(60))],
        );
        let flat = flatten_track(&c.tracks()[0], &c).unwrap();
        // 270 -> 2250ms, 450 -> 3750ms wraps to 750ms
        assert_eq!(timestamps(&flat), vec![0, 750, 2250]);
    }

    #[test]
    fn test_duration_adds_paired_note_off() {
        let c = comp(
            Track::new(1, 120.0)
                .with_axle_offsets(vec![120.0])
                .with_section(Section::new(0.0, 1)),
            vec![Trigger::new(1).with_event(TriggerEvent::Midi(
                MidiEvent::new(MidiTemplate::note_on(60, 100)).with_duration(500),
            ))],
        );
        let flat = flatten_track(&c.tracks()[0], &c).unwrap();

        let ons = flat
            .events
            .iter()
            .filter(|e| matches!(e.kind, EntryKind::Trigger(_)))
            .count();
        let offs: Vec<i64> = flat
            .events
            .iter()
            .filter(|e| matches!(e.kind, EntryKind::ImplicitNoteOff(_)))
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(ons, 2);
        assert_eq!(offs, vec![500, 1500]);
    }

    #[test]
    fn test_note_off_wraps_past_lap_end() {
        let c = comp(
            Track::new(1, 120.0).with_section(Section::new(300.0, 1)),
            vec![Trigger::new(1).with_event(TriggerEvent::Midi(
                MidiEvent::new(MidiTemplate::note_on(60, 100)).with_duration(800),
            ))],
        );
        let flat = flatten_track(&c.tracks()[0], &c).unwrap();
        // On at 2500ms, off at 3300ms wraps to 300ms
        assert_eq!(timestamps(&flat), vec![0, 300, 2500]);
        assert!(matches!(flat.events[1].kind, EntryKind::ImplicitNoteOff(_)));
    }

    #[test]
    fn test_delay_shifts_midi_events_only() {
        let c = comp(
            Track::new(1, 120.0).with_section(Section::new(0.0, 1)),
            vec![Trigger::new(1)
                .with_event(TriggerEvent::Midi(
                    MidiEvent::new(MidiTemplate::note_on(60, 100)).with_delay(-100),
                ))
                .with_event(TriggerEvent::Stop)],
        );
        let flat = flatten_track(&c.tracks()[0], &c).unwrap();
        // The negative delay wraps to the end of the lap
        assert_eq!(timestamps(&flat), vec![0, 0, 2900]);
        assert_eq!(flat.events[0].kind, EntryKind::LoopBegin);
        assert!(matches!(flat.events[1].kind, EntryKind::Trigger(r) if r.event == 1));
    }

    #[test]
    fn test_control_events_fire_on_first_axle_only() {
        let c = Composition::new(
            "test",
            vec![
                Track::new(1, 120.0)
                    .with_axle_offsets(vec![90.0, 90.0])
                    .with_section(Section::new(30.0, 1)),
                Track::new(2, 120.0).with_section(Section::new(0.0, 2)),
            ],
            vec![
                Trigger::new(1)
                    .with_event(TriggerEvent::Stop)
                    .with_event(TriggerEvent::Start { target: 2 })
                    .with_event(TriggerEvent::Reset { target: 2 }),
                Trigger::new(2).with_event(note(60)),
            ],
        )
        .unwrap();
        let flat = flatten_track(&c.tracks()[0], &c).unwrap();

        assert_eq!(timestamps(&flat), vec![0, 250, 250, 250]);
        let order: Vec<usize> = flat
            .events
            .iter()
            .filter_map(|e| match e.kind {
                EntryKind::Trigger(r) => Some(r.event),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_simultaneous_entries_keep_declaration_order() {
        let c = comp(
            Track::new(1, 120.0)
                .with_section(Section::new(0.0, 1))
                .with_section(Section::new(0.0, 2)),
            vec![
                Trigger::new(1).with_event(note(60)),
                Trigger::new(2).with_event(note(64)),
            ],
        );
        let flat = flatten_track(&c.tracks()[0], &c).unwrap();
        let sections: Vec<usize> = flat
            .events
            .iter()
            .filter_map(|e| match e.kind {
                EntryKind::Trigger(r) => Some(r.section),
                _ => None,
            })
            .collect();
        assert_eq!(sections, vec![0, 1]);
    }

    #[test]
    fn test_unknown_trigger_contributes_nothing() {
        let c = comp(
            Track::new(1, 120.0)
                .with_section(Section::new(0.0, 42))
                .with_section(Section::unbound(90.0))
                .with_section(Section::new(180.0, 1)),
            vec![Trigger::new(1).with_event(note(60))],
        );
        let flat = flatten_track(&c.tracks()[0], &c).unwrap();
        assert_eq!(timestamps(&flat), vec![0, 1500]);
    }

    #[test]
    fn test_noop_events_are_skipped() {
        let c = comp(
            Track::new(1, 120.0).with_section(Section::new(0.0, 1)),
            vec![Trigger::new(1).with_event(TriggerEvent::NoOp)],
        );
        let flat = flatten_track(&c.tracks()[0], &c).unwrap();
        assert_eq!(flat.events.len(), 1);
    }

    #[test]
    fn test_flatten_every_track() {
        let c = Composition::new(
            "test",
            vec![
                Track::new(1, 120.0).with_section(Section::new(0.0, 1)),
                Track::new(2, 60.0).with_section(Section::new(0.0, 1)),
            ],
            vec![Trigger::new(1).with_event(note(60))],
        )
        .unwrap();
        let flat = flatten(&c);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].length, 3000);
        assert_eq!(flat[1].length, 6000);
        assert_eq!(flat[1].track, 1);
    }
}
