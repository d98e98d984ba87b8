// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Per-track event queues driven by wall-clock time.
//!
//! Each track keeps its flattened lap of events, a cursor into it and the
//! number of laps it has completed. Time spent stopped is excluded from a
//! track's elapsed time, so stopping and starting a track resumes it exactly
//! where it left off.
//!
//! All operations take the current time explicitly, in milliseconds.

use tracing::{debug, warn};

use super::flatten::{self, EntryKind, QueueEntry};
use crate::composition::{Composition, TrackId};

/// Queue state of one track
#[derive(Debug, Clone)]
pub struct TrackQueue {
    /// Index of the track in the composition
    track: usize,
    track_id: TrackId,
    auto_start: bool,
    loop_count: u32,
    /// Lap length in milliseconds
    length: i64,
    events: Vec<QueueEntry>,
    cursor: usize,
    lap: i64,
    running: bool,
    /// Whether the track resumes on a global start
    start: bool,
    /// Milliseconds spent running before `start_time`
    running_time: i64,
    start_time: i64,
    // Display state, refreshed by `EventQueue::advance`
    offset: i64,
    normalized_offset: f64,
}

impl TrackQueue {
    fn new(flat: flatten::FlatTrack, composition: &Composition) -> Option<Self> {
        let track = composition.track(flat.track)?;
        Some(Self {
            track: flat.track,
            track_id: track.id,
            auto_start: track.auto_start,
            loop_count: track.loop_count,
            length: flat.length,
            events: flat.events,
            cursor: 0,
            lap: 0,
            running: false,
            start: track.auto_start,
            running_time: 0,
            start_time: 0,
            offset: 0,
            normalized_offset: 0.0,
        })
    }

    /// Milliseconds this track has spent running
    pub fn elapsed(&self, now: i64) -> i64 {
        if self.running {
            self.running_time + (now - self.start_time)
        } else {
            self.running_time
        }
    }

    /// Lap the wall clock is in for this track
    pub fn lap_number(&self, now: i64) -> i64 {
        self.elapsed(now).div_euclid(self.length)
    }

    /// Position within the current lap, in milliseconds
    pub fn offset_in_lap(&self, now: i64) -> i64 {
        self.elapsed(now).rem_euclid(self.length)
    }

    pub fn track_index(&self) -> usize {
        self.track
    }

    pub fn track_id(&self) -> TrackId {
        self.track_id
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    pub fn length(&self) -> i64 {
        self.length
    }

    pub fn events(&self) -> &[QueueEntry] {
        &self.events
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Lap the cursor is in
    pub fn lap(&self) -> i64 {
        self.lap
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn running_time(&self) -> i64 {
        self.running_time
    }

    /// Offset computed by the last `advance` with display offsets enabled
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Offset as a fraction of the lap, in `[0, 1)`
    pub fn normalized_offset(&self) -> f64 {
        self.normalized_offset
    }

    fn start(&mut self, now: i64) {
        if self.running {
            return;
        }
        self.running = true;
        self.start_time = now;
    }

    fn stop(&mut self, now: i64) {
        if !self.running {
            return;
        }
        self.running_time += now - self.start_time;
        self.running = false;
    }

    fn reset(&mut self, now: i64) {
        self.running = self.auto_start;
        self.start = self.auto_start;
        self.running_time = 0;
        self.start_time = if self.running { now } else { 0 };
        self.cursor = 0;
        self.lap = 0;
    }

    /// Point the cursor at the first event not yet reached in the current lap
    fn seek(&mut self, now: i64) {
        let offset = self.offset_in_lap(now);
        let lap = self.lap_number(now);
        match self.events.iter().position(|e| e.timestamp >= offset) {
            Some(cursor) => {
                self.cursor = cursor;
                self.lap = lap;
            }
            None => {
                // Everything in this lap has passed; wait for the next one
                self.cursor = 0;
                self.lap = lap + 1;
            }
        }
    }
}

/// Snapshot of a track's position, for display
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackPosition {
    pub track_id: TrackId,
    /// Milliseconds into the current lap
    pub offset: i64,
    /// Offset as a fraction of the lap, in `[0, 1)`
    pub normalized_offset: f64,
    pub lap: i64,
    pub running: bool,
}

/// An event taken from the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueEvent {
    /// Index of the track queue that produced the event
    pub queue: usize,
    pub timestamp: i64,
    /// Lap of the track the event was delivered in
    pub lap: i64,
    pub kind: EntryKind,
}

/// Event queues for every track of a composition
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    tracks: Vec<TrackQueue>,
    origin: i64,
    now: i64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queue for a composition
    pub fn with_composition(composition: &Composition) -> Self {
        let mut queue = Self::new();
        queue.initialize(composition);
        queue
    }

    /// (Re)build every track queue from a composition, discarding all state
    pub fn initialize(&mut self, composition: &Composition) {
        self.tracks = flatten::flatten(composition)
            .into_iter()
            .filter_map(|flat| TrackQueue::new(flat, composition))
            .collect();
        debug!(
            "Queue initialized with {} tracks ({} events)",
            self.tracks.len(),
            self.tracks.iter().map(|t| t.events.len()).sum::<usize>()
        );
    }

    /// Re-arm every track at its auto-start state and line its cursor up with
    /// the time already elapsed on it.
    pub fn restart(&mut self, origin: i64, now: i64) {
        self.origin = origin;
        self.now = now;
        for tq in &mut self.tracks {
            tq.start_time = now;
            tq.running = tq.auto_start;
            tq.start = tq.auto_start;
            tq.seek(now);
        }
    }

    /// Resume every track that was playing when the queue was stopped
    pub fn start(&mut self, now: i64) {
        self.now = now;
        for tq in &mut self.tracks {
            if tq.start {
                tq.start(now);
            }
        }
    }

    /// Stop every track, remembering which ones were playing
    pub fn stop(&mut self, now: i64) {
        self.now = now;
        for tq in &mut self.tracks {
            tq.start = tq.running;
            tq.stop(now);
        }
    }

    /// Index of the queue playing the given track
    pub fn find(&self, track_id: TrackId) -> Option<usize> {
        self.tracks.iter().position(|tq| tq.track_id == track_id)
    }

    /// Start one track queue; no-op when already running
    pub fn start_queue(&mut self, index: usize, now: i64) {
        self.now = now;
        if let Some(tq) = self.tracks.get_mut(index) {
            tq.start(now);
        }
    }

    /// Stop one track queue; no-op when already stopped
    pub fn stop_queue(&mut self, index: usize, now: i64) {
        self.now = now;
        if let Some(tq) = self.tracks.get_mut(index) {
            tq.stop(now);
        }
    }

    /// Reset one track queue to lap 0 and its auto-start state
    pub fn reset_queue(&mut self, index: usize, now: i64) {
        self.now = now;
        if let Some(tq) = self.tracks.get_mut(index) {
            tq.reset(now);
        }
    }

    /// Start a track by id. Returns false if no such track is playing.
    pub fn start_track(&mut self, track_id: TrackId, now: i64) -> bool {
        self.find(track_id)
            .map(|index| self.start_queue(index, now))
            .is_some()
    }

    /// Stop a track by id. Returns false if no such track is playing.
    pub fn stop_track(&mut self, track_id: TrackId, now: i64) -> bool {
        self.find(track_id)
            .map(|index| self.stop_queue(index, now))
            .is_some()
    }

    /// Reset a track by id. Returns false if no such track is playing.
    pub fn reset_track(&mut self, track_id: TrackId, now: i64) -> bool {
        self.find(track_id)
            .map(|index| self.reset_queue(index, now))
            .is_some()
    }

    /// Move the queue's notion of now, optionally refreshing each track's
    /// display offsets
    pub fn advance(&mut self, now: i64, compute_offsets: bool) {
        self.now = now;
        if compute_offsets {
            for tq in &mut self.tracks {
                tq.offset = tq.offset_in_lap(now);
                tq.normalized_offset = tq.offset as f64 / tq.length as f64;
            }
        }
    }

    /// Take the next due event, if any.
    ///
    /// Tracks are scanned in declaration order and the first due event wins.
    /// Call repeatedly until `None` to drain everything that is due.
    pub fn take_front(&mut self, now: i64) -> Option<DueEvent> {
        self.now = now;
        for (index, tq) in self.tracks.iter_mut().enumerate() {
            if !tq.running || tq.cursor >= tq.events.len() {
                continue;
            }

            let lap = tq.lap_number(now);
            if tq.lap + 1 < lap {
                // A bounded track never skips past its final lap
                let mut target = lap - 1;
                if tq.loop_count > 0 {
                    target = target.min(tq.loop_count as i64 - 1);
                }
                if target > tq.lap {
                    warn!(
                        "Track {} fell {} laps behind, skipping ahead",
                        tq.track_id,
                        target - tq.lap
                    );
                    tq.lap = target;
                }
            }

            let entry = tq.events[tq.cursor];
            // A cursor still in an earlier lap is overdue
            let due = tq.lap < lap || (tq.lap == lap && entry.timestamp <= tq.offset_in_lap(now));
            if !due {
                continue;
            }

            let delivered_lap = tq.lap;
            tq.cursor += 1;
            if tq.cursor == tq.events.len() {
                tq.cursor = 0;
                tq.lap += 1;
            }
            return Some(DueEvent {
                queue: index,
                timestamp: entry.timestamp,
                lap: delivered_lap,
                kind: entry.kind,
            });
        }
        None
    }

    /// Milliseconds until the next event of any running track, capped at `max`
    pub fn min_time_until_next_event(&mut self, max: i64, now: i64) -> i64 {
        self.now = now;
        let mut time = max;
        for tq in &self.tracks {
            if !tq.running || tq.cursor >= tq.events.len() {
                continue;
            }

            let timestamp = tq.events[tq.cursor].timestamp;
            let offset = tq.offset_in_lap(now);
            let lap = tq.lap_number(now);

            let remaining = if tq.lap < lap {
                0
            } else if tq.cursor == 0 && tq.lap == lap + 1 {
                timestamp + (tq.length - offset)
            } else if tq.lap == lap {
                (timestamp - offset).max(0)
            } else {
                continue;
            };
            time = time.min(remaining);
        }
        time
    }

    /// Current positions of every track, as of the last display advance
    pub fn positions(&self) -> Vec<TrackPosition> {
        self.tracks
            .iter()
            .map(|tq| TrackPosition {
                track_id: tq.track_id,
                offset: tq.offset,
                normalized_offset: tq.normalized_offset,
                lap: tq.lap_number(self.now),
                running: tq.running,
            })
            .collect()
    }

    pub fn tracks(&self) -> &[TrackQueue] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> Option<&TrackQueue> {
        self.tracks.get(index)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn origin(&self) -> i64 {
        self.origin
    }

    pub fn now(&self) -> i64 {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::{
        MidiEvent, MidiTemplate, Section, Track, Trigger, TriggerEvent,
    };

    fn note_trigger(id: u32, note: u8) -> Trigger {
        Trigger::new(id).with_event(TriggerEvent::Midi(MidiEvent::new(MidiTemplate::note_on(
            note, 100,
        ))))
    }

    /// One track, 3000ms laps, notes at 0, 750 and 1500ms
    fn three_notes() -> Composition {
        Composition::new(
            "test",
            vec![Track::new(1, 120.0)
                .with_section(Section::new(0.0, 1))
                .with_section(Section::new(90.0, 1))
                .with_section(Section::new(180.0, 1))],
            vec![note_trigger(1, 60)],
        )
        .unwrap()
    }

    fn drain(queue: &mut EventQueue, now: i64) -> Vec<DueEvent> {
        let mut events = Vec::new();
        while let Some(e) = queue.take_front(now) {
            events.push(e);
        }
        events
    }

    #[test]
    fn test_initialize_builds_track_queues() {
        let queue = EventQueue::with_composition(&three_notes());
        assert_eq!(queue.len(), 1);

        let tq = &queue.tracks()[0];
        assert_eq!(tq.track_id(), 1);
        assert_eq!(tq.length(), 3000);
        assert_eq!(tq.events().len(), 4);
        assert!(!tq.is_running());
    }

    #[test]
    fn test_restart_arms_auto_start_tracks() {
        let comp = Composition::new(
            "test",
            vec![
                Track::new(1, 120.0).with_section(Section::new(0.0, 1)),
                Track::new(2, 120.0)
                    .with_auto_start(false)
                    .with_section(Section::new(0.0, 1)),
            ],
            vec![note_trigger(1, 60)],
        )
        .unwrap();
        let mut queue = EventQueue::with_composition(&comp);
        queue.restart(0, 1000);

        assert!(queue.tracks()[0].is_running());
        assert!(!queue.tracks()[1].is_running());
        assert_eq!(queue.tracks()[0].cursor(), 0);
        assert_eq!(queue.tracks()[0].lap(), 0);
        assert_eq!(queue.origin(), 0);
        assert_eq!(queue.now(), 1000);
    }

    #[test]
    fn test_events_delivered_in_time_order() {
        let mut queue = EventQueue::with_composition(&three_notes());
        queue.restart(0, 0);

        let first = drain(&mut queue, 0);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].kind, EntryKind::LoopBegin);
        assert_eq!(first[1].timestamp, 0);

        assert!(drain(&mut queue, 749).is_empty());
        let second = drain(&mut queue, 750);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].timestamp, 750);

        let third = drain(&mut queue, 2999);
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].timestamp, 1500);

        // Cursor wrapped into the next lap
        assert_eq!(queue.tracks()[0].cursor(), 0);
        assert_eq!(queue.tracks()[0].lap(), 1);
    }

    #[test]
    fn test_wrapped_cursor_waits_for_next_lap() {
        let mut queue = EventQueue::with_composition(&three_notes());
        queue.restart(0, 0);
        drain(&mut queue, 2000);

        // Everything in lap 0 has been delivered; nothing until 3000
        assert!(drain(&mut queue, 2500).is_empty());
        assert!(drain(&mut queue, 2999).is_empty());

        let next = drain(&mut queue, 3000);
        assert_eq!(next.len(), 2);
        assert_eq!(next[0].kind, EntryKind::LoopBegin);
    }

    #[test]
    fn test_each_event_once_per_lap() {
        let mut queue = EventQueue::with_composition(&three_notes());
        queue.restart(0, 0);

        let mut delivered = Vec::new();
        for now in (0..9000).step_by(7) {
            for e in drain(&mut queue, now) {
                delivered.push((now / 3000, e.timestamp));
            }
        }

        for lap in 0..3 {
            let in_lap: Vec<i64> = delivered
                .iter()
                .filter(|(l, _)| *l == lap)
                .map(|(_, ts)| *ts)
                .collect();
            assert_eq!(in_lap, vec![0, 0, 750, 1500], "lap {}", lap);
        }
    }

    #[test]
    fn test_restart_seeks_past_elapsed_events() {
        let mut queue = EventQueue::with_composition(&three_notes());
        queue.restart(0, 0);
        drain(&mut queue, 1000);
        queue.stop(1000);

        queue.restart(0, 5000);
        // Track is re-armed from its accumulated 1000ms
        assert_eq!(queue.tracks()[0].cursor(), 3);
        assert_eq!(queue.tracks()[0].lap(), 0);
        assert!(drain(&mut queue, 5000).is_empty());
        assert_eq!(drain(&mut queue, 5500)[0].timestamp, 1500);
    }

    #[test]
    fn test_restart_after_last_event_waits_for_next_lap() {
        let mut queue = EventQueue::with_composition(&three_notes());
        queue.restart(0, 0);
        queue.advance(2000, false);
        queue.stop(2000);

        queue.restart(0, 10_000);
        assert_eq!(queue.tracks()[0].cursor(), 0);
        assert_eq!(queue.tracks()[0].lap(), 1);
        assert!(drain(&mut queue, 10_500).is_empty());
        assert_eq!(drain(&mut queue, 11_000).len(), 2);
    }

    #[test]
    fn test_stop_and_start_exclude_stopped_time() {
        let mut queue = EventQueue::with_composition(&three_notes());
        queue.restart(0, 0);
        drain(&mut queue, 0);

        queue.stop(500);
        assert!(!queue.tracks()[0].is_running());
        assert_eq!(queue.tracks()[0].elapsed(10_000), 500);
        assert!(drain(&mut queue, 10_000).is_empty());

        queue.start(10_000);
        assert_eq!(queue.tracks()[0].offset_in_lap(10_000), 500);
        assert!(drain(&mut queue, 10_249).is_empty());
        assert_eq!(drain(&mut queue, 10_250)[0].timestamp, 750);
    }

    #[test]
    fn test_global_start_only_resumes_tracks_that_were_playing() {
        let comp = Composition::new(
            "test",
            vec![
                Track::new(1, 120.0).with_section(Section::new(0.0, 1)),
                Track::new(2, 120.0).with_section(Section::new(0.0, 1)),
            ],
            vec![note_trigger(1, 60)],
        )
        .unwrap();
        let mut queue = EventQueue::with_composition(&comp);
        queue.restart(0, 0);
        queue.stop_track(2, 100);

        queue.stop(200);
        queue.start(300);
        assert!(queue.tracks()[0].is_running());
        assert!(!queue.tracks()[1].is_running());
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let mut queue = EventQueue::with_composition(&three_notes());
        queue.restart(0, 0);

        queue.start_queue(0, 400);
        assert_eq!(queue.tracks()[0].elapsed(1000), 1000);

        queue.stop_queue(0, 1000);
        queue.stop_queue(0, 2000);
        assert_eq!(queue.tracks()[0].running_time(), 1000);
    }

    #[test]
    fn test_reset_rewinds_track() {
        let mut queue = EventQueue::with_composition(&three_notes());
        queue.restart(0, 0);
        drain(&mut queue, 7000);

        assert!(queue.reset_track(1, 7000));
        let tq = &queue.tracks()[0];
        assert_eq!(tq.cursor(), 0);
        assert_eq!(tq.lap(), 0);
        assert_eq!(tq.running_time(), 0);
        assert!(tq.is_running());
        assert_eq!(tq.elapsed(7000), 0);

        let events = drain(&mut queue, 7000);
        assert_eq!(events[0].kind, EntryKind::LoopBegin);
    }

    #[test]
    fn test_reset_of_manual_track_leaves_it_stopped() {
        let comp = Composition::new(
            "test",
            vec![Track::new(1, 120.0)
                .with_auto_start(false)
                .with_section(Section::new(0.0, 1))],
            vec![note_trigger(1, 60)],
        )
        .unwrap();
        let mut queue = EventQueue::with_composition(&comp);
        queue.restart(0, 0);
        queue.start_track(1, 100);
        drain(&mut queue, 1000);

        queue.reset_track(1, 2000);
        assert!(!queue.tracks()[0].is_running());
        assert_eq!(queue.tracks()[0].elapsed(5000), 0);
    }

    #[test]
    fn test_unknown_track_ids() {
        let mut queue = EventQueue::with_composition(&three_notes());
        assert!(!queue.start_track(9, 0));
        assert!(!queue.stop_track(9, 0));
        assert!(!queue.reset_track(9, 0));
        assert_eq!(queue.find(1), Some(0));
    }

    #[test]
    fn test_tracks_scanned_in_declaration_order() {
        let comp = Composition::new(
            "test",
            vec![
                Track::new(1, 120.0).with_section(Section::new(90.0, 1)),
                Track::new(2, 120.0).with_section(Section::new(90.0, 2)),
            ],
            vec![note_trigger(1, 60), note_trigger(2, 64)],
        )
        .unwrap();
        let mut queue = EventQueue::with_composition(&comp);
        queue.restart(0, 0);
        drain(&mut queue, 0);

        let events = drain(&mut queue, 750);
        let order: Vec<usize> = events.iter().map(|e| e.queue).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn test_late_wakeup_across_lap_boundary_catches_up() {
        let mut queue = EventQueue::with_composition(&three_notes());
        queue.restart(0, 0);
        drain(&mut queue, 1000);

        // The 1500ms event was missed; wake up early in the next lap
        let events = drain(&mut queue, 3100);
        let stamps: Vec<i64> = events.iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![1500, 0, 0]);
        let laps: Vec<i64> = events.iter().map(|e| e.lap).collect();
        assert_eq!(laps, vec![0, 1, 1]);
        assert_eq!(queue.tracks()[0].lap(), 1);
    }

    #[test]
    fn test_bounded_track_never_skips_past_final_lap() {
        let comp = Composition::new(
            "test",
            vec![Track::new(1, 120.0)
                .with_loop_count(2)
                .with_section(Section::new(0.0, 1))
                .with_section(Section::new(180.0, 1))],
            vec![note_trigger(1, 60)],
        )
        .unwrap();
        let mut queue = EventQueue::with_composition(&comp);
        queue.restart(0, 0);
        drain(&mut queue, 0);

        // Ten laps late: the rest of the final lap, then the loop end marker
        let events: Vec<DueEvent> = (0..2).filter_map(|_| queue.take_front(30_000)).collect();
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].timestamp, events[0].lap), (1500, 1));
        assert_eq!(events[1].kind, EntryKind::LoopBegin);
        assert_eq!(events[1].lap, 2);
    }

    #[test]
    fn test_min_time_until_next_event() {
        let mut queue = EventQueue::with_composition(&three_notes());
        queue.restart(0, 0);
        drain(&mut queue, 0);

        assert_eq!(queue.min_time_until_next_event(500, 0), 500);
        assert_eq!(queue.min_time_until_next_event(500, 600), 150);
        assert_eq!(queue.min_time_until_next_event(1000, 0), 750);

        drain(&mut queue, 2000);
        // Wrapped, waiting for the lap boundary at 3000
        assert_eq!(queue.min_time_until_next_event(5000, 2000), 1000);
        assert_eq!(queue.min_time_until_next_event(500, 2000), 500);
    }

    #[test]
    fn test_min_time_is_cap_when_nothing_runs() {
        let mut queue = EventQueue::with_composition(&three_notes());
        assert_eq!(queue.min_time_until_next_event(500, 0), 500);

        queue.restart(0, 0);
        queue.stop(0);
        for now in [0, 100, 2999, 3000, 100_000] {
            assert_eq!(queue.min_time_until_next_event(500, now), 500);
        }
    }

    #[test]
    fn test_min_time_reports_overdue_as_zero() {
        let mut queue = EventQueue::with_composition(&three_notes());
        queue.restart(0, 0);
        drain(&mut queue, 0);
        assert_eq!(queue.min_time_until_next_event(500, 800), 0);
    }

    #[test]
    fn test_advance_computes_display_offsets() {
        let mut queue = EventQueue::with_composition(&three_notes());
        queue.restart(0, 0);

        queue.advance(4500, false);
        assert_eq!(queue.tracks()[0].offset(), 0);

        queue.advance(4500, true);
        let positions = queue.positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].track_id, 1);
        assert_eq!(positions[0].offset, 1500);
        assert!((positions[0].normalized_offset - 0.5).abs() < 1e-9);
        assert_eq!(positions[0].lap, 1);
        assert!(positions[0].running);
    }
}
