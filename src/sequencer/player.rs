// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Dedicated playback thread.
//!
//! The thread owns the event queue, the dispatcher and the MIDI output. Other
//! threads control it through a [`Player`] handle, which only sends commands
//! over a channel; every queue mutation happens on the playback thread.
//!
//! Each cycle drains every due event, publishes track positions, then waits
//! for a command until the next event is due. The wait is capped at
//! `max_idle_ms`, so commands are never delayed longer than that.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

use super::dispatcher::Dispatcher;
use super::queue::{EventQueue, TrackPosition};
use crate::composition::{Composition, TrackId};
use crate::config::PlayerSettings;
use crate::midi::MidiOutput;
use crate::timing::Clock;

/// Upper bound on events dispatched in one cycle before commands are checked
const MAX_EVENTS_PER_CYCLE: usize = 4096;

/// Control commands for the playback thread
#[derive(Debug, Clone)]
pub enum Command {
    /// Resume every track that was playing at the last global stop
    Start,
    /// Stop every track and silence all notes
    Stop,
    StartTrack(TrackId),
    /// Stop one track and silence its notes
    StopTrack(TrackId),
    ResetTrack(TrackId),
    /// Replace the composition and restart playback
    Load(Arc<Composition>),
    Shutdown,
}

/// Handle to a running playback thread.
///
/// Dropping the handle shuts the thread down.
pub struct Player {
    commands: Sender<Command>,
    positions: Arc<Mutex<Vec<TrackPosition>>>,
    thread: Option<JoinHandle<Result<()>>>,
}

impl Player {
    /// Start playing a composition on a new thread
    pub fn spawn<C: Clock>(
        composition: Arc<Composition>,
        output: Box<dyn MidiOutput>,
        clock: C,
        settings: &PlayerSettings,
    ) -> Result<Self> {
        let (commands, receiver) = mpsc::channel();
        let positions = Arc::new(Mutex::new(Vec::new()));

        let playback = PlaybackLoop {
            queue: EventQueue::with_composition(&composition),
            dispatcher: Dispatcher::new(composition),
            output,
            clock,
            commands: receiver,
            positions: Arc::clone(&positions),
            max_idle_ms: settings.max_idle_ms.max(1) as i64,
        };

        let thread = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || playback.run())
            .context("Failed to spawn playback thread")?;

        Ok(Self {
            commands,
            positions,
            thread: Some(thread),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("Playback thread is not running"))
    }

    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    pub fn start_track(&self, track: TrackId) -> Result<()> {
        self.send(Command::StartTrack(track))
    }

    pub fn stop_track(&self, track: TrackId) -> Result<()> {
        self.send(Command::StopTrack(track))
    }

    pub fn reset_track(&self, track: TrackId) -> Result<()> {
        self.send(Command::ResetTrack(track))
    }

    /// Replace the composition being played
    pub fn load(&self, composition: Arc<Composition>) -> Result<()> {
        self.send(Command::Load(composition))
    }

    /// Ask the thread to stop without waiting for it
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// Positions of every track as of the last playback cycle
    pub fn positions(&self) -> Vec<TrackPosition> {
        self.positions
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Whether the playback thread is still alive
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Shut the thread down and wait for it to silence its notes and exit
    pub fn join(mut self) -> Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        // The thread may already be gone
        let _ = self.commands.send(Command::Shutdown);
        thread
            .join()
            .map_err(|_| anyhow!("Playback thread panicked"))?
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("Playback thread exited with error: {:#}", e);
        }
    }
}

/// State owned by the playback thread
struct PlaybackLoop<C> {
    queue: EventQueue,
    dispatcher: Dispatcher,
    output: Box<dyn MidiOutput>,
    clock: C,
    commands: Receiver<Command>,
    positions: Arc<Mutex<Vec<TrackPosition>>>,
    max_idle_ms: i64,
}

impl<C: Clock> PlaybackLoop<C> {
    fn run(mut self) -> Result<()> {
        let now = self.clock.now_ms();
        self.queue.restart(now, now);
        info!(
            "Playing '{}' ({} tracks)",
            self.dispatcher.composition().name(),
            self.queue.len()
        );

        loop {
            let now = self.clock.now_ms();
            self.drain(now);
            self.queue.advance(now, true);
            self.publish();

            let wait = self.queue.min_time_until_next_event(self.max_idle_ms, now);
            match self
                .commands
                .recv_timeout(Duration::from_millis(wait.max(0) as u64))
            {
                Ok(Command::Shutdown) => break,
                Ok(command) => {
                    let now = self.clock.now_ms();
                    self.apply(command, now);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Player handle dropped");
                    break;
                }
            }
        }

        info!("Playback stopped");
        self.dispatcher
            .all_notes_off(&mut self.output)
            .context("Failed to silence notes on shutdown")
    }

    /// Dispatch every event due at `now`
    fn drain(&mut self, now: i64) {
        let mut count = 0;
        while let Some(event) = self.queue.take_front(now) {
            if let Err(e) = self
                .dispatcher
                .dispatch(&event, &mut self.queue, &mut self.output, now)
            {
                warn!("MIDI send failed: {:#}", e);
            }
            count += 1;
            if count == MAX_EVENTS_PER_CYCLE {
                warn!("Dispatched {} events in one cycle, yielding", count);
                break;
            }
        }
    }

    fn publish(&self) {
        if let Ok(mut positions) = self.positions.lock() {
            *positions = self.queue.positions();
        }
    }

    fn apply(&mut self, command: Command, now: i64) {
        let result = match command {
            Command::Start => {
                info!("Transport started");
                self.queue.start(now);
                Ok(())
            }
            Command::Stop => {
                info!("Transport stopped");
                self.queue.stop(now);
                self.dispatcher.all_notes_off(&mut self.output)
            }
            Command::StartTrack(id) => {
                if !self.queue.start_track(id, now) {
                    warn!("Cannot start track {}: no such track", id);
                }
                Ok(())
            }
            Command::StopTrack(id) => match self.queue.find(id) {
                Some(index) => {
                    debug!("Track {} stopped", id);
                    self.queue.stop_queue(index, now);
                    self.dispatcher.flush_queue(index, &mut self.output)
                }
                None => {
                    warn!("Cannot stop track {}: no such track", id);
                    Ok(())
                }
            },
            Command::ResetTrack(id) => match self.queue.find(id) {
                Some(index) => {
                    debug!("Track {} reset", id);
                    self.queue.reset_queue(index, now);
                    self.dispatcher.flush_queue(index, &mut self.output)
                }
                None => {
                    warn!("Cannot reset track {}: no such track", id);
                    Ok(())
                }
            },
            Command::Load(composition) => {
                let result = self.dispatcher.all_notes_off(&mut self.output);
                self.queue.initialize(&composition);
                self.queue.restart(now, now);
                info!(
                    "Loaded '{}' ({} tracks)",
                    composition.name(),
                    self.queue.len()
                );
                self.dispatcher.set_composition(composition);
                result
            }
            Command::Shutdown => Ok(()),
        };

        if let Err(e) = result {
            warn!("MIDI send failed: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composition::{MidiEvent, MidiTemplate, Section, Track, Trigger, TriggerEvent};
    use crate::midi::{MidiMessage, RecordingOutput};
    use crate::timing::ManualClock;
    use std::time::Instant;

    fn settings() -> PlayerSettings {
        PlayerSettings {
            max_idle_ms: 5,
            ..PlayerSettings::default()
        }
    }

    fn single_note(note: u8, duration: i64) -> Arc<Composition> {
        Arc::new(
            Composition::new(
                "test",
                vec![Track::new(1, 120.0).with_section(Section::new(0.0, 1))],
                vec![Trigger::new(1).with_event(TriggerEvent::Midi(
                    MidiEvent::new(MidiTemplate::note_on(note, 100)).with_duration(duration),
                ))],
            )
            .unwrap(),
        )
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    fn note_on(note: u8) -> MidiMessage {
        MidiMessage::NoteOn {
            channel: 0,
            note,
            velocity: 100,
        }
    }

    fn note_off(note: u8) -> MidiMessage {
        MidiMessage::NoteOff {
            channel: 0,
            note,
            velocity: 0,
        }
    }

    #[test]
    fn test_plays_note_each_lap() {
        let output = RecordingOutput::new();
        let clock = ManualClock::new(0);
        let player = Player::spawn(
            single_note(60, 500),
            Box::new(output.clone()),
            clock.clone(),
            &settings(),
        )
        .unwrap();

        assert!(wait_until(|| output.messages() == vec![note_on(60)]));

        clock.set(500);
        assert!(wait_until(|| output.messages().len() == 2));

        clock.set(3000);
        assert!(wait_until(|| output.messages().len() == 3));
        assert_eq!(
            output.messages(),
            vec![note_on(60), note_off(60), note_on(60)]
        );

        player.join().unwrap();
    }

    #[test]
    fn test_shutdown_silences_sounding_notes() {
        let output = RecordingOutput::new();
        let player = Player::spawn(
            single_note(60, 0),
            Box::new(output.clone()),
            ManualClock::new(0),
            &settings(),
        )
        .unwrap();
        assert!(wait_until(|| output.messages().len() == 1));

        player.join().unwrap();
        assert_eq!(output.messages(), vec![note_on(60), note_off(60)]);
    }

    #[test]
    fn test_drop_shuts_down() {
        let output = RecordingOutput::new();
        {
            let _player = Player::spawn(
                single_note(60, 0),
                Box::new(output.clone()),
                ManualClock::new(0),
                &settings(),
            )
            .unwrap();
            assert!(wait_until(|| output.messages().len() == 1));
        }
        assert_eq!(output.messages().last(), Some(&note_off(60)));
    }

    #[test]
    fn test_stop_track_flushes_notes() {
        let output = RecordingOutput::new();
        let clock = ManualClock::new(0);
        let player = Player::spawn(
            single_note(60, 0),
            Box::new(output.clone()),
            clock.clone(),
            &settings(),
        )
        .unwrap();
        assert!(wait_until(|| output.messages().len() == 1));

        player.stop_track(1).unwrap();
        assert!(wait_until(|| output.messages().len() == 2));
        assert!(wait_until(|| player.positions().first().is_some_and(|p| !p.running)));

        // Stopped tracks stay silent
        clock.set(6000);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(output.messages(), vec![note_on(60), note_off(60)]);

        player.start_track(1).unwrap();
        assert!(wait_until(|| player.positions().first().is_some_and(|p| p.running)));
    }

    #[test]
    fn test_global_stop_and_start() {
        let output = RecordingOutput::new();
        let clock = ManualClock::new(0);
        let player = Player::spawn(
            single_note(60, 0),
            Box::new(output.clone()),
            clock.clone(),
            &settings(),
        )
        .unwrap();
        assert!(wait_until(|| output.messages().len() == 1));

        clock.set(1000);
        player.stop().unwrap();
        assert!(wait_until(|| output.messages().len() == 2));

        // Time spent stopped does not count
        clock.set(10_000);
        player.start().unwrap();
        assert!(wait_until(|| player
            .positions()
            .first()
            .is_some_and(|p| p.running && p.offset == 1000)));

        clock.set(12_000);
        assert!(wait_until(|| output.messages().len() == 3));
        player.join().unwrap();
    }

    #[test]
    fn test_load_replaces_composition() {
        let output = RecordingOutput::new();
        let player = Player::spawn(
            single_note(60, 0),
            Box::new(output.clone()),
            ManualClock::new(0),
            &settings(),
        )
        .unwrap();
        assert!(wait_until(|| output.messages().len() == 1));

        player.load(single_note(72, 0)).unwrap();
        assert!(wait_until(|| output.messages().len() == 3));
        assert_eq!(
            output.messages(),
            vec![note_on(60), note_off(60), note_on(72)]
        );
    }

    #[test]
    fn test_positions_are_published() {
        let clock = ManualClock::new(0);
        let player = Player::spawn(
            single_note(60, 0),
            Box::new(RecordingOutput::new()),
            clock.clone(),
            &settings(),
        )
        .unwrap();

        clock.set(4500);
        assert!(wait_until(|| player
            .positions()
            .first()
            .is_some_and(|p| p.offset == 1500 && p.lap == 1)));
        let position = player.positions()[0];
        assert_eq!(position.track_id, 1);
        assert!((position.normalized_offset - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_commands_fail_after_exit() {
        let player = Player::spawn(
            single_note(60, 0),
            Box::new(RecordingOutput::new()),
            ManualClock::new(0),
            &settings(),
        )
        .unwrap();
        player.shutdown().unwrap();
        assert!(wait_until(|| !player.is_running()));
        assert!(player.start().is_err());
    }
}
