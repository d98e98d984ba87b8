// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

use std::env;
use std::io::{self, BufRead};
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use miditrain::composition::{
    Composition, CompositionEvent, CompositionWatcher, TrackId, TriggerEvent,
};
use miditrain::config::PlayerSettings;
use miditrain::midi::{print_destinations, MidiMessage, MidiOutput, MidirOutput};
use miditrain::sequencer::{flatten, Command, EntryKind, Player};
use miditrain::timing::SystemClock;

/// How often the control loop polls stdin and the watcher
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Settings read from the working directory when `--config` is not given
const DEFAULT_SETTINGS_FILE: &str = "miditrain.toml";

fn print_usage() {
    println!("MidiTrain - Looping MIDI Composition Player");
    println!();
    println!("Usage: miditrain [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --list-midi             List available MIDI destinations (outputs)");
    println!("  --test-note <N>         Send a test note to MIDI destination N");
    println!("  --check <FILE>          Validate a composition and summarise it");
    println!("  --dump <FILE>           Print the flattened event list of every track");
    println!("  --play <FILE>           Play a composition");
    println!("      --port <N|NAME>     MIDI destination index or name (default: settings, then 0)");
    println!("      --config <FILE>     Player settings (TOML, default: ./miditrain.toml if present)");
    println!("      --positions         Print track positions while playing");
    println!("  --init-config <FILE>    Write the default player settings to FILE");
    println!("  --help                  Show this help message");
    println!();
    println!("While playing, type on stdin:");
    println!("  start | stop            Start or stop the transport");
    println!("  start <ID> | stop <ID>  Start or stop one track");
    println!("  reset <ID>              Reset one track");
    println!("  quit                    Silence all notes and exit");
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // A subscriber may already be installed
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn send_test_note(destination: usize) -> Result<()> {
    println!("Connecting to MIDI destination {}...", destination);
    let mut output = MidirOutput::new(destination)?;
    println!("Connected to {}", output.port_name());

    let channel = 0; // MIDI channel 1
    let note = 60; // Middle C
    let velocity = 100;

    println!("Sending test note (Middle C, velocity {})...", velocity);
    output.send_message(&MidiMessage::NoteOn {
        channel,
        note,
        velocity,
    })?;
    println!("Note On sent");

    thread::sleep(Duration::from_millis(500));

    output.send_message(&MidiMessage::NoteOff {
        channel,
        note,
        velocity: 0,
    })?;
    println!("Note Off sent");

    println!("Test complete!");
    Ok(())
}

fn check_composition(path: &str) -> Result<()> {
    let composition = Composition::load(path)?;

    println!("Composition '{}' is valid", composition.name());
    println!();
    println!("Tracks:");
    for track in composition.tracks() {
        let laps = if track.loop_count == 0 {
            "forever".to_string()
        } else {
            format!("{} laps", track.loop_count)
        };
        println!(
            "  {}: {}ms lap, {} axles, {} sections, channel {}, {}{}",
            track.id,
            track.length_ms().unwrap_or(0),
            track.axle_count(),
            track.sections.len(),
            track.midi_channel + 1,
            laps,
            if track.auto_start { "" } else { ", manual start" }
        );
    }
    println!("Triggers:");
    for trigger in composition.triggers() {
        let events: Vec<&str> = trigger.events.iter().map(|e| e.label()).collect();
        println!("  {}: {}", trigger.id, events.join(", "));
    }
    Ok(())
}

fn dump_composition(path: &str) -> Result<()> {
    let composition = Composition::load(path)?;

    for flat in flatten(&composition) {
        let Some(track) = composition.track(flat.track) else {
            continue;
        };
        println!("Track {} ({}ms)", track.id, flat.length);
        for entry in &flat.events {
            let description = match entry.kind {
                EntryKind::LoopBegin => "loop begin".to_string(),
                EntryKind::Trigger(handle) => {
                    let trigger = composition.trigger(handle.trigger);
                    match trigger.and_then(|t| t.events.get(handle.event)) {
                        Some(TriggerEvent::Midi(midi)) => format!(
                            "trigger {} {} note {}",
                            trigger.map_or(0, |t| t.id),
                            midi.message.kind.name(),
                            midi.message.note
                        ),
                        Some(TriggerEvent::Start { target }) => format!("start track {}", target),
                        Some(TriggerEvent::Reset { target }) => format!("reset track {}", target),
                        Some(event) => event.label().to_lowercase(),
                        None => "?".to_string(),
                    }
                }
                EntryKind::ImplicitNoteOff(handle) => {
                    format!("note off (section {})", handle.section)
                }
            };
            println!("  {:>8}  {}", entry.timestamp, description);
        }
    }
    Ok(())
}

/// Connect to a port by index, or by name when `port` is not a number
fn open_output(port: Option<&str>) -> Result<MidirOutput> {
    match port {
        Some(port) => match port.parse::<usize>() {
            Ok(index) => MidirOutput::new(index),
            Err(_) => MidirOutput::new_by_name(port),
        },
        None => MidirOutput::new(0),
    }
}

/// Parse a line typed while playing
fn parse_command(line: &str) -> Result<Command> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let track = |word: &str| {
        word.parse::<TrackId>()
            .map_err(|_| anyhow!("Invalid track id: {}", word))
    };

    match words.as_slice() {
        ["start"] => Ok(Command::Start),
        ["stop"] => Ok(Command::Stop),
        ["start", id] => Ok(Command::StartTrack(track(*id)?)),
        ["stop", id] => Ok(Command::StopTrack(track(*id)?)),
        ["reset", id] => Ok(Command::ResetTrack(track(*id)?)),
        ["quit"] | ["exit"] => Ok(Command::Shutdown),
        _ => Err(anyhow!("Unknown command: {}", line.trim())),
    }
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn play(path: &str, port: Option<&str>, settings: &PlayerSettings, show_positions: bool) -> Result<()> {
    let composition = Arc::new(Composition::load(path)?);

    let port = port.or(settings.output_port.as_deref());
    let output = open_output(port)?;
    println!("Playing '{}' on {}", composition.name(), output.port_name());
    println!("Type 'quit' to stop");

    let player = Player::spawn(composition, Box::new(output), SystemClock::new(), settings)?;

    let watcher = if settings.watch {
        match CompositionWatcher::new(Path::new(path), None) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Hot reload disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    let input = spawn_stdin_reader();
    let display_interval = Duration::from_millis(settings.display_interval_ms);
    let mut last_display = Instant::now();

    loop {
        if let Some(watcher) = &watcher {
            for event in watcher.recv_all() {
                match event {
                    CompositionEvent::Reloaded(composition) => {
                        info!("Composition changed, reloading");
                        player.load(composition)?;
                    }
                    CompositionEvent::Error(e) => {
                        warn!("Keeping current composition: {}", e);
                    }
                }
            }
        }

        match input.try_recv() {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => match parse_command(&line) {
                Ok(Command::Shutdown) => break,
                Ok(Command::Start) => player.start()?,
                Ok(Command::Stop) => player.stop()?,
                Ok(Command::StartTrack(id)) => player.start_track(id)?,
                Ok(Command::StopTrack(id)) => player.stop_track(id)?,
                Ok(Command::ResetTrack(id)) => player.reset_track(id)?,
                Ok(Command::Load(composition)) => player.load(composition)?,
                Err(e) => eprintln!("{}", e),
            },
            Err(mpsc::TryRecvError::Empty) => {}
            // stdin closed; keep playing until the player stops
            Err(mpsc::TryRecvError::Disconnected) => {}
        }

        if !player.is_running() {
            break;
        }

        if show_positions
            && !display_interval.is_zero()
            && last_display.elapsed() >= display_interval
        {
            last_display = Instant::now();
            let line: Vec<String> = player
                .positions()
                .iter()
                .map(|p| {
                    format!(
                        "{}:{}{:>3.0}%/{}",
                        p.track_id,
                        if p.running { ">" } else { "|" },
                        p.normalized_offset * 100.0,
                        p.lap
                    )
                })
                .collect();
            println!("{}", line.join("  "));
        }

        thread::sleep(POLL_INTERVAL);
    }

    player.join()?;
    println!("Stopped");
    Ok(())
}

/// Value following `flag`, if present
fn option_value<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>> {
    match args.iter().position(|a| a == flag) {
        Some(i) => args
            .get(i + 1)
            .map(|v| Some(v.as_str()))
            .ok_or_else(|| anyhow!("{} requires a value", flag)),
        None => Ok(None),
    }
}

fn require_file<'a>(args: &'a [String], option: &str) -> &'a str {
    match args.get(2) {
        Some(file) => file,
        None => {
            eprintln!("Error: {} requires a composition file", option);
            std::process::exit(1);
        }
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        println!("MidiTrain - Looping MIDI Composition Player");
        println!("Run with --help for usage information");
        return Ok(());
    }

    let settings = match option_value(&args, "--config")? {
        Some(path) => PlayerSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path))?,
        None => PlayerSettings::load_or_default(DEFAULT_SETTINGS_FILE)?,
    };
    init_logging(&settings.log_level);

    match args[1].as_str() {
        "--list-midi" => {
            print_destinations();
        }
        "--test-note" => {
            if args.len() < 3 {
                eprintln!("Error: --test-note requires a destination number");
                eprintln!("Use --list-midi to see available destinations");
                std::process::exit(1);
            }
            let destination: usize = args[2]
                .parse()
                .map_err(|_| anyhow!("Invalid destination number: {}", args[2]))?;
            send_test_note(destination)?;
        }
        "--check" => {
            check_composition(require_file(&args, "--check"))?;
        }
        "--dump" => {
            dump_composition(require_file(&args, "--dump"))?;
        }
        "--play" => {
            let path = require_file(&args, "--play");
            let port = option_value(&args, "--port")?;
            let show_positions = args.iter().any(|a| a == "--positions");
            play(path, port, &settings, show_positions)?;
        }
        "--init-config" => {
            let Some(path) = args.get(2) else {
                eprintln!("Error: --init-config requires a file name");
                std::process::exit(1);
            };
            PlayerSettings::default().save(path)?;
            println!("Wrote default settings to {}", path);
        }
        "--help" | "-h" => {
            print_usage();
        }
        _ => {
            eprintln!("Unknown option: {}", args[1]);
            print_usage();
            std::process::exit(1);
        }
    }

    Ok(())
}
