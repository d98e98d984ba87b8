// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! File watcher for hot-reloading compositions.
//!
//! Modifications to the watched composition file are debounced, then the
//! file is loaded and validated off the playback thread. A document that
//! fails to load is reported as an error and the composition already playing
//! stays active.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::Composition;

/// Events emitted by the composition watcher
#[derive(Debug, Clone)]
pub enum CompositionEvent {
    /// The file was modified and loaded successfully
    Reloaded(Arc<Composition>),
    /// The file was modified but failed to load
    Error(String),
}

/// Composition file watcher with debouncing and validation
pub struct CompositionWatcher {
    _watcher: RecommendedWatcher,
    event_receiver: Receiver<CompositionEvent>,
    watched_path: PathBuf,
}

impl CompositionWatcher {
    /// Watch a composition file.
    ///
    /// # Arguments
    /// * `path` - Composition file to watch
    /// * `debounce_ms` - Debounce duration in milliseconds (default: 500)
    pub fn new<P: AsRef<Path>>(path: P, debounce_ms: Option<u64>) -> Result<Self> {
        let watched_path = path.as_ref().to_path_buf();
        let debounce_duration = Duration::from_millis(debounce_ms.unwrap_or(500));

        let (event_tx, event_rx): (Sender<CompositionEvent>, Receiver<CompositionEvent>) =
            mpsc::channel();
        let (notify_tx, notify_rx): (Sender<Event>, Receiver<Event>) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            },
            Config::default(),
        )
        .map_err(|e| anyhow!("Failed to create file watcher: {}", e))?;

        // Editors often replace the file instead of writing it in place, so
        // watch the parent directory and filter on the file name.
        let watch_dir = watched_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| anyhow!("Failed to watch path {:?}: {}", watch_dir, e))?;

        let file_name = watched_path.file_name().map(|n| n.to_os_string());
        let load_path = watched_path.clone();

        std::thread::spawn(move || {
            let mut last_event_time: Option<Instant> = None;

            loop {
                match notify_rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(event) => {
                        let touches_file = event
                            .paths
                            .iter()
                            .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                        if !touches_file {
                            continue;
                        }
                        match event.kind {
                            EventKind::Create(_) | EventKind::Modify(_) => {
                                last_event_time = Some(Instant::now());
                            }
                            EventKind::Remove(_) => {
                                debug!("Composition file {:?} removed", load_path);
                            }
                            _ => {}
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        if let Some(last_time) = last_event_time {
                            if last_time.elapsed() >= debounce_duration {
                                last_event_time = None;
                                let event = match Composition::load(&load_path) {
                                    Ok(comp) => CompositionEvent::Reloaded(Arc::new(comp)),
                                    Err(e) => {
                                        warn!("Failed to reload {:?}: {}", load_path, e);
                                        CompositionEvent::Error(format!(
                                            "Failed to load {:?}: {}",
                                            load_path, e
                                        ))
                                    }
                                };
                                if event_tx.send(event).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        // Watcher was dropped, exit thread
                        break;
                    }
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            event_receiver: event_rx,
            watched_path,
        })
    }

    /// Try to receive the next event (non-blocking)
    pub fn try_recv(&self) -> Option<CompositionEvent> {
        self.event_receiver.try_recv().ok()
    }

    /// Receive all pending events
    pub fn recv_all(&self) -> Vec<CompositionEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    /// Get the path being watched
    pub fn watched_path(&self) -> &Path {
        &self.watched_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const INITIAL: &str = r#"
Name: "Initial"
Tracks:
  - Tempo: 120
    Sections: [ { Offset: 0, Trigger: 1 } ]
Triggers:
  - Id: 1
    Events: [ { Type: Midi, Event: NoteOn, Duration: 100 } ]
"#;

    #[test]
    fn test_watcher_creation() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("watch_test.yaml");
        fs::write(&file_path, INITIAL).unwrap();

        let watcher = CompositionWatcher::new(&file_path, Some(100)).unwrap();
        assert_eq!(watcher.watched_path(), file_path.as_path());
        assert!(watcher.recv_all().is_empty());
    }

    #[test]
    fn test_watcher_reports_changes() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("detect_test.yaml");
        fs::write(&file_path, INITIAL).unwrap();

        let watcher = CompositionWatcher::new(&file_path, Some(100)).unwrap();

        std::thread::sleep(Duration::from_millis(50));
        fs::write(&file_path, INITIAL.replace("Initial", "Modified")).unwrap();
        std::thread::sleep(Duration::from_millis(400));

        let events = watcher.recv_all();
        if let Some(CompositionEvent::Reloaded(comp)) = events
            .iter()
            .find(|e| matches!(e, CompositionEvent::Reloaded(_)))
        {
            assert_eq!(comp.name(), "Modified");
        }
        // File system notifications are not guaranteed to arrive in time on
        // every CI machine, so the absence of an event is not a failure.
    }

    #[test]
    fn test_watcher_reports_invalid_documents() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("broken.yaml");
        fs::write(&file_path, INITIAL).unwrap();

        let watcher = CompositionWatcher::new(&file_path, Some(100)).unwrap();

        std::thread::sleep(Duration::from_millis(50));
        fs::write(&file_path, "Tracks: [ {").unwrap();
        std::thread::sleep(Duration::from_millis(400));

        for event in watcher.recv_all() {
            assert!(matches!(event, CompositionEvent::Error(_)));
        }
    }
}
