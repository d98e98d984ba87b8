// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! midir backend.
//!
//! This module provides a cross-platform implementation of the `MidiOutput`
//! trait on top of midir (CoreMIDI, ALSA, WinMM).

use anyhow::{anyhow, Result};
use midir::{MidiOutput as MidirPorts, MidiOutputConnection};

use super::MidiOutput;

const CLIENT_NAME: &str = "MidiTrain";

/// MIDI output connected to a system port
pub struct MidirOutput {
    connection: MidiOutputConnection,
    port_name: String,
}

impl MidirOutput {
    /// Connect to the output port at the given index.
    ///
    /// # Arguments
    /// * `destination_index` - Index of the port in the system's output list
    ///
    /// # Returns
    /// * `Ok(MidirOutput)` on success
    /// * `Err` if the client could not be created or the port does not exist
    pub fn new(destination_index: usize) -> Result<Self> {
        let output = MidirPorts::new(CLIENT_NAME)
            .map_err(|e| anyhow!("Failed to create MIDI client: {}", e))?;

        let ports = output.ports();
        let port = ports.get(destination_index).ok_or_else(|| {
            anyhow!(
                "MIDI destination {} not found (only {} available)",
                destination_index,
                ports.len()
            )
        })?;
        let port_name = output
            .port_name(port)
            .unwrap_or_else(|_| format!("Unknown {}", destination_index));

        let connection = output
            .connect(port, "MidiTrain Output")
            .map_err(|e| anyhow!("Failed to connect to '{}': {}", port_name, e))?;

        Ok(Self {
            connection,
            port_name,
        })
    }

    /// Connect to the first output port whose name contains `name`
    /// (case-insensitive).
    pub fn new_by_name(name: &str) -> Result<Self> {
        let destinations = list_destinations();
        let index = destinations
            .iter()
            .position(|(_, n)| n.to_lowercase().contains(&name.to_lowercase()))
            .ok_or_else(|| anyhow!("No MIDI destination matching '{}' found", name))?;

        Self::new(destinations[index].0)
    }

    /// Name of the connected port
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl MidiOutput for MidirOutput {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.connection
            .send(message)
            .map_err(|e| anyhow!("Failed to send MIDI message: {}", e))
    }
}

/// List all available MIDI destinations.
///
/// # Returns
/// A vector of (index, name) tuples. Empty when no MIDI client can be created.
pub fn list_destinations() -> Vec<(usize, String)> {
    let output = match MidirPorts::new(CLIENT_NAME) {
        Ok(output) => output,
        Err(_) => return Vec::new(),
    };

    output
        .ports()
        .iter()
        .enumerate()
        .map(|(i, port)| {
            let name = output
                .port_name(port)
                .unwrap_or_else(|_| format!("Unknown {}", i));
            (i, name)
        })
        .collect()
}

/// Print all available MIDI destinations to stdout.
pub fn print_destinations() {
    let destinations = list_destinations();
    if destinations.is_empty() {
        println!("No MIDI destinations found.");
    } else {
        println!("Available MIDI destinations:");
        for (i, name) in destinations {
            println!("  {}: {}", i, name);
        }
    }
}
