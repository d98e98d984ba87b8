// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Timing and clock module.
//!
//! The playback engine never reads a clock itself; the player samples one of
//! these clocks and passes the current time explicitly.

pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};
