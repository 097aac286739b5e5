// Copyright 2025-2026 CEMAXECUTER LLC

pub mod bits;
pub mod block0;
pub mod config;
pub mod detect;
pub mod downlink;
pub mod engine;
pub mod error;
pub mod recover;
pub mod sim;
pub mod sniff;

pub use config::{Bitrate, Block0Source, Config, DownlinkMode, Modulation};
pub use engine::Engine;
pub use error::T55Error;

/// Samples requested per acquisition: enough for several repetitions of a
/// 32-bit block at the slowest clock.
pub const ACQUIRE_SAMPLES: usize = 12000;
