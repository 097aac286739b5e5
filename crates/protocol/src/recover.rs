// Copyright 2025-2026 CEMAXECUTER LLC

//! Password recovery: brute-force range scan, dictionary scan, and
//! bit-mutation recovery, all layered on the engine's single-attempt probe.
//! Not finding a password is a normal terminal outcome, never an error.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lf_reader::ReaderTransport;

use crate::config::DownlinkMode;
use crate::engine::{DetectOptions, Engine};
use crate::error::T55Error;

/// Cooperative cancellation flag, polled once per candidate. A trial in
/// flight always completes its transport round-trip.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Built-in candidate list: publicly known transport keys, cloner defaults
/// and other passwords seen in the wild.
pub const DEFAULT_PASSWORDS: &[u32] = &[
    0x51243648, 0x000D8787, 0x19920427, 0x50524F58, 0xF9DCEBA0, 0x65857569, 0x05D73B9F, 0x89A69E60,
    0x314159E0, 0xAA55BBBB, 0xA5B4C3D2, 0x1C0B5848, 0x00434343, 0x444E4752, 0x4E457854, 0x44B44CAE,
    0x88661858, 0xE9920427, 0x575F4F4B, 0x50520901, 0x20206666, 0x52F44A50, 0x5469616E, 0x7686962A,
    0xC0F5009A, 0x07CEE75D, 0xFEEDBEEF, 0xDEADC0DE, 0x00000000, 0x11111111, 0x22222222, 0x33333333,
    0x44444444, 0x55555555, 0x66666666, 0x77777777, 0x88888888, 0x99999999, 0xAAAAAAAA, 0xBBBBBBBB,
    0xCCCCCCCC, 0xDDDDDDDD, 0xEEEEEEEE, 0xFFFFFFFF, 0x12345678, 0x98765432, 0xFFFF0000, 0x0000FFFF,
];

/// Password a white-label cloner derives from the EM4100 identifier it
/// programmed. Lets a dictionary run cover cloned tags with one calculated
/// candidate.
pub fn cloner_password(card_id: u32) -> u32 {
    let r1 = (card_id & 0x000000ec).rotate_left(8);
    let r2 = (card_id & 0x86000000).rotate_left(16);
    0x10303u32.wrapping_add((card_id & 0x86ee00ec) ^ r1 ^ r2)
}

/// Probe one password: attempt a detection with it under the chosen
/// downlink mode, or under all four modes in ascending order. Returns the
/// mode that answered.
pub fn try_password<T: ReaderTransport>(
    engine: &mut Engine<T>,
    password: u32,
    mode: DownlinkMode,
    try_all_modes: bool,
) -> Result<Option<DownlinkMode>, T55Error> {
    let opts = DetectOptions {
        use_password: true,
        password,
        try_all_modes,
        wanted: None,
        mode,
    };
    match engine.detect_config(&opts) {
        Ok(_) => Ok(Some(engine.config.downlink_mode)),
        Err(T55Error::SignalTooWeak) | Err(T55Error::DecodeError(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn scan<T, I>(
    engine: &mut Engine<T>,
    candidates: I,
    mode: DownlinkMode,
    try_all_modes: bool,
    cancel: &CancelToken,
) -> Result<Option<(u32, DownlinkMode)>, T55Error>
where
    T: ReaderTransport,
    I: IntoIterator<Item = u32>,
{
    for (i, password) in candidates.into_iter().enumerate() {
        if cancel.is_cancelled() {
            log::info!("password search cancelled after {} candidates", i);
            return Ok(None);
        }
        if i > 0 && i % 256 == 0 {
            log::info!("tried {} candidates, current {:#010x}", i, password);
        }
        if let Some(found_mode) = try_password(engine, password, mode, try_all_modes)? {
            log::info!(
                "found password {:#010x} (downlink mode: {})",
                password,
                found_mode
            );
            return Ok(Some((password, found_mode)));
        }
    }
    Ok(None)
}

/// Exhaustive scan of `start..=end`. Stops at the first hit; cancellation is
/// checked once per candidate.
pub fn brute_force<T: ReaderTransport>(
    engine: &mut Engine<T>,
    start: u32,
    end: u32,
    mode: DownlinkMode,
    try_all_modes: bool,
    cancel: &CancelToken,
) -> Result<Option<(u32, DownlinkMode)>, T55Error> {
    if start > end {
        return Err(T55Error::InvalidArgument(format!(
            "empty password range {:#010x}..{:#010x}",
            start, end
        )));
    }
    scan(engine, start..=end, mode, try_all_modes, cancel)
}

/// Scan an ordered list of candidate passwords.
pub fn dictionary<T: ReaderTransport>(
    engine: &mut Engine<T>,
    candidates: &[u32],
    mode: DownlinkMode,
    try_all_modes: bool,
    cancel: &CancelToken,
) -> Result<Option<(u32, DownlinkMode)>, T55Error> {
    scan(engine, candidates.iter().copied(), mode, try_all_modes, cancel)
}

/// Load a password dictionary: one hex word per line, `#` comments allowed.
pub fn load_dictionary(path: &Path) -> Result<Vec<u32>, T55Error> {
    let reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let entry = line.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        let hex = entry.strip_prefix("0x").unwrap_or(entry);
        let value = u32::from_str_radix(hex, 16).map_err(|_| {
            T55Error::InvalidArgument(format!(
                "{}:{}: not a 32-bit hex password: {}",
                path.display(),
                lineno + 1,
                entry
            ))
        })?;
        out.push(value);
    }
    Ok(out)
}

/// Bit-mutation recovery around an expected password.
///
/// Cloners sometimes program a corrupted or truncated password; the likely
/// variants of the expected value are: every single-bit flip, then the
/// expected value under progressively longer low-to-high bitmasks, then the
/// same from the high end. Masks that reproduce an already-tried value are
/// skipped.
pub fn recover_password<T: ReaderTransport>(
    engine: &mut Engine<T>,
    baseline: u32,
    mode: DownlinkMode,
    try_all_modes: bool,
    cancel: &CancelToken,
) -> Result<Option<(u32, DownlinkMode)>, T55Error> {
    let mut trials: Vec<u32> = Vec::with_capacity(96);
    for bit in 0..32 {
        trials.push(baseline ^ (1u32 << bit));
    }
    let mut mask = 0u32;
    for bit in 0..32 {
        mask |= 1u32 << bit;
        trials.push(baseline & mask);
    }
    let mut mask = 0u32;
    for bit in (0..32).rev() {
        mask |= 1u32 << bit;
        trials.push(baseline & mask);
    }

    let mut seen = HashSet::new();
    let deduped: Vec<u32> = trials.into_iter().filter(|p| seen.insert(*p)).collect();
    scan(engine, deduped, mode, try_all_modes, cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimTag;

    const PROTECTED_CONF: u32 = 0x000880E8 | (1 << 4);

    fn protected_engine(password: u32, mode: DownlinkMode) -> Engine<SimTag> {
        let tag = SimTag::new(PROTECTED_CONF)
            .with_password(password)
            .with_downlink(mode);
        Engine::new(tag)
    }

    #[test]
    fn test_try_password_wrong_then_right() {
        let mut engine = protected_engine(0x51243648, DownlinkMode::Fixed);
        let miss = try_password(&mut engine, 0x11111111, DownlinkMode::Fixed, false).unwrap();
        assert_eq!(miss, None);
        let hit = try_password(&mut engine, 0x51243648, DownlinkMode::Fixed, false).unwrap();
        assert_eq!(hit, Some(DownlinkMode::Fixed));
        assert_eq!(engine.config.block0, PROTECTED_CONF);
    }

    #[test]
    fn test_try_all_modes_finds_tag_mode() {
        let mut engine = protected_engine(0xCAFED00D, DownlinkMode::LeadingZero);
        let hit = try_password(&mut engine, 0xCAFED00D, DownlinkMode::Fixed, true).unwrap();
        assert_eq!(hit, Some(DownlinkMode::LeadingZero));
    }

    #[test]
    fn test_brute_force_range() {
        let mut engine = protected_engine(0x00000012, DownlinkMode::Fixed);
        let found = brute_force(
            &mut engine,
            0x00000000,
            0x00000020,
            DownlinkMode::Fixed,
            false,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(found, Some((0x12, DownlinkMode::Fixed)));
    }

    #[test]
    fn test_brute_force_exhaustion_is_not_an_error() {
        let mut engine = protected_engine(0xFFFFFFF0, DownlinkMode::Fixed);
        let found = brute_force(
            &mut engine,
            0,
            0x10,
            DownlinkMode::Fixed,
            false,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(found, None);
    }

    #[test]
    fn test_cancellation_stops_scan() {
        let mut engine = protected_engine(0xFFFFFFF0, DownlinkMode::Fixed);
        let cancel = CancelToken::new();
        cancel.cancel();
        let found = brute_force(
            &mut engine,
            0,
            0xFFFF,
            DownlinkMode::Fixed,
            false,
            &cancel,
        )
        .unwrap();
        assert_eq!(found, None);
        assert_eq!(engine.transport().writes_applied, 0);
    }

    #[test]
    fn test_dictionary_hit() {
        let mut engine = protected_engine(0x19920427, DownlinkMode::Fixed);
        let found = dictionary(
            &mut engine,
            DEFAULT_PASSWORDS,
            DownlinkMode::Fixed,
            false,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(found, Some((0x19920427, DownlinkMode::Fixed)));
    }

    #[test]
    fn test_recover_single_bit_flip_within_32_trials() {
        let baseline = 0x51243648u32;
        for bit in [0, 7, 13, 31] {
            let actual = baseline ^ (1u32 << bit);
            let mut engine = protected_engine(actual, DownlinkMode::Fixed);
            let found = recover_password(
                &mut engine,
                baseline,
                DownlinkMode::Fixed,
                false,
                &CancelToken::new(),
            )
            .unwrap();
            assert_eq!(found, Some((actual, DownlinkMode::Fixed)), "bit {}", bit);
        }
    }

    #[test]
    fn test_recover_truncated_password() {
        let baseline = 0x51243648u32;
        // cloner kept only the low half
        let actual = baseline & 0x0000FFFF;
        let mut engine = protected_engine(actual, DownlinkMode::Fixed);
        let found = recover_password(
            &mut engine,
            baseline,
            DownlinkMode::Fixed,
            false,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(found, Some((actual, DownlinkMode::Fixed)));
    }

    #[test]
    fn test_cloner_password_is_stable() {
        // derived keys must be deterministic across runs
        assert_eq!(cloner_password(0x12345678), cloner_password(0x12345678));
        assert_ne!(cloner_password(0x12345678), cloner_password(0x12345679));
    }

    #[test]
    fn test_load_dictionary_parses_hex_lines() {
        let dir = std::env::temp_dir().join("t55_dict_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pwd.dic");
        std::fs::write(&path, "# cloner defaults\n51243648\n0x000D8787\n\n19920427\n").unwrap();
        let dict = load_dictionary(&path).unwrap();
        assert_eq!(dict, vec![0x51243648, 0x000D8787, 0x19920427]);
        std::fs::remove_file(&path).ok();
    }
}
