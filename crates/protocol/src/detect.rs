// Copyright 2025-2026 CEMAXECUTER LLC

//! Modulation detection: given one acquisition of the configuration block,
//! work out modulation, clock, polarity and bit offset with no prior
//! knowledge, or confirm a caller's hypothesis.
//!
//! The search is ordered: an FSK sub-carrier hit forecloses every other
//! family; otherwise ASK (Manchester and biphase), NRZ and PSK all get their
//! shot and every validated trial becomes a candidate.

use lf_dsp::{clock, demod};

use crate::bits::pack_bits;
use crate::block0;
use crate::config::{Bitrate, Block0Source, Config, DownlinkMode, Modulation};

/// Bit offsets scanned for a valid configuration word.
const OFFSET_SCAN: std::ops::Range<usize> = 28..64;

/// Samples skipped before PSK trials: the antenna is still settling and the
/// early carrier phase is garbage. The caller's buffer is left untouched.
const PSK_SETTLE: usize = 160;

const MAX_ERRORS: usize = demod::MAX_DEMOD_ERRORS;

/// One validated (modulation, polarity) trial.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub modulation: Modulation,
    pub bitrate: Bitrate,
    pub inverted: bool,
    pub offset: u8,
    pub block0: u32,
    pub is_q5: bool,
    pub sequence_terminator: bool,
    pub downlink_mode: DownlinkMode,
}

impl Candidate {
    /// Install this candidate as the session configuration.
    pub fn apply(&self, config: &mut Config) {
        config.modulation = self.modulation;
        config.bitrate = self.bitrate;
        config.inverted = self.inverted;
        config.offset = self.offset;
        config.block0 = self.block0;
        config.block0_source = Block0Source::AutoDetected;
        config.is_q5 = self.is_q5;
        config.sequence_terminator = self.sequence_terminator;
        config.downlink_mode = self.downlink_mode;
    }
}

/// Modulation family a demod trial ran under. Validation accepts any code
/// of the family (e.g. all four FSK variants), the specific variant comes
/// from the decoded word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Fsk,
    Ask,
    Biphase,
    Nrz,
    Psk1,
    Psk2,
    Psk3,
}

fn family_matches(family: Family, m: Modulation) -> bool {
    match family {
        Family::Fsk => m.is_fsk(),
        Family::Ask => m == Modulation::Ask,
        Family::Biphase => matches!(m, Modulation::Biphase | Modulation::BiphaseInverted),
        Family::Nrz => m == Modulation::Nrz,
        Family::Psk1 => m == Modulation::Psk1,
        Family::Psk2 => m == Modulation::Psk2,
        Family::Psk3 => m == Modulation::Psk3,
    }
}

/// Scan the demodulated stream for a bit offset at which it reads as a
/// plausible configuration word: T55x7 interpretation first, Q5 second.
fn validate(
    bits: &[u8],
    family: Family,
    clk: u8,
    inverted: bool,
    mode: DownlinkMode,
) -> Option<Candidate> {
    // T55x7: the reserved field must be zero, the modulation code must match
    // the family under test, and the coded clock must match the demod clock.
    for offset in OFFSET_SCAN {
        let Ok(word) = pack_bits(bits, offset, 32) else {
            break;
        };
        if word == 0 {
            continue;
        }
        let fields = block0::decode(word, false);
        let reserved_ok = if fields.extended() {
            (word >> 24) & 0xF == 0
        } else {
            (word >> 21) & 0x7F == 0
        };
        if !reserved_ok {
            continue;
        }
        let Some(m) = fields.modulation else { continue };
        if !family_matches(family, m) || fields.bitrate.clock() != clk {
            continue;
        }
        return Some(Candidate {
            modulation: m,
            bitrate: fields.bitrate,
            inverted,
            offset: offset as u8,
            block0: word,
            is_q5: false,
            sequence_terminator: fields.sequence_terminator,
            downlink_mode: mode,
        });
    }

    // Q5: different layout, different code table. A hit here marks the
    // candidate as Q5.
    for offset in OFFSET_SCAN {
        let Ok(word) = pack_bits(bits, offset, 32) else {
            break;
        };
        let fields = block0::decode(word, true);
        if !fields.header_ok() {
            continue;
        }
        let Some(m) = fields.modulation else { continue };
        if !family_matches(family, m) || fields.bitrate.clock() != clk {
            continue;
        }
        return Some(Candidate {
            modulation: m,
            bitrate: fields.bitrate,
            inverted,
            offset: offset as u8,
            block0: word,
            is_q5: true,
            sequence_terminator: fields.sequence_terminator,
            downlink_mode: mode,
        });
    }

    None
}

/// Run every applicable (modulation, polarity) trial over one acquisition.
pub fn search(samples: &[i8], mode: DownlinkMode) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    // 1. FSK. A recognized divisor pair is conclusive: the sub-carrier would
    //    wreck every other estimator, so no other family is tried.
    if let Some((fc_hi, fc_lo, clk)) = clock::fsk_clocks(samples) {
        for invert in [false, true] {
            if let Some(bits) = demod::fsk_demod(samples, clk, fc_hi, fc_lo, invert, MAX_ERRORS) {
                if let Some(c) = validate(&bits, Family::Fsk, clk, invert, mode) {
                    candidates.push(c);
                }
            }
        }
        return candidates;
    }

    // 2. ASK: Manchester and biphase share the clock estimate.
    if let Some(clk) = clock::ask_clock(samples) {
        for invert in [false, true] {
            if let Some(bits) = demod::ask_demod(samples, clk, invert, MAX_ERRORS) {
                if let Some(c) = validate(&bits, Family::Ask, clk, invert, mode) {
                    candidates.push(c);
                }
            }
        }
        for invert in [false, true] {
            if let Some(bits) = demod::ask_biphase_demod(samples, clk, invert, MAX_ERRORS) {
                if let Some(c) = validate(&bits, Family::Biphase, clk, invert, mode) {
                    candidates.push(c);
                }
            }
        }
    }

    // 3. NRZ. Clock estimates at or below 8 are false positives from
    //    sub-carrier remnants.
    if let Some(clk) = clock::nrz_clock(samples) {
        if clk > 8 {
            for invert in [false, true] {
                if let Some(bits) = demod::nrz_demod(samples, clk, invert) {
                    if let Some(c) = validate(&bits, Family::Nrz, clk, invert, mode) {
                        candidates.push(c);
                    }
                }
            }
        }
    }

    // 4. PSK. PSK1 at both polarities; PSK2 and PSK3 are evaluated on the
    //    phase-remapped polarity-0 stream.
    let psk_view = if samples.len() > PSK_SETTLE {
        &samples[PSK_SETTLE..]
    } else {
        samples
    };
    if let Some((clk, carrier)) = clock::psk_clock(psk_view) {
        let mut psk1_bits: Option<Vec<u8>> = None;
        for invert in [false, true] {
            if let Some(bits) = demod::psk_demod(psk_view, clk, carrier, invert) {
                if let Some(c) = validate(&bits, Family::Psk1, clk, invert, mode) {
                    candidates.push(c);
                }
                if !invert {
                    psk1_bits = Some(bits);
                }
            }
        }
        if let Some(bits) = psk1_bits {
            let remapped = demod::psk1_to_psk2(&bits);
            if let Some(c) = validate(&remapped, Family::Psk2, clk, false, mode) {
                candidates.push(c);
            }
            if let Some(c) = validate(&remapped, Family::Psk3, clk, false, mode) {
                candidates.push(c);
            }
        }
    }

    candidates
}

/// Outcome of weighing the surviving candidates against the caller's hint
/// and the known-configuration table.
#[derive(Debug)]
pub enum Resolution {
    None,
    Single(Candidate),
    /// Multiple candidates and nothing to break the tie. All are reported;
    /// the session ends up on the last one processed, so callers that need
    /// determinism must supply a wanted configuration.
    Ambiguous(Vec<Candidate>),
}

pub fn resolve(candidates: Vec<Candidate>, wanted: Option<u32>) -> Resolution {
    match candidates.len() {
        0 => Resolution::None,
        1 => Resolution::Single(candidates.into_iter().next().unwrap()),
        _ => {
            // a caller hypothesis outranks the known table
            if let Some(w) = wanted {
                if let Some(c) = candidates.iter().find(|c| c.block0 == w) {
                    return Resolution::Single(c.clone());
                }
            }
            let mut hits = candidates
                .iter()
                .filter(|c| block0::known_config_match(c.block0).is_some());
            if let (Some(hit), None) = (hits.next(), hits.next()) {
                log::info!(
                    "detection tie broken by known configuration {:#010x} ({})",
                    hit.block0,
                    block0::known_config_match(hit.block0).unwrap_or("?")
                );
                return Resolution::Single(hit.clone());
            }
            for c in &candidates {
                log::warn!(
                    "ambiguous candidate: {} RF/{} inverted={} offset={} block0={:#010x}{}",
                    c.modulation,
                    c.bitrate.clock(),
                    c.inverted,
                    c.offset,
                    c.block0,
                    if c.is_q5 { " (Q5)" } else { "" }
                );
            }
            Resolution::Ambiguous(candidates)
        }
    }
}

/// Demodulate an acquisition using the established session configuration.
/// Used by block reads once detection has fixed the parameters.
pub fn demod_with_config(samples: &[i8], config: &Config) -> Option<Vec<u8>> {
    let clk = config.bitrate.clock();
    let invert = config.inverted;
    match config.modulation {
        Modulation::Ask => demod::ask_demod(samples, clk, invert, MAX_ERRORS),
        Modulation::Biphase | Modulation::BiphaseInverted => {
            demod::ask_biphase_demod(samples, clk, invert, MAX_ERRORS)
        }
        Modulation::Nrz => demod::nrz_demod(samples, clk, invert),
        m if m.is_fsk() => {
            let (hi, lo) = m.fsk_pair()?;
            demod::fsk_demod(samples, clk, hi, lo, invert, MAX_ERRORS)
        }
        m if m.is_psk() => {
            // same settling skip as detection
            let view = if samples.len() > PSK_SETTLE {
                &samples[PSK_SETTLE..]
            } else {
                samples
            };
            let (_, carrier) = clock::psk_clock(view)?;
            let bits = demod::psk_demod(view, clk, carrier, invert)?;
            match m {
                Modulation::Psk1 => Some(bits),
                _ => Some(demod::psk1_to_psk2(&bits)),
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block0::{encode, ConfigFields};
    use crate::config::{Q5Modulation, T55x7Modulation};
    use crate::sim::render_stream;
    use crate::ACQUIRE_SAMPLES;

    fn t55x7_fields(m: Modulation, rate_index: u8) -> ConfigFields {
        ConfigFields {
            bitrate: Bitrate::Index(rate_index),
            modulation: Some(m),
            raw_mod_code: T55x7Modulation::from_modulation(m).code(),
            maxblock: 7,
            sequence_terminator: true,
            ..Default::default()
        }
    }

    fn single_candidate(fields: &ConfigFields, is_q5: bool) -> Candidate {
        let word = encode(fields, is_q5);
        let samples = render_stream(word, fields, ACQUIRE_SAMPLES).expect("render");
        let candidates = search(&samples, DownlinkMode::Fixed);
        assert_eq!(
            candidates.len(),
            1,
            "expected exactly one candidate for {:?}, got {:?}",
            fields.modulation,
            candidates
        );
        let c = candidates.into_iter().next().unwrap();
        assert_eq!(c.block0, word);
        assert_eq!(c.is_q5, is_q5);
        c
    }

    #[test]
    fn test_detect_ask_manchester() {
        let fields = t55x7_fields(Modulation::Ask, 2);
        let c = single_candidate(&fields, false);
        assert_eq!(c.modulation, Modulation::Ask);
        assert_eq!(c.bitrate.clock(), 32);
        assert!(!c.inverted);
        assert!(c.sequence_terminator);
    }

    #[test]
    fn test_detect_biphase() {
        let fields = t55x7_fields(Modulation::Biphase, 2);
        let c = single_candidate(&fields, false);
        assert_eq!(c.modulation, Modulation::Biphase);
    }

    #[test]
    fn test_detect_nrz() {
        let fields = t55x7_fields(Modulation::Nrz, 5);
        let c = single_candidate(&fields, false);
        assert_eq!(c.modulation, Modulation::Nrz);
        assert_eq!(c.bitrate.clock(), 64);
    }

    #[test]
    fn test_detect_fsk2() {
        let fields = t55x7_fields(Modulation::Fsk2, 4);
        let c = single_candidate(&fields, false);
        assert_eq!(c.modulation, Modulation::Fsk2);
        assert_eq!(c.bitrate.clock(), 50);
    }

    #[test]
    fn test_detect_psk1() {
        let fields = t55x7_fields(Modulation::Psk1, 2);
        let c = single_candidate(&fields, false);
        assert_eq!(c.modulation, Modulation::Psk1);
    }

    #[test]
    fn test_detect_q5_manchester() {
        let fields = ConfigFields {
            bitrate: Bitrate::Index(2),
            modulation: Some(Modulation::Ask),
            raw_mod_code: Q5Modulation::Manchester.code(),
            maxblock: 2,
            ..Default::default()
        };
        let c = single_candidate(&fields, true);
        assert_eq!(c.modulation, Modulation::Ask);
        assert!(c.is_q5);
    }

    #[test]
    fn test_detect_nothing_in_noise() {
        let samples = vec![0i8; ACQUIRE_SAMPLES];
        assert!(search(&samples, DownlinkMode::Fixed).is_empty());
    }

    fn candidate(block0: u32, m: Modulation) -> Candidate {
        Candidate {
            modulation: m,
            bitrate: Bitrate::Index(2),
            inverted: false,
            offset: 33,
            block0,
            is_q5: false,
            sequence_terminator: false,
            downlink_mode: DownlinkMode::Fixed,
        }
    }

    #[test]
    fn test_resolve_wanted_beats_table() {
        // one candidate is a known config, the other matches the hint
        let cands = vec![
            candidate(0x000880E8, Modulation::Ask),
            candidate(0x12345678, Modulation::Nrz),
        ];
        match resolve(cands, Some(0x12345678)) {
            Resolution::Single(c) => assert_eq!(c.block0, 0x12345678),
            other => panic!("expected single, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_prefers_known_table() {
        let cands = vec![
            candidate(0x12345678, Modulation::Nrz),
            candidate(0x000880E8, Modulation::Ask),
        ];
        match resolve(cands, None) {
            Resolution::Single(c) => assert_eq!(c.block0, 0x000880E8),
            other => panic!("expected single, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_reports_all_when_unresolved() {
        let cands = vec![
            candidate(0x12345678, Modulation::Nrz),
            candidate(0x23456789, Modulation::Ask),
        ];
        match resolve(cands, None) {
            Resolution::Ambiguous(all) => assert_eq!(all.len(), 2),
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_single_accepted_unconditionally() {
        let cands = vec![candidate(0x12345678, Modulation::Nrz)];
        assert!(matches!(resolve(cands, None), Resolution::Single(_)));
    }
}
