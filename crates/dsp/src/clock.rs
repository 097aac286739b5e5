//! Clock estimators: recover the bit clock (and for FSK/PSK the carrier
//! division) from an envelope capture before any demodulation is attempted.

use crate::{edge_positions, snap, CLOCK_RATES};

/// Known FSK field-clock pairs: (high-divisor, low-divisor).
/// FC/10-FC/8 is the FSK2 family, FC/8-FC/5 the FSK1 family.
pub const FSK_PAIRS: [(u8, u8); 2] = [(10, 8), (8, 5)];

/// PSK carrier divisors a T55xx can be configured for.
const PSK_CARRIERS: [u8; 3] = [2, 4, 8];

const MIN_EDGES: usize = 8;
const CLOCK_TOL: f32 = 0.25;

/// Intervals between consecutive envelope edges.
fn edge_intervals(samples: &[i8]) -> Vec<usize> {
    let edges = edge_positions(samples);
    edges.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Estimate the clock of an ASK (Manchester or biphase) capture.
///
/// Both encodings toggle at least once per bit and at most twice, so the
/// shortest consistent edge interval is half a bit period.
pub fn ask_clock(samples: &[i8]) -> Option<u8> {
    let intervals = edge_intervals(samples);
    if intervals.len() < MIN_EDGES {
        return None;
    }
    let min = *intervals.iter().min()?;
    if min < 3 {
        // sub-carrier toggling, not an ASK envelope
        return None;
    }
    let clock = snap(2.0 * min as f32, &CLOCK_RATES, CLOCK_TOL)?;
    // every interval must be close to a multiple of the half period
    let half = clock as f32 / 2.0;
    let consistent = intervals.iter().all(|&iv| {
        let m = (iv as f32 / half).round().max(1.0);
        (iv as f32 - m * half).abs() <= half / 2.0
    });
    if consistent {
        Some(clock)
    } else {
        None
    }
}

/// Estimate the clock of an NRZ capture: level holds for whole bit periods,
/// so the shortest interval is one bit.
pub fn nrz_clock(samples: &[i8]) -> Option<u8> {
    let intervals = edge_intervals(samples);
    if intervals.len() < MIN_EDGES {
        return None;
    }
    let min = *intervals.iter().min()?;
    snap(min as f32, &CLOCK_RATES, CLOCK_TOL)
}

/// Estimate FSK parameters: the two field-clock divisors in use and the bit
/// clock. Returns `(fc_high, fc_low, clock)` where `fc_high > fc_low`.
///
/// The envelope is a square sub-carrier whose half-period is fc/2; splitting
/// the interval population at its widest gap separates the two divisors.
pub fn fsk_clocks(samples: &[i8]) -> Option<(u8, u8, u8)> {
    let intervals = edge_intervals(samples);
    if intervals.len() < MIN_EDGES * 2 {
        return None;
    }

    let mut sorted = intervals.clone();
    sorted.sort_unstable();
    // split the sorted population at the widest gap
    let mut split = 0usize;
    let mut widest = 0usize;
    for i in 1..sorted.len() {
        let gap = sorted[i] - sorted[i - 1];
        if gap > widest {
            widest = gap;
            split = i;
        }
    }
    if widest == 0 {
        return None; // single carrier: not FSK
    }

    let mean = |s: &[usize]| s.iter().sum::<usize>() as f32 / s.len() as f32;
    let fc_low_est = 2.0 * mean(&sorted[..split]);
    let fc_high_est = 2.0 * mean(&sorted[split..]);

    let (fc_high, fc_low) = FSK_PAIRS.iter().copied().find(|&(hi, lo)| {
        (fc_high_est - hi as f32).abs() <= 1.5 && (fc_low_est - lo as f32).abs() <= 1.5
    })?;

    // Bit boundaries are where the interval population flips between the two
    // divisors; the shortest stretch between flips is one bit. The stretch
    // before the first flip is truncated by however the capture started, so
    // only flip-to-flip distances count.
    let threshold = (fc_low as f32 + fc_high as f32) / 4.0; // between the half-periods
    let mut pos = 0usize;
    let mut prev_high = intervals[0] as f32 > threshold;
    let mut flips = Vec::new();
    for &iv in &intervals {
        let high = iv as f32 > threshold;
        if high != prev_high {
            flips.push(pos);
            prev_high = high;
        }
        pos += iv;
    }
    let min_seg = flips.windows(2).map(|w| w[1] - w[0]).min()?;
    let clock = snap(min_seg as f32, &CLOCK_RATES, CLOCK_TOL)?;
    Some((fc_high, fc_low, clock))
}

/// Estimate PSK parameters: `(clock, carrier_fc)`.
///
/// The envelope is a steady sub-carrier; a phase reversal shows up as one
/// interval that is off the carrier half-period. Reversal spacing is a
/// multiple of the bit clock.
pub fn psk_clock(samples: &[i8]) -> Option<(u8, u8)> {
    let intervals = edge_intervals(samples);
    if intervals.len() < MIN_EDGES * 2 {
        return None;
    }

    // dominant interval = carrier half-period
    let mut counts = std::collections::HashMap::new();
    for &iv in &intervals {
        *counts.entry(iv).or_insert(0usize) += 1;
    }
    let (&dominant, _) = counts.iter().max_by_key(|(_, &c)| c)?;
    let carrier = snap(2.0 * dominant as f32, &PSK_CARRIERS, 0.3)?;

    // positions of off-carrier intervals = phase reversals
    let mut reversals = Vec::new();
    let mut pos = 0usize;
    for &iv in &intervals {
        if iv != dominant {
            reversals.push(pos);
        }
        pos += iv;
    }
    if reversals.len() < 2 {
        return None;
    }
    let min_gap = reversals
        .windows(2)
        .map(|w| w[1] - w[0])
        .min()
        .filter(|&g| g > carrier as usize)?;
    let clock = snap(min_gap as f32, &CLOCK_RATES, CLOCK_TOL)?;
    Some((clock, carrier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulate;

    #[test]
    fn test_ask_clock_manchester() {
        let bits: Vec<u8> = (0..64).map(|i| (i ^ (i >> 1)) as u8 & 1).collect();
        let samples = modulate::ask_manchester(&bits, 32);
        assert_eq!(ask_clock(&samples), Some(32));
    }

    #[test]
    fn test_nrz_clock() {
        // needs at least one single-bit run for the shortest interval to be
        // one bit period
        let bits: Vec<u8> = [0, 1, 0, 0, 1, 1, 0, 1].repeat(8).to_vec();
        let samples = modulate::nrz(&bits, 64);
        assert_eq!(nrz_clock(&samples), Some(64));
    }

    #[test]
    fn test_fsk_clocks_fsk2() {
        let bits: Vec<u8> = (0..48).map(|i| (i & 1) as u8).collect();
        let samples = modulate::fsk(&bits, 50, 10, 8);
        let (hi, lo, clk) = fsk_clocks(&samples).expect("fsk clocks");
        assert_eq!((hi, lo), (10, 8));
        assert_eq!(clk, 50);
    }

    #[test]
    fn test_psk_clock() {
        let bits: Vec<u8> = (0..48).map(|i| (i & 1) as u8).collect();
        let samples = modulate::psk(&bits, 32, 2);
        let (clk, carrier) = psk_clock(&samples).expect("psk clock");
        assert_eq!(clk, 32);
        assert_eq!(carrier, 2);
    }

    #[test]
    fn test_ask_clock_rejects_subcarrier() {
        let bits = vec![1u8; 32];
        let samples = modulate::psk(&bits, 32, 2);
        assert_eq!(ask_clock(&samples), None);
    }
}
