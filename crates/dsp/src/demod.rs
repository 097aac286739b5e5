//! Demodulators for the five LF encodings a T55xx can answer with. Each takes
//! the clock (and carrier parameters where relevant) recovered by the
//! estimators in [`crate::clock`] and returns a bit buffer, or `None` when the
//! capture does not hold together under that interpretation.

use crate::edge_positions;

/// Coding violations tolerated before a demod attempt is abandoned.
pub const MAX_DEMOD_ERRORS: usize = 16;

const MIN_BITS: usize = 16;

fn half_sums(cell: &[i8]) -> (i32, i32) {
    let half = cell.len() / 2;
    let a: i32 = cell[..half].iter().map(|&s| s as i32).sum();
    let b: i32 = cell[half..].iter().map(|&s| s as i32).sum();
    (a, b)
}

fn slice_cells(samples: &[i8], start: usize, clock: usize) -> impl Iterator<Item = &[i8]> {
    samples[start..].chunks_exact(clock)
}

/// ASK/Manchester demod. A valid cell transitions mid-bit; the transition
/// direction is the bit. `invert` flips the decoded polarity.
pub fn ask_demod(samples: &[i8], clock: u8, invert: bool, max_err: usize) -> Option<Vec<u8>> {
    let clock = clock as usize;
    let half = clock / 2;
    let edges = edge_positions(samples);
    let &e0 = edges.first()?;

    // The first edge is either a cell boundary or a mid-cell transition; try
    // both alignments and keep the one with fewer coding violations.
    let mut best: Option<(usize, Vec<u8>)> = None;
    for start in [e0, e0 + half] {
        if start + clock > samples.len() {
            continue;
        }
        let mut bits = Vec::new();
        let mut errors = 0usize;
        for cell in slice_cells(samples, start, clock) {
            let (a, b) = half_sums(cell);
            if (a > 0) == (b > 0) {
                errors += 1;
            }
            bits.push(u8::from((a > b) ^ invert));
        }
        match best {
            Some((e, _)) if e <= errors => {}
            _ => best = Some((errors, bits)),
        }
    }

    let (errors, bits) = best?;
    if errors > max_err || bits.len() < MIN_BITS {
        return None;
    }
    Some(bits)
}

/// ASK/Biphase demod. The level toggles at every cell boundary; a mid-cell
/// toggle is a one. A missing boundary toggle counts as a violation.
pub fn ask_biphase_demod(samples: &[i8], clock: u8, invert: bool, max_err: usize) -> Option<Vec<u8>> {
    let clock = clock as usize;
    let half = clock / 2;
    let edges = edge_positions(samples);
    let &e0 = edges.first()?;

    let mut best: Option<(usize, Vec<u8>)> = None;
    for start in [e0, e0 + half] {
        if start + clock > samples.len() {
            continue;
        }
        let mut bits = Vec::new();
        let mut errors = 0usize;
        let mut prev_tail: Option<i32> = None;
        for cell in slice_cells(samples, start, clock) {
            let (a, b) = half_sums(cell);
            if let Some(tail) = prev_tail {
                if (tail > 0) == (a > 0) {
                    errors += 1; // boundary toggle missing
                }
            }
            prev_tail = Some(b);
            bits.push(u8::from(((a > 0) != (b > 0)) ^ invert));
        }
        match best {
            Some((e, _)) if e <= errors => {}
            _ => best = Some((errors, bits)),
        }
    }

    let (errors, bits) = best?;
    if errors > max_err || bits.len() < MIN_BITS {
        return None;
    }
    Some(bits)
}

/// NRZ demod: sample the level mid-cell. Edges fall on cell boundaries, which
/// fixes the alignment.
pub fn nrz_demod(samples: &[i8], clock: u8, invert: bool) -> Option<Vec<u8>> {
    let clock = clock as usize;
    let edges = edge_positions(samples);
    let &e0 = edges.first()?;
    let start = e0 % clock;

    let bits: Vec<u8> = slice_cells(samples, start, clock)
        .map(|cell| u8::from((cell[clock / 2] > 0) ^ invert))
        .collect();
    if bits.len() < MIN_BITS {
        return None;
    }
    Some(bits)
}

/// FSK demod: count sub-carrier edges per bit cell and pick the nearer of the
/// two expected counts. Cells are aligned to the first divisor change.
pub fn fsk_demod(
    samples: &[i8],
    clock: u8,
    fc_high: u8,
    fc_low: u8,
    invert: bool,
    max_err: usize,
) -> Option<Vec<u8>> {
    let clock = clock as usize;
    let edges = edge_positions(samples);
    if edges.len() < 4 {
        return None;
    }

    // locate the first divisor change for cell alignment
    let threshold = (fc_high as f32 + fc_low as f32) / 4.0;
    let mut start = 0usize;
    let mut prev_high: Option<bool> = None;
    for w in edges.windows(2) {
        let high = (w[1] - w[0]) as f32 > threshold;
        if let Some(p) = prev_high {
            if p != high {
                start = w[0] % clock;
                break;
            }
        }
        prev_high = Some(high);
    }

    let expect_zero = 2.0 * clock as f32 / fc_high as f32;
    let expect_one = 2.0 * clock as f32 / fc_low as f32;

    let mut bits = Vec::new();
    let mut errors = 0usize;
    let mut cell_end = start + clock;
    let mut count = 0usize;
    for &e in &edges {
        if e < start {
            continue;
        }
        while e >= cell_end {
            let d0 = (count as f32 - expect_zero).abs();
            let d1 = (count as f32 - expect_one).abs();
            if d0.min(d1) > (expect_one - expect_zero).abs() {
                errors += 1;
            }
            bits.push(u8::from((d1 < d0) ^ invert));
            count = 0;
            cell_end += clock;
        }
        count += 1;
    }

    if errors > max_err || bits.len() < MIN_BITS {
        return None;
    }
    Some(bits)
}

/// PSK demod: correlate each bit cell against the reference carrier; an
/// inverted correlation is a one. Alignment comes from the first phase
/// reversal.
pub fn psk_demod(samples: &[i8], clock: u8, carrier_fc: u8, invert: bool) -> Option<Vec<u8>> {
    let clock = clock as usize;
    let fc = carrier_fc as usize;
    let half = (fc + 1) / 2;
    let edges = edge_positions(samples);
    if edges.len() < 4 {
        return None;
    }

    // dominant interval = carrier half-period; an off interval is a reversal
    let intervals: Vec<usize> = edges.windows(2).map(|w| w[1] - w[0]).collect();
    let mut counts = std::collections::HashMap::new();
    for &iv in &intervals {
        *counts.entry(iv).or_insert(0usize) += 1;
    }
    let (&dominant, _) = counts.iter().max_by_key(|(_, &c)| c)?;
    // A long interval means the boundary edge went missing (the reversal
    // cancelled it): the boundary sits one half-period in. A short interval
    // ends on the boundary itself.
    let mut start = 0usize;
    let mut pos = edges[0];
    for &iv in &intervals {
        if iv != dominant {
            let boundary = if iv > dominant { pos + dominant } else { pos + iv };
            start = boundary % clock;
            break;
        }
        pos += iv;
    }

    // reference phase taken from the aligned start
    let bits: Vec<u8> = samples[start..]
        .chunks_exact(clock)
        .map(|cell| {
            let corr: i32 = cell
                .iter()
                .enumerate()
                .map(|(i, &s)| {
                    let reference = if i % fc < half { 1i32 } else { -1i32 };
                    s as i32 * reference
                })
                .sum();
            u8::from((corr < 0) ^ invert)
        })
        .collect();
    if bits.len() < MIN_BITS {
        return None;
    }
    Some(bits)
}

/// Phase remap from a PSK1 bitstream to its PSK2 reading (differential:
/// a bit is the XOR of adjacent PSK1 bits). PSK3 candidates are evaluated on
/// the same remapped stream.
pub fn psk1_to_psk2(bits: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bits.len());
    let mut prev = 0u8;
    for (i, &b) in bits.iter().enumerate() {
        if i == 0 {
            out.push(b);
        } else {
            out.push(b ^ prev);
        }
        prev = b;
    }
    out
}

/// Inverse of [`psk1_to_psk2`]: cumulative XOR. Used when synthesizing a
/// PSK2/PSK3 stream for replay.
pub fn psk2_to_psk1(bits: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bits.len());
    let mut acc = 0u8;
    for (i, &b) in bits.iter().enumerate() {
        if i == 0 {
            acc = b;
        } else {
            acc ^= b;
        }
        out.push(acc);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulate;

    fn pattern(n: usize) -> Vec<u8> {
        (0..n).map(|i| ((i * 7 + 3) / 5) as u8 & 1).collect()
    }

    #[test]
    fn test_manchester_roundtrip() {
        let bits = pattern(96);
        let samples = modulate::ask_manchester(&bits, 32);
        let out = ask_demod(&samples, 32, false, 4).expect("demod");
        // alignment settles on the first full cell after the leading edge,
        // which costs the first bit
        assert_eq!(&out[..90], &bits[1..91]);
    }

    #[test]
    fn test_manchester_invert() {
        let bits = pattern(96);
        let samples = modulate::ask_manchester(&bits, 32);
        let out = ask_demod(&samples, 32, true, 4).expect("demod");
        let flipped: Vec<u8> = bits.iter().map(|b| b ^ 1).collect();
        assert_eq!(&out[..90], &flipped[1..91]);
    }

    #[test]
    fn test_biphase_roundtrip() {
        let bits = pattern(96);
        let samples = modulate::biphase(&bits, 32);
        let out = ask_biphase_demod(&samples, 32, false, 4).expect("demod");
        assert_eq!(&out[..90], &bits[1..91]);
    }

    #[test]
    fn test_nrz_roundtrip() {
        let bits = pattern(96);
        let samples = modulate::nrz(&bits, 64);
        let out = nrz_demod(&samples, 64, false).expect("demod");
        assert_eq!(&out[..90], &bits[..90]);
    }

    #[test]
    fn test_fsk_roundtrip() {
        let bits = pattern(64);
        let samples = modulate::fsk(&bits, 50, 10, 8);
        let out = fsk_demod(&samples, 50, 10, 8, false, 4).expect("demod");
        assert_eq!(&out[..60], &bits[..60]);
    }

    #[test]
    fn test_psk_roundtrip() {
        let bits = pattern(96);
        let samples = modulate::psk(&bits, 32, 2);
        let out = psk_demod(&samples, 32, 2, false).expect("demod");
        assert_eq!(&out[..90], &bits[..90]);
    }

    #[test]
    fn test_psk_remap_inverse() {
        let bits = pattern(64);
        assert_eq!(psk1_to_psk2(&psk2_to_psk1(&bits)), bits);
    }
}
