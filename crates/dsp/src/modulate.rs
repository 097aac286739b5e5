//! Synthetic LF envelope generation: the encode half of each demodulator.
//! Feeds the offline replay path and lets every decode path be exercised
//! without an antenna.

const HIGH: i8 = 64;
const LOW: i8 = -64;

/// ASK/Manchester: a one is high-then-low within the bit cell, a zero the
/// reverse.
pub fn ask_manchester(bits: &[u8], clock: u8) -> Vec<i8> {
    let clock = clock as usize;
    let half = clock / 2;
    let mut out = Vec::with_capacity(bits.len() * clock);
    for &bit in bits {
        let (a, b) = if bit & 1 == 1 { (HIGH, LOW) } else { (LOW, HIGH) };
        out.extend(std::iter::repeat(a).take(half));
        out.extend(std::iter::repeat(b).take(clock - half));
    }
    out
}

/// Biphase: the level toggles at every bit-cell boundary; a one adds a
/// mid-cell toggle.
pub fn biphase(bits: &[u8], clock: u8) -> Vec<i8> {
    let clock = clock as usize;
    let half = clock / 2;
    let mut out = Vec::with_capacity(bits.len() * clock);
    let mut level = HIGH;
    for &bit in bits {
        level = -level;
        out.extend(std::iter::repeat(level).take(half));
        if bit & 1 == 1 {
            level = -level;
        }
        out.extend(std::iter::repeat(level).take(clock - half));
    }
    out
}

/// NRZ: level holds for the whole bit cell.
pub fn nrz(bits: &[u8], clock: u8) -> Vec<i8> {
    let clock = clock as usize;
    let mut out = Vec::with_capacity(bits.len() * clock);
    for &bit in bits {
        let level = if bit & 1 == 1 { HIGH } else { LOW };
        out.extend(std::iter::repeat(level).take(clock));
    }
    out
}

/// FSK: square sub-carrier at fc_high for a zero, fc_low for a one.
/// Phase-continuous across bit boundaries, matching a real tag's divider.
pub fn fsk(bits: &[u8], clock: u8, fc_high: u8, fc_low: u8) -> Vec<i8> {
    let clock = clock as usize;
    let mut out = Vec::with_capacity(bits.len() * clock);
    let mut level = HIGH;
    let mut next_toggle = fc_high as f32 / 2.0;
    let mut t = 0usize;
    for &bit in bits {
        let half = if bit & 1 == 1 { fc_low } else { fc_high } as f32 / 2.0;
        let end = t + clock;
        while t < end {
            if t as f32 >= next_toggle {
                level = -level;
                next_toggle += half;
            }
            out.push(level);
            t += 1;
        }
    }
    out
}

/// PSK: square carrier at the given field-clock division, phase-inverted for
/// the duration of a one bit.
pub fn psk(bits: &[u8], clock: u8, carrier_fc: u8) -> Vec<i8> {
    let clock = clock as usize;
    let fc = carrier_fc as usize;
    let half = (fc + 1) / 2;
    let mut out = Vec::with_capacity(bits.len() * clock);
    let mut t = 0usize;
    for &bit in bits {
        for _ in 0..clock {
            let carrier = if t % fc < half { HIGH } else { LOW };
            out.push(if bit & 1 == 1 { -carrier } else { carrier });
            t += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manchester_cell_shape() {
        let s = ask_manchester(&[1, 0], 32);
        assert_eq!(s.len(), 64);
        assert!(s[0] > 0 && s[31] < 0, "one is high then low");
        assert!(s[32] < 0 && s[63] > 0, "zero is low then high");
    }

    #[test]
    fn test_biphase_always_toggles_at_boundary() {
        let s = biphase(&[0, 0, 1, 0], 32);
        // boundary between cells 0 and 1: levels must differ
        assert_ne!(s[31] > 0, s[32] > 0);
        assert_ne!(s[63] > 0, s[64] > 0);
    }

    #[test]
    fn test_fsk_carrier_rate() {
        // all-zero bits: pure fc/10 carrier, edges every 5 samples
        let s = fsk(&[0; 8], 50, 10, 8);
        let edges: Vec<usize> = (1..s.len())
            .filter(|&i| (s[i] > 0) != (s[i - 1] > 0))
            .collect();
        for w in edges.windows(2) {
            assert_eq!(w[1] - w[0], 5);
        }
    }
}
