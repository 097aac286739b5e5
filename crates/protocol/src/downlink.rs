// Copyright 2025-2026 CEMAXECUTER LLC

//! Downlink timing tables. One table per command encoding, all values in
//! field-clock units; the transport converts to microseconds. The engine
//! pushes the matching table before every acquisition and write.

use lf_reader::GapTimings;

use crate::config::DownlinkMode;

/// Gap table for a downlink mode: (start, write, write-0, write-1, read)
/// plus write-2/write-3 for the 1-of-4 encoding.
pub fn gap_timings(mode: DownlinkMode) -> GapTimings {
    match mode {
        DownlinkMode::Fixed => GapTimings {
            mode: 0,
            start_gap: 29,
            write_gap: 17,
            write_zero: 15,
            write_one: 47,
            read_gap: 15,
            write_two: 0,
            write_three: 0,
        },
        // same gap values as fixed; the reader emits a long leading
        // reference pulse instead of a plain start gap
        DownlinkMode::LongLeadingReference => GapTimings {
            mode: 1,
            start_gap: 29,
            write_gap: 17,
            write_zero: 15,
            write_one: 47,
            read_gap: 15,
            write_two: 0,
            write_three: 0,
        },
        DownlinkMode::LeadingZero => GapTimings {
            mode: 2,
            start_gap: 29,
            write_gap: 17,
            write_zero: 15,
            write_one: 40,
            read_gap: 15,
            write_two: 0,
            write_three: 0,
        },
        DownlinkMode::OneOfFour => GapTimings {
            mode: 3,
            start_gap: 29,
            write_gap: 17,
            write_zero: 15,
            write_one: 31,
            read_gap: 15,
            write_two: 47,
            write_three: 63,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_differ_where_expected() {
        let fixed = gap_timings(DownlinkMode::Fixed);
        let llr = gap_timings(DownlinkMode::LongLeadingReference);
        let lz = gap_timings(DownlinkMode::LeadingZero);
        let four = gap_timings(DownlinkMode::OneOfFour);

        // LLR differs from fixed only in the wire mode
        assert_eq!(fixed.write_one, llr.write_one);
        assert_ne!(fixed.mode, llr.mode);

        assert_eq!(lz.write_one, 40);
        assert_eq!(four.write_one, 31);
        assert_eq!(four.write_two, 47);
        assert_eq!(four.write_three, 63);
        assert_eq!(fixed.write_two, 0);
    }

    #[test]
    fn test_mode_indices_match_wire_encoding() {
        for mode in DownlinkMode::ALL {
            assert_eq!(gap_timings(mode).mode, mode.index());
        }
    }
}
