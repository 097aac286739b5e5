// Copyright 2025-2026 CEMAXECUTER LLC

//! Passive command sniffer: reconstructs the commands a programmer sent to a
//! tag from pulse timing alone, with no knowledge of the tag's configuration
//! and no device round-trips. Packets stream out as they are recognized.

use crossbeam::channel::Sender;
use serde::Serialize;

use crate::bits::pack_bits;

/// High-pulse widths kept in the rolling buffer.
const MAX_PULSES: usize = 80;

/// A low run this long separates two commands.
const IDLE_GAP_SAMPLES: usize = 256;

/// Pulses shorter than this are glitches.
const MIN_PULSE_SAMPLES: usize = 3;

/// Maps a high-pulse width to a bit given the two reference widths and a
/// tolerance.
#[derive(Debug, Clone, Copy)]
pub struct BitClassifier {
    pub width_zero: usize,
    pub width_one: usize,
    pub tolerance: usize,
}

impl BitClassifier {
    /// Derive references from observed pulses: the narrow population is a
    /// zero, the wide one a one.
    pub fn calibrate(widths: &[usize]) -> Option<Self> {
        let w0 = *widths.iter().min()?;
        let w1 = *widths.iter().max()?;
        if w1 <= w0 {
            return None;
        }
        Some(Self::new(w0, w1))
    }

    pub fn new(width_zero: usize, width_one: usize) -> Self {
        let tolerance = ((width_one.abs_diff(width_zero)) / 4).max(1);
        Self {
            width_zero,
            width_one,
            tolerance,
        }
    }

    pub fn classify(&self, width: usize) -> Option<u8> {
        if width.abs_diff(self.width_zero) <= self.tolerance {
            Some(0)
        } else if width.abs_diff(self.width_one) <= self.tolerance {
            Some(1)
        } else {
            None
        }
    }

    /// Classify a whole pulse run; any unclassifiable pulse voids the run.
    pub fn classify_run(&self, widths: &[usize]) -> Option<Vec<u8>> {
        widths.iter().map(|&w| self.classify(w)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PacketKind {
    Read,
    Write,
    PasswordWrite,
    /// A default write and a password read are bit-identical on the wire.
    /// Both readings are reported; picking one silently would hide that an
    /// operator's "read" may have overwritten memory.
    ProtectedWriteOrPasswordRead,
}

impl PacketKind {
    pub fn describe(self) -> &'static str {
        match self {
            PacketKind::Read => "default read",
            PacketKind::Write => "default write",
            PacketKind::PasswordWrite => "password write",
            PacketKind::ProtectedWriteOrPasswordRead => {
                "default write or password read (ambiguous)"
            }
        }
    }
}

/// One reconstructed command. Emitted immediately, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct CommandPacket {
    pub kind: PacketKind,
    pub page: u8,
    pub block: u8,
    pub password: Option<u32>,
    pub data: Option<u32>,
    pub bit_width_zero: usize,
    pub bit_width_one: usize,
    pub raw: String,
}

/// Explicit reference widths; when absent the classifier auto-calibrates
/// from the first command's pulses.
#[derive(Debug, Clone, Copy, Default)]
pub struct SniffOptions {
    pub width_zero: Option<usize>,
    pub width_one: Option<usize>,
}

fn raw_string(bits: &[u8]) -> String {
    bits.iter().map(|&b| if b == 1 { '1' } else { '0' }).collect()
}

/// Decode a classified pulse run against the fixed packet-length tables.
fn decode_packet(bits: &[u8], classifier: &BitClassifier) -> Option<CommandPacket> {
    let field = |offset: usize, len: usize| pack_bits(bits, offset, len).ok();

    let (kind, page, block, password, data) = match bits.len() {
        // start bit, page, spacer, 3-bit address
        6 if bits[0] == 1 => (
            PacketKind::Read,
            bits[1],
            field(3, 3)? as u8,
            None,
            None,
        ),
        // start, page, lock, 32-bit data, address -- OR -- start, page,
        // 32-bit password, spacer, address. Identical on the wire; both
        // field extractions are reported.
        38 if bits[0] == 1 => (
            PacketKind::ProtectedWriteOrPasswordRead,
            bits[1],
            field(35, 3)? as u8,
            field(2, 32),
            field(3, 32),
        ),
        // start, page, 32-bit password, lock, 32-bit data, address
        70 if bits[0] == 1 => (
            PacketKind::PasswordWrite,
            bits[1],
            field(67, 3)? as u8,
            field(2, 32),
            field(35, 32),
        ),
        // leading-zero framing: 0,1 preamble, page, two reference bits,
        // then password/lock/data/address at shifted offsets
        73 if bits[0] == 0 && bits[1] == 1 => (
            PacketKind::PasswordWrite,
            bits[2],
            field(70, 3)? as u8,
            field(5, 32),
            field(38, 32),
        ),
        _ => return None,
    };

    Some(CommandPacket {
        kind,
        page,
        block,
        password,
        data,
        bit_width_zero: classifier.width_zero,
        bit_width_one: classifier.width_one,
        raw: raw_string(bits),
    })
}

/// Scan a raw capture for programmer commands, emitting each packet over
/// `tx` the moment its trailing idle gap is seen. The scan advances
/// unconditionally through the whole capture; it never waits for any
/// particular packet. Returns the number of packets emitted.
pub fn scan(samples: &[i8], opts: &SniffOptions, tx: &Sender<CommandPacket>) -> usize {
    let mut classifier = match (opts.width_zero, opts.width_one) {
        (Some(z), Some(o)) => Some(BitClassifier::new(z, o)),
        _ => None,
    };

    let mut pulses: Vec<usize> = Vec::with_capacity(MAX_PULSES);
    let mut emitted = 0usize;

    let flush = |pulses: &mut Vec<usize>, classifier: &mut Option<BitClassifier>| -> usize {
        if pulses.is_empty() {
            return 0;
        }
        let cls = match classifier {
            Some(c) => *c,
            None => match BitClassifier::calibrate(pulses) {
                Some(c) => {
                    log::info!(
                        "calibrated pulse widths: zero={} one={}",
                        c.width_zero,
                        c.width_one
                    );
                    *classifier = Some(c);
                    c
                }
                None => {
                    pulses.clear();
                    return 0;
                }
            },
        };

        // long-leading-reference commands open with an oversized pulse;
        // recognized, reported, left undecoded
        if pulses[0] > cls.width_one + cls.width_one.abs_diff(cls.width_zero) {
            log::info!(
                "long-leading-reference command ({} pulses) ignored",
                pulses.len()
            );
            pulses.clear();
            return 0;
        }

        let sent = match cls.classify_run(pulses) {
            Some(bits) => match decode_packet(&bits, &cls) {
                Some(pkt) => {
                    log::debug!("{}: {}", pkt.kind.describe(), pkt.raw);
                    if tx.send(pkt).is_err() {
                        0 // receiver dropped; keep scanning regardless
                    } else {
                        1
                    }
                }
                None => {
                    log::debug!("unrecognized run of {} bits", bits.len());
                    0
                }
            },
            None => {
                log::debug!("pulse run with unclassifiable widths dropped");
                0
            }
        };
        pulses.clear();
        sent
    };

    let mut i = 0usize;
    while i < samples.len() {
        let high = samples[i] > 0;
        let run_start = i;
        while i < samples.len() && (samples[i] > 0) == high {
            i += 1;
        }
        let width = i - run_start;

        if high {
            if width >= MIN_PULSE_SAMPLES {
                pulses.push(width);
                // rolling buffer: oldest pulses fall off once no packet
                // boundary shows up
                if pulses.len() > MAX_PULSES {
                    pulses.remove(0);
                }
            }
        } else if width >= IDLE_GAP_SAMPLES {
            emitted += flush(&mut pulses, &mut classifier);
        }
    }
    emitted += flush(&mut pulses, &mut classifier);

    emitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::unpack_bits;
    use crossbeam::channel;

    const W0: usize = 24;
    const W1: usize = 56;
    const GAP: usize = 32;
    const IDLE: usize = 2000;

    fn append_pulses(out: &mut Vec<i8>, bits: &[u8]) {
        for &b in bits {
            let width = if b == 1 { W1 } else { W0 };
            out.extend(std::iter::repeat(40i8).take(width));
            out.extend(std::iter::repeat(-40i8).take(GAP));
        }
        out.extend(std::iter::repeat(-40i8).take(IDLE));
    }

    fn collect(samples: &[i8], opts: &SniffOptions) -> Vec<CommandPacket> {
        let (tx, rx) = channel::unbounded();
        let n = scan(samples, opts, &tx);
        drop(tx);
        let packets: Vec<CommandPacket> = rx.iter().collect();
        assert_eq!(packets.len(), n);
        packets
    }

    fn password_write_bits(page: u8, block: u8, password: u32, data: u32) -> Vec<u8> {
        let mut bits = vec![1, page & 1];
        bits.extend(unpack_bits(password, 32));
        bits.push(0); // lock
        bits.extend(unpack_bits(data, 32));
        bits.extend(unpack_bits(block as u32, 3));
        bits
    }

    #[test]
    fn test_sniff_password_write_fields() {
        let bits = password_write_bits(1, 3, 0xAABBCCDD, 0x11223344);
        assert_eq!(bits.len(), 70);
        let mut samples = Vec::new();
        append_pulses(&mut samples, &bits);

        let packets = collect(&samples, &SniffOptions::default());
        assert_eq!(packets.len(), 1);
        let p = &packets[0];
        assert_eq!(p.kind, PacketKind::PasswordWrite);
        assert_eq!(p.page, 1);
        assert_eq!(p.block, 3);
        assert_eq!(p.password, Some(0xAABBCCDD));
        assert_eq!(p.data, Some(0x11223344));
        assert_eq!(p.raw.len(), 70);
    }

    #[test]
    fn test_sniff_default_read() {
        let mut samples = Vec::new();
        append_pulses(&mut samples, &[1, 0, 0, 0, 1, 1]); // page 0, block 3

        let packets = collect(&samples, &SniffOptions::default());
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].kind, PacketKind::Read);
        assert_eq!(packets[0].page, 0);
        assert_eq!(packets[0].block, 3);
        assert_eq!(packets[0].password, None);
        assert_eq!(packets[0].data, None);
    }

    #[test]
    fn test_sniff_38_bit_reports_both_readings() {
        let mut bits = vec![1u8, 0, 0];
        bits.extend(unpack_bits(0x0F0F0F0F, 32));
        bits.extend(unpack_bits(5, 3));
        assert_eq!(bits.len(), 38);
        let mut samples = Vec::new();
        append_pulses(&mut samples, &bits);

        let packets = collect(&samples, &SniffOptions::default());
        assert_eq!(packets.len(), 1);
        let p = &packets[0];
        assert_eq!(p.kind, PacketKind::ProtectedWriteOrPasswordRead);
        assert_eq!(p.block, 5);
        // write reading: lock at bit 2, data at 3..35
        assert_eq!(p.data, Some(0x0F0F0F0F));
        // password-read reading: password at 2..34
        assert_eq!(p.password, Some(0x0F0F0F0F >> 1));
    }

    #[test]
    fn test_sniff_leading_zero_password_write() {
        let mut bits = vec![0u8, 1, 1, 0, 0]; // preamble, page 1, reference bits
        bits.extend(unpack_bits(0xCAFEBABE, 32));
        bits.push(0); // lock
        bits.extend(unpack_bits(0x01020304, 32));
        bits.extend(unpack_bits(6, 3));
        assert_eq!(bits.len(), 73);
        let mut samples = Vec::new();
        append_pulses(&mut samples, &bits);

        let packets = collect(&samples, &SniffOptions::default());
        assert_eq!(packets.len(), 1);
        let p = &packets[0];
        assert_eq!(p.kind, PacketKind::PasswordWrite);
        assert_eq!(p.page, 1);
        assert_eq!(p.block, 6);
        assert_eq!(p.password, Some(0xCAFEBABE));
        assert_eq!(p.data, Some(0x01020304));
    }

    #[test]
    fn test_sniff_multiple_packets_stream_in_order() {
        let mut samples = Vec::new();
        append_pulses(&mut samples, &[1, 0, 0, 0, 1, 1]);
        append_pulses(&mut samples, &password_write_bits(0, 7, 0x51243648, 0xFFFF0000));

        let packets = collect(&samples, &SniffOptions::default());
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].kind, PacketKind::Read);
        assert_eq!(packets[1].kind, PacketKind::PasswordWrite);
        assert_eq!(packets[1].block, 7);
    }

    #[test]
    fn test_sniff_long_leading_reference_ignored() {
        let mut samples = Vec::new();
        // oversized leading pulse marks an LLR command
        samples.extend(std::iter::repeat(40i8).take(W1 * 4));
        samples.extend(std::iter::repeat(-40i8).take(GAP));
        for &b in &[1u8, 0, 1, 1, 0] {
            let width = if b == 1 { W1 } else { W0 };
            samples.extend(std::iter::repeat(40i8).take(width));
            samples.extend(std::iter::repeat(-40i8).take(GAP));
        }
        samples.extend(std::iter::repeat(-40i8).take(IDLE));

        let packets = collect(&samples, &SniffOptions {
            width_zero: Some(W0),
            width_one: Some(W1),
        });
        assert!(packets.is_empty());
    }

    #[test]
    fn test_classifier_rejects_out_of_family_width() {
        let cls = BitClassifier::new(W0, W1);
        assert_eq!(cls.classify(W0 + 2), Some(0));
        assert_eq!(cls.classify(W1 - 3), Some(1));
        assert_eq!(cls.classify(40), None);
    }

    #[test]
    fn test_explicit_widths_skip_calibration() {
        let bits = [1u8, 0, 0, 1, 1, 1];
        let mut samples = Vec::new();
        append_pulses(&mut samples, &bits);
        let packets = collect(&samples, &SniffOptions {
            width_zero: Some(W0),
            width_one: Some(W1),
        });
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].kind, PacketKind::Read);
        assert_eq!(packets[0].block, 7);
    }
}
