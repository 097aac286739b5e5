// Copyright 2025-2026 CEMAXECUTER LLC

//! Block 0 configuration-word codec. T55x7 and Q5 lay the word out
//! differently and use different modulation code tables; the two paths never
//! share a table.
//!
//! T55x7 (bits counted from MSB):
//!   [31:28] safer key   [27:21] reserved (zero)   [20:18] bitrate index
//!   [17] extended       [16:12] modulation        [11:10] PSK carrier
//!   [9] AOR  [8] OTP    [7:5] maxblock            [4] pwd
//!   [3] sequence terminator  [2] fast write  [1] inverse  [0] POR delay
//! In extended mode (safer key 6 or 9 with bit 17 set) the bitrate field
//! widens to [23:18] and is read as 2*value+2, the EM4x05 formula.
//!
//! Q5:
//!   [31:20] header (0x600) [19] page select  [18] fast write
//!   [17:12] bitrate (2*value+2)  [11] AOR  [10] pwd  [9:8] PSK carrier
//!   [7] inverse  [6:4] modulation  [3:1] maxblock  [0] sequence terminator

use std::fmt;

use crate::config::{Bitrate, Modulation, Q5Modulation, T55x7Modulation};

pub const Q5_HEADER: u16 = 0x600;

/// Structured view of a configuration word. Decoding is total: an unknown
/// modulation code is preserved raw and surfaces as "unknown" in display,
/// never as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigFields {
    /// T55x7 master/safer key nibble.
    pub safer_key: u8,
    pub bitrate: Bitrate,
    pub modulation: Option<Modulation>,
    pub raw_mod_code: u8,
    /// PSK carrier divisor selector (RF/2, RF/4, RF/8).
    pub pskcf: u8,
    pub aor: bool,
    /// T55x7 only.
    pub otp: bool,
    pub maxblock: u8,
    pub pwd: bool,
    pub sequence_terminator: bool,
    pub fast_write: bool,
    pub inverse: bool,
    /// T55x7 only.
    pub por_delay: bool,
    /// Q5 only.
    pub page_select: bool,
    /// Q5 raw header bits [31:20]; anything other than 0x600 is suspect but
    /// not rejected.
    pub header: u16,
}

impl Default for ConfigFields {
    fn default() -> Self {
        Self {
            safer_key: 0,
            bitrate: Bitrate::default(),
            modulation: Some(Modulation::Ask),
            raw_mod_code: 0,
            pskcf: 0,
            aor: false,
            otp: false,
            maxblock: 0,
            pwd: false,
            sequence_terminator: false,
            fast_write: false,
            inverse: false,
            por_delay: false,
            page_select: false,
            header: Q5_HEADER,
        }
    }
}

impl ConfigFields {
    pub fn extended(&self) -> bool {
        matches!(self.bitrate, Bitrate::Extended(_))
    }

    pub fn header_ok(&self) -> bool {
        self.header == Q5_HEADER
    }

    /// PSK carrier field clock: RF/2, RF/4 or RF/8.
    pub fn psk_carrier(&self) -> u8 {
        2u8 << self.pskcf.min(2)
    }
}

impl fmt::Display for ConfigFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.modulation {
            Some(m) => write!(f, "{}", m)?,
            None => write!(f, "unknown modulation (code {})", self.raw_mod_code)?,
        }
        write!(f, ", RF/{}", self.bitrate.clock())?;
        if self.pwd {
            write!(f, ", pwd")?;
        }
        if self.aor {
            write!(f, ", AOR")?;
        }
        if self.sequence_terminator {
            write!(f, ", STT")?;
        }
        write!(f, ", max block {}", self.maxblock)
    }
}

fn bit(word: u32, pos: u32) -> bool {
    (word >> pos) & 1 == 1
}

fn decode_t55x7(word: u32) -> ConfigFields {
    let safer_key = ((word >> 28) & 0xF) as u8;
    let extended = matches!(safer_key, 6 | 9) && bit(word, 17);
    let bitrate = if extended {
        Bitrate::Extended(((word >> 18) & 0x3F) as u8)
    } else {
        Bitrate::Index(((word >> 18) & 0x7) as u8)
    };
    let raw_mod_code = ((word >> 12) & 0x1F) as u8;
    ConfigFields {
        safer_key,
        bitrate,
        modulation: T55x7Modulation::try_from(raw_mod_code).ok().map(Into::into),
        raw_mod_code,
        pskcf: ((word >> 10) & 0x3) as u8,
        aor: bit(word, 9),
        otp: bit(word, 8),
        maxblock: ((word >> 5) & 0x7) as u8,
        pwd: bit(word, 4),
        sequence_terminator: bit(word, 3),
        fast_write: bit(word, 2),
        inverse: bit(word, 1),
        por_delay: bit(word, 0),
        page_select: false,
        header: Q5_HEADER,
    }
}

fn decode_q5(word: u32) -> ConfigFields {
    let rate_value = ((word >> 12) & 0x3F) as u8;
    let clock = (2 * rate_value as u16 + 2).clamp(8, 128) as u8;
    let bitrate = match Bitrate::index_for_clock(clock) {
        Some(i) if Bitrate::Index(i).clock() == 2 * rate_value + 2 => Bitrate::Index(i),
        _ => Bitrate::Extended(rate_value),
    };
    let raw_mod_code = ((word >> 4) & 0x7) as u8;
    ConfigFields {
        safer_key: 0,
        bitrate,
        modulation: Q5Modulation::try_from(raw_mod_code).ok().map(Into::into),
        raw_mod_code,
        pskcf: ((word >> 8) & 0x3) as u8,
        aor: bit(word, 11),
        otp: false,
        maxblock: ((word >> 1) & 0x7) as u8,
        pwd: bit(word, 10),
        sequence_terminator: bit(word, 0),
        fast_write: bit(word, 18),
        inverse: bit(word, 7),
        por_delay: false,
        page_select: bit(word, 19),
        header: ((word >> 20) & 0xFFF) as u16,
    }
}

/// Decode a configuration word under the selected layout. Total: never fails.
pub fn decode(word: u32, is_q5: bool) -> ConfigFields {
    if is_q5 {
        decode_q5(word)
    } else {
        decode_t55x7(word)
    }
}

fn encode_t55x7(fields: &ConfigFields) -> u32 {
    let mut word = (fields.safer_key as u32) << 28;
    match fields.bitrate {
        Bitrate::Index(i) => word |= ((i & 0x7) as u32) << 18,
        Bitrate::Extended(v) => {
            word |= 1 << 17;
            word |= ((v & 0x3F) as u32) << 18;
        }
    }
    let code = match fields.modulation {
        Some(m) => T55x7Modulation::from_modulation(m).code(),
        None => fields.raw_mod_code,
    };
    word |= ((code & 0x1F) as u32) << 12;
    word |= ((fields.pskcf & 0x3) as u32) << 10;
    word |= (fields.aor as u32) << 9;
    word |= (fields.otp as u32) << 8;
    word |= ((fields.maxblock & 0x7) as u32) << 5;
    word |= (fields.pwd as u32) << 4;
    word |= (fields.sequence_terminator as u32) << 3;
    word |= (fields.fast_write as u32) << 2;
    word |= (fields.inverse as u32) << 1;
    word |= fields.por_delay as u32;
    word
}

fn encode_q5(fields: &ConfigFields) -> u32 {
    let mut word = ((fields.header & 0xFFF) as u32) << 20;
    word |= (fields.page_select as u32) << 19;
    word |= (fields.fast_write as u32) << 18;
    let rate_value = match fields.bitrate {
        Bitrate::Index(i) => (Bitrate::Index(i).clock() - 2) / 2,
        Bitrate::Extended(v) => v & 0x3F,
    };
    word |= (rate_value as u32) << 12;
    word |= (fields.aor as u32) << 11;
    word |= (fields.pwd as u32) << 10;
    word |= ((fields.pskcf & 0x3) as u32) << 8;
    word |= (fields.inverse as u32) << 7;
    let code = match fields.modulation {
        Some(m) => Q5Modulation::from_modulation(m).code(),
        None => fields.raw_mod_code,
    };
    word |= ((code & 0x7) as u32) << 4;
    word |= ((fields.maxblock & 0x7) as u32) << 1;
    word |= fields.sequence_terminator as u32;
    word
}

/// Encode a configuration word under the selected layout. Inverse of
/// [`decode`] for any representable field combination.
pub fn encode(fields: &ConfigFields, is_q5: bool) -> u32 {
    if is_q5 {
        encode_q5(fields)
    } else {
        encode_t55x7(fields)
    }
}

/// Well-known per-family configuration words, advisory metadata used for
/// display and to break ties between detection candidates.
pub const KNOWN_CONFIGS: &[(u32, &str)] = &[
    (0x000880E8, "T55x7 default (Manchester RF/32)"),
    (0x000880E0, "T55x7 raw (Manchester RF/32, no STT)"),
    (0x00148040, "EM unique"),
    (0x00148068, "Visa2000"),
    (0x00088040, "Viking"),
    (0x00088C6A, "Noralsy"),
    (0x00088088, "Presco"),
    (0x00107060, "HID 26-bit"),
    (0x00107080, "Pyramid"),
    (0x00147040, "ioProx"),
    (0x00081040, "Indala 64-bit"),
    (0x000810E0, "Indala 224-bit"),
    (0x00150060, "Guard Prox II"),
    (0x00158040, "Jablotron"),
    (0x603E1040, "Keri"),
    (0x000C8060, "Securakey"),
    (0x00080080, "PAC/Stanley"),
    (0x000C0080, "Verichip"),
    (0x00081060, "NexWatch"),
    (0x907F0042, "Nedap 64-bit"),
    (0x907F0242, "Nedap 128-bit"),
    (0x903F8080, "FDX-B"),
    (0x00098080, "FDX-B (alternate)"),
    (0x00090040, "Motorola Flexpass"),
    (0x00202040, "Idteck"),
    (0x6001F004, "Q5 default (Manchester RF/64)"),
];

/// Look a word up against the known-configuration table.
pub fn known_config_match(word: u32) -> Option<&'static str> {
    KNOWN_CONFIGS
        .iter()
        .find(|&&(w, _)| w == word)
        .map(|&(_, name)| name)
}
