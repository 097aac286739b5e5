// Copyright 2025-2026 CEMAXECUTER LLC

use std::fmt;

/// Demodulation family/variant for the session. T55x7 and Q5 encode these
/// with different integer codes; conversion goes through the per-layout
/// enums below, never a shared table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modulation {
    Nrz,
    Psk1,
    Psk2,
    Psk3,
    Fsk1,
    Fsk2,
    Fsk1a,
    Fsk2a,
    Ask,
    Biphase,
    BiphaseInverted,
}

impl Modulation {
    /// FSK variants share clock detection and demod parameters.
    pub fn is_fsk(self) -> bool {
        matches!(
            self,
            Modulation::Fsk1 | Modulation::Fsk2 | Modulation::Fsk1a | Modulation::Fsk2a
        )
    }

    pub fn is_psk(self) -> bool {
        matches!(self, Modulation::Psk1 | Modulation::Psk2 | Modulation::Psk3)
    }

    /// Field-clock divisor pair for FSK variants: (fc_high, fc_low).
    /// The "a" variants swap the divisors' bit meaning, which the demod
    /// expresses as an extra inversion.
    pub fn fsk_pair(self) -> Option<(u8, u8)> {
        match self {
            Modulation::Fsk1 | Modulation::Fsk1a => Some((8, 5)),
            Modulation::Fsk2 | Modulation::Fsk2a => Some((10, 8)),
            _ => None,
        }
    }
}

impl fmt::Display for Modulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Modulation::Nrz => "DIRECT/NRZ",
            Modulation::Psk1 => "PSK1",
            Modulation::Psk2 => "PSK2",
            Modulation::Psk3 => "PSK3",
            Modulation::Fsk1 => "FSK1",
            Modulation::Fsk2 => "FSK2",
            Modulation::Fsk1a => "FSK1a",
            Modulation::Fsk2a => "FSK2a",
            Modulation::Ask => "ASK/Manchester",
            Modulation::Biphase => "Biphase",
            Modulation::BiphaseInverted => "Biphase (inverted)",
        };
        f.write_str(s)
    }
}

/// T55x7 5-bit modulation codes (block 0 bits 16:12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum T55x7Modulation {
    Direct = 0,
    Psk1 = 1,
    Psk2 = 2,
    Psk3 = 3,
    Fsk1 = 4,
    Fsk2 = 5,
    Fsk1a = 6,
    Fsk2a = 7,
    Manchester = 8,
    Biphase = 16,
    Diphase = 24,
}

impl TryFrom<u8> for T55x7Modulation {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        Ok(match code {
            0 => T55x7Modulation::Direct,
            1 => T55x7Modulation::Psk1,
            2 => T55x7Modulation::Psk2,
            3 => T55x7Modulation::Psk3,
            4 => T55x7Modulation::Fsk1,
            5 => T55x7Modulation::Fsk2,
            6 => T55x7Modulation::Fsk1a,
            7 => T55x7Modulation::Fsk2a,
            8 => T55x7Modulation::Manchester,
            16 => T55x7Modulation::Biphase,
            24 => T55x7Modulation::Diphase,
            other => return Err(other),
        })
    }
}

impl From<T55x7Modulation> for Modulation {
    fn from(m: T55x7Modulation) -> Self {
        match m {
            T55x7Modulation::Direct => Modulation::Nrz,
            T55x7Modulation::Psk1 => Modulation::Psk1,
            T55x7Modulation::Psk2 => Modulation::Psk2,
            T55x7Modulation::Psk3 => Modulation::Psk3,
            T55x7Modulation::Fsk1 => Modulation::Fsk1,
            T55x7Modulation::Fsk2 => Modulation::Fsk2,
            T55x7Modulation::Fsk1a => Modulation::Fsk1a,
            T55x7Modulation::Fsk2a => Modulation::Fsk2a,
            T55x7Modulation::Manchester => Modulation::Ask,
            T55x7Modulation::Biphase => Modulation::Biphase,
            T55x7Modulation::Diphase => Modulation::BiphaseInverted,
        }
    }
}

impl T55x7Modulation {
    pub fn from_modulation(m: Modulation) -> Self {
        match m {
            Modulation::Nrz => T55x7Modulation::Direct,
            Modulation::Psk1 => T55x7Modulation::Psk1,
            Modulation::Psk2 => T55x7Modulation::Psk2,
            Modulation::Psk3 => T55x7Modulation::Psk3,
            Modulation::Fsk1 => T55x7Modulation::Fsk1,
            Modulation::Fsk2 => T55x7Modulation::Fsk2,
            Modulation::Fsk1a => T55x7Modulation::Fsk1a,
            Modulation::Fsk2a => T55x7Modulation::Fsk2a,
            Modulation::Ask => T55x7Modulation::Manchester,
            Modulation::Biphase => T55x7Modulation::Biphase,
            Modulation::BiphaseInverted => T55x7Modulation::Diphase,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Q5/T5555 3-bit modulation codes (block 0 bits 6:4). A distinct table
/// from T55x7's: the same name maps to a different integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Q5Modulation {
    Manchester = 0,
    Psk1 = 1,
    Psk2 = 2,
    Psk3 = 3,
    Fsk1a = 4,
    Fsk2a = 5,
    Biphase = 6,
    Direct = 7,
}

impl TryFrom<u8> for Q5Modulation {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        Ok(match code {
            0 => Q5Modulation::Manchester,
            1 => Q5Modulation::Psk1,
            2 => Q5Modulation::Psk2,
            3 => Q5Modulation::Psk3,
            4 => Q5Modulation::Fsk1a,
            5 => Q5Modulation::Fsk2a,
            6 => Q5Modulation::Biphase,
            7 => Q5Modulation::Direct,
            other => return Err(other),
        })
    }
}

impl From<Q5Modulation> for Modulation {
    fn from(m: Q5Modulation) -> Self {
        match m {
            Q5Modulation::Manchester => Modulation::Ask,
            Q5Modulation::Psk1 => Modulation::Psk1,
            Q5Modulation::Psk2 => Modulation::Psk2,
            Q5Modulation::Psk3 => Modulation::Psk3,
            Q5Modulation::Fsk1a => Modulation::Fsk1a,
            Q5Modulation::Fsk2a => Modulation::Fsk2a,
            Q5Modulation::Biphase => Modulation::Biphase,
            Q5Modulation::Direct => Modulation::Nrz,
        }
    }
}

impl Q5Modulation {
    /// Q5 has no codes for plain FSK1/FSK2 or inverted biphase; those fold
    /// onto their nearest representable variant.
    pub fn from_modulation(m: Modulation) -> Self {
        match m {
            Modulation::Ask => Q5Modulation::Manchester,
            Modulation::Psk1 => Q5Modulation::Psk1,
            Modulation::Psk2 => Q5Modulation::Psk2,
            Modulation::Psk3 => Q5Modulation::Psk3,
            Modulation::Fsk1 | Modulation::Fsk1a => Q5Modulation::Fsk1a,
            Modulation::Fsk2 | Modulation::Fsk2a => Q5Modulation::Fsk2a,
            Modulation::Biphase | Modulation::BiphaseInverted => Q5Modulation::Biphase,
            Modulation::Nrz => Q5Modulation::Direct,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Clock divisors selectable by the 3-bit T55x7 bitrate index.
pub const CLOCK_TABLE: [u8; 8] = [8, 16, 32, 40, 50, 64, 100, 128];

/// Bit clock of the session: either a 3-bit divisor index or the raw 6-bit
/// wide-range field used by extended-mode T55x7 and by Q5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitrate {
    Index(u8),
    Extended(u8),
}

impl Bitrate {
    /// Field clocks per bit.
    pub fn clock(self) -> u8 {
        match self {
            Bitrate::Index(i) => CLOCK_TABLE[(i & 7) as usize],
            Bitrate::Extended(v) => (2 * (v as u16 & 0x3F) + 2).clamp(8, 128) as u8,
        }
    }

    /// Divisor index for a clock, if it is on the 3-bit grid.
    pub fn index_for_clock(clock: u8) -> Option<u8> {
        CLOCK_TABLE.iter().position(|&c| c == clock).map(|i| i as u8)
    }
}

impl Default for Bitrate {
    fn default() -> Self {
        Bitrate::Index(0)
    }
}

/// The four alternative command encodings a tag can be configured to expect.
/// Commands sent in the wrong mode are simply not heard: the exchange yields
/// silence, not an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DownlinkMode {
    Fixed,
    LongLeadingReference,
    LeadingZero,
    OneOfFour,
}

impl DownlinkMode {
    /// All modes in ascending wire-index order, the order recovery loops
    /// probe them in.
    pub const ALL: [DownlinkMode; 4] = [
        DownlinkMode::Fixed,
        DownlinkMode::LongLeadingReference,
        DownlinkMode::LeadingZero,
        DownlinkMode::OneOfFour,
    ];

    pub fn index(self) -> u8 {
        match self {
            DownlinkMode::Fixed => 0,
            DownlinkMode::LongLeadingReference => 1,
            DownlinkMode::LeadingZero => 2,
            DownlinkMode::OneOfFour => 3,
        }
    }
}

impl TryFrom<u8> for DownlinkMode {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        Ok(match v {
            0 => DownlinkMode::Fixed,
            1 => DownlinkMode::LongLeadingReference,
            2 => DownlinkMode::LeadingZero,
            3 => DownlinkMode::OneOfFour,
            other => return Err(other),
        })
    }
}

impl fmt::Display for DownlinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DownlinkMode::Fixed => "fixed bit length",
            DownlinkMode::LongLeadingReference => "long leading reference",
            DownlinkMode::LeadingZero => "leading zero",
            DownlinkMode::OneOfFour => "1 of 4",
        };
        f.write_str(s)
    }
}

/// Where the session's block 0 value came from. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Block0Source {
    #[default]
    NotSet,
    AutoDetected,
    UserSet,
    TagRead,
}

/// The session's current tag profile. Owned by the engine; every operation
/// that needs it takes `&mut Engine`, there is no process-wide state.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub modulation: Modulation,
    pub bitrate: Bitrate,
    /// Demodulated polarity.
    pub inverted: bool,
    /// Bit position of the 32-bit block within a demodulated buffer.
    pub offset: u8,
    /// Raw configuration word as read or constructed.
    pub block0: u32,
    pub block0_source: Block0Source,
    /// Selects which of the two incompatible block-0 layouts applies.
    pub is_q5: bool,
    pub sequence_terminator: bool,
    pub use_password: bool,
    /// Meaningful only when `use_password` is set.
    pub password: u32,
    pub downlink_mode: DownlinkMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            modulation: Modulation::Ask,
            bitrate: Bitrate::default(),
            inverted: false,
            offset: 0,
            block0: 0,
            block0_source: Block0Source::NotSet,
            is_q5: false,
            sequence_terminator: false,
            use_password: false,
            password: 0,
            downlink_mode: DownlinkMode::Fixed,
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "chip type......... {}",
            if self.is_q5 { "Q5/T5555" } else { "T55x7" }
        )?;
        writeln!(f, "modulation........ {}", self.modulation)?;
        writeln!(f, "bit rate.......... RF/{}", self.bitrate.clock())?;
        writeln!(f, "inverted.......... {}", self.inverted)?;
        writeln!(f, "offset............ {}", self.offset)?;
        writeln!(f, "seq. terminator... {}", self.sequence_terminator)?;
        writeln!(f, "block0............ {:#010x}", self.block0)?;
        writeln!(f, "downlink mode..... {}", self.downlink_mode)?;
        if self.use_password {
            writeln!(f, "password.......... {:#010x}", self.password)?;
        }
        Ok(())
    }
}
