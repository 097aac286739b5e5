// Copyright 2025-2026 CEMAXECUTER LLC

//! In-memory tag standing in for reader hardware. The simulated tag renders
//! real modulated envelopes from its own block contents, honors the downlink
//! mode it is configured for (a mismatched command yields silence, exactly
//! like the air interface), and reinterprets itself after a block-0 write.

use lf_dsp::{demod, modulate};
use lf_reader::{AcquireRequest, GapTimings, ReaderTransport, TransportError, WriteRequest};

use crate::bits::unpack_bits;
use crate::block0;
use crate::config::{DownlinkMode, Modulation};
use crate::ACQUIRE_SAMPLES;

/// A T55xx (or Q5) with 2 pages of 8 blocks. Page 0 block 7 is the password
/// block; password protection is governed by the pwd bit of block 0.
pub struct SimTag {
    pub blocks: [[u32; 8]; 2],
    is_q5: bool,
    downlink: DownlinkMode,
    staged: Option<Vec<i8>>,
    /// Every write that reached the tag, for inspection.
    pub writes_applied: usize,
}

impl SimTag {
    pub fn new(block0: u32) -> Self {
        let mut blocks = [[0u32; 8]; 2];
        blocks[0][0] = block0;
        Self {
            blocks,
            is_q5: false,
            downlink: DownlinkMode::Fixed,
            staged: None,
            writes_applied: 0,
        }
    }

    pub fn new_q5(block0: u32) -> Self {
        let mut tag = Self::new(block0);
        tag.is_q5 = true;
        tag
    }

    pub fn with_password(mut self, password: u32) -> Self {
        self.blocks[0][7] = password;
        self
    }

    pub fn with_downlink(mut self, mode: DownlinkMode) -> Self {
        self.downlink = mode;
        self
    }

    pub fn set_downlink(&mut self, mode: DownlinkMode) {
        self.downlink = mode;
    }

    fn password(&self) -> u32 {
        self.blocks[0][7]
    }

    fn password_required(&self) -> bool {
        block0::decode(self.blocks[0][0], self.is_q5).pwd
    }

    fn silence() -> Vec<i8> {
        vec![0i8; ACQUIRE_SAMPLES]
    }

    fn render(&self, word: u32) -> Vec<i8> {
        let fields = block0::decode(self.blocks[0][0], self.is_q5);
        match render_stream(word, &fields, ACQUIRE_SAMPLES) {
            Some(s) => s,
            // a tag programmed with an undecodable configuration answers
            // with something no demodulator will lock onto
            None => Self::silence(),
        }
    }
}

/// Render the cyclic response stream for one block under a given
/// configuration. Shared by the simulated tag and by detection tests.
pub fn render_stream(word: u32, fields: &block0::ConfigFields, min_samples: usize) -> Option<Vec<i8>> {
    let modulation = fields.modulation?;
    let clock = fields.bitrate.clock();
    let bits_per_rep = 32usize;
    let reps = min_samples / (bits_per_rep * clock as usize) + 2;

    let mut bits = Vec::with_capacity(bits_per_rep * reps);
    for _ in 0..reps {
        bits.extend(unpack_bits(word, 32));
    }

    let mut samples = match modulation {
        Modulation::Ask => modulate::ask_manchester(&bits, clock),
        Modulation::Biphase => modulate::biphase(&bits, clock),
        Modulation::BiphaseInverted => {
            let flipped: Vec<u8> = bits.iter().map(|b| b ^ 1).collect();
            modulate::biphase(&flipped, clock)
        }
        Modulation::Nrz => modulate::nrz(&bits, clock),
        Modulation::Fsk1 | Modulation::Fsk2 => {
            let (hi, lo) = modulation.fsk_pair()?;
            modulate::fsk(&bits, clock, hi, lo)
        }
        Modulation::Fsk1a | Modulation::Fsk2a => {
            let (hi, lo) = modulation.fsk_pair()?;
            let flipped: Vec<u8> = bits.iter().map(|b| b ^ 1).collect();
            modulate::fsk(&flipped, clock, hi, lo)
        }
        Modulation::Psk1 => modulate::psk(&bits, clock, fields.psk_carrier()),
        Modulation::Psk2 | Modulation::Psk3 => {
            let psk1 = demod::psk2_to_psk1(&bits);
            modulate::psk(&psk1, clock, fields.psk_carrier())
        }
    };

    if fields.inverse {
        for s in samples.iter_mut() {
            *s = -*s;
        }
    }
    Some(samples)
}

impl ReaderTransport for SimTag {
    fn set_timings(&mut self, _timings: &GapTimings) -> Result<(), TransportError> {
        Ok(())
    }

    fn send_acquire(&mut self, req: &AcquireRequest) -> Result<(), TransportError> {
        if req.downlink_mode != self.downlink.index() {
            // wrong encoding: the tag never hears the command
            self.staged = Some(Self::silence());
            return Ok(());
        }
        if self.password_required() && (!req.use_password || req.password != self.password()) {
            self.staged = Some(Self::silence());
            return Ok(());
        }
        if req.page > 1 || req.block > 7 {
            self.staged = Some(Self::silence());
            return Ok(());
        }
        let word = self.blocks[req.page as usize][req.block as usize];
        self.staged = Some(self.render(word));
        Ok(())
    }

    fn download_samples(&mut self, _count: usize) -> Result<Vec<i8>, TransportError> {
        self.staged
            .take()
            .ok_or(TransportError::Unsupported("no acquisition staged"))
    }

    fn send_write(&mut self, req: &WriteRequest) -> Result<(), TransportError> {
        // the ack is from the reader, not the tag: a write the tag cannot
        // hear still acks, it just does not program anything
        if req.downlink_mode != self.downlink.index() {
            return Ok(());
        }
        if req.page > 1 || req.block > 7 {
            return Ok(());
        }
        if !req.test_mode
            && self.password_required()
            && (!req.use_password || req.password != self.password())
        {
            return Ok(());
        }
        self.blocks[req.page as usize][req.block as usize] = req.data;
        self.writes_applied += 1;
        Ok(())
    }

    fn wakeup(&mut self, _password: u32, _downlink_mode: u8) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn acquire(tag: &mut SimTag, page: u8, block: u8, use_pwd: bool, pwd: u32, mode: u8) -> Vec<i8> {
        tag.send_acquire(&AcquireRequest {
            page,
            block,
            use_password: use_pwd,
            password: pwd,
            downlink_mode: mode,
            deadline: Duration::from_millis(1000),
        })
        .unwrap();
        tag.download_samples(ACQUIRE_SAMPLES).unwrap()
    }

    #[test]
    fn test_sim_renders_signal_for_matching_mode() {
        let mut tag = SimTag::new(0x000880E8);
        let samples = acquire(&mut tag, 0, 0, false, 0, 0);
        assert!(!lf_dsp::is_noise(&samples));
    }

    #[test]
    fn test_sim_silent_on_wrong_downlink_mode() {
        let mut tag = SimTag::new(0x000880E8).with_downlink(DownlinkMode::LeadingZero);
        let samples = acquire(&mut tag, 0, 0, false, 0, 0);
        assert!(lf_dsp::is_noise(&samples));
        let samples = acquire(&mut tag, 0, 0, false, 0, DownlinkMode::LeadingZero.index());
        assert!(!lf_dsp::is_noise(&samples));
    }

    #[test]
    fn test_sim_password_gate() {
        // pwd bit set in block 0
        let mut tag = SimTag::new(0x000880E8 | (1 << 4)).with_password(0x51243648);
        assert!(lf_dsp::is_noise(&acquire(&mut tag, 0, 0, false, 0, 0)));
        assert!(lf_dsp::is_noise(&acquire(&mut tag, 0, 0, true, 1, 0)));
        assert!(!lf_dsp::is_noise(&acquire(&mut tag, 0, 0, true, 0x51243648, 0)));
    }

    #[test]
    fn test_sim_write_gated_by_password() {
        let mut tag = SimTag::new(0x000880E8 | (1 << 4)).with_password(0xCAFEBABE);
        let mut req = WriteRequest {
            page: 0,
            block: 5,
            use_password: false,
            password: 0,
            test_mode: false,
            downlink_mode: 0,
            data: 0x11223344,
            await_ack: true,
            deadline: Duration::from_millis(2000),
        };
        tag.send_write(&req).unwrap();
        assert_eq!(tag.blocks[0][5], 0, "write without password must not land");
        req.use_password = true;
        req.password = 0xCAFEBABE;
        tag.send_write(&req).unwrap();
        assert_eq!(tag.blocks[0][5], 0x11223344);
    }
}
