// Copyright 2025-2026 CEMAXECUTER LLC

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Duration;

use crate::{AcquireRequest, GapTimings, ReaderTransport, TransportError, WriteRequest};

/// Offline backend: replays a raw capture (signed 8-bit envelope samples)
/// recorded from a live reader. Read-only; every acquisition hands out the
/// next window of the recording.
pub struct ReplaySource {
    samples: Vec<i8>,
    cursor: usize,
    /// Rewind to the start for every acquisition instead of advancing.
    /// Detection probes re-read the same block, so this is the default.
    rewind: bool,
}

impl ReplaySource {
    /// Load a raw i8 capture from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let file = File::open(path.as_ref())?;
        let mut reader = BufReader::new(file);
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;
        log::info!(
            "loaded {} samples from {}",
            raw.len(),
            path.as_ref().display()
        );
        Ok(Self::from_samples(raw.into_iter().map(|b| b as i8).collect()))
    }

    /// Wrap an in-memory capture.
    pub fn from_samples(samples: Vec<i8>) -> Self {
        Self {
            samples,
            cursor: 0,
            rewind: true,
        }
    }

    /// Advance through the recording across acquisitions instead of
    /// rewinding.
    pub fn set_streaming(&mut self, streaming: bool) {
        self.rewind = !streaming;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Whole recording, for consumers that scan it directly (the sniffer).
    pub fn all_samples(&self) -> &[i8] {
        &self.samples
    }
}

impl ReaderTransport for ReplaySource {
    fn set_timings(&mut self, timings: &GapTimings) -> Result<(), TransportError> {
        log::debug!("replay: timings for downlink mode {} ignored", timings.mode);
        Ok(())
    }

    fn send_acquire(&mut self, _req: &AcquireRequest) -> Result<(), TransportError> {
        if self.rewind {
            self.cursor = 0;
        }
        Ok(())
    }

    fn download_samples(&mut self, count: usize) -> Result<Vec<i8>, TransportError> {
        if self.cursor >= self.samples.len() {
            // recording exhausted: indistinguishable from a silent tag
            return Err(TransportError::Timeout(Duration::from_millis(0)));
        }
        let end = (self.cursor + count).min(self.samples.len());
        let out = self.samples[self.cursor..end].to_vec();
        self.cursor = end;
        Ok(out)
    }

    fn send_write(&mut self, _req: &WriteRequest) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("replay backend is read-only"))
    }

    fn wakeup(&mut self, _password: u32, _downlink_mode: u8) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("replay backend is read-only"))
    }
}
