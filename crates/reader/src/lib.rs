// Copyright 2025-2026 CEMAXECUTER LLC

pub mod replay;

use std::time::Duration;

/// Wire-level gap timings pushed to the reader before an exchange, in
/// field-clock units. `write_two`/`write_three` only apply to the 1-of-4
/// downlink encoding and are zero otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapTimings {
    /// Downlink mode index the reader firmware keys its encoder off
    pub mode: u8,
    pub start_gap: u8,
    pub write_gap: u8,
    pub write_zero: u8,
    pub write_one: u8,
    pub read_gap: u8,
    pub write_two: u8,
    pub write_three: u8,
}

/// Parameters for acquiring one block's response stream.
#[derive(Debug, Clone, Copy)]
pub struct AcquireRequest {
    pub page: u8,
    pub block: u8,
    pub use_password: bool,
    pub password: u32,
    pub downlink_mode: u8,
    pub deadline: Duration,
}

/// Parameters for a block write.
#[derive(Debug, Clone, Copy)]
pub struct WriteRequest {
    pub page: u8,
    pub block: u8,
    pub use_password: bool,
    pub password: u32,
    pub test_mode: bool,
    pub downlink_mode: u8,
    pub data: u32,
    /// Batch writes pipeline: only the last write of a run waits for the ack.
    pub await_ack: bool,
    pub deadline: Duration,
}

/// Transport-level failures. Timeouts are surfaced, never retried here;
/// the caller decides whether to repeat the exchange.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no reply from reader within {0:?}")]
    Timeout(Duration),
    #[error("reader i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
}

/// Blocking transport to an LF reader. Every call holds the thread until the
/// reader answers or the deadline passes; the physical tag has a single RF
/// state, so callers are strictly sequential.
pub trait ReaderTransport {
    /// Push a downlink gap table. Must precede the acquisition or write that
    /// depends on it.
    fn set_timings(&mut self, timings: &GapTimings) -> Result<(), TransportError>;

    /// Issue a read command and let the reader capture the tag's response.
    fn send_acquire(&mut self, req: &AcquireRequest) -> Result<(), TransportError>;

    /// Download the capture staged by the last `send_acquire`.
    fn download_samples(&mut self, count: usize) -> Result<Vec<i8>, TransportError>;

    /// Issue a block write.
    fn send_write(&mut self, req: &WriteRequest) -> Result<(), TransportError>;

    /// AOR wake-up sequence.
    fn wakeup(&mut self, password: u32, downlink_mode: u8) -> Result<(), TransportError>;
}
