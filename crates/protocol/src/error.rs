// Copyright 2025-2026 CEMAXECUTER LLC

use std::time::Duration;

use lf_reader::TransportError;

/// Failure taxonomy for tag operations. Transport and hardware failures
/// abort the current operation; detection ambiguity and password-search
/// exhaustion are reported as values, not errors.
#[derive(Debug, thiserror::Error)]
pub enum T55Error {
    /// No reply from the reader within the deadline. Never retried
    /// internally; the caller decides whether to repeat.
    #[error("no reply from reader within {0:?}")]
    TransportTimeout(Duration),

    #[error("reader transport: {0}")]
    Transport(TransportError),

    /// The capture is indistinguishable from an empty field.
    #[error("signal too weak: capture classified as noise")]
    SignalTooWeak,

    /// Demodulation of an acquired buffer failed for the attempted
    /// interpretation. The message names the step that failed.
    #[error("decode failed: {0}")]
    DecodeError(&'static str),

    /// More than one candidate survived validation and neither the known
    /// table nor a caller hint resolved it.
    #[error("ambiguous detection: {0} candidates survived")]
    AmbiguousDetection(usize),

    #[error("verify mismatch: wrote {wrote:#010x}, read back {read:#010x}")]
    ValidationMismatch { wrote: u32, read: u32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for T55Error {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout(d) => T55Error::TransportTimeout(d),
            other => T55Error::Transport(other),
        }
    }
}
