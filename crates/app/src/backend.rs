use lf_protocol::sim::SimTag;
use lf_reader::replay::ReplaySource;
use lf_reader::{AcquireRequest, GapTimings, ReaderTransport, TransportError, WriteRequest};

use crate::BackendArgs;

/// Transport selected on the command line: a capture replay or a simulated
/// tag. Live reader hardware attaches through the same trait.
pub enum AnyTransport {
    Replay(ReplaySource),
    Sim(SimTag),
}

impl AnyTransport {
    pub fn from_args(args: &BackendArgs) -> Result<Self, String> {
        match (&args.file, args.sim) {
            (Some(path), None) => ReplaySource::open(path)
                .map(AnyTransport::Replay)
                .map_err(|e| format!("{}: {}", path.display(), e)),
            (None, Some(block0)) => Ok(AnyTransport::Sim(if args.q5 {
                SimTag::new_q5(block0)
            } else {
                SimTag::new(block0)
            })),
            (None, None) => Err(
                "no backend selected: pass -f <capture> to replay a recording or --sim <block0> \
                 for a simulated tag"
                    .into(),
            ),
            (Some(_), Some(_)) => Err("pass either -f or --sim, not both".into()),
        }
    }
}

impl ReaderTransport for AnyTransport {
    fn set_timings(&mut self, timings: &GapTimings) -> Result<(), TransportError> {
        match self {
            AnyTransport::Replay(t) => t.set_timings(timings),
            AnyTransport::Sim(t) => t.set_timings(timings),
        }
    }

    fn send_acquire(&mut self, req: &AcquireRequest) -> Result<(), TransportError> {
        match self {
            AnyTransport::Replay(t) => t.send_acquire(req),
            AnyTransport::Sim(t) => t.send_acquire(req),
        }
    }

    fn download_samples(&mut self, count: usize) -> Result<Vec<i8>, TransportError> {
        match self {
            AnyTransport::Replay(t) => t.download_samples(count),
            AnyTransport::Sim(t) => t.download_samples(count),
        }
    }

    fn send_write(&mut self, req: &WriteRequest) -> Result<(), TransportError> {
        match self {
            AnyTransport::Replay(t) => t.send_write(req),
            AnyTransport::Sim(t) => t.send_write(req),
        }
    }

    fn wakeup(&mut self, password: u32, downlink_mode: u8) -> Result<(), TransportError> {
        match self {
            AnyTransport::Replay(t) => t.wakeup(password, downlink_mode),
            AnyTransport::Sim(t) => t.wakeup(password, downlink_mode),
        }
    }
}
