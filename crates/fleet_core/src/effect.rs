use std::time::Duration;

use crate::candidate::{HostKey, HostSpec};
use crate::state::RunId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    CheckExists { run: RunId, key: HostKey },
    ProbeConnectivity { run: RunId, targets: Vec<ProbeTarget> },
    ScheduleRetention { run: RunId, after: Duration },
    /// Abort outstanding requests and timers belonging to `run`.
    CancelRun { run: RunId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub key: HostKey,
    pub host: HostSpec,
}
