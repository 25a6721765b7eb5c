use crate::candidate::{CandidateId, DiscoveredAttribute, HostKey};
use crate::sheet::ParsedSheet;
use crate::state::RunId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// A freshly parsed upload; replaces every candidate held so far.
    SheetParsed(ParsedSheet),
    /// User asked to validate and test the current candidates.
    ProbeRequested,
    /// Inventory answered (or failed to answer) whether `key` already exists.
    ExistenceChecked {
        run: RunId,
        key: HostKey,
        verdict: Result<ExistenceVerdict, String>,
    },
    /// Connectivity test for the run's surviving candidates returned.
    ProbeFinished {
        run: RunId,
        outcome: Result<ProbeReport, String>,
    },
    /// Grace window after probing ran out; failed candidates may go.
    RetentionElapsed { run: RunId },
    /// User aborted the active run.
    RunCancelled,
    /// User removed a single candidate from the list.
    CandidateRemoved(CandidateId),
    /// Owning dialog closed or the batch was committed.
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistenceVerdict {
    pub exists: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProbeReport {
    pub results: Vec<ProbeResult>,
    pub successful_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub key: HostKey,
    pub succeeded: bool,
    pub message: Option<String>,
    pub detail: Option<String>,
    pub discovered: Vec<DiscoveredAttribute>,
}
