use crate::candidate::{CandidateId, ProbeStatus};
use crate::sheet::RowError;
use crate::state::PipelineStage;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusCounts {
    pub untested: usize,
    pub testing: usize,
    pub success: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub(crate) fn record(&mut self, status: ProbeStatus) {
        match status {
            ProbeStatus::Untested => self.untested += 1,
            ProbeStatus::Testing => self.testing += 1,
            ProbeStatus::Success => self.success += 1,
            ProbeStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.untested + self.testing + self.success + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OnboardingView {
    pub stage: PipelineStage,
    pub rows: Vec<CandidateRowView>,
    pub row_errors: Vec<RowError>,
    pub counts: StatusCounts,
    pub can_commit: bool,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRowView {
    pub candidate_id: CandidateId,
    pub row_number: usize,
    pub address: String,
    pub port: u16,
    pub username: String,
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub status: ProbeStatus,
    pub message: Option<String>,
}
