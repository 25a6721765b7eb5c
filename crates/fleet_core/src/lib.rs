//! Fleet core: pure data model, sheet parsing, selection and the onboarding
//! pipeline state machine. Nothing in here performs I/O.
mod candidate;
mod chunk;
mod effect;
mod inventory;
mod msg;
mod selection;
mod sheet;
mod state;
mod update;
mod view_model;

pub use candidate::{
    CandidateId, CandidateRecord, Credential, DiscoveredAttribute, HostKey, HostSpec, NotVerified,
    ProbeStatus, TransitionError, VerifiedHost,
};
pub use chunk::ChunkPolicy;
pub use effect::{Effect, ProbeTarget};
pub use inventory::{
    AppendMode, ApplyOutcome, InventoryCollection, InventoryFilter, InventoryPage,
    InventoryRecord, PageRequest, RecordId,
};
pub use msg::{ExistenceVerdict, Msg, ProbeReport, ProbeResult};
pub use selection::{
    DispatchTarget, FilterChangePolicy, MaterializationRequired, Selection, SelectionCount,
    SelectionMode,
};
pub use sheet::{
    parse_sheet, Column, InputError, ParsedSheet, RowError, RowErrorReason, SheetSchema,
    DEFAULT_SSH_PORT,
};
pub use state::{CommitBlocked, OnboardingState, PipelineStage, RunId, DEFAULT_RETENTION};
pub use update::update;
pub use view_model::{CandidateRowView, OnboardingView, StatusCounts};
