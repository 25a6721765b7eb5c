//! Fleet engine: REST client, cancellation, inventory loading, selection,
//! the onboarding session and bulk dispatch.
mod cancel;
mod client;
mod config;
mod debounce;
mod decode;
mod dispatch;
mod loader;
mod selection;
mod session;
mod types;

pub use cancel::{Cancelled, RunScope};
pub use client::{ClientSettings, FleetApi, OperationKind, ReqwestFleetApi};
pub use config::{ConfigError, FleetConfig};
pub use debounce::{Debouncer, Ticket};
pub use decode::decode_sheet;
pub use dispatch::{DispatchReceipt, Dispatcher, OnboardReceipt, OperationHandle};
pub use loader::{InventoryLoader, InventoryView, LoadOutcome, LoaderSettings};
pub use selection::SelectionController;
pub use session::{OnboardingSession, PipelineSettings, ProbeMode, SheetSummary};
pub use types::{ApiError, DispatchError, FailureKind, SessionError};
