//! Core domain logic for the work-hour tracker.
//!
//! This crate contains the fundamental types and logic for:
//! - Correlation: turning raw producer signals into normalized activity events
//! - Windowing: fixed-length sessions and idle-bounded work blocks
//! - Registry: the single in-memory owner of live session state
//! - Store: the persistence contract the daemon writes through

pub mod activity_type;
pub mod correlator;
mod error;
pub mod event;
pub mod project;
pub mod registry;
pub mod session;
pub mod store;
pub mod types;
pub mod window;
pub mod work_block;

pub use activity_type::{ActivitySource, ActivityType};
pub use correlator::{
    AllowListPolicy, Correlator, CorrelatorStats, Dropped, FileOp, RawSignal, SignalPolicy,
};
pub use error::EngineError;
pub use event::{ActivityEvent, ActivitySubmission};
pub use project::ProjectIdentity;
pub use registry::{ActivityOutcome, ChangeSet, CloseAllSummary, PendingSession, StateRegistry};
pub use session::{Session, SessionState};
pub use store::{ActivityStore, DaySummary, ProjectSummary, StoreError, WorkSummary};
pub use types::{EventId, SessionId, UserId, ValidationError, WorkBlockId};
pub use window::WindowConfig;
pub use work_block::{WorkBlock, WorkBlockState};
