//! Task assignment, consensus and honeypot quality control.
//!
//! [`Engine`] owns every decision: who works on which task, when a task's
//! votes agree, when a probe is served and how its grade moves an
//! annotator's trust. Storage sits behind [`AssignmentStore`] ([`PgStore`]
//! in production, [`MemoryStore`] for tests) and follow-up work behind
//! [`JobQueue`]. Operations that write assignments for a project are
//! serialized per project through [`ProjectLocks`].
//!
//! [`AssignmentApi`] is the operator surface on top of the engine.

mod allocator;
mod consensus;
mod engine;
mod error;
mod honeypot;
mod leaderboard;
mod locks;
mod maintenance;
mod queue;
mod store;
mod triggers;
mod work;

pub mod api;

pub use allocator::{AllocationSummary, RankedCandidate, TaskError};
pub use api::{
    AssignmentApi, AssignmentStatusReport, BindingSummary, ReassignOutcome, ReassignParams,
};
pub use consensus::ReviewOutcome;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use locks::ProjectLocks;
pub use maintenance::{
    BalanceSummary, FinalizeSummary, StaleSummary, StreakSummary, TaskReassignment,
};
pub use queue::{JobQueue, JobRequest, MemoryJobQueue, PgJobQueue};
pub use store::{AssignmentStore, MemoryStore, PgStore};
pub use triggers::ImportSummary;
pub use work::{ServedTask, SubmissionOutcome};
