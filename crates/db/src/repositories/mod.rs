//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument. Operations that touch more than
//! one row atomically open their own transaction.

pub mod annotation_repo;
pub mod annotator_repo;
pub mod consensus_repo;
pub mod event_repo;
pub mod expert_review_repo;
pub mod job_repo;
pub mod probe_repo;
pub mod project_assignment_repo;
pub mod project_repo;
pub mod settings_repo;
pub mod task_assignment_repo;
pub mod task_repo;
pub mod trust_record_repo;

pub use annotation_repo::AnnotationRepo;
pub use annotator_repo::AnnotatorRepo;
pub use consensus_repo::ConsensusRepo;
pub use event_repo::EventRepo;
pub use expert_review_repo::ExpertReviewRepo;
pub use job_repo::JobRepo;
pub use probe_repo::ProbeRepo;
pub use project_assignment_repo::ProjectAssignmentRepo;
pub use project_repo::ProjectRepo;
pub use settings_repo::SettingsRepo;
pub use task_assignment_repo::TaskAssignmentRepo;
pub use task_repo::TaskRepo;
pub use trust_record_repo::TrustRecordRepo;
