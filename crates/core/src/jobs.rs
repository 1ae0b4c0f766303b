//! Background job names, queues and statuses.
//!
//! Domain events (`task_created`, `annotator_joined`, `assignment_completed`)
//! are enqueued as jobs after the triggering transaction commits; the
//! maintenance jobs are enqueued by the periodic scheduler.

define_text_enum! {
    /// Name of a background job; each maps to one handler in the worker.
    JobName ("job name") {
        TaskCreated = "task_created",
        AnnotatorJoined = "annotator_joined",
        AssignmentCompleted = "assignment_completed",
        AssignProjectTasks = "assign_project_tasks",
        ReassignCapacity = "reassign_capacity",
        ReassignStale = "reassign_stale",
        BalanceWorkload = "balance_workload",
        FinalizeReached = "finalize_reached",
        AwardStreakBonuses = "award_streak_bonuses",
        ConsolidateTask = "consolidate_task",
    }
}

impl JobName {
    /// Queue a job is placed on when the caller does not choose one.
    pub fn default_queue(self) -> JobQueueName {
        match self {
            Self::AssignmentCompleted | Self::AnnotatorJoined => JobQueueName::Critical,
            Self::TaskCreated
            | Self::AssignProjectTasks
            | Self::ReassignCapacity
            | Self::ConsolidateTask => JobQueueName::Default,
            Self::ReassignStale
            | Self::BalanceWorkload
            | Self::FinalizeReached
            | Self::AwardStreakBonuses => JobQueueName::Low,
        }
    }

    /// Maintenance jobs enqueued per project on every scheduler tick.
    pub const MAINTENANCE: &'static [JobName] = &[
        JobName::ReassignStale,
        JobName::ReassignCapacity,
        JobName::BalanceWorkload,
        JobName::FinalizeReached,
        JobName::AwardStreakBonuses,
    ];
}

define_text_enum! {
    /// Priority queue a job is placed on.
    JobQueueName ("job queue") {
        Critical = "critical",
        Default = "default",
        Low = "low",
    }
}

impl JobQueueName {
    /// Claim order: lower ranks are claimed first.
    pub fn rank(self) -> i16 {
        match self {
            Self::Critical => 0,
            Self::Default => 1,
            Self::Low => 2,
        }
    }
}

define_text_enum! {
    /// Execution status of a queued job.
    JobStatus ("job status") {
        Pending = "pending",
        Running = "running",
        Completed = "completed",
        Failed = "failed",
    }
}

/// Attempts before a failing job is left in `failed`.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_jobs_claimed_first() {
        assert!(JobQueueName::Critical.rank() < JobQueueName::Default.rank());
        assert!(JobQueueName::Default.rank() < JobQueueName::Low.rank());
    }

    #[test]
    fn submissions_are_critical() {
        assert_eq!(
            JobName::AssignmentCompleted.default_queue(),
            JobQueueName::Critical
        );
        assert_eq!(JobName::BalanceWorkload.default_queue(), JobQueueName::Low);
    }

    #[test]
    fn job_names_parse() {
        for name in JobName::ALL {
            assert_eq!(name.as_str().parse::<JobName>().unwrap(), *name);
        }
    }
}
