//! Maps a claimed job onto the engine entry point that executes it.

use quorum_core::jobs::JobName;
use quorum_core::types::DbId;
use quorum_engine::{Engine, EngineError};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown job name '{0}'")]
    UnknownJob(String),

    #[error("Job '{0}' requires a project id")]
    MissingProject(JobName),

    #[error("Invalid arguments for job '{job}': {message}")]
    InvalidArgs { job: JobName, message: String },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl DispatchError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Engine(e) => !e.is_client_error(),
            _ => false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct JobArgs {
    task_id: Option<DbId>,
    annotator_id: Option<DbId>,
    hours: Option<i64>,
}

impl JobArgs {
    fn parse(job: JobName, args: &Value) -> Result<Self, DispatchError> {
        if args.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(args.clone()).map_err(|e| DispatchError::InvalidArgs {
            job,
            message: e.to_string(),
        })
    }

    fn task_id(&self, job: JobName) -> Result<DbId, DispatchError> {
        self.task_id.ok_or_else(|| DispatchError::InvalidArgs {
            job,
            message: "missing task_id".into(),
        })
    }

    fn annotator_id(&self, job: JobName) -> Result<DbId, DispatchError> {
        self.annotator_id.ok_or_else(|| DispatchError::InvalidArgs {
            job,
            message: "missing annotator_id".into(),
        })
    }
}

/// Run one job against `engine`. Returns the handler's summary as JSON for
/// logging.
pub async fn dispatch(
    engine: &Engine,
    job_name: &str,
    project_id: Option<DbId>,
    args: &Value,
) -> Result<Value, DispatchError> {
    let job: JobName = job_name
        .parse()
        .map_err(|_| DispatchError::UnknownJob(job_name.to_string()))?;
    let args = JobArgs::parse(job, args)?;

    let project = || project_id.ok_or(DispatchError::MissingProject(job));
    let result = match job {
        JobName::ConsolidateTask => summary(&engine.consolidate(args.task_id(job)?).await?),
        JobName::TaskCreated => {
            let created = engine.on_task_created(project()?, args.task_id(job)?).await?;
            serde_json::json!({ "created": created })
        }
        JobName::AnnotatorJoined => summary(
            &engine
                .on_annotator_joined(project()?, args.annotator_id(job)?)
                .await?,
        ),
        JobName::AssignmentCompleted => summary(
            &engine
                .on_assignment_completed(project()?, args.task_id(job)?)
                .await?,
        ),
        JobName::AssignProjectTasks => summary(&engine.assign_project_tasks(project()?).await?),
        JobName::ReassignCapacity => {
            summary(&engine.reassign_when_capacity_available(project()?).await?)
        }
        JobName::ReassignStale => {
            summary(&engine.reassign_stale_tasks(project()?, args.hours).await?)
        }
        JobName::BalanceWorkload => summary(&engine.balance_workload(project()?).await?),
        JobName::FinalizeReached => summary(&engine.finalize_reached(project()?).await?),
        JobName::AwardStreakBonuses => summary(&engine.award_streak_bonuses(project()?).await?),
    };
    Ok(result)
}

fn summary(value: &impl serde::Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
