//! Deployment job state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// Job state
///
/// Happy path: Queued -> Notified -> Downloading -> Installing ->
/// Succeeded. Failed and Superseded are terminal. Devices report state
/// monotonically; backward or skipping reports are invalid transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Notified,
    Downloading,
    Installing,
    Succeeded,
    Failed,
    Superseded,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Superseded)
    }

    /// Position on the forward path; terminal failure states carry none
    fn rank(&self) -> Option<u8> {
        match self {
            JobState::Queued => Some(0),
            JobState::Notified => Some(1),
            JobState::Downloading => Some(2),
            JobState::Installing => Some(3),
            JobState::Succeeded => Some(4),
            JobState::Failed | JobState::Superseded => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Notified => "notified",
            JobState::Downloading => "downloading",
            JobState::Installing => "installing",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Superseded => "superseded",
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "queued" => Ok(JobState::Queued),
            "notified" => Ok(JobState::Notified),
            "downloading" => Ok(JobState::Downloading),
            "installing" => Ok(JobState::Installing),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            "superseded" => Ok(JobState::Superseded),
            _ => Err(format!("unknown job state: {}", s)),
        }
    }
}

/// Why a job ended in Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No viable delivery path at notify time; terminal, never retried
    Unreachable,

    /// Stage timeout or offline grace expiry, moved by the watchdog
    Timeout,

    /// The device reported the installation failed
    DeviceReported,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Unreachable => "unreachable",
            FailureReason::Timeout => "timeout",
            FailureReason::DeviceReported => "device_reported",
        }
    }
}

/// The outcome of applying a progress report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The transition was applied
    Transitioned,

    /// Duplicate or earlier report; nothing changed
    NoOp,
}

/// One tracked (artifact, device) installation
#[derive(Debug, Clone)]
pub struct DeploymentJob {
    pub job_id: String,
    pub artifact_id: String,
    pub device_id: String,
    pub state: JobState,
    pub failure_reason: Option<FailureReason>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// When the current state was entered; the watchdog measures stage
    /// timeouts from here
    pub stage_started_at: DateTime<Utc>,
}

impl DeploymentJob {
    pub fn new(artifact_id: String, device_id: String, job_id: String, now: DateTime<Utc>) -> Self {
        Self {
            job_id,
            artifact_id,
            device_id,
            state: JobState::Queued,
            failure_reason: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            stage_started_at: now,
        }
    }

    /// Apply a forward transition along the happy path.
    ///
    /// Duplicate or earlier reports are no-ops; skipping a state or
    /// moving backward is an invalid transition. Reports against an
    /// already-superseded or failed job are no-ops: the device did not
    /// do anything wrong, its job was simply ended server-side.
    pub fn advance(&mut self, target: JobState, now: DateTime<Utc>) -> Result<Applied, CoreError> {
        let (current, target_rank) = match (self.state.rank(), target.rank()) {
            (Some(c), Some(t)) => (c, t),
            (None, _) => {
                // Failed or Superseded; late device reports are ignored
                return Ok(Applied::NoOp);
            }
            (_, None) => {
                return Err(CoreError::Validation(format!(
                    "{} is not a reportable forward state",
                    target.as_str()
                )));
            }
        };

        if target_rank <= current {
            return Ok(Applied::NoOp);
        }
        if target_rank != current + 1 {
            return Err(CoreError::Conflict(format!(
                "invalid transition {} -> {} for job {}",
                self.state.as_str(),
                target.as_str(),
                self.job_id
            )));
        }

        self.enter(target, now);
        Ok(Applied::Transitioned)
    }

    /// Move a non-terminal job to Failed with the given reason
    pub fn fail(
        &mut self,
        reason: FailureReason,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Applied, CoreError> {
        match self.state {
            JobState::Failed => Ok(Applied::NoOp),
            JobState::Superseded => Ok(Applied::NoOp),
            JobState::Succeeded => Err(CoreError::Conflict(format!(
                "job {} already succeeded, cannot fail",
                self.job_id
            ))),
            _ => {
                self.failure_reason = Some(reason);
                self.error_message = message;
                self.enter(JobState::Failed, now);
                Ok(Applied::Transitioned)
            }
        }
    }

    /// Cancel a still-pending job because a newer deployment targets the
    /// same device
    pub fn supersede(&mut self, now: DateTime<Utc>) -> Applied {
        if self.state.is_terminal() {
            return Applied::NoOp;
        }
        self.enter(JobState::Superseded, now);
        Applied::Transitioned
    }

    fn enter(&mut self, state: JobState, now: DateTime<Utc>) {
        self.state = state;
        self.updated_at = now;
        self.stage_started_at = now;
    }
}
