//! Deployment orchestrator
//!
//! Fans one artifact out to a snapshot of devices, tracks divergent
//! per-job state machines, and keeps them consistent under partial
//! failure, mid-flight disconnects, and retried progress reports.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use tracing::{info, warn};

use crate::deploy::job::{Applied, DeploymentJob, FailureReason, JobState};
use crate::deploy::notify::Notifier;
use crate::errors::CoreError;
use crate::events::hub::{Event, EventHub};
use crate::registry::device::DeviceStatus;
use crate::registry::registry::DeviceRegistry;
use crate::utils::generate_uuid;

/// Per-stage timeouts enforced by the watchdog
#[derive(Debug, Clone)]
pub struct DeployTimeouts {
    /// Maximum time a job may sit in Queued or Notified
    pub notified: Duration,

    /// Maximum time in Downloading
    pub downloading: Duration,

    /// Maximum time in Installing
    pub installing: Duration,

    /// A job not past Notified whose device has gone offline for longer
    /// than this fails without waiting for the full stage timeout
    pub offline_grace: Duration,
}

impl Default for DeployTimeouts {
    fn default() -> Self {
        Self {
            notified: Duration::minutes(10),
            downloading: Duration::minutes(30),
            installing: Duration::minutes(10),
            offline_grace: Duration::minutes(5),
        }
    }
}

/// Read-side filter over the job table
#[derive(Debug, Clone, Default)]
pub struct InstallationFilter {
    pub artifact_id: Option<String>,
    pub device_id: Option<String>,
    pub status: Option<JobState>,
    pub limit: Option<usize>,
}

/// Deployment orchestrator over an in-memory job table
pub struct Orchestrator {
    jobs: RwLock<HashMap<String, Arc<RwLock<DeploymentJob>>>>,
    by_device: RwLock<HashMap<String, Vec<String>>>,
    registry: Arc<DeviceRegistry>,
    notifier: Arc<dyn Notifier>,
    hub: Arc<EventHub>,
    timeouts: DeployTimeouts,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        notifier: Arc<dyn Notifier>,
        hub: Arc<EventHub>,
        timeouts: DeployTimeouts,
    ) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            by_device: RwLock::new(HashMap::new()),
            registry,
            notifier,
            hub,
            timeouts,
        }
    }

    /// Deploy an artifact to a set of devices.
    ///
    /// The selector is resolved to a deduplicated snapshot at call time;
    /// later registry changes do not alter the deployment. Any prior
    /// non-terminal job for a selected device is superseded first, so at
    /// most one job per device is ever in flight. Each job is notified
    /// independently: one unreachable device fails its own job
    /// immediately without blocking the others.
    pub async fn deploy(
        &self,
        artifact_id: &str,
        device_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<DeploymentJob>, CoreError> {
        // Selection snapshot: dedupe, then resolve every device up front
        let mut seen = HashSet::new();
        let mut selection = Vec::new();
        let mut unknown = Vec::new();
        for id in device_ids {
            if !seen.insert(id.clone()) {
                continue;
            }
            match self.registry.get_active(id) {
                Some(device) => selection.push(device),
                None => unknown.push(id.clone()),
            }
        }

        if !unknown.is_empty() {
            return Err(CoreError::Validation(format!(
                "unknown device ids in selector: {:?}",
                unknown
            )));
        }
        if selection.is_empty() {
            return Err(CoreError::Validation("device selector resolved to no devices".to_string()));
        }

        // Supersede still-pending jobs before creating replacements
        for device in &selection {
            self.supersede_active(&device.id, now);
        }

        let mut created = Vec::new();
        {
            let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
            let mut by_device = self.by_device.write().unwrap_or_else(|e| e.into_inner());
            for device in &selection {
                let job = DeploymentJob::new(
                    artifact_id.to_string(),
                    device.id.clone(),
                    generate_uuid(),
                    now,
                );
                self.hub.publish(Self::job_event(&job));

                let entry = Arc::new(RwLock::new(job));
                let job_id = entry.read().unwrap_or_else(|e| e.into_inner()).job_id.clone();
                by_device.entry(device.id.clone()).or_default().push(job_id.clone());
                jobs.insert(job_id, entry.clone());
                created.push(entry);
            }
        }

        info!(
            "Deploying artifact {} to {} device(s)",
            artifact_id,
            selection.len()
        );

        // Notify all devices concurrently; no job lock is held across
        // the delivery await
        let deliveries = selection.iter().zip(created.iter()).map(|(device, entry)| {
            let snapshot = entry.read().unwrap_or_else(|e| e.into_inner()).clone();
            async move {
                let result = self.notifier.notify(device, &snapshot).await;
                let mut job = entry.write().unwrap_or_else(|e| e.into_inner());
                match result {
                    Ok(()) => {
                        let _ = job.advance(JobState::Notified, now);
                    }
                    Err(e) => {
                        warn!("Job {} not delivered: {}", job.job_id, e);
                        let _ = job.fail(FailureReason::Unreachable, Some(e.to_string()), now);
                    }
                }
                self.hub.publish(Self::job_event(&job));
                job.clone()
            }
        });

        Ok(join_all(deliveries).await)
    }

    /// Apply a device-reported progress transition.
    ///
    /// Reports are monotonic: duplicates and earlier states are no-ops,
    /// backward or skipping reports are invalid transitions. A report of
    /// Failed records the device-supplied message.
    pub fn report_progress(
        &self,
        job_id: &str,
        reporting_device_id: &str,
        target: JobState,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Applied, CoreError> {
        let entry = self.job(job_id)?;
        let mut job = entry.write().unwrap_or_else(|e| e.into_inner());

        if job.device_id != reporting_device_id {
            return Err(CoreError::NotFound(format!("job {} not found", job_id)));
        }

        let applied = if target == JobState::Failed {
            job.fail(FailureReason::DeviceReported, error_message, now)?
        } else {
            job.advance(target, now)?
        };

        if applied == Applied::Transitioned {
            self.hub.publish(Self::job_event(&job));
        }
        Ok(applied)
    }

    /// Read-side projection over the job table, newest first
    pub fn installations(&self, filter: &InstallationFilter) -> Vec<DeploymentJob> {
        let entries: Vec<Arc<RwLock<DeploymentJob>>> = {
            let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
            jobs.values().cloned().collect()
        };

        let mut rows: Vec<DeploymentJob> = entries
            .iter()
            .map(|entry| entry.read().unwrap_or_else(|e| e.into_inner()).clone())
            .filter(|job| {
                filter
                    .artifact_id
                    .as_ref()
                    .is_none_or(|id| &job.artifact_id == id)
                    && filter.device_id.as_ref().is_none_or(|id| &job.device_id == id)
                    && filter.status.is_none_or(|s| job.state == s)
            })
            .collect();

        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });

        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        rows
    }

    /// Snapshot one job
    pub fn get(&self, job_id: &str) -> Result<DeploymentJob, CoreError> {
        let entry = self.job(job_id)?;
        let job = entry.read().unwrap_or_else(|e| e.into_inner());
        Ok(job.clone())
    }

    /// Watchdog pass: fail jobs stuck past their stage timeout, and jobs
    /// not past Notified whose device has been offline beyond the grace
    /// period. Runs on an interval independent of request traffic.
    pub fn expire_stale(&self, now: DateTime<Utc>) -> usize {
        let entries: Vec<Arc<RwLock<DeploymentJob>>> = {
            let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
            jobs.values().cloned().collect()
        };

        let mut expired = 0;
        for entry in entries {
            let mut job = entry.write().unwrap_or_else(|e| e.into_inner());
            if job.state.is_terminal() {
                continue;
            }

            let stage_limit = match job.state {
                JobState::Queued | JobState::Notified => self.timeouts.notified,
                JobState::Downloading => self.timeouts.downloading,
                JobState::Installing => self.timeouts.installing,
                _ => continue,
            };

            let elapsed = now - job.stage_started_at;
            let device_offline_too_long = matches!(job.state, JobState::Queued | JobState::Notified)
                && elapsed > self.timeouts.offline_grace
                && self.registry.status_of(&job.device_id, now) == Some(DeviceStatus::Offline);

            if elapsed > stage_limit || device_offline_too_long {
                warn!(
                    "Job {} timed out in {} after {}s",
                    job.job_id,
                    job.state.as_str(),
                    elapsed.num_seconds()
                );
                if job
                    .fail(FailureReason::Timeout, None, now)
                    .is_ok_and(|a| a == Applied::Transitioned)
                {
                    self.hub.publish(Self::job_event(&job));
                    expired += 1;
                }
            }
        }
        expired
    }

    fn supersede_active(&self, device_id: &str, now: DateTime<Utc>) {
        let job_ids = {
            let by_device = self.by_device.read().unwrap_or_else(|e| e.into_inner());
            by_device.get(device_id).cloned().unwrap_or_default()
        };

        for job_id in job_ids {
            let Some(entry) = ({
                let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
                jobs.get(&job_id).cloned()
            }) else {
                continue;
            };

            let mut job = entry.write().unwrap_or_else(|e| e.into_inner());
            if job.supersede(now) == Applied::Transitioned {
                info!("Superseded job {} for device {}", job.job_id, device_id);
                self.hub.publish(Self::job_event(&job));
            }
        }
    }

    fn job(&self, job_id: &str) -> Result<Arc<RwLock<DeploymentJob>>, CoreError> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.get(job_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("job {} not found", job_id)))
    }

    fn job_event(job: &DeploymentJob) -> Event {
        Event::DeploymentUpdated {
            job_id: job.job_id.clone(),
            artifact_id: job.artifact_id.clone(),
            device_id: job.device_id.clone(),
            state: job.state.as_str().to_string(),
            failure_reason: job.failure_reason.map(|r| r.as_str().to_string()),
        }
    }
}
