//! Deployment orchestration tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use fleetd::deploy::job::{DeploymentJob, FailureReason, JobState};
use fleetd::deploy::notify::Notifier;
use fleetd::deploy::orchestrator::{DeployTimeouts, InstallationFilter, Orchestrator};
use fleetd::errors::CoreError;
use fleetd::events::hub::EventHub;
use fleetd::registry::device::Device;
use fleetd::registry::registry::{DeviceRegistry, HeartbeatMetrics, PresencePolicy};

/// Delivers to any device with a push address, records who was notified
struct FakeNotifier {
    notified: Mutex<Vec<String>>,
}

impl FakeNotifier {
    fn new() -> Self {
        Self {
            notified: Mutex::new(Vec::new()),
        }
    }

    fn notified_devices(&self) -> Vec<String> {
        self.notified.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, device: &Device, _job: &DeploymentJob) -> Result<(), CoreError> {
        if device.push_address.is_none() {
            return Err(CoreError::Unreachable(format!(
                "device {} has no push channel",
                device.id
            )));
        }
        self.notified.lock().unwrap().push(device.id.clone());
        Ok(())
    }
}

struct Fixture {
    registry: Arc<DeviceRegistry>,
    notifier: Arc<FakeNotifier>,
    orchestrator: Orchestrator,
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn fixture() -> Fixture {
    let hub = Arc::new(EventHub::new(64));
    let registry = Arc::new(DeviceRegistry::new(PresencePolicy::default(), hub.clone()));
    let notifier = Arc::new(FakeNotifier::new());
    let orchestrator = Orchestrator::new(
        registry.clone(),
        notifier.clone(),
        hub,
        DeployTimeouts::default(),
    );
    Fixture {
        registry,
        notifier,
        orchestrator,
    }
}

fn register_reachable(f: &Fixture, alias: &str, now: DateTime<Utc>) -> Device {
    f.registry
        .register(
            alias.to_string(),
            Some("http://10.0.0.1:9000/push".to_string()),
            now,
        )
        .unwrap()
}

#[tokio::test]
async fn test_deploy_fans_out_and_isolates_unreachable_devices() {
    let f = fixture();
    let t0 = base_time();

    let reachable = register_reachable(&f, "tablet-a", t0);
    let unreachable = f.registry.register("tablet-b".to_string(), None, t0).unwrap();

    let jobs = f
        .orchestrator
        .deploy("art-1", &[reachable.id.clone(), unreachable.id.clone()], t0)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 2);

    let by_device = |id: &str| jobs.iter().find(|j| j.device_id == id).unwrap();

    let delivered = by_device(&reachable.id);
    assert_eq!(delivered.state, JobState::Notified);
    assert!(delivered.failure_reason.is_none());

    // The unreachable device fails its own job without blocking the other
    let failed = by_device(&unreachable.id);
    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.failure_reason, Some(FailureReason::Unreachable));

    assert_eq!(f.notifier.notified_devices(), vec![reachable.id]);
}

#[tokio::test]
async fn test_deploy_selector_validation() {
    let f = fixture();
    let t0 = base_time();
    let device = register_reachable(&f, "tablet-a", t0);

    // Unknown ids reject the whole request before any job is created
    let err = f
        .orchestrator
        .deploy("art-1", &[device.id.clone(), "ghost".to_string()], t0)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert!(f.orchestrator.installations(&InstallationFilter::default()).is_empty());

    // An empty selection is rejected
    let err = f.orchestrator.deploy("art-1", &[], t0).await.unwrap_err();
    assert_eq!(err.kind(), "validation");

    // Duplicate ids collapse to one job
    let jobs = f
        .orchestrator
        .deploy("art-1", &[device.id.clone(), device.id.clone()], t0)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
}

#[tokio::test]
async fn test_new_deploy_supersedes_in_flight_job() {
    let f = fixture();
    let t0 = base_time();
    let device = register_reachable(&f, "tablet-a", t0);

    let first = f
        .orchestrator
        .deploy("art-1", &[device.id.clone()], t0)
        .await
        .unwrap();
    let second = f
        .orchestrator
        .deploy("art-2", &[device.id.clone()], t0 + Duration::minutes(1))
        .await
        .unwrap();

    assert_eq!(
        f.orchestrator.get(&first[0].job_id).unwrap().state,
        JobState::Superseded
    );
    assert_eq!(
        f.orchestrator.get(&second[0].job_id).unwrap().state,
        JobState::Notified
    );

    // A late report from the device against the superseded job is ignored
    let applied = f
        .orchestrator
        .report_progress(
            &first[0].job_id,
            &device.id,
            JobState::Downloading,
            None,
            t0 + Duration::minutes(2),
        )
        .unwrap();
    assert_eq!(applied, fleetd::deploy::job::Applied::NoOp);
    assert_eq!(
        f.orchestrator.get(&first[0].job_id).unwrap().state,
        JobState::Superseded
    );
}

#[tokio::test]
async fn test_progress_reports_are_monotonic() {
    let f = fixture();
    let t0 = base_time();
    let device = register_reachable(&f, "tablet-a", t0);

    let jobs = f
        .orchestrator
        .deploy("art-1", &[device.id.clone()], t0)
        .await
        .unwrap();
    let job_id = jobs[0].job_id.clone();

    let report = |state, secs: i64| {
        f.orchestrator.report_progress(
            &job_id,
            &device.id,
            state,
            None,
            t0 + Duration::seconds(secs),
        )
    };

    use fleetd::deploy::job::Applied;
    assert_eq!(report(JobState::Downloading, 10).unwrap(), Applied::Transitioned);

    // A retried duplicate is acknowledged without effect
    assert_eq!(report(JobState::Downloading, 11).unwrap(), Applied::NoOp);

    // Skipping installing is an invalid transition
    assert_eq!(report(JobState::Succeeded, 12).unwrap_err().kind(), "conflict");

    assert_eq!(report(JobState::Installing, 20).unwrap(), Applied::Transitioned);
    assert_eq!(report(JobState::Succeeded, 30).unwrap(), Applied::Transitioned);

    // Failure after success is a conflict
    assert_eq!(report(JobState::Failed, 40).unwrap_err().kind(), "conflict");
    assert_eq!(f.orchestrator.get(&job_id).unwrap().state, JobState::Succeeded);
}

#[tokio::test]
async fn test_progress_report_from_wrong_device_is_not_found() {
    let f = fixture();
    let t0 = base_time();
    let owner = register_reachable(&f, "tablet-a", t0);
    let other = register_reachable(&f, "tablet-b", t0);

    let jobs = f
        .orchestrator
        .deploy("art-1", &[owner.id.clone()], t0)
        .await
        .unwrap();

    let err = f
        .orchestrator
        .report_progress(&jobs[0].job_id, &other.id, JobState::Downloading, None, t0)
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");
}

#[tokio::test]
async fn test_device_reported_failure_records_message() {
    let f = fixture();
    let t0 = base_time();
    let device = register_reachable(&f, "tablet-a", t0);

    let jobs = f
        .orchestrator
        .deploy("art-1", &[device.id.clone()], t0)
        .await
        .unwrap();

    f.orchestrator
        .report_progress(
            &jobs[0].job_id,
            &device.id,
            JobState::Failed,
            Some("no space left on device".to_string()),
            t0 + Duration::seconds(30),
        )
        .unwrap();

    let job = f.orchestrator.get(&jobs[0].job_id).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failure_reason, Some(FailureReason::DeviceReported));
    assert_eq!(job.error_message.as_deref(), Some("no space left on device"));
}

#[tokio::test]
async fn test_installations_projection_filters() {
    let f = fixture();
    let t0 = base_time();
    let a = register_reachable(&f, "tablet-a", t0);
    let b = register_reachable(&f, "tablet-b", t0);

    f.orchestrator
        .deploy("art-1", &[a.id.clone(), b.id.clone()], t0)
        .await
        .unwrap();
    let second = f
        .orchestrator
        .deploy("art-2", &[a.id.clone()], t0 + Duration::minutes(1))
        .await
        .unwrap();

    let all = f.orchestrator.installations(&InstallationFilter::default());
    assert_eq!(all.len(), 3);
    // Newest deployment first
    assert_eq!(all[0].job_id, second[0].job_id);

    let for_a = f.orchestrator.installations(&InstallationFilter {
        device_id: Some(a.id.clone()),
        ..Default::default()
    });
    assert_eq!(for_a.len(), 2);

    let superseded = f.orchestrator.installations(&InstallationFilter {
        status: Some(JobState::Superseded),
        ..Default::default()
    });
    assert_eq!(superseded.len(), 1);
    assert_eq!(superseded[0].device_id, a.id);

    let limited = f.orchestrator.installations(&InstallationFilter {
        limit: Some(1),
        ..Default::default()
    });
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_watchdog_times_out_stuck_jobs() {
    let f = fixture();
    let t0 = base_time();
    let device = register_reachable(&f, "tablet-a", t0);

    // Keep the device online so only the stage timeout can fire
    f.registry
        .record_heartbeat(&device.token, HeartbeatMetrics::default(), t0)
        .unwrap();

    let jobs = f
        .orchestrator
        .deploy("art-1", &[device.id.clone()], t0)
        .await
        .unwrap();
    f.orchestrator
        .report_progress(
            &jobs[0].job_id,
            &device.id,
            JobState::Downloading,
            None,
            t0 + Duration::minutes(1),
        )
        .unwrap();

    // Within the 30 minute downloading window nothing expires
    assert_eq!(f.orchestrator.expire_stale(t0 + Duration::minutes(20)), 0);

    // Past the window the watchdog fails the job with a timeout
    assert_eq!(f.orchestrator.expire_stale(t0 + Duration::minutes(45)), 1);
    let job = f.orchestrator.get(&jobs[0].job_id).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.failure_reason, Some(FailureReason::Timeout));

    // Late reports after the timeout are swallowed
    let applied = f
        .orchestrator
        .report_progress(
            &jobs[0].job_id,
            &device.id,
            JobState::Installing,
            None,
            t0 + Duration::minutes(50),
        )
        .unwrap();
    assert_eq!(applied, fleetd::deploy::job::Applied::NoOp);
}

#[tokio::test]
async fn test_watchdog_fails_queued_job_for_offline_device() {
    let f = fixture();
    let t0 = base_time();
    let device = register_reachable(&f, "tablet-a", t0);

    // The device never heartbeats, so it derives offline
    let jobs = f
        .orchestrator
        .deploy("art-1", &[device.id.clone()], t0)
        .await
        .unwrap();
    assert_eq!(jobs[0].state, JobState::Notified);

    // Offline grace is 5 minutes, well under the 10 minute stage limit
    assert_eq!(f.orchestrator.expire_stale(t0 + Duration::minutes(6)), 1);
    let job = f.orchestrator.get(&jobs[0].job_id).unwrap();
    assert_eq!(job.failure_reason, Some(FailureReason::Timeout));
}
