// Print job orchestration: render, then probe -> scale -> print -> clean up
// while holding the device.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::errors::{DeviceError, PrintJobError};
use crate::image_processing::{ArtifactScaler, RenderedArtifact};
use crate::status::{DeviceHandle, DeviceStatus, DeviceStatusProbe};
use crate::templates::{PrintRequest, TemplateRenderer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Rendering,
    ProbingWidth,
    Scaling,
    Printing,
    CleaningUp,
    Done,
    Failed(String),
}

/// Attempt budgets of the device phases. Each phase has its own.
#[derive(Debug, Clone, Copy)]
pub struct PhaseBudgets {
    pub probe_attempts: u32,
    pub print_attempts: u32,
    pub delay: Duration,
}

impl From<&RetryConfig> for PhaseBudgets {
    fn from(retry: &RetryConfig) -> Self {
        PhaseBudgets {
            probe_attempts: retry.probe_attempts,
            print_attempts: retry.print_attempts,
            delay: retry.delay,
        }
    }
}

/// State of one print request. Lives only as long as the request.
#[derive(Debug)]
pub struct PrintJob {
    pub id: Uuid,
    started_at: DateTime<Utc>,
    state: JobState,
    history: Vec<JobState>,
    probe_attempts_remaining: u32,
    print_attempts_remaining: u32,
    probed_width: Option<u32>,
    artifact: Option<RenderedArtifact>,
    scaled_artifact: Option<RenderedArtifact>,
    scaled_path: Option<PathBuf>,
}

impl PrintJob {
    pub fn new(budgets: &PhaseBudgets) -> Self {
        PrintJob {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            state: JobState::Rendering,
            history: vec![JobState::Rendering],
            probe_attempts_remaining: budgets.probe_attempts,
            print_attempts_remaining: budgets.print_attempts,
            probed_width: None,
            artifact: None,
            scaled_artifact: None,
            scaled_path: None,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// Every state the job has been in, oldest first.
    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    pub fn probed_width(&self) -> Option<u32> {
        self.probed_width
    }

    pub fn scaled_artifact(&self) -> Option<&RenderedArtifact> {
        self.scaled_artifact.as_ref()
    }

    fn transition(&mut self, next: JobState) {
        debug!("Job {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next.clone();
        self.history.push(next);
    }
}

pub struct PrintJobOrchestrator {
    renderer: TemplateRenderer,
    device: DeviceHandle,
    scaler: ArtifactScaler,
    budgets: PhaseBudgets,
    work_dir: PathBuf,
    image_flag: String,
}

impl PrintJobOrchestrator {
    pub fn new(
        renderer: TemplateRenderer,
        device: DeviceHandle,
        scaler: ArtifactScaler,
        budgets: PhaseBudgets,
        work_dir: impl Into<PathBuf>,
        image_flag: impl Into<String>,
    ) -> Self {
        PrintJobOrchestrator {
            renderer,
            device,
            scaler,
            budgets,
            work_dir: work_dir.into(),
            image_flag: image_flag.into(),
        }
    }

    pub fn new_job(&self) -> PrintJob {
        PrintJob::new(&self.budgets)
    }

    /// Renders and prints `request`. `Ok(true)` once the ticket went to the
    /// printer; every failure ends the job with the matching error.
    pub async fn print(&self, request: PrintRequest) -> Result<bool, PrintJobError> {
        let mut job = self.new_job();
        self.run(&mut job, &request).await
    }

    /// Runs `request` on its own task and waits for the outcome. Once
    /// started, the job owns the device until it reaches a terminal state,
    /// whether or not the caller is still waiting.
    pub async fn submit(self: Arc<Self>, request: PrintRequest) -> Result<bool, PrintJobError> {
        let job = tokio::spawn(async move { self.print(request).await });
        job.await.map_err(|e| {
            error!("Print job task did not complete: {}", e);
            PrintJobError::Aborted(e.to_string())
        })?
    }

    #[instrument(skip(self, job, request), fields(job_id = %job.id, template = %request.template_name))]
    pub async fn run(&self, job: &mut PrintJob, request: &PrintRequest) -> Result<bool, PrintJobError> {
        info!("Print job started");

        let result = self.drive(job, request).await;

        let elapsed = Utc::now().signed_duration_since(job.started_at);
        match &result {
            Ok(_) => {
                job.transition(JobState::Done);
                info!("Print job finished in {} ms", elapsed.num_milliseconds());
            }
            Err(e) => {
                job.transition(JobState::Failed(e.to_string()));
                warn!(
                    "Print job failed after {} ms: {}",
                    elapsed.num_milliseconds(),
                    e
                );
            }
        }
        result
    }

    async fn drive(&self, job: &mut PrintJob, request: &PrintRequest) -> Result<bool, PrintJobError> {
        // Rendering touches no device state and runs outside the lock
        let artifact = self.renderer.render(request).await?;
        job.artifact = Some(artifact);

        let device = self.device.acquire().await;
        debug!("Acquired device ({})", device.executor().runner_name());

        let printed = self.run_device_phases(job, &device).await;
        self.clean_up(job).await;

        drop(device);
        printed
    }

    async fn run_device_phases(
        &self,
        job: &mut PrintJob,
        device: &DeviceStatusProbe,
    ) -> Result<bool, PrintJobError> {
        job.transition(JobState::ProbingWidth);
        let width = self.probe_width(job, device).await?;

        job.transition(JobState::Scaling);
        let artifact = job
            .artifact
            .as_ref()
            .ok_or_else(|| PrintJobError::ScaleFailed("no rendered artifact".to_string()))?;
        let scaled = self.scaler.scale(artifact, job.probed_width)?;
        info!(
            "Scaled ticket from {}x{} to {}x{} for {}px tape",
            artifact.width(),
            artifact.height(),
            scaled.width(),
            scaled.height(),
            width
        );
        let path = self.store_scaled(job, &scaled).await?;
        job.scaled_artifact = Some(scaled);

        job.transition(JobState::Printing);
        self.print_artifact(job, device, &path).await?;

        Ok(true)
    }

    async fn probe_width(
        &self,
        job: &mut PrintJob,
        device: &DeviceStatusProbe,
    ) -> Result<u32, PrintJobError> {
        let budget = self.budgets.probe_attempts;
        job.probe_attempts_remaining = budget;

        while job.probe_attempts_remaining > 0 {
            job.probe_attempts_remaining -= 1;
            let attempt = budget - job.probe_attempts_remaining;

            match device.probe().await {
                Ok(DeviceStatus {
                    max_print_width_px: Some(width),
                    ..
                }) => {
                    info!("Max width: {}", width);
                    job.probed_width = Some(width);
                    return Ok(width);
                }
                Ok(status) => warn!(
                    "No width (attempt {}/{}). STDOUT: {}, STDERR: {}",
                    attempt, budget, status.stdout, status.stderr
                ),
                Err(DeviceError::Unresponsive { attempts }) => {
                    return Err(PrintJobError::DeviceUnresponsive { attempts })
                }
                Err(e) => warn!("Status query failed (attempt {}/{}): {}", attempt, budget, e),
            }

            if job.probe_attempts_remaining > 0 {
                tokio::time::sleep(self.budgets.delay).await;
            }
        }

        Err(PrintJobError::WidthProbeFailed { attempts: budget })
    }

    async fn store_scaled(
        &self,
        job: &mut PrintJob,
        scaled: &RenderedArtifact,
    ) -> Result<PathBuf, PrintJobError> {
        let store_failed =
            |e: std::io::Error| PrintJobError::ScaleFailed(format!("cannot store scaled image: {}", e));

        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(store_failed)?;
        let path = self.work_dir.join(format!("ticket-{}.png", job.id));
        // Recorded before writing so a partial file is still cleaned up
        job.scaled_path = Some(path.clone());
        tokio::fs::write(&path, scaled.png_bytes())
            .await
            .map_err(store_failed)?;

        info!("Generated ticket to be printed: {:?}", path);
        Ok(path)
    }

    async fn print_artifact(
        &self,
        job: &mut PrintJob,
        device: &DeviceStatusProbe,
        path: &Path,
    ) -> Result<(), PrintJobError> {
        let args = vec![self.image_flag.clone(), path.to_string_lossy().into_owned()];
        let budget = self.budgets.print_attempts;
        job.print_attempts_remaining = budget;
        let mut last_error = String::new();

        while job.print_attempts_remaining > 0 {
            job.print_attempts_remaining -= 1;
            let attempt = budget - job.print_attempts_remaining;

            match device.executor().execute(&args).await {
                Ok(outcome) => {
                    info!("Print command accepted (attempt {}/{})", attempt, budget);
                    if !outcome.stdout.is_empty() {
                        info!("\t* stdout: {}", outcome.stdout);
                    }
                    if !outcome.stderr.is_empty() {
                        info!("\t* stderr: {}", outcome.stderr);
                    }
                    return Ok(());
                }
                Err(DeviceError::Unresponsive { attempts }) => {
                    return Err(PrintJobError::DeviceUnresponsive { attempts })
                }
                Err(e) => {
                    warn!("Print command failed (attempt {}/{}): {}", attempt, budget, e);
                    last_error = e.to_string();
                }
            }

            if job.print_attempts_remaining > 0 {
                tokio::time::sleep(self.budgets.delay).await;
            }
        }

        Err(PrintJobError::PrintFailed {
            attempts: budget,
            reason: last_error,
        })
    }

    /// Best effort: a failed delete is logged and never changes the outcome.
    async fn clean_up(&self, job: &mut PrintJob) {
        if let Some(path) = job.scaled_path.take() {
            job.transition(JobState::CleaningUp);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed {:?}", path),
                Err(e) => warn!("Failed to remove temporary ticket {:?}: {}", path, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CommandOutcome;
    use crate::testing::{orchestrator_for, ScriptedRunner, Step};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _templates: TempDir,
        work: TempDir,
        runner: Arc<ScriptedRunner>,
        orchestrator: PrintJobOrchestrator,
    }

    fn fixture(runner: ScriptedRunner) -> Fixture {
        let templates = tempfile::tempdir().unwrap();
        std::fs::write(templates.path().join("ticket"), "<h1>{{ name }}</h1>").unwrap();
        let work = tempfile::tempdir().unwrap();
        let runner = Arc::new(runner);
        let orchestrator = orchestrator_for(runner.clone(), templates.path(), work.path());
        Fixture {
            _templates: templates,
            work,
            runner,
            orchestrator,
        }
    }

    fn ticket(data: serde_json::Value) -> PrintRequest {
        PrintRequest::new("ticket", data.as_object().cloned().unwrap())
    }

    fn status(stdout: &str) -> CommandOutcome {
        CommandOutcome::new(stdout, "")
    }

    fn is_status_call(call: &[String]) -> bool {
        call.len() == 1 && call[0] == "--info"
    }

    fn work_dir_is_empty(fixture: &Fixture) -> bool {
        std::fs::read_dir(fixture.work.path()).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_happy_path_walks_every_phase() {
        let f = fixture(ScriptedRunner::new(vec![
            status("maximum printing width for this tape is 48px"),
            status("printed"),
        ]));
        let mut job = f.orchestrator.new_job();
        let result = f
            .orchestrator
            .run(&mut job, &ticket(json!({"id": "abc123", "name": "Alice"})))
            .await;

        assert!(result.unwrap());
        assert_eq!(
            job.history(),
            &[
                JobState::Rendering,
                JobState::ProbingWidth,
                JobState::Scaling,
                JobState::Printing,
                JobState::CleaningUp,
                JobState::Done,
            ]
        );
        assert_eq!(job.probed_width(), Some(48));
        let scaled = job.scaled_artifact().unwrap();
        assert_eq!((scaled.width(), scaled.height()), (144, 48));

        let calls = f.runner.calls();
        assert_eq!(calls.len(), 2);
        assert!(is_status_call(&calls[0]));
        assert_eq!(calls[1][0], "--image");
        assert!(calls[1][1].ends_with(&format!("ticket-{}.png", job.id)));
        assert!(work_dir_is_empty(&f));
    }

    #[tokio::test]
    async fn test_probe_retries_until_width_appears() {
        let f = fixture(ScriptedRunner::new(vec![
            status("printer warming up"),
            status("no tape"),
            status("128px"),
            status("printed"),
        ]));
        let result = f.orchestrator.print(ticket(json!({"id": "abc123"}))).await;

        assert!(result.unwrap());
        assert_eq!(f.runner.call_count(), 4);
    }

    #[tokio::test]
    async fn test_probe_budget_exhausted() {
        let f = fixture(ScriptedRunner::always(status("no tape installed")));
        let mut job = f.orchestrator.new_job();
        let result = f
            .orchestrator
            .run(&mut job, &ticket(json!({"id": "abc123"})))
            .await;

        assert!(matches!(
            result,
            Err(PrintJobError::WidthProbeFailed { attempts: 10 })
        ));
        assert_eq!(f.runner.call_count(), 10);
        assert!(f.runner.calls().iter().all(|call| is_status_call(call)));
        assert!(!job.history().contains(&JobState::Printing));
        assert!(matches!(job.state(), JobState::Failed(_)));
    }

    #[tokio::test]
    async fn test_print_timeouts_report_unresponsive_device() {
        let f = fixture(ScriptedRunner::new(vec![
            status("48px"),
            CommandOutcome::new("", "libusb: TIMEOUT"),
        ]));
        let result = f.orchestrator.print(ticket(json!({"id": "abc123"}))).await;

        assert!(matches!(
            result,
            Err(PrintJobError::DeviceUnresponsive { attempts: 50 })
        ));
        // one probe plus exactly one executor budget of print attempts
        assert_eq!(f.runner.call_count(), 51);
        assert!(work_dir_is_empty(&f));
    }

    #[tokio::test]
    async fn test_print_retries_launch_failures() {
        let f = fixture(ScriptedRunner::with_steps(vec![
            Step::Output(status("48px")),
            Step::SpawnFailure,
            Step::Output(status("printed")),
        ]));
        let result = f.orchestrator.print(ticket(json!({"id": "abc123"}))).await;

        assert!(result.unwrap());
        assert_eq!(f.runner.call_count(), 3);
    }

    #[tokio::test]
    async fn test_print_budget_exhausted() {
        let f = fixture(ScriptedRunner::with_steps(vec![
            Step::Output(status("48px")),
            Step::SpawnFailure,
        ]));
        let result = f.orchestrator.print(ticket(json!({"id": "abc123"}))).await;

        match result {
            Err(PrintJobError::PrintFailed { attempts, reason }) => {
                assert_eq!(attempts, 10);
                assert!(reason.contains("ptouch-print"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(f.runner.call_count(), 11);
        assert!(work_dir_is_empty(&f));
    }

    #[tokio::test]
    async fn test_request_errors_never_touch_device() {
        let f = fixture(ScriptedRunner::always(status("48px")));

        let missing_id = f.orchestrator.print(ticket(json!({"name": "Alice"}))).await;
        assert!(matches!(
            missing_id,
            Err(PrintJobError::MissingField { field }) if field == "id"
        ));

        let unknown = PrintRequest::new("nope", json!({"id": "x"}).as_object().cloned().unwrap());
        let missing_template = f.orchestrator.print(unknown).await;
        assert!(matches!(
            missing_template,
            Err(PrintJobError::TemplateNotFound { name }) if name == "nope"
        ));

        assert_eq!(f.runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_probe_unresponsive_is_fatal() {
        let f = fixture(ScriptedRunner::always(CommandOutcome::new("timeout", "")));
        let result = f.orchestrator.print(ticket(json!({"id": "abc123"}))).await;

        assert!(matches!(
            result,
            Err(PrintJobError::DeviceUnresponsive { .. })
        ));
        assert_eq!(f.runner.call_count(), 50);
    }

    #[tokio::test]
    async fn test_every_job_probes_afresh() {
        let f = fixture(ScriptedRunner::always(status("64px")));
        for _ in 0..2 {
            assert!(f
                .orchestrator
                .print(ticket(json!({"id": "abc123"})))
                .await
                .unwrap());
        }

        let calls = f.runner.calls();
        assert_eq!(calls.len(), 4);
        assert!(is_status_call(&calls[0]));
        assert!(!is_status_call(&calls[1]));
        assert!(is_status_call(&calls[2]));
        assert!(!is_status_call(&calls[3]));
    }

    #[tokio::test]
    async fn test_abandoned_job_keeps_device_until_cleaned_up() {
        let f = fixture(
            ScriptedRunner::always(status("64px")).with_latency(Duration::from_millis(200)),
        );
        let orchestrator = Arc::new(f.orchestrator);

        // Caller gives up while the print command is running
        let first = tokio::time::timeout(
            Duration::from_millis(300),
            orchestrator.clone().submit(ticket(json!({"id": "first"}))),
        )
        .await;
        assert!(first.is_err());

        let second = orchestrator
            .clone()
            .submit(ticket(json!({"id": "second"})))
            .await;

        assert!(second.unwrap());
        assert_eq!(f.runner.call_count(), 4);
        assert_eq!(f.runner.max_in_flight(), 1);
        assert!(std::fs::read_dir(f.work.path()).unwrap().next().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_jobs_never_overlap_on_device() {
        let f = fixture(
            ScriptedRunner::always(status("64px")).with_latency(Duration::from_millis(20)),
        );
        let orchestrator = Arc::new(f.orchestrator);

        let jobs: Vec<_> = (0..4)
            .map(|i| {
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    orchestrator
                        .print(ticket(json!({"id": format!("job-{i}")})))
                        .await
                })
            })
            .collect();

        for job in jobs {
            assert!(job.await.unwrap().unwrap());
        }
        assert_eq!(f.runner.call_count(), 8);
        assert_eq!(f.runner.max_in_flight(), 1);
    }
}
