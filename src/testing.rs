// Fakes for the device CLI and the HTML rasterizer used across unit tests

use async_trait::async_trait;
use image::DynamicImage;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::RetryConfig;
use crate::device::{CommandOutcome, DeviceCommandExecutor, DeviceRunner};
use crate::errors::{DeviceError, RenderError};
use crate::image_processing::ArtifactScaler;
use crate::print_job::{PhaseBudgets, PrintJobOrchestrator};
use crate::status::{DeviceHandle, DeviceStatusProbe};
use crate::templates::{Rasterizer, TemplateRenderer, TemplateStore};

#[derive(Debug, Clone)]
pub enum Step {
    Output(CommandOutcome),
    SpawnFailure,
}

/// Replays a fixed script of device answers; the last step repeats forever.
pub struct ScriptedRunner {
    steps: Vec<Step>,
    calls: Mutex<Vec<Vec<String>>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new(outcomes: Vec<CommandOutcome>) -> Self {
        Self::with_steps(outcomes.into_iter().map(Step::Output).collect())
    }

    pub fn with_steps(steps: Vec<Step>) -> Self {
        assert!(!steps.is_empty(), "script needs at least one step");
        ScriptedRunner {
            steps,
            calls: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn always(outcome: CommandOutcome) -> Self {
        Self::new(vec![outcome])
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceRunner for ScriptedRunner {
    async fn run(&self, args: &[String]) -> Result<CommandOutcome, DeviceError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let step = {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len().min(self.steps.len() - 1);
            calls.push(args.to_vec());
            self.steps[index].clone()
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match step {
            Step::Output(outcome) => Ok(outcome),
            Step::SpawnFailure => Err(DeviceError::Spawn {
                program: "ptouch-print".to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
            }),
        }
    }

    fn type_name(&self) -> &'static str {
        "Scripted Device"
    }
}

/// Produces a blank image of fixed size and remembers the HTML it was given.
pub struct FixedRasterizer {
    width: u32,
    height: u32,
    pages: Mutex<Vec<String>>,
}

impl FixedRasterizer {
    pub fn new(width: u32, height: u32) -> Self {
        FixedRasterizer {
            width,
            height,
            pages: Mutex::new(Vec::new()),
        }
    }

    pub fn pages(&self) -> Vec<String> {
        self.pages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Rasterizer for FixedRasterizer {
    async fn rasterize(&self, html: &str) -> Result<DynamicImage, RenderError> {
        self.pages.lock().unwrap().push(html.to_string());
        Ok(DynamicImage::new_rgb8(self.width, self.height))
    }
}

/// Orchestrator over the scripted device with zero retry delays and a
/// 300x100 rasterizer.
pub fn orchestrator_for(
    runner: Arc<ScriptedRunner>,
    template_dir: &Path,
    work_dir: &Path,
) -> PrintJobOrchestrator {
    let retry = RetryConfig {
        delay: Duration::ZERO,
        ..RetryConfig::default()
    };
    let executor = DeviceCommandExecutor::new(
        runner,
        vec!["--info".to_string()],
        retry.command_attempts,
        retry.delay,
    );
    let renderer = TemplateRenderer::new(
        TemplateStore::new(template_dir),
        Arc::new(FixedRasterizer::new(300, 100)),
    );

    PrintJobOrchestrator::new(
        renderer,
        DeviceHandle::new(DeviceStatusProbe::new(executor)),
        ArtifactScaler::default(),
        PhaseBudgets::from(&retry),
        work_dir,
        "--image",
    )
}
