use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::device::{CliRunner, DeviceCommandExecutor, DeviceRunner, MockDevice};
use crate::errors::AppError;
use crate::health::HealthReporter;
use crate::image_processing::ArtifactScaler;
use crate::print_job::{PhaseBudgets, PrintJobOrchestrator};
use crate::status::{DeviceHandle, DeviceStatusProbe};
use crate::templates::{TemplateRenderer, TemplateStore, WkHtmlRasterizer};

/// Centralized application state container
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub templates: TemplateStore,
    pub orchestrator: Arc<PrintJobOrchestrator>,
    pub health: HealthReporter,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, AppError> {
        info!("Initializing application state");

        let templates = Self::initialize_templates(&config)?;
        let device = DeviceHandle::new(DeviceStatusProbe::new(Self::initialize_executor(&config)));

        let rasterizer = Arc::new(WkHtmlRasterizer::new(
            config.template.rasterizer_binary.clone(),
            config.storage.work_dir.clone(),
        ));
        let orchestrator = PrintJobOrchestrator::new(
            TemplateRenderer::new(templates.clone(), rasterizer),
            device.clone(),
            ArtifactScaler::default(),
            PhaseBudgets::from(&config.retry),
            config.storage.work_dir.clone(),
            config.device.image_flag.clone(),
        );

        Ok(Self {
            templates,
            orchestrator: Arc::new(orchestrator),
            health: HealthReporter::new(device),
            config,
        })
    }

    fn initialize_templates(config: &Config) -> Result<TemplateStore, AppError> {
        std::fs::create_dir_all(&config.template.dir).map_err(|e| {
            AppError::Initialization(format!(
                "Failed to create template directory {:?}: {}",
                config.template.dir, e
            ))
        })?;
        info!("Templates are saved in: {:?}", config.template.dir);
        Ok(TemplateStore::new(config.template.dir.clone()))
    }

    fn initialize_executor(config: &Config) -> DeviceCommandExecutor {
        let runner: Arc<dyn DeviceRunner> = if config.device.use_mock {
            warn!(
                "Using mock device reporting {}px; nothing will be printed",
                config.device.mock_width
            );
            Arc::new(MockDevice::new(
                config.device.mock_width,
                config.device.image_flag.clone(),
            ))
        } else {
            info!("Driving device through '{}'", config.device.binary);
            Arc::new(CliRunner::new(config.device.binary.clone()))
        };

        DeviceCommandExecutor::new(
            runner,
            config.device.status_args.clone(),
            config.retry.command_attempts,
            config.retry.delay,
        )
    }
}
