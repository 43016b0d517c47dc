// Device CLI invocation: one child process per attempt, retried while the
// device reports a transient timeout.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::DeviceError;

/// Text captured from one device CLI run, trailing newlines stripped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub stdout: String,
    pub stderr: String,
    pub is_timeout: bool,
}

impl CommandOutcome {
    pub fn new(stdout: &str, stderr: &str) -> Self {
        let stdout = strip_trailing_newlines(stdout).to_string();
        let stderr = strip_trailing_newlines(stderr).to_string();
        let is_timeout = reports_timeout(&stdout) || reports_timeout(&stderr);
        CommandOutcome {
            stdout,
            stderr,
            is_timeout,
        }
    }
}

fn strip_trailing_newlines(text: &str) -> &str {
    text.trim_end_matches(['\n', '\r'])
}

fn reports_timeout(text: &str) -> bool {
    text.to_ascii_lowercase().contains("timeout")
}

// Runs the device CLI once
#[async_trait]
pub trait DeviceRunner: Send + Sync {
    async fn run(&self, args: &[String]) -> Result<CommandOutcome, DeviceError>;
    fn type_name(&self) -> &'static str;
}

/// Spawns the configured device program directly, without a shell. The
/// exit status is ignored; only the captured text matters.
pub struct CliRunner {
    program: String,
}

impl CliRunner {
    pub fn new(program: impl Into<String>) -> Self {
        CliRunner {
            program: program.into(),
        }
    }
}

#[async_trait]
impl DeviceRunner for CliRunner {
    async fn run(&self, args: &[String]) -> Result<CommandOutcome, DeviceError> {
        debug!("Running {} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|source| DeviceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        Ok(CommandOutcome::new(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        ))
    }

    fn type_name(&self) -> &'static str {
        "Device CLI"
    }
}

// Simulated label printer for running without hardware
pub struct MockDevice {
    width_px: u32,
    image_flag: String,
}

impl MockDevice {
    pub fn new(width_px: u32, image_flag: impl Into<String>) -> Self {
        MockDevice {
            width_px,
            image_flag: image_flag.into(),
        }
    }
}

#[async_trait]
impl DeviceRunner for MockDevice {
    async fn run(&self, args: &[String]) -> Result<CommandOutcome, DeviceError> {
        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome = match args.iter().position(|arg| *arg == self.image_flag) {
            Some(index) => {
                let path = args.get(index + 1).map(String::as_str).unwrap_or("");
                CommandOutcome::new(&format!("printing image {}\n", path), "")
            }
            None => CommandOutcome::new(
                &format!(
                    "PT-P700 found on USB bus 1, device 4\nmaximum printing width for this tape is {}px\n",
                    self.width_px
                ),
                "",
            ),
        };
        Ok(outcome)
    }

    fn type_name(&self) -> &'static str {
        "Mock Device"
    }
}

/// Executes device CLI commands with the soft-timeout retry policy.
pub struct DeviceCommandExecutor {
    runner: Arc<dyn DeviceRunner>,
    status_args: Vec<String>,
    max_attempts: u32,
    delay: Duration,
}

impl DeviceCommandExecutor {
    pub fn new(
        runner: Arc<dyn DeviceRunner>,
        status_args: Vec<String>,
        max_attempts: u32,
        delay: Duration,
    ) -> Self {
        DeviceCommandExecutor {
            runner,
            status_args,
            max_attempts,
            delay,
        }
    }

    pub fn runner_name(&self) -> &'static str {
        self.runner.type_name()
    }

    /// Runs the device CLI with `args`, or with the status query when
    /// `args` is empty.
    ///
    /// An attempt whose stdout or stderr mentions "timeout" (any case) is
    /// repeated after the configured delay. Any other output, including a
    /// non-empty stderr, is returned to the caller untouched. Fails with
    /// `DeviceError::Unresponsive` once every attempt reported a timeout.
    pub async fn execute(&self, args: &[String]) -> Result<CommandOutcome, DeviceError> {
        let args = if args.is_empty() {
            self.status_args.as_slice()
        } else {
            args
        };

        for attempt in 1..=self.max_attempts {
            let outcome = self.runner.run(args).await?;
            if !outcome.is_timeout {
                return Ok(outcome);
            }

            warn!(
                "Device reported timeout (attempt {}/{})",
                attempt, self.max_attempts
            );
            info!("\t* stdout: {}", outcome.stdout);
            info!("\t* stderr: {}", outcome.stderr);

            tokio::time::sleep(self.delay).await;
        }

        Err(DeviceError::Unresponsive {
            attempts: self.max_attempts,
        })
    }
}
