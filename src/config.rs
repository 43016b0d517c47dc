use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub use crate::errors::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub device: DeviceConfig,
    pub template: TemplateConfig,
    pub storage: StorageConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Path segment accepted by `POST /print/{family}/`.
    pub family: String,
    pub binary: String,
    pub status_args: Vec<String>,
    pub image_flag: String,
    pub use_mock: bool,
    pub mock_width: u32,
}

#[derive(Debug, Clone)]
pub struct TemplateConfig {
    pub dir: PathBuf,
    pub rasterizer_binary: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub command_attempts: u32,
    pub probe_attempts: u32,
    pub print_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            command_attempts: 50,
            probe_attempts: 10,
            print_attempts: 10,
            delay: Duration::from_millis(500),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup. `from_env`
    /// is this over the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let server = ServerConfig {
            host: var("HOST", "0.0.0.0"),
            port: var("PORT", "8000")
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
        };

        let device = DeviceConfig {
            family: var("DEVICE_FAMILY", "ptouch"),
            binary: var("DEVICE_BINARY", "ptouch-print"),
            status_args: var("DEVICE_STATUS_ARGS", "--info")
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            image_flag: var("DEVICE_IMAGE_FLAG", "--image"),
            use_mock: parse_bool(&var("USE_MOCK_DEVICE", "false")),
            mock_width: parse_number(&lookup, "MOCK_DEVICE_WIDTH", 128)?,
        };

        let template_dir = match lookup("TEMPLATE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = lookup("HOME").unwrap_or_else(|| ".".to_string());
                PathBuf::from(home).join(".questhost").join("templates")
            }
        };
        let template = TemplateConfig {
            dir: template_dir,
            rasterizer_binary: var("RASTERIZER_BINARY", "wkhtmltoimage"),
        };

        let storage = StorageConfig {
            work_dir: lookup("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| std::env::temp_dir().join("questhost")),
        };

        let defaults = RetryConfig::default();
        let retry = RetryConfig {
            command_attempts: parse_number(
                &lookup,
                "COMMAND_RETRY_ATTEMPTS",
                defaults.command_attempts,
            )?,
            probe_attempts: parse_number(&lookup, "PROBE_RETRY_ATTEMPTS", defaults.probe_attempts)?,
            print_attempts: parse_number(&lookup, "PRINT_RETRY_ATTEMPTS", defaults.print_attempts)?,
            delay: Duration::from_millis(parse_number(&lookup, "RETRY_DELAY_MS", 500u64)?),
        };

        let config = Config {
            server,
            device,
            template,
            storage,
            retry,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        let attempts = [
            ("COMMAND_RETRY_ATTEMPTS", self.retry.command_attempts),
            ("PROBE_RETRY_ATTEMPTS", self.retry.probe_attempts),
            ("PRINT_RETRY_ATTEMPTS", self.retry.print_attempts),
        ];
        for (var, value) in attempts {
            if value == 0 {
                return Err(ConfigError::ZeroAttempts { var });
            }
        }

        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        addr.parse().map_err(|_| ConfigError::InvalidValue {
            var: "HOST",
            value: addr,
        })
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn parse_number<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        None => Ok(default),
    }
}
