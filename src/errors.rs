use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("{0}")]
    Print(#[from] PrintJobError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown device family: {family}")]
    UnknownDeviceFamily { family: String },

    #[error("Bad request: {0}")]
    BadRequest(String),
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device did not respond after {attempts} attempts")]
    Unresponsive { attempts: u32 },

    #[error("Failed to launch device command `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Template not found: {name}")]
    TemplateNotFound { name: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("QR code generation failed: {0}")]
    Qr(String),

    #[error("Rasterizer failed: {0}")]
    Rasterize(String),

    #[error("Render I/O error: {0}")]
    IoError(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("No device width available to scale against")]
    WidthUnavailable,

    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Terminal failures of a print job; see `AppError::status_code` for how
/// each one is reported.
#[derive(Debug, Error)]
pub enum PrintJobError {
    #[error("Template not found: {name}")]
    TemplateNotFound { name: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Unable to render ticket: {0}")]
    Render(RenderError),

    #[error("Device unresponsive: no answer without timeout after {attempts} attempts")]
    DeviceUnresponsive { attempts: u32 },

    #[error("Width probe failed: no print width reported after {attempts} attempts")]
    WidthProbeFailed { attempts: u32 },

    #[error("Cannot scale image: {0}")]
    ScaleFailed(String),

    #[error("Cannot print image after {attempts} attempts: {reason}")]
    PrintFailed { attempts: u32, reason: String },

    #[error("Print job aborted: {0}")]
    Aborted(String),
}

impl From<RenderError> for PrintJobError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::TemplateNotFound { name } => PrintJobError::TemplateNotFound { name },
            RenderError::MissingField { field } => PrintJobError::MissingField { field },
            other => PrintJobError::Render(other),
        }
    }
}

impl From<ScaleError> for PrintJobError {
    fn from(err: ScaleError) -> Self {
        PrintJobError::ScaleFailed(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid file name: {0:?}")]
    InvalidFilename(String),

    #[error("Upload is missing a file name")]
    MissingFilename,

    #[error("Storage I/O error: {0}")]
    IoError(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("{var} must be at least 1")]
    ZeroAttempts { var: &'static str },
}

impl AppError {
    pub fn error_body(&self) -> serde_json::Value {
        serde_json::json!({
            "ok": false,
            "error": self.to_string(),
            "error_type": self.error_type()
        })
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::Initialization(_) => "initialization_error",
            AppError::Print(err) => match err {
                PrintJobError::TemplateNotFound { .. } => "template_not_found",
                PrintJobError::MissingField { .. } => "missing_field",
                PrintJobError::Render(_) => "render_error",
                PrintJobError::DeviceUnresponsive { .. } => "device_unresponsive",
                PrintJobError::WidthProbeFailed { .. } => "width_probe_failed",
                PrintJobError::ScaleFailed(_) => "scale_failed",
                PrintJobError::PrintFailed { .. } => "print_failed",
                PrintJobError::Aborted(_) => "job_aborted",
            },
            AppError::Storage(_) => "storage_error",
            AppError::Config(_) => "config_error",
            AppError::UnknownDeviceFamily { .. } => "unknown_device_family",
            AppError::BadRequest(_) => "bad_request",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Print(PrintJobError::TemplateNotFound { .. })
            | AppError::Print(PrintJobError::MissingField { .. }) => StatusCode::BAD_REQUEST,
            AppError::Print(PrintJobError::Render(_))
            | AppError::Print(PrintJobError::DeviceUnresponsive { .. })
            | AppError::Print(PrintJobError::WidthProbeFailed { .. })
            | AppError::Print(PrintJobError::ScaleFailed(_))
            | AppError::Print(PrintJobError::PrintFailed { .. })
            | AppError::Print(PrintJobError::Aborted(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Storage(StorageError::InvalidFilename(_))
            | AppError::Storage(StorageError::MissingFilename) => StatusCode::BAD_REQUEST,
            AppError::Storage(StorageError::IoError(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UnknownDeviceFamily { .. } => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Initialization(_) | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self.error_body())
    }
}
