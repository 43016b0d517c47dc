// Library module organization

pub mod config;
pub mod device;
pub mod errors;
pub mod health;
pub mod image_processing;
pub mod print_job;
pub mod routes;
pub mod state;
pub mod status;
pub mod templates;

#[cfg(test)]
mod testing;

// Re-export commonly used types for convenience
pub use config::Config;
pub use errors::{AppError, PrintJobError};
pub use print_job::{JobState, PrintJob, PrintJobOrchestrator};
pub use state::AppState;
pub use templates::PrintRequest;
