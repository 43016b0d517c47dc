// Route modules organization

pub mod health_routes;
pub mod print_routes;
pub mod template_routes;

pub use health_routes::*;
pub use print_routes::*;
pub use template_routes::*;

use actix_web::error::JsonPayloadError;
use actix_web::HttpRequest;

use crate::errors::AppError;

/// Reports malformed JSON bodies with the same error body as every other
/// failure.
pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    AppError::BadRequest(err.to_string()).into()
}
