use actix_web::{post, web, HttpResponse};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::AppError;
use crate::print_job::PrintJobOrchestrator;
use crate::templates::PrintRequest;

#[derive(Debug, Deserialize)]
pub struct PrintParameters {
    pub template: String,
    pub data: Map<String, Value>,
}

/// Prints `data` through `template`. The QR code is generated from
/// `data["id"]`, so that key is required.
#[post("/print/{family}/")]
pub async fn print_ticket(
    path: web::Path<String>,
    body: web::Json<PrintParameters>,
    config: web::Data<Config>,
    orchestrator: web::Data<PrintJobOrchestrator>,
) -> Result<HttpResponse, AppError> {
    let family = path.into_inner();
    if family != config.device.family {
        warn!("Print request for unknown device family '{}'", family);
        return Err(AppError::UnknownDeviceFamily { family });
    }

    let params = body.into_inner();
    info!(
        "Print request received: template '{}' on {}",
        params.template, family
    );

    let printed = orchestrator
        .into_inner()
        .submit(PrintRequest::new(params.template, params.data))
        .await?;
    Ok(HttpResponse::Ok().json(printed))
}
