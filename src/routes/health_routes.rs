use actix_web::{get, web, HttpResponse, Responder};

use crate::health::HealthReporter;

#[get("/health/")]
pub async fn health(reporter: web::Data<HealthReporter>) -> impl Responder {
    HttpResponse::Ok().json(reporter.is_healthy().await)
}
