use std::sync::Arc;

use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;

use crate::config::AppConfig;
use crate::health::HealthReport;
use crate::rate_limit;
use crate::store::Store;

#[get("/health")]
pub fn health(
    config: &State<AppConfig>,
    store: &State<Arc<dyn Store>>,
) -> (Status, Json<HealthReport>) {
    let report = crate::health::gather(config, store.inner().as_ref());
    let status = if report.is_healthy() {
        Status::Ok
    } else {
        Status::ServiceUnavailable
    };
    (status, Json(report))
}

pub fn routes() -> Vec<rocket::Route> {
    routes![health, rate_limit::throttled]
}
