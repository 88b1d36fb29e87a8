#[macro_use]
extern crate rocket;

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use rocket::data::{Limits, ToByteUnit};
use rocket::fs::FileServer;
use rocket::{Build, Rocket};

mod api;
mod boot;
mod config;
mod error;
mod fairings;
mod health;
mod idempotency;
mod metrics;
mod models;
mod rate_limit;
mod routes;
mod security;
mod store;
mod uploads;
mod validation;

#[cfg(test)]
mod tests;

use config::AppConfig;
use idempotency::IdempotencyCache;
use metrics::MetricsCache;
use rate_limit::{RateLimitFairing, RateLimiter};
use security::token::TokenService;
use store::{JsonStore, Store};

/// Assemble the server for a given configuration. Launch-time checks
/// live in `boot`; this only wires state, fairings, routes, and catchers.
pub fn build(config: AppConfig) -> Rocket<Build> {
    let store: Arc<dyn Store> = Arc::new(JsonStore::from_config(&config));

    if config.seed_samples && store.can_write() {
        if let Err(e) = boot::seed(store.as_ref()) {
            error!("Sample seed failed: {}", e);
        }
    }

    let limits = Limits::default()
        .limit("json", 1.mebibytes())
        .limit("file", uploads::MAX_TOTAL_SIZE.bytes())
        .limit("data-form", (uploads::MAX_TOTAL_SIZE + uploads::MB).bytes());
    let figment = rocket::Config::figment().merge(("limits", limits));

    let uploads_dir = config.uploads_dir();
    if let Err(e) = uploads::ensure_dirs(&uploads_dir) {
        warn!("Uploads directory unavailable: {}", e);
    }

    let tokens = TokenService::from_config(&config);
    let metrics = MetricsCache::new(Duration::from_millis(config.metrics_ttl_ms));

    let mut rocket = rocket::custom(figment)
        .attach(RateLimitFairing {
            config: config.rate_limit.clone(),
        })
        .attach(fairings::SecurityHeaders {
            production: config.is_production(),
        })
        .attach(fairings::NoStore)
        .mount("/api", routes::routes())
        .register("/", routes::catchers());

    if uploads_dir.is_dir() {
        rocket = rocket.mount("/uploads", FileServer::from(&uploads_dir));
    }

    info!("Environment: {}", config.environment_name());
    rocket
        .manage(store)
        .manage(tokens)
        .manage(RateLimiter::new())
        .manage(metrics)
        .manage(IdempotencyCache::default())
        .manage(config)
}

#[launch]
fn rocket() -> _ {
    env_logger::init();
    health::init_uptime();

    let config = AppConfig::load();

    // Boot check: create directories, probe writability, warn on credentials
    let report = boot::run(&config);
    if report.errors > 0 {
        error!("Aborting start-up.");
        std::process::exit(1);
    }

    build(config)
}
