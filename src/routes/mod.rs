use log::warn;
use rocket::http::Status;
use rocket::Request;

use crate::api::{status_error, ApiError};
use crate::models::activity::ActivityEntry;
use crate::store::Store;

pub mod admin;
pub mod auth;
pub mod media;
pub mod projects;
pub mod system;

/// Everything mounted under `/api`.
pub fn routes() -> Vec<rocket::Route> {
    let mut all = Vec::new();
    all.extend(projects::routes());
    all.extend(auth::routes());
    all.extend(media::routes());
    all.extend(admin::routes());
    all.extend(system::routes());
    all
}

#[catch(default)]
fn api_catcher(status: Status, req: &Request<'_>) -> ApiError {
    status_error(status, req)
}

pub fn catchers() -> Vec<rocket::Catcher> {
    catchers![api_catcher]
}

/// Append to the activity log. Failures never fail the request.
pub(crate) fn record(store: &dyn Store, entry: ActivityEntry) {
    if !store.can_write() {
        return;
    }
    if let Err(e) = store.activity_log(entry) {
        warn!("[activity] Failed to record entry: {}", e);
    }
}
