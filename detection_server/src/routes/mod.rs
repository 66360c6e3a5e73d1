mod accounts;
mod health;
mod history;
mod labels;
mod metrics;
mod video_ws;

use crate::server::SharedState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};

pub fn api_routes(max_upload_bytes: usize) -> Router<SharedState> {
    Router::new()
        .route("/ws/video/", get(video_ws::video_ws))
        .route("/labels/", get(labels::labels))
        .route("/history/", get(history::get_history))
        .route(
            "/upload/",
            post(history::upload_video).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route(
            "/delete/{record_id}/",
            post(history::delete_history).delete(history::delete_history),
        )
        .route(
            "/register/",
            post(accounts::register).fallback(accounts::method_not_allowed),
        )
        .route(
            "/login/",
            post(accounts::login).fallback(accounts::method_not_allowed),
        )
        .route(
            "/logout/",
            post(accounts::logout).fallback(accounts::method_not_allowed),
        )
        .route(
            "/delete_account/",
            delete(accounts::delete_account).fallback(accounts::method_not_allowed),
        )
        .route(
            "/profile/",
            get(accounts::get_profile)
                .put(accounts::update_profile)
                .fallback(accounts::method_not_allowed),
        )
        .route("/health", get(health::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
}
