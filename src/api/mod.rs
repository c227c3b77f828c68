pub mod admin;
pub mod auth;
mod error;
pub mod fax;
pub mod inbound;
pub mod models;
pub mod ratelimit;
mod server;
pub mod state;
pub(crate) mod validation;
pub mod webhooks;

pub use error::ApiError;
pub use server::{build_router, run, sweep_once};

/// Cache-defeating headers for artifact responses.
pub(crate) fn pdf_response_headers() -> [(axum::http::HeaderName, &'static str); 4] {
    [
        (axum::http::header::CONTENT_TYPE, "application/pdf"),
        (
            axum::http::header::CACHE_CONTROL,
            "no-store, no-cache, must-revalidate",
        ),
        (axum::http::header::PRAGMA, "no-cache"),
        (axum::http::header::EXPIRES, "0"),
    ]
}
