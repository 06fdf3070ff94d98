use axum::response::{IntoResponse, Redirect, Response};
use thiserror::Error;

use centime_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // Local recovery: log, abandon the request and land the user back
        // on the index.
        tracing::warn!(error = %self, "request failed");
        Redirect::to("/").into_response()
    }
}
