//! Request deadlines.
//!
//! Every public operation runs under a deadline; exceeding it drops the
//! in-flight work (aborting its I/O at the next await) and answers with
//! the `deadline-exceeded` kind. Routes that stream request bodies get a
//! longer budget; the websocket feed is exempt because it is long-lived
//! by design. Lock-holding critical sections additionally bound
//! themselves with shorter inner deadlines so an expiry never leaks a
//! lock (see the editor callback).

use std::time::Duration;

use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::infra::errors::AppError;

/// Budget for the general API surface.
pub const REQUEST_DEADLINE: Duration = Duration::from_secs(30);

/// Budget for routes that read large request bodies or build archives.
pub const UPLOAD_DEADLINE: Duration = Duration::from_secs(600);

async fn enforce(deadline: Duration, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    match tokio::time::timeout(deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            warn!("request deadline of {deadline:?} exceeded: {path}");
            AppError::from(skiff_core::Error::DeadlineExceeded).into_response()
        }
    }
}

pub async fn request_deadline(request: Request, next: Next) -> Response {
    enforce(REQUEST_DEADLINE, request, next).await
}

pub async fn upload_deadline(request: Request, next: Next) -> Response {
    enforce(UPLOAD_DEADLINE, request, next).await
}
