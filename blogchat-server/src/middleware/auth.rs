use axum::{body::Body, extract::Request, middleware::Next, response::Response};
use tracing::debug;

use crate::{
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
};

/// Lets the request through only with a verified moderator token.
pub async fn require_admin(request: Request<Body>, next: Next) -> AppResult<Response> {
    let claims = request
        .extensions()
        .get::<RequestContext>()
        .and_then(|context| context.claims.as_ref());

    match claims {
        None => Err(ApiError::unauthorized("login required")),
        Some(claims) if !claims.is_admin() => {
            debug!(user_id = claims.user_id, role = %claims.role, "moderator route refused");
            Err(ApiError::forbidden("moderator role required"))
        }
        Some(_) => Ok(next.run(request).await),
    }
}
