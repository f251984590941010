use std::sync::Arc;

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use serde_json::json;
use tracing::warn;

use super::request_context::RequestContext;
use crate::{
    http::error::{ApiError, AppResult},
    services::ip_guard::{IpGuard, Verdict},
};

/// Admission check against the IP reputation gate. Must run after
/// [`attach_request_context`](super::request_context::attach_request_context).
pub async fn enforce_ip_guard(
    State(guard): State<Arc<IpGuard>>,
    request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let Some(context) = request.extensions().get::<RequestContext>() else {
        return Err(ApiError::internal_server_error("request context missing"));
    };
    let client_ip = context.client_ip;

    match guard.check(client_ip, context.is_admin()).await? {
        Verdict::Allowed | Verdict::Bypassed => Ok(next.run(request).await),
        Verdict::Banned(ban) => Err(ApiError::banned("your IP address is banned").with_details(
            json!({ "reason": ban.reason, "expire_at": ban.expire_at }),
        )),
        Verdict::RateLimited { ban } => {
            if ban.is_some() {
                warn!(%client_ip, path = %request.uri().path(), "request rate exceeded");
            }
            Err(ApiError::too_many_requests(
                "too many requests; your IP address has been banned temporarily",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::token::TokenVerifier,
        middleware::request_context::{RequestContextState, attach_request_context},
        services::{clock::ManualClock, ip_guard::GuardSettings},
        store::{BanStore, MemoryStore},
    };
    use axum::{Router, http::StatusCode, middleware::from_fn_with_state, routing::get};
    use shared::{
        config::server::{Config, IpGuardConfig},
        models::{BanKind, NewIpBan},
    };
    use tower::ServiceExt;

    fn app(max_per_minute: u32) -> (Arc<MemoryStore>, Router) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new(clock.clone()));
        let settings = GuardSettings::from_config(&IpGuardConfig {
            max_per_minute,
            ..IpGuardConfig::default()
        });
        let guard = Arc::new(IpGuard::new(settings, store.clone(), store.clone(), clock));
        let config = Config::default();
        let context = RequestContextState::from_config(&config, TokenVerifier::from_config(&config.auth));

        let router = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(guard, enforce_ip_guard))
            .layer(from_fn_with_state(context, attach_request_context));
        (store, router)
    }

    fn from(ip: &str) -> Request<Body> {
        Request::builder()
            .uri("/")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn banned_addresses_get_403() {
        let (store, app) = app(60);
        store
            .upsert(NewIpBan {
                ip: "192.0.2.99".into(),
                reason: "abuse".into(),
                ban_type: BanKind::Manual,
                expire_at: None,
            })
            .await
            .unwrap();

        let response = app.clone().oneshot(from("192.0.2.99")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let response = app.oneshot(from("192.0.2.100")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn flooding_address_gets_429_then_403() {
        let (store, app) = app(3);
        for _ in 0..3 {
            let response = app.clone().oneshot(from("203.0.113.77")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app.clone().oneshot(from("203.0.113.77")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(store.bans().await[0].ban_type, BanKind::Auto);

        let response = app.oneshot(from("203.0.113.77")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
