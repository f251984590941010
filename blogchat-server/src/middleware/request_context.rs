use std::{
    net::{IpAddr, SocketAddr},
    str::FromStr,
};

use axum::{
    body::Body,
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, header},
    middleware::Next,
    response::Response,
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::{
    auth::token::{Claims, TokenVerifier},
    http::error::{ApiError, AppResult},
};
use shared::{config::server::Config, net::FALLBACK_CLIENT_IP};

/// Per-request facts every handler may rely on.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub client_ip: IpAddr,
    /// Verified bearer token claims, when one was presented.
    pub claims: Option<Claims>,
}

impl RequestContext {
    pub fn is_admin(&self) -> bool {
        self.claims.as_ref().is_some_and(Claims::is_admin)
    }
}

#[derive(Clone, Debug)]
pub struct RequestContextState {
    request_id_header: HeaderName,
    client_ip_header: Option<HeaderName>,
    tokens: TokenVerifier,
}

impl RequestContextState {
    pub fn from_config(config: &Config, tokens: TokenVerifier) -> Self {
        let request_id_header = HeaderName::from_str(&config.server.request_id_header)
            .unwrap_or_else(|_| HeaderName::from_static("x-request-id"));
        let client_ip_header = Some(config.server.client_ip_header.trim())
            .filter(|name| !name.is_empty())
            .and_then(|name| HeaderName::from_str(name).ok());

        Self {
            request_id_header,
            client_ip_header,
            tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

pub async fn attach_request_context(
    State(state): State<RequestContextState>,
    mut request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let header_name = state.request_id_header.clone();
    let request_id = extract_request_id(request.headers(), &header_name)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client_ip = resolve_client_ip(request.headers(), state.client_ip_header.as_ref(), peer);

    let claims = bearer_token(&request).and_then(|token| match state.tokens.verify(&token) {
        Ok(claims) => Some(claims),
        Err(err) => {
            debug!(%client_ip, error = %err, "ignoring invalid bearer token");
            None
        }
    });

    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
        client_ip,
        claims,
    });

    request.headers_mut().insert(
        header_name.clone(),
        HeaderValue::from_str(&request_id)
            .map_err(|_| ApiError::internal_server_error("failed to encode request id"))?,
    );

    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header_name,
        HeaderValue::from_str(&request_id)
            .map_err(|_| ApiError::internal_server_error("failed to encode request id"))?,
    );

    Ok(response)
}

fn extract_request_id(headers: &HeaderMap, header: &HeaderName) -> Option<String> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Trusted header (first hop), then `x-real-ip`, then the socket peer, then
/// loopback.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    trusted: Option<&HeaderName>,
    peer: Option<IpAddr>,
) -> IpAddr {
    let from_header = |name: &HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok())
    };

    trusted
        .and_then(from_header)
        .or_else(|| from_header(&HeaderName::from_static("x-real-ip")))
        .or(peer)
        .unwrap_or(FALLBACK_CLIENT_IP)
}

/// `Authorization: Bearer <token>` or the `token` query parameter, which
/// browsers use for WebSocket upgrades.
fn bearer_token(request: &Request<Body>) -> Option<String> {
    let from_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());

    from_header
        .or_else(|| {
            Query::<TokenQuery>::try_from_uri(request.uri())
                .ok()
                .and_then(|Query(query)| query.token)
        })
        .filter(|token| !token.is_empty())
}
