use axum::{
    extract::{Request, State},
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::routes::RouteState;

pub const SECRET_HEADER: &str = "x-depot-secret";
pub const AUTH_CHALLENGE: &str = "depot-secret";

/// Shared-secret gate in front of every blob endpoint. A missing or
/// mismatched secret gets a 401 with the authentication challenge header.
pub async fn require_secret(
    State(state): State<RouteState>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if presented == Some(state.config.secret.as_str()) {
        return next.run(request).await;
    }

    let mut response = StatusCode::UNAUTHORIZED.into_response();
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static(AUTH_CHALLENGE));
    response
}
