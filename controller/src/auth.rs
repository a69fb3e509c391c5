//! HTTP Basic authentication against a single shared credential pair. Mirrors the
//! exception-list shape of the gateway's own auth middleware, but with Basic challenge
//! instead of bearer tokens, and a much shorter exception list (only health is public).

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::TypedHeader;
use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Basic;

use crate::AppState;
use crate::http::HttpError;

struct AuthException {
    method: Method,
    path: &'static str,
}

const AUTH_EXCEPTIONS: &[AuthException] = &[AuthException {
    method: Method::GET,
    path: "/api/sessions/health",
}];

pub async fn basic_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, HttpError> {
    let method = request.method().clone();
    let uri_path = request.uri().path().to_owned();

    let skip = AUTH_EXCEPTIONS
        .iter()
        .any(|exception| exception.method == method && exception.path == uri_path);

    if skip {
        return Ok(next.run(request).await);
    }

    let (mut parts, body) = request.into_parts();

    let header = axum::RequestPartsExt::extract::<TypedHeader<Authorization<Basic>>>(&mut parts).await;

    let Ok(TypedHeader(auth)) = header else {
        return Err(HttpError::unauthorized().msg("missing or malformed Authorization header"));
    };

    if auth.username() != state.conf.basic_auth_username || auth.password() != state.conf.basic_auth_password {
        return Err(HttpError::unauthorized().msg("invalid credentials"));
    }

    let request = Request::from_parts(parts, body);
    Ok(next.run(request).await)
}
