use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use log::{debug, warn};

use crate::auth::{verify_jwt_token, AuthUser, AUTH_COOKIE_NAME};
use crate::error::AppError;
use crate::state::AppState;

/// Middleware that requires a JWT, from `Authorization: Bearer` or the
/// `auth_token` cookie.
pub async fn require_auth(
    cookie_jar: CookieJar,
    State(app_state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    debug!(
        "Auth middleware - Processing request to: {} {}",
        request.method(),
        request.uri()
    );

    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_owned());
    let token = bearer.or_else(|| cookie_jar.get(AUTH_COOKIE_NAME).map(|c| c.value().to_owned()));

    let Some(token) = token else {
        debug!("Auth middleware - No auth token found");
        return AppError::Unauthorized.into_response();
    };

    match verify_jwt_token(&token, &app_state.config.jwt_secret) {
        Ok(claims) => match claims.user_id() {
            Ok(user_id) => {
                request.extensions_mut().insert(AuthUser(user_id));
                next.run(request).await
            }
            Err(_) => {
                warn!("Auth middleware - Invalid user ID in token: {}", claims.sub);
                AppError::Unauthorized.into_response()
            }
        },
        Err(e) => {
            debug!("Auth middleware - Token verification failed: {e:?}");
            AppError::Unauthorized.into_response()
        }
    }
}
