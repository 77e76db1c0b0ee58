use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use tracing::info;

use crate::auth::{AuthError, AuthUser};
use crate::state::{
    AppState, AuthContext, HealthResponse, LoginRequest, LoginResponse, MeResponse,
    RegisterRequest,
};
use crate::utils::{clear_session_cookie, extract_token, json_error_response, session_cookie_header};

fn auth_error_response(err: AuthError) -> Response {
    let status = match &err {
        AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        AuthError::RegistrationClosed => StatusCode::FORBIDDEN,
        AuthError::UserExists => StatusCode::CONFLICT,
        AuthError::InvalidEmail | AuthError::PasswordMismatch | AuthError::WeakPassword(_) => {
            StatusCode::BAD_REQUEST
        }
        AuthError::Hash(_) | AuthError::DbError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error_response(status, err.to_string())
}

/// Opens a session for `user` and answers with the token and a session cookie.
fn signed_in(state: &AppState, user: &AuthUser) -> Response {
    let session = match state.auth.create_session(&user.id) {
        Ok(session) => session,
        Err(err) => return auth_error_response(err),
    };
    let cookie = session_cookie_header(&session, state.auth.session_ttl());
    let mut response = Json(LoginResponse {
        token: session.token,
        expires_at: session.expires_at,
        token_type: "Bearer",
    })
    .into_response();
    response.headers_mut().insert(header::SET_COOKIE, cookie);
    response
}

pub async fn auth_register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Response {
    match state
        .auth
        .register(&payload.email, &payload.password, &payload.confirm)
    {
        Ok(user) => {
            info!("Registered user {}", user.email);
            signed_in(&state, &user)
        }
        Err(err) => auth_error_response(err),
    }
}

pub async fn auth_login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Response {
    match state.auth.authenticate(&payload.email, &payload.password) {
        Ok(Some(user)) => signed_in(&state, &user),
        Ok(None) => auth_error_response(AuthError::InvalidCredentials),
        Err(err) => auth_error_response(err),
    }
}

pub async fn auth_logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = extract_token(&headers) {
        if let Err(err) = state.auth.revoke_session(&token) {
            return auth_error_response(err);
        }
    }
    let mut response = Json(HealthResponse { status: "ok" }).into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, clear_session_cookie());
    response
}

pub async fn auth_me(Extension(auth): Extension<AuthContext>) -> Json<MeResponse> {
    let user = auth.user;
    Json(MeResponse {
        id: user.id,
        email: user.email,
        created_at: user.created_at,
        last_login_at: user.last_login_at,
    })
}
