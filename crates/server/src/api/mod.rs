pub mod albums;
pub mod artists;
pub mod auth;
pub mod library;
pub mod search;
pub mod tracks;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::state::{AppState, AuthContext, HealthResponse};
use crate::utils::{extract_token, json_error_response};

pub fn api_router(state: AppState) -> Router {
    let max_upload_bytes = state.config.read().max_upload_bytes;

    let public = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::auth_register))
        .route("/auth/login", post(auth::auth_login))
        .route("/auth/logout", post(auth::auth_logout));

    let protected = Router::new()
        .route("/auth/me", get(auth::auth_me))
        .route(
            "/library/upload",
            post(library::upload).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/library/sync", post(library::sync_now))
        .route("/library/storage", get(library::storage))
        .route("/tracks", get(tracks::list_tracks))
        .route(
            "/tracks/:track_id",
            get(tracks::get_track)
                .put(tracks::update_track)
                .delete(tracks::delete_track),
        )
        .route("/tracks/:track_id/file", get(tracks::get_track_file))
        .route("/tracks/:track_id/cover", get(tracks::get_track_cover))
        .route("/albums", get(albums::list_albums).post(albums::create_album))
        .route(
            "/albums/:album_id",
            get(albums::get_album)
                .put(albums::update_album)
                .delete(albums::delete_album),
        )
        .route("/albums/:album_id/cover", get(albums::get_album_cover))
        .route(
            "/artists",
            get(artists::list_artists).post(artists::create_artist),
        )
        .route(
            "/artists/:artist_id",
            get(artists::get_artist)
                .put(artists::update_artist)
                .delete(artists::delete_artist),
        )
        .route("/search/torrents", get(search::search_torrents))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public)
        .merge(protected)
        .with_state(state)
}

async fn require_auth(
    State(state): State<AppState>,
    mut req: axum::http::Request<Body>,
    next: Next,
) -> Response {
    let token = match extract_token(req.headers()) {
        Some(token) => token,
        None => return json_error_response(StatusCode::UNAUTHORIZED, "unauthorized"),
    };

    let auth = state.auth.clone();
    let lookup = tokio::task::spawn_blocking(move || auth.user_from_token(&token)).await;
    match lookup {
        Ok(Ok(Some(user))) => {
            req.extensions_mut().insert(AuthContext { user });
            next.run(req).await
        }
        Ok(Ok(None)) => json_error_response(StatusCode::UNAUTHORIZED, "unauthorized"),
        Ok(Err(err)) => json_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("auth error: {}", err),
        ),
        Err(err) => json_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("auth task failed: {}", err),
        ),
    }
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}


#[cfg(test)]
mod tests {
    use super::testing::TestServer;

    #[tokio::test]
    async fn health_is_public_and_library_is_not() {
        let server = TestServer::start().await;
        let response = server.client.get(server.url("/health")).send().await.unwrap();
        assert_eq!(response.status(), 200);

        let response = server.client.get(server.url("/tracks")).send().await.unwrap();
        assert_eq!(response.status(), 401);

        let response = server
            .client
            .get(server.url("/tracks"))
            .bearer_auth("not-a-token")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 401);
    }
}
