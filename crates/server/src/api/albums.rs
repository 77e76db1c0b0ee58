use axum::{
    extract::{Path as AxumPath, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::Album;
use library::{AlbumEdit, AlbumSummary};

use crate::media::cover_response;
use crate::state::{
    AlbumDetailResponse, AlbumResponse, AlbumTrackResponse, AppState, CreateAlbumRequest,
    HealthResponse, JsonResult, ListResponse, UpdateAlbumRequest,
};
use crate::utils::{blocking, decode_base64_art, json_error, json_error_response};

use super::tracks::artwork_update;

fn album_response(album: Album, track_count: usize) -> AlbumResponse {
    AlbumResponse {
        has_cover: album.album_art.is_some(),
        id: album.id,
        name: album.name,
        release_year: album.release_year,
        track_count,
        created_at: album.created_at,
    }
}

pub async fn list_albums(State(state): State<AppState>) -> JsonResult<ListResponse<AlbumResponse>> {
    let library = state.library.clone();
    let albums = blocking(move || library.list_albums()).await?;
    let items: Vec<AlbumResponse> = albums
        .into_iter()
        .map(|AlbumSummary { album, track_count }| album_response(album, track_count))
        .collect();
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}

pub async fn get_album(
    State(state): State<AppState>,
    AxumPath(album_id): AxumPath<u64>,
) -> JsonResult<AlbumDetailResponse> {
    let library = state.library.clone();
    let details = blocking(move || library.get_album(album_id))
        .await?
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "album not found"))?;

    let tracks: Vec<AlbumTrackResponse> = details
        .tracks
        .into_iter()
        .map(|track| AlbumTrackResponse {
            display_title: track.display_title().to_string(),
            id: track.id,
            track_number: track.track_number,
            file_name: track.file_name,
        })
        .collect();
    Ok(Json(AlbumDetailResponse {
        album: album_response(details.album, tracks.len()),
        tracks,
    }))
}

pub async fn create_album(
    State(state): State<AppState>,
    Json(payload): Json<CreateAlbumRequest>,
) -> JsonResult<AlbumResponse> {
    let art = match payload
        .album_art_base64
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        Some(value) => {
            Some(decode_base64_art(value).map_err(|err| json_error(StatusCode::BAD_REQUEST, err))?)
        }
        None => None,
    };
    let library = state.library.clone();
    let album =
        blocking(move || library.create_album(&payload.name, payload.release_year, art)).await?;
    Ok(Json(album_response(album, 0)))
}

pub async fn update_album(
    State(state): State<AppState>,
    AxumPath(album_id): AxumPath<u64>,
    Json(payload): Json<UpdateAlbumRequest>,
) -> JsonResult<AlbumResponse> {
    let artwork = artwork_update(payload.album_art_base64.as_deref(), payload.remove_album_art)
        .map_err(|err| json_error(StatusCode::BAD_REQUEST, err))?;
    let edit = AlbumEdit {
        name: payload.name,
        release_year: payload.release_year,
        artwork,
    };
    let library = state.library.clone();
    let (album, track_count) = blocking(move || {
        let album = library.update_album(album_id, edit)?;
        let track_count = library
            .get_album(album_id)?
            .map(|details| details.tracks.len())
            .unwrap_or(0);
        Ok((album, track_count))
    })
    .await?;
    Ok(Json(album_response(album, track_count)))
}

pub async fn delete_album(
    State(state): State<AppState>,
    AxumPath(album_id): AxumPath<u64>,
) -> JsonResult<HealthResponse> {
    let library = state.library.clone();
    blocking(move || library.delete_album(album_id)).await?;
    Ok(Json(HealthResponse { status: "ok" }))
}

pub async fn get_album_cover(
    State(state): State<AppState>,
    AxumPath(album_id): AxumPath<u64>,
    headers: HeaderMap,
) -> Response {
    let library = state.library.clone();
    match blocking(move || library.get_album(album_id)).await {
        Ok(Some(details)) => match details.album.album_art {
            Some(art) => cover_response(art, &headers),
            None => json_error_response(StatusCode::NOT_FOUND, "cover not found"),
        },
        Ok(None) => json_error_response(StatusCode::NOT_FOUND, "album not found"),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use crate::api::testing::TestServer;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn album_crud_round() {
        let server = TestServer::start().await;
        let token = server.login().await;

        let response = server
            .client
            .post(server.url("/albums"))
            .bearer_auth(&token)
            .json(&json!({"name": "  ", "release_year": 2001}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        let created: Value = server
            .client
            .post(server.url("/albums"))
            .bearer_auth(&token)
            .json(&json!({"name": "Discovery", "release_year": 2001, "album_art_base64": "/9j/4A=="}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(created["name"], "Discovery");
        assert_eq!(created["has_cover"], true);
        let id = created["id"].as_u64().unwrap();

        let response = server
            .client
            .get(server.url(&format!("/albums/{}/cover", id)))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "image/jpeg");

        let updated: Value = server
            .client
            .put(server.url(&format!("/albums/{}", id)))
            .bearer_auth(&token)
            .json(&json!({"name": "Homework", "release_year": 1997, "remove_album_art": true}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(updated["name"], "Homework");
        assert_eq!(updated["has_cover"], false);

        let list: Value = server
            .client
            .get(server.url("/albums"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list["total"], 1);

        let response = server
            .client
            .delete(server.url(&format!("/albums/{}", id)))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let response = server
            .client
            .get(server.url(&format!("/albums/{}", id)))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }
}
