use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    Json,
};
use common::Artist;
use library::{ArtistEdit, ArtistSummary};

use crate::state::{
    AlbumRef, AppState, ArtistDetailResponse, ArtistRequest, ArtistResponse, ArtistTrackResponse,
    HealthResponse, JsonResult, ListResponse,
};
use crate::utils::{blocking, json_error};

fn artist_response(artist: Artist, track_count: usize) -> ArtistResponse {
    ArtistResponse {
        id: artist.id,
        name: artist.name,
        bio: artist.bio,
        track_count,
        created_at: artist.created_at,
    }
}

pub async fn list_artists(
    State(state): State<AppState>,
) -> JsonResult<ListResponse<ArtistResponse>> {
    let library = state.library.clone();
    let artists = blocking(move || library.list_artists()).await?;
    let items: Vec<ArtistResponse> = artists
        .into_iter()
        .map(|ArtistSummary { artist, track_count }| artist_response(artist, track_count))
        .collect();
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}

pub async fn get_artist(
    State(state): State<AppState>,
    AxumPath(artist_id): AxumPath<u64>,
) -> JsonResult<ArtistDetailResponse> {
    let library = state.library.clone();
    let details = blocking(move || library.get_artist(artist_id))
        .await?
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "artist not found"))?;

    let tracks: Vec<ArtistTrackResponse> = details
        .tracks
        .into_iter()
        .map(|entry| ArtistTrackResponse {
            id: entry.track.id,
            display_title: entry.track.display_title().to_string(),
            album: entry.album.map(|album| AlbumRef {
                id: album.id,
                name: album.name,
            }),
        })
        .collect();
    Ok(Json(ArtistDetailResponse {
        artist: artist_response(details.artist, tracks.len()),
        tracks,
    }))
}

pub async fn create_artist(
    State(state): State<AppState>,
    Json(payload): Json<ArtistRequest>,
) -> JsonResult<ArtistResponse> {
    let library = state.library.clone();
    let artist = blocking(move || library.create_artist(&payload.name, payload.bio)).await?;
    Ok(Json(artist_response(artist, 0)))
}

pub async fn update_artist(
    State(state): State<AppState>,
    AxumPath(artist_id): AxumPath<u64>,
    Json(payload): Json<ArtistRequest>,
) -> JsonResult<ArtistResponse> {
    let edit = ArtistEdit {
        name: payload.name,
        bio: payload.bio,
    };
    let library = state.library.clone();
    let (artist, track_count) = blocking(move || {
        let artist = library.update_artist(artist_id, edit)?;
        let track_count = library
            .get_artist(artist_id)?
            .map(|details| details.tracks.len())
            .unwrap_or(0);
        Ok((artist, track_count))
    })
    .await?;
    Ok(Json(artist_response(artist, track_count)))
}

pub async fn delete_artist(
    State(state): State<AppState>,
    AxumPath(artist_id): AxumPath<u64>,
) -> JsonResult<HealthResponse> {
    let library = state.library.clone();
    blocking(move || library.delete_artist(artist_id)).await?;
    Ok(Json(HealthResponse { status: "ok" }))
}

#[cfg(test)]
mod tests {
    use crate::api::testing::TestServer;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let server = TestServer::start().await;
        let token = server.login().await;

        let first: Value = server
            .client
            .post(server.url("/artists"))
            .bearer_auth(&token)
            .json(&json!({"name": "Air", "bio": "  "}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(first["bio"].is_null());

        let response = server
            .client
            .post(server.url("/artists"))
            .bearer_auth(&token)
            .json(&json!({"name": "AIR"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 409);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"], "Artist with name 'AIR' already exists");

        let id = first["id"].as_u64().unwrap();
        let renamed: Value = server
            .client
            .put(server.url(&format!("/artists/{}", id)))
            .bearer_auth(&token)
            .json(&json!({"name": "air", "bio": "French duo"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(renamed["name"], "air");
        assert_eq!(renamed["bio"], "French duo");

        let response = server
            .client
            .delete(server.url(&format!("/artists/{}", id)))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let list: Value = server
            .client
            .get(server.url("/artists"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list["total"], 0);
    }
}
