use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::Track;
use library::{ArtworkUpdate, TrackDetails, TrackEdit, TrackQuery, TrackSort};
use tracing::info;

use crate::media::{cover_response, file_response};
use crate::state::{
    AlbumRef, AppState, ArtistRef, AudioPropertiesResponse, HealthResponse, JsonResult,
    ListResponse, TrackDetailResponse, TrackListQuery, TrackResponse, UpdateTrackRequest,
    UpdateTrackResponse,
};
use crate::utils::{blocking, decode_base64_art, json_error, json_error_response};

const MAX_PAGE_SIZE: usize = 500;

pub(super) fn track_response(details: TrackDetails) -> TrackResponse {
    let TrackDetails {
        track,
        album,
        artists,
    } = details;
    TrackResponse {
        display_title: track.display_title().to_string(),
        has_cover: track.album_art.is_some(),
        file_size: 0,
        album: album.map(|album| AlbumRef {
            id: album.id,
            name: album.name,
        }),
        artists: artists
            .into_iter()
            .map(|artist| ArtistRef {
                id: artist.id,
                name: artist.name,
            })
            .collect(),
        id: track.id,
        file_name: track.file_name,
        title: track.title,
        track_number: track.track_number,
        created_at: track.created_at,
        updated_at: track.updated_at,
    }
}

fn with_file_size(state: &AppState, mut response: TrackResponse) -> TrackResponse {
    response.file_size = state.library.files().file_size(&response.file_name);
    response
}

/// Splits each entry on commas; blank names are dropped.
pub(super) fn split_names(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// `remove` wins over new artwork; a blank string keeps the current art.
pub(super) fn artwork_update(
    base64: Option<&str>,
    remove: bool,
) -> Result<ArtworkUpdate, String> {
    if remove {
        return Ok(ArtworkUpdate::Remove);
    }
    match base64.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => decode_base64_art(value).map(ArtworkUpdate::Replace),
        None => Ok(ArtworkUpdate::Keep),
    }
}

pub async fn list_tracks(
    State(state): State<AppState>,
    Query(query): Query<TrackListQuery>,
) -> JsonResult<ListResponse<TrackResponse>> {
    let track_query = TrackQuery {
        search: query.search,
        album_id: query.album_id,
        artist_id: query.artist_id,
        sort: query
            .sort
            .as_deref()
            .map(TrackSort::parse)
            .unwrap_or_default(),
        limit: Some(query.limit.unwrap_or(MAX_PAGE_SIZE).min(MAX_PAGE_SIZE)),
        offset: query.offset.unwrap_or(0),
    };
    let library = state.library.clone();
    let (items, total) = blocking(move || library.list_tracks(&track_query)).await?;
    let items = items
        .into_iter()
        .map(|details| with_file_size(&state, track_response(details)))
        .collect();
    Ok(Json(ListResponse { items, total }))
}

pub async fn get_track(
    State(state): State<AppState>,
    AxumPath(track_id): AxumPath<u64>,
) -> JsonResult<TrackDetailResponse> {
    let library = state.library.clone();
    let (details, properties) = blocking(move || {
        let details = match library.track_details(track_id)? {
            Some(details) => details,
            None => return Ok((None, None)),
        };
        let path = library.files().file_path(&details.track.file_name);
        let properties = metadata::read_audio_properties(&path).ok();
        Ok((Some(details), properties))
    })
    .await?;
    let details = details.ok_or_else(|| json_error(StatusCode::NOT_FOUND, "track not found"))?;

    Ok(Json(TrackDetailResponse {
        track: with_file_size(&state, track_response(details)),
        properties: properties.map(|props| AudioPropertiesResponse {
            duration_ms: props.duration_ms,
            bitrate_kbps: props.bitrate_kbps,
            sample_rate: props.sample_rate,
            channels: props.channels,
        }),
    }))
}

pub async fn update_track(
    State(state): State<AppState>,
    AxumPath(track_id): AxumPath<u64>,
    Json(payload): Json<UpdateTrackRequest>,
) -> JsonResult<UpdateTrackResponse> {
    let artwork = artwork_update(payload.album_art_base64.as_deref(), payload.remove_album_art)
        .map_err(|err| json_error(StatusCode::BAD_REQUEST, err))?;
    let edit = TrackEdit {
        title: payload.title,
        track_number: payload.track_number,
        album_id: payload.album_id,
        new_album_name: payload.new_album_name,
        artist_ids: payload.artist_ids,
        new_artist_names: split_names(&payload.new_artist_names),
        artwork,
    };

    let library = state.library.clone();
    let (outcome, details) = blocking(move || {
        let outcome = library.update_track(track_id, edit)?;
        let details = library.track_details(track_id)?;
        Ok((outcome, details))
    })
    .await?;
    let details = details.ok_or_else(|| json_error(StatusCode::NOT_FOUND, "track not found"))?;

    Ok(Json(UpdateTrackResponse {
        track: with_file_size(&state, track_response(details)),
        tag_warning: outcome.tag_error,
    }))
}

pub async fn delete_track(
    State(state): State<AppState>,
    AxumPath(track_id): AxumPath<u64>,
) -> JsonResult<HealthResponse> {
    let library = state.library.clone();
    let track: Track = blocking(move || library.delete_track(track_id)).await?;
    info!("Deleted track {} ({})", track.id, track.file_name);
    Ok(Json(HealthResponse { status: "ok" }))
}

pub async fn get_track_file(
    State(state): State<AppState>,
    AxumPath(track_id): AxumPath<u64>,
    headers: HeaderMap,
) -> Response {
    let library = state.library.clone();
    let track = match blocking(move || library.get_track(track_id)).await {
        Ok(Some(track)) => track,
        Ok(None) => return json_error_response(StatusCode::NOT_FOUND, "track not found"),
        Err(err) => return err.into_response(),
    };
    let path = state.library.files().file_path(&track.file_name);
    file_response(&path, &headers).await
}

pub async fn get_track_cover(
    State(state): State<AppState>,
    AxumPath(track_id): AxumPath<u64>,
    headers: HeaderMap,
) -> Response {
    let library = state.library.clone();
    match blocking(move || library.get_track(track_id)).await {
        Ok(Some(Track {
            album_art: Some(art),
            ..
        })) => cover_response(art, &headers),
        Ok(_) => json_error_response(StatusCode::NOT_FOUND, "cover not found"),
        Err(err) => err.into_response(),
    }
}
