use std::sync::Arc;

use axum::http::StatusCode;
use axum::Json;
use library::{Library, SyncReport};
use notify::RecommendedWatcher;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use transcode::Compressor;

use crate::auth::{AuthStore, AuthUser};
use crate::config::ServerConfig;
use crate::magnet::MagnetClient;

#[derive(Clone)]
pub struct AppState {
    pub library: Library,
    pub auth: AuthStore,
    pub config: Arc<RwLock<ServerConfig>>,
    pub compressor: Compressor,
    pub magnet: MagnetClient,
    pub watcher: Arc<RwLock<Option<RecommendedWatcher>>>,
    /// Held for the duration of a sync so uploads and the watcher never overlap.
    pub sync_gate: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[derive(Clone)]
pub struct AuthContext {
    pub user: AuthUser,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub confirm: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: u64,
    pub token_type: &'static str,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub id: String,
    pub email: String,
    pub created_at: u64,
    pub last_login_at: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TrackListQuery {
    pub search: Option<String>,
    pub album_id: Option<u64>,
    pub artist_id: Option<u64>,
    pub sort: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Serialize)]
pub struct AlbumRef {
    pub id: u64,
    pub name: String,
}

#[derive(Serialize)]
pub struct ArtistRef {
    pub id: u64,
    pub name: String,
}

#[derive(Serialize)]
pub struct TrackResponse {
    pub id: u64,
    pub file_name: String,
    pub title: Option<String>,
    pub display_title: String,
    pub track_number: u32,
    pub album: Option<AlbumRef>,
    pub artists: Vec<ArtistRef>,
    pub has_cover: bool,
    pub file_size: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Serialize)]
pub struct AudioPropertiesResponse {
    pub duration_ms: Option<u32>,
    pub bitrate_kbps: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
}

#[derive(Serialize)]
pub struct TrackDetailResponse {
    pub track: TrackResponse,
    pub properties: Option<AudioPropertiesResponse>,
}

/// Artwork is sent as base64. `remove_album_art` wins over new artwork.
#[derive(Debug, Deserialize)]
pub struct UpdateTrackRequest {
    pub title: Option<String>,
    #[serde(default)]
    pub track_number: u32,
    pub album_id: Option<u64>,
    pub new_album_name: Option<String>,
    #[serde(default)]
    pub artist_ids: Vec<u64>,
    #[serde(default)]
    pub new_artist_names: Vec<String>,
    pub album_art_base64: Option<String>,
    #[serde(default)]
    pub remove_album_art: bool,
}

#[derive(Serialize)]
pub struct UpdateTrackResponse {
    pub track: TrackResponse,
    pub tag_warning: Option<String>,
}

#[derive(Serialize)]
pub struct AlbumResponse {
    pub id: u64,
    pub name: String,
    pub release_year: Option<i32>,
    pub has_cover: bool,
    pub track_count: usize,
    pub created_at: u64,
}

#[derive(Serialize)]
pub struct AlbumDetailResponse {
    pub album: AlbumResponse,
    pub tracks: Vec<AlbumTrackResponse>,
}

#[derive(Serialize)]
pub struct AlbumTrackResponse {
    pub id: u64,
    pub track_number: u32,
    pub display_title: String,
    pub file_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAlbumRequest {
    pub name: String,
    pub release_year: Option<i32>,
    pub album_art_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAlbumRequest {
    pub name: String,
    pub release_year: Option<i32>,
    pub album_art_base64: Option<String>,
    #[serde(default)]
    pub remove_album_art: bool,
}

#[derive(Serialize)]
pub struct ArtistResponse {
    pub id: u64,
    pub name: String,
    pub bio: Option<String>,
    pub track_count: usize,
    pub created_at: u64,
}

#[derive(Serialize)]
pub struct ArtistDetailResponse {
    pub artist: ArtistResponse,
    pub tracks: Vec<ArtistTrackResponse>,
}

#[derive(Serialize)]
pub struct ArtistTrackResponse {
    pub id: u64,
    pub display_title: String,
    pub album: Option<AlbumRef>,
}

#[derive(Debug, Deserialize)]
pub struct ArtistRequest {
    pub name: String,
    pub bio: Option<String>,
}

#[derive(Debug, Serialize, Default)]
pub struct UploadFileResult {
    pub file_name: String,
    pub stored_as: Option<String>,
    pub size: u64,
    pub compressed: bool,
    pub bytes_saved: i64,
    pub error: Option<String>,
    /// The file is kept as uploaded when this is set.
    pub compression_error: Option<String>,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub uploaded: usize,
    pub failed: usize,
    pub compressed: usize,
    pub compression_failed: usize,
    pub bytes_saved: i64,
    pub message: String,
    pub files: Vec<UploadFileResult>,
    pub sync: Option<SyncReport>,
}

#[derive(Serialize)]
pub struct CompressionSummary {
    pub enabled: bool,
    pub target_bitrate_kbps: u32,
    pub recompress_threshold_kbps: u32,
    pub target_format: String,
}

#[derive(Serialize)]
pub struct StorageResponse {
    pub tracks: usize,
    pub albums: usize,
    pub artists: usize,
    pub files: usize,
    pub total_bytes: u64,
    pub total_display: String,
    pub compression: CompressionSummary,
}

#[derive(Debug, Deserialize)]
pub struct TorrentQuery {
    pub query: Option<String>,
}

pub type JsonResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;
