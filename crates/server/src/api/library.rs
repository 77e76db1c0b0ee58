use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use common::{format_bytes, is_upload_extension, sanitize_file_name};
use library::SyncReport;
use tracing::{info, warn};

use crate::state::{
    AppState, CompressionSummary, JsonResult, StorageResponse, UploadFileResult, UploadResponse,
};
use crate::sync::run_full_sync;
use crate::utils::{blocking, json_error, library_error};

/// `Uploaded 3 file(s), saved 12.4 MB through compression. 1 file(s) failed.`
pub(crate) fn upload_message(
    uploaded: usize,
    bytes_saved: i64,
    failed: usize,
    compression_failed: usize,
) -> String {
    let mut message = format!("Uploaded {} file(s)", uploaded);
    if bytes_saved > 0 {
        message.push_str(&format!(
            ", saved {} through compression",
            format_bytes(bytes_saved as u64)
        ));
    }
    message.push('.');
    if failed > 0 {
        message.push_str(&format!(" {} file(s) failed.", failed));
    }
    if compression_failed > 0 {
        message.push_str(&format!(
            " {} file(s) could not be compressed and were kept as uploaded.",
            compression_failed
        ));
    }
    message
}

/// Stores one uploaded file and compresses it when enabled. Errors stay with this file.
async fn store_upload(state: &AppState, original: &str, bytes: Vec<u8>) -> UploadFileResult {
    let mut result = UploadFileResult {
        file_name: original.to_string(),
        size: bytes.len() as u64,
        ..Default::default()
    };
    let name = match sanitize_file_name(original) {
        Some(name) if is_upload_extension(&name) => name,
        _ => {
            result.error = Some("Unsupported file type".to_string());
            return result;
        }
    };

    let library = state.library.clone();
    let stored = match blocking(move || Ok(library.files().save(&name, &bytes)?)).await {
        Ok(stored) => stored,
        Err((_, body)) => {
            result.error = Some(body.0.error);
            return result;
        }
    };
    result.stored_as = Some(stored.clone());

    if state.compressor.options().enabled {
        let path = state.library.files().file_path(&stored);
        let compression = state.compressor.compress_if_needed(&path).await;
        if let Some(err) = compression.error_message {
            warn!("Compression failed for {:?}: {}", stored, err);
            result.compression_error = Some(err);
        } else if compression.was_compressed {
            result.compressed = true;
            result.bytes_saved = compression.bytes_saved();
            result.stored_as = Some(compression.compressed_file_name);
        }
    }
    result
}

pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> JsonResult<UploadResponse> {
    let mut files = Vec::new();
    // Keeps the watcher from syncing half-written or half-transcoded files.
    let gate = state.sync_gate.lock().await;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err(json_error(err.status(), err.body_text())),
        };
        let original = match field.file_name() {
            Some(name) => name.to_string(),
            None => continue,
        };
        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(err) => return Err(json_error(err.status(), err.body_text())),
        };
        files.push(store_upload(&state, &original, bytes.to_vec()).await);
    }
    drop(gate);
    if files.is_empty() {
        return Err(json_error(StatusCode::BAD_REQUEST, "No files uploaded"));
    }

    let uploaded = files.iter().filter(|file| file.error.is_none()).count();
    let failed = files.len() - uploaded;
    let compressed = files.iter().filter(|file| file.compressed).count();
    let compression_failed = files
        .iter()
        .filter(|file| file.compression_error.is_some())
        .count();
    let bytes_saved: i64 = files.iter().map(|file| file.bytes_saved).sum();
    let message = upload_message(uploaded, bytes_saved, failed, compression_failed);
    info!("{}", message);

    let sync = match run_full_sync(&state).await {
        Ok(report) => Some(report),
        Err(err) => {
            warn!("Sync after upload failed: {}", err);
            None
        }
    };

    Ok(Json(UploadResponse {
        uploaded,
        failed,
        compressed,
        compression_failed,
        bytes_saved,
        message,
        files,
        sync,
    }))
}

pub async fn sync_now(State(state): State<AppState>) -> JsonResult<SyncReport> {
    run_full_sync(&state).await.map(Json).map_err(library_error)
}

pub async fn storage(State(state): State<AppState>) -> JsonResult<StorageResponse> {
    let library = state.library.clone();
    let stats = blocking(move || library.storage_stats()).await?;
    let options = state.compressor.options();
    Ok(Json(StorageResponse {
        tracks: stats.tracks,
        albums: stats.albums,
        artists: stats.artists,
        files: stats.files,
        total_bytes: stats.total_bytes,
        total_display: stats.total_display,
        compression: CompressionSummary {
            enabled: options.enabled,
            target_bitrate_kbps: options.target_bitrate_kbps,
            recompress_threshold_kbps: options.recompress_threshold_kbps,
            target_format: options.target_format.clone(),
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::TestServer;
    use serde_json::Value;
    use std::path::Path;
    use std::sync::Arc;
    use transcode::{CompressionOptions, Compressor, TranscodeError, Transcoder};

    const BOUNDARY: &str = "phono-test-boundary";

    fn multipart_body(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, bytes) in files {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\n",
                    name
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    #[test]
    fn message_mentions_savings_and_failures() {
        assert_eq!(upload_message(2, 0, 0, 0), "Uploaded 2 file(s).");
        assert_eq!(
            upload_message(3, 1536 * 1024, 1, 0),
            "Uploaded 3 file(s), saved 1.5 MB through compression. 1 file(s) failed."
        );
        assert_eq!(
            upload_message(2, 0, 0, 1),
            "Uploaded 2 file(s). 1 file(s) could not be compressed and were kept as uploaded."
        );
    }

    #[tokio::test]
    async fn upload_isolates_bad_files_and_syncs() {
        let server = TestServer::start().await;
        let token = server.login().await;
        server.add_file("taken.mp3", b"old");

        let body = multipart_body(&[
            ("taken.mp3", &b"new-bytes"[..]),
            ("notes.txt", &b"hello"[..]),
            ("../escape.flac", &b"flac"[..]),
        ]);
        let response = server
            .client
            .post(server.url("/library/upload"))
            .bearer_auth(&token)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let report: Value = response.json().await.unwrap();
        assert_eq!(report["uploaded"], 2);
        assert_eq!(report["failed"], 1);
        assert_eq!(report["message"], "Uploaded 2 file(s). 1 file(s) failed.");
        assert_eq!(report["files"][0]["stored_as"], "taken_1.mp3");
        assert_eq!(report["files"][1]["error"], "Unsupported file type");
        assert_eq!(report["files"][2]["stored_as"], "escape.flac");
        assert_eq!(report["sync"]["imported"], 3);

        let files = server.state.library.files();
        assert!(files.exists("escape.flac"));
        assert!(!server.dir.path().join("escape.flac").exists());

        let storage: Value = server
            .client
            .get(server.url("/library/storage"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(storage["tracks"], 3);
        assert_eq!(storage["files"], 3);
        assert_eq!(storage["compression"]["enabled"], false);
    }

    /// Writes a short payload, or fails for inputs whose name starts with `bad`.
    struct StubTranscoder;

    #[async_trait::async_trait]
    impl Transcoder for StubTranscoder {
        async fn encode(
            &self,
            input: &Path,
            output: &Path,
            _bitrate_kbps: u32,
            _format: &str,
        ) -> Result<(), TranscodeError> {
            tokio::fs::write(output, b"enc").await?;
            let name = input.file_name().unwrap().to_string_lossy();
            if name.starts_with("bad") {
                return Err(TranscodeError::Encoder("unsupported sample format".to_string()));
            }
            Ok(())
        }

        async fn probe_bitrate(&self, _path: &Path) -> Result<Option<u64>, TranscodeError> {
            Ok(None)
        }
    }

    async fn compressing_server() -> TestServer {
        TestServer::start_with(|options| {
            let options = CompressionOptions {
                enabled: true,
                ..options.clone()
            };
            Compressor::with_transcoder(options, Arc::new(StubTranscoder))
        })
        .await
    }

    #[tokio::test]
    async fn upload_reports_compression_savings() {
        let server = compressing_server().await;
        let token = server.login().await;

        let body = multipart_body(&[("take.wav", &[0u8; 1000][..]), ("plain.mp3", &b"id3"[..])]);
        let report: Value = server
            .client
            .post(server.url("/library/upload"))
            .bearer_auth(&token)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(report["uploaded"], 2);
        assert_eq!(report["compressed"], 1);
        assert_eq!(report["compression_failed"], 0);
        assert_eq!(report["bytes_saved"], 997);
        assert_eq!(
            report["message"],
            "Uploaded 2 file(s), saved 997 B through compression."
        );
        assert_eq!(report["files"][0]["stored_as"], "take.mp3");
        assert_eq!(report["files"][0]["compressed"], true);
        assert_eq!(report["files"][1]["stored_as"], "plain.mp3");
        assert_eq!(report["files"][1]["compressed"], false);

        let files = server.state.library.files();
        assert!(files.exists("take.mp3"));
        assert!(!files.exists("take.wav"));
    }

    #[tokio::test]
    async fn compression_failure_is_reported_per_file() {
        let server = compressing_server().await;
        let token = server.login().await;

        let body = multipart_body(&[
            ("good.flac", &[0u8; 500][..]),
            ("bad.wav", &[0u8; 400][..]),
            ("notes.txt", &b"hello"[..]),
        ]);
        let report: Value = server
            .client
            .post(server.url("/library/upload"))
            .bearer_auth(&token)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(report["uploaded"], 2);
        assert_eq!(report["failed"], 1);
        assert_eq!(report["compressed"], 1);
        assert_eq!(report["compression_failed"], 1);
        assert_eq!(
            report["message"],
            "Uploaded 2 file(s), saved 497 B through compression. 1 file(s) failed. \
             1 file(s) could not be compressed and were kept as uploaded."
        );
        assert_eq!(report["files"][0]["stored_as"], "good.mp3");
        assert!(report["files"][0]["compression_error"].is_null());
        assert_eq!(report["files"][1]["stored_as"], "bad.wav");
        assert_eq!(report["files"][1]["compressed"], false);
        assert_eq!(
            report["files"][1]["compression_error"],
            "ffmpeg failed: unsupported sample format"
        );
        assert!(report["files"][1]["error"].is_null());
        assert_eq!(report["sync"]["imported"], 2);

        let files = server.state.library.files();
        assert!(files.exists("bad.wav"));
        assert!(!files.exists("bad.mp3"));
    }

    #[tokio::test]
    async fn upload_without_files_is_rejected() {
        let server = TestServer::start().await;
        let token = server.login().await;
        let response = server
            .client
            .post(server.url("/library/upload"))
            .bearer_auth(&token)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhi\r\n--{b}--\r\n",
                b = BOUNDARY
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }
}
