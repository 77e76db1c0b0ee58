use std::io::SeekFrom;
use std::path::Path;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::utils::json_error_response;

/// Inclusive byte positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ByteRange {
    start: u64,
    end: u64,
}

impl ByteRange {
    fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RangeRequest {
    Full,
    Partial(ByteRange),
    Unsatisfiable,
}

/// Single `bytes=` ranges only. Malformed or multi-range headers get the whole file.
fn requested_range(value: Option<&str>, size: u64) -> RangeRequest {
    let ranges = match value.and_then(|value| value.trim().strip_prefix("bytes=")) {
        Some(ranges) if !ranges.contains(',') => ranges.trim(),
        _ => return RangeRequest::Full,
    };
    let (first, last) = match ranges.split_once('-') {
        Some(parts) => parts,
        None => return RangeRequest::Full,
    };
    let last_index = match size.checked_sub(1) {
        Some(index) => index,
        None => return RangeRequest::Unsatisfiable,
    };

    if first.is_empty() {
        // Suffix form: the final `n` bytes.
        return match last.parse::<u64>() {
            Ok(0) => RangeRequest::Unsatisfiable,
            Ok(count) => RangeRequest::Partial(ByteRange {
                start: size.saturating_sub(count),
                end: last_index,
            }),
            Err(_) => RangeRequest::Full,
        };
    }

    let start = match first.parse::<u64>() {
        Ok(start) => start,
        Err(_) => return RangeRequest::Full,
    };
    if start > last_index {
        return RangeRequest::Unsatisfiable;
    }
    let end = if last.is_empty() {
        last_index
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => end.min(last_index),
            _ => return RangeRequest::Full,
        }
    };
    RangeRequest::Partial(ByteRange { start, end })
}

/// Serves embedded artwork with a content hash ETag.
pub fn cover_response(data: Vec<u8>, headers: &HeaderMap) -> Response {
    let etag = format!("\"{}\"", blake3::hash(&data).to_hex());
    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(',').any(|tag| tag.trim() == etag))
        .unwrap_or(false);

    let mime = metadata::guess_image_mime(&data);
    let mut response = if not_modified {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NOT_MODIFIED;
        response
    } else {
        let mut response = Response::new(Body::from(data));
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
        response
    };
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=86400"),
    );
    if let Ok(value) = HeaderValue::from_str(&etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    response
}

/// Streams an audio file, honouring a single `Range` request.
pub async fn file_response(path: &Path, headers: &HeaderMap) -> Response {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(_) => return json_error_response(StatusCode::NOT_FOUND, "file not found"),
    };
    let size = match file.metadata().await {
        Ok(meta) => meta.len(),
        Err(err) => {
            return json_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to read file: {}", err),
            )
        }
    };
    let mime = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();

    let range = match requested_range(
        headers.get(header::RANGE).and_then(|v| v.to_str().ok()),
        size,
    ) {
        RangeRequest::Full => None,
        RangeRequest::Partial(range) => Some(range),
        RangeRequest::Unsatisfiable => {
            let mut response =
                json_error_response(StatusCode::RANGE_NOT_SATISFIABLE, "range not satisfiable");
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            return response;
        }
    };

    let (status, body, length) = match range {
        Some(range) => {
            if let Err(err) = file.seek(SeekFrom::Start(range.start)).await {
                return json_error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("failed to seek: {}", err),
                );
            }
            let length = range.len();
            let body = Body::from_stream(ReaderStream::new(file.take(length)));
            (StatusCode::PARTIAL_CONTENT, body, length)
        }
        None => (StatusCode::OK, Body::from_stream(ReaderStream::new(file)), size),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    let response_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&mime) {
        response_headers.insert(header::CONTENT_TYPE, value);
    }
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Some(range) = range {
        let value = format!("bytes {}-{}/{}", range.start, range.end, size);
        if let Ok(value) = HeaderValue::from_str(&value) {
            response_headers.insert(header::CONTENT_RANGE, value);
        }
    }
    response
}
