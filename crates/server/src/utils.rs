use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use library::LibraryError;

use crate::auth::SessionToken;
use crate::state::ErrorResponse;

pub const SESSION_COOKIE: &str = "phono_session";

pub fn json_error(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn json_error_response(status: StatusCode, message: impl Into<String>) -> Response {
    json_error(status, message).into_response()
}

pub fn library_error(err: LibraryError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        LibraryError::NotFound(_) => StatusCode::NOT_FOUND,
        LibraryError::Conflict(_) => StatusCode::CONFLICT,
        LibraryError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_error(status, err.to_string())
}

/// Runs synchronous library work off the async runtime.
pub async fn blocking<T, F>(task: F) -> Result<T, (StatusCode, Json<ErrorResponse>)>
where
    F: FnOnce() -> Result<T, LibraryError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(library_error(err)),
        Err(err) => Err(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("task failed: {}", err),
        )),
    }
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }
    let cookie = headers.get(header::COOKIE)?.to_str().ok()?;
    parse_cookie_value(cookie, SESSION_COOKIE)
}

fn parse_cookie_value(cookie: &str, name: &str) -> Option<String> {
    for part in cookie.split(';') {
        let mut iter = part.trim().splitn(2, '=');
        let key = iter.next()?.trim();
        let value = iter.next()?.trim();
        if key == name && !value.is_empty() {
            return Some(value.to_string());
        }
    }
    None
}

pub fn session_cookie_header(session: &SessionToken, ttl: Duration) -> HeaderValue {
    let value = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        SESSION_COOKIE,
        session.token,
        ttl.as_secs()
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| clear_session_cookie())
}

pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("phono_session=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0")
}

/// Accepts plain base64 or a `data:image/...;base64,` URL.
pub fn decode_base64_art(value: &str) -> Result<Vec<u8>, String> {
    let data = match value.split_once(";base64,") {
        Some((_, data)) => data,
        None => value,
    };
    base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|err| format!("invalid album art: {}", err))
}

pub fn url_escape(input: &str) -> String {
    let mut out = String::new();
    for byte in input.as_bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(*byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_from_bearer_or_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("a=1; phono_session=abc"));
        assert_eq!(extract_token(&headers).as_deref(), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz "));
        assert_eq!(extract_token(&headers).as_deref(), Some("xyz"));

        assert_eq!(extract_token(&HeaderMap::new()), None);
    }

    #[test]
    fn escapes_path_segments() {
        assert_eq!(url_escape("Daft Punk/Discovery"), "Daft%20Punk%2FDiscovery");
        assert_eq!(url_escape("a-b_c.d~"), "a-b_c.d~");
        assert_eq!(url_escape("é"), "%C3%A9");
    }

    #[test]
    fn decodes_data_urls() {
        assert_eq!(decode_base64_art("AQID").unwrap(), vec![1, 2, 3]);
        assert_eq!(
            decode_base64_art("data:image/png;base64,AQID").unwrap(),
            vec![1, 2, 3]
        );
        assert!(decode_base64_art("***").is_err());
    }

    #[test]
    fn maps_library_errors_to_status() {
        let (status, _) = library_error(LibraryError::NotFound("track 1".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = library_error(LibraryError::Conflict("taken".to_string()));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.0.error, "taken");
    }
}
