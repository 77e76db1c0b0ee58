use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::utils::url_escape;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MagnetErrorKind {
    EmptyRequest,
    NoDataFound,
    RemoteError,
    HttpError,
    Timeout,
    NetworkError,
    DeserializationError,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MagnetError {
    pub kind: MagnetErrorKind,
    pub message: String,
}

impl MagnetError {
    fn new(kind: MagnetErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for MagnetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for MagnetError {}

/// `images` is either a placeholder string such as `"Na"` or a list of URLs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TorrentImages {
    One(String),
    Many(Vec<String>),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorrentDetails {
    pub category: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub language: Option<String>,
    pub uploader: Option<String>,
    pub downloads: Option<String>,
    pub date_uploaded: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorrentSearchResult {
    pub name: String,
    pub magnet: String,
    pub seeders: String,
    pub leechers: String,
    pub size: String,
    pub date: String,
    pub images: Option<TorrentImages>,
    pub other_details: Option<TorrentDetails>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct MagnetSearchResult {
    pub error: Option<MagnetError>,
    pub results: Vec<TorrentSearchResult>,
}

impl MagnetSearchResult {
    fn failed(kind: MagnetErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: Some(MagnetError::new(kind, message)),
            results: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Deserialize)]
struct RemoteMessage {
    message: String,
}

/// Client for the MagnetAPI torrent search service.
#[derive(Clone)]
pub struct MagnetClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl MagnetClient {
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn audio_search_url(&self, query: &str) -> String {
        format!("{}/pirate-bay/{}/audio", self.base_url, url_escape(query.trim()))
    }

    pub async fn search_audio(&self, query: &str) -> MagnetSearchResult {
        if query.trim().is_empty() {
            return MagnetSearchResult::failed(MagnetErrorKind::EmptyRequest, "Query is empty.");
        }
        let url = self.audio_search_url(query);

        let response = match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(response) => response,
            Err(err) => return transport_failure(&err),
        };
        let status = response.status();
        if !status.is_success() {
            return MagnetSearchResult::failed(
                MagnetErrorKind::HttpError,
                format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("")
                )
                .trim_end()
                .to_string(),
            );
        }
        match response.text().await {
            Ok(body) => classify_body(&body),
            Err(err) => transport_failure(&err),
        }
    }
}

fn transport_failure(err: &reqwest::Error) -> MagnetSearchResult {
    warn!("Torrent search failed: {}", err);
    if err.is_timeout() {
        MagnetSearchResult::failed(MagnetErrorKind::Timeout, "Request timed out.")
    } else if err.is_connect() || err.is_request() {
        MagnetSearchResult::failed(MagnetErrorKind::NetworkError, err.to_string())
    } else {
        MagnetSearchResult::failed(MagnetErrorKind::Unknown, err.to_string())
    }
}

/// A `{"message": ..}` body is an error report; anything else must be a result list.
pub fn classify_body(body: &str) -> MagnetSearchResult {
    if let Ok(remote) = serde_json::from_str::<RemoteMessage>(body) {
        if !remote.message.is_empty() {
            let lower = remote.message.to_lowercase();
            let kind = if lower.contains("empty request") {
                MagnetErrorKind::EmptyRequest
            } else if lower.contains("no data found") {
                MagnetErrorKind::NoDataFound
            } else {
                MagnetErrorKind::RemoteError
            };
            return MagnetSearchResult::failed(kind, remote.message);
        }
    }
    match serde_json::from_str::<Vec<TorrentSearchResult>>(body) {
        Ok(results) => MagnetSearchResult {
            error: None,
            results,
        },
        Err(err) => {
            MagnetSearchResult::failed(MagnetErrorKind::DeserializationError, err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    const RESULTS: &str = r#"[
        {
            "name": "Some Album FLAC",
            "magnet": "magnet:?xt=urn:btih:abc",
            "seeders": "12",
            "leechers": "3",
            "size": "400 MiB",
            "date": "2024-01-01",
            "images": "Na",
            "other_details": {"category": "Audio", "type": "FLAC", "uploader": "someone"}
        },
        {"name": "Other", "magnet": "magnet:?xt=urn:btih:def", "images": ["http://x/1.jpg"]}
    ]"#;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/api/", addr)
    }

    #[test]
    fn parses_result_lists() {
        let result = classify_body(RESULTS);
        assert!(result.is_success());
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.results[0].images, Some(TorrentImages::One("Na".to_string())));
        assert_eq!(
            result.results[1].images,
            Some(TorrentImages::Many(vec!["http://x/1.jpg".to_string()]))
        );
        let details = result.results[0].other_details.as_ref().unwrap();
        assert_eq!(details.kind.as_deref(), Some("FLAC"));
        assert_eq!(result.results[1].seeders, "");
    }

    #[test]
    fn classifies_remote_messages() {
        let kind = |body: &str| classify_body(body).error.unwrap().kind;
        assert_eq!(kind(r#"{"message": "Empty Request"}"#), MagnetErrorKind::EmptyRequest);
        assert_eq!(kind(r#"{"message": "no data found"}"#), MagnetErrorKind::NoDataFound);
        assert_eq!(kind(r#"{"message": "rate limited"}"#), MagnetErrorKind::RemoteError);
        assert_eq!(kind("<html>"), MagnetErrorKind::DeserializationError);
        assert_eq!(kind(r#"{"message": ""}"#), MagnetErrorKind::DeserializationError);
        assert!(classify_body("[]").is_success());
    }

    #[test]
    fn builds_escaped_urls() {
        let client = MagnetClient::new(Client::new(), "http://host/api//", Duration::from_secs(1));
        assert_eq!(
            client.audio_search_url(" daft punk "),
            "http://host/api/pirate-bay/daft%20punk/audio"
        );
    }

    #[tokio::test]
    async fn blank_query_is_rejected_locally() {
        let client = MagnetClient::new(Client::new(), "http://127.0.0.1:9", Duration::from_secs(1));
        let result = client.search_audio("   ").await;
        let error = result.error.unwrap();
        assert_eq!(error.kind, MagnetErrorKind::EmptyRequest);
        assert_eq!(error.message, "Query is empty.");
    }

    #[tokio::test]
    async fn searches_remote_service() {
        let router = Router::new()
            .route("/api/pirate-bay/:query/audio", get(|| async { RESULTS }))
            .route(
                "/down/pirate-bay/:query/audio",
                get(|| async { (StatusCode::BAD_GATEWAY, "") }),
            );
        let base = serve(router).await;

        let client = MagnetClient::new(Client::new(), &base, Duration::from_secs(5));
        let result = client.search_audio("some album").await;
        assert!(result.is_success());
        assert_eq!(result.results[0].name, "Some Album FLAC");

        let down = base.replace("/api/", "/down/");
        let client = MagnetClient::new(Client::new(), &down, Duration::from_secs(5));
        let error = client.search_audio("x").await.error.unwrap();
        assert_eq!(error.kind, MagnetErrorKind::HttpError);
        assert_eq!(error.message, "HTTP 502 Bad Gateway");
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let router = Router::new().route(
            "/api/pirate-bay/:query/audio",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "[]"
            }),
        );
        let base = serve(router).await;
        let client = MagnetClient::new(Client::new(), &base, Duration::from_millis(200));
        let error = client.search_audio("x").await.error.unwrap();
        assert_eq!(error.kind, MagnetErrorKind::Timeout);
        assert_eq!(error.message, "Request timed out.");
    }
}
