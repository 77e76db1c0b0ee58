use axum::extract::{Query, State};
use axum::Json;
use tracing::info;

use crate::magnet::MagnetSearchResult;
use crate::state::{AppState, TorrentQuery};

/// Failures come back inside the result with their kind, not as an HTTP error.
pub async fn search_torrents(
    State(state): State<AppState>,
    Query(query): Query<TorrentQuery>,
) -> Json<MagnetSearchResult> {
    let query = query.query.unwrap_or_default();
    let result = state.magnet.search_audio(&query).await;
    if result.is_success() {
        info!("Torrent search {:?}: {} results", query.trim(), result.results.len());
    }
    Json(result)
}

#[cfg(test)]
mod tests {
    use crate::api::testing::TestServer;
    use serde_json::Value;

    #[tokio::test]
    async fn reports_errors_in_body() {
        let server = TestServer::start().await;
        let token = server.login().await;

        let body: Value = server
            .client
            .get(server.url("/search/torrents"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["error"]["kind"], "empty_request");
        assert_eq!(body["error"]["message"], "Query is empty.");
        assert_eq!(body["results"].as_array().unwrap().len(), 0);

        let body: Value = server
            .client
            .get(server.url("/search/torrents?query=daft%20punk"))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["error"]["kind"], "network_error");
    }
}
