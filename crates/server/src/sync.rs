use library::{LibraryError, SyncReport};
use tracing::warn;

use crate::state::AppState;

/// Runs a full sync on the blocking pool. Concurrent callers queue behind the gate.
pub async fn run_full_sync(state: &AppState) -> Result<SyncReport, LibraryError> {
    let _guard = state.sync_gate.lock().await;
    let library = state.library.clone();
    match tokio::task::spawn_blocking(move || library.full_sync()).await {
        Ok(result) => result,
        Err(err) => {
            warn!("Sync task failed: {}", err);
            Err(LibraryError::Io(std::io::Error::other(err.to_string())))
        }
    }
}
