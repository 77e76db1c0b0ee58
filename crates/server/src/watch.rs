use std::path::PathBuf;
use std::time::Duration;

use common::is_audio_file;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::state::AppState;
use crate::sync::run_full_sync;

pub fn configure_watcher(state: &AppState, root: PathBuf) {
    let config = state.config.read().clone();
    if !config.watch_uploads {
        info!("Watcher disabled (watch_uploads=false)");
        *state.watcher.write() = None;
        return;
    }

    let watch_debounce = Duration::from_secs(config.watch_debounce_secs.max(1));
    match setup_watcher(state.clone(), root.clone(), watch_debounce) {
        Ok(watcher) => {
            info!(
                "Watching {} for changes (debounce {}s)",
                root.display(),
                watch_debounce.as_secs()
            );
            *state.watcher.write() = Some(watcher);
        }
        Err(err) => {
            warn!("Failed to start watcher: {}", err);
            *state.watcher.write() = None;
        }
    }
}

fn setup_watcher(
    state: AppState,
    root: PathBuf,
    debounce: Duration,
) -> Result<RecommendedWatcher, notify::Error> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        NotifyConfig::default(),
    )?;

    // The uploads directory is flat.
    watcher.watch(&root, RecursiveMode::NonRecursive)?;

    tokio::spawn(async move {
        watch_loop(state, rx, debounce).await;
    });

    Ok(watcher)
}

async fn watch_loop(state: AppState, mut rx: UnboundedReceiver<Event>, debounce: Duration) {
    loop {
        let event = match rx.recv().await {
            Some(event) => event,
            None => break,
        };
        if !is_relevant_event(&event) {
            continue;
        }
        if !wait_until_quiet(&mut rx, debounce).await {
            return;
        }
        match run_full_sync(&state).await {
            Ok(report) => info!(
                "Auto-sync complete: {} imported, {} removed, {} failed",
                report.imported, report.removed, report.failed
            ),
            Err(err) => warn!("Auto-sync failed: {}", err),
        }
    }
}

/// Waits until no relevant event has arrived for `debounce`. Returns false once the channel closes.
async fn wait_until_quiet(rx: &mut UnboundedReceiver<Event>, debounce: Duration) -> bool {
    let mut deadline = Instant::now() + debounce;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return true,
            maybe_event = rx.recv() => match maybe_event {
                Some(event) if is_relevant_event(&event) => {
                    deadline = Instant::now() + debounce;
                }
                Some(_) => {}
                None => return false,
            },
        }
    }
}

/// Creations, writes and removals of audio files. Transcoder scratch files are ignored.
fn is_relevant_event(event: &Event) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    event.paths.iter().any(|path| {
        path.file_name()
            .map(|name| name.to_string_lossy())
            .map(|name| !name.starts_with("temp_") && is_audio_file(&name))
            .unwrap_or(false)
    })
}
