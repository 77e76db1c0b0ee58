use std::collections::{HashMap, HashSet};
use std::path::Path;

use common::{is_audio_file, now_secs, Track};
use metadata::{read_track_tags, write_track_tags, MetadataError, TrackTagUpdate, TrackTags};
use redb::ReadableTable;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::store::{
    delete_track_rows, get_or_create_album, get_or_create_artists, next_id, put_track,
    set_track_artists, TRACKS_BY_FILE_TABLE, TRACK_SEQ,
};
use crate::{Library, LibraryError};

/// Reads and writes embedded tags. The default goes through lofty.
pub trait TagAccess: Send + Sync {
    fn read_tags(&self, path: &Path) -> Result<TrackTags, MetadataError>;
    fn write_tags(&self, path: &Path, update: &TrackTagUpdate) -> Result<(), MetadataError>;
}

pub struct LoftyTags;

impl TagAccess for LoftyTags {
    fn read_tags(&self, path: &Path) -> Result<TrackTags, MetadataError> {
        read_track_tags(path)
    }

    fn write_tags(&self, path: &Path, update: &TrackTagUpdate) -> Result<(), MetadataError> {
        write_track_tags(path, update)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub imported: usize,
    pub removed: usize,
    pub failed: usize,
}

impl Library {
    /// Imports untracked files, then drops rows whose file is gone.
    pub fn full_sync(&self) -> Result<SyncReport, LibraryError> {
        let (imported, import_failed) = self.import_new_files()?;
        let (removed, remove_failed) = self.cleanup_missing_files()?;
        let report = SyncReport {
            imported,
            removed,
            failed: import_failed + remove_failed,
        };
        if imported > 0 || removed > 0 || report.failed > 0 {
            info!(
                "Sync complete: {} imported, {} removed, {} failed",
                report.imported, report.removed, report.failed
            );
        }
        Ok(report)
    }

    /// Returns `(imported, failed)`. A failing file is logged and skipped.
    pub fn import_new_files(&self) -> Result<(usize, usize), LibraryError> {
        let present = self.files.file_names()?;
        let tracked: HashSet<String> = self.tracked_files()?.into_keys().collect();

        let mut imported = 0usize;
        let mut failed = 0usize;
        for name in present {
            if tracked.contains(&name) || !is_audio_file(&name) {
                continue;
            }
            match self.import_file(&name) {
                Ok(track) => {
                    debug!("Imported {:?} as track {}", name, track.id);
                    imported += 1;
                }
                Err(err) => {
                    warn!("Failed to import {:?}: {}", name, err);
                    failed += 1;
                }
            }
        }
        Ok((imported, failed))
    }

    /// Imports one file from the uploads directory. Already tracked files are returned as is.
    pub fn import_file(&self, file_name: &str) -> Result<Track, LibraryError> {
        if let Some(track) = self.get_track_by_file_name(file_name)? {
            return Ok(track);
        }

        let tags = self.tags.read_tags(&self.files.file_path(file_name))?;
        let now = now_secs();

        let write_txn = self.db.begin_write()?;
        let track = {
            let album_id = match tags.album.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => {
                    Some(get_or_create_album(&write_txn, name, now)?.id)
                }
                _ => None,
            };
            let artist_ids = get_or_create_artists(&write_txn, &tags.artists, now)?;

            let track = Track {
                id: next_id(&write_txn, TRACK_SEQ)?,
                file_name: file_name.to_string(),
                title: tags.title,
                track_number: tags.track_number,
                album_id,
                album_art: tags.cover_art,
                created_at: now,
                updated_at: now,
            };
            put_track(&write_txn, &track, None)?;
            set_track_artists(&write_txn, track.id, &artist_ids)?;
            track
        };
        write_txn.commit()?;
        Ok(track)
    }

    /// Deletes every track whose file no longer exists. Returns `(removed, failed)`;
    /// each row is removed in its own transaction so one failure skips only that row.
    pub fn cleanup_missing_files(&self) -> Result<(usize, usize), LibraryError> {
        let present: HashSet<String> = self.files.file_names()?.into_iter().collect();
        let mut orphans: Vec<(String, u64)> = self
            .tracked_files()?
            .into_iter()
            .filter(|(name, _)| !present.contains(name))
            .collect();
        orphans.sort();

        let mut removed = 0usize;
        let mut failed = 0usize;
        for (name, id) in orphans {
            match self.remove_orphan(id) {
                Ok(true) => {
                    debug!("Removed track {} for missing file {:?}", id, name);
                    removed += 1;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!("Failed to remove track {} for missing file {:?}: {}", id, name, err);
                    failed += 1;
                }
            }
        }
        Ok((removed, failed))
    }

    fn remove_orphan(&self, id: u64) -> Result<bool, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let deleted = delete_track_rows(&write_txn, id)?.is_some();
        write_txn.commit()?;
        Ok(deleted)
    }

    /// File name -> track id for every tracked file.
    pub(crate) fn tracked_files(&self) -> Result<HashMap<String, u64>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRACKS_BY_FILE_TABLE)?;
        let mut out = HashMap::new();
        for entry in table.iter()? {
            let entry = entry?;
            out.insert(entry.0.value().to_string(), entry.1.value());
        }
        Ok(out)
    }
}
