use std::collections::HashMap;

use common::{format_bytes, now_secs, Album, Artist, Track};
use metadata::{ArtworkUpdate, TrackTagUpdate};
use redb::{ReadableTable, WriteTransaction};
use serde::Serialize;
use tracing::warn;

use crate::query::load_album;
use crate::store::{
    album_name_key, delete_track_rows, find_album_by_name, find_artist_by_name,
    get_or_create_album, get_or_create_artists, get_row, ids_with_prefix, load_track, name_key,
    next_id, parse_id, prefix_key, prefix_range, put_album, put_artist, put_track,
    set_track_artists, split_key_last, track_artist_key, ALBUMS_BY_NAME_TABLE, ALBUMS_TABLE,
    ALBUM_SEQ, ALBUM_TRACKS_TABLE, ARTISTS_BY_NAME_TABLE, ARTISTS_TABLE, ARTIST_SEQ,
    ARTIST_TRACKS_TABLE, TRACKS_BY_FILE_TABLE, TRACKS_TABLE, TRACK_ARTISTS_TABLE,
};
use crate::{Library, LibraryError};

#[derive(Clone, Debug)]
pub struct AlbumSummary {
    pub album: Album,
    pub track_count: usize,
}

/// Tracks are ordered by track number (unknown last), then title.
#[derive(Clone, Debug)]
pub struct AlbumDetails {
    pub album: Album,
    pub tracks: Vec<Track>,
}

#[derive(Clone, Debug)]
pub struct ArtistSummary {
    pub artist: Artist,
    pub track_count: usize,
}

#[derive(Clone, Debug)]
pub struct ArtistTrack {
    pub track: Track,
    pub album: Option<Album>,
}

#[derive(Clone, Debug)]
pub struct ArtistDetails {
    pub artist: Artist,
    pub tracks: Vec<ArtistTrack>,
}

#[derive(Clone, Debug, Serialize)]
pub struct StorageStats {
    pub tracks: usize,
    pub albums: usize,
    pub artists: usize,
    pub files: usize,
    pub total_bytes: u64,
    pub total_display: String,
}

/// Edits applied to a track and mirrored into its file's tags.
#[derive(Clone, Debug)]
pub struct TrackEdit {
    pub title: Option<String>,
    pub track_number: u32,
    pub album_id: Option<u64>,
    /// Takes precedence over `album_id`; resolved or created by name.
    pub new_album_name: Option<String>,
    pub artist_ids: Vec<u64>,
    pub new_artist_names: Vec<String>,
    pub artwork: ArtworkUpdate,
}

#[derive(Clone, Debug)]
pub struct TrackUpdateOutcome {
    pub track: Track,
    /// Set when the catalog was updated but the file's tags could not be.
    pub tag_error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AlbumEdit {
    pub name: String,
    pub release_year: Option<i32>,
    pub artwork: ArtworkUpdate,
}

#[derive(Clone, Debug)]
pub struct ArtistEdit {
    pub name: String,
    pub bio: Option<String>,
}

impl Library {
    pub fn get_track(&self, id: u64) -> Result<Option<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let tracks = read_txn.open_table(TRACKS_TABLE)?;
        get_row(&tracks, id)
    }

    pub fn get_track_by_file_name(&self, file_name: &str) -> Result<Option<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let by_file = read_txn.open_table(TRACKS_BY_FILE_TABLE)?;
        let id = match by_file.get(file_name)? {
            Some(value) => value.value(),
            None => return Ok(None),
        };
        let tracks = read_txn.open_table(TRACKS_TABLE)?;
        get_row(&tracks, id)
    }

    pub fn update_track(&self, id: u64, edit: TrackEdit) -> Result<TrackUpdateOutcome, LibraryError> {
        let now = now_secs();
        let write_txn = self.db.begin_write()?;
        let (track, album_name, artist_names) = {
            let previous = load_track(&write_txn, id)?
                .ok_or_else(|| LibraryError::NotFound(format!("track {}", id)))?;

            let album = match edit.new_album_name.as_deref().map(str::trim) {
                Some(name) if !name.is_empty() => Some(get_or_create_album(&write_txn, name, now)?),
                _ => match edit.album_id {
                    Some(album_id) => Some(require_album(&write_txn, album_id)?),
                    None => None,
                },
            };

            let mut artist_ids = Vec::new();
            for artist_id in &edit.artist_ids {
                require_artist(&write_txn, *artist_id)?;
                if !artist_ids.contains(artist_id) {
                    artist_ids.push(*artist_id);
                }
            }
            for artist_id in get_or_create_artists(&write_txn, &edit.new_artist_names, now)? {
                if !artist_ids.contains(&artist_id) {
                    artist_ids.push(artist_id);
                }
            }

            let mut track = previous.clone();
            track.title = edit
                .title
                .as_deref()
                .map(str::trim)
                .filter(|title| !title.is_empty())
                .map(str::to_string);
            track.track_number = edit.track_number;
            track.album_id = album.as_ref().map(|album| album.id);
            match &edit.artwork {
                ArtworkUpdate::Keep => {}
                ArtworkUpdate::Replace(data) => track.album_art = Some(data.clone()),
                ArtworkUpdate::Remove => track.album_art = None,
            }
            track.updated_at = now;

            put_track(&write_txn, &track, Some(&previous))?;
            set_track_artists(&write_txn, id, &artist_ids)?;

            let mut artist_names = Vec::new();
            for artist_id in &artist_ids {
                artist_names.push(require_artist(&write_txn, *artist_id)?.name);
            }
            (track, album.map(|album| album.name), artist_names)
        };
        write_txn.commit()?;

        let update = TrackTagUpdate {
            title: track.title.clone(),
            track_number: track.track_number,
            album: album_name,
            artists: artist_names,
            artwork: edit.artwork,
        };
        let path = self.files.file_path(&track.file_name);
        let tag_error = match self.tags.write_tags(&path, &update) {
            Ok(()) => None,
            Err(err) => {
                warn!("Failed to write tags for {:?}: {}", track.file_name, err);
                Some(err.to_string())
            }
        };
        Ok(TrackUpdateOutcome { track, tag_error })
    }

    /// Removes the row, its joins and the file, so the next sync does not re-import it.
    pub fn delete_track(&self, id: u64) -> Result<Track, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let track = delete_track_rows(&write_txn, id)?
            .ok_or_else(|| LibraryError::NotFound(format!("track {}", id)))?;
        write_txn.commit()?;

        if let Err(err) = self.files.delete(&track.file_name) {
            warn!("Failed to delete file {:?}: {}", track.file_name, err);
        }
        Ok(track)
    }

    /// Ordered by name.
    pub fn list_albums(&self) -> Result<Vec<AlbumSummary>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let by_name = read_txn.open_table(ALBUMS_BY_NAME_TABLE)?;
        let albums = read_txn.open_table(ALBUMS_TABLE)?;
        let album_tracks = read_txn.open_table(ALBUM_TRACKS_TABLE)?;

        let mut items = Vec::new();
        for entry in by_name.iter()? {
            let entry = entry?;
            let album_id = entry.1.value();
            if let Some(album) = get_row::<Album, _>(&albums, album_id)? {
                let track_count = ids_with_prefix(&album_tracks, &prefix_key(album_id))?.len();
                items.push(AlbumSummary { album, track_count });
            }
        }
        Ok(items)
    }

    pub fn get_album(&self, id: u64) -> Result<Option<AlbumDetails>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let album: Album = {
            let albums = read_txn.open_table(ALBUMS_TABLE)?;
            match get_row(&albums, id)? {
                Some(album) => album,
                None => return Ok(None),
            }
        };
        let album_tracks = read_txn.open_table(ALBUM_TRACKS_TABLE)?;
        let track_table = read_txn.open_table(TRACKS_TABLE)?;
        let mut tracks = Vec::new();
        for track_id in ids_with_prefix(&album_tracks, &prefix_key(id))? {
            if let Some(track) = get_row::<Track, _>(&track_table, track_id)? {
                tracks.push(track);
            }
        }
        sort_album_tracks(&mut tracks);
        Ok(Some(AlbumDetails { album, tracks }))
    }

    pub fn get_album_by_name(&self, name: &str) -> Result<Option<Album>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let by_name = read_txn.open_table(ALBUMS_BY_NAME_TABLE)?;
        let id = match find_album_by_name(&by_name, name)? {
            Some(id) => id,
            None => return Ok(None),
        };
        let albums = read_txn.open_table(ALBUMS_TABLE)?;
        get_row(&albums, id)
    }

    pub fn create_album(
        &self,
        name: &str,
        release_year: Option<i32>,
        album_art: Option<Vec<u8>>,
    ) -> Result<Album, LibraryError> {
        let name = required_name(name, "album")?;
        let write_txn = self.db.begin_write()?;
        let album = Album {
            id: next_id(&write_txn, ALBUM_SEQ)?,
            name,
            release_year,
            album_art,
            created_at: now_secs(),
        };
        put_album(&write_txn, &album, None)?;
        write_txn.commit()?;
        Ok(album)
    }

    pub fn get_or_create_album(&self, name: &str) -> Result<Album, LibraryError> {
        let name = required_name(name, "album")?;
        let write_txn = self.db.begin_write()?;
        let album = get_or_create_album(&write_txn, &name, now_secs())?;
        write_txn.commit()?;
        Ok(album)
    }

    pub fn update_album(&self, id: u64, edit: AlbumEdit) -> Result<Album, LibraryError> {
        let name = required_name(&edit.name, "album")?;
        let write_txn = self.db.begin_write()?;
        let album = {
            let previous = require_album(&write_txn, id)?;
            let mut album = previous.clone();
            album.name = name;
            album.release_year = edit.release_year;
            match edit.artwork {
                ArtworkUpdate::Keep => {}
                ArtworkUpdate::Replace(data) => album.album_art = Some(data),
                ArtworkUpdate::Remove => album.album_art = None,
            }
            put_album(&write_txn, &album, Some(&previous))?;
            album
        };
        write_txn.commit()?;
        Ok(album)
    }

    /// Tracks on the album stay in the catalog without an album.
    pub fn delete_album(&self, id: u64) -> Result<Album, LibraryError> {
        let now = now_secs();
        let write_txn = self.db.begin_write()?;
        let album = {
            let album = require_album(&write_txn, id)?;
            let track_ids = {
                let album_tracks = write_txn.open_table(ALBUM_TRACKS_TABLE)?;
                ids_with_prefix(&album_tracks, &prefix_key(id))?
            };
            for track_id in track_ids {
                if let Some(previous) = load_track(&write_txn, track_id)? {
                    let mut track = previous.clone();
                    track.album_id = None;
                    track.updated_at = now;
                    put_track(&write_txn, &track, Some(&previous))?;
                }
            }
            {
                let mut by_name = write_txn.open_table(ALBUMS_BY_NAME_TABLE)?;
                by_name.remove(album_name_key(&album.name, id).as_str())?;
            }
            let mut albums = write_txn.open_table(ALBUMS_TABLE)?;
            albums.remove(id)?;
            album
        };
        write_txn.commit()?;
        Ok(album)
    }

    /// Ordered by name.
    pub fn list_artists(&self) -> Result<Vec<ArtistSummary>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let by_name = read_txn.open_table(ARTISTS_BY_NAME_TABLE)?;
        let artists = read_txn.open_table(ARTISTS_TABLE)?;
        let artist_tracks = read_txn.open_table(ARTIST_TRACKS_TABLE)?;

        let mut items = Vec::new();
        for entry in by_name.iter()? {
            let entry = entry?;
            let artist_id = entry.1.value();
            if let Some(artist) = get_row::<Artist, _>(&artists, artist_id)? {
                let (start, end) = prefix_range(&prefix_key(artist_id));
                let track_count = artist_tracks.range(start.as_str()..end.as_str())?.count();
                items.push(ArtistSummary {
                    artist,
                    track_count,
                });
            }
        }
        Ok(items)
    }

    pub fn get_artist(&self, id: u64) -> Result<Option<ArtistDetails>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let artist: Artist = {
            let artists = read_txn.open_table(ARTISTS_TABLE)?;
            match get_row(&artists, id)? {
                Some(artist) => artist,
                None => return Ok(None),
            }
        };

        let track_ids = {
            let artist_tracks = read_txn.open_table(ARTIST_TRACKS_TABLE)?;
            let (start, end) = prefix_range(&prefix_key(id));
            let mut ids = Vec::new();
            for entry in artist_tracks.range(start.as_str()..end.as_str())? {
                let entry = entry?;
                let (_, track_id) = split_key_last(entry.0.value())?;
                ids.push(parse_id(track_id)?);
            }
            ids
        };

        let track_table = read_txn.open_table(TRACKS_TABLE)?;
        let mut album_cache = HashMap::new();
        let mut tracks = Vec::new();
        for track_id in track_ids {
            if let Some(track) = get_row::<Track, _>(&track_table, track_id)? {
                let album = match track.album_id {
                    Some(album_id) => load_album(&read_txn, album_id, &mut album_cache)?,
                    None => None,
                };
                tracks.push(ArtistTrack { track, album });
            }
        }
        tracks.sort_by(|a, b| {
            a.track
                .display_title()
                .to_lowercase()
                .cmp(&b.track.display_title().to_lowercase())
                .then(a.track.id.cmp(&b.track.id))
        });
        Ok(Some(ArtistDetails { artist, tracks }))
    }

    /// Fails when another artist already uses the name, ignoring case.
    pub fn create_artist(&self, name: &str, bio: Option<String>) -> Result<Artist, LibraryError> {
        let name = required_name(name, "artist")?;
        let write_txn = self.db.begin_write()?;
        if find_artist_by_name(&write_txn, &name)?.is_some() {
            return Err(duplicate_artist(&name));
        }
        let artist = Artist {
            id: next_id(&write_txn, ARTIST_SEQ)?,
            name,
            bio: clean_bio(bio),
            created_at: now_secs(),
        };
        put_artist(&write_txn, &artist, None)?;
        write_txn.commit()?;
        Ok(artist)
    }

    pub fn update_artist(&self, id: u64, edit: ArtistEdit) -> Result<Artist, LibraryError> {
        let name = required_name(&edit.name, "artist")?;
        let write_txn = self.db.begin_write()?;
        let artist = {
            let previous = require_artist(&write_txn, id)?;
            if name_key(&previous.name) != name_key(&name)
                && find_artist_by_name(&write_txn, &name)?.is_some()
            {
                return Err(duplicate_artist(&name));
            }
            let artist = Artist {
                name,
                bio: clean_bio(edit.bio),
                ..previous.clone()
            };
            put_artist(&write_txn, &artist, Some(&previous))?;
            artist
        };
        write_txn.commit()?;
        Ok(artist)
    }

    /// Deletes the artist and every track join that references them.
    pub fn delete_artist(&self, id: u64) -> Result<Artist, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let artist = {
            let artist = require_artist(&write_txn, id)?;
            let joins: Vec<(String, u64)> = {
                let artist_tracks = write_txn.open_table(ARTIST_TRACKS_TABLE)?;
                let (start, end) = prefix_range(&prefix_key(id));
                let mut joins = Vec::new();
                for entry in artist_tracks.range(start.as_str()..end.as_str())? {
                    let entry = entry?;
                    joins.push((entry.0.value().to_string(), entry.1.value()));
                }
                joins
            };
            {
                let mut artist_tracks = write_txn.open_table(ARTIST_TRACKS_TABLE)?;
                let mut track_artists = write_txn.open_table(TRACK_ARTISTS_TABLE)?;
                for (key, position) in joins {
                    let (_, track_id) = split_key_last(&key)?;
                    let track_id = parse_id(track_id)?;
                    track_artists.remove(track_artist_key(track_id, position, id).as_str())?;
                    artist_tracks.remove(key.as_str())?;
                }
            }
            {
                let mut by_name = write_txn.open_table(ARTISTS_BY_NAME_TABLE)?;
                by_name.remove(name_key(&artist.name).as_str())?;
            }
            let mut artists = write_txn.open_table(ARTISTS_TABLE)?;
            artists.remove(id)?;
            artist
        };
        write_txn.commit()?;
        Ok(artist)
    }

    pub fn get_or_create_artists(&self, names: &[String]) -> Result<Vec<Artist>, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let artists = {
            let ids = get_or_create_artists(&write_txn, names, now_secs())?;
            let mut artists = Vec::new();
            for id in ids {
                artists.push(require_artist(&write_txn, id)?);
            }
            artists
        };
        write_txn.commit()?;
        Ok(artists)
    }

    pub fn storage_stats(&self) -> Result<StorageStats, LibraryError> {
        let (tracks, albums, artists) = {
            let read_txn = self.db.begin_read()?;
            let tracks = read_txn.open_table(TRACKS_TABLE)?.len()? as usize;
            let albums = read_txn.open_table(ALBUMS_TABLE)?.len()? as usize;
            let artists = read_txn.open_table(ARTISTS_TABLE)?.len()? as usize;
            (tracks, albums, artists)
        };
        let files = self.files.file_names()?.len();
        let total_bytes = self.files.total_storage_used()?;
        Ok(StorageStats {
            tracks,
            albums,
            artists,
            files,
            total_bytes,
            total_display: format_bytes(total_bytes),
        })
    }
}

fn require_album(txn: &WriteTransaction, id: u64) -> Result<Album, LibraryError> {
    let albums = txn.open_table(ALBUMS_TABLE)?;
    get_row(&albums, id)?.ok_or_else(|| LibraryError::NotFound(format!("album {}", id)))
}

fn require_artist(txn: &WriteTransaction, id: u64) -> Result<Artist, LibraryError> {
    let artists = txn.open_table(ARTISTS_TABLE)?;
    get_row(&artists, id)?.ok_or_else(|| LibraryError::NotFound(format!("artist {}", id)))
}

fn required_name(name: &str, kind: &str) -> Result<String, LibraryError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(LibraryError::Invalid(format!("{} name is required", kind)));
    }
    Ok(trimmed.to_string())
}

fn clean_bio(bio: Option<String>) -> Option<String> {
    bio.map(|bio| bio.trim().to_string())
        .filter(|bio| !bio.is_empty())
}

fn duplicate_artist(name: &str) -> LibraryError {
    LibraryError::Conflict(format!("Artist with name '{}' already exists", name))
}

/// Track number ascending with unknown (0) last, then title or file name.
fn sort_album_tracks(tracks: &mut [Track]) {
    tracks.sort_by(|a, b| {
        let a_key = (a.track_number == 0, a.track_number);
        let b_key = (b.track_number == 0, b.track_number);
        a_key
            .cmp(&b_key)
            .then_with(|| {
                a.display_title()
                    .to_lowercase()
                    .cmp(&b.display_title().to_lowercase())
            })
            .then(a.id.cmp(&b.id))
    });
}
