use std::collections::HashSet;
use std::fs;
use std::path::Path;

use common::{Album, Artist, Track};
use redb::{Database, ReadableTable, TableDefinition, TableError, WriteTransaction};
use serde::{Deserialize, Serialize};

use crate::LibraryError;

pub(crate) const SCHEMA_VERSION: u32 = 1;
pub(crate) const KEY_SEP: char = '\x1f';

pub(crate) const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
pub(crate) const TRACKS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("tracks");
pub(crate) const TRACKS_BY_FILE_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("tracks_by_file");
pub(crate) const ALBUMS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("albums");
pub(crate) const ALBUMS_BY_NAME_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("albums_by_name");
pub(crate) const ALBUM_TRACKS_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("album_tracks");
pub(crate) const ARTISTS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("artists");
pub(crate) const ARTISTS_BY_NAME_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("artists_by_name");
/// `track ␟ position ␟ artist` -> artist id, so artists keep their tag order.
pub(crate) const TRACK_ARTISTS_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("track_artists");
/// `artist ␟ track` -> position in the track's artist list.
pub(crate) const ARTIST_TRACKS_TABLE: TableDefinition<&str, u64> =
    TableDefinition::new("artist_tracks");

const META_VERSION_KEY: &str = "version";
pub(crate) const TRACK_SEQ: &str = "seq.tracks";
pub(crate) const ALBUM_SEQ: &str = "seq.albums";
pub(crate) const ARTIST_SEQ: &str = "seq.artists";

pub(crate) fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

/// Creates every table and stamps the schema version. Returns true on first run.
pub(crate) fn init_tables(db: &Database) -> Result<bool, LibraryError> {
    let created = match read_version(db)? {
        Some(version) if version == SCHEMA_VERSION => false,
        Some(version) => return Err(LibraryError::VersionMismatch(version)),
        None => true,
    };

    let write_txn = db.begin_write()?;
    {
        let mut meta = write_txn.open_table(META_TABLE)?;
        write_txn.open_table(TRACKS_TABLE)?;
        write_txn.open_table(TRACKS_BY_FILE_TABLE)?;
        write_txn.open_table(ALBUMS_TABLE)?;
        write_txn.open_table(ALBUMS_BY_NAME_TABLE)?;
        write_txn.open_table(ALBUM_TRACKS_TABLE)?;
        write_txn.open_table(ARTISTS_TABLE)?;
        write_txn.open_table(ARTISTS_BY_NAME_TABLE)?;
        write_txn.open_table(TRACK_ARTISTS_TABLE)?;
        write_txn.open_table(ARTIST_TRACKS_TABLE)?;
        if created {
            let bytes = encode_value(&SCHEMA_VERSION)?;
            meta.insert(META_VERSION_KEY, bytes.as_slice())?;
        }
    }
    write_txn.commit()?;
    Ok(created)
}

fn read_version(db: &Database) -> Result<Option<u32>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let version = match table.get(META_VERSION_KEY)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(version)
}

pub(crate) fn next_id(txn: &WriteTransaction, seq: &str) -> Result<u64, LibraryError> {
    let mut meta = txn.open_table(META_TABLE)?;
    let current: u64 = match meta.get(seq)? {
        Some(value) => decode_value(value.value())?,
        None => 0,
    };
    let next = current + 1;
    let bytes = encode_value(&next)?;
    meta.insert(seq, bytes.as_slice())?;
    Ok(next)
}

pub(crate) fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

pub(crate) fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

pub(crate) fn join_key(left: u64, right: u64) -> String {
    let mut out = prefix_key(left);
    out.push_str(&right.to_string());
    out
}

pub(crate) fn album_name_key(name: &str, album_id: u64) -> String {
    let mut out = name_key(name);
    out.push(KEY_SEP);
    out.push_str(&album_id.to_string());
    out
}

pub(crate) fn track_artist_key(track_id: u64, position: u64, artist_id: u64) -> String {
    let mut out = prefix_key(track_id);
    out.push_str(&format!("{:04}", position));
    out.push(KEY_SEP);
    out.push_str(&artist_id.to_string());
    out
}

pub(crate) fn prefix_key(id: impl std::fmt::Display) -> String {
    let mut out = id.to_string();
    out.push(KEY_SEP);
    out
}

/// Half-open key range covering every key that starts with `prefix`.
pub(crate) fn prefix_range(prefix: &str) -> (String, String) {
    let mut end = prefix.to_string();
    end.push('\u{10ffff}');
    (prefix.to_string(), end)
}

pub(crate) fn split_key_last(value: &str) -> Result<(&str, &str), LibraryError> {
    let idx = value
        .rfind(KEY_SEP)
        .ok_or_else(|| LibraryError::KeyParse(value.to_string()))?;
    let next = idx + KEY_SEP.len_utf8();
    Ok((&value[..idx], &value[next..]))
}

pub(crate) fn parse_id(value: &str) -> Result<u64, LibraryError> {
    value
        .parse()
        .map_err(|_| LibraryError::KeyParse(value.to_string()))
}

pub(crate) fn get_row<T, Tb>(table: &Tb, id: u64) -> Result<Option<T>, LibraryError>
where
    T: for<'de> Deserialize<'de>,
    Tb: ReadableTable<u64, &'static [u8]>,
{
    let row = match table.get(id)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(row)
}

/// Ids stored under `prefix ␟ ...` keys, in key order.
pub(crate) fn ids_with_prefix<Tb>(table: &Tb, prefix: &str) -> Result<Vec<u64>, LibraryError>
where
    Tb: ReadableTable<&'static str, u64>,
{
    let (start, end) = prefix_range(prefix);
    let mut ids = Vec::new();
    for entry in table.range(start.as_str()..end.as_str())? {
        let entry = entry?;
        ids.push(entry.1.value());
    }
    Ok(ids)
}

pub(crate) fn put_track(
    txn: &WriteTransaction,
    track: &Track,
    previous: Option<&Track>,
) -> Result<(), LibraryError> {
    {
        let mut tracks = txn.open_table(TRACKS_TABLE)?;
        let bytes = encode_value(track)?;
        tracks.insert(track.id, bytes.as_slice())?;
    }
    {
        let mut by_file = txn.open_table(TRACKS_BY_FILE_TABLE)?;
        if let Some(previous) = previous {
            if previous.file_name != track.file_name {
                by_file.remove(previous.file_name.as_str())?;
            }
        }
        by_file.insert(track.file_name.as_str(), track.id)?;
    }
    let mut album_tracks = txn.open_table(ALBUM_TRACKS_TABLE)?;
    if let Some(old_album) = previous.and_then(|p| p.album_id) {
        if Some(old_album) != track.album_id {
            album_tracks.remove(join_key(old_album, track.id).as_str())?;
        }
    }
    if let Some(album_id) = track.album_id {
        album_tracks.insert(join_key(album_id, track.id).as_str(), track.id)?;
    }
    Ok(())
}

pub(crate) fn load_track(txn: &WriteTransaction, id: u64) -> Result<Option<Track>, LibraryError> {
    let tracks = txn.open_table(TRACKS_TABLE)?;
    get_row(&tracks, id)
}

/// Removes the track row together with its file index and join rows.
pub(crate) fn delete_track_rows(
    txn: &WriteTransaction,
    id: u64,
) -> Result<Option<Track>, LibraryError> {
    let track = match load_track(txn, id)? {
        Some(track) => track,
        None => return Ok(None),
    };
    {
        let mut tracks = txn.open_table(TRACKS_TABLE)?;
        tracks.remove(id)?;
    }
    {
        let mut by_file = txn.open_table(TRACKS_BY_FILE_TABLE)?;
        by_file.remove(track.file_name.as_str())?;
    }
    if let Some(album_id) = track.album_id {
        let mut album_tracks = txn.open_table(ALBUM_TRACKS_TABLE)?;
        album_tracks.remove(join_key(album_id, id).as_str())?;
    }
    set_track_artists(txn, id, &[])?;
    Ok(Some(track))
}

/// Replaces the track's artist joins, keeping the given order and dropping duplicates.
pub(crate) fn set_track_artists(
    txn: &WriteTransaction,
    track_id: u64,
    artist_ids: &[u64],
) -> Result<(), LibraryError> {
    let mut track_artists = txn.open_table(TRACK_ARTISTS_TABLE)?;
    let mut artist_tracks = txn.open_table(ARTIST_TRACKS_TABLE)?;

    let (start, end) = prefix_range(&prefix_key(track_id));
    let mut stale = Vec::new();
    for entry in track_artists.range(start.as_str()..end.as_str())? {
        let entry = entry?;
        stale.push((entry.0.value().to_string(), entry.1.value()));
    }
    for (key, artist_id) in stale {
        track_artists.remove(key.as_str())?;
        artist_tracks.remove(join_key(artist_id, track_id).as_str())?;
    }

    let mut seen = HashSet::new();
    let mut position = 0u64;
    for artist_id in artist_ids {
        if !seen.insert(*artist_id) {
            continue;
        }
        track_artists.insert(
            track_artist_key(track_id, position, *artist_id).as_str(),
            *artist_id,
        )?;
        artist_tracks.insert(join_key(*artist_id, track_id).as_str(), position)?;
        position += 1;
    }
    Ok(())
}

/// Case-insensitive album lookup; the oldest album wins when names repeat.
pub(crate) fn find_album_by_name<Tb>(table: &Tb, name: &str) -> Result<Option<u64>, LibraryError>
where
    Tb: ReadableTable<&'static str, u64>,
{
    let prefix = prefix_key(name_key(name));
    Ok(ids_with_prefix(table, &prefix)?.into_iter().min())
}

pub(crate) fn get_or_create_album(
    txn: &WriteTransaction,
    name: &str,
    now: u64,
) -> Result<Album, LibraryError> {
    let existing = {
        let by_name = txn.open_table(ALBUMS_BY_NAME_TABLE)?;
        find_album_by_name(&by_name, name)?
    };
    if let Some(id) = existing {
        let albums = txn.open_table(ALBUMS_TABLE)?;
        if let Some(album) = get_row(&albums, id)? {
            return Ok(album);
        }
    }
    let album = Album {
        id: next_id(txn, ALBUM_SEQ)?,
        name: name.trim().to_string(),
        release_year: None,
        album_art: None,
        created_at: now,
    };
    put_album(txn, &album, None)?;
    Ok(album)
}

pub(crate) fn put_album(
    txn: &WriteTransaction,
    album: &Album,
    previous: Option<&Album>,
) -> Result<(), LibraryError> {
    {
        let mut albums = txn.open_table(ALBUMS_TABLE)?;
        let bytes = encode_value(album)?;
        albums.insert(album.id, bytes.as_slice())?;
    }
    let mut by_name = txn.open_table(ALBUMS_BY_NAME_TABLE)?;
    if let Some(previous) = previous {
        by_name.remove(album_name_key(&previous.name, previous.id).as_str())?;
    }
    by_name.insert(album_name_key(&album.name, album.id).as_str(), album.id)?;
    Ok(())
}

pub(crate) fn find_artist_by_name(
    txn: &WriteTransaction,
    name: &str,
) -> Result<Option<u64>, LibraryError> {
    let by_name = txn.open_table(ARTISTS_BY_NAME_TABLE)?;
    let id = by_name.get(name_key(name).as_str())?.map(|v| v.value());
    Ok(id)
}

pub(crate) fn put_artist(
    txn: &WriteTransaction,
    artist: &Artist,
    previous: Option<&Artist>,
) -> Result<(), LibraryError> {
    {
        let mut artists = txn.open_table(ARTISTS_TABLE)?;
        let bytes = encode_value(artist)?;
        artists.insert(artist.id, bytes.as_slice())?;
    }
    let mut by_name = txn.open_table(ARTISTS_BY_NAME_TABLE)?;
    if let Some(previous) = previous {
        by_name.remove(name_key(&previous.name).as_str())?;
    }
    by_name.insert(name_key(&artist.name).as_str(), artist.id)?;
    Ok(())
}

/// Resolves names case-insensitively, creating missing artists. Blank names are skipped.
pub(crate) fn get_or_create_artists(
    txn: &WriteTransaction,
    names: &[String],
    now: u64,
) -> Result<Vec<u64>, LibraryError> {
    let mut ids = Vec::new();
    for name in names {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let id = match find_artist_by_name(txn, name)? {
            Some(id) => id,
            None => {
                let artist = Artist {
                    id: next_id(txn, ARTIST_SEQ)?,
                    name: name.to_string(),
                    bio: None,
                    created_at: now,
                };
                put_artist(txn, &artist, None)?;
                artist.id
            }
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_keys_do_not_overlap_longer_ids() {
        let (start, end) = prefix_range(&prefix_key(1u64));
        let key = join_key(12, 3);
        assert!(!(key.as_str() >= start.as_str() && key.as_str() < end.as_str()));
        let key = join_key(1, 3);
        assert!(key.as_str() >= start.as_str() && key.as_str() < end.as_str());
    }

    #[test]
    fn splits_on_last_separator() {
        let key = album_name_key("Blue  Train ", 42);
        let (name, id) = split_key_last(&key).unwrap();
        assert_eq!(name, "blue  train");
        assert_eq!(parse_id(id).unwrap(), 42);
        assert!(split_key_last("no-separator").is_err());
    }
}
