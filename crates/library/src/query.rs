use std::cmp::Ordering;
use std::collections::HashMap;

use common::{Album, Artist, Track};
use redb::{ReadTransaction, ReadableTable};
use serde::{Deserialize, Serialize};

use crate::store::{
    decode_value, get_row, ids_with_prefix, prefix_key, ALBUMS_TABLE, ARTISTS_TABLE, TRACKS_TABLE,
    TRACK_ARTISTS_TABLE,
};
use crate::{Library, LibraryError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSort {
    Title,
    TitleDesc,
    Album,
    AlbumDesc,
    Artist,
    ArtistDesc,
    Track,
    #[default]
    Date,
    DateAsc,
}

impl TrackSort {
    /// Unknown values fall back to newest first.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "title" => TrackSort::Title,
            "title_desc" => TrackSort::TitleDesc,
            "album" => TrackSort::Album,
            "album_desc" => TrackSort::AlbumDesc,
            "artist" => TrackSort::Artist,
            "artist_desc" => TrackSort::ArtistDesc,
            "track" => TrackSort::Track,
            "date_asc" => TrackSort::DateAsc,
            _ => TrackSort::Date,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TrackQuery {
    pub search: Option<String>,
    pub album_id: Option<u64>,
    pub artist_id: Option<u64>,
    pub sort: TrackSort,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// A track joined with its album and ordered artists.
#[derive(Clone, Debug)]
pub struct TrackDetails {
    pub track: Track,
    pub album: Option<Album>,
    pub artists: Vec<Artist>,
}

impl TrackDetails {
    fn album_key(&self) -> String {
        self.album
            .as_ref()
            .map(|album| album.name.to_lowercase())
            .unwrap_or_default()
    }

    fn artist_key(&self) -> String {
        self.artists
            .first()
            .map(|artist| artist.name.to_lowercase())
            .unwrap_or_default()
    }

    fn title_key(&self) -> String {
        self.track.display_title().to_lowercase()
    }
}

impl Library {
    /// Filters, sorts and pages the catalog. Returns the page and the filtered total.
    pub fn list_tracks(
        &self,
        query: &TrackQuery,
    ) -> Result<(Vec<TrackDetails>, usize), LibraryError> {
        let search = query
            .search
            .as_deref()
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(|value| value.to_lowercase());

        let read_txn = self.db.begin_read()?;
        let track_table = read_txn.open_table(TRACKS_TABLE)?;
        let mut album_cache: HashMap<u64, Option<Album>> = HashMap::new();
        let mut artist_cache: HashMap<u64, Option<Artist>> = HashMap::new();

        let mut items = Vec::new();
        for entry in track_table.iter()? {
            let entry = entry?;
            let track: Track = decode_value(entry.1.value())?;

            if let Some(album_id) = query.album_id {
                if track.album_id != Some(album_id) {
                    continue;
                }
            }
            if let Some(search) = &search {
                let in_title = track
                    .title
                    .as_deref()
                    .map(|title| title.to_lowercase().contains(search))
                    .unwrap_or(false);
                if !in_title && !track.file_name.to_lowercase().contains(search) {
                    continue;
                }
            }

            let artists = load_track_artists(&read_txn, track.id, &mut artist_cache)?;
            if let Some(artist_id) = query.artist_id {
                if !artists.iter().any(|artist| artist.id == artist_id) {
                    continue;
                }
            }
            let album = match track.album_id {
                Some(album_id) => load_album(&read_txn, album_id, &mut album_cache)?,
                None => None,
            };
            items.push(TrackDetails {
                track,
                album,
                artists,
            });
        }

        sort_tracks(&mut items, query.sort);
        let total = items.len();
        let limit = query.limit.unwrap_or(usize::MAX);
        let page = items
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .collect();
        Ok((page, total))
    }

    pub fn track_details(&self, id: u64) -> Result<Option<TrackDetails>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let track: Track = {
            let tracks = read_txn.open_table(TRACKS_TABLE)?;
            match get_row(&tracks, id)? {
                Some(track) => track,
                None => return Ok(None),
            }
        };
        let artists = load_track_artists(&read_txn, id, &mut HashMap::new())?;
        let album = match track.album_id {
            Some(album_id) => load_album(&read_txn, album_id, &mut HashMap::new())?,
            None => None,
        };
        Ok(Some(TrackDetails {
            track,
            album,
            artists,
        }))
    }
}

pub(crate) fn load_track_artists(
    read_txn: &ReadTransaction,
    track_id: u64,
    cache: &mut HashMap<u64, Option<Artist>>,
) -> Result<Vec<Artist>, LibraryError> {
    let joins = read_txn.open_table(TRACK_ARTISTS_TABLE)?;
    let artist_table = read_txn.open_table(ARTISTS_TABLE)?;
    let mut artists = Vec::new();
    for artist_id in ids_with_prefix(&joins, &prefix_key(track_id))? {
        if !cache.contains_key(&artist_id) {
            let artist: Option<Artist> = get_row(&artist_table, artist_id)?;
            cache.insert(artist_id, artist);
        }
        if let Some(Some(artist)) = cache.get(&artist_id) {
            artists.push(artist.clone());
        }
    }
    Ok(artists)
}

pub(crate) fn load_album(
    read_txn: &ReadTransaction,
    album_id: u64,
    cache: &mut HashMap<u64, Option<Album>>,
) -> Result<Option<Album>, LibraryError> {
    if let Some(album) = cache.get(&album_id) {
        return Ok(album.clone());
    }
    let album_table = read_txn.open_table(ALBUMS_TABLE)?;
    let album: Option<Album> = get_row(&album_table, album_id)?;
    cache.insert(album_id, album.clone());
    Ok(album)
}

fn sort_tracks(items: &mut [TrackDetails], sort: TrackSort) {
    let by_id = |a: &TrackDetails, b: &TrackDetails| a.track.id.cmp(&b.track.id);
    items.sort_by(|a, b| {
        let ordering = match sort {
            TrackSort::Title => a.title_key().cmp(&b.title_key()),
            TrackSort::TitleDesc => b.title_key().cmp(&a.title_key()),
            TrackSort::Album => a
                .album_key()
                .cmp(&b.album_key())
                .then(a.track.track_number.cmp(&b.track.track_number)),
            TrackSort::AlbumDesc => b
                .album_key()
                .cmp(&a.album_key())
                .then(b.track.track_number.cmp(&a.track.track_number)),
            TrackSort::Artist => a.artist_key().cmp(&b.artist_key()),
            TrackSort::ArtistDesc => b.artist_key().cmp(&a.artist_key()),
            TrackSort::Track => a.track.track_number.cmp(&b.track.track_number),
            TrackSort::Date => b.track.created_at.cmp(&a.track.created_at),
            TrackSort::DateAsc => a.track.created_at.cmp(&b.track.created_at),
        };
        match (ordering, sort) {
            (Ordering::Equal, TrackSort::Date) => by_id(b, a),
            (Ordering::Equal, _) => by_id(a, b),
            (ordering, _) => ordering,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{tags, Fixture};

    fn synced() -> Fixture {
        let fx = Fixture::new();
        fx.add_file("c-intro.mp3", tags("Intro", 1, Some("Zeta"), &["Mika"]));
        fx.add_file("a-outro.mp3", tags("outro", 9, Some("Zeta"), &["Mika"]));
        fx.add_file("b-alpha.mp3", tags("Alpha", 2, Some("Alpha Album"), &["Bo", "Mika"]));
        fx.add_file("untitled.flac", Default::default());
        fx.library.full_sync().unwrap();
        fx
    }

    fn titles(items: &[TrackDetails]) -> Vec<String> {
        items
            .iter()
            .map(|item| item.track.display_title().to_string())
            .collect()
    }

    #[test]
    fn parses_sort_values() {
        assert_eq!(TrackSort::parse("title_desc"), TrackSort::TitleDesc);
        assert_eq!(TrackSort::parse(" ARTIST "), TrackSort::Artist);
        assert_eq!(TrackSort::parse("bogus"), TrackSort::Date);
        assert_eq!(TrackSort::parse("date_asc"), TrackSort::DateAsc);
    }

    #[test]
    fn sorts_by_title_with_file_name_fallback() {
        let fx = synced();
        let query = TrackQuery {
            sort: TrackSort::Title,
            ..Default::default()
        };
        let (items, total) = fx.library.list_tracks(&query).unwrap();
        assert_eq!(total, 4);
        assert_eq!(titles(&items), vec!["Alpha", "Intro", "outro", "untitled.flac"]);
    }

    #[test]
    fn sorts_by_album_then_track_number() {
        let fx = synced();
        let query = TrackQuery {
            sort: TrackSort::Album,
            ..Default::default()
        };
        let (items, _) = fx.library.list_tracks(&query).unwrap();
        assert_eq!(titles(&items), vec!["untitled.flac", "Alpha", "Intro", "outro"]);

        let query = TrackQuery {
            sort: TrackSort::AlbumDesc,
            ..Default::default()
        };
        let (items, _) = fx.library.list_tracks(&query).unwrap();
        assert_eq!(titles(&items), vec!["outro", "Intro", "Alpha", "untitled.flac"]);
    }

    #[test]
    fn default_sort_is_newest_first() {
        let fx = synced();
        let (items, _) = fx.library.list_tracks(&TrackQuery::default()).unwrap();
        let ids: Vec<u64> = items.iter().map(|item| item.track.id).collect();
        let mut expected = ids.clone();
        expected.sort_by(|a, b| b.cmp(a));
        assert_eq!(ids, expected);
    }

    #[test]
    fn search_matches_title_or_file_name() {
        let fx = synced();
        let query = TrackQuery {
            search: Some("  ALPHA ".to_string()),
            sort: TrackSort::Title,
            ..Default::default()
        };
        let (items, total) = fx.library.list_tracks(&query).unwrap();
        assert_eq!(total, 1);
        assert_eq!(titles(&items), vec!["Alpha"]);

        let query = TrackQuery {
            search: Some("untitled".to_string()),
            ..Default::default()
        };
        assert_eq!(fx.library.list_tracks(&query).unwrap().1, 1);
    }

    #[test]
    fn filters_by_album_and_artist() {
        let fx = synced();
        let albums = fx.library.list_albums().unwrap();
        let zeta = albums.iter().find(|a| a.album.name == "Zeta").unwrap();
        let bo = fx
            .library
            .list_artists()
            .unwrap()
            .into_iter()
            .find(|a| a.artist.name == "Bo")
            .unwrap();

        let query = TrackQuery {
            album_id: Some(zeta.album.id),
            sort: TrackSort::Track,
            ..Default::default()
        };
        let (items, _) = fx.library.list_tracks(&query).unwrap();
        assert_eq!(titles(&items), vec!["Intro", "outro"]);

        let query = TrackQuery {
            artist_id: Some(bo.artist.id),
            ..Default::default()
        };
        let (items, _) = fx.library.list_tracks(&query).unwrap();
        assert_eq!(titles(&items), vec!["Alpha"]);
        assert_eq!(items[0].artists[0].name, "Bo");
        assert_eq!(items[0].artists[1].name, "Mika");
    }

    #[test]
    fn pages_after_sorting() {
        let fx = synced();
        let query = TrackQuery {
            sort: TrackSort::Title,
            limit: Some(2),
            offset: 1,
            ..Default::default()
        };
        let (items, total) = fx.library.list_tracks(&query).unwrap();
        assert_eq!(total, 4);
        assert_eq!(titles(&items), vec!["Intro", "outro"]);
    }
}
