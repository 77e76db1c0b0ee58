use std::path::{Path, PathBuf};

use lofty::config::WriteOptions;
use lofty::error::LoftyError;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::prelude::{Accessor, AudioFile, ItemKey, TagExt, TaggedFileExt};
use lofty::tag::{ItemValue, Tag, TagItem};

const ART_DESCRIPTION: &str = "Album Art";

/// Values carried between a file's embedded tags and the catalog.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TrackTags {
    pub title: Option<String>,
    pub track_number: u32,
    pub album: Option<String>,
    pub artists: Vec<String>,
    pub cover_art: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArtworkUpdate {
    Keep,
    Replace(Vec<u8>),
    Remove,
}

#[derive(Debug, Clone)]
pub struct TrackTagUpdate {
    pub title: Option<String>,
    pub track_number: u32,
    pub album: Option<String>,
    pub artists: Vec<String>,
    pub artwork: ArtworkUpdate,
}

#[derive(Debug, Default, Clone)]
pub struct AudioProperties {
    pub duration_ms: Option<u32>,
    pub bitrate_kbps: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    NotFound(PathBuf),
    NoTag,
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::NotFound(path) => write!(f, "file not found: {}", path.display()),
            MetadataError::NoTag => write!(f, "file has no writable tag"),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Artists come from the album-artist field, falling back to performers.
pub fn read_track_tags(path: &Path) -> Result<TrackTags, MetadataError> {
    if !path.is_file() {
        return Err(MetadataError::NotFound(path.to_path_buf()));
    }
    let tagged_file = lofty::read_from_path(path)?;
    let mut tags = TrackTags::default();

    let tag = match tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        Some(tag) => tag,
        None => return Ok(tags),
    };

    tags.title = tag.title().and_then(|v| clean_text(&v));
    tags.album = tag.album().and_then(|v| clean_text(&v));
    tags.track_number = tag.track().unwrap_or(0);

    let album_artists = collect_names(tag, &ItemKey::AlbumArtist);
    tags.artists = if album_artists.is_empty() {
        collect_names(tag, &ItemKey::TrackArtist)
    } else {
        album_artists
    };

    tags.cover_art = tag.pictures().first().map(|picture| picture.data().to_vec());
    Ok(tags)
}

/// Performers and album artists are both set to `update.artists`.
pub fn write_track_tags(path: &Path, update: &TrackTagUpdate) -> Result<(), MetadataError> {
    if !path.is_file() {
        return Err(MetadataError::NotFound(path.to_path_buf()));
    }
    let mut tagged_file = lofty::read_from_path(path)?;

    let tag_type = if tagged_file.primary_tag().is_some() {
        tagged_file.primary_tag_type()
    } else if let Some(tag) = tagged_file.first_tag() {
        tag.tag_type()
    } else {
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(Tag::new(tag_type));
        tag_type
    };
    let tag = tagged_file.tag_mut(tag_type).ok_or(MetadataError::NoTag)?;

    match update.title.as_deref().and_then(clean_text) {
        Some(title) => tag.set_title(title),
        None => tag.remove_title(),
    }
    match update.album.as_deref().and_then(clean_text) {
        Some(album) => tag.set_album(album),
        None => tag.remove_album(),
    }
    if update.track_number > 0 {
        tag.set_track(update.track_number);
    } else {
        tag.remove_track();
    }

    tag.retain(|item| {
        item.key() != &ItemKey::TrackArtist && item.key() != &ItemKey::AlbumArtist
    });
    // ID3v2 keeps one frame per key, so every name goes into a single NUL-joined value.
    let names: Vec<String> = update
        .artists
        .iter()
        .filter_map(|name| clean_text(name))
        .collect();
    if !names.is_empty() {
        let joined = names.join("\0");
        tag.push(TagItem::new(ItemKey::TrackArtist, ItemValue::Text(joined.clone())));
        tag.push(TagItem::new(ItemKey::AlbumArtist, ItemValue::Text(joined)));
    }

    match &update.artwork {
        ArtworkUpdate::Keep => {}
        ArtworkUpdate::Remove => clear_pictures(tag),
        ArtworkUpdate::Replace(data) => {
            clear_pictures(tag);
            tag.push_picture(Picture::new_unchecked(
                PictureType::CoverFront,
                Some(MimeType::Jpeg),
                Some(ART_DESCRIPTION.to_string()),
                data.clone(),
            ));
        }
    }

    tag.save_to_path(path, WriteOptions::default())?;
    Ok(())
}

pub fn read_audio_properties(path: &Path) -> Result<AudioProperties, MetadataError> {
    let tagged_file = lofty::read_from_path(path)?;
    let properties = tagged_file.properties();

    let duration_ms = properties.duration().as_millis();
    Ok(AudioProperties {
        duration_ms: if duration_ms > 0 {
            Some(duration_ms.min(u128::from(u32::MAX)) as u32)
        } else {
            None
        },
        bitrate_kbps: properties.audio_bitrate().or(properties.overall_bitrate()),
        sample_rate: properties.sample_rate(),
        channels: properties.channels(),
    })
}

pub fn guess_image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        "image/png"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() > 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "application/octet-stream"
    }
}

fn collect_names(tag: &Tag, key: &ItemKey) -> Vec<String> {
    let mut out = Vec::new();
    for value in tag.get_strings(key) {
        // ID3v2.4 joins multi-value frames with NUL.
        for part in value.split('\0') {
            if let Some(name) = clean_text(part) {
                if !out.contains(&name) {
                    out.push(name);
                }
            }
        }
    }
    out
}

fn clear_pictures(tag: &mut Tag) {
    while !tag.pictures().is_empty() {
        tag.remove_picture(0);
    }
}

fn clean_text(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
