use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const UPLOAD_EXTENSIONS: &[&str] = &["wav", "mp3", "flac"];
pub const LOSSLESS_EXTENSIONS: &[&str] = &["wav", "flac", "aiff", "aif"];
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "aiff", "aif", "ogg", "opus", "m4a"];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: u64,
    pub file_name: String,
    pub title: Option<String>,
    /// 0 when unknown.
    pub track_number: u32,
    pub album_id: Option<u64>,
    #[serde(default)]
    pub album_art: Option<Vec<u8>>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Track {
    /// Title if present, otherwise the file name.
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => &self.file_name,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: u64,
    pub name: String,
    pub release_year: Option<i32>,
    #[serde(default)]
    pub album_art: Option<Vec<u8>>,
    pub created_at: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub bio: Option<String>,
    pub created_at: u64,
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}

/// Lower-cased extension without the dot.
pub fn extension_lower(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

pub fn is_upload_extension(name: &str) -> bool {
    match extension_lower(Path::new(name)) {
        Some(ext) => UPLOAD_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

pub fn is_audio_file(name: &str) -> bool {
    match extension_lower(Path::new(name)) {
        Some(ext) => AUDIO_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

pub fn is_lossless(path: &Path) -> bool {
    match extension_lower(path) {
        Some(ext) => LOSSLESS_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

/// Strips directory components so the name stays inside the uploads folder.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    if last.is_empty() || last == "." || last == ".." {
        return None;
    }
    Some(last.to_string())
}

/// `dir/stem.ext`, `dir/stem_1.ext`, `dir/stem_2.ext`, ... whichever is free first.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut counter = 1u32;
    loop {
        let candidate = dir.join(format!("{}_{}{}", stem, counter, ext));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let mut text = format!("{:.2}", value);
    while text.ends_with('0') {
        text.pop();
    }
    if text.ends_with('.') {
        text.pop();
    }
    format!("{} {}", text, UNITS[unit])
}
