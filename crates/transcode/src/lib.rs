mod ffmpeg;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use common::{extension_lower, is_lossless, unique_path};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use ffmpeg::{parse_probe_bitrate, FfmpegTranscoder};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionOptions {
    pub enabled: bool,
    pub target_bitrate_kbps: u32,
    /// Files in the target format above this bitrate are re-encoded.
    pub recompress_threshold_kbps: u32,
    pub target_format: String,
    pub delete_originals: bool,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            target_bitrate_kbps: 192,
            recompress_threshold_kbps: 192,
            target_format: "mp3".to_string(),
            delete_originals: true,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
        }
    }
}

impl CompressionOptions {
    fn target_extension(&self) -> String {
        self.target_format.trim().trim_start_matches('.').to_ascii_lowercase()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CompressionResult {
    pub was_compressed: bool,
    pub original_file_name: String,
    /// Name the file ends up with. Equal to the original unless a lossless file was converted.
    pub compressed_file_name: String,
    pub original_size: u64,
    pub compressed_size: u64,
    pub error_message: Option<String>,
}

impl CompressionResult {
    fn unchanged(file_name: &str) -> Self {
        Self {
            original_file_name: file_name.to_string(),
            compressed_file_name: file_name.to_string(),
            ..Default::default()
        }
    }

    /// Negative when the output grew.
    pub fn bytes_saved(&self) -> i64 {
        self.original_size as i64 - self.compressed_size as i64
    }

    pub fn compression_ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 1.0;
        }
        self.compressed_size as f64 / self.original_size as f64
    }

    pub fn success(&self) -> bool {
        self.error_message
            .as_deref()
            .map(str::is_empty)
            .unwrap_or(true)
    }
}

#[derive(Debug)]
pub enum TranscodeError {
    Io(io::Error),
    NotFound(String),
    Encoder(String),
    Probe(String),
}

impl std::fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscodeError::Io(err) => write!(f, "io error: {}", err),
            TranscodeError::NotFound(name) => write!(f, "File not found: {}", name),
            TranscodeError::Encoder(message) => write!(f, "ffmpeg failed: {}", message),
            TranscodeError::Probe(message) => write!(f, "ffprobe failed: {}", message),
        }
    }
}

impl std::error::Error for TranscodeError {}

impl From<io::Error> for TranscodeError {
    fn from(err: io::Error) -> Self {
        TranscodeError::Io(err)
    }
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        bitrate_kbps: u32,
        format: &str,
    ) -> Result<(), TranscodeError>;

    /// Audio bitrate in bits per second, if the container reports one.
    async fn probe_bitrate(&self, path: &Path) -> Result<Option<u64>, TranscodeError>;
}

#[derive(Clone)]
pub struct Compressor {
    options: CompressionOptions,
    transcoder: Arc<dyn Transcoder>,
}

impl Compressor {
    pub fn new(options: CompressionOptions) -> Self {
        let transcoder = Arc::new(FfmpegTranscoder::from_options(&options));
        Self::with_transcoder(options, transcoder)
    }

    pub fn with_transcoder(options: CompressionOptions, transcoder: Arc<dyn Transcoder>) -> Self {
        Self {
            options,
            transcoder,
        }
    }

    pub fn options(&self) -> &CompressionOptions {
        &self.options
    }

    /// Converts lossless files to the target format and re-encodes oversized files
    /// already in it. Failures are reported in the result, never returned.
    pub async fn compress_if_needed(&self, path: &Path) -> CompressionResult {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut result = CompressionResult::unchanged(&file_name);
        if !self.options.enabled {
            debug!("Compression is disabled, skipping {:?}", file_name);
            return result;
        }

        let size = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => {
                warn!("File not found for compression: {:?}", path);
                result.error_message = Some(TranscodeError::NotFound(file_name).to_string());
                return result;
            }
        };
        result.original_size = size;
        result.compressed_size = size;

        let target = self.options.target_extension();
        let outcome = if is_lossless(path) {
            self.convert(path, &target, &mut result).await
        } else if extension_lower(path).as_deref() == Some(target.as_str()) {
            self.recompress(path, &target, &mut result).await
        } else {
            debug!("{:?} does not need compression", file_name);
            Ok(())
        };

        if let Err(err) = outcome {
            warn!("Error compressing {:?}: {}", file_name, err);
            result.error_message = Some(err.to_string());
        }
        result
    }

    async fn convert(
        &self,
        path: &Path,
        target: &str,
        result: &mut CompressionResult,
    ) -> Result<(), TranscodeError> {
        let output = unique_path(&path.with_extension(target));
        let output_name = output
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        info!(
            "Transcoding {:?} to {:?} at {}kbps",
            result.original_file_name, output_name, self.options.target_bitrate_kbps
        );

        if let Err(err) = self
            .transcoder
            .encode(path, &output, self.options.target_bitrate_kbps, target)
            .await
        {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(err);
        }

        result.was_compressed = true;
        result.compressed_file_name = output_name;
        result.compressed_size = tokio::fs::metadata(&output).await?.len();

        if self.options.delete_originals {
            tokio::fs::remove_file(path).await?;
            info!("Deleted original file {:?}", result.original_file_name);
        }
        info!(
            "Transcoded {:?}: {} -> {} bytes",
            result.original_file_name, result.original_size, result.compressed_size
        );
        Ok(())
    }

    async fn recompress(
        &self,
        path: &Path,
        target: &str,
        result: &mut CompressionResult,
    ) -> Result<(), TranscodeError> {
        let threshold = u64::from(self.options.recompress_threshold_kbps);
        let kbps = match self.transcoder.probe_bitrate(path).await? {
            Some(bps) => bps / 1000,
            None => {
                debug!("No bitrate for {:?}, leaving it as is", result.original_file_name);
                return Ok(());
            }
        };
        if kbps <= threshold {
            debug!(
                "{:?} is {}kbps, at or below {}kbps",
                result.original_file_name, kbps, threshold
            );
            return Ok(());
        }

        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        let temp = dir.join(format!("temp_{}.{}", Uuid::new_v4(), target));
        info!(
            "Recompressing {:?} from {}kbps to {}kbps",
            result.original_file_name, kbps, self.options.target_bitrate_kbps
        );

        if let Err(err) = self
            .transcoder
            .encode(path, &temp, self.options.target_bitrate_kbps, target)
            .await
        {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(err);
        }
        tokio::fs::remove_file(path).await?;
        tokio::fs::rename(&temp, path).await?;

        result.was_compressed = true;
        result.compressed_size = tokio::fs::metadata(path).await?.len();
        info!(
            "Recompressed {:?}: {} -> {} bytes",
            result.original_file_name, result.original_size, result.compressed_size
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Writes a fixed payload instead of running ffmpeg.
    #[derive(Default)]
    struct FakeTranscoder {
        bitrate: Option<u64>,
        fail: bool,
        encoded: Mutex<Vec<(PathBuf, PathBuf, u32)>>,
    }

    #[async_trait]
    impl Transcoder for FakeTranscoder {
        async fn encode(
            &self,
            input: &Path,
            output: &Path,
            bitrate_kbps: u32,
            _format: &str,
        ) -> Result<(), TranscodeError> {
            self.encoded
                .lock()
                .push((input.to_path_buf(), output.to_path_buf(), bitrate_kbps));
            tokio::fs::write(output, b"enc").await?;
            if self.fail {
                return Err(TranscodeError::Encoder("boom".to_string()));
            }
            Ok(())
        }

        async fn probe_bitrate(&self, _path: &Path) -> Result<Option<u64>, TranscodeError> {
            Ok(self.bitrate)
        }
    }

    fn build(fake: FakeTranscoder, options: CompressionOptions) -> (Compressor, Arc<FakeTranscoder>) {
        let fake = Arc::new(fake);
        (Compressor::with_transcoder(options, fake.clone()), fake)
    }

    #[tokio::test]
    async fn lossless_is_converted_and_original_removed() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("Take.WAV");
        std::fs::write(&wav, vec![0u8; 1000]).unwrap();
        let (compressor, fake) = build(FakeTranscoder::default(), CompressionOptions::default());

        let result = compressor.compress_if_needed(&wav).await;

        assert!(result.success());
        assert!(result.was_compressed);
        assert_eq!(result.original_file_name, "Take.WAV");
        assert_eq!(result.compressed_file_name, "Take.mp3");
        assert_eq!(result.original_size, 1000);
        assert_eq!(result.compressed_size, 3);
        assert_eq!(result.bytes_saved(), 997);
        assert!(!wav.exists());
        assert!(dir.path().join("Take.mp3").exists());
        assert_eq!(fake.encoded.lock()[0].2, 192);
    }

    #[tokio::test]
    async fn conversion_avoids_existing_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("song.mp3"), b"keep").unwrap();
        let flac = dir.path().join("song.flac");
        std::fs::write(&flac, b"lossless").unwrap();
        let options = CompressionOptions {
            delete_originals: false,
            ..Default::default()
        };
        let (compressor, _) = build(FakeTranscoder::default(), options);

        let result = compressor.compress_if_needed(&flac).await;

        assert_eq!(result.compressed_file_name, "song_1.mp3");
        assert!(flac.exists());
        assert_eq!(std::fs::read(dir.path().join("song.mp3")).unwrap(), b"keep");
    }

    #[tokio::test]
    async fn high_bitrate_target_is_replaced_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mp3 = dir.path().join("loud.mp3");
        std::fs::write(&mp3, vec![1u8; 50]).unwrap();
        let fake = FakeTranscoder {
            bitrate: Some(320_000),
            ..Default::default()
        };
        let (compressor, fake) = build(fake, CompressionOptions::default());

        let result = compressor.compress_if_needed(&mp3).await;

        assert!(result.was_compressed);
        assert_eq!(result.compressed_file_name, "loud.mp3");
        assert_eq!(std::fs::read(&mp3).unwrap(), b"enc");
        let (_, temp, _) = fake.encoded.lock()[0].clone();
        let temp_name = temp.file_name().unwrap().to_string_lossy().to_string();
        assert!(temp_name.starts_with("temp_") && temp_name.ends_with(".mp3"));
        assert!(!temp.exists());
    }

    #[tokio::test]
    async fn threshold_and_unknown_bitrate_skip() {
        let dir = tempfile::tempdir().unwrap();
        let mp3 = dir.path().join("ok.mp3");
        std::fs::write(&mp3, vec![1u8; 50]).unwrap();

        for bitrate in [Some(192_999), None] {
            let fake = FakeTranscoder {
                bitrate,
                ..Default::default()
            };
            let (compressor, fake) = build(fake, CompressionOptions::default());
            let result = compressor.compress_if_needed(&mp3).await;
            assert!(!result.was_compressed);
            assert!(result.success());
            assert_eq!(result.compressed_size, result.original_size);
            assert!(fake.encoded.lock().is_empty());
        }
    }

    #[tokio::test]
    async fn disabled_or_other_formats_are_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("a.wav");
        std::fs::write(&wav, b"pcm").unwrap();
        let options = CompressionOptions {
            enabled: false,
            ..Default::default()
        };
        let (compressor, fake) = build(FakeTranscoder::default(), options);
        let result = compressor.compress_if_needed(&wav).await;
        assert!(!result.was_compressed);
        assert_eq!(result.compressed_file_name, "a.wav");
        assert!(wav.exists());
        let missing = compressor
            .compress_if_needed(&dir.path().join("gone.flac"))
            .await;
        assert!(missing.success());
        assert_eq!(missing.compressed_file_name, "gone.flac");

        let ogg = dir.path().join("b.ogg");
        std::fs::write(&ogg, b"ogg").unwrap();
        let enabled = Compressor::with_transcoder(CompressionOptions::default(), fake.clone());
        let result = enabled.compress_if_needed(&ogg).await;
        assert!(!result.was_compressed);
        assert_eq!(result.compressed_size, 3);
        assert!(fake.encoded.lock().is_empty());
    }

    #[tokio::test]
    async fn failures_are_captured() {
        let dir = tempfile::tempdir().unwrap();
        let (compressor, _) = build(FakeTranscoder::default(), CompressionOptions::default());
        let result = compressor
            .compress_if_needed(&dir.path().join("missing.flac"))
            .await;
        assert!(!result.success());
        assert_eq!(result.error_message.as_deref(), Some("File not found: missing.flac"));

        let wav = dir.path().join("bad.wav");
        std::fs::write(&wav, b"pcm").unwrap();
        let fake = FakeTranscoder {
            fail: true,
            ..Default::default()
        };
        let (compressor, _) = build(fake, CompressionOptions::default());
        let result = compressor.compress_if_needed(&wav).await;
        assert!(!result.success());
        assert!(!result.was_compressed);
        assert!(wav.exists());
        assert!(!dir.path().join("bad.mp3").exists());
    }

    #[test]
    fn ratio_handles_empty_input() {
        let result = CompressionResult::unchanged("x.mp3");
        assert_eq!(result.compression_ratio(), 1.0);
        let result = CompressionResult {
            original_size: 200,
            compressed_size: 50,
            ..Default::default()
        };
        assert_eq!(result.compression_ratio(), 0.25);
        assert_eq!(result.bytes_saved(), 150);
    }
}
