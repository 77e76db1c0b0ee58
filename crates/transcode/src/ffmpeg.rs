use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::{CompressionOptions, TranscodeError, Transcoder};

/// Shells out to the ffmpeg and ffprobe binaries.
#[derive(Clone, Debug)]
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: PathBuf, ffprobe_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
        }
    }

    pub fn from_options(options: &CompressionOptions) -> Self {
        Self::new(options.ffmpeg_path.clone(), options.ffprobe_path.clone())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn encode(
        &self,
        input: &Path,
        output: &Path,
        bitrate_kbps: u32,
        format: &str,
    ) -> Result<(), TranscodeError> {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-i")
            .arg(input)
            .arg("-y")
            .arg("-vn")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if format == "mp3" {
            cmd.arg("-codec:a").arg("libmp3lame");
        }
        cmd.arg("-b:a")
            .arg(format!("{}k", bitrate_kbps))
            .arg("-f")
            .arg(format)
            .arg(output);

        let out = cmd.output().await?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(TranscodeError::Encoder(last_line(&stderr)));
        }
        Ok(())
    }

    async fn probe_bitrate(&self, path: &Path) -> Result<Option<u64>, TranscodeError> {
        let out = Command::new(&self.ffprobe_path)
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(TranscodeError::Probe(last_line(&stderr)));
        }
        parse_probe_bitrate(&String::from_utf8_lossy(&out.stdout))
    }
}

/// Bitrate of the first audio stream, falling back to the container's.
pub fn parse_probe_bitrate(json: &str) -> Result<Option<u64>, TranscodeError> {
    let probe: serde_json::Value = serde_json::from_str(json)
        .map_err(|err| TranscodeError::Probe(format!("unreadable output: {}", err)))?;

    let from_stream = probe
        .get("streams")
        .and_then(|streams| streams.as_array())
        .and_then(|streams| {
            streams.iter().find(|stream| {
                stream.get("codec_type").and_then(|kind| kind.as_str()) == Some("audio")
            })
        })
        .and_then(|stream| stream.get("bit_rate"))
        .and_then(number_field);
    let from_format = probe
        .get("format")
        .and_then(|format| format.get("bit_rate"))
        .and_then(number_field);
    Ok(from_stream.or(from_format).filter(|bps| *bps > 0))
}

// ffprobe reports numbers as strings.
fn number_field(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::String(text) => text.trim().parse().ok(),
        other => other.as_u64(),
    }
}

fn last_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("exited with an error")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_audio_stream_bitrate() {
        let json = r#"{
            "streams": [
                {"codec_type": "video", "bit_rate": "900000"},
                {"codec_type": "audio", "bit_rate": "320000"}
            ],
            "format": {"bit_rate": "330000"}
        }"#;
        assert_eq!(parse_probe_bitrate(json).unwrap(), Some(320_000));
    }

    #[test]
    fn falls_back_to_format_bitrate() {
        let json = r#"{"streams": [{"codec_type": "audio"}], "format": {"bit_rate": "128000"}}"#;
        assert_eq!(parse_probe_bitrate(json).unwrap(), Some(128_000));
        assert_eq!(parse_probe_bitrate(r#"{"format": {}}"#).unwrap(), None);
        assert!(parse_probe_bitrate("not json").is_err());
    }

    #[test]
    fn keeps_last_stderr_line() {
        assert_eq!(last_line("a\nInvalid data found\n\n"), "Invalid data found");
        assert_eq!(last_line(""), "exited with an error");
    }
}
