//! Duration probing. WAV files are read directly, everything else goes
//! through ffprobe.

use hound::WavReader;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

pub fn wav_duration_seconds(path: &Path) -> MediaResult<f64> {
    let reader = WavReader::open(path).map_err(|e| {
        MediaError::InvalidDuration(format!("{}: {}", path.display(), e))
    })?;
    let spec = reader.spec();
    let frames = reader.len() as f64 / spec.channels.max(1) as f64;
    Ok(frames / spec.sample_rate.max(1) as f64)
}

/// Duration of any media file in seconds.
pub async fn probe_duration(path: &Path) -> MediaResult<f64> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("wav"));
    if is_wav {
        match wav_duration_seconds(path) {
            Ok(duration) => return Ok(duration),
            Err(e) => debug!("WAV header read failed, falling back to ffprobe: {}", e),
        }
    }

    let ffprobe = which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("ffprobe failed on {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).trim().to_string()),
        });
    }

    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

fn parse_duration(raw: &str) -> MediaResult<f64> {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(d) if d.is_finite() && d >= 0.0 => Ok(d),
        _ => Err(MediaError::InvalidDuration(trimmed.to_string())),
    }
}
