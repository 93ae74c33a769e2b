//! Narration synthesis with the Piper TTS engine.

use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::config::{VideoSettings, VoiceSettings};
use crate::media::ffmpeg::FfmpegCommand;
use crate::utils::chunk_text;

/// Smaller outputs are treated as a failed synthesis.
pub const MIN_NARRATION_BYTES: u64 = 1000;

#[async_trait]
pub trait NarrationSynthesizer: Send + Sync {
    /// Speak `text` into a WAV file at `output`.
    async fn synthesize(&self, text: &str, output: &Path) -> anyhow::Result<PathBuf>;
}

pub struct PiperSynthesizer {
    model: String,
    chunk_chars: usize,
    /// `loudnorm` filter applied to the joined narration, if any.
    loudnorm: Option<String>,
}

impl PiperSynthesizer {
    pub fn new(voice: &VoiceSettings, video: &VideoSettings) -> Self {
        Self {
            model: voice.piper_model.clone(),
            chunk_chars: voice.chunk_chars,
            loudnorm: voice.normalize.then(|| video.loudnorm_filter()),
        }
    }
}

#[async_trait]
impl NarrationSynthesizer for PiperSynthesizer {
    async fn synthesize(&self, text: &str, output: &Path) -> anyhow::Result<PathBuf> {
        let work_dir = output
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("narration_parts");
        if work_dir.exists() {
            tokio::fs::remove_dir_all(&work_dir).await?;
        }
        tokio::fs::create_dir_all(&work_dir).await?;

        let chunks = chunk_text(text, self.chunk_chars);
        info!("Split narration into {} chunks", chunks.len());

        let mut parts = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let part = work_dir.join(format!("part_{:03}.wav", i));
            debug!("TTS chunk {}/{}: {}", i + 1, chunks.len(), chunk);
            tts_generate_chunk(&self.model, chunk, &part).await?;
            parts.push(part);
        }

        let joined = work_dir.join("combined.wav");
        concat_parts(&work_dir, &parts, &joined).await?;

        match &self.loudnorm {
            Some(filter) => {
                let normalized = FfmpegCommand::new(output)
                    .input(&joined)
                    .audio_filter(filter.clone())
                    .output_args(["-ar", "44100", "-ac", "1"])
                    .audio_codec("pcm_s16le")
                    .run()
                    .await;
                if let Err(e) = normalized {
                    warn!("Loudness normalization failed, using raw narration: {}", e);
                    tokio::fs::copy(&joined, output).await?;
                }
            }
            None => {
                tokio::fs::copy(&joined, output).await?;
            }
        }

        let size = tokio::fs::metadata(output).await.map(|m| m.len()).unwrap_or(0);
        if size < MIN_NARRATION_BYTES {
            anyhow::bail!("narration output is only {} bytes", size);
        }
        info!("Narration written to {} ({} bytes)", output.display(), size);
        Ok(output.to_path_buf())
    }
}

async fn tts_generate_chunk(model: &str, text: &str, out_path: &Path) -> anyhow::Result<()> {
    let piper = which::which("piper").context("piper not found in PATH")?;
    let mut child = Command::new(piper)
        .arg("--model")
        .arg(model)
        .arg("--output_file")
        .arg(out_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .context("failed to spawn piper")?;

    let mut stdin = child
        .stdin
        .take()
        .context("failed to open piper stdin")?;
    stdin.write_all(text.as_bytes()).await?;
    drop(stdin);

    let result = child.wait_with_output().await?;
    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        error!("Piper TTS failed for {}: {}", out_path.display(), stderr.trim());
        anyhow::bail!("TTS engine failed for chunk, command returned non-zero");
    }
    Ok(())
}

/// Concat-demuxer list; entries are relative to the list file.
fn concat_list(parts: &[PathBuf]) -> anyhow::Result<String> {
    let mut list = String::new();
    for part in parts {
        let name = part
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid filename {}", part.display()))?;
        list.push_str(&format!("file '{}'\n", name));
    }
    Ok(list)
}

async fn concat_parts(work_dir: &Path, parts: &[PathBuf], joined: &Path) -> anyhow::Result<()> {
    let list = work_dir.join("files.txt");
    tokio::fs::write(&list, concat_list(parts)?).await?;

    let concat = |codec: &[&str]| {
        FfmpegCommand::new(joined)
            .input_with(["-f", "concat", "-safe", "0"], &list)
            .output_args(codec.iter().copied())
    };

    if let Err(e) = concat(&["-c", "copy"]).run().await {
        warn!("ffmpeg concat with copy failed; retrying with re-encode: {}", e);
        concat(&["-c:a", "pcm_s16le"])
            .run()
            .await
            .context("ffmpeg failed to concatenate WAV files")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_list_uses_file_names() {
        let parts = vec![
            PathBuf::from("/tmp/work/narration_parts/part_000.wav"),
            PathBuf::from("/tmp/work/narration_parts/part_001.wav"),
        ];
        assert_eq!(
            concat_list(&parts).unwrap(),
            "file 'part_000.wav'\nfile 'part_001.wav'\n"
        );
    }

    #[test]
    fn normalization_follows_voice_settings() {
        let video = VideoSettings::default();
        let mut voice = VoiceSettings::default();
        voice.normalize = true;
        let piper = PiperSynthesizer::new(&voice, &video);
        assert_eq!(piper.loudnorm.as_deref(), Some("loudnorm=I=-16:TP=-1.5:LRA=11"));

        voice.normalize = false;
        assert!(PiperSynthesizer::new(&voice, &video).loudnorm.is_none());
    }

    #[tokio::test]
    async fn unusable_model_fails() {
        let dir = tempfile::tempdir().unwrap();
        let voice = VoiceSettings {
            piper_model: "/nonexistent/voice.onnx".into(),
            ..VoiceSettings::default()
        };
        let piper = PiperSynthesizer::new(&voice, &VideoSettings::default());
        let out = dir.path().join("narration.wav");
        assert!(piper.synthesize("Hello there.", &out).await.is_err());
    }
}
