//! Per-clip motion and the crossfaded timeline.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::VideoSettings;
use crate::error::{MediaError, MediaResult};
use crate::media::ffmpeg::FfmpegCommand;

/// Zoom-in on even clips, slow pan on odd ones. Frames are counted on the
/// output (`on`) so the motion spans the whole clip of a video input.
pub fn ken_burns_filter(settings: &VideoSettings, index: usize, duration: f64) -> String {
    let (w, h, fps) = (settings.width, settings.height, settings.fps);
    let frames = (duration * fps as f64).round().max(1.0);
    let max_zoom = settings.ken_burns_zoom.max(1.0);
    let motion = if index % 2 == 0 {
        let rate = (max_zoom - 1.0) / frames;
        format!(
            "zoompan=z='min(1+{rate:.6}*on,{max_zoom})':x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)'"
        )
    } else {
        format!(
            "zoompan=z='{max_zoom}':x='min(on*0.5,iw-iw/zoom)':y='min(on*0.3,ih-ih/zoom)'"
        )
    };
    format!(
        "scale={sw}:{sh}:force_original_aspect_ratio=increase,crop={sw}:{sh},\
         {motion}:d=1:s={w}x{h}:fps={fps},setsar=1,format=yuv420p",
        sw = w * 2,
        sh = h * 2,
    )
}

/// Scale and crop only, used when the motion filter fails.
pub fn plain_filter(settings: &VideoSettings) -> String {
    let (w, h, fps) = (settings.width, settings.height, settings.fps);
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},fps={fps},setsar=1,format=yuv420p"
    )
}

/// Ordered equal-length clips joined by crossfades.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub clips: Vec<PathBuf>,
    pub clip_duration: f64,
    pub crossfade: f64,
}

impl Timeline {
    /// Start of each transition, one per adjacent pair.
    pub fn offsets(&self) -> Vec<f64> {
        (1..self.clips.len())
            .map(|i| i as f64 * (self.clip_duration - self.crossfade))
            .collect()
    }

    pub fn duration(&self) -> f64 {
        let n = self.clips.len() as f64;
        if n == 0.0 {
            return 0.0;
        }
        n * self.clip_duration - (n - 1.0) * self.crossfade
    }

    /// `xfade` chain from `[0:v]..[n-1:v]` to `[vout]`.
    pub fn filter_graph(&self) -> String {
        let last = self.clips.len().saturating_sub(1);
        self.offsets()
            .iter()
            .enumerate()
            .map(|(k, offset)| {
                let i = k + 1;
                let prev = if i == 1 { "[0:v]".to_string() } else { format!("[v{}]", i - 1) };
                let out = if i == last { "[vout]".to_string() } else { format!("[v{}]", i) };
                format!(
                    "{prev}[{i}:v]xfade=transition=fade:duration={:.2}:offset={:.2}{out}",
                    self.crossfade, offset
                )
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

pub struct ClipRenderer<'a> {
    settings: &'a VideoSettings,
    work_dir: PathBuf,
}

impl<'a> ClipRenderer<'a> {
    pub fn new(settings: &'a VideoSettings, work_dir: impl AsRef<Path>) -> Self {
        Self {
            settings,
            work_dir: work_dir.as_ref().to_path_buf(),
        }
    }

    fn encode(&self, cmd: FfmpegCommand) -> FfmpegCommand {
        cmd.no_audio()
            .video_codec("libx264")
            .preset("fast")
            .crf(23)
            .frame_rate(self.settings.fps)
    }

    /// Render `source` at output resolution with motion, looping short clips.
    pub async fn transform_clip(&self, source: &Path, index: usize) -> MediaResult<PathBuf> {
        let duration = self.settings.clip_duration;
        let output = self.work_dir.join(format!("processed_{:02}.mp4", index));
        let input = |cmd: FfmpegCommand| cmd.input_with(["-stream_loop", "-1"], source);

        let motion = self.encode(
            input(FfmpegCommand::new(&output))
                .video_filter(ken_burns_filter(self.settings, index, duration))
                .duration(duration),
        );
        match motion.run().await {
            Ok(()) => return Ok(output),
            Err(e) => warn!("Motion render failed for clip {}, using plain scale: {}", index, e),
        }

        self.encode(
            input(FfmpegCommand::new(&output))
                .video_filter(plain_filter(self.settings))
                .duration(duration),
        )
        .run()
        .await?;
        Ok(output)
    }

    /// Join clips with crossfades, trimmed to `target` seconds. Falls back to
    /// a hard-cut concat if the crossfade render fails.
    pub async fn stitch(&self, clips: &[PathBuf], target: f64) -> MediaResult<PathBuf> {
        match clips {
            [] => {
                return Err(MediaError::InsufficientClips { found: 0, needed: 1 });
            }
            [single] => return Ok(single.clone()),
            _ => {}
        }

        let timeline = Timeline {
            clips: clips.to_vec(),
            clip_duration: self.settings.clip_duration,
            crossfade: self.settings.crossfade_duration,
        };
        let output = self.work_dir.join("stitched.mp4");

        let mut cmd = FfmpegCommand::new(&output);
        for clip in clips {
            cmd = cmd.input(clip);
        }
        let cmd = self.encode(
            cmd.filter_complex(timeline.filter_graph())
                .map("[vout]")
                .duration(target),
        );
        match cmd.run().await {
            Ok(()) => {
                info!(
                    "Stitched {} clips with crossfades ({:.1}s timeline)",
                    clips.len(),
                    timeline.duration()
                );
                return Ok(output);
            }
            Err(e) => warn!("Crossfade stitch failed, falling back to concat: {}", e),
        }

        let list = self.work_dir.join("concat.txt");
        let mut body = String::new();
        for clip in clips {
            let abs = std::path::absolute(clip)?;
            body.push_str(&format!(
                "file '{}'\n",
                abs.to_string_lossy().replace('\'', "'\\''")
            ));
        }
        tokio::fs::write(&list, body).await?;

        self.encode(
            FfmpegCommand::new(&output)
                .input_with(["-f", "concat", "-safe", "0"], &list)
                .duration(target),
        )
        .run()
        .await?;
        info!("Concatenated {} clips without transitions", clips.len());
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::ffmpeg::ffmpeg_available;
    use crate::media::probe::probe_duration;

    fn small_settings() -> VideoSettings {
        VideoSettings {
            width: 90,
            height: 160,
            fps: 10,
            clip_duration: 1.5,
            crossfade_duration: 0.5,
            ..VideoSettings::default()
        }
    }

    fn timeline(n: usize) -> Timeline {
        Timeline {
            clips: (0..n).map(|i| PathBuf::from(format!("c{i}.mp4"))).collect(),
            clip_duration: 6.0,
            crossfade: 0.8,
        }
    }

    #[test]
    fn crossfade_offsets_advance_by_clip_minus_fade() {
        let offsets = timeline(4).offsets();
        assert_eq!(offsets.len(), 3);
        assert!((offsets[0] - 5.2).abs() < 1e-9);
        assert!((offsets[2] - 15.6).abs() < 1e-9);
        assert!((timeline(4).duration() - 21.6).abs() < 1e-9);
    }

    #[test]
    fn filter_graph_chains_labels() {
        let graph = timeline(3).filter_graph();
        assert_eq!(
            graph,
            "[0:v][1:v]xfade=transition=fade:duration=0.80:offset=5.20[v1];\
             [v1][2:v]xfade=transition=fade:duration=0.80:offset=10.40[vout]"
        );
        assert!(timeline(2).filter_graph().ends_with("[vout]"));
    }

    #[test]
    fn motion_alternates_between_zoom_and_pan() {
        let settings = VideoSettings::default();
        let zoom = ken_burns_filter(&settings, 0, 6.0);
        let pan = ken_burns_filter(&settings, 1, 6.0);
        assert!(zoom.contains("min(1+"));
        assert!(pan.contains("on*0.5"));
        assert!(zoom.contains("s=1080x1920"));
        assert!(zoom.starts_with("scale=2160:3840"));
    }

    #[tokio::test]
    async fn single_clip_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let settings = small_settings();
        let renderer = ClipRenderer::new(&settings, dir.path());
        let only = vec![PathBuf::from("only.mp4")];
        assert_eq!(renderer.stitch(&only, 10.0).await.unwrap(), only[0]);
    }

    #[tokio::test]
    async fn renders_and_crossfades_real_clips() {
        if !ffmpeg_available() || which::which("ffprobe").is_err() {
            eprintln!("ffmpeg not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let settings = small_settings();
        let renderer = ClipRenderer::new(&settings, dir.path());

        let mut processed = Vec::new();
        for i in 0..2 {
            let source = dir.path().join(format!("src{i}.mp4"));
            FfmpegCommand::new(&source)
                .input_with(["-f", "lavfi"], "testsrc=size=180x320:rate=10:duration=1")
                .video_codec("libx264")
                .run()
                .await
                .unwrap();
            processed.push(renderer.transform_clip(&source, i).await.unwrap());
        }
        let clip_len = probe_duration(&processed[0]).await.unwrap();
        assert!((clip_len - 1.5).abs() < 0.3, "clip was {clip_len}s");

        let stitched = renderer.stitch(&processed, 10.0).await.unwrap();
        let total = probe_duration(&stitched).await.unwrap();
        assert!((total - 2.5).abs() < 0.4, "timeline was {total}s");
    }
}
