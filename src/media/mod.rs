//! Video assembly: footage acquisition, clip motion, stitching and the final
//! overlay render.

pub mod ffmpeg;
pub mod font;
pub mod footage;
pub mod music;
pub mod overlay;
pub mod probe;
pub mod subtitle;
pub mod transform;

use anyhow::Context;
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{AppConfig, Niche, Profile};
use crate::error::MediaError;
use crate::retry::RetryPolicy;
use crate::script::ScriptDocument;

use footage::{ClipRequirements, FootageProvider, MIN_TOTAL_CLIPS, acquire_clips};
use overlay::{CompositeRequest, Compositor};
use transform::ClipRenderer;

pub const FINAL_VIDEO_NAME: &str = "final_video.mp4";
/// Timeline length beyond the narration, trimmed by the final render.
const TIMELINE_PAD: f64 = 2.0;

pub struct RenderContext<'a> {
    pub config: &'a AppConfig,
    pub profile: &'a Profile,
    pub niche: &'a Niche,
    pub footage: Option<&'a dyn FootageProvider>,
    pub retry: &'a RetryPolicy,
    pub http: &'a reqwest::Client,
}

/// Enough clips to cover the narration at the configured clip length.
pub fn clips_needed(narration_seconds: f64, clip_duration: f64, clips_per_video: usize) -> usize {
    let covering = (narration_seconds / clip_duration.max(0.1)).floor() as usize + 1;
    covering.max(clips_per_video)
}

/// The first two topic words as one query, then the niche terms.
pub fn footage_queries(topic: &str, niche_terms: &[String]) -> Vec<String> {
    let lead: Vec<&str> = topic.split_whitespace().take(2).collect();
    let mut queries = Vec::with_capacity(niche_terms.len() + 1);
    if !lead.is_empty() {
        queries.push(lead.join(" "));
    }
    for term in niche_terms {
        if !queries.contains(term) {
            queries.push(term.clone());
        }
    }
    queries
}

/// Assemble the final video for `script` over the narration audio.
pub async fn render_video<R: Rng + ?Sized>(
    ctx: &RenderContext<'_>,
    script: &ScriptDocument,
    narration: &Path,
    rng: &mut R,
) -> anyhow::Result<PathBuf> {
    let video = &ctx.config.video;
    let paths = &ctx.config.paths;

    let narration_seconds = probe::probe_duration(narration)
        .await
        .context("could not measure narration")?;
    info!("Narration is {:.1}s", narration_seconds);

    let count = clips_needed(narration_seconds, video.clip_duration, video.clips_per_video);
    let niche_terms = if script.search_terms.is_empty() {
        &ctx.niche.search_terms
    } else {
        &script.search_terms
    };
    let queries = footage_queries(&script.topic, niche_terms);
    info!(count, ?queries, "Acquiring footage");

    let work_dir = paths.temp_dir.join("video");
    tokio::fs::create_dir_all(&work_dir).await?;
    let sources = acquire_clips(
        ctx.footage,
        ctx.retry,
        &queries,
        ClipRequirements {
            count,
            min_height: video.min_clip_height,
            min_from_provider: video.min_clips_from_provider,
        },
        &work_dir.join("clips"),
        &paths.fallback_clips_dir,
        rng,
    )
    .await?;

    let renderer = ClipRenderer::new(video, &work_dir);
    let mut processed = Vec::with_capacity(sources.len());
    for (i, source) in sources.iter().enumerate() {
        match renderer.transform_clip(source, i).await {
            Ok(path) => processed.push(path),
            Err(e) => warn!("Dropping clip {} ({}): {}", i, source.display(), e),
        }
    }
    if processed.len() < MIN_TOTAL_CLIPS {
        return Err(MediaError::InsufficientClips {
            found: processed.len(),
            needed: MIN_TOTAL_CLIPS,
        }
        .into());
    }

    let timeline = renderer
        .stitch(&processed, narration_seconds + TIMELINE_PAD)
        .await?;

    let music = music::select_background_music(&paths.bgm_dir, &ctx.config.music, rng).await;
    let font = font::resolve_font(&ctx.config.font, ctx.http).await;

    let captions = if video.burn_captions {
        let srt = work_dir.join("captions.srt");
        let entries = subtitle::build_captions(&script.narration, narration_seconds);
        subtitle::write_srt(&srt, &entries).context("could not write captions")?;
        Some(srt)
    } else {
        None
    };

    let output = paths.output_dir.join(FINAL_VIDEO_NAME);
    let request = CompositeRequest {
        timeline: &timeline,
        narration,
        music: music.as_ref().map(|m| m.path.as_path()),
        script,
        quote: script.quote.as_ref(),
        niche: ctx.niche,
        profile: ctx.profile,
        font: &font,
        captions: captions.as_deref(),
        output: &output,
    };
    let rendered = Compositor::new(video, &ctx.config.quote)
        .composite(&request)
        .await?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_count_covers_narration() {
        assert_eq!(clips_needed(10.0, 6.0, 4), 4);
        assert_eq!(clips_needed(40.0, 6.0, 4), 7);
        assert_eq!(clips_needed(42.0, 6.0, 4), 8);
    }

    #[test]
    fn topic_words_lead_the_queries() {
        let niche = vec!["money".to_string(), "finance".to_string()];
        assert_eq!(
            footage_queries("compound interest explained simply", &niche),
            vec!["compound interest", "money", "finance"]
        );
        assert_eq!(footage_queries("", &niche), vec!["money", "finance"]);
        assert_eq!(footage_queries("money", &niche), vec!["money", "finance"]);
    }
}
