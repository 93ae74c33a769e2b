//! Stock footage search and download.

use anyhow::Context;
use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{MediaError, MediaResult};
use crate::retry::RetryPolicy;

pub const PEXELS_BASE_URL: &str = "https://api.pexels.com";
pub const SEARCH_PAGE_SIZE: u32 = 15;
/// Below this many clips the video cannot be assembled.
pub const MIN_TOTAL_CLIPS: usize = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct FootageSearch {
    #[serde(default)]
    pub videos: Vec<FootageVideo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FootageVideo {
    pub id: u64,
    #[serde(default)]
    pub video_files: Vec<FootageFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FootageFile {
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    pub link: String,
}

impl FootageFile {
    fn is_portrait(&self, min_height: u32) -> bool {
        match (self.width, self.height) {
            (Some(w), Some(h)) => h > w && h >= min_height,
            _ => false,
        }
    }
}

impl FootageVideo {
    /// First file that is portrait and tall enough.
    pub fn portrait_file(&self, min_height: u32) -> Option<&FootageFile> {
        self.video_files.iter().find(|f| f.is_portrait(min_height))
    }
}

#[async_trait]
pub trait FootageProvider: Send + Sync {
    async fn search(&self, query: &str, per_page: u32) -> anyhow::Result<Vec<FootageVideo>>;
    async fn download(&self, url: &str, dest: &Path) -> anyhow::Result<()>;
}

pub struct PexelsClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    download_timeout: Duration,
}

impl PexelsClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration, download_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: PEXELS_BASE_URL.to_string(),
            download_timeout,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl FootageProvider for PexelsClient {
    async fn search(&self, query: &str, per_page: u32) -> anyhow::Result<Vec<FootageVideo>> {
        let url = format!("{}/videos/search", self.base_url.trim_end_matches('/'));
        let per_page = per_page.to_string();
        let found: FootageSearch = self
            .client
            .get(&url)
            .header(AUTHORIZATION, &self.api_key)
            .query(&[
                ("query", query),
                ("per_page", per_page.as_str()),
                ("orientation", "portrait"),
                ("size", "medium"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("invalid footage search response")?;
        Ok(found.videos)
    }

    async fn download(&self, url: &str, dest: &Path) -> anyhow::Result<()> {
        let bytes = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        tokio::fs::write(dest, &bytes)
            .await
            .with_context(|| format!("failed to write {}", dest.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClipRequirements {
    pub count: usize,
    pub min_height: u32,
    /// Provider clips below this count trigger the local fallback.
    pub min_from_provider: usize,
}

/// Collect up to `count` portrait clips into `clips_dir`, searching `terms` in
/// order and topping up from `fallback_dir` when the provider comes up short.
#[allow(clippy::too_many_arguments)]
pub async fn acquire_clips<R: Rng + ?Sized>(
    provider: Option<&dyn FootageProvider>,
    retry: &RetryPolicy,
    terms: &[String],
    req: ClipRequirements,
    clips_dir: &Path,
    fallback_dir: &Path,
    rng: &mut R,
) -> MediaResult<Vec<PathBuf>> {
    tokio::fs::create_dir_all(clips_dir).await?;
    let mut clips: Vec<PathBuf> = Vec::new();

    match provider {
        Some(provider) => {
            let mut seen: HashSet<u64> = HashSet::new();
            for term in terms {
                if clips.len() >= req.count {
                    break;
                }
                let description = format!("Footage search '{}'", term);
                let mut videos = match retry
                    .run(&description, || provider.search(term, SEARCH_PAGE_SIZE))
                    .await
                {
                    Ok(videos) => videos,
                    Err(e) => {
                        warn!("Skipping search term '{}': {:#}", term, e);
                        continue;
                    }
                };
                videos.shuffle(rng);

                for video in &videos {
                    if clips.len() >= req.count {
                        break;
                    }
                    if !seen.insert(video.id) {
                        continue;
                    }
                    let Some(file) = video.portrait_file(req.min_height) else {
                        continue;
                    };
                    let dest = clips_dir.join(format!("clip_{:02}.mp4", clips.len()));
                    match retry
                        .run("Clip download", || provider.download(&file.link, &dest))
                        .await
                    {
                        Ok(()) => {
                            info!("Downloaded clip {} for '{}'", video.id, term);
                            clips.push(dest);
                        }
                        Err(e) => warn!("Clip {} download failed: {:#}", video.id, e),
                    }
                }
            }
        }
        None => warn!("No footage provider configured, using local clips only"),
    }

    if clips.len() < req.min_from_provider {
        let mut local = local_clips(fallback_dir).await;
        local.shuffle(rng);
        let missing = req.count.saturating_sub(clips.len());
        info!(
            "Only {} provider clips, adding up to {} from {}",
            clips.len(),
            missing,
            fallback_dir.display()
        );
        clips.extend(local.into_iter().take(missing));
    }

    if clips.len() < MIN_TOTAL_CLIPS {
        return Err(MediaError::InsufficientClips {
            found: clips.len(),
            needed: MIN_TOTAL_CLIPS,
        });
    }
    Ok(clips)
}

async fn local_clips(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return found;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_mp4 = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("mp4"));
        if is_mp4 {
            found.push(path);
        }
    }
    found.sort();
    found
}
