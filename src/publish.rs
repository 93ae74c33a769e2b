//! Upload and posting through Ayrshare, with per-platform captions.

use anyhow::Context;
use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::config::PostingSettings;
use crate::retry::RetryPolicy;
use crate::script::ScriptDocument;
use crate::utils::truncate_chars;

pub const AYRSHARE_BASE_URL: &str = "https://app.ayrshare.com";
const INSTAGRAM: &str = "instagram";
const FACEBOOK: &str = "facebook";

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Upload the video and return its public URL.
    async fn upload(&self, video: &Path) -> anyhow::Result<String>;
    async fn post(&self, video_url: &str, caption: &str, platforms: &[String]) -> anyhow::Result<Value>;
}

pub struct AyrshareClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AyrshareClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            api_key: api_key.into(),
            base_url: AYRSHARE_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "accessUrl")]
    access_url: Option<String>,
}

#[async_trait]
impl Publisher for AyrshareClient {
    async fn upload(&self, video: &Path) -> anyhow::Result<String> {
        let bytes = tokio::fs::read(video)
            .await
            .with_context(|| format!("failed to read {}", video.display()))?;
        let part = Part::bytes(bytes)
            .file_name("video.mp4")
            .mime_str("video/mp4")?;
        let form = Form::new().part("file", part);

        let response: UploadResponse = self
            .client
            .post(format!("{}/api/media/upload", self.base_url))
            .header(AUTHORIZATION, self.bearer())
            .multipart(form)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .url
            .or(response.access_url)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| anyhow::anyhow!("upload response missing URL"))
    }

    async fn post(&self, video_url: &str, caption: &str, platforms: &[String]) -> anyhow::Result<Value> {
        let payload = serde_json::json!({
            "post": caption,
            "platforms": platforms,
            "mediaUrls": [video_url],
            "isVideo": true,
        });
        let result = self
            .client
            .post(format!("{}/api/post", self.base_url))
            .header(AUTHORIZATION, self.bearer())
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(result)
    }
}

/// Caption plus a dotted spacer and a shuffled, capped union of hashtags.
pub fn instagram_caption<R: Rng + ?Sized>(
    script: &ScriptDocument,
    posting: &PostingSettings,
    rng: &mut R,
) -> String {
    let mut tags: Vec<&str> = Vec::new();
    for tag in script.dynamic_hashtags.iter().chain(&script.base_hashtags) {
        if !tags.contains(&tag.as_str()) {
            tags.push(tag);
        }
    }
    tags.shuffle(rng);
    tags.truncate(posting.ig_max_hashtags);

    let full = format!("{}\n\n.\n.\n.\n{}", script.ig_caption, tags.join("  "));
    if full.chars().count() > posting.caption_max_length {
        let keep = posting.caption_max_length.saturating_sub(3);
        return format!("{}...", truncate_chars(&full, keep));
    }
    full
}

/// Conversational caption with the first few generated hashtags.
pub fn facebook_caption(script: &ScriptDocument, posting: &PostingSettings) -> String {
    let tags: Vec<&str> = script
        .dynamic_hashtags
        .iter()
        .take(posting.fb_max_hashtags)
        .map(String::as_str)
        .collect();
    if tags.is_empty() {
        return script.fb_caption.clone();
    }
    format!("{}\n\n{}", script.fb_caption, tags.join("  "))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PostOutcome {
    pub dry_run: bool,
    /// Provider response per post: `combined`, `instagram`, `facebook` or `post`.
    pub results: BTreeMap<String, Value>,
}

impl PostOutcome {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            results: BTreeMap::new(),
        }
    }
}

/// Upload once, then post with platform-specific captions. Instagram and
/// Facebook are posted separately unless their captions are identical.
pub async fn publish<R: Rng + ?Sized>(
    publisher: &dyn Publisher,
    retry: &RetryPolicy,
    video: &Path,
    script: &ScriptDocument,
    platforms: &[String],
    posting: &PostingSettings,
    rng: &mut R,
) -> anyhow::Result<PostOutcome> {
    if platforms.is_empty() {
        anyhow::bail!("no platforms configured");
    }
    if !video.exists() {
        anyhow::bail!("video not found: {}", video.display());
    }

    info!("Uploading video");
    let video_url = retry
        .run("Video upload", || publisher.upload(video))
        .await?;

    let ig_caption = instagram_caption(script, posting, rng);
    let fb_caption = facebook_caption(script, posting);
    let has = |name: &str| platforms.iter().any(|p| p == name);

    let mut plan: Vec<(&str, &str, Vec<String>)> = Vec::new();
    if has(INSTAGRAM) && has(FACEBOOK) {
        if ig_caption == fb_caption {
            plan.push(("combined", ig_caption.as_str(), vec![INSTAGRAM.into(), FACEBOOK.into()]));
        } else {
            plan.push((INSTAGRAM, ig_caption.as_str(), vec![INSTAGRAM.into()]));
            plan.push((FACEBOOK, fb_caption.as_str(), vec![FACEBOOK.into()]));
        }
    } else {
        let caption = if has(INSTAGRAM) { ig_caption.as_str() } else { fb_caption.as_str() };
        plan.push(("post", caption, platforms.to_vec()));
    }

    let mut outcome = PostOutcome::default();
    for (key, caption, targets) in plan {
        info!("Posting to {}", targets.join(", "));
        let description = format!("Post to {}", targets.join(", "));
        let result = retry
            .run(&description, || publisher.post(&video_url, caption, &targets))
            .await?;
        outcome.results.insert(key.to_string(), result);
    }
    Ok(outcome)
}
