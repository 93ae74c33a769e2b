//! Script documents and the script-generation collaborator.
//!
//! A script is generated once per run. When the generator fails after its
//! retries, a backup script from the store is used, and when none exists a
//! built-in emergency script. The result is archived by date, niche and style.

use async_trait::async_trait;
use rand::Rng;
use rand::seq::IndexedRandom;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::calendar::Selection;
use crate::config::{AppConfig, Niche, Style, TextPosition};
use crate::error::StoreError;
use crate::retry::RetryPolicy;
use crate::store::{BACKUP_SCRIPTS_KEY, DocumentStore, SCRIPT_ARCHIVE_PREFIX};
use crate::utils::{title_case, truncate_chars};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const GEMINI_MODEL: &str = "gemini-2.0-flash";
/// Narration speaking rate used to size the script.
const WORDS_PER_SECOND: f64 = 2.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptSource {
    Generated,
    #[default]
    Fallback,
}

impl fmt::Display for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptSource::Generated => f.write_str("generated"),
            ScriptSource::Fallback => f.write_str("fallback"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuoteDocument {
    pub text: String,
    #[serde(default)]
    pub author: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptDocument {
    pub hook: String,
    pub body: Vec<String>,
    pub cta: String,
    pub ig_caption: String,
    pub fb_caption: String,
    pub title_text: String,
    pub dynamic_hashtags: Vec<String>,
    pub quote: Option<QuoteDocument>,
    pub source: ScriptSource,

    pub niche: String,
    pub topic: String,
    pub style: String,
    pub search_terms: Vec<String>,
    pub base_hashtags: Vec<String>,
    pub text_position: TextPosition,
    pub narration: String,
}

impl ScriptDocument {
    /// Hook, body and CTA joined with spoken pauses.
    pub fn build_narration(&self) -> String {
        std::iter::once(self.hook.as_str())
            .chain(self.body.iter().map(String::as_str))
            .chain(std::iter::once(self.cta.as_str()))
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ... ")
    }

    /// Attach the selection metadata the later steps need.
    pub fn enrich(&mut self, selection: &Selection, niche: &Niche, style: Option<&Style>) {
        self.niche = selection.niche.clone();
        self.topic = selection.topic.clone();
        self.style = selection.style.clone();
        self.search_terms = niche.search_terms.clone();
        self.base_hashtags = niche.hashtags.clone();
        self.text_position = style.map(|s| s.text_position).unwrap_or_default();
        self.narration = self.build_narration();
    }

    pub fn archive_key(&self, date: &str) -> String {
        format!("{}/{}_{}_{}", SCRIPT_ARCHIVE_PREFIX, date, self.niche, self.style)
    }
}

/// Inputs for one generation call.
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub niche: String,
    pub topic: String,
    pub style_id: String,
    pub style_hint: String,
    pub duration_seconds: f64,
}

impl ScriptRequest {
    pub fn new(selection: &Selection, niche: &Niche, style: Option<&Style>, duration_seconds: f64) -> Self {
        Self {
            niche: niche.display_name(),
            topic: selection.topic.clone(),
            style_id: selection.style.clone(),
            style_hint: style.map(|s| s.prompt_hint.clone()).unwrap_or_default(),
            duration_seconds,
        }
    }

    pub fn prompt(&self) -> String {
        let style_name = title_case(&self.style_id.replace('_', " "));
        let word_count = (self.duration_seconds * WORDS_PER_SECOND) as u32;
        format!(
            r##"You are an elite viral social media scriptwriter who has generated
millions of views on Instagram Reels and Facebook Reels.

Create a {duration}-second video script.

TOPIC: {topic}
NICHE: {niche}
STYLE: {style_name} - {style_hint}

VIRAL RULES:
1. HOOK (first 3 seconds): Start with something that stops the scroll - a bold
   statement, a shocking number, a relatable pain point, or a direct question.
2. BODY: Deliver value using the {style_name} style. Use short punchy sentences.
   Create emotional peaks. Use contrast ("most people do X, but winners do Y").
3. CTA: End with a specific call-to-action - ask them to follow, save, or share.

Connect every point to how it FEELS, not just what it IS.

TARGET: {word_count} words total for {duration} seconds of narration.

RESPOND ONLY IN THIS JSON FORMAT (no markdown, no backticks):
{{
    "hook": "The scroll-stopping opening line (max 15 words)",
    "body": ["Point 1", "Point 2", "Point 3", "Point 4 (optional)"],
    "cta": "Specific call-to-action closing line",
    "ig_caption": "Instagram caption with emojis, line breaks, value teaser, then CTA",
    "fb_caption": "Facebook caption - conversational, storytelling tone, fewer hashtags",
    "title_text": "3-5 word on-screen title",
    "dynamic_hashtags": ["#tag1", "#tag2", "#tag3"],
    "quote": {{"text": "A short real quote that fits the topic", "author": "Who said it"}}
}}
"##,
            duration = self.duration_seconds as u32,
            topic = self.topic,
            niche = self.niche,
            style_name = style_name,
            style_hint = self.style_hint,
            word_count = word_count,
        )
    }
}

#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    async fn generate(&self, request: &ScriptRequest) -> anyhow::Result<ScriptDocument>;
}

/// Fields every generated script must carry.
#[derive(Debug, Deserialize)]
struct GeneratedScript {
    hook: String,
    body: Vec<String>,
    cta: String,
    ig_caption: String,
    fb_caption: String,
    title_text: String,
    dynamic_hashtags: Vec<String>,
    #[serde(default)]
    quote: Option<QuoteDocument>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ScriptGenerator for GeminiClient {
    async fn generate(&self, request: &ScriptRequest) -> anyhow::Result<ScriptDocument> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, GEMINI_MODEL
        );
        let payload = serde_json::json!({
            "contents": [{"parts": [{"text": request.prompt()}]}],
            "generationConfig": {"temperature": 0.85, "maxOutputTokens": 1200},
        });
        let response: GeminiResponse = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or_else(|| anyhow::anyhow!("Gemini response has no candidates"))?;

        parse_generated(text)
    }
}

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^```(?:json|JSON)?\s*(.*?)\s*```$").expect("fence regex"));

/// Strip a surrounding markdown code fence if the model added one.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    FENCE_RE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed)
}

pub fn parse_generated(text: &str) -> anyhow::Result<ScriptDocument> {
    let raw: GeneratedScript = serde_json::from_str(strip_code_fence(text))
        .map_err(|e| anyhow::anyhow!("invalid script JSON: {}", e))?;
    if raw.hook.trim().is_empty() || raw.body.is_empty() {
        anyhow::bail!("script is missing hook or body");
    }
    Ok(ScriptDocument {
        hook: raw.hook,
        body: raw.body,
        cta: raw.cta,
        ig_caption: raw.ig_caption,
        fb_caption: raw.fb_caption,
        title_text: raw.title_text,
        dynamic_hashtags: raw.dynamic_hashtags,
        quote: raw.quote.filter(|q| !q.text.trim().is_empty()),
        source: ScriptSource::Generated,
        ..ScriptDocument::default()
    })
}

/// Pre-written script as stored in the backup document. Only the narration
/// parts are required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupScript {
    pub niche: Option<String>,
    pub hook: String,
    pub body: Vec<String>,
    pub cta: String,
    pub caption: Option<String>,
    pub ig_caption: Option<String>,
    pub fb_caption: Option<String>,
    pub title_text: Option<String>,
    pub dynamic_hashtags: Option<Vec<String>>,
    pub quote: Option<QuoteDocument>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupScripts {
    pub scripts: Vec<BackupScript>,
}

impl BackupScript {
    fn into_document(self, topic: &str) -> ScriptDocument {
        let ig_caption = self
            .ig_caption
            .or_else(|| self.caption.clone())
            .unwrap_or_else(|| format!("Daily tip on {} 🔥", topic));
        let fb_caption = self
            .fb_caption
            .or(self.caption)
            .unwrap_or_else(|| format!("Here's a tip on {}", topic));
        ScriptDocument {
            hook: self.hook,
            body: self.body,
            cta: self.cta,
            ig_caption,
            fb_caption,
            title_text: self
                .title_text
                .unwrap_or_else(|| truncate_chars(&title_case(topic), 30)),
            dynamic_hashtags: self.dynamic_hashtags.unwrap_or_else(|| {
                ["#dailytips", "#growth", "#motivation"].map(String::from).to_vec()
            }),
            quote: self.quote,
            source: ScriptSource::Fallback,
            ..ScriptDocument::default()
        }
    }
}

/// Last-resort script when neither the generator nor backups are available.
pub fn emergency_script(topic: &str) -> ScriptDocument {
    ScriptDocument {
        hook: format!("Here's something about {} that will change your perspective.", topic),
        body: vec![
            format!("Most people overlook {}, but it can transform your daily life.", topic),
            "Small consistent changes lead to remarkable results over time.".into(),
            "The key is to start simple and build momentum day by day.".into(),
            "Winners focus on progress, not perfection.".into(),
        ],
        cta: "Follow for more daily tips that actually work!".into(),
        ig_caption: format!(
            "🔥 {}\n\nSmall changes → Big results.\n\nSave this for later! 🔖",
            title_case(topic)
        ),
        fb_caption: format!("Something I learned about {} that changed everything for me...", topic),
        title_text: truncate_chars(&title_case(topic), 25),
        dynamic_hashtags: ["#dailytips", "#growthmindset", "#motivation"]
            .map(String::from)
            .to_vec(),
        quote: None,
        source: ScriptSource::Fallback,
        ..ScriptDocument::default()
    }
}

/// Pick a backup script, preferring the niche; otherwise the emergency script.
pub fn fallback_script<S, R>(store: &S, niche: &str, topic: &str, rng: &mut R) -> ScriptDocument
where
    S: DocumentStore,
    R: Rng + ?Sized,
{
    let backups: BackupScripts = store.load(BACKUP_SCRIPTS_KEY);
    let usable: Vec<&BackupScript> = backups
        .scripts
        .iter()
        .filter(|s| !s.hook.trim().is_empty() && !s.body.is_empty())
        .collect();
    let matching: Vec<&BackupScript> = usable
        .iter()
        .copied()
        .filter(|s| s.niche.as_deref() == Some(niche))
        .collect();
    let pool = if matching.is_empty() { &usable } else { &matching };

    match pool.choose(rng) {
        Some(script) => {
            info!(niche, "Using backup script");
            (*script).clone().into_document(topic)
        }
        None => {
            warn!(niche, "No backup scripts available, using emergency script");
            emergency_script(topic)
        }
    }
}

/// Generate today's script with retries, falling back to a backup when the
/// generator is unavailable. Never fails.
pub async fn produce_script<S, R>(
    generator: Option<&dyn ScriptGenerator>,
    retry: &RetryPolicy,
    config: &AppConfig,
    selection: &Selection,
    store: &S,
    rng: &mut R,
) -> ScriptDocument
where
    S: DocumentStore,
    R: Rng + ?Sized,
{
    let niche = config.niche(&selection.niche).cloned().unwrap_or_else(|| Niche {
        id: selection.niche.clone(),
        color: "#FFFFFF".into(),
        color_name: "white".into(),
        accent: "#FFFFFF".into(),
        topics: vec![selection.topic.clone()],
        hashtags: vec![],
        search_terms: vec!["nature".into()],
    });
    let style = config.style(&selection.style);
    let request = ScriptRequest::new(selection, &niche, style, config.video.duration_seconds);

    let generated = match generator {
        Some(generator) => retry
            .run("Script generation", || generator.generate(&request))
            .await
            .map_err(|e| warn!("Script generator failed completely: {:#}", e))
            .ok(),
        None => {
            warn!("No script generator configured");
            None
        }
    };

    let mut script = match generated {
        Some(script) => script,
        None => fallback_script(store, &selection.niche, &selection.topic, rng),
    };
    script.enrich(selection, &niche, style);
    info!(
        source = %script.source,
        title = %script.title_text,
        "Script ready"
    );
    script
}

/// Archive the script under `scripts_archive/{date}_{niche}_{style}`.
pub fn archive_script<S: DocumentStore>(
    store: &S,
    script: &ScriptDocument,
    date: &str,
) -> Result<String, StoreError> {
    let key = script.archive_key(date);
    store.save(&key, script)?;
    info!("Script archived: {}", key);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID: &str = r##"{
        "hook": "Stop scrolling.",
        "body": ["One.", "Two."],
        "cta": "Follow now.",
        "ig_caption": "ig",
        "fb_caption": "fb",
        "title_text": "Big Title",
        "dynamic_hashtags": ["#a"],
        "quote": {"text": "Be yourself.", "author": "Oscar Wilde"}
    }"##;

    fn selection() -> Selection {
        Selection {
            date: "2026-02-01".into(),
            niche: "wealth_finance".into(),
            topic: "budgeting rules that work".into(),
            style: "listicle_tips".into(),
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl ScriptGenerator for FailingGenerator {
        async fn generate(&self, _request: &ScriptRequest) -> anyhow::Result<ScriptDocument> {
            anyhow::bail!("quota exceeded")
        }
    }

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n[]\n```"), "[]");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn parses_fenced_script() {
        let script = parse_generated(&format!("```json\n{}\n```", VALID)).unwrap();
        assert_eq!(script.source, ScriptSource::Generated);
        assert_eq!(script.body.len(), 2);
        assert_eq!(script.quote.unwrap().author, "Oscar Wilde");
    }

    #[test]
    fn missing_field_is_rejected() {
        let err = parse_generated(r#"{"hook": "h", "body": ["b"], "cta": "c"}"#).unwrap_err();
        assert!(err.to_string().contains("invalid script JSON"));
    }

    #[test]
    fn narration_joins_parts_with_pauses() {
        let script = ScriptDocument {
            hook: "Hook.".into(),
            body: vec!["A.".into(), "B.".into()],
            cta: "Follow.".into(),
            ..ScriptDocument::default()
        };
        assert_eq!(script.build_narration(), "Hook. ... A. ... B. ... Follow.");
    }

    #[test]
    fn prompt_mentions_selection() {
        let config = AppConfig::default();
        let sel = selection();
        let niche = config.niche(&sel.niche).unwrap();
        let request = ScriptRequest::new(&sel, niche, config.style(&sel.style), 55.0);
        let prompt = request.prompt();
        assert!(prompt.contains("TOPIC: budgeting rules that work"));
        assert!(prompt.contains("NICHE: Wealth Finance"));
        assert!(prompt.contains("STYLE: Listicle Tips"));
        assert!(prompt.contains("137 words"));
        assert!(prompt.contains(r##""dynamic_hashtags": ["#tag1", "#tag2", "#tag3"]"##));
        assert!(prompt.trim_end().ends_with('}'));
    }

    #[test]
    fn backup_prefers_matching_niche() {
        let store = MemoryStore::new();
        let backups = BackupScripts {
            scripts: vec![
                BackupScript {
                    niche: Some("health_wellness".into()),
                    hook: "health hook".into(),
                    body: vec!["b".into()],
                    cta: "c".into(),
                    ..BackupScript::default()
                },
                BackupScript {
                    niche: Some("wealth_finance".into()),
                    hook: "wealth hook".into(),
                    body: vec!["b".into()],
                    cta: "c".into(),
                    caption: Some("shared caption".into()),
                    ..BackupScript::default()
                },
            ],
        };
        store.save(BACKUP_SCRIPTS_KEY, &backups).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..10 {
            let script = fallback_script(&store, "wealth_finance", "saving", &mut rng);
            assert_eq!(script.hook, "wealth hook");
            assert_eq!(script.ig_caption, "shared caption");
            assert_eq!(script.fb_caption, "shared caption");
            assert_eq!(script.title_text, "Saving");
            assert_eq!(script.source, ScriptSource::Fallback);
        }
    }

    #[test]
    fn no_backups_gives_emergency_script() {
        let store = MemoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let script = fallback_script(&store, "wealth_finance", "debt payoff strategies", &mut rng);
        assert!(script.hook.contains("debt payoff strategies"));
        assert_eq!(script.title_text, "Debt Payoff Strategies");
        assert_eq!(script.body.len(), 4);
    }

    #[tokio::test]
    async fn failing_generator_falls_back_and_enriches() {
        let store = MemoryStore::new();
        let config = AppConfig::default();
        let mut rng = StdRng::seed_from_u64(4);
        let generator = FailingGenerator;
        let script = produce_script(
            Some(&generator as &dyn ScriptGenerator),
            &RetryPolicy::none(),
            &config,
            &selection(),
            &store,
            &mut rng,
        )
        .await;
        assert_eq!(script.source, ScriptSource::Fallback);
        assert_eq!(script.niche, "wealth_finance");
        assert_eq!(script.text_position, TextPosition::Top);
        assert!(script.search_terms.contains(&"money".to_string()));
        assert!(script.narration.starts_with(&script.hook));
        assert!(script.narration.ends_with(&script.cta));

        let key = archive_script(&store, &script, "2026-02-01").unwrap();
        assert_eq!(key, "scripts_archive/2026-02-01_wealth_finance_listicle_tips");
        assert!(store.raw(&key).is_some());
    }

    #[tokio::test]
    async fn gemini_client_parses_candidate_text() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": format!("```json\n{}\n```", VALID)}]}}]
        });
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new("test-key", Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri());
        let config = AppConfig::default();
        let sel = selection();
        let request = ScriptRequest::new(&sel, config.niche(&sel.niche).unwrap(), None, 55.0);
        let script = client.generate(&request).await.unwrap();
        assert_eq!(script.title_text, "Big Title");
    }

    #[tokio::test]
    async fn gemini_http_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let client = GeminiClient::new("k", Duration::from_secs(5))
            .unwrap()
            .with_base_url(server.uri());
        let config = AppConfig::default();
        let sel = selection();
        let request = ScriptRequest::new(&sel, config.niche(&sel.niche).unwrap(), None, 55.0);
        assert!(client.generate(&request).await.is_err());
    }
}
