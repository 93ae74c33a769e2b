//! Application configuration.
//!
//! Loaded once from TOML at startup and passed explicitly to every component.
//! Every section is optional; absent fields take the built-in defaults.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;

/// Upper bound for configured retry delays, in seconds.
pub const MAX_RETRY_DELAY_SECS: f64 = 3600.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub active_profile: String,
    pub profiles: Vec<Profile>,
    pub niches: Vec<Niche>,
    pub styles: Vec<Style>,
    pub video: VideoSettings,
    pub music: MusicSettings,
    pub quote: QuoteSettings,
    pub font: FontSettings,
    pub voice: VoiceSettings,
    pub posting: PostingSettings,
    pub retry: RetrySettings,
    pub http: HttpSettings,
    pub paths: PathSettings,
    /// Offset from UTC used for "today" and the weekly summary day.
    pub utc_offset_hours: i32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            active_profile: "default".into(),
            profiles: vec![Profile::default()],
            niches: default_niches(),
            styles: default_styles(),
            video: VideoSettings::default(),
            music: MusicSettings::default(),
            quote: QuoteSettings::default(),
            font: FontSettings::default(),
            voice: VoiceSettings::default(),
            posting: PostingSettings::default(),
            retry: RetrySettings::default(),
            http: HttpSettings::default(),
            paths: PathSettings::default(),
            utc_offset_hours: 4,
        }
    }
}

impl AppConfig {
    /// Reads `path` if it exists, otherwise uses defaults. The result is validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            info!("Loaded config from {}", path.display());
            toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            info!("Config {} not found, using built-in defaults", path.display());
            AppConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.niches.is_empty() {
            return Err(ConfigError::EmptyCatalog("niche"));
        }
        if self.styles.is_empty() {
            return Err(ConfigError::EmptyCatalog("style"));
        }
        if let Some(id) = first_duplicate(self.niches.iter().map(|n| n.id.as_str())) {
            return Err(ConfigError::DuplicateId("niche", id));
        }
        if let Some(id) = first_duplicate(self.styles.iter().map(|s| s.id.as_str())) {
            return Err(ConfigError::DuplicateId("style", id));
        }
        let profile = self.profile()?;
        if profile.niches.is_empty() {
            return Err(ConfigError::EmptyCatalog("profile niche"));
        }
        if let Some(id) = first_duplicate(profile.niches.iter().map(String::as_str)) {
            return Err(ConfigError::DuplicateId("profile niche", id));
        }
        for id in &profile.niches {
            let niche = self
                .niche(id)
                .ok_or_else(|| ConfigError::UnknownNiche(id.clone()))?;
            if niche.topics.is_empty() {
                return Err(ConfigError::EmptyTopics(id.clone()));
            }
        }
        let v = &self.video;
        if v.width == 0 || v.height == 0 || v.fps == 0 {
            return Err(ConfigError::InvalidVideo("width, height and fps must be positive".into()));
        }
        if v.clip_duration <= v.crossfade_duration {
            return Err(ConfigError::InvalidVideo(
                "clip_duration must exceed crossfade_duration".into(),
            ));
        }
        let r = &self.retry;
        for (name, secs) in [("base_delay_secs", r.base_delay_secs), ("max_delay_secs", r.max_delay_secs)] {
            if !(0.0..=MAX_RETRY_DELAY_SECS).contains(&secs) {
                return Err(ConfigError::InvalidRetry(format!(
                    "{name} must be between 0 and {MAX_RETRY_DELAY_SECS}, got {secs}"
                )));
            }
        }
        Ok(())
    }

    pub fn profile(&self) -> Result<&Profile, ConfigError> {
        self.profiles
            .iter()
            .find(|p| p.id == self.active_profile)
            .ok_or_else(|| ConfigError::UnknownProfile(self.active_profile.clone()))
    }

    pub fn niche(&self, id: &str) -> Option<&Niche> {
        self.niches.iter().find(|n| n.id == id)
    }

    pub fn style(&self, id: &str) -> Option<&Style> {
        self.styles.iter().find(|s| s.id == id)
    }

    /// Niches enabled for the active profile, in profile order.
    pub fn active_niches(&self) -> Result<Vec<Niche>, ConfigError> {
        self.profile()?
            .niches
            .iter()
            .map(|id| {
                self.niche(id)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownNiche(id.clone()))
            })
            .collect()
    }
}

/// A brand account. Several may be configured, one is active per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub id: String,
    pub channel_name: String,
    pub tagline: String,
    pub watermark_text: String,
    pub cta_text: String,
    /// Name of the environment variable holding the publisher API key.
    pub publisher_key_env: String,
    pub platforms: Vec<String>,
    pub niches: Vec<String>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            id: "default".into(),
            channel_name: "Daily Growth Hub".into(),
            tagline: "Grow Every Day".into(),
            watermark_text: "@dailygrowthhub".into(),
            cta_text: "Follow for daily tips!".into(),
            publisher_key_env: "AYRSHARE_API_KEY".into(),
            platforms: ["instagram", "facebook", "linkedin", "tiktok", "twitter"]
                .map(String::from)
                .to_vec(),
            niches: [
                "health_wellness",
                "wealth_finance",
                "ecommerce_business",
                "mental_wellbeing",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Niche {
    pub id: String,
    pub color: String,
    #[serde(default)]
    pub color_name: String,
    pub accent: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub search_terms: Vec<String>,
}

impl Niche {
    /// "health_wellness" -> "Health Wellness"
    pub fn display_name(&self) -> String {
        crate::utils::title_case(&self.id.replace('_', " "))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextPosition {
    Top,
    #[default]
    Center,
    Bottom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub prompt_hint: String,
    #[serde(default)]
    pub text_position: TextPosition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub clip_duration: f64,
    pub clips_per_video: usize,
    pub crossfade_duration: f64,
    pub ken_burns_zoom: f64,
    pub text_font_size: u32,
    pub title_font_size: u32,
    pub bgm_volume: f64,
    pub voice_volume: f64,
    pub loudness_target: f64,
    pub loudness_true_peak: f64,
    pub loudness_range: f64,
    /// Below this many provider clips the local fallback directory is used.
    pub min_clips_from_provider: usize,
    pub min_clip_height: u32,
    pub burn_captions: bool,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            duration_seconds: 55.0,
            width: 1080,
            height: 1920,
            fps: 30,
            clip_duration: 6.0,
            clips_per_video: 4,
            crossfade_duration: 0.8,
            ken_burns_zoom: 1.08,
            text_font_size: 52,
            title_font_size: 64,
            bgm_volume: 0.20,
            voice_volume: 1.0,
            loudness_target: -16.0,
            loudness_true_peak: -1.5,
            loudness_range: 11.0,
            min_clips_from_provider: 3,
            min_clip_height: 720,
            burn_captions: false,
        }
    }
}

impl VideoSettings {
    pub fn loudnorm_filter(&self) -> String {
        format!(
            "loudnorm=I={}:TP={}:LRA={}",
            self.loudness_target, self.loudness_true_peak, self.loudness_range
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicSettings {
    /// Files smaller than this are treated as broken downloads.
    pub min_bytes: u64,
    pub min_seconds: f64,
    pub extensions: Vec<String>,
}

impl Default for MusicSettings {
    fn default() -> Self {
        Self {
            min_bytes: 50_000,
            min_seconds: 10.0,
            extensions: ["mp3", "wav", "m4a", "ogg"].map(String::from).to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotePlacement {
    Start,
    #[default]
    Middle,
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteSettings {
    pub enabled: bool,
    pub position: QuotePlacement,
    pub display_seconds: f64,
    pub wrap_chars: usize,
    pub font_size: u32,
    pub line_height: u32,
    pub padding: u32,
}

impl Default for QuoteSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            position: QuotePlacement::Middle,
            display_seconds: 6.0,
            wrap_chars: 28,
            font_size: 48,
            line_height: 62,
            padding: 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FontSettings {
    pub cache_path: PathBuf,
    pub download_url: Option<String>,
    pub min_bytes: u64,
    pub system_fallbacks: Vec<PathBuf>,
    pub system_dirs: Vec<PathBuf>,
}

impl Default for FontSettings {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from("fonts/Montserrat-Bold.ttf"),
            download_url: Some(
                "https://github.com/JulietaUla/Montserrat/raw/master/fonts/ttf/Montserrat-Bold.ttf"
                    .into(),
            ),
            min_bytes: 10_000,
            system_fallbacks: vec![
                PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf"),
                PathBuf::from("/usr/share/fonts/TTF/DejaVuSans-Bold.ttf"),
                PathBuf::from("/Library/Fonts/Arial Bold.ttf"),
            ],
            system_dirs: vec![
                PathBuf::from("/usr/share/fonts"),
                PathBuf::from("/usr/local/share/fonts"),
                PathBuf::from("/Library/Fonts"),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    pub piper_model: String,
    pub chunk_chars: usize,
    pub normalize: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            piper_model: "./tts/en_US-hfc_male-medium.onnx".into(),
            chunk_chars: 250,
            normalize: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostingSettings {
    pub caption_max_length: usize,
    pub ig_max_hashtags: usize,
    pub fb_max_hashtags: usize,
}

impl Default for PostingSettings {
    fn default() -> Self {
        Self {
            caption_max_length: 2200,
            ig_max_hashtags: 25,
            fb_max_hashtags: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    pub max_delay_secs: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 2.0,
            max_delay_secs: 30.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub upload_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            upload_timeout_secs: 120,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    pub bgm_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub fallback_clips_dir: PathBuf,
    /// Root of the document store (calendar, history, archive).
    pub store_root: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            bgm_dir: PathBuf::from("bgm"),
            temp_dir: PathBuf::from("temp"),
            output_dir: PathBuf::from("output"),
            fallback_clips_dir: PathBuf::from("fallback_clips"),
            store_root: PathBuf::from("."),
        }
    }
}

fn first_duplicate<'a>(mut ids: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut seen = HashSet::new();
    ids.find(|id| !seen.insert(*id)).map(str::to_string)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn default_niches() -> Vec<Niche> {
    vec![
        Niche {
            id: "health_wellness".into(),
            color: "#2ECC71".into(),
            color_name: "green".into(),
            accent: "#27AE60".into(),
            topics: strings(&[
                "morning routines for energy",
                "gut health secrets",
                "sleep optimization tips",
                "natural immunity boosters",
                "hydration and health",
                "benefits of walking daily",
                "stress and physical health",
                "anti-inflammatory foods",
                "posture and back pain",
                "breathing exercises for health",
                "intermittent fasting basics",
                "superfoods you should eat daily",
                "screen time and eye health",
                "cold shower benefits",
                "stretching for desk workers",
                "meal prep for busy people",
                "benefits of morning sunlight",
                "how sugar affects your body",
                "simple detox habits",
                "exercise without a gym",
            ]),
            hashtags: strings(&[
                "#healthtips",
                "#wellness",
                "#healthylifestyle",
                "#nutrition",
                "#selfcare",
                "#healthyliving",
                "#wellnesstips",
                "#holistichealth",
                "#fitlife",
                "#healthyhabits",
            ]),
            search_terms: strings(&[
                "healthy lifestyle",
                "wellness",
                "fitness",
                "nutrition",
                "health tips",
                "exercise",
                "yoga",
            ]),
        },
        Niche {
            id: "wealth_finance".into(),
            color: "#F1C40F".into(),
            color_name: "gold".into(),
            accent: "#F39C12".into(),
            topics: strings(&[
                "compound interest explained simply",
                "budgeting rules that work",
                "passive income ideas for beginners",
                "investing mistakes to avoid",
                "emergency fund importance",
                "debt payoff strategies",
                "saving money on daily expenses",
                "side hustle ideas",
                "financial freedom roadmap",
                "money mindset shifts",
                "understanding credit scores",
                "real estate investing basics",
                "stock market for beginners",
                "negotiating salary tips",
                "automating your savings",
                "frugal habits of millionaires",
                "how to start investing with little money",
                "avoiding lifestyle inflation",
                "building multiple income streams",
                "financial mistakes in your 20s and 30s",
            ]),
            hashtags: strings(&[
                "#financetips",
                "#moneytips",
                "#investing",
                "#personalfinance",
                "#wealthbuilding",
                "#financialfreedom",
                "#budgeting",
                "#passiveincome",
                "#moneymindset",
                "#financialliteracy",
            ]),
            search_terms: strings(&[
                "finance",
                "money",
                "investing",
                "wealth",
                "savings",
                "business success",
            ]),
        },
        Niche {
            id: "ecommerce_business".into(),
            color: "#3498DB".into(),
            color_name: "blue".into(),
            accent: "#2980B9".into(),
            topics: strings(&[
                "starting an online store",
                "product photography tips",
                "social media marketing for small business",
                "email marketing basics",
                "customer retention strategies",
                "dropshipping pros and cons",
                "branding tips for small businesses",
                "pricing strategies that work",
                "turning followers into customers",
                "AI tools for business owners",
                "ecommerce SEO basics",
                "building trust with customers online",
                "content marketing for ecommerce",
                "best platforms for selling online",
                "scaling a one-person business",
                "writing product descriptions that sell",
                "handling negative reviews",
                "shipping and logistics simplified",
                "building an email list from scratch",
                "creating urgency without being pushy",
            ]),
            hashtags: strings(&[
                "#ecommerce",
                "#onlinebusiness",
                "#entrepreneur",
                "#smallbusiness",
                "#businesstips",
                "#digitalmarketing",
                "#hustle",
                "#startup",
                "#sidehustle",
                "#businessowner",
            ]),
            search_terms: strings(&[
                "business",
                "ecommerce",
                "entrepreneur",
                "startup",
                "marketing",
                "online store",
            ]),
        },
        Niche {
            id: "mental_wellbeing".into(),
            color: "#9B59B6".into(),
            color_name: "purple".into(),
            accent: "#8E44AD".into(),
            topics: strings(&[
                "managing anxiety naturally",
                "building self-confidence",
                "digital detox benefits",
                "gratitude practice for happiness",
                "overcoming procrastination",
                "setting healthy boundaries",
                "mindfulness for beginners",
                "dealing with negative thoughts",
                "building resilience",
                "journaling for mental health",
                "morning affirmations that work",
                "letting go of perfectionism",
                "social media and mental health",
                "building positive habits",
                "finding purpose and meaning",
                "coping with loneliness",
                "how to stay motivated",
                "power of saying no",
                "overcoming self-doubt",
                "creating a calming evening routine",
            ]),
            hashtags: strings(&[
                "#mentalhealth",
                "#mindfulness",
                "#selfcare",
                "#anxiety",
                "#motivation",
                "#mentalhealthawareness",
                "#positivity",
                "#mindset",
                "#selfimprovement",
                "#growthmindset",
            ]),
            search_terms: strings(&[
                "meditation",
                "mindfulness",
                "calm",
                "peaceful",
                "mental health",
                "wellbeing",
                "nature",
            ]),
        },
    ]
}

pub fn default_styles() -> Vec<Style> {
    vec![
        Style {
            id: "motivational_quote".into(),
            description: "Inspirational quote with emotional buildup".into(),
            prompt_hint: "Start with a powerful quote. Build emotion. End with an actionable takeaway.".into(),
            text_position: TextPosition::Center,
        },
        Style {
            id: "listicle_tips".into(),
            description: "Numbered tips (3-5 actionable points)".into(),
            prompt_hint: "Present 3-5 numbered tips. Each tip should be concise and actionable. Use a countdown or list format.".into(),
            text_position: TextPosition::Top,
        },
        Style {
            id: "story_narrative".into(),
            description: "Mini-story that teaches a lesson".into(),
            prompt_hint: "Tell a short relatable story or scenario. Create tension, then resolve it with a lesson. Make it personal and emotional.".into(),
            text_position: TextPosition::Bottom,
        },
        Style {
            id: "did_you_know".into(),
            description: "Surprising fact that hooks curiosity".into(),
            prompt_hint: "Start with 'Did you know...' or a shocking statistic. Then explain why it matters and what to do about it.".into(),
            text_position: TextPosition::Center,
        },
        Style {
            id: "problem_solution".into(),
            description: "Present a common problem, then the solution".into(),
            prompt_hint: "Start by describing a frustrating problem the audience faces. Agitate the pain. Then present a clear, simple solution.".into(),
            text_position: TextPosition::Top,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_validate() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.active_niches().unwrap().len(), 4);
        assert_eq!(config.styles.len(), 5);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = AppConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.video.width, 1080);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("autopilot.toml");
        fs::write(
            &path,
            r#"
utc_offset_hours = 0

[video]
clip_duration = 5.0
burn_captions = true

[quote]
position = "end"
"#,
        )
        .unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.utc_offset_hours, 0);
        assert_eq!(config.video.clip_duration, 5.0);
        assert!(config.video.burn_captions);
        assert_eq!(config.video.fps, 30);
        assert_eq!(config.quote.position, QuotePlacement::End);
        assert_eq!(config.niches.len(), 4);
    }

    #[test]
    fn unknown_profile_niche_is_rejected() {
        let mut config = AppConfig::default();
        config.profiles[0].niches.push("astrology".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownNiche(id)) if id == "astrology"
        ));
    }

    #[test]
    fn unknown_active_profile_is_rejected() {
        let config = AppConfig {
            active_profile: "brand2".into(),
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::UnknownProfile(_))));
    }

    #[test]
    fn crossfade_longer_than_clip_is_rejected() {
        let mut config = AppConfig::default();
        config.video.crossfade_duration = 7.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidVideo(_))));
    }

    #[test]
    fn duplicate_profile_niche_is_rejected() {
        let mut config = AppConfig::default();
        config.profiles[0].niches.push("health_wellness".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateId("profile niche", id)) if id == "health_wellness"
        ));
    }

    #[test]
    fn duplicate_catalog_style_is_rejected() {
        let mut config = AppConfig::default();
        let copy = config.styles[0].clone();
        config.styles.push(copy);
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateId("style", _))));
    }

    #[test]
    fn oversized_retry_delay_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("autopilot.toml");
        fs::write(&path, "[retry]\nmax_delay_secs = 1e30\n").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(ConfigError::InvalidRetry(_))));

        let mut config = AppConfig::default();
        config.retry.base_delay_secs = f64::NAN;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRetry(_))));
        config.retry.base_delay_secs = -1.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRetry(_))));
    }

    #[test]
    fn display_name_title_cases_id() {
        let niche = &default_niches()[0];
        assert_eq!(niche.display_name(), "Health Wellness");
    }
}
