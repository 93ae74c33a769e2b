//! Chat notifications through the Telegram Bot API.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

use crate::error::Step;
use crate::history::WeeklySummary;
use crate::script::ScriptDocument;
use crate::utils::{title_case, truncate_chars};

pub const TELEGRAM_BASE_URL: &str = "https://api.telegram.org";
const MAX_ERROR_CHARS: usize = 400;
const MAX_FAILURE_CHARS: usize = 60;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an HTML-formatted message. Returns false when delivery was
    /// skipped rather than attempted.
    async fn send(&self, html: &str) -> anyhow::Result<bool>;
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    credentials: Option<(String, String)>,
    base_url: String,
}

impl TelegramNotifier {
    pub fn new(
        bot_token: Option<String>,
        chat_id: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let credentials = match (bot_token, chat_id) {
            (Some(token), Some(chat)) if !token.is_empty() && !chat.is_empty() => Some((token, chat)),
            _ => None,
        };
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            credentials,
            base_url: TELEGRAM_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, html: &str) -> anyhow::Result<bool> {
        let Some((token, chat_id)) = &self.credentials else {
            warn!("Telegram credentials not set, skipping notification");
            return Ok(false);
        };

        self.client
            .post(format!("{}/bot{}/sendMessage", self.base_url, token))
            .json(&json!({
                "chat_id": chat_id,
                "text": html,
                "parse_mode": "HTML",
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(true)
    }
}

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn display_id(id: &str) -> String {
    title_case(&id.replace('_', " "))
}

pub fn success_message(
    script: &ScriptDocument,
    platforms: &[String],
    dry_run: bool,
    now: &str,
) -> String {
    let prefix = if dry_run { "🧪 <b>DRY RUN</b> - " } else { "" };
    let verb = if dry_run { "Generated" } else { "Published" };
    let posted_to = if dry_run {
        "Not posted (dry run)".to_string()
    } else {
        platforms.iter().map(|p| display_id(p)).collect::<Vec<_>>().join(", ")
    };

    format!(
        "{prefix}✅ <b>Social AutoPilot - Post {verb}!</b>\n\n\
         📌 <b>Niche:</b> {}\n\
         📝 <b>Topic:</b> {}\n\
         🎬 <b>Title:</b> {}\n\
         🎨 <b>Style:</b> {}\n\
         🤖 <b>Script:</b> {}\n\
         📱 <b>Platforms:</b> {}\n\n\
         📅 {}",
        escape_html(&display_id(&script.niche)),
        escape_html(&script.topic),
        escape_html(&script.title_text),
        escape_html(&display_id(&script.style)),
        script.source,
        escape_html(&posted_to),
        now,
    )
}

pub fn error_message(step: Step, error: &str, now: &str) -> String {
    format!(
        "❌ <b>Social AutoPilot - Error!</b>\n\n\
         🔧 <b>Failed Step:</b> {step}\n\
         ⚠️ <b>Error:</b>\n<code>{}</code>\n\n\
         📅 {now}\n\
         <i>Check the run logs for full details.</i>",
        escape_html(&truncate_chars(error, MAX_ERROR_CHARS)),
    )
}

fn breakdown(counts: &[(String, usize)], unit: &str) -> String {
    counts
        .iter()
        .map(|(id, n)| format!("   • {}: {}{}", escape_html(&display_id(id)), n, unit))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn weekly_message(summary: &WeeklySummary) -> String {
    let mut niches = breakdown(&summary.niches, " posts");
    if niches.is_empty() {
        niches = "   No posts this week".to_string();
    }
    let styles = breakdown(&summary.styles, "");

    let mut msg = format!(
        "📊 <b>Weekly Summary - Social AutoPilot</b>\n\
         📅 Week of {} → {}\n\n\
         ✅ <b>Published:</b> {}\n\
         ❌ <b>Failed:</b> {}\n\
         🧪 <b>Dry Runs:</b> {}\n\n\
         📌 <b>Niches:</b>\n{}\n\n\
         🎨 <b>Styles:</b>\n{}\n\n",
        summary.since,
        summary.until,
        summary.published,
        summary.failed,
        summary.dry_runs,
        niches,
        styles,
    );

    if !summary.failures.is_empty() {
        let failures = summary
            .failures
            .iter()
            .map(|(date, error)| {
                format!("   • {}: {}", date, escape_html(&truncate_chars(error, MAX_FAILURE_CHARS)))
            })
            .collect::<Vec<_>>()
            .join("\n");
        msg.push_str(&format!("⚠️ <b>Failures:</b>\n{}\n", failures));
    }
    msg
}
