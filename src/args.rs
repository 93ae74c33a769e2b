use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "social-autopilot", about = "Daily short-video content pipeline")]
pub struct Args {
    #[clap(long, default_value = "autopilot.toml")]
    pub config: PathBuf,

    /// Brand profile to run; overrides `active_profile` from the config.
    #[clap(long)]
    pub profile: Option<String>,

    /// Run every step except upload and posting.
    #[clap(long, env = "DRY_RUN")]
    pub dry_run: bool,

    #[clap(long, default_value = "info")]
    pub log_level: String,

    #[clap(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    #[clap(long, env = "PEXELS_API_KEY", hide_env_values = true)]
    pub pexels_api_key: Option<String>,

    #[clap(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    #[clap(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,
}
