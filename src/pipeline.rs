//! Daily run orchestration: calendar, script, voice, video, posting.
//!
//! A failing step ends the run. The failure is written to the run history and
//! sent to the notifier, and today's post is skipped; the process still exits
//! cleanly so the next scheduled run starts fresh.

use anyhow::anyhow;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::calendar::select_todays_content;
use crate::config::AppConfig;
use crate::error::{Step, StepContext, StepFailure};
use crate::history::{self, RunHistory};
use crate::media::footage::FootageProvider;
use crate::media::{RenderContext, render_video};
use crate::notify::{self, Notifier};
use crate::publish::{PostOutcome, Publisher, publish};
use crate::retry::RetryPolicy;
use crate::script::{ScriptDocument, ScriptGenerator, archive_script, produce_script};
use crate::store::{DocumentStore, HISTORY_KEY};
use crate::tts::NarrationSynthesizer;
use crate::utils::LocalClock;

const NARRATION_FILE: &str = "narration.wav";

/// External services the run talks to. Optional ones degrade or fail the
/// step that needs them when absent.
pub struct Collaborators {
    pub script: Option<Box<dyn ScriptGenerator>>,
    pub voice: Box<dyn NarrationSynthesizer>,
    pub footage: Option<Box<dyn FootageProvider>>,
    pub publisher: Option<Box<dyn Publisher>>,
    pub notifier: Box<dyn Notifier>,
}

#[derive(Debug)]
pub struct Published {
    pub script: ScriptDocument,
    pub video: PathBuf,
    pub post: PostOutcome,
}

#[derive(Debug)]
pub enum RunOutcome {
    Published(Published),
    Failed(StepFailure),
}

pub struct Pipeline<S> {
    config: AppConfig,
    store: S,
    collaborators: Collaborators,
    clock: LocalClock,
    retry: RetryPolicy,
    http: reqwest::Client,
    dry_run: bool,
}

impl<S: DocumentStore> Pipeline<S> {
    pub fn new(
        config: AppConfig,
        store: S,
        collaborators: Collaborators,
        dry_run: bool,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http.timeout())
            .build()?;
        Ok(Self {
            clock: LocalClock::new(config.utc_offset_hours),
            retry: RetryPolicy::from(&config.retry),
            config,
            store,
            collaborators,
            http,
            dry_run,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run every step once. Failures are recorded and reported, never returned.
    pub async fn run(&self) -> RunOutcome {
        info!(
            dry_run = self.dry_run,
            "Starting Social AutoPilot run at {}",
            self.clock.display_now()
        );
        self.reset_workspace().await;

        let mut rng = StdRng::from_os_rng();
        let mut script = None;
        match self.execute(&mut rng, &mut script).await {
            Ok(published) => {
                self.record_success(&published, self.clock.is_sunday()).await;
                let status = if self.dry_run { "generated (dry run)" } else { "published" };
                info!("Pipeline complete, video {}", status);
                RunOutcome::Published(published)
            }
            Err(failure) => {
                self.record_failure(&failure, script.as_ref()).await;
                RunOutcome::Failed(failure)
            }
        }
    }

    /// Leftovers from the previous run are removed before anything is written.
    async fn reset_workspace(&self) {
        let temp = &self.config.paths.temp_dir;
        if temp.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(temp).await {
                warn!("Could not clear {}: {}", temp.display(), e);
            }
        }
        if let Err(e) = tokio::fs::create_dir_all(temp).await {
            warn!("Could not create {}: {}", temp.display(), e);
        }
    }

    async fn execute<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        script_slot: &mut Option<ScriptDocument>,
    ) -> Result<Published, StepFailure> {
        let today = self.clock.today();

        info!("Selecting today's content");
        let niches = self.config.active_niches().step(Step::ContentCalendar)?;
        let selection =
            select_todays_content(&self.store, &niches, &self.config.styles, &today, rng)
                .step(Step::ContentCalendar)?;

        info!("Generating script");
        let script = produce_script(
            self.collaborators.script.as_deref(),
            &self.retry,
            &self.config,
            &selection,
            &self.store,
            rng,
        )
        .await;
        if let Err(e) = archive_script(&self.store, &script, &today) {
            warn!("Could not archive script: {}", e);
        }
        *script_slot = Some(script.clone());

        info!("Generating voice");
        let narration = self.config.paths.temp_dir.join(NARRATION_FILE);
        let voice = self.collaborators.voice.as_ref();
        let text = script.narration.as_str();
        self.retry
            .run("Voice generation", || voice.synthesize(text, &narration))
            .await
            .step(Step::VoiceGeneration)?;

        info!("Generating video");
        let video = self
            .render(&script, &narration, rng)
            .await
            .step(Step::VideoGeneration)?;

        info!("Posting");
        let post = self
            .post(&video, &script, rng)
            .await
            .step(Step::SocialPosting)?;

        Ok(Published { script, video, post })
    }

    async fn render<R: Rng + ?Sized>(
        &self,
        script: &ScriptDocument,
        narration: &Path,
        rng: &mut R,
    ) -> anyhow::Result<PathBuf> {
        let profile = self.config.profile()?;
        let niche = self
            .config
            .niche(&script.niche)
            .ok_or_else(|| anyhow!("niche '{}' is not in the catalog", script.niche))?;
        let ctx = RenderContext {
            config: &self.config,
            profile,
            niche,
            footage: self.collaborators.footage.as_deref(),
            retry: &self.retry,
            http: &self.http,
        };
        render_video(&ctx, script, narration, rng).await
    }

    pub async fn post<R: Rng + ?Sized>(
        &self,
        video: &Path,
        script: &ScriptDocument,
        rng: &mut R,
    ) -> anyhow::Result<PostOutcome> {
        if self.dry_run {
            info!("Dry run, skipping upload and posting");
            return Ok(PostOutcome::dry_run());
        }
        let profile = self.config.profile()?;
        let publisher = self.collaborators.publisher.as_deref().ok_or_else(|| {
            anyhow!(
                "publisher API key not found in env var {}",
                profile.publisher_key_env
            )
        })?;
        publish(
            publisher,
            &self.retry,
            video,
            script,
            &profile.platforms,
            &self.config.posting,
            rng,
        )
        .await
    }

    fn platforms(&self) -> Vec<String> {
        self.config
            .profile()
            .map(|p| p.platforms.clone())
            .unwrap_or_default()
    }

    async fn notify(&self, message: &str) {
        let notifier = self.collaborators.notifier.as_ref();
        match self
            .retry
            .run("Telegram notification", || notifier.send(message))
            .await
        {
            Ok(true) => info!("Notification sent"),
            Ok(false) => {}
            Err(e) => warn!("Notification failed: {:#}", e),
        }
    }

    /// History entry, success message and, when `weekly`, the weekly summary.
    pub async fn record_success(&self, published: &Published, weekly: bool) {
        let platforms = self.platforms();
        let entry = history::success_entry(
            &published.script,
            &platforms,
            self.dry_run,
            &self.clock.today(),
            &self.clock.now().to_rfc3339(),
        );
        if let Err(e) = history::append(&self.store, entry) {
            warn!("History logging failed: {}", e);
        }

        let message = notify::success_message(
            &published.script,
            &platforms,
            self.dry_run,
            &self.clock.display_now(),
        );
        self.notify(&message).await;

        if weekly {
            info!("Sending weekly summary");
            let history: RunHistory = self.store.load(HISTORY_KEY);
            let summary = history::weekly_summary(&history, &self.clock.today());
            self.notify(&notify::weekly_message(&summary)).await;
        }
    }

    pub async fn record_failure(&self, failure: &StepFailure, script: Option<&ScriptDocument>) {
        error!(step = %failure.step, "Pipeline failed: {:#}", failure.source);

        let entry = history::error_entry(
            failure,
            script,
            &self.clock.today(),
            &self.clock.now().to_rfc3339(),
        );
        if let Err(e) = history::append(&self.store, entry) {
            warn!("Could not log error to history: {}", e);
        }

        let message = notify::error_message(
            failure.step,
            &format!("{:#}", failure.source),
            &self.clock.display_now(),
        );
        self.notify(&message).await;
        info!("Skipping today's post, will retry on the next run");
    }
}
