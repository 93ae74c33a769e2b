//! Error types shared across the pipeline.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub type MediaResult<T> = Result<T, MediaError>;

/// Errors raised while acquiring, probing or rendering media.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Only {found} clips available, need at least {needed}")]
    InsufficientClips { found: usize, needed: usize },

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Could not parse media duration from '{0}'")]
    InvalidDuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }
}

/// Errors writing a persisted document. Reads never fail, they fall back to defaults.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write document '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize document '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unknown profile '{0}'")]
    UnknownProfile(String),

    #[error("profile references unknown niche '{0}'")]
    UnknownNiche(String),

    #[error("niche '{0}' has no topics")]
    EmptyTopics(String),

    #[error("{0} catalog is empty")]
    EmptyCatalog(&'static str),

    #[error("invalid video setting: {0}")]
    InvalidVideo(String),

    #[error("invalid retry setting: {0}")]
    InvalidRetry(String),

    #[error("duplicate {0} id '{1}'")]
    DuplicateId(&'static str, String),
}

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ContentCalendar,
    ScriptGeneration,
    VoiceGeneration,
    VideoGeneration,
    SocialPosting,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::ContentCalendar => "Content Calendar",
            Step::ScriptGeneration => "Script Generation",
            Step::VoiceGeneration => "Voice Generation",
            Step::VideoGeneration => "Video Generation",
            Step::SocialPosting => "Social Posting",
        };
        f.write_str(name)
    }
}

/// A fatal-for-run failure tagged with the step that raised it.
#[derive(Debug, Error)]
#[error("{step} failed: {source:#}")]
pub struct StepFailure {
    pub step: Step,
    #[source]
    pub source: anyhow::Error,
}

impl StepFailure {
    pub fn new(step: Step, source: impl Into<anyhow::Error>) -> Self {
        Self {
            step,
            source: source.into(),
        }
    }
}

/// Extension for tagging any fallible result with a pipeline step.
pub trait StepContext<T> {
    fn step(self, step: Step) -> Result<T, StepFailure>;
}

impl<T, E> StepContext<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn step(self, step: Step) -> Result<T, StepFailure> {
        self.map_err(|e| StepFailure::new(step, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_failure_names_the_step() {
        let err: Result<(), MediaError> = Err(MediaError::InsufficientClips { found: 1, needed: 2 });
        let failure = err.step(Step::VideoGeneration).unwrap_err();
        assert_eq!(failure.step, Step::VideoGeneration);
        let text = failure.to_string();
        assert!(text.starts_with("Video Generation failed"));
        assert!(text.contains("Only 1 clips available"));
    }
}
