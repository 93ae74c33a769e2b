//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};

const STDERR_TAIL_CHARS: usize = 500;

#[derive(Debug, Clone)]
struct Input {
    /// Arguments placed before this input's `-i`
    args: Vec<String>,
    path: PathBuf,
}

/// Builder for FFmpeg commands with any number of inputs.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<Input>,
    output: PathBuf,
    output_args: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
        }
    }

    /// Add an input file.
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.input_with(std::iter::empty::<String>(), path)
    }

    /// Add an input file preceded by input options such as `-f concat`.
    pub fn input_with<I, S>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(Input {
            args: args.into_iter().map(Into::into).collect(),
            path: path.as_ref().to_path_buf(),
        });
        self
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Limit output duration.
    pub fn duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(format!("{:.3}", seconds))
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn audio_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-af").output_arg(filter)
    }

    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    pub fn map(self, stream: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(stream)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn crf(self, crf: u8) -> Self {
        self.output_arg("-crf").output_arg(crf.to_string())
    }

    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    pub fn frame_rate(self, fps: u32) -> Self {
        self.output_arg("-r").output_arg(fps.to_string())
    }

    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-v".to_string(), "error".to_string()];
        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().to_string());
        }
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());
        args
    }

    /// Run the command, capturing stderr for the error on failure.
    pub async fn run(&self) -> MediaResult<()> {
        let ffmpeg = which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;
        let args = self.build_args();
        debug!("Running: ffmpeg {}", args.join(" "));

        let mut cmd = Command::new(ffmpeg);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let output = cmd.output().await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr_tail(&stderr);
        warn!(
            "ffmpeg exited with {:?} writing {}: {}",
            output.status.code(),
            self.output.display(),
            tail
        );
        Err(MediaError::ffmpeg_failed(
            format!("ffmpeg could not produce {}", self.output.display()),
            Some(tail),
            output.status.code(),
        ))
    }
}

fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    trimmed
        .chars()
        .skip(count.saturating_sub(STDERR_TAIL_CHARS))
        .collect()
}

pub fn ffmpeg_available() -> bool {
    which::which("ffmpeg").is_ok()
}

/// Quote a filter option value for use inside `-filter_complex`.
///
/// FFmpeg unescapes the value twice: once while splitting the graph, then
/// again while splitting the filter's `key=value` options. The value is
/// escaped for the option level first, then wrapped as one quoted graph token.
pub fn quote_filter_value(value: &str) -> String {
    let option_level = value
        .replace('\\', "\\\\")
        .replace('\'', "\\'")
        .replace(':', "\\:");
    format!("'{}'", option_level.replace('\'', "'\\''"))
}

/// Quoted filter value for a path, with `/` separators.
pub fn escape_filter_path(path: &Path) -> String {
    quote_filter_value(&path.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_keep_input_order_and_options() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input("video.mp4")
            .input_with(["-f", "concat", "-safe", "0"], "list.txt")
            .map("[vout]")
            .video_codec("libx264")
            .duration(12.5);
        let args = cmd.build_args();
        assert_eq!(&args[..3], &["-y", "-v", "error"]);
        let first = args.iter().position(|a| a == "video.mp4").unwrap();
        let concat = args.iter().position(|a| a == "concat").unwrap();
        let second = args.iter().position(|a| a == "list.txt").unwrap();
        assert!(first < concat && concat < second);
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
        assert!(args.windows(2).any(|w| w == ["-t", "12.500"]));
    }

    #[test]
    fn stderr_tail_keeps_end() {
        let long = format!("{}END", "x".repeat(1000));
        let tail = stderr_tail(&long);
        assert_eq!(tail.chars().count(), STDERR_TAIL_CHARS);
        assert!(tail.ends_with("END"));
    }

    #[test]
    fn values_are_escaped_for_both_parse_levels() {
        assert_eq!(quote_filter_value("plain"), "'plain'");
        assert_eq!(quote_filter_value("it's"), r"'it\'\''s'");
        assert_eq!(quote_filter_value(r"a\b:c"), r"'a\\b\:c'");
        assert_eq!(quote_filter_value("x,y;[z]"), "'x,y;[z]'");
    }

    #[test]
    fn filter_paths_are_escaped() {
        let escaped = escape_filter_path(Path::new("C:/fonts/it's.ttf"));
        assert_eq!(escaped, r"'C\:/fonts/it\'\''s.ttf'");
    }
}
