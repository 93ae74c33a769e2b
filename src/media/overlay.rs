//! Text overlays and audio mix for the final render.
//!
//! The overlay program is a single `[0:v] ... [vout]` filter chain of
//! `drawbox`/`drawtext` layers, each gated by an `enable` time window. Audio
//! is narration (input 1) optionally mixed with background music (input 2).

use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{Niche, Profile, QuotePlacement, QuoteSettings, TextPosition, VideoSettings};
use crate::error::{MediaError, MediaResult};
use crate::media::ffmpeg::{FfmpegCommand, escape_filter_path, quote_filter_value};
use crate::media::probe::probe_duration;
use crate::script::{QuoteDocument, ScriptDocument};
use crate::utils::{truncate_chars, wrap_text};

pub const TITLE_WINDOW: Window = Window { start: 0.5, end: 4.5 };
pub const HOOK_WINDOW: Window = Window { start: 4.5, end: 9.5 };
/// The CTA banner covers the last seconds of narration.
pub const CTA_SECONDS: f64 = 6.0;
/// Extra render time after narration ends.
const TAIL_PAD: f64 = 1.0;
/// Allowed overrun past the configured video length.
const LENGTH_TOLERANCE: f64 = 5.0;

const TITLE_BOX_HEIGHT: u32 = 180;
const TITLE_MAX_CHARS: usize = 40;
const HOOK_WRAP_CHARS: usize = 26;
const HOOK_MAX_LINES: usize = 3;
const HOOK_PADDING: u32 = 30;
const CTA_BOX_HEIGHT: u32 = 100;
const CTA_FONT_SIZE: u32 = 38;
const WATERMARK_FONT_SIZE: u32 = 26;
const MUSIC_FADE_IN: f64 = 2.0;
const MUSIC_FADE_OUT: f64 = 3.0;

/// Quoted `drawtext` text value. Layers set `expansion=none`, so `%` and
/// `{}` in the text are drawn as-is.
pub fn escape_drawtext(text: &str) -> String {
    quote_filter_value(text)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub start: f64,
    pub end: f64,
}

impl Window {
    fn enable(&self) -> String {
        format!("enable='between(t,{:.2},{:.2})'", self.start, self.end)
    }
}

pub fn cta_window(duration: f64) -> Window {
    Window {
        start: (duration - CTA_SECONDS).max(0.0),
        end: duration,
    }
}

pub fn quote_window(settings: &QuoteSettings, duration: f64) -> Window {
    let shown = settings.display_seconds;
    let start = match settings.position {
        QuotePlacement::Start => HOOK_WINDOW.end,
        QuotePlacement::Middle => duration / 2.0 - shown / 2.0,
        QuotePlacement::End => duration - CTA_SECONDS - shown,
    }
    .max(0.0);
    Window {
        start,
        end: start + shown,
    }
}

/// Vertical placement of wrapped quote lines inside a centered block.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteLayout {
    pub lines: Vec<String>,
    pub attribution: Option<String>,
    pub block_y: u32,
    pub block_height: u32,
}

impl QuoteLayout {
    pub fn new(quote: &QuoteDocument, settings: &QuoteSettings, frame_height: u32) -> Self {
        let lines = wrap_text(&format!("\u{201C}{}\u{201D}", quote.text.trim()), settings.wrap_chars);
        let author = quote.author.trim();
        let attribution = (!author.is_empty()).then(|| format!("- {}", author));

        let rows = lines.len() as u32 + u32::from(attribution.is_some());
        let block_height = rows * settings.line_height + 2 * settings.padding;
        Self {
            lines,
            attribution,
            block_y: frame_height.saturating_sub(block_height) / 2,
            block_height,
        }
    }

    pub fn line_y(&self, index: usize, settings: &QuoteSettings) -> u32 {
        self.block_y + settings.padding + index as u32 * settings.line_height
    }
}

/// Fraction of frame height where title and hook cards sit.
fn card_anchor(position: TextPosition) -> f64 {
    match position {
        TextPosition::Top => 0.12,
        TextPosition::Center => 0.40,
        TextPosition::Bottom => 0.66,
    }
}

/// Ordered overlay layers over the input video stream.
#[derive(Debug, Clone)]
pub struct OverlayProgram {
    font: String,
    layers: Vec<String>,
}

impl OverlayProgram {
    pub fn new(font: &Path) -> Self {
        Self {
            font: escape_filter_path(font),
            layers: Vec::new(),
        }
    }

    pub fn drawbox(&mut self, y: u32, height: u32, color: &str, window: Option<Window>) -> &mut Self {
        let mut layer = format!("drawbox=x=0:y={y}:w=iw:h={height}:color={color}:t=fill");
        if let Some(w) = window {
            layer.push(':');
            layer.push_str(&w.enable());
        }
        self.layers.push(layer);
        self
    }

    /// Text centered horizontally at pixel row `y`.
    pub fn centered_text(
        &mut self,
        text: &str,
        y: u32,
        size: u32,
        color: &str,
        window: Option<Window>,
    ) -> &mut Self {
        self.text(text, "(w-text_w)/2", &y.to_string(), size, color, window)
    }

    pub fn text(
        &mut self,
        text: &str,
        x: &str,
        y: &str,
        size: u32,
        color: &str,
        window: Option<Window>,
    ) -> &mut Self {
        let mut layer = format!(
            "drawtext=fontfile={}:text={}:expansion=none:fontsize={size}:fontcolor={color}:\
             borderw=2:bordercolor=black@0.6:x={x}:y={y}",
            self.font,
            escape_drawtext(text),
        );
        if let Some(w) = window {
            layer.push(':');
            layer.push_str(&w.enable());
        }
        self.layers.push(layer);
        self
    }

    pub fn subtitles(&mut self, srt: &Path) -> &mut Self {
        self.layers.push(format!(
            "subtitles=filename={}:force_style='Fontsize=14,OutlineColour=&H000000&,Outline=2,Shadow=0,Alignment=2,MarginV=60'",
            escape_filter_path(srt)
        ));
        self
    }

    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    pub fn graph(&self) -> String {
        if self.layers.is_empty() {
            return "[0:v]null[vout]".to_string();
        }
        format!("[0:v]{}[vout]", self.layers.join(","))
    }
}

pub struct CompositeRequest<'a> {
    pub timeline: &'a Path,
    pub narration: &'a Path,
    pub music: Option<&'a Path>,
    pub script: &'a ScriptDocument,
    pub quote: Option<&'a QuoteDocument>,
    pub niche: &'a Niche,
    pub profile: &'a Profile,
    pub font: &'a Path,
    pub captions: Option<&'a Path>,
    pub output: &'a Path,
}

pub struct Compositor<'a> {
    video: &'a VideoSettings,
    quote: &'a QuoteSettings,
}

impl<'a> Compositor<'a> {
    pub fn new(video: &'a VideoSettings, quote: &'a QuoteSettings) -> Self {
        Self { video, quote }
    }

    /// Narration plus pad, capped at the configured length plus tolerance.
    pub fn output_duration(&self, narration: f64) -> f64 {
        (narration + TAIL_PAD).min(self.video.duration_seconds + LENGTH_TOLERANCE)
    }

    pub fn overlay_program(&self, req: &CompositeRequest<'_>, duration: f64) -> OverlayProgram {
        let height = self.video.height;
        let mut program = OverlayProgram::new(req.font);
        let card_y = (height as f64 * card_anchor(req.script.text_position)) as u32;

        // title card
        let title = truncate_chars(req.script.title_text.trim(), TITLE_MAX_CHARS);
        program
            .drawbox(card_y, TITLE_BOX_HEIGHT, "black@0.55", Some(TITLE_WINDOW))
            .centered_text(
                &title,
                card_y + TITLE_BOX_HEIGHT.saturating_sub(self.video.title_font_size) / 2,
                self.video.title_font_size,
                &req.niche.color,
                Some(TITLE_WINDOW),
            );

        // hook card
        let mut hook_lines = wrap_text(&req.script.hook, HOOK_WRAP_CHARS);
        hook_lines.truncate(HOOK_MAX_LINES);
        let hook_line_height = self.video.text_font_size + 14;
        let hook_box = hook_lines.len() as u32 * hook_line_height + 2 * HOOK_PADDING;
        program.drawbox(card_y, hook_box, "black@0.55", Some(HOOK_WINDOW));
        for (i, line) in hook_lines.iter().enumerate() {
            program.centered_text(
                line,
                card_y + HOOK_PADDING + i as u32 * hook_line_height,
                self.video.text_font_size,
                "white",
                Some(HOOK_WINDOW),
            );
        }

        // watermark, whole video
        program.text(
            &req.profile.watermark_text,
            "30",
            "h-55",
            WATERMARK_FONT_SIZE,
            "white@0.6",
            None,
        );

        // call to action
        let cta = cta_window(duration);
        let cta_y = (height as f64 * 0.58) as u32;
        let cta_text = if req.script.cta.trim().is_empty() {
            req.profile.cta_text.as_str()
        } else {
            req.script.cta.as_str()
        };
        let mut cta_lines = wrap_text(cta_text, 40);
        cta_lines.truncate(1);
        program.drawbox(cta_y, CTA_BOX_HEIGHT, &format!("{}@0.85", req.niche.accent), Some(cta));
        if let Some(line) = cta_lines.first() {
            program.centered_text(
                line,
                cta_y + (CTA_BOX_HEIGHT - CTA_FONT_SIZE) / 2,
                CTA_FONT_SIZE,
                "white",
                Some(cta),
            );
        }

        if let Some(quote) = req.quote.filter(|_| self.quote.enabled) {
            let window = quote_window(self.quote, duration);
            let layout = QuoteLayout::new(quote, self.quote, height);
            program.drawbox(layout.block_y, layout.block_height, "black@0.6", Some(window));
            for (i, line) in layout.lines.iter().enumerate() {
                program.centered_text(
                    line,
                    layout.line_y(i, self.quote),
                    self.quote.font_size,
                    "white",
                    Some(window),
                );
            }
            if let Some(attribution) = &layout.attribution {
                program.centered_text(
                    attribution,
                    layout.line_y(layout.lines.len(), self.quote),
                    self.quote.font_size * 7 / 10,
                    &req.niche.color,
                    Some(window),
                );
            }
        }

        if let Some(srt) = req.captions {
            program.subtitles(srt);
        }
        program
    }

    pub fn audio_graph(&self, has_music: bool, duration: f64) -> String {
        let voice = format!(
            "[1:a]volume={},{},aresample=44100",
            self.video.voice_volume,
            self.video.loudnorm_filter()
        );
        if !has_music {
            return format!("{voice}[aout]");
        }
        let fade_out = (duration - MUSIC_FADE_OUT).max(0.0);
        format!(
            "{voice}[voice];[2:a]volume={},afade=t=in:st=0:d={MUSIC_FADE_IN},\
             afade=t=out:st={fade_out:.2}:d={MUSIC_FADE_OUT}[bgm];\
             [voice][bgm]amix=inputs=2:duration=first:dropout_transition=2[aout]",
            self.video.bgm_volume
        )
    }

    pub fn build_command(&self, req: &CompositeRequest<'_>, narration_seconds: f64) -> FfmpegCommand {
        let duration = self.output_duration(narration_seconds);
        let video = self.overlay_program(req, narration_seconds).graph();
        let audio = self.audio_graph(req.music.is_some(), narration_seconds);

        let mut cmd = FfmpegCommand::new(req.output)
            .input(req.timeline)
            .input(req.narration);
        if let Some(music) = req.music {
            cmd = cmd.input(music);
        }
        cmd.filter_complex(format!("{video};{audio}"))
            .map("[vout]")
            .map("[aout]")
            .video_codec("libx264")
            .preset("medium")
            .crf(20)
            .audio_codec("aac")
            .audio_bitrate("192k")
            .frame_rate(self.video.fps)
            .output_args(["-pix_fmt", "yuv420p", "-movflags", "+faststart"])
            .duration(duration)
    }

    /// Render the final video. A failed or empty render is an error.
    pub async fn composite(&self, req: &CompositeRequest<'_>) -> MediaResult<PathBuf> {
        let narration_seconds = probe_duration(req.narration).await?;
        if let Some(parent) = req.output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.build_command(req, narration_seconds).run().await?;

        let size = tokio::fs::metadata(req.output).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(MediaError::ffmpeg_failed(
                format!("no output produced at {}", req.output.display()),
                None,
                None,
            ));
        }
        info!(
            "Final video {} ({:.1} MB)",
            req.output.display(),
            size as f64 / 1_048_576.0
        );
        Ok(req.output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FontSettings, default_niches};
    use crate::media::ffmpeg::ffmpeg_available;
    use crate::media::font::resolve_font;
    use crate::media::probe::tests::write_silence;

    fn script() -> ScriptDocument {
        ScriptDocument {
            hook: "Most people never learn this about money".into(),
            cta: "Follow for daily tips".into(),
            title_text: "Money: 100% Real".into(),
            text_position: TextPosition::Top,
            ..ScriptDocument::default()
        }
    }

    fn quote() -> QuoteDocument {
        QuoteDocument {
            text: "The best time to plant a tree was twenty years ago".into(),
            author: "Proverb".into(),
        }
    }

    struct Fixture {
        script: ScriptDocument,
        niche: Niche,
        profile: Profile,
        quote: QuoteDocument,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                script: script(),
                niche: default_niches().remove(0),
                profile: Profile::default(),
                quote: quote(),
            }
        }

        fn request<'a>(&'a self, font: &'a Path, music: Option<&'a Path>) -> CompositeRequest<'a> {
            CompositeRequest {
                timeline: Path::new("timeline.mp4"),
                narration: Path::new("voice.wav"),
                music,
                script: &self.script,
                quote: Some(&self.quote),
                niche: &self.niche,
                profile: &self.profile,
                font,
                captions: None,
                output: Path::new("out/final.mp4"),
            }
        }
    }

    #[test]
    fn escapes_filter_metacharacters() {
        assert_eq!(escape_drawtext(r"a\b"), r"'a\\b'");
        assert_eq!(escape_drawtext("it's"), r"'it\'\''s'");
        assert_eq!(escape_drawtext("10:30"), r"'10\:30'");
        assert_eq!(escape_drawtext("50%"), "'50%'");
        assert_eq!(escape_drawtext("say \"hi\""), "'say \"hi\"'");
    }

    /// One level of ffmpeg token parsing: `'` toggles quoting, `\x` outside
    /// quotes yields `x`. Splits on unquoted `sep` when one is given.
    fn unescape_level(s: &str, sep: Option<char>) -> Vec<String> {
        let mut parts = vec![String::new()];
        let mut quoted = false;
        let mut chars = s.chars();
        while let Some(c) = chars.next() {
            match c {
                '\'' => quoted = !quoted,
                '\\' if !quoted => {
                    if let Some(next) = chars.next() {
                        parts.last_mut().unwrap().push(next);
                    }
                }
                c if Some(c) == sep && !quoted => parts.push(String::new()),
                c => parts.last_mut().unwrap().push(c),
            }
        }
        parts
    }

    /// Options of a single filter as ffmpeg sees them after both levels.
    fn filter_options(layer: &str) -> Vec<String> {
        let graph_level = unescape_level(layer, None).remove(0);
        let (_, args) = graph_level.split_once('=').unwrap();
        unescape_level(args, Some(':'))
    }

    #[test]
    fn apostrophes_survive_graph_and_option_parsing() {
        let mut fixture = Fixture::new();
        fixture.script.hook = "Here's the truth".into();
        let video = VideoSettings::default();
        let quote = QuoteSettings::default();
        let program = Compositor::new(&video, &quote)
            .overlay_program(&fixture.request(Path::new("/fonts/it's.ttf"), None), 40.0);
        let hook = program
            .layers()
            .iter()
            .find(|l| l.contains("Here") && l.starts_with("drawtext"))
            .unwrap();

        let options = filter_options(hook);
        assert!(options.contains(&"fontfile=/fonts/it's.ttf".to_string()), "{options:?}");
        assert!(options.contains(&"text=Here's the truth".to_string()), "{options:?}");
        assert!(options.contains(&"expansion=none".to_string()));
        assert!(options.contains(&format!("fontsize={}", video.text_font_size)));
        assert!(options.contains(&"enable=between(t,4.50,9.50)".to_string()));

        let title = program.layers().iter().find(|l| l.contains("Money")).unwrap();
        assert!(filter_options(title).contains(&"text=Money: 100% Real".to_string()));
    }

    #[test]
    fn long_titles_are_cut_to_forty_chars() {
        let mut fixture = Fixture::new();
        fixture.script.title_text = "A".repeat(38) + "BCDEFG";
        let video = VideoSettings::default();
        let quote = QuoteSettings::default();
        let program = Compositor::new(&video, &quote)
            .overlay_program(&fixture.request(Path::new("f.ttf"), None), 40.0);
        let title = program.layers().iter().find(|l| l.contains("AAAA")).unwrap();
        let expected = format!("text={}BC", "A".repeat(38));
        assert!(filter_options(title).contains(&expected));
        assert!(!title.contains("BCD"));
    }

    #[test]
    fn cta_window_ends_at_narration_end() {
        assert_eq!(cta_window(40.0), Window { start: 34.0, end: 40.0 });
        assert_eq!(cta_window(4.0), Window { start: 0.0, end: 4.0 });
    }

    #[test]
    fn quote_windows_follow_placement() {
        let mut settings = QuoteSettings::default();
        assert_eq!(quote_window(&settings, 40.0), Window { start: 17.0, end: 23.0 });
        settings.position = QuotePlacement::Start;
        assert_eq!(quote_window(&settings, 40.0), Window { start: 9.5, end: 15.5 });
        settings.position = QuotePlacement::End;
        assert_eq!(quote_window(&settings, 40.0), Window { start: 28.0, end: 34.0 });
        assert_eq!(quote_window(&settings, 8.0).start, 0.0);
    }

    #[test]
    fn quote_block_is_centered_with_attribution_row() {
        let settings = QuoteSettings::default();
        let layout = QuoteLayout::new(&quote(), &settings, 1920);
        assert!(layout.lines.len() >= 2);
        assert!(layout.lines.iter().all(|l| l.chars().count() <= settings.wrap_chars));
        assert_eq!(layout.attribution.as_deref(), Some("- Proverb"));
        let rows = layout.lines.len() as u32 + 1;
        assert_eq!(layout.block_height, rows * 62 + 80);
        assert_eq!(layout.block_y, (1920 - layout.block_height) / 2);
        assert_eq!(layout.line_y(0, &settings), layout.block_y + 40);
    }

    #[test]
    fn program_layers_are_gated_and_escaped() {
        let fixture = Fixture::new();
        let video = VideoSettings::default();
        let quote = QuoteSettings::default();
        let compositor = Compositor::new(&video, &quote);
        let program = compositor.overlay_program(&fixture.request(Path::new("/f/Font.ttf"), None), 40.0);
        let graph = program.graph();

        assert!(graph.starts_with("[0:v]drawbox"));
        assert!(graph.ends_with("[vout]"));
        assert!(graph.contains(r"text='Money\: 100% Real'"));
        assert!(graph.contains("enable='between(t,0.50,4.50)'"));
        assert!(graph.contains("enable='between(t,34.00,40.00)'"));
        assert!(graph.contains("enable='between(t,17.00,23.00)'"));
        assert!(graph.contains(&format!("fontcolor={}", fixture.niche.color)));
        // watermark has no window
        let watermark = program
            .layers()
            .iter()
            .find(|l| l.contains("y=h-55"))
            .unwrap();
        assert!(!watermark.contains("enable="));
    }

    #[test]
    fn disabled_quotes_are_not_drawn() {
        let fixture = Fixture::new();
        let video = VideoSettings::default();
        let quote = QuoteSettings {
            enabled: false,
            ..QuoteSettings::default()
        };
        let graph = Compositor::new(&video, &quote)
            .overlay_program(&fixture.request(Path::new("f.ttf"), None), 40.0)
            .graph();
        assert!(!graph.contains("Proverb"));
    }

    #[test]
    fn narration_only_audio_needs_no_music_input() {
        let video = VideoSettings::default();
        let quote = QuoteSettings::default();
        let compositor = Compositor::new(&video, &quote);
        let audio = compositor.audio_graph(false, 40.0);
        assert_eq!(audio, "[1:a]volume=1,loudnorm=I=-16:TP=-1.5:LRA=11,aresample=44100[aout]");
        assert!(!audio.contains("[2:a]"));

        let fixture = Fixture::new();
        let args = compositor
            .build_command(&fixture.request(Path::new("f.ttf"), None), 40.0)
            .build_args();
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
    }

    #[test]
    fn music_is_faded_and_mixed_under_narration() {
        let video = VideoSettings::default();
        let quote = QuoteSettings::default();
        let audio = Compositor::new(&video, &quote).audio_graph(true, 40.0);
        assert!(audio.contains("[2:a]volume=0.2,afade=t=in:st=0:d=2"));
        assert!(audio.contains("afade=t=out:st=37.00:d=3"));
        assert!(audio.contains("amix=inputs=2:duration=first"));
        assert!(audio.ends_with("[aout]"));
    }

    #[test]
    fn output_duration_is_capped() {
        let video = VideoSettings::default();
        let quote = QuoteSettings::default();
        let compositor = Compositor::new(&video, &quote);
        assert_eq!(compositor.output_duration(40.0), 41.0);
        assert_eq!(compositor.output_duration(90.0), 60.0);
    }

    #[tokio::test]
    async fn composites_without_music() {
        if !ffmpeg_available() || which::which("ffprobe").is_err() {
            eprintln!("ffmpeg not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let font_settings = FontSettings {
            cache_path: dir.path().join("none.ttf"),
            download_url: None,
            ..FontSettings::default()
        };
        let font = resolve_font(&font_settings, &reqwest::Client::new()).await;
        if !font.exists() {
            eprintln!("no system font, skipping");
            return;
        }

        let timeline = dir.path().join("timeline.mp4");
        FfmpegCommand::new(&timeline)
            .input_with(["-f", "lavfi"], "testsrc=size=180x320:rate=10:duration=4")
            .video_codec("libx264")
            .run()
            .await
            .unwrap();
        let narration = dir.path().join("voice.wav");
        write_silence(&narration, 3.0, 16000);
        let output = dir.path().join("out/final.mp4");

        let fixture = Fixture::new();
        let video = VideoSettings {
            width: 180,
            height: 320,
            fps: 10,
            title_font_size: 20,
            text_font_size: 16,
            ..VideoSettings::default()
        };
        let quote = QuoteSettings {
            font_size: 14,
            line_height: 18,
            padding: 8,
            ..QuoteSettings::default()
        };
        let req = CompositeRequest {
            timeline: &timeline,
            narration: &narration,
            output: &output,
            ..fixture.request(&font, None)
        };
        let rendered = Compositor::new(&video, &quote).composite(&req).await.unwrap();
        let length = probe_duration(&rendered).await.unwrap();
        assert!(length > 2.5 && length < 4.5, "render was {length}s");
    }
}
