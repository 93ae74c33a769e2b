use regex::Regex;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::LazyLock;

use crate::utils::wrap_text;

const COMMA_PAUSE: f64 = 0.2;
const SENTENCE_END_PAUSE: f64 = 0.4;
/// Longer words get proportionally, but sub-linearly, more time.
const WORD_WEIGHT_ALPHA: f64 = 0.75;

static ELEMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w[\w'-]*)|([,.!?])").expect("caption element regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct Caption {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Word-level captions spread over `duration` seconds of narration.
pub fn build_captions(text: &str, duration: f64) -> Vec<Caption> {
    let elements: Vec<&str> = ELEMENT_RE.find_iter(text).map(|m| m.as_str()).collect();
    if elements.is_empty() {
        if text.trim().is_empty() {
            return Vec::new();
        }
        return vec![Caption {
            start: 0.0,
            end: duration,
            text: text.trim().to_string(),
        }];
    }

    let mut pause_time = 0.0;
    let mut total_weight = 0.0;
    for &element in &elements {
        match element {
            "," => pause_time += COMMA_PAUSE,
            "." | "!" | "?" => pause_time += SENTENCE_END_PAUSE,
            word => total_weight += weight(word),
        }
    }
    // Long pause runs ("...") must not eat all speaking time.
    let pause_scale = if pause_time > duration * 0.5 {
        duration * 0.5 / pause_time
    } else {
        1.0
    };
    let word_time = (duration - pause_time * pause_scale).max(0.0);

    let mut captions = Vec::new();
    let mut now = 0.0;
    for element in elements {
        match element {
            "," => now += COMMA_PAUSE * pause_scale,
            "." | "!" | "?" => now += SENTENCE_END_PAUSE * pause_scale,
            word => {
                let length = if total_weight > 0.0 {
                    word_time * weight(word) / total_weight
                } else {
                    0.0
                };
                captions.push(Caption {
                    start: now,
                    end: now + length,
                    text: word.to_string(),
                });
                now += length;
            }
        }
    }
    captions
}

fn weight(word: &str) -> f64 {
    (word.chars().count() as f64).powf(WORD_WEIGHT_ALPHA)
}

pub fn render_srt(captions: &[Caption]) -> String {
    let mut out = String::new();
    for (i, caption) in captions.iter().enumerate() {
        let _ = writeln!(out, "{}", i + 1);
        let _ = writeln!(
            out,
            "{} --> {}",
            format_srt_time(caption.start),
            format_srt_time(caption.end)
        );
        for line in wrap_text(&caption.text, 80) {
            let _ = writeln!(out, "{}", line);
        }
        out.push('\n');
    }
    out
}

pub fn write_srt(path: &Path, captions: &[Caption]) -> std::io::Result<()> {
    std::fs::write(path, render_srt(captions))
}

fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let s = total_sec % 60;
    let total_min = total_sec / 60;
    let m = total_min % 60;
    let h = total_min / 60;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}
