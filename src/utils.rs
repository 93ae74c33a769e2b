use chrono::{DateTime, Datelike, FixedOffset, Offset, Utc, Weekday};
use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;

static SENTENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)([^.!?]+[.!?]+)|([^.!?]+$)").expect("sentence regex"));

/// Split text into sentence-aligned chunks of at most `max_chars` (a single
/// long sentence may exceed it).
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let sentences: Vec<&str> = SENTENCE_RE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        warn!("No sentence breaks found; returning whole text as one chunk");
        return vec![text.to_string()];
    }
    let mut chunks = Vec::new();
    let mut current = String::new();
    for s in sentences {
        if current.is_empty() {
            current.push_str(s);
        } else if current.len() + 1 + s.len() <= max_chars {
            current.push(' ');
            current.push_str(s);
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(s);
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Greedy word wrap; words longer than `width` get a line of their own.
pub fn wrap_text(s: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in s.split_whitespace() {
        let needed = current.chars().count() + word.chars().count() + 1;
        if needed > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Truncate to at most `max` characters, respecting char boundaries.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Wall clock in a fixed UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct LocalClock {
    offset: FixedOffset,
}

impl LocalClock {
    pub fn new(utc_offset_hours: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600).unwrap_or_else(|| {
            warn!("Invalid UTC offset {}h, using UTC", utc_offset_hours);
            Utc.fix()
        });
        Self { offset }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    /// YYYY-MM-DD
    pub fn today(&self) -> String {
        self.now().format("%Y-%m-%d").to_string()
    }

    pub fn is_sunday(&self) -> bool {
        self.now().weekday() == Weekday::Sun
    }

    pub fn display_now(&self) -> String {
        self.now().format("%Y-%m-%d %I:%M %p").to_string()
    }
}
