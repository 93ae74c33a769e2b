//! Run history: one entry per pipeline run, success or failure.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{StepFailure, StoreError};
use crate::script::ScriptDocument;
use crate::store::{DocumentStore, HISTORY_KEY};
use crate::utils::truncate_chars;

pub const MAX_ENTRIES: usize = 365;
const MAX_ERROR_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    DryRun,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub date: String,
    #[serde(default)]
    pub timestamp: String,
    pub status: RunStatus,
    #[serde(default)]
    pub niche: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub script_source: Option<String>,
    #[serde(default)]
    pub platforms: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunHistory {
    pub entries: Vec<RunHistoryEntry>,
}

impl RunHistory {
    pub fn push(&mut self, entry: RunHistoryEntry) {
        self.entries.push(entry);
        if self.entries.len() > MAX_ENTRIES {
            let excess = self.entries.len() - MAX_ENTRIES;
            self.entries.drain(..excess);
        }
    }
}

pub fn success_entry(
    script: &ScriptDocument,
    platforms: &[String],
    dry_run: bool,
    date: &str,
    timestamp: &str,
) -> RunHistoryEntry {
    RunHistoryEntry {
        date: date.to_string(),
        timestamp: timestamp.to_string(),
        status: if dry_run { RunStatus::DryRun } else { RunStatus::Success },
        niche: Some(script.niche.clone()),
        topic: Some(script.topic.clone()),
        style: Some(script.style.clone()),
        title: Some(script.title_text.clone()),
        script_source: Some(script.source.to_string()),
        platforms: Some(if dry_run {
            "none (dry run)".to_string()
        } else {
            platforms.join(", ")
        }),
        error: None,
    }
}

pub fn error_entry(
    failure: &StepFailure,
    script: Option<&ScriptDocument>,
    date: &str,
    timestamp: &str,
) -> RunHistoryEntry {
    let message = format!("{:#}", failure.source);
    RunHistoryEntry {
        date: date.to_string(),
        timestamp: timestamp.to_string(),
        status: RunStatus::Error,
        niche: script.map(|s| s.niche.clone()),
        topic: script.map(|s| s.topic.clone()),
        style: script.map(|s| s.style.clone()),
        title: None,
        script_source: None,
        platforms: None,
        error: Some(format!("{}: {}", failure.step, truncate_chars(&message, MAX_ERROR_CHARS))),
    }
}

/// Append an entry to the persisted history, keeping the last 365.
pub fn append<S: DocumentStore>(store: &S, entry: RunHistoryEntry) -> Result<(), StoreError> {
    let mut history: RunHistory = store.load(HISTORY_KEY);
    history.push(entry);
    store.save(HISTORY_KEY, &history)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeeklySummary {
    pub since: String,
    pub until: String,
    pub published: usize,
    pub failed: usize,
    pub dry_runs: usize,
    /// Counts over successful posts, most frequent first.
    pub niches: Vec<(String, usize)>,
    pub styles: Vec<(String, usize)>,
    /// (date, error) of up to five failures.
    pub failures: Vec<(String, String)>,
}

/// Summarize the seven days up to and including `today` (YYYY-MM-DD).
pub fn weekly_summary(history: &RunHistory, today: &str) -> WeeklySummary {
    let since = NaiveDate::parse_from_str(today, "%Y-%m-%d")
        .map(|d| (d - chrono::Duration::days(7)).format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    let week: Vec<&RunHistoryEntry> = history
        .entries
        .iter()
        .filter(|e| e.date.as_str() >= since.as_str())
        .collect();

    let successes: Vec<&RunHistoryEntry> = week
        .iter()
        .copied()
        .filter(|e| e.status == RunStatus::Success)
        .collect();

    let failures: Vec<&RunHistoryEntry> = week
        .iter()
        .copied()
        .filter(|e| e.status == RunStatus::Error)
        .collect();

    WeeklySummary {
        since,
        until: today.to_string(),
        published: successes.len(),
        failed: failures.len(),
        dry_runs: week.iter().filter(|e| e.status == RunStatus::DryRun).count(),
        niches: ranked(successes.iter().map(|e| e.niche.as_deref())),
        styles: ranked(successes.iter().map(|e| e.style.as_deref())),
        failures: failures
            .iter()
            .take(5)
            .map(|e| (e.date.clone(), e.error.clone().unwrap_or_else(|| "?".into())))
            .collect(),
    }
}

fn ranked<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for v in values {
        *counts.entry(v.unwrap_or("unknown").to_string()).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Step;
    use crate::store::MemoryStore;

    fn entry(date: &str, status: RunStatus, niche: &str, style: &str) -> RunHistoryEntry {
        RunHistoryEntry {
            date: date.into(),
            timestamp: String::new(),
            status,
            niche: Some(niche.into()),
            topic: None,
            style: Some(style.into()),
            title: None,
            script_source: None,
            platforms: None,
            error: (status == RunStatus::Error).then(|| "Video Generation: boom".to_string()),
        }
    }

    #[test]
    fn history_is_capped() {
        let store = MemoryStore::new();
        for i in 0..370 {
            append(&store, entry(&format!("d{i:03}"), RunStatus::Success, "n", "s")).unwrap();
        }
        let history: RunHistory = store.load(HISTORY_KEY);
        assert_eq!(history.entries.len(), MAX_ENTRIES);
        assert_eq!(history.entries[0].date, "d005");
    }

    #[test]
    fn error_entry_is_step_tagged_and_truncated() {
        let failure = StepFailure::new(Step::VoiceGeneration, anyhow::anyhow!("x".repeat(500)));
        let e = error_entry(&failure, None, "2026-01-01", "ts");
        let text = e.error.unwrap();
        assert!(text.starts_with("Voice Generation: "));
        assert_eq!(text.len(), "Voice Generation: ".len() + 200);
        assert_eq!(e.status, RunStatus::Error);
        assert!(e.niche.is_none());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::DryRun).unwrap();
        assert_eq!(json, "\"dry_run\"");
    }

    #[test]
    fn weekly_summary_counts_last_seven_days() {
        let mut history = RunHistory::default();
        history.push(entry("2026-01-01", RunStatus::Success, "old", "s"));
        history.push(entry("2026-01-08", RunStatus::Success, "wealth", "listicle"));
        history.push(entry("2026-01-09", RunStatus::Success, "health", "listicle"));
        history.push(entry("2026-01-10", RunStatus::Success, "wealth", "story"));
        history.push(entry("2026-01-11", RunStatus::Error, "health", "story"));
        history.push(entry("2026-01-12", RunStatus::DryRun, "health", "story"));

        let summary = weekly_summary(&history, "2026-01-15");
        assert_eq!(summary.since, "2026-01-08");
        assert_eq!(summary.published, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.dry_runs, 1);
        assert_eq!(summary.niches[0], ("wealth".to_string(), 2));
        assert_eq!(summary.styles[0], ("listicle".to_string(), 2));
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].0, "2026-01-11");
    }
}
