//! Background music selection from a local library.

use rand::Rng;
use rand::seq::IndexedRandom;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::MusicSettings;
use crate::media::probe::probe_duration;

#[derive(Debug, Clone, PartialEq)]
pub struct MusicTrack {
    pub path: PathBuf,
    pub duration: f64,
}

/// Pick a random usable track, or `None` to render with narration only.
pub async fn select_background_music<R: Rng + ?Sized>(
    dir: &Path,
    settings: &MusicSettings,
    rng: &mut R,
) -> Option<MusicTrack> {
    let candidates = candidate_tracks(dir, settings);
    let Some(path) = candidates.choose(rng).cloned() else {
        warn!("No usable background music in {}", dir.display());
        return None;
    };

    match probe_duration(&path).await {
        Ok(duration) if duration >= settings.min_seconds => {
            info!("Background music: {} ({:.1}s)", path.display(), duration);
            Some(MusicTrack { path, duration })
        }
        Ok(duration) => {
            warn!(
                "Music track {} is only {:.1}s, skipping music",
                path.display(),
                duration
            );
            None
        }
        Err(e) => {
            warn!("Could not probe music track {}: {}", path.display(), e);
            None
        }
    }
}

fn candidate_tracks(dir: &Path, settings: &MusicSettings) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut tracks: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| {
            let path = entry.path();
            let ext_ok = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| {
                    settings
                        .extensions
                        .iter()
                        .any(|allowed| allowed.eq_ignore_ascii_case(ext))
                });
            let size_ok = entry
                .metadata()
                .is_ok_and(|m| m.is_file() && m.len() >= settings.min_bytes);
            ext_ok && size_ok
        })
        .map(|entry| entry.path())
        .collect();
    tracks.sort();
    tracks
}
