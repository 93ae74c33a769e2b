//! Overlay font resolution: cached download, then system fonts.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::FontSettings;

const FONT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_SCAN_DEPTH: usize = 4;

fn is_usable(path: &Path, min_bytes: u64) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() >= min_bytes)
}

/// Always yields a path. When nothing usable is found the cache path is
/// returned and the overlay render decides.
pub async fn resolve_font(settings: &FontSettings, client: &reqwest::Client) -> PathBuf {
    if is_usable(&settings.cache_path, settings.min_bytes) {
        debug!("Using cached font {}", settings.cache_path.display());
        return settings.cache_path.clone();
    }

    if let Some(url) = &settings.download_url {
        match download_font(client, url, &settings.cache_path, settings.min_bytes).await {
            Ok(()) => {
                info!("Downloaded font to {}", settings.cache_path.display());
                return settings.cache_path.clone();
            }
            Err(e) => warn!("Font download failed: {:#}", e),
        }
    }

    if let Some(found) = settings.system_fallbacks.iter().find(|p| p.is_file()) {
        info!("Using system font {}", found.display());
        return found.clone();
    }

    for dir in &settings.system_dirs {
        if let Some(found) = scan_for_font(dir, MAX_SCAN_DEPTH) {
            info!("Using discovered font {}", found.display());
            return found;
        }
    }

    warn!("No font found, overlays may fail");
    settings.cache_path.clone()
}

async fn download_font(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    min_bytes: u64,
) -> anyhow::Result<()> {
    let bytes = client
        .get(url)
        .timeout(FONT_DOWNLOAD_TIMEOUT)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;
    if (bytes.len() as u64) < min_bytes {
        anyhow::bail!("font download too small ({} bytes)", bytes.len());
    }
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(dest, &bytes).await?;
    Ok(())
}

/// First `.ttf`/`.otf` in sorted walk order.
fn scan_for_font(dir: &Path, depth: usize) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|e| e.path())
        .collect();
    entries.sort();

    for path in &entries {
        let is_font = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("ttf") || e.eq_ignore_ascii_case("otf"));
        if is_font && path.is_file() {
            return Some(path.clone());
        }
    }
    if depth == 0 {
        return None;
    }
    entries
        .iter()
        .filter(|p| p.is_dir())
        .find_map(|p| scan_for_font(p, depth - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(dir: &Path) -> FontSettings {
        FontSettings {
            cache_path: dir.join("cache/Font.ttf"),
            download_url: None,
            min_bytes: 100,
            system_fallbacks: vec![],
            system_dirs: vec![],
        }
    }

    #[tokio::test]
    async fn cached_font_wins() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        std::fs::create_dir_all(s.cache_path.parent().unwrap()).unwrap();
        std::fs::write(&s.cache_path, vec![0u8; 200]).unwrap();
        assert_eq!(resolve_font(&s, &reqwest::Client::new()).await, s.cache_path);
    }

    #[tokio::test]
    async fn downloads_into_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/font.ttf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 500]))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path());
        s.download_url = Some(format!("{}/font.ttf", server.uri()));

        let resolved = resolve_font(&s, &reqwest::Client::new()).await;
        assert_eq!(resolved, s.cache_path);
        assert_eq!(std::fs::metadata(&resolved).unwrap().len(), 500);
    }

    #[tokio::test]
    async fn truncated_download_falls_through_to_system_dirs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 10]))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let fonts = dir.path().join("system/truetype/dejavu");
        std::fs::create_dir_all(&fonts).unwrap();
        std::fs::write(fonts.join("readme.txt"), b"x").unwrap();
        std::fs::write(fonts.join("DejaVuSans.ttf"), b"x").unwrap();

        let mut s = settings(dir.path());
        s.download_url = Some(format!("{}/font.ttf", server.uri()));
        s.system_fallbacks = vec![dir.path().join("missing.ttf")];
        s.system_dirs = vec![dir.path().join("system")];

        let resolved = resolve_font(&s, &reqwest::Client::new()).await;
        assert_eq!(resolved, fonts.join("DejaVuSans.ttf"));
        assert!(!s.cache_path.exists());
    }

    #[tokio::test]
    async fn nothing_found_returns_cache_path() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path());
        assert_eq!(resolve_font(&s, &reqwest::Client::new()).await, s.cache_path);
    }
}
