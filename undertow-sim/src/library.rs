//! Local media library exposed as simulated content.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use sha1::{Digest, Sha1};
use tracing::{debug, warn};
use undertow_core::ContentId;

use crate::content::{SimulatedContent, SimulatedFile};

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "m4v", "webm"];

/// Directory names never descended into.
const SKIPPED_DIRS: &[&str] = &[".Trash", ".localized", ".tvlibrary", ".tvdb"];

/// Scans `dir` recursively and returns one single-file content entry per
/// video file found.
///
/// # Errors
/// - `std::io::Error` - Failed to read the top-level directory
pub async fn scan_library(dir: &Path) -> Result<Vec<SimulatedContent>, std::io::Error> {
    let mut found = Vec::new();
    scan_recursive(dir, &mut found).await?;
    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}

fn scan_recursive<'a>(
    dir: &'a Path,
    found: &'a mut Vec<SimulatedContent>,
) -> Pin<Box<dyn Future<Output = Result<(), std::io::Error>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };

            if metadata.is_dir() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str())
                    && SKIPPED_DIRS.contains(&name)
                {
                    continue;
                }
                if let Err(e) = scan_recursive(&path, found).await {
                    warn!("Failed to scan {}: {}", path.display(), e);
                }
            } else if metadata.is_file() && is_video(&path) {
                debug!("Library file {}", path.display());
                found.push(content_for_file(path, metadata.len()));
            }
        }

        Ok(())
    })
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

fn content_for_file(path: PathBuf, length: u64) -> SimulatedContent {
    let title = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Unknown")
        .replace(['.', '_'], " ");
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let identifier = identifier_for_path(&path);
    let relative_path = PathBuf::from(&title).join(file_name);
    SimulatedContent::new(
        identifier,
        title,
        vec![SimulatedFile::on_disk(relative_path, path, length)],
    )
}

/// Deterministic 40-character identifier for a library file.
pub fn identifier_for_path(path: &Path) -> ContentId {
    let digest: [u8; 20] = Sha1::digest(path.to_string_lossy().as_bytes()).into();
    ContentId::from_digest(&digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_finds_videos_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("Series");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(dir.path().join("Big_Buck.Bunny.mp4"), b"abc").unwrap();
        std::fs::write(nested.join("episode.MKV"), b"abcdef").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"skip").unwrap();

        let library = scan_library(dir.path()).await.unwrap();

        assert_eq!(library.len(), 2);
        assert_eq!(library[0].name, "Big Buck Bunny");
        assert_eq!(
            library[0].files[0].relative_path,
            PathBuf::from("Big Buck Bunny/Big_Buck.Bunny.mp4")
        );
        assert_eq!(library[1].files[0].source.length(), 6);
    }

    #[test]
    fn test_identifier_is_stable_hex() {
        let a = identifier_for_path(Path::new("/media/movie.mp4"));
        let b = identifier_for_path(Path::new("/media/movie.mp4"));
        let c = identifier_for_path(Path::new("/media/other.mp4"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 40);
        assert_eq!(ContentId::parse(a.as_str()).unwrap(), a);
    }
}
