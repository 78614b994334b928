//! Still-frame thumbnails shown by the viewer until playback starts.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};

use crate::download::Toolchain;
use crate::error::Result;
use crate::process;

pub const PREVIEW_SUFFIX: &str = "_preview.jpg";
const VIDEO_EXTENSION: &str = "mp4";
const TEMP_MARKER: &str = "_temp";

/// `{stem}_preview.jpg`, next to the video unless a preview folder is given.
pub fn preview_path(video_path: &Path, preview_dir: Option<&Path>) -> PathBuf {
    let stem = video_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = format!("{stem}{PREVIEW_SUFFIX}");
    match preview_dir {
        Some(dir) => dir.join(file_name),
        None => video_path.with_file_name(file_name),
    }
}

/// Grabs the first decoded frame of `video_path` as a JPEG.
pub async fn extract(
    tools: &Toolchain,
    video_path: &Path,
    preview_dir: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(dir) = preview_dir {
        fs::create_dir_all(dir).await?;
    }
    let output = preview_path(video_path, preview_dir);
    let args: [&OsStr; 10] = [
        "-y".as_ref(),
        "-i".as_ref(),
        video_path.as_os_str(),
        "-vf".as_ref(),
        r"select=eq(n\,0)".as_ref(),
        "-frames:v".as_ref(),
        "1".as_ref(),
        "-q:v".as_ref(),
        "3".as_ref(),
        output.as_os_str(),
    ];
    process::run(&tools.ffmpeg, args).await?;
    Ok(output)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PreviewSweep {
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Extracts previews for inbox videos that do not have one yet. Failures are
/// counted and logged; the sweep keeps going.
pub async fn regenerate_missing(
    tools: &Toolchain,
    inbox: &Path,
    preview_dir: Option<&Path>,
) -> Result<PreviewSweep> {
    let mut sweep = PreviewSweep::default();
    let mut videos = Vec::new();
    let mut entries = fs::read_dir(inbox).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_file = fs::metadata(&path)
            .await
            .is_ok_and(|metadata| metadata.is_file());
        if is_file && is_inbox_video(&path) {
            videos.push(path);
        }
    }
    videos.sort();

    for video in videos {
        if fs::try_exists(preview_path(&video, preview_dir)).await? {
            sweep.skipped += 1;
            continue;
        }
        match extract(tools, &video, preview_dir).await {
            Ok(path) => {
                info!(preview = %path.display(), "created preview");
                sweep.created += 1;
            }
            Err(err) => {
                warn!(video = %video.display(), error = %err, "preview extraction failed");
                sweep.failed += 1;
            }
        }
    }

    Ok(sweep)
}

fn is_inbox_video(path: &Path) -> bool {
    let has_video_ext = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(VIDEO_EXTENSION));
    let is_temp = path
        .file_stem()
        .is_some_and(|stem| stem.to_string_lossy().ends_with(TEMP_MARKER));
    has_video_ext && !is_temp
}
