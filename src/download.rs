//! Download orchestration: bounded-resolution download, re-encode fallback,
//! then index bookkeeping.
//!
//! Every accepted URL ends up as `{id}.mp4` in the inbox with a height of at
//! most [`HEIGHT_CEILING`]. The direct path asks yt-dlp for a stream that is
//! already small enough; when that fails for any reason the fallback grabs
//! the best single stream into `{id}_temp.mp4` and lets ffmpeg scale it down.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::sync::Mutex;
use tokio::task;
use tracing::{info, warn};

use crate::config::FeedPaths;
use crate::error::{FeedError, Result};
use crate::index::VideoIndex;
use crate::preview;
use crate::process;
use crate::resolver::{self, MediaNames};

pub const HEIGHT_CEILING: u32 = 480;
pub const DIRECT_FORMAT: &str = "bv[height<=480]+ba/b[height<=480]";
pub const FALLBACK_FORMAT: &str = "b";
const MERGE_CONTAINER: &str = "mp4";
/// ffmpeg arguments placed between the input and output paths.
pub const REENCODE_ARGS: [&str; 14] = [
    "-vf",
    "scale=-2:480",
    "-c:v",
    "libx264",
    "-preset",
    "slow",
    "-crf",
    "23",
    "-c:a",
    "aac",
    "-b:a",
    "64k",
    "-ac",
    "1",
];

/// External programs the pipeline shells out to.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub ytdlp: PathBuf,
    pub ffmpeg: PathBuf,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            ytdlp: PathBuf::from("yt-dlp"),
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

impl Toolchain {
    /// Fails loudly when either tool is missing from PATH.
    pub async fn ensure_available(&self) -> Result<()> {
        process::ensure_available(&self.ytdlp, "--version").await?;
        process::ensure_available(&self.ffmpeg, "-version").await
    }
}

/// Which route produced the final file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    Reencoded,
}

#[derive(Debug, Clone)]
pub struct Downloaded {
    pub id: String,
    pub filename: String,
    pub path: PathBuf,
    pub route: Route,
    pub preview: Option<PathBuf>,
}

pub struct Downloader {
    paths: FeedPaths,
    tools: Toolchain,
    index: VideoIndex,
    // Held for the whole request; the index has no other writer protection.
    busy: Mutex<()>,
}

impl Downloader {
    pub fn new(paths: FeedPaths, tools: Toolchain) -> Self {
        let index = VideoIndex::new(&paths.index);
        Self {
            paths,
            tools,
            index,
            busy: Mutex::new(()),
        }
    }

    pub fn paths(&self) -> &FeedPaths {
        &self.paths
    }

    pub fn tools(&self) -> &Toolchain {
        &self.tools
    }

    /// Downloads `url` into the inbox and records it. Requests are handled one
    /// at a time; callers queue on the internal gate.
    pub async fn download(&self, url: &str) -> Result<Downloaded> {
        let _gate = self.busy.lock().await;

        fs::create_dir_all(&self.paths.inbox).await?;
        let names = resolver::resolve(&self.tools, url).await?;
        let final_path = self.paths.inbox.join(&names.final_name);

        let route = match self.fetch_direct(url, &final_path).await {
            Ok(()) => {
                info!(file = %names.final_name, "downloaded native {HEIGHT_CEILING}p");
                Route::Direct
            }
            Err(err) => {
                warn!(
                    %url,
                    error = %err,
                    "{HEIGHT_CEILING}p not available; downloading best and re-encoding"
                );
                self.fetch_and_reencode(url, &names, &final_path).await?;
                info!(file = %names.final_name, "re-encoded to {HEIGHT_CEILING}p");
                Route::Reencoded
            }
        };

        let index = self.index.clone();
        let filename = names.final_name.clone();
        task::spawn_blocking(move || index.record(&filename))
            .await
            .map_err(std::io::Error::other)??;

        let preview_dir = self.paths.previews.as_deref();
        let preview = match preview::extract(&self.tools, &final_path, preview_dir).await {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(file = %names.final_name, error = %err, "preview extraction failed");
                None
            }
        };

        Ok(Downloaded {
            id: names.id,
            filename: names.final_name,
            path: final_path,
            route,
            preview,
        })
    }

    async fn fetch_direct(&self, url: &str, final_path: &Path) -> Result<()> {
        let args: [&OsStr; 8] = [
            "-f".as_ref(),
            DIRECT_FORMAT.as_ref(),
            "--merge-output-format".as_ref(),
            MERGE_CONTAINER.as_ref(),
            "--no-playlist".as_ref(),
            "-o".as_ref(),
            final_path.as_os_str(),
            url.as_ref(),
        ];
        process::run(&self.tools.ytdlp, args).await?;
        ensure_exists(final_path).await
    }

    async fn fetch_and_reencode(
        &self,
        url: &str,
        names: &MediaNames,
        final_path: &Path,
    ) -> Result<()> {
        let temp_path = self.paths.inbox.join(&names.temp_name);
        let result = self.reencode_via(url, &temp_path, final_path).await;
        if result.is_err() {
            discard(&temp_path).await;
        }
        result
    }

    async fn reencode_via(&self, url: &str, temp_path: &Path, final_path: &Path) -> Result<()> {
        let args: [&OsStr; 6] = [
            "-f".as_ref(),
            FALLBACK_FORMAT.as_ref(),
            "--no-playlist".as_ref(),
            "-o".as_ref(),
            temp_path.as_os_str(),
            url.as_ref(),
        ];
        process::run(&self.tools.ytdlp, args).await?;
        ensure_exists(temp_path).await?;

        let mut args: Vec<&OsStr> = vec!["-y".as_ref(), "-i".as_ref(), temp_path.as_os_str()];
        args.extend(REENCODE_ARGS.into_iter().map(OsStr::new));
        args.push(final_path.as_os_str());
        process::run(&self.tools.ffmpeg, args).await?;
        ensure_exists(final_path).await?;

        fs::remove_file(temp_path).await?;
        Ok(())
    }
}

async fn ensure_exists(path: &Path) -> Result<()> {
    if fs::try_exists(path).await? {
        Ok(())
    } else {
        Err(FeedError::MissingOutput {
            path: path.to_path_buf(),
        })
    }
}

async fn discard(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => info!(file = %path.display(), "removed leftover temp file"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(file = %path.display(), error = %err, "could not remove temp file"),
    }
}
