//! Turns a source URL into the deterministic inbox file names.

use serde::Deserialize;
use tracing::debug;

use crate::download::Toolchain;
use crate::error::{FeedError, Result};
use crate::process;

const FINAL_EXTENSION: &str = "mp4";
const TEMP_SUFFIX: &str = "_temp";

/// Only the identifier is needed from `yt-dlp --dump-single-json`.
#[derive(Deserialize)]
struct MinimalInfo {
    id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaNames {
    pub id: String,
    pub final_name: String,
    pub temp_name: String,
}

impl MediaNames {
    pub fn for_id(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            final_name: format!("{id}.{FINAL_EXTENSION}"),
            temp_name: format!("{id}{TEMP_SUFFIX}.{FINAL_EXTENSION}"),
        }
    }
}

/// Metadata-only query: no media bytes are fetched.
pub async fn resolve(tools: &Toolchain, url: &str) -> Result<MediaNames> {
    let output = process::run(
        &tools.ytdlp,
        [
            "--dump-single-json",
            "--skip-download",
            "--no-warnings",
            "--no-playlist",
            url,
        ],
    )
    .await
    .map_err(|err| match err {
        FeedError::Process { stderr, .. } => FeedError::resolution(url, stderr),
        other => other,
    })?;

    let info: MinimalInfo = serde_json::from_slice(&output.stdout)
        .map_err(|err| FeedError::resolution(url, format!("unreadable metadata: {err}")))?;
    let id = info
        .id
        .map(|id| id.trim().to_owned())
        .filter(|id| is_safe_file_name(id))
        .ok_or_else(|| FeedError::resolution(url, "metadata has no usable id"))?;

    debug!(%url, %id, "resolved media identifier");
    Ok(MediaNames::for_id(&id))
}

/// A single path component that stays inside its folder. Ids become inbox
/// file names and the viewer serves media by the same rule.
pub fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::install_stub;
    use tempfile::tempdir;

    fn toolchain_with_ytdlp(body: &str) -> (tempfile::TempDir, Toolchain) {
        let dir = tempdir().unwrap();
        let ytdlp = install_stub(dir.path(), "yt-dlp", body);
        let tools = Toolchain {
            ytdlp,
            ffmpeg: "ffmpeg".into(),
        };
        (dir, tools)
    }

    #[test]
    fn names_follow_identifier() {
        let names = MediaNames::for_id("dQw4w9WgXcQ");
        assert_eq!(names.final_name, "dQw4w9WgXcQ.mp4");
        assert_eq!(names.temp_name, "dQw4w9WgXcQ_temp.mp4");
    }

    #[tokio::test]
    async fn resolve_reads_id_from_metadata() {
        let (_dir, tools) =
            toolchain_with_ytdlp(r#"echo '{"id": "abc123", "title": "Clip", "formats": []}'"#);
        let names = resolve(&tools, "https://example.com/v/abc123").await.unwrap();
        assert_eq!(names, MediaNames::for_id("abc123"));
    }

    #[tokio::test]
    async fn tool_failure_becomes_resolution_error() {
        let (_dir, tools) =
            toolchain_with_ytdlp("echo 'ERROR: Unsupported URL' >&2\nexit 1");
        let err = resolve(&tools, "https://nowhere.invalid").await.unwrap_err();
        match err {
            FeedError::Resolution { url, reason } => {
                assert_eq!(url, "https://nowhere.invalid");
                assert!(reason.contains("Unsupported URL"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unusable_ids_are_rejected() {
        for body in [
            "echo 'not json'",
            r#"echo '{"title": "no id"}'"#,
            r#"echo '{"id": "../escape"}'"#,
            r#"echo '{"id": "  "}'"#,
        ] {
            let (_dir, tools) = toolchain_with_ytdlp(body);
            let err = resolve(&tools, "https://example.com/x").await.unwrap_err();
            assert!(err.is_resolution(), "{body} -> {err}");
        }
    }

    #[tokio::test]
    async fn dotted_ids_are_plain_file_names() {
        let (_dir, tools) = toolchain_with_ytdlp(r#"echo '{"id": "a..b"}'"#);
        let names = resolve(&tools, "https://example.com/a..b").await.unwrap();
        assert_eq!(names.final_name, "a..b.mp4");
        assert!(is_safe_file_name(&names.final_name));
        assert!(!is_safe_file_name(".."));
        assert!(!is_safe_file_name("."));
        assert!(!is_safe_file_name("sub/dir.mp4"));
    }
}
