use anyhow::{Context, Result};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::error::FeedError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/swipefeed-env";
pub const DEFAULT_VIEWER_PORT: u16 = 8080;
pub const DEFAULT_VIEWER_HOST: &str = "127.0.0.1";
pub const INBOX_SUBDIR: &str = "video_inbox";
pub const INDEX_FILE: &str = "index.json";
pub const DOTENV_FILE: &str = ".env";
pub const BOT_TOKEN_VAR: &str = "SWIPEFEED_BOT_TOKEN";

#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub data_root: Option<PathBuf>,
    pub preview_dir: Option<PathBuf>,
    pub viewer_host: Option<String>,
    pub viewer_port: Option<u16>,
}

/// Every filesystem location the ingest pipeline and the viewer share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPaths {
    pub root: PathBuf,
    pub inbox: PathBuf,
    pub index: PathBuf,
    /// `None` keeps previews next to their video.
    pub previews: Option<PathBuf>,
}

impl FeedPaths {
    pub fn from_root(root: impl Into<PathBuf>, previews: Option<PathBuf>) -> Self {
        let root = root.into();
        Self {
            inbox: root.join(INBOX_SUBDIR),
            index: root.join(INDEX_FILE),
            root,
            previews,
        }
    }

    /// Creates the inbox (and preview folder, if separate) so later steps can
    /// assume they exist.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.inbox)
            .with_context(|| format!("creating {}", self.inbox.display()))?;
        if let Some(previews) = &self.previews {
            fs::create_dir_all(previews)
                .with_context(|| format!("creating {}", previews.display()))?;
        }
        Ok(())
    }

    pub fn dotenv(&self) -> PathBuf {
        self.root.join(DOTENV_FILE)
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub paths: FeedPaths,
    pub viewer_host: String,
    pub viewer_port: u16,
}

impl RuntimeConfig {
    /// Re-roots the inbox and index under `root`, keeping everything else.
    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths = FeedPaths::from_root(root, self.paths.previews.take());
        self
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for (key, value) in env_pairs(&content) {
        match key {
            "DATA_ROOT" => {
                if !value.is_empty() {
                    cfg.data_root = Some(PathBuf::from(value));
                }
            }
            "PREVIEW_DIR" => {
                if !value.is_empty() {
                    cfg.preview_dir = Some(PathBuf::from(value));
                }
            }
            "VIEWER_HOST" => {
                if !value.is_empty() {
                    cfg.viewer_host = Some(value.to_string());
                }
            }
            "VIEWER_PORT" => {
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("Parsing VIEWER_PORT from {}", path.display()))?;
                cfg.viewer_port = Some(port);
            }
            _ => {}
        }
    }
    Ok(Some(cfg))
}

/// Splits `KEY="value"` lines, skipping blanks and `#` comments.
fn env_pairs(content: &str) -> impl Iterator<Item = (&str, &str)> {
    content.lines().filter_map(|line| {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }
        let (key, value_raw) = trimmed.split_once('=')?;
        Some((key.trim(), value_raw.trim().trim_matches('"')))
    })
}

pub fn load_runtime_config() -> Result<RuntimeConfig> {
    load_runtime_config_from(Path::new(DEFAULT_CONFIG_PATH))
}

/// Unlike a deployment manifest, a missing config file is fine here: the bot
/// and viewer fall back to the working directory as their data root.
pub fn load_runtime_config_from(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    let path = path.as_ref();
    let cfg = read_env_config(path)?.unwrap_or_default();
    let data_root = match cfg.data_root {
        Some(root) => root,
        None => env::current_dir().context("resolving working directory")?,
    };
    Ok(RuntimeConfig {
        paths: FeedPaths::from_root(data_root, cfg.preview_dir),
        viewer_host: cfg
            .viewer_host
            .unwrap_or_else(|| DEFAULT_VIEWER_HOST.to_string()),
        viewer_port: cfg.viewer_port.unwrap_or(DEFAULT_VIEWER_PORT),
    })
}

/// Picks the bot token from the process environment first, then from a
/// `.env` file. Absence is fatal for the caller.
pub fn bot_token(
    env_value: Option<String>,
    dotenv_path: &Path,
) -> std::result::Result<String, FeedError> {
    if let Some(token) = env_value.filter(|value| !value.trim().is_empty()) {
        return Ok(token.trim().to_string());
    }

    if let Ok(content) = fs::read_to_string(dotenv_path)
        && let Some((_, value)) = env_pairs(&content).find(|(key, _)| *key == BOT_TOKEN_VAR)
        && !value.is_empty()
    {
        return Ok(value.to_string());
    }

    Err(FeedError::MissingCredential {
        name: BOT_TOKEN_VAR.to_string(),
    })
}

pub fn load_bot_token(paths: &FeedPaths) -> std::result::Result<String, FeedError> {
    bot_token(env::var(BOT_TOKEN_VAR).ok(), &paths.dotenv())
}
