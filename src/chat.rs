//! Platform-neutral rules for the chat front door: which messages count as a
//! download request and what the bot says back.

use crate::error::FeedError;

/// The parts of an incoming chat message the bot cares about.
#[derive(Debug, Clone, Copy)]
pub struct Incoming<'a> {
    pub text: &'a str,
    /// Private conversation with the bot.
    pub direct: bool,
    pub mentions_bot: bool,
    pub from_self: bool,
}

/// Returns the URL to download, or `None` when the bot should stay quiet.
///
/// Only direct messages and messages mentioning the bot are considered. The
/// bot's own `@handle` is dropped before checking that the content starts
/// with `http`; the first remaining token is the URL.
pub fn download_request<'a>(incoming: &Incoming<'a>, bot_handle: Option<&str>) -> Option<&'a str> {
    if incoming.from_self || !(incoming.direct || incoming.mentions_bot) {
        return None;
    }

    let first = incoming
        .text
        .split_whitespace()
        .find(|token| !is_handle(token, bot_handle))?;
    first.starts_with("http").then_some(first)
}

fn is_handle(token: &str, bot_handle: Option<&str>) -> bool {
    let Some(handle) = bot_handle else {
        return false;
    };
    token
        .strip_prefix('@')
        .is_some_and(|name| name.eq_ignore_ascii_case(handle.trim_start_matches('@')))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Downloading,
    Sent,
    /// The link did not lead to a downloadable video.
    NotFound,
    Failed,
}

impl Reply {
    pub fn text(self) -> &'static str {
        match self {
            Reply::Downloading => "📥 Downloading video...",
            Reply::Sent => "📩 Video sent to the feed.",
            Reply::NotFound => "❌ Download failed: no video found at that link.",
            Reply::Failed => "❌ Download failed.",
        }
    }

    pub fn for_error(err: &FeedError) -> Self {
        if err.is_resolution() {
            Reply::NotFound
        } else {
            Reply::Failed
        }
    }
}
