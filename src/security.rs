#![forbid(unsafe_code)]

//! Privilege guard shared by the swipefeed binaries.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when a binary is started as root. The bot and the viewer only
/// ever touch the data root and shell out to user-level tools, so there is no
/// reason to hand yt-dlp or ffmpeg root privileges.
pub fn ensure_not_root(process: &str) -> Result<()> {
    if Uid::effective().is_root() {
        bail!("{process} must not be run as root; start it from the kiosk user account");
    }
    Ok(())
}
