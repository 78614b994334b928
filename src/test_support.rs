//! Helpers for replacing yt-dlp, ffmpeg and nmcli with shell stubs.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Writes an executable bash script named `name` into `dir`.
pub(crate) fn install_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
    let script_path = dir.join(name);
    let script = format!("#!/usr/bin/env bash\nset -euo pipefail\n{body}\n");
    fs::write(&script_path, script).unwrap();
    let mut perms = fs::metadata(&script_path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script_path, perms).unwrap();
    script_path
}

/// ffmpeg stand-in that writes a marker file to its last argument.
pub(crate) const FFMPEG_WRITES_LAST_ARG: &str = r#"
out="${@: -1}"
echo "frame" > "$out"
"#;
