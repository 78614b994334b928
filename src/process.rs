//! Thin async wrapper around external tools (yt-dlp, ffmpeg, nmcli).
//!
//! Output is buffered in full and only inspected once the child exits; a
//! non-zero exit status is the only failure signal.

use std::ffi::OsStr;
use std::process::{Output, Stdio};

use tokio::process::Command;
use tracing::debug;

use crate::error::{FeedError, Result};

/// Runs `program` with `args` and waits for it to exit.
pub async fn run<P, I, S>(program: P, args: I) -> Result<Output>
where
    P: AsRef<OsStr>,
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<S> = args.into_iter().collect();
    let printable = format_command(program.as_ref(), &args);
    debug!(command = %printable, "running external command");

    let output = Command::new(program.as_ref())
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| FeedError::Spawn {
            command: printable.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(FeedError::Process {
            command: printable,
            exit_code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

/// Fails when `program` is missing from PATH or cannot answer `version_flag`.
pub async fn ensure_available(program: impl AsRef<OsStr>, version_flag: &str) -> Result<()> {
    run(program, [version_flag]).await.map(|_| ())
}

/// Renders a command line for logs and error messages.
pub fn format_command<S: AsRef<OsStr>>(program: &OsStr, args: &[S]) -> String {
    let mut printable = program.to_string_lossy().into_owned();
    for arg in args {
        printable.push(' ');
        printable.push_str(&arg.as_ref().to_string_lossy());
    }
    printable
}
