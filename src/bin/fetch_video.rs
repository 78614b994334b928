use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use swipefeed_tools::{
    config::{DEFAULT_CONFIG_PATH, load_runtime_config_from},
    download::{Downloader, Route, Toolchain},
    logging::init_tracing,
    preview,
    security::ensure_not_root,
};

#[derive(Parser, Debug)]
#[command(about = "Download video links into the swipe feed by hand")]
struct Cli {
    /// Video page URLs, processed in order.
    #[arg(required_unless_present = "previews")]
    urls: Vec<String>,
    /// Key/value config file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Directory holding `video_inbox/` and `index.json`.
    #[arg(long)]
    data_root: Option<PathBuf>,
    /// Extract previews for inbox videos that are missing one.
    #[arg(long)]
    previews: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    ensure_not_root("fetch_video")?;
    let cli = Cli::parse();

    let mut runtime = load_runtime_config_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(root) = cli.data_root {
        runtime = runtime.with_data_root(root);
    }
    runtime.paths.prepare()?;

    let tools = Toolchain::default();
    tools
        .ensure_available()
        .await
        .context("yt-dlp and ffmpeg must be installed and on PATH")?;
    let downloader = Downloader::new(runtime.paths.clone(), tools);

    println!("Inbox: {}", runtime.paths.inbox.display());
    println!("Index: {}", runtime.paths.index.display());
    println!();

    let mut failed = Vec::new();
    for url in &cli.urls {
        println!("Fetching {}", url);
        match downloader.download(url).await {
            Ok(done) => {
                let how = match done.route {
                    Route::Direct => "native 480p",
                    Route::Reencoded => "re-encoded to 480p",
                };
                println!("  Saved {} ({})", done.filename, how);
                if let Some(preview) = &done.preview {
                    println!("  Preview {}", preview.display());
                }
            }
            Err(err) => {
                eprintln!("  Failed: {}", err);
                failed.push(url.as_str());
            }
        }
    }

    if cli.previews {
        let sweep = preview::regenerate_missing(
            downloader.tools(),
            &runtime.paths.inbox,
            runtime.paths.previews.as_deref(),
        )
        .await
        .context("scanning inbox for missing previews")?;
        println!();
        println!(
            "Previews: {} created, {} already present, {} failed",
            sweep.created, sweep.skipped, sweep.failed
        );
    }

    if !failed.is_empty() {
        bail!(
            "{} of {} downloads failed: {}",
            failed.len(),
            cli.urls.len(),
            failed.join(", ")
        );
    }
    Ok(())
}
