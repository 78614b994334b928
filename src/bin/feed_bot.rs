use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use swipefeed_tools::{
    chat::{self, Incoming, Reply},
    config::{DEFAULT_CONFIG_PATH, load_bot_token, load_runtime_config_from},
    download::{Downloader, Toolchain},
    logging::init_tracing,
    security::ensure_not_root,
};
use teloxide::{
    prelude::*,
    types::{Me, MessageEntityKind},
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(about = "Telegram bot that drops shared video links into the swipe feed")]
struct Cli {
    /// Key/value config file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Directory holding `video_inbox/` and `index.json`.
    #[arg(long)]
    data_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    ensure_not_root("feed_bot")?;
    let cli = Cli::parse();

    let mut runtime = load_runtime_config_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(root) = cli.data_root {
        runtime = runtime.with_data_root(root);
    }
    runtime.paths.prepare()?;

    let token = load_bot_token(&runtime.paths).context("starting the bot")?;
    let tools = Toolchain::default();
    tools
        .ensure_available()
        .await
        .context("yt-dlp and ffmpeg must be installed and on PATH")?;

    let downloader = Arc::new(Downloader::new(runtime.paths.clone(), tools));
    let bot = Bot::new(token);
    let me = bot.get_me().await.context("fetching bot identity")?;
    info!(
        username = me.username(),
        inbox = %runtime.paths.inbox.display(),
        "bot is online"
    );

    let handler = Update::filter_message().endpoint(handle_message);
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![me, downloader])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("bot stopped");
    Ok(())
}

async fn handle_message(
    bot: Bot,
    msg: Message,
    me: Me,
    downloader: Arc<Downloader>,
) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let incoming = Incoming {
        text,
        direct: msg.chat.is_private(),
        mentions_bot: mentions_bot(&msg, &me),
        from_self: msg.from.as_ref().is_some_and(|user| user.id == me.id),
    };
    let Some(url) = chat::download_request(&incoming, Some(me.username())) else {
        return Ok(());
    };

    info!(chat = msg.chat.id.0, %url, "download requested");
    bot.send_message(msg.chat.id, Reply::Downloading.text())
        .await?;

    let reply = match downloader.download(url).await {
        Ok(done) => {
            info!(file = %done.filename, route = ?done.route, "video added to feed");
            Reply::Sent
        }
        Err(err) => {
            error!(%url, error = %err, "download failed");
            Reply::for_error(&err)
        }
    };
    bot.send_message(msg.chat.id, reply.text()).await?;
    Ok(())
}

/// `@username` mentions and text mentions of the bot's account both count.
fn mentions_bot(msg: &Message, me: &Me) -> bool {
    let handle = format!("@{}", me.username());
    msg.parse_entities()
        .unwrap_or_default()
        .iter()
        .any(|entity| match entity.kind() {
            MessageEntityKind::Mention => entity.text().eq_ignore_ascii_case(&handle),
            MessageEntityKind::TextMention { user } => user.id == me.id,
            _ => false,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn me() -> Me {
        serde_json::from_value(json!({
            "id": 42,
            "is_bot": true,
            "first_name": "Feed",
            "username": "FeedBot",
            "can_join_groups": true,
            "can_read_all_group_messages": false,
            "supports_inline_queries": false,
            "can_connect_to_business": false
        }))
        .unwrap()
    }

    fn group_message(text: &str, entities: Value) -> Message {
        serde_json::from_value(json!({
            "message_id": 1,
            "date": 1_700_000_000,
            "chat": { "id": -1001, "type": "supergroup", "title": "Family" },
            "from": { "id": 7, "is_bot": false, "first_name": "Ann" },
            "text": text,
            "entities": entities
        }))
        .unwrap()
    }

    #[test]
    fn handle_mention_matches_case_insensitively() {
        let msg = group_message(
            "@feedbot https://youtu.be/abc",
            json!([{ "type": "mention", "offset": 0, "length": 8 }]),
        );
        assert!(mentions_bot(&msg, &me()));
    }

    #[test]
    fn other_handles_are_not_mentions() {
        let msg = group_message(
            "@someone https://youtu.be/abc",
            json!([{ "type": "mention", "offset": 0, "length": 8 }]),
        );
        assert!(!mentions_bot(&msg, &me()));
        let plain = group_message("https://youtu.be/abc", json!([]));
        assert!(!mentions_bot(&plain, &me()));
    }

    #[test]
    fn text_mention_matches_by_user_id() {
        let bot_user = json!({ "id": 42, "is_bot": true, "first_name": "Feed" });
        let msg = group_message(
            "Feed https://youtu.be/abc",
            json!([{ "type": "text_mention", "offset": 0, "length": 4, "user": bot_user }]),
        );
        assert!(mentions_bot(&msg, &me()));

        let someone = json!({ "id": 9, "is_bot": false, "first_name": "Feed" });
        let other = group_message(
            "Feed https://youtu.be/abc",
            json!([{ "type": "text_mention", "offset": 0, "length": 4, "user": someone }]),
        );
        assert!(!mentions_bot(&other, &me()));
    }
}
