use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use mime_guess::MimeGuess;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use swipefeed_tools::{
    config::{DEFAULT_CONFIG_PATH, load_runtime_config_from},
    feed::{Feed, FeedItem, Swipe},
    logging::init_tracing,
    network::{NetworkManager, Screen},
    playback::{FirstFrame, FrameWait},
    resolver::is_safe_file_name,
    security::ensure_not_root,
};
use tokio::{fs::File, signal, task, time::timeout};
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

const READY_WAIT: Duration = Duration::from_secs(30);
const VIDEO_ROUTE: &str = "/media/videos";
const PREVIEW_ROUTE: &str = "/media/previews";

#[derive(Parser, Debug)]
#[command(about = "HTTP backend for the swipe feed viewer")]
struct Cli {
    /// Key/value config file.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Directory holding `video_inbox/` and `index.json`.
    #[arg(long)]
    data_root: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Clone)]
struct AppState {
    feed: Arc<RwLock<Feed>>,
    frames: FirstFrame,
    network: Arc<NetworkManager>,
}

impl AppState {
    fn new(feed: Feed, network: NetworkManager) -> Self {
        let frames = FirstFrame::new();
        frames.begin();
        Self {
            feed: Arc::new(RwLock::new(feed)),
            frames,
            network: Arc::new(network),
        }
    }

    fn current_view(&self) -> Option<CurrentView> {
        let feed = self.feed.read();
        current_view(&feed, &self.frames)
    }

    /// Feed lookups stat preview files, so they run on the blocking pool.
    async fn blocking<T, F>(&self, work: F) -> ApiResult<T>
    where
        F: FnOnce(&AppState) -> T + Send + 'static,
        T: Send + 'static,
    {
        let state = self.clone();
        task::spawn_blocking(move || work(&state))
            .await
            .map_err(|err| ApiError::internal(format!("task join error: {err}")))
    }

    /// Applies a navigation step. A new screen generation starts only when
    /// the position actually changed.
    fn navigate(&self, step: impl FnOnce(&mut Feed) -> bool) -> MoveView {
        let mut feed = self.feed.write();
        let moved = step(&mut feed);
        if moved {
            self.frames.begin();
        }
        MoveView {
            moved,
            current: current_view(&feed, &self.frames),
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Clone, Serialize)]
struct ItemView {
    position: usize,
    filename: String,
    timestamp: String,
    video_url: String,
    preview_url: Option<String>,
}

impl From<FeedItem> for ItemView {
    fn from(item: FeedItem) -> Self {
        let preview_url = item
            .preview_path
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| media_url(PREVIEW_ROUTE, &name.to_string_lossy()));
        Self {
            position: item.position,
            video_url: media_url(VIDEO_ROUTE, &item.filename),
            filename: item.filename,
            timestamp: item.timestamp,
            preview_url,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct CurrentView {
    #[serde(flatten)]
    item: ItemView,
    total: usize,
    generation: u64,
    /// The current video repeats until the viewer moves on.
    #[serde(rename = "loop")]
    looping: bool,
}

#[derive(Debug, Serialize)]
struct MoveView {
    moved: bool,
    current: Option<CurrentView>,
}

#[derive(Debug, Serialize)]
struct BootstrapPayload {
    screen: Screen,
    connected: bool,
    total: usize,
    current: Option<CurrentView>,
}

#[derive(Debug, Deserialize)]
struct SwipeRequest {
    start_y: f64,
    end_y: f64,
}

#[derive(Debug, Deserialize)]
struct GenerationParam {
    generation: u64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct ReadyStatus {
    ready: bool,
    superseded: bool,
}

#[derive(Debug, Serialize)]
struct ReadyAck {
    accepted: bool,
}

#[derive(Debug, Serialize)]
struct NetworkStatus {
    connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ScanResult {
    ssids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    ssid: String,
    password: String,
}

/// Ids from generic extractors may carry `#`, `?` or spaces.
fn media_url(route: &str, file_name: &str) -> String {
    format!("{route}/{}", urlencoding::encode(file_name))
}

fn current_view(feed: &Feed, frames: &FirstFrame) -> Option<CurrentView> {
    feed.current().map(|item| CurrentView {
        item: item.into(),
        total: feed.len(),
        generation: frames.generation(),
        looping: true,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    ensure_not_root("viewer_backend")?;
    let cli = Cli::parse();

    let mut runtime = load_runtime_config_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(root) = cli.data_root {
        runtime = runtime.with_data_root(root);
    }
    let host = cli.host.unwrap_or(runtime.viewer_host);
    let port = cli.port.unwrap_or(runtime.viewer_port);

    let network = NetworkManager::default();
    if let Err(err) = network.ensure_available().await {
        warn!(error = %err, "nmcli unavailable; the network setup screen will not work");
    }

    let feed = Feed::load(&runtime.paths);
    info!(videos = feed.len(), index = %runtime.paths.index.display(), "feed loaded");
    let app = router(AppState::new(feed, network));

    let addr = SocketAddr::new(
        host.parse()
            .with_context(|| format!("parsing viewer host {host}"))?,
        port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("viewer backend listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running viewer backend")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/bootstrap", get(bootstrap))
        .route("/api/feed", get(list_feed))
        .route("/api/feed/current", get(current))
        .route("/api/feed/advance", axum::routing::post(advance))
        .route("/api/feed/retreat", axum::routing::post(retreat))
        .route("/api/feed/swipe", axum::routing::post(swipe))
        .route("/api/feed/ready", get(wait_ready).post(report_ready))
        .route("/media/videos/{file}", get(stream_video))
        .route("/media/previews/{file}", get(stream_preview))
        .route("/api/network", get(network_status))
        .route("/api/network/scan", get(network_scan))
        .route("/api/network/connect", axum::routing::post(network_connect))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn bootstrap(State(state): State<AppState>) -> ApiResult<Json<BootstrapPayload>> {
    let connected = state.network.is_connected().await;
    let (total, current) = state
        .blocking(|state| {
            let feed = state.feed.read();
            (feed.len(), current_view(&feed, &state.frames))
        })
        .await?;
    Ok(Json(BootstrapPayload {
        screen: Screen::for_connectivity(connected),
        connected,
        total,
        current,
    }))
}

async fn list_feed(State(state): State<AppState>) -> ApiResult<Json<Vec<ItemView>>> {
    let items = state
        .blocking(|state| {
            let feed = state.feed.read();
            (0..feed.len())
                .filter_map(|position| feed.item(position))
                .map(ItemView::from)
                .collect::<Vec<_>>()
        })
        .await?;
    Ok(Json(items))
}

async fn current(State(state): State<AppState>) -> ApiResult<Json<CurrentView>> {
    state
        .blocking(AppState::current_view)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("no videos in the feed"))
}

async fn advance(State(state): State<AppState>) -> ApiResult<Json<MoveView>> {
    state
        .blocking(|state| state.navigate(Feed::advance))
        .await
        .map(Json)
}

async fn retreat(State(state): State<AppState>) -> ApiResult<Json<MoveView>> {
    state
        .blocking(|state| state.navigate(Feed::retreat))
        .await
        .map(Json)
}

async fn swipe(
    State(state): State<AppState>,
    Json(request): Json<SwipeRequest>,
) -> ApiResult<Json<MoveView>> {
    let direction = Swipe::from_vertical_drag(request.start_y, request.end_y);
    state
        .blocking(move |state| {
            state.navigate(|feed| direction.is_some_and(|direction| feed.swipe(direction)))
        })
        .await
        .map(Json)
}

async fn wait_ready(
    State(state): State<AppState>,
    Query(param): Query<GenerationParam>,
) -> Json<ReadyStatus> {
    let status = match timeout(READY_WAIT, state.frames.wait(param.generation)).await {
        Ok(FrameWait::Ready) => ReadyStatus {
            ready: true,
            superseded: false,
        },
        Ok(FrameWait::Superseded) => ReadyStatus {
            ready: false,
            superseded: true,
        },
        Err(_) => ReadyStatus {
            ready: false,
            superseded: false,
        },
    };
    Json(status)
}

async fn report_ready(
    State(state): State<AppState>,
    Json(param): Json<GenerationParam>,
) -> Json<ReadyAck> {
    Json(ReadyAck {
        accepted: state.frames.mark_ready(param.generation),
    })
}

async fn stream_video(
    State(state): State<AppState>,
    AxumPath(file): AxumPath<String>,
) -> ApiResult<Response> {
    let dir = state.feed.read().inbox().to_path_buf();
    stream_media(&dir, &file).await
}

async fn stream_preview(
    State(state): State<AppState>,
    AxumPath(file): AxumPath<String>,
) -> ApiResult<Response> {
    let dir = state.feed.read().preview_dir().to_path_buf();
    stream_media(&dir, &file).await
}

async fn stream_media(dir: &Path, file: &str) -> ApiResult<Response> {
    if !is_safe_file_name(file) {
        return Err(ApiError::not_found("file not found"));
    }
    stream_file(dir.join(file)).await
}

async fn network_status(State(state): State<AppState>) -> Json<NetworkStatus> {
    Json(NetworkStatus {
        connected: state.network.is_connected().await,
        error: None,
    })
}

async fn network_scan(State(state): State<AppState>) -> ApiResult<Json<ScanResult>> {
    let ssids = state
        .network
        .scan()
        .await
        .map_err(|err| ApiError::bad_gateway(err.to_string()))?;
    Ok(Json(ScanResult { ssids }))
}

async fn network_connect(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> Json<NetworkStatus> {
    let error = match state.network.connect(&request.ssid, &request.password).await {
        Ok(()) => None,
        Err(err) => {
            warn!(ssid = %request.ssid, error = %err, "could not join wifi network");
            Some(err.to_string())
        }
    };
    Json(NetworkStatus {
        connected: state.network.is_connected().await,
        error,
    })
}

async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;

    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);
    let mut response = body.into_response();
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = mime.to_string().parse()
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use swipefeed_tools::config::FeedPaths;
    use swipefeed_tools::index::IndexEntry;
    use tempfile::{TempDir, tempdir};

    fn entry(filename: &str, timestamp: &str) -> IndexEntry {
        IndexEntry {
            filename: filename.into(),
            timestamp: timestamp.into(),
        }
    }

    fn state_with(entries: Vec<IndexEntry>) -> (TempDir, AppState) {
        let dir = tempdir().unwrap();
        let paths = FeedPaths::from_root(dir.path(), None);
        paths.prepare().unwrap();
        let feed = Feed::new(entries, &paths);
        let state = AppState::new(feed, NetworkManager::with_program("/nonexistent/nmcli"));
        (dir, state)
    }

    fn three_videos() -> Vec<IndexEntry> {
        vec![
            entry("t1.mp4", "2024-01-01T00:00:00"),
            entry("t2.mp4", "2024-02-01T00:00:00"),
            entry("t3.mp4", "2024-03-01T00:00:00"),
        ]
    }

    #[tokio::test]
    async fn bootstrap_without_network_asks_for_setup() {
        let (_dir, state) = state_with(three_videos());
        let Json(payload) = bootstrap(State(state)).await.unwrap();
        assert!(!payload.connected);
        assert_eq!(payload.screen, Screen::NetworkSetup);
        assert_eq!(payload.total, 3);
        let current = payload.current.unwrap();
        assert_eq!(current.item.filename, "t3.mp4");
        assert_eq!(current.item.video_url, "/media/videos/t3.mp4");
        assert!(current.looping);
    }

    #[tokio::test]
    async fn navigation_starts_new_generation_only_on_move() {
        let (_dir, state) = state_with(three_videos());
        let start = state.frames.generation();

        let Json(back) = retreat(State(state.clone())).await.unwrap();
        assert!(!back.moved);
        assert_eq!(state.frames.generation(), start);

        let Json(next) = advance(State(state.clone())).await.unwrap();
        assert!(next.moved);
        let current = next.current.unwrap();
        assert_eq!(current.item.filename, "t2.mp4");
        assert_eq!(current.generation, start + 1);
    }

    #[tokio::test]
    async fn swipe_down_goes_to_older_video() {
        let (_dir, state) = state_with(three_videos());

        let Json(small) = swipe(
            State(state.clone()),
            Json(SwipeRequest {
                start_y: 300.0,
                end_y: 280.0,
            }),
        )
        .await
        .unwrap();
        assert!(!small.moved);

        let Json(down) = swipe(
            State(state.clone()),
            Json(SwipeRequest {
                start_y: 300.0,
                end_y: 100.0,
            }),
        )
        .await
        .unwrap();
        assert!(down.moved);
        assert_eq!(down.current.unwrap().item.filename, "t2.mp4");
    }

    #[tokio::test]
    async fn empty_feed_has_no_current_video() {
        let (_dir, state) = state_with(Vec::new());
        let err = current(State(state.clone())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let Json(step) = advance(State(state)).await.unwrap();
        assert!(!step.moved);
        assert!(step.current.is_none());
    }

    #[tokio::test]
    async fn ready_report_wakes_the_waiter() {
        let (_dir, state) = state_with(three_videos());
        let generation = state.frames.generation();

        let waiter = tokio::spawn(wait_ready(
            State(state.clone()),
            Query(GenerationParam { generation }),
        ));
        tokio::task::yield_now().await;
        let Json(ack) = report_ready(State(state.clone()), Json(GenerationParam { generation })).await;
        assert!(ack.accepted);

        let Json(status) = waiter.await.unwrap();
        assert_eq!(
            status,
            ReadyStatus {
                ready: true,
                superseded: false
            }
        );
    }

    #[tokio::test]
    async fn waiting_on_an_old_screen_reports_superseded() {
        let (_dir, state) = state_with(three_videos());
        let old = state.frames.generation();
        advance(State(state.clone())).await.unwrap();

        let Json(status) = wait_ready(State(state), Query(GenerationParam { generation: old })).await;
        assert!(status.superseded);
        assert!(!status.ready);
    }

    #[tokio::test]
    async fn media_names_cannot_escape_their_folder() {
        let (dir, state) = state_with(three_videos());
        fs::write(dir.path().join("index.json"), "[]").unwrap();
        fs::write(dir.path().join("video_inbox").join("t3.mp4"), "video").unwrap();

        let ok = stream_video(State(state.clone()), AxumPath("t3.mp4".into()))
            .await
            .unwrap();
        assert_eq!(ok.headers()[header::CONTENT_TYPE], "video/mp4");

        fs::write(dir.path().join("video_inbox").join("a..b.mp4"), "dotted").unwrap();
        let dotted = stream_video(State(state.clone()), AxumPath("a..b.mp4".into())).await;
        assert!(dotted.is_ok());

        for name in ["../index.json", "..", ".", "a\\b.mp4"] {
            let err = stream_video(State(state.clone()), AxumPath(name.into()))
                .await
                .unwrap_err();
            assert_eq!(err.status, StatusCode::NOT_FOUND);
        }
        let missing = stream_preview(State(state), AxumPath("t3_preview.jpg".into()))
            .await
            .unwrap_err();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn media_urls_escape_awkward_ids() {
        let item = FeedItem {
            position: 0,
            filename: "clip #1?.mp4".into(),
            timestamp: "2024-01-01T00:00:00".into(),
            video_path: PathBuf::from("/feed/video_inbox/clip #1?.mp4"),
            preview_path: Some(PathBuf::from("/feed/video_inbox/clip #1?_preview.jpg")),
        };
        let view = ItemView::from(item);
        assert_eq!(view.video_url, "/media/videos/clip%20%231%3F.mp4");
        assert_eq!(
            view.preview_url.as_deref(),
            Some("/media/previews/clip%20%231%3F_preview.jpg")
        );
        assert_eq!(view.filename, "clip #1?.mp4");
    }

    #[test]
    fn item_view_links_existing_preview() {
        let item = FeedItem {
            position: 0,
            filename: "abc.mp4".into(),
            timestamp: "2024-01-01T00:00:00".into(),
            video_path: PathBuf::from("/feed/video_inbox/abc.mp4"),
            preview_path: Some(PathBuf::from("/feed/video_inbox/abc_preview.jpg")),
        };
        let view = ItemView::from(item);
        assert_eq!(
            view.preview_url.as_deref(),
            Some("/media/previews/abc_preview.jpg")
        );
        let json = serde_json::to_value(CurrentView {
            item: view,
            total: 1,
            generation: 1,
            looping: true,
        })
        .unwrap();
        assert_eq!(json["loop"], true);
        assert_eq!(json["filename"], "abc.mp4");
    }
}
