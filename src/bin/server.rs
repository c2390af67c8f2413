#![forbid(unsafe_code)]

//! Axum server for the tubeshelf catalog.
//!
//! Every page handler follows the same shape: load the typed session, check
//! the `logged_in` / `admin` flags, do one catalog operation, then render a
//! template or redirect. The two `/apiView/` endpoints ignore the session and
//! check credentials on every call.

use std::{
    collections::BTreeMap,
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use askama::Template;
use axum::{
    Form, Json, Router,
    body::Body,
    extract::{Path as AxumPath, State, rejection::FormRejection},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tower_sessions::{MemoryStore, SessionManagerLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tubeshelf::{
    catalog::{CatalogLocation, CatalogStore, CommentRecord},
    config::{RuntimeConfig, RuntimeOverrides, resolve_runtime_config},
    extract::{ExtractError, extract_video_id},
    identity::{AuthError, Credentials, IdentityProvider, PasswordSignIn},
    security::{ensure_not_root, session_layer},
    session::{Flash, FlashLevel, SessionError, Viewer},
    youtube::{LookupError, MetadataProvider, VideoSnippet, YouTubeDataApi, embed_url, watch_url},
};

const LOGIN_PAGE: &str = "/";
const MOVIE_LIST_PAGE: &str = "/movieList/";

const INVALID_CREDENTIALS_MESSAGE: &str = "invalid credentials";
const LOGIN_UNAVAILABLE_MESSAGE: &str = "login is temporarily unavailable, please try again later";
const VIDEO_ADDED_MESSAGE: &str = "The movie has been added successfully!";
const INVALID_URL_MESSAGE: &str = "Please enter a valid URL";
const CATALOG_WRITE_FAILED_MESSAGE: &str = "The catalog could not be updated, please try again later";

#[derive(Debug, Clone)]
struct ServerArgs {
    config: RuntimeConfig,
    listen_host: IpAddr,
}

impl ServerArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(std::env::args().skip(1))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut overrides = RuntimeOverrides::default();
        let mut args = iter.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline_value) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value)),
                _ => (arg.clone(), None),
            };
            let mut value = || -> Result<String> {
                match inline_value {
                    Some(value) => Ok(value.to_string()),
                    None => args
                        .next()
                        .ok_or_else(|| anyhow!("{flag} requires a value")),
                }
            };

            match flag.as_str() {
                "--host" => overrides.tubeshelf_host = Some(value()?),
                "--port" => overrides.tubeshelf_port = Some(parse_port_arg(&value()?)?),
                "--catalog" => overrides.catalog_url = Some(value()?),
                "--static-root" => overrides.static_root = Some(PathBuf::from(value()?)),
                "--env-file" => overrides.env_path = Some(PathBuf::from(value()?)),
                _ => return Err(anyhow!("unknown argument: {arg}")),
            }
        }

        let config = resolve_runtime_config(overrides)?;
        let listen_host = parse_host_arg(&config.tubeshelf_host)?;
        Ok(Self {
            config,
            listen_host,
        })
    }
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/TUBESHELF_HOST")
}

/// Shared state injected into every handler. The external clients are built
/// once at startup; tests swap in fakes through the trait objects.
#[derive(Clone)]
struct AppState {
    catalog: Arc<CatalogStore>,
    metadata: Arc<dyn MetadataProvider>,
    identity: Arc<dyn IdentityProvider>,
    static_root: Arc<PathBuf>,
}

/// Failures of the HTML pages. Only server-side faults end up here; denied
/// actions redirect instead.
#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Store(#[from] anyhow::Error),
    #[error("session store error: {0}")]
    Session(#[from] SessionError),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::NotFound(what) => (StatusCode::NOT_FOUND, format!("Not found: {what}")).into_response(),
            other => {
                tracing::error!(error = %other, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

/// JSON error body for the `/apiView/` endpoints.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(status = %self.status, error = %self.message, "api request failed");
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Everything that can stop an admin's link from becoming a catalog entry.
#[derive(Debug, Error)]
enum AddVideoError {
    #[error("unrecognized link: {0}")]
    Extract(#[from] ExtractError),
    #[error("lookup failed: {0}")]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
enum ApiStatus {
    Success,
    #[serde(rename = "Login Error")]
    LoginError,
    #[serde(rename = "Key Error")]
    KeyError,
}

#[derive(Serialize)]
struct StatusReply {
    status: ApiStatus,
}

#[derive(Serialize)]
struct MovieListReply {
    status: ApiStatus,
    videos: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct LinkReply {
    status: ApiStatus,
    data: LinkData,
}

#[derive(Serialize)]
struct LinkData {
    link: String,
    desc: String,
}

#[derive(Deserialize)]
struct AddVideoForm {
    #[serde(default, rename = "movieUrl")]
    movie_url: String,
}

#[derive(Deserialize)]
struct EditTitleForm {
    #[serde(default, rename = "newTitle")]
    new_title: String,
}

#[derive(Deserialize)]
struct CommentForm {
    #[serde(default)]
    comment: String,
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate {
    error: Option<&'static str>,
}

/// One row of the list page, with its links already built.
struct VideoCard {
    title: String,
    href: String,
    edit_action: String,
    delete_action: String,
}

impl VideoCard {
    fn new(videoid: &str, title: String) -> Self {
        Self {
            title,
            href: video_path("movie", videoid),
            edit_action: video_path("editTitle", videoid),
            delete_action: video_path("delete", videoid),
        }
    }
}

#[derive(Template)]
#[template(path = "movie_list.html")]
struct MovieListTemplate {
    username: String,
    admin: bool,
    flashes: Vec<Flash>,
    videos: Vec<VideoCard>,
}

#[derive(Template)]
#[template(path = "movie.html")]
struct MovieTemplate {
    username: String,
    admin: bool,
    title: String,
    player_url: String,
    comments: Vec<CommentRecord>,
    comment_action: String,
    edit_action: String,
    delete_action: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let ServerArgs {
        config,
        listen_host,
    } = ServerArgs::parse()?;

    ensure_not_root("tubeshelf server")?;

    let location = CatalogLocation::parse(&config.catalog_url, config.catalog_auth_token.clone());
    let catalog = CatalogStore::open(&location)
        .await
        .context("opening catalog")?;

    let state = AppState {
        catalog: Arc::new(catalog),
        metadata: Arc::new(YouTubeDataApi::new(
            config.youtube_api_base.clone(),
            config.youtube_api_key.clone(),
        )),
        identity: Arc::new(PasswordSignIn::new(
            config.identity_endpoint.clone(),
            config.identity_api_key.clone(),
        )),
        static_root: Arc::new(config.static_root.clone()),
    };

    let app = build_router(state, session_layer(&config.public_base_url));

    let addr = SocketAddr::new(listen_host, config.tubeshelf_port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    tracing::info!(%addr, public_base_url = %config.public_base_url, "tubeshelf listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tubeshelf=info,server=info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    // Failing to install the handler only costs us graceful shutdown.
    if let Err(err) = signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to install Ctrl+C handler");
    }
    tracing::info!("shutting down");
}

fn build_router(state: AppState, sessions: SessionManagerLayer<MemoryStore>) -> Router {
    Router::new()
        .route("/", get(login_page))
        .route("/login/", post(login))
        .route("/logout/", get(logout).post(logout))
        .route("/movieList/", get(movie_list))
        .route("/movie/{key}/", get(movie))
        .route("/delete/{key}/", post(delete_movie))
        .route("/editTitle/{key}/", post(edit_title))
        .route("/addVideo/", post(add_video))
        .route("/comment/{key}/", post(add_comment))
        .route(
            "/apiView/movieList/",
            get(api_movie_list).post(api_movie_list),
        )
        .route("/apiView/link/{key}/", get(api_link).post(api_link))
        .route("/static/{*path}", get(serve_static))
        .layer(sessions)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn render(template: &impl Template) -> Response {
    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "template render failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

/// `/{action}/{id}/` with the id percent-encoded, safe for both `Location`
/// headers and HTML attributes.
fn video_path(action: &str, videoid: &str) -> String {
    format!("/{action}/{}/", encode_segment(videoid))
}

fn encode_segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .map(|chunk| if chunk == "+" { "%20" } else { chunk })
        .collect()
}

async fn authenticate(state: &AppState, credentials: Credentials) -> Result<(), AuthError> {
    let identity = state.identity.clone();
    tokio::task::spawn_blocking(move || identity.sign_in(&credentials))
        .await
        .unwrap_or_else(|err| Err(AuthError::Unavailable(format!("sign-in task failed: {err}"))))
}

async fn lookup_video(state: &AppState, videoid: String) -> Result<VideoSnippet, LookupError> {
    let metadata = state.metadata.clone();
    tokio::task::spawn_blocking(move || metadata.lookup(&videoid))
        .await
        .unwrap_or_else(|err| Err(LookupError::Unavailable(format!("lookup task failed: {err}"))))
}

/// Credentials from a form body or query string. A request without a usable
/// form falls back to blank credentials, which never authenticate.
fn submitted_credentials(form: Result<Form<Credentials>, FormRejection>) -> Credentials {
    match form {
        Ok(Form(credentials)) => credentials,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "request carried no readable credentials");
            Credentials::default()
        }
    }
}

async fn login_page() -> Response {
    render(&LoginTemplate { error: None })
}

#[tracing::instrument(skip_all, fields(email = tracing::field::Empty))]
async fn login(
    State(state): State<AppState>,
    mut viewer: Viewer,
    form: Result<Form<Credentials>, FormRejection>,
) -> Result<Response, AppError> {
    let credentials = submitted_credentials(form);
    tracing::Span::current().record("email", credentials.email.as_str());
    match authenticate(&state, credentials.clone()).await {
        Ok(()) => {}
        Err(AuthError::InvalidCredentials) => {
            tracing::warn!("login rejected");
            return Ok(render(&LoginTemplate {
                error: Some(INVALID_CREDENTIALS_MESSAGE),
            }));
        }
        Err(AuthError::Unavailable(reason)) => {
            tracing::error!(%reason, "identity service unavailable");
            return Ok(render(&LoginTemplate {
                error: Some(LOGIN_UNAVAILABLE_MESSAGE),
            }));
        }
    }

    let admin = state.catalog.is_superuser(&credentials.email).await?;
    viewer.sign_in(credentials.username(), admin).await?;
    tracing::info!(username = credentials.username(), admin, "signed in");
    Ok(Redirect::to(MOVIE_LIST_PAGE).into_response())
}

async fn logout(mut viewer: Viewer) -> Result<Response, AppError> {
    if viewer.is_logged_in() {
        tracing::info!(username = viewer.username(), "signed out");
    }
    viewer.sign_out().await?;
    Ok(render(&LoginTemplate { error: None }))
}

async fn movie_list(
    State(state): State<AppState>,
    mut viewer: Viewer,
) -> Result<Response, AppError> {
    if !viewer.is_logged_in() {
        return Ok(Redirect::to(LOGIN_PAGE).into_response());
    }

    let videos = state.catalog.list_titles().await?;
    viewer.remember_videos(videos.clone()).await?;
    let flashes = viewer.take_flashes().await?;

    Ok(render(&MovieListTemplate {
        username: viewer.username().to_string(),
        admin: viewer.is_admin(),
        flashes,
        videos: videos
            .into_iter()
            .map(|(videoid, title)| VideoCard::new(&videoid, title))
            .collect(),
    }))
}

async fn movie(
    State(state): State<AppState>,
    viewer: Viewer,
    AxumPath(key): AxumPath<String>,
) -> Result<Response, AppError> {
    if !viewer.is_logged_in() {
        return Ok(Redirect::to(LOGIN_PAGE).into_response());
    }

    // The list page's snapshot is authoritative for the title; only ids that
    // were never listed in this session hit the catalog.
    let title = match viewer.cached_title(&key) {
        Some(title) => title.to_string(),
        None => state
            .catalog
            .get_title(&key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("video {key}")))?,
    };
    let comments = state.catalog.comments(&key).await?;

    Ok(render(&MovieTemplate {
        username: viewer.username().to_string(),
        admin: viewer.is_admin(),
        title,
        player_url: embed_url(&encode_segment(&key)),
        comments,
        comment_action: video_path("comment", &key),
        edit_action: video_path("editTitle", &key),
        delete_action: video_path("delete", &key),
    }))
}

async fn delete_movie(
    State(state): State<AppState>,
    viewer: Viewer,
    AxumPath(key): AxumPath<String>,
) -> Result<Redirect, AppError> {
    if !viewer.is_admin() {
        tracing::warn!(username = viewer.username(), %key, "delete denied");
        return Ok(Redirect::to(MOVIE_LIST_PAGE));
    }

    let removed = state.catalog.remove_video(&key).await?;
    tracing::info!(username = viewer.username(), %key, removed, "video deleted");
    Ok(Redirect::to(MOVIE_LIST_PAGE))
}

async fn edit_title(
    State(state): State<AppState>,
    viewer: Viewer,
    AxumPath(key): AxumPath<String>,
    Form(form): Form<EditTitleForm>,
) -> Result<Redirect, AppError> {
    if !viewer.is_admin() {
        tracing::warn!(username = viewer.username(), %key, "title edit denied");
        return Ok(Redirect::to(MOVIE_LIST_PAGE));
    }

    let new_title = form.new_title.trim();
    if new_title.is_empty() {
        return Ok(Redirect::to(MOVIE_LIST_PAGE));
    }

    state.catalog.set_title(&key, new_title).await?;
    tracing::info!(username = viewer.username(), %key, "title changed");
    Ok(Redirect::to(MOVIE_LIST_PAGE))
}

/// Resolves the link to an id, asks the platform for its title, and only then
/// writes the catalog entry.
async fn register_video(state: &AppState, movie_url: &str) -> Result<VideoSnippet, AddVideoError> {
    let videoid = extract_video_id(movie_url)?;
    let snippet = lookup_video(state, videoid.clone()).await?;
    state.catalog.set_title(&videoid, &snippet.title).await?;
    Ok(snippet)
}

#[tracing::instrument(skip_all)]
async fn add_video(
    State(state): State<AppState>,
    viewer: Viewer,
    Form(form): Form<AddVideoForm>,
) -> Result<Redirect, AppError> {
    if !viewer.is_admin() {
        tracing::warn!(username = viewer.username(), "add video denied");
        return Ok(Redirect::to(MOVIE_LIST_PAGE));
    }

    match register_video(&state, &form.movie_url).await {
        Ok(snippet) => {
            tracing::info!(videoid = %snippet.id, title = %snippet.title, "video added");
            viewer.push_flash(FlashLevel::Info, VIDEO_ADDED_MESSAGE).await?;
        }
        Err(AddVideoError::Store(err)) => {
            tracing::error!(error = %err, "catalog write failed while adding video");
            viewer
                .push_flash(FlashLevel::Error, CATALOG_WRITE_FAILED_MESSAGE)
                .await?;
        }
        Err(err) => {
            tracing::warn!(error = %err, url = %form.movie_url, "video rejected");
            viewer.push_flash(FlashLevel::Error, INVALID_URL_MESSAGE).await?;
        }
    }
    Ok(Redirect::to(MOVIE_LIST_PAGE))
}

async fn add_comment(
    State(state): State<AppState>,
    viewer: Viewer,
    AxumPath(key): AxumPath<String>,
    Form(form): Form<CommentForm>,
) -> Redirect {
    let target = video_path("movie", &key);
    if !viewer.is_logged_in() || form.comment.trim().is_empty() {
        return Redirect::to(&target);
    }

    if let Err(err) = state.catalog.push_comment(&key, &form.comment).await {
        tracing::error!(error = %err, %key, "failed to store comment");
    }
    Redirect::to(&target)
}

async fn api_movie_list(
    State(state): State<AppState>,
    form: Result<Form<Credentials>, FormRejection>,
) -> ApiResult<Response> {
    if let Err(err) = authenticate(&state, submitted_credentials(form)).await {
        tracing::warn!(error = %err, "api login rejected");
        return Ok(Json(StatusReply {
            status: ApiStatus::LoginError,
        })
        .into_response());
    }

    let videos = state
        .catalog
        .list_titles()
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?;
    Ok(Json(MovieListReply {
        status: ApiStatus::Success,
        videos,
    })
    .into_response())
}

async fn api_link(
    State(state): State<AppState>,
    AxumPath(key): AxumPath<String>,
    form: Result<Form<Credentials>, FormRejection>,
) -> ApiResult<Response> {
    if let Err(err) = authenticate(&state, submitted_credentials(form)).await {
        tracing::warn!(error = %err, "api login rejected");
        return Ok(Json(StatusReply {
            status: ApiStatus::LoginError,
        })
        .into_response());
    }

    match lookup_video(&state, key.clone()).await {
        Ok(snippet) => Ok(Json(LinkReply {
            status: ApiStatus::Success,
            data: LinkData {
                link: watch_url(&encode_segment(&key)),
                desc: snippet.description,
            },
        })
        .into_response()),
        Err(err) => {
            tracing::warn!(error = %err, %key, "api link lookup failed");
            Ok(Json(StatusReply {
                status: ApiStatus::KeyError,
            })
            .into_response())
        }
    }
}

async fn serve_static(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<String>,
) -> Result<Response, AppError> {
    let target = resolve_static_path(&state.static_root, &path)?;
    stream_file(target).await
}

fn resolve_static_path(root: &Path, request_path: &str) -> Result<PathBuf, AppError> {
    let trimmed = request_path.trim_start_matches('/');
    let candidate = Path::new(trimmed);
    if trimmed.is_empty()
        || candidate
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(AppError::NotFound("file".into()));
    }
    Ok(root.join(candidate))
}

async fn stream_file(path: PathBuf) -> Result<Response, AppError> {
    let is_file = tokio::fs::metadata(&path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(AppError::NotFound("file".into()));
    }

    let file = File::open(&path)
        .await
        .map_err(|_| AppError::NotFound("file".into()))?;
    let mime = MimeGuess::from_path(&path).first_or_octet_stream();

    Response::builder()
        .header(header::CONTENT_TYPE, mime.as_ref())
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|err| AppError::Internal(err.to_string()))
}
