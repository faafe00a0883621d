use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, get_service, post, put},
    Json, Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::services::ServeDir;

use crate::assist::{self, DesignDrafts, DesignInputs, Suggestion, SuggestionKind};
use crate::error::ChatError;
use crate::llm::{ChatBackend, LlmClient};
use crate::models::{ProviderConfig, ProviderKind, Turn, REDACTED};
use crate::pages::{self, Page, PageNotes};
use crate::session::{ChatSession, Submission};
use crate::{db, telemetry};

type ApiError = (StatusCode, String);

/**
 * \brief 服务共享状态：数据库路径、模型适配器、按页面划分的内存会话。
 */
#[derive(Clone)]
pub struct AppState {
    db_path: Arc<PathBuf>,
    backend: Arc<dyn ChatBackend>,
    sessions: Arc<Mutex<HashMap<&'static str, Arc<ChatSession>>>>,
}

impl AppState {
    /**
     * \brief 打开数据库并执行迁移。
     */
    pub fn open(db_path: impl Into<PathBuf>, backend: Arc<dyn ChatBackend>) -> Result<Self> {
        let db_path = db_path.into();
        let conn = db::open_db(&db_path)?;
        db::migrate(&conn)?;
        Ok(Self {
            db_path: Arc::new(db_path),
            backend,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn conn(&self) -> Result<Connection> {
        db::open_db(self.db_path.as_path())
    }

    fn session(&self, page: &'static Page) -> Arc<ChatSession> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions
            .entry(page.slug)
            .or_insert_with(|| Arc::new(ChatSession::new(page.context, self.backend.clone())))
            .clone()
    }

    fn existing_session(&self, slug: &str) -> Option<Arc<ChatSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(slug)
            .cloned()
    }

    fn drop_session(&self, slug: &str) -> Option<Arc<ChatSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(slug)
    }
}

/**
 * \brief 启动本地 HTTP 服务，提供静态前端与 API。
 * \param addr 监听地址，如 "127.0.0.1:5173"
 */
pub async fn run(addr: &str) -> Result<()> {
    let backend: Arc<dyn ChatBackend> = Arc::new(LlmClient::new()?);
    let state = AppState::open(db::default_db_path(), backend)?;
    telemetry::set_enabled(db::get_telemetry_enabled(&state.conn()?)?);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/**
 * \brief 组装路由；静态资源目录由 DBPLANNER_UI_DIR 指定。
 */
pub fn router(state: AppState) -> Router {
    let ui_root = std::env::var("DBPLANNER_UI_DIR").unwrap_or_else(|_| "ui/dist".to_string());
    let static_service =
        get_service(ServeDir::new(ui_root).append_index_html_on_directories(true));

    Router::new()
        .route("/api/settings", get(get_settings).post(save_settings))
        .route("/api/pages", get(list_pages))
        .route("/api/pages/{slug}", get(get_page))
        .route("/api/notes/{key}", put(save_note))
        .route(
            "/api/chat/{slug}",
            get(get_chat).post(submit_chat).delete(leave_chat),
        )
        .route("/api/suggest/{kind}", post(suggest))
        .fallback_service(static_service)
        .with_state(state)
}

#[derive(Serialize, Debug)]
struct ProviderOption {
    id: &'static str,
    label: String,
    models: &'static [&'static str],
    key_help: &'static str,
}

#[derive(Serialize, Debug)]
struct SettingsState {
    /** \brief 已保存配置（Key 已掩码），未配置为 null。 */
    settings: Option<ProviderConfig>,
    providers: Vec<ProviderOption>,
    telemetry_enabled: bool,
}

#[derive(Deserialize, Debug)]
struct SettingsInput {
    #[serde(flatten)]
    settings: Value,
    #[serde(default, rename = "telemetryEnabled")]
    telemetry_enabled: Option<bool>,
}

#[derive(Serialize, Debug)]
struct PageSummary {
    slug: &'static str,
    title: &'static str,
    summary: &'static str,
}

#[derive(Deserialize, Debug)]
struct NoteInput {
    text: String,
}

#[derive(Deserialize, Debug)]
struct SubmitInput {
    text: String,
}

#[derive(Serialize, Debug)]
struct ChatState {
    slug: &'static str,
    pending: bool,
    transcript: Vec<Turn>,
}

#[derive(Serialize, Debug)]
struct ChatReply {
    reply: String,
    transcript: Vec<Turn>,
}

#[derive(Deserialize, Debug, Default)]
struct SuggestInput {
    /** \brief 当前未保存的草稿，缺省取已保存值。 */
    #[serde(default)]
    current: Option<String>,
    /** \brief 是否直接保存合并结果。 */
    #[serde(default)]
    save: bool,
    /** \brief 生成提示所依赖的未保存草稿。 */
    #[serde(default)]
    drafts: DesignDrafts,
}

fn settings_state(conn: &Connection) -> Result<SettingsState> {
    let settings = ProviderConfig::from_stored(db::load_settings(conn)?)
        .ok()
        .map(|c| c.redacted());
    let providers = ProviderKind::ALL
        .iter()
        .map(|kind| ProviderOption {
            id: kind.as_str(),
            label: kind.to_string(),
            models: kind.model_options(),
            key_help: kind.key_help(),
        })
        .collect();
    Ok(SettingsState {
        settings,
        providers,
        telemetry_enabled: db::get_telemetry_enabled(conn)?,
    })
}

/**
 * \brief 获取当前配置与可选服务列表。
 */
async fn get_settings(State(state): State<AppState>) -> Result<Json<SettingsState>, ApiError> {
    let conn = state.conn().map_err(internal_err)?;
    Ok(Json(settings_state(&conn).map_err(internal_err)?))
}

/**
 * \brief 保存配置；Key 为掩码时沿用已保存的 Key。
 */
async fn save_settings(
    State(state): State<AppState>,
    Json(input): Json<SettingsInput>,
) -> Result<Json<SettingsState>, ApiError> {
    let conn = state.conn().map_err(internal_err)?;
    let mut config = ProviderConfig::from_stored(Some(input.settings)).map_err(chat_err)?;
    if config.api_key == REDACTED {
        if let Ok(previous) = ProviderConfig::from_stored(db::load_settings(&conn).map_err(internal_err)?) {
            config.api_key = previous.api_key;
        }
    }
    if !(0.0..=1.0).contains(&config.temperature) {
        return Err(chat_err(ChatError::InvalidTemperature(config.temperature)));
    }
    db::save_settings(&conn, &config).map_err(internal_err)?;
    if let Some(enabled) = input.telemetry_enabled {
        db::set_telemetry_enabled(&conn, enabled).map_err(internal_err)?;
        telemetry::set_enabled(enabled);
    }
    telemetry::log_event(
        "server.settings",
        &format!(
            "save provider={} model={}",
            config.provider.as_str(),
            config.model
        ),
    );
    Ok(Json(settings_state(&conn).map_err(internal_err)?))
}

async fn list_pages() -> Json<Vec<PageSummary>> {
    Json(
        pages::PAGES
            .iter()
            .map(|p| PageSummary {
                slug: p.slug,
                title: p.title,
                summary: p.summary,
            })
            .collect(),
    )
}

/**
 * \brief 页面详情与草稿当前值。
 */
async fn get_page(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<PageNotes>, ApiError> {
    let page = find_page(&slug)?;
    let conn = state.conn().map_err(internal_err)?;
    Ok(Json(pages::load_notes(&conn, page).map_err(internal_err)?))
}

/**
 * \brief 保存单个草稿。
 */
async fn save_note(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(input): Json<NoteInput>,
) -> Result<StatusCode, ApiError> {
    if pages::find_field(&key).is_none() {
        return Err((StatusCode::NOT_FOUND, format!("unknown note key: {}", key)));
    }
    let conn = state.conn().map_err(internal_err)?;
    pages::save_note(&conn, &key, &input.text).map_err(internal_err)?;
    telemetry::log_event(
        "server.note",
        &format!("save key={} len={}", key, input.text.len()),
    );
    Ok(StatusCode::NO_CONTENT)
}

/**
 * \brief 会话记录与在途状态；会话不存在时返回空记录。
 */
async fn get_chat(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<ChatState>, ApiError> {
    let page = find_page(&slug)?;
    let (pending, transcript) = match state.existing_session(page.slug) {
        Some(session) => (session.is_pending(), session.transcript()),
        None => (false, Vec::new()),
    };
    Ok(Json(ChatState {
        slug: page.slug,
        pending,
        transcript,
    }))
}

/**
 * \brief 提交一条消息；配置在提交时从存储读取快照。
 */
async fn submit_chat(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(input): Json<SubmitInput>,
) -> Result<Json<ChatReply>, ApiError> {
    let page = find_page(&slug)?;
    if input.text.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is empty".to_string()));
    }
    let stored = {
        let conn = state.conn().map_err(internal_err)?;
        db::load_settings(&conn).map_err(internal_err)?
    };

    let session = state.session(page);
    match ProviderConfig::from_stored(stored) {
        Ok(config) => session.configure(config),
        Err(ChatError::ConfigMissing) => session.clear_config(),
        Err(e) => return Err(chat_err(e)),
    }

    match session.submit(&input.text).await.map_err(chat_err)? {
        Submission::Replied(reply) => Ok(Json(ChatReply {
            reply,
            transcript: session.transcript(),
        })),
        Submission::Ignored => Err((
            StatusCode::CONFLICT,
            "a request is already pending for this page".to_string(),
        )),
    }
}

/**
 * \brief 离开页面：取消在途请求并丢弃会话记录。
 */
async fn leave_chat(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    let page = find_page(&slug)?;
    if let Some(session) = state.drop_session(page.slug) {
        session.cancel();
        telemetry::log_event("server.chat", &format!("leave page={}", page.slug));
    }
    Ok(StatusCode::NO_CONTENT)
}

/**
 * \brief 页面级生成助手。
 */
async fn suggest(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    body: Option<Json<SuggestInput>>,
) -> Result<Json<Suggestion>, ApiError> {
    let kind: SuggestionKind = kind
        .parse()
        .map_err(|e: anyhow::Error| (StatusCode::NOT_FOUND, e.to_string()))?;
    let input = body.map(|Json(b)| b).unwrap_or_default();

    let (inputs, current, config) = {
        let conn = state.conn().map_err(internal_err)?;
        let inputs = DesignInputs::load(&conn)
            .map_err(internal_err)?
            .with_drafts(input.drafts);
        let current = match input.current {
            Some(text) => text,
            None => pages::load_note(&conn, kind.target_key()).map_err(internal_err)?,
        };
        let config = match ProviderConfig::from_stored(db::load_settings(&conn).map_err(internal_err)?) {
            Ok(config) => Some(config),
            Err(ChatError::ConfigMissing) => None,
            Err(e) => return Err(chat_err(e)),
        };
        (inputs, current, config)
    };

    let suggestion = assist::generate(
        state.backend.as_ref(),
        config.as_ref(),
        kind,
        &inputs,
        &current,
    )
    .await
    .map_err(chat_err)?;

    if input.save {
        let conn = state.conn().map_err(internal_err)?;
        pages::save_note(&conn, suggestion.target_key, &suggestion.merged).map_err(internal_err)?;
    }
    Ok(Json(suggestion))
}

fn find_page(slug: &str) -> Result<&'static Page, ApiError> {
    pages::find_page(slug).ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown page: {}", slug)))
}

fn chat_err(e: ChatError) -> ApiError {
    let status = match &e {
        e if e.is_precondition() => StatusCode::BAD_REQUEST,
        ChatError::ProviderError { .. } | ChatError::MalformedResponse { .. } => {
            StatusCode::BAD_GATEWAY
        }
        ChatError::Transport(_) => StatusCode::BAD_GATEWAY,
        ChatError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ChatError::Cancelled => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

fn internal_err<E: std::fmt::Display>(e: E) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
