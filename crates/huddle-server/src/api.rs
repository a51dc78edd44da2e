use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use huddle_store::{DmRequest, FileRecord, Message, Poll, PollResults};

use crate::chat::{Chat, ProfileEdit};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::uploads::UploadStore;

type ApiResult<T> = Result<T, ServerError>;

#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<Mutex<Chat>>,
    pub uploads: Arc<UploadStore>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    // Multipart framing needs a little room above the file limit.
    let body_limit = state.uploads.max_size().saturating_add(64 * 1024);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/info", get(server_info))
        // Sessions and presence
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/heartbeat", post(heartbeat))
        .route("/api/users", get(active_users))
        .route("/api/users/:id", patch(update_profile))
        .route("/api/users/:id/status", patch(update_status))
        // Room
        .route("/api/messages", get(list_messages).post(send_message))
        .route("/api/messages/:id", patch(edit_message).delete(delete_message))
        .route("/api/messages/:id/lock", post(lock_message))
        .route("/api/messages/:id/unlock", post(unlock_message))
        .route("/api/reactions", post(add_reaction).delete(remove_reaction))
        // DM handshake
        .route("/api/dm/request", post(request_dm))
        .route("/api/dm/request/:id", patch(respond_dm))
        .route("/api/dm/requests/:user_id", get(dm_requests))
        .route("/api/dm/partners/:user_id", get(dm_partners))
        // DM conversation
        .route("/api/dm/thread/:user_id/:other_id", get(dm_thread))
        .route("/api/dm/pinned/:user_id/:other_id", get(dm_pinned))
        .route("/api/dm/messages", post(send_dm))
        .route("/api/dm/messages/:id", patch(edit_dm).delete(delete_dm))
        .route("/api/dm/messages/:id/lock", post(lock_dm))
        .route("/api/dm/messages/:id/unlock", post(unlock_dm))
        .route("/api/dm/messages/:id/pin", post(pin_dm))
        .route("/api/dm/messages/:id/unpin", post(unpin_dm))
        .route("/api/dm/read", post(mark_dms_read))
        .route("/api/dm/unread/:user_id/:from_id", get(unread_dms))
        // Polls
        .route("/api/polls", post(create_poll))
        .route("/api/polls/:id", get(poll_for_message))
        .route("/api/polls/:id/vote", post(vote))
        // Files
        .route("/api/files", post(upload_file))
        .route("/api/files/:id", get(download_file))
        // Admin
        .route("/api/admin/users", get(admin_users))
        .route("/api/admin/users/:id", delete(admin_delete_user))
        .route("/api/admin/messages", get(admin_messages))
        .route("/api/admin/messages/:id", delete(admin_delete_message))
        .route("/api/admin/clear-messages", post(admin_clear_messages))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Request / response bodies ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    active_window_secs: u64,
    heartbeat_interval_secs: u64,
    max_upload_size: usize,
    file_ttl_secs: u64,
}

/// Acting user passed as `?userId=` on deletes and unlocks.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ActorQuery {
    user_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    color: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserIdRequest {
    user_id: Uuid,
}

#[derive(Deserialize)]
struct StatusRequest {
    status: String,
}

#[derive(Deserialize)]
struct ProfileRequest {
    username: Option<String>,
    color: Option<String>,
    bio: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    user_id: Uuid,
    #[serde(default)]
    content: String,
    image_url: Option<String>,
    reply_to_id: Option<Uuid>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditRequest {
    content: String,
    user_id: Option<Uuid>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactionRequest {
    message_id: Uuid,
    user_id: Uuid,
    emoji: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairRequest {
    from_user_id: Uuid,
    to_user_id: Uuid,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RespondRequest {
    status: String,
    user_id: Option<Uuid>,
}

#[derive(Serialize)]
struct DmRequestResponse {
    #[serde(flatten)]
    request: DmRequest,
    created: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendDmRequest {
    from_user_id: Uuid,
    to_user_id: Uuid,
    content: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePollRequest {
    /// Attach to this message; otherwise a marker message is posted as `user_id`.
    message_id: Option<Uuid>,
    user_id: Option<Uuid>,
    question: String,
    options: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteRequest {
    option_index: usize,
    user_id: Uuid,
}

#[derive(Serialize)]
struct PollView {
    #[serde(flatten)]
    poll: Poll,
    results: PollResults,
}

impl From<Poll> for PollView {
    fn from(poll: Poll) -> Self {
        let results = poll.results();
        Self { poll, results }
    }
}

#[derive(Serialize)]
struct CreatePollResponse {
    message: Option<Message>,
    poll: PollView,
}

#[derive(Serialize)]
struct FileResponse {
    #[serde(flatten)]
    record: FileRecord,
    url: String,
}

// ─── Health ───

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        active_window_secs: state.config.active_window.as_secs(),
        heartbeat_interval_secs: state.config.heartbeat_interval.as_secs(),
        max_upload_size: state.config.max_upload_size,
        file_ttl_secs: state.config.file_ttl.as_secs(),
    })
}

// ─── Sessions and presence ───

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut chat = state.chat.lock().await;
    let user = chat.login(&req.username, req.color.as_deref(), Utc::now())?;
    Ok(Json(user))
}

async fn logout(
    State(state): State<AppState>,
    Json(req): Json<UserIdRequest>,
) -> ApiResult<impl IntoResponse> {
    state.chat.lock().await.logout(req.user_id)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn heartbeat(
    State(state): State<AppState>,
    Json(req): Json<UserIdRequest>,
) -> ApiResult<impl IntoResponse> {
    state.chat.lock().await.heartbeat(req.user_id, Utc::now())?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn active_users(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let users = state.chat.lock().await.active_users(Utc::now())?;
    Ok(Json(users))
}

async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = state.chat.lock().await.set_status(id, &req.status)?;
    Ok(Json(user))
}

async fn update_profile(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ProfileRequest>,
) -> ApiResult<impl IntoResponse> {
    let edit = ProfileEdit {
        username: req.username.as_deref(),
        color: req.color.as_deref(),
        bio: req.bio.as_deref(),
    };
    let user = state.chat.lock().await.update_profile(id, edit)?;
    Ok(Json(user))
}

// ─── Room ───

async fn list_messages(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let views = state.chat.lock().await.messages()?;
    Ok(Json(views))
}

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state.chat.lock().await.send_message(
        req.user_id,
        &req.content,
        req.image_url,
        req.reply_to_id,
    )?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn edit_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<EditRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state
        .chat
        .lock()
        .await
        .edit_message(id, req.user_id, &req.content)?;
    Ok(Json(message))
}

async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
) -> ApiResult<impl IntoResponse> {
    state.chat.lock().await.delete_message(id, actor.user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn lock_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UserIdRequest>,
) -> ApiResult<impl IntoResponse> {
    let message = state.chat.lock().await.lock_message(id, req.user_id)?;
    Ok(Json(message))
}

async fn unlock_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
) -> ApiResult<impl IntoResponse> {
    let message = state.chat.lock().await.unlock_message(id, actor.user_id)?;
    Ok(Json(message))
}

async fn add_reaction(
    State(state): State<AppState>,
    Json(req): Json<ReactionRequest>,
) -> ApiResult<impl IntoResponse> {
    let reaction = state
        .chat
        .lock()
        .await
        .add_reaction(req.message_id, req.user_id, &req.emoji)?;
    Ok(Json(reaction))
}

async fn remove_reaction(
    State(state): State<AppState>,
    Json(req): Json<ReactionRequest>,
) -> ApiResult<impl IntoResponse> {
    let removed = state
        .chat
        .lock()
        .await
        .remove_reaction(req.message_id, req.user_id, &req.emoji)?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

// ─── DM handshake ───

async fn request_dm(
    State(state): State<AppState>,
    Json(req): Json<PairRequest>,
) -> ApiResult<impl IntoResponse> {
    let (request, created) = state
        .chat
        .lock()
        .await
        .request_dm(req.from_user_id, req.to_user_id)?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(DmRequestResponse { request, created })))
}

async fn respond_dm(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RespondRequest>,
) -> ApiResult<impl IntoResponse> {
    let request = state
        .chat
        .lock()
        .await
        .respond_dm(id, &req.status, req.user_id)?;
    Ok(Json(request))
}

async fn dm_requests(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let requests = state.chat.lock().await.dm_requests(user_id)?;
    Ok(Json(requests))
}

async fn dm_partners(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let partners = state.chat.lock().await.dm_partners(user_id)?;
    Ok(Json(partners))
}

// ─── DM conversation ───

async fn dm_thread(
    State(state): State<AppState>,
    Path((user_id, other_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    let thread = state.chat.lock().await.dm_thread(user_id, other_id)?;
    Ok(Json(thread))
}

async fn dm_pinned(
    State(state): State<AppState>,
    Path((user_id, other_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    let pinned = state.chat.lock().await.pinned_dms(user_id, other_id)?;
    Ok(Json(pinned))
}

async fn send_dm(
    State(state): State<AppState>,
    Json(req): Json<SendDmRequest>,
) -> ApiResult<impl IntoResponse> {
    let dm = state
        .chat
        .lock()
        .await
        .send_dm(req.from_user_id, req.to_user_id, &req.content)?;
    Ok((StatusCode::CREATED, Json(dm)))
}

async fn edit_dm(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<EditRequest>,
) -> ApiResult<impl IntoResponse> {
    let dm = state.chat.lock().await.edit_dm(id, req.user_id, &req.content)?;
    Ok(Json(dm))
}

async fn delete_dm(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
) -> ApiResult<impl IntoResponse> {
    state.chat.lock().await.delete_dm(id, actor.user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn lock_dm(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UserIdRequest>,
) -> ApiResult<impl IntoResponse> {
    let dm = state.chat.lock().await.lock_dm(id, req.user_id)?;
    Ok(Json(dm))
}

async fn unlock_dm(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
) -> ApiResult<impl IntoResponse> {
    let dm = state.chat.lock().await.unlock_dm(id, actor.user_id)?;
    Ok(Json(dm))
}

async fn pin_dm(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
) -> ApiResult<impl IntoResponse> {
    let dm = state.chat.lock().await.pin_dm(id, actor.user_id, true)?;
    Ok(Json(dm))
}

async fn unpin_dm(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(actor): Query<ActorQuery>,
) -> ApiResult<impl IntoResponse> {
    let dm = state.chat.lock().await.pin_dm(id, actor.user_id, false)?;
    Ok(Json(dm))
}

async fn mark_dms_read(
    State(state): State<AppState>,
    Json(req): Json<PairRequest>,
) -> ApiResult<impl IntoResponse> {
    let count = state
        .chat
        .lock()
        .await
        .mark_dms_read(req.from_user_id, req.to_user_id)?;
    Ok(Json(serde_json::json!({ "count": count })))
}

async fn unread_dms(
    State(state): State<AppState>,
    Path((user_id, from_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<impl IntoResponse> {
    let count = state.chat.lock().await.unread_dm_count(user_id, from_id)?;
    Ok(Json(serde_json::json!({ "count": count })))
}

// ─── Polls ───

async fn create_poll(
    State(state): State<AppState>,
    Json(req): Json<CreatePollRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut chat = state.chat.lock().await;
    let (message, poll) = match (req.message_id, req.user_id) {
        (Some(message_id), _) => (None, chat.create_poll(message_id, &req.question, &req.options)?),
        (None, Some(user_id)) => {
            let (message, poll) = chat.start_poll(user_id, &req.question, &req.options)?;
            (Some(message), poll)
        }
        (None, None) => {
            return Err(ServerError::BadRequest(
                "Either messageId or userId is required".into(),
            ))
        }
    };
    Ok((
        StatusCode::CREATED,
        Json(CreatePollResponse {
            message,
            poll: poll.into(),
        }),
    ))
}

/// Looked up by the id of the message the poll is attached to.
async fn poll_for_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let poll = state.chat.lock().await.poll_for_message(message_id)?;
    Ok(Json(PollView::from(poll)))
}

async fn vote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<VoteRequest>,
) -> ApiResult<impl IntoResponse> {
    let poll = state
        .chat
        .lock()
        .await
        .vote(id, req.option_index, req.user_id)?;
    Ok(Json(PollView::from(poll)))
}

// ─── Files ───

async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut upload = None;
    let mut message_id = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let original_name = field.file_name().unwrap_or("upload").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
                upload = Some((original_name, mime_type, data));
            }
            "messageId" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
                if !text.trim().is_empty() {
                    let id = Uuid::parse_str(text.trim())
                        .map_err(|_| ServerError::BadRequest("Invalid messageId".into()))?;
                    message_id = Some(id);
                }
            }
            _ => {}
        }
    }

    let Some((original_name, mime_type, data)) = upload else {
        return Err(ServerError::BadRequest(
            "Missing 'file' field in multipart form".to_string(),
        ));
    };

    let ttl = chrono::Duration::from_std(state.config.file_ttl)
        .map_err(|e| ServerError::Internal(format!("Invalid file TTL: {e}")))?;
    let uploaded_at = Utc::now();
    let expires_at = uploaded_at
        .checked_add_signed(ttl)
        .ok_or_else(|| ServerError::Internal("File TTL out of range".into()))?;
    let filename = state.uploads.store(&data).await?;
    let record = FileRecord {
        id: Uuid::new_v4(),
        message_id,
        filename,
        original_name,
        size: data.len() as i64,
        mime_type,
        uploaded_at,
        expires_at,
    };

    let recorded = state.chat.lock().await.record_file(&record);
    if let Err(e) = recorded {
        state.uploads.remove(&record.filename).await?;
        return Err(e);
    }

    info!(file_id = %record.id, size = record.size, "File uploaded");
    let url = format!("/api/files/{}", record.id);
    Ok((StatusCode::CREATED, Json(FileResponse { record, url })))
}

async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let record = state.chat.lock().await.live_file(id, Utc::now())?;
    let data = state.uploads.read(&record.filename).await?;

    let disposition = format!(
        "inline; filename=\"{}\"",
        header_safe_filename(&record.original_name)
    );
    Ok((
        [
            (header::CONTENT_TYPE, record.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    ))
}

/// Printable ASCII only, without quotes, so the name fits in a header.
fn header_safe_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|c| (c.is_ascii_graphic() || *c == ' ') && *c != '"' && *c != '\\')
        .collect();
    if cleaned.trim().is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

// ─── Admin ───

fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

async fn admin_users(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    verify_admin_token(&headers, &state.config)?;
    let users = state.chat.lock().await.all_users()?;
    Ok(Json(users))
}

async fn admin_delete_user(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    verify_admin_token(&headers, &state.config)?;
    let deleted = state.chat.lock().await.admin_delete_user(id)?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

async fn admin_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    verify_admin_token(&headers, &state.config)?;
    let messages = state.chat.lock().await.all_messages()?;
    Ok(Json(messages))
}

async fn admin_delete_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    verify_admin_token(&headers, &state.config)?;
    let deleted = state.chat.lock().await.admin_delete_message(id)?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

async fn admin_clear_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> ApiResult<impl IntoResponse> {
    verify_admin_token(&headers, &state.config)?;
    let removed = state.chat.lock().await.clear_messages()?;
    info!(removed, "Admin cleared the room");
    Ok(Json(serde_json::json!({ "removed": removed })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use huddle_store::Database;

    use super::*;

    async fn test_app(admin_token: Option<&str>) -> (Router, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            upload_dir: dir.path().to_path_buf(),
            admin_token: admin_token.map(str::to_string),
            ..ServerConfig::default()
        };
        let uploads = UploadStore::new(config.upload_dir.clone(), config.max_upload_size)
            .await
            .unwrap();
        let chat = Chat::new(Database::open_in_memory().unwrap(), chrono::Duration::seconds(60));
        let state = AppState {
            chat: Arc::new(Mutex::new(chat)),
            uploads: Arc::new(uploads),
            config: Arc::new(config),
        };
        (build_router(state), dir)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn login(app: &Router, name: &str) -> String {
        let (status, user) = call(app, "POST", "/api/login", Some(json!({ "username": name }))).await;
        assert_eq!(status, StatusCode::OK);
        user["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_and_info() {
        let (app, _dir) = test_app(None).await;
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (_, info) = call(&app, "GET", "/api/info", None).await;
        assert_eq!(info["activeWindowSecs"], 60);
        assert_eq!(info["heartbeatIntervalSecs"], 15);
    }

    #[tokio::test]
    async fn test_huge_upload_limit_builds() {
        let dir = TempDir::new().unwrap();
        let uploads = UploadStore::new(dir.path().to_path_buf(), usize::MAX)
            .await
            .unwrap();
        let chat = Chat::new(Database::open_in_memory().unwrap(), chrono::Duration::seconds(60));
        let app = build_router(AppState {
            chat: Arc::new(Mutex::new(chat)),
            uploads: Arc::new(uploads),
            config: Arc::new(ServerConfig::default()),
        });

        let (status, _) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_logged_out_user_cannot_post() {
        let (app, _dir) = test_app(None).await;
        let alice = login(&app, "alice").await;
        call(&app, "POST", "/api/logout", Some(json!({ "userId": alice }))).await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/messages",
            Some(json!({ "userId": alice, "content": "anyone?" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_login_presence_and_conflict() {
        let (app, _dir) = test_app(None).await;
        let alice = login(&app, "alice").await;

        let (status, _) = call(&app, "POST", "/api/login", Some(json!({ "username": "alice" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, users) = call(&app, "GET", "/api/users", None).await;
        assert_eq!(users.as_array().unwrap().len(), 1);
        assert_eq!(users[0]["status"], "online");

        let (status, _) = call(&app, "POST", "/api/logout", Some(json!({ "userId": alice }))).await;
        assert_eq!(status, StatusCode::OK);
        let (_, users) = call(&app, "GET", "/api/users", None).await;
        assert!(users.as_array().unwrap().is_empty());

        let (status, user) = call(
            &app,
            "PATCH",
            &format!("/api/users/{alice}/status"),
            Some(json!({ "status": "away" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user["status"], "away");
    }

    #[tokio::test]
    async fn test_lock_edit_unlock_flow() {
        let (app, _dir) = test_app(None).await;
        let alice = login(&app, "alice").await;
        let bob = login(&app, "bob").await;

        let (status, message) = call(
            &app,
            "POST",
            "/api/messages",
            Some(json!({ "userId": alice, "content": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = message["id"].as_str().unwrap().to_string();

        let (status, locked) = call(
            &app,
            "POST",
            &format!("/api/messages/{id}/lock"),
            Some(json!({ "userId": bob })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(locked["isLocked"], true);

        let (status, body) = call(
            &app,
            "PATCH",
            &format!("/api/messages/{id}"),
            Some(json!({ "content": "changed", "userId": alice })),
        )
        .await;
        assert_eq!(status, StatusCode::LOCKED);
        assert!(body["error"].is_string());

        let (status, _) = call(&app, "DELETE", &format!("/api/messages/{id}?userId={alice}"), None).await;
        assert_eq!(status, StatusCode::LOCKED);

        let (status, _) = call(&app, "POST", &format!("/api/messages/{id}/unlock?userId={alice}"), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, "POST", &format!("/api/messages/{id}/unlock?userId={bob}"), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, edited) = call(
            &app,
            "PATCH",
            &format!("/api/messages/{id}"),
            Some(json!({ "content": "changed", "userId": alice })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(edited["isEdited"], true);

        let (status, _) = call(
            &app,
            "POST",
            "/api/reactions",
            Some(json!({ "messageId": id, "userId": bob, "emoji": "👍" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, views) = call(&app, "GET", "/api/messages", None).await;
        assert_eq!(views[0]["content"], "changed");
        assert_eq!(views[0]["user"]["username"], "alice");
        assert_eq!(views[0]["reactions"][0]["emoji"], "👍");

        let (status, _) = call(&app, "DELETE", &format!("/api/messages/{id}?userId={alice}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&app, "DELETE", &format!("/api/messages/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dm_flow() {
        let (app, _dir) = test_app(None).await;
        let alice = login(&app, "alice").await;
        let bob = login(&app, "bob").await;

        let pair = json!({ "fromUserId": alice, "toUserId": bob });
        let (status, request) = call(&app, "POST", "/api/dm/request", Some(pair.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(request["status"], "pending");
        let request_id = request["id"].as_str().unwrap().to_string();

        let reverse = json!({ "fromUserId": bob, "toUserId": alice });
        let (status, again) = call(&app, "POST", "/api/dm/request", Some(reverse)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["created"], false);
        assert_eq!(again["id"], request["id"]);

        let dm = json!({ "fromUserId": alice, "toUserId": bob, "content": "hi" });
        let (status, _) = call(&app, "POST", "/api/dm/messages", Some(dm.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, accepted) = call(
            &app,
            "PATCH",
            &format!("/api/dm/request/{request_id}"),
            Some(json!({ "status": "accepted", "userId": bob })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(accepted["status"], "accepted");

        let (status, _) = call(
            &app,
            "PATCH",
            &format!("/api/dm/request/{request_id}"),
            Some(json!({ "status": "rejected", "userId": bob })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, partners) = call(&app, "GET", &format!("/api/dm/partners/{alice}"), None).await;
        assert_eq!(partners[0]["id"], bob.as_str());

        let (status, _) = call(&app, "POST", "/api/dm/messages", Some(dm)).await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, unread) = call(&app, "GET", &format!("/api/dm/unread/{bob}/{alice}"), None).await;
        assert_eq!(unread["count"], 1);
        let (_, read) = call(&app, "POST", "/api/dm/read", Some(pair)).await;
        assert_eq!(read["count"], 1);

        let (_, thread) = call(&app, "GET", &format!("/api/dm/thread/{bob}/{alice}"), None).await;
        assert_eq!(thread[0]["content"], "hi");
        assert_eq!(thread[0]["isRead"], true);
    }

    #[tokio::test]
    async fn test_poll_flow() {
        let (app, _dir) = test_app(None).await;
        let alice = login(&app, "alice").await;
        let bob = login(&app, "bob").await;
        let carol = login(&app, "carol").await;

        let (status, created) = call(
            &app,
            "POST",
            "/api/polls",
            Some(json!({ "userId": alice, "question": "Lunch?", "options": ["Pizza", "Sushi"] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let poll_id = created["poll"]["id"].as_str().unwrap().to_string();
        let message_id = created["message"]["id"].as_str().unwrap().to_string();

        for (user, option) in [(&alice, 0), (&bob, 1), (&carol, 0)] {
            let (status, _) = call(
                &app,
                "POST",
                &format!("/api/polls/{poll_id}/vote"),
                Some(json!({ "optionIndex": option, "userId": user })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, poll) = call(&app, "GET", &format!("/api/polls/{message_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(poll["results"]["counts"], json!([2, 1]));
        assert_eq!(poll["results"]["percentages"], json!([67, 33]));

        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/polls/{poll_id}/vote"),
            Some(json!({ "optionIndex": 5, "userId": bob })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_file_upload_and_download() {
        let (app, _dir) = test_app(None).await;
        let boundary = "huddle-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             hello world\r\n\
             --{boundary}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/files")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let record: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(record["originalName"], "notes.txt");
        assert_eq!(record["size"], 11);

        let url = record["url"].as_str().unwrap();
        let response = app
            .clone()
            .oneshot(Request::builder().uri(url).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello world");

        let (status, _) = call(&app, "GET", &format!("/api/files/{}", Uuid::new_v4()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_requires_token() {
        let (disabled, _dir) = test_app(None).await;
        let (status, _) = call(&disabled, "GET", "/api/admin/users", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (app, _dir) = test_app(Some("secret")).await;
        login(&app, "alice").await;

        let request = |token: &str| {
            Request::builder()
                .uri("/api/admin/users")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(request("wrong")).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app.clone().oneshot(request("secret")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let users: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(users.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_header_safe_filename() {
        assert_eq!(header_safe_filename("notes.txt"), "notes.txt");
        assert_eq!(header_safe_filename("a\"b\\c.png"), "abc.png");
        assert_eq!(header_safe_filename("résumé"), "rsum");
        assert_eq!(header_safe_filename("\u{1F600}"), "file");
    }
}
