use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use murmur_shared::{constants, Handle, MessageEvent, UserId};
use murmur_store::{database::now, Database, Message, User};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::auth::{self, AuthError, AuthUser, IdentityGate, IssuedToken};
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::fanout::FanOut;
use crate::ingest::{AttachmentUpload, Ingestor, Submission};
use crate::presence::PresenceCache;
use crate::registry::ConnectionRegistry;
use crate::store::MessageStore;
use crate::ws;

/// Multipart overhead allowed on top of the attachment itself.
const MULTIPART_SLACK: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub identity: Arc<IdentityGate>,
    pub store: MessageStore,
    pub blobs: Arc<BlobStore>,
    pub presence: PresenceCache,
    pub registry: ConnectionRegistry,
    pub ingest: Ingestor,
}

impl AppState {
    /// Wire every subsystem together. Fails if the attachment directory
    /// cannot be created.
    pub async fn new(
        config: ServerConfig,
        db: Database,
        identity: IdentityGate,
    ) -> Result<Self, ServerError> {
        let blobs = Arc::new(
            BlobStore::new(
                config.attachment_dir.clone(),
                config.max_attachment_size,
                config.store_timeout,
            )
            .await?,
        );
        let store = MessageStore::new(db, config.store_timeout);
        let presence = PresenceCache::new(config.presence_ttl);
        let registry = ConnectionRegistry::new();
        let ingest = Ingestor::new(
            store.clone(),
            blobs.clone(),
            FanOut::new(registry.clone()),
        );

        Ok(Self {
            config: Arc::new(config),
            identity: Arc::new(identity),
            store,
            blobs,
            presence,
            registry,
            ingest,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let body_limit = state.config.max_attachment_size + MULTIPART_SLACK;

    Router::new()
        .route("/health", get(health_check))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/messages", post(post_message).get(get_messages))
        .route("/messages/attachment", post(post_attachment))
        .route("/messages/{email}", get(get_conversation))
        .route("/chats", get(get_chats))
        .route("/ws", get(ws::ws_upgrade))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    connections: usize,
}

#[derive(Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct RegisterResponse {
    id: UserId,
    email: Handle,
    created_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct PostMessageRequest {
    #[serde(default)]
    content: String,
    #[serde(default)]
    recipient: Option<String>,
}

#[derive(Serialize)]
struct MessageCreated {
    message_id: Uuid,
}

/// One history entry: the wire event plus its id.
#[derive(Serialize)]
struct HistoryEntry {
    id: Uuid,
    #[serde(flatten)]
    event: MessageEvent,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            event: message.to_event(),
        }
    }
}

#[derive(Serialize)]
struct OtherUser {
    id: UserId,
    email: Handle,
    is_online: bool,
}

#[derive(Serialize)]
struct ConversationResponse {
    messages: Vec<HistoryEntry>,
    other_user: OtherUser,
}

#[derive(Serialize)]
struct ChatEntry {
    user_id: UserId,
    email: String,
    last_message: String,
    last_timestamp: DateTime<Utc>,
    is_online: bool,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        connections: state.registry.len().await,
    })
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> Result<(StatusCode, Json<RegisterResponse>), ServerError> {
    let email = Handle::parse(&req.email)
        .filter(Handle::looks_like_email)
        .ok_or_else(|| ServerError::BadRequest("a valid email is required".into()))?;

    if req.password.chars().count() < constants::MIN_PASSWORD_LEN {
        return Err(ServerError::BadRequest(format!(
            "password must be at least {} characters",
            constants::MIN_PASSWORD_LEN
        )));
    }

    let password_hash = auth::hash_password(req.password).await?;
    let ts = now();
    let user = User {
        id: UserId::generate(),
        email,
        password_hash,
        created_at: ts,
        updated_at: ts,
    };
    let response = RegisterResponse {
        id: user.id.clone(),
        email: user.email.clone(),
        created_at: user.created_at,
    };

    state.store.create_user(user).await.map_err(|e| {
        if e.is_conflict() {
            ServerError::BadRequest("email already registered".into())
        } else {
            e.into()
        }
    })?;

    info!(user = %response.id.short(), "Account registered");
    Ok((StatusCode::CREATED, Json(response)))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<Credentials>,
) -> Result<Json<IssuedToken>, ServerError> {
    let email = Handle::parse(&req.email).ok_or(AuthError::InvalidCredentials)?;
    let user = state
        .store
        .get_user_by_email(email)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    if !auth::verify_password(req.password, user.password_hash).await? {
        return Err(AuthError::InvalidCredentials.into());
    }

    let issued = state.identity.issue(&user.id)?;
    info!(user = %user.id.short(), "Token issued");
    Ok(Json(issued))
}

async fn post_message(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<MessageCreated>), ServerError> {
    let submission = Submission {
        content: req.content,
        recipient: req.recipient,
        attachment: None,
    };
    let accepted = state.ingest.submit(&user.user_id, submission).await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageCreated {
            message_id: accepted.message_id,
        }),
    ))
}

async fn get_messages(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Vec<HistoryEntry>>, ServerError> {
    let messages = state.store.list_general(constants::HISTORY_LIMIT).await?;
    Ok(Json(messages.iter().map(HistoryEntry::from).collect()))
}

async fn get_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Path(email): Path<String>,
) -> Result<Json<ConversationResponse>, ServerError> {
    let handle = Handle::parse(&email)
        .ok_or_else(|| ServerError::BadRequest("email is required".into()))?;
    let other_id = state
        .store
        .resolve_user_by_handle(handle.clone())
        .await?
        .ok_or_else(|| ServerError::BadRequest(format!("user not found: {handle}")))?;

    let is_online = state.presence.is_online(&other_id).await;
    let messages = state
        .store
        .list_conversation(user.user_id, other_id.clone(), constants::HISTORY_LIMIT)
        .await?;

    Ok(Json(ConversationResponse {
        messages: messages.iter().map(HistoryEntry::from).collect(),
        other_user: OtherUser {
            id: other_id,
            email: handle,
            is_online,
        },
    }))
}

async fn post_attachment(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<MessageCreated>), ServerError> {
    let mut content = String::new();
    let mut recipient = None;
    let mut upload: Option<AttachmentUpload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("attachment").to_string();
                let mime_type = field.content_type().unwrap_or("").to_string();
                let data: Bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read file: {e}")))?;

                if data.len() > state.blobs.max_size() {
                    return Err(ServerError::PayloadTooLarge {
                        size: data.len(),
                        max: state.blobs.max_size(),
                    });
                }
                upload = Some(AttachmentUpload {
                    file_name,
                    mime_type,
                    data,
                });
            }
            "content" => {
                content = field
                    .text()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read content: {e}")))?;
            }
            "recipient" => {
                recipient = Some(field.text().await.map_err(|e| {
                    ServerError::BadRequest(format!("Failed to read recipient: {e}"))
                })?);
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| ServerError::BadRequest("File is required".into()))?;
    let submission = Submission {
        content,
        recipient,
        attachment: Some(upload),
    };
    let accepted = state.ingest.submit(&user.user_id, submission).await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageCreated {
            message_id: accepted.message_id,
        }),
    ))
}

async fn get_chats(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<ChatEntry>>, ServerError> {
    let previews = state
        .store
        .list_chat_previews(user.user_id, constants::CHAT_LIST_LIMIT)
        .await?;

    let mut chats = Vec::with_capacity(previews.len());
    for preview in previews {
        let is_online = state.presence.is_online(&preview.counterpart_id).await;
        chats.push(ChatEntry {
            user_id: preview.counterpart_id,
            email: preview.counterpart_email,
            last_message: preview.last_message,
            last_timestamp: preview.last_timestamp,
            is_online,
        });
    }
    Ok(Json(chats))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
