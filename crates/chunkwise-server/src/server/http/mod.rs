//! HTTP surface of the upload service.
//!
//! - `POST /uploads/chunks` - multipart chunk submission.
//! - `GET /uploads/orphans` - artifacts whose entity save failed.
//! - `GET /healthz` - liveness plus session counts.
//!
//! Every chunk response, success or failure, is a JSON [`ChunkResponse`].


use crate::server::coordinator::{FirstChunk, SubmitChunk, UploadCoordinator};
use crate::server::orphans::{OrphanLedger, OrphanRecord};
use crate::server::registry::SessionCounts;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chunkwise_core::wire::{self, CHUNK_ENDPOINT};
use chunkwise_core::{
    ChunkResponse, CoverImage, EntityId, EntityTarget, Error, MediaMetadata, SessionToken,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub const ORPHANS_ENDPOINT: &str = "/uploads/orphans";
pub const HEALTH_ENDPOINT: &str = "/healthz";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<UploadCoordinator>,
    pub orphans: Arc<OrphanLedger>,
}

pub fn router(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route(CHUNK_ENDPOINT, post(submit_chunk))
        .route(ORPHANS_ENDPOINT, get(list_orphans))
        .route(HEALTH_ENDPOINT, get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// HTTP status for each error kind.
pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::InvalidRequest { .. } | Error::InvalidChunkIndex { .. } => StatusCode::BAD_REQUEST,
        Error::UnknownOrExpiredSession => StatusCode::NOT_FOUND,
        Error::SessionConflict { .. } => StatusCode::CONFLICT,
        Error::StorageWriteFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Error::AssemblyFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        Error::EntityPersistFailed { .. } => StatusCode::BAD_GATEWAY,
    }
}

/// A rejected chunk submission, rendered as a failure [`ChunkResponse`].
///
/// The counts reflect the session as it stands after the rejection, and
/// stay zero when no live session is known.
#[derive(Debug)]
pub struct ApiError {
    pub error: Error,
    pub session_token: Option<SessionToken>,
    pub received_count: u32,
    pub total_chunks: u32,
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self {
            error,
            session_token: None,
            received_count: 0,
            total_chunks: 0,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ChunkResponse::rejected(
            &self.error,
            self.session_token,
            self.received_count,
            self.total_chunks,
        );
        (status_for(&self.error), Json(body)).into_response()
    }
}

async fn submit_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ChunkResponse>, ApiError> {
    let form = ChunkForm::read(&mut multipart).await?;
    let req = form.into_submission()?;
    let session_token = req.session_token;

    match state.coordinator.submit_chunk(req).await {
        Ok(ack) => Ok(Json(ack.into())),
        Err(error) => {
            let mut api_error = ApiError::from(error);
            api_error.session_token = session_token;
            if let Some(handle) = session_token.and_then(|t| state.coordinator.registry().get(&t)) {
                let session = handle.state();
                api_error.received_count = session.received_count();
                api_error.total_chunks = session.total_chunks;
            }
            Err(api_error)
        }
    }
}

async fn list_orphans(State(state): State<AppState>) -> Json<Vec<OrphanRecord>> {
    Json(state.orphans.list())
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    sessions: SessionCounts,
    orphans: usize,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        sessions: state.coordinator.registry().counts(),
        orphans: state.orphans.len(),
    })
}

/// Raw multipart fields of one chunk submission.
#[derive(Debug, Default)]
struct ChunkForm {
    chunk: Option<Bytes>,
    chunk_file_name: Option<String>,
    chunk_index: Option<String>,
    total_chunks: Option<String>,
    filename: Option<String>,
    session_token: Option<String>,
    entity_id: Option<String>,
    title: Option<String>,
    category: Option<String>,
    date: Option<String>,
    content: Option<String>,
    active: Option<String>,
    cover_image: Option<CoverImage>,
}

impl ChunkForm {
    async fn read(multipart: &mut Multipart) -> Result<Self, Error> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(malformed)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match name.as_str() {
                wire::FIELD_CHUNK => {
                    form.chunk_file_name = field.file_name().map(str::to_string);
                    form.chunk = Some(field.bytes().await.map_err(malformed)?);
                }
                wire::FIELD_COVER_IMAGE => {
                    let filename = field.file_name().unwrap_or("cover").to_string();
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await.map_err(malformed)?;
                    // Browsers send an empty part for an unset file input.
                    if !bytes.is_empty() {
                        form.cover_image = Some(CoverImage {
                            filename,
                            content_type,
                            bytes,
                        });
                    }
                }
                other => {
                    let slot = match other {
                        wire::FIELD_CHUNK_INDEX => &mut form.chunk_index,
                        wire::FIELD_TOTAL_CHUNKS => &mut form.total_chunks,
                        wire::FIELD_FILENAME => &mut form.filename,
                        wire::FIELD_SESSION_TOKEN => &mut form.session_token,
                        wire::FIELD_ENTITY_ID => &mut form.entity_id,
                        wire::FIELD_TITLE => &mut form.title,
                        wire::FIELD_CATEGORY => &mut form.category,
                        wire::FIELD_DATE => &mut form.date,
                        wire::FIELD_CONTENT => &mut form.content,
                        wire::FIELD_ACTIVE => &mut form.active,
                        _ => {
                            tracing::debug!(field = other, "ignoring unknown form field");
                            continue;
                        }
                    };
                    *slot = non_empty(field.text().await.map_err(malformed)?);
                }
            }
        }
        Ok(form)
    }

    fn into_submission(self) -> Result<SubmitChunk, Error> {
        let bytes = self
            .chunk
            .ok_or_else(|| Error::invalid_request("missing `chunk` field"))?;
        let chunk_index = parse_number(wire::FIELD_CHUNK_INDEX, self.chunk_index)?;
        let total_chunks = parse_number(wire::FIELD_TOTAL_CHUNKS, self.total_chunks)?;
        let session_token = self
            .session_token
            .as_deref()
            .map(SessionToken::parse)
            .transpose()?;

        let first_chunk = match (chunk_index, self.title) {
            (0, Some(title)) => {
                let active = match self.active.as_deref() {
                    None => true,
                    Some(raw) => wire::parse_active_flag(raw).ok_or_else(|| {
                        Error::invalid_request(format!("`active` must be a boolean, got `{raw}`"))
                    })?,
                };
                Some(FirstChunk {
                    target: self
                        .entity_id
                        .map_or(EntityTarget::Create, |id| EntityTarget::Update(EntityId::new(id))),
                    metadata: MediaMetadata {
                        title,
                        category: self.category,
                        date: self.date,
                        content: self.content,
                        active,
                    },
                    cover_image: self.cover_image,
                })
            }
            _ => None,
        };

        Ok(SubmitChunk {
            session_token,
            chunk_index,
            total_chunks,
            filename: self.filename.or(self.chunk_file_name).unwrap_or_default(),
            bytes,
            first_chunk,
        })
    }
}

fn malformed(err: axum::extract::multipart::MultipartError) -> Error {
    Error::invalid_request(format!("malformed multipart body: {}", err.body_text()))
}

fn non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_number(field: &str, raw: Option<String>) -> Result<i64, Error> {
    let raw = raw.ok_or_else(|| Error::invalid_request(format!("missing `{field}` field")))?;
    raw.parse()
        .map_err(|_| Error::invalid_request(format!("`{field}` must be an integer, got `{raw}`")))
}
