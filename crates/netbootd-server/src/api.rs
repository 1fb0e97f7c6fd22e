//! HTTP API
//!
//! JSON endpoints under `/api` used by the operator client and by booting
//! hosts. Failures are returned as `{"message": ...}` with 400 or 404.

use crate::error::RegistryError;
use crate::registry::ProvisioningRequest;
use crate::AppState;
use axum::{
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path,
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use futures::TryStreamExt;
use netbootd_common::models::{
    AddHostRequest, AddResponse, DeleteResponse, HostAddressResponse, HostListResponse,
    HostRequest, MessageResponse,
};
use std::io;
use tokio_util::io::StreamReader;
use tracing::{info, warn};

/// Largest accepted package upload
pub const UPLOAD_BODY_LIMIT: usize = 256 << 20;

/// Multipart field carrying the uploaded package
pub const UPLOAD_FIELD: &str = "uploadFile";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Json(#[from] JsonRejection),

    #[error("{0}")]
    Multipart(#[from] MultipartError),

    #[error("missing form field: {0}")]
    MissingField(&'static str),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Registry(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        warn!(status = status.as_u16(), error = %message, "Request failed");
        (status, Json(MessageResponse::new(message))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/hosts/", get(list_hosts_handler))
        .route("/booted/{id}", get(host_booted_handler))
        .route("/booted/{id}/", get(host_booted_empty_address_handler))
        .route("/booted/{id}/{address}", get(host_booted_with_address_handler))
        .route("/address/{id}", get(host_address_handler))
        .route("/host/", put(add_host_handler).delete(delete_host_handler))
        .route(
            "/tarball/",
            post(upload_package_handler).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
}

async fn list_hosts_handler(State(state): State<AppState>) -> ApiResult<HostListResponse> {
    let resp = state.registry.list().await?;
    info!(status = 200, count = resp.addresses.len(), "Listed hosts");
    Ok(Json(resp))
}

async fn host_booted_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DeleteResponse> {
    host_booted(&state, &id, None).await
}

/// `/booted/<id>/`, sent by boot scripts whose address variable was unset
async fn host_booted_empty_address_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DeleteResponse> {
    host_booted(&state, &id, Some("")).await
}

async fn host_booted_with_address_handler(
    State(state): State<AppState>,
    Path((id, address)): Path<(String, String)>,
) -> ApiResult<DeleteResponse> {
    host_booted(&state, &id, Some(&address)).await
}

async fn host_booted(
    state: &AppState,
    id: &str,
    address: Option<&str>,
) -> ApiResult<DeleteResponse> {
    let resp = state.registry.boot_confirm(id, address).await?;
    info!(status = 200, mac = %id, address = ?address, "Host booted");
    Ok(Json(resp))
}

async fn host_address_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<HostAddressResponse> {
    let resp = state.registry.address_query(&id);
    info!(status = 200, mac = %resp.mac, ip = %resp.ip, "Host address query");
    Json(resp)
}

async fn add_host_handler(
    State(state): State<AppState>,
    payload: Result<Json<AddHostRequest>, JsonRejection>,
) -> ApiResult<AddResponse> {
    let Json(req) = payload?;
    let request = ProvisioningRequest::try_from(req).map_err(RegistryError::from)?;
    let resp = state.registry.add(request).await?;
    info!(status = 200, "{}", resp.message);
    Ok(Json(resp))
}

async fn delete_host_handler(
    State(state): State<AppState>,
    payload: Result<Json<HostRequest>, JsonRejection>,
) -> ApiResult<DeleteResponse> {
    let Json(req) = payload?;
    let resp = state.registry.delete(&req.address).await?;
    info!(status = 200, mac = %req.address, "{}", resp.message);
    Ok(Json(resp))
}

/// Stream the `uploadFile` part of a multipart form into the provisioning
/// directory under the part's filename
async fn upload_package_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<MessageResponse> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let reader = StreamReader::new(field.map_err(io::Error::other));
        tokio::pin!(reader);

        let resp = state.registry.upload_package(&filename, &mut reader).await?;
        info!(status = 200, filename = %filename, "{}", resp.message);
        return Ok(Json(resp));
    }

    Err(ApiError::MissingField(UPLOAD_FIELD))
}
