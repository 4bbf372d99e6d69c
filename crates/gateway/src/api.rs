//! JSON API over the session registry. Handlers stay thin: decode, route to
//! the registry, map the typed error onto a status code.

use std::{collections::BTreeMap, sync::Arc};

use {
    axum::{
        Json,
        extract::{Path, State},
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    serde::{Deserialize, Serialize},
    tracing::warn,
    wabridge_common::{ConnectionStatus, SectorId},
    wabridge_notify::{ContactEvent, MessageEvent},
    wabridge_whatsapp::{Delivery, Error, PairingOutcome, SendOptions},
};

use crate::state::GatewayState;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Bridge(Error),
    BadRequest(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self::Bridge(err)
    }
}

/// Status code for a bridge failure.
pub fn status_for(err: &Error) -> StatusCode {
    use wabridge_store::Error as Store;

    match err {
        Error::UnknownSector(_) | Error::NoSession(_) => StatusCode::NOT_FOUND,
        Error::UnsupportedTenantMode(_) | Error::NotConnected(_) => StatusCode::CONFLICT,
        Error::InvalidRecipient(_) => StatusCode::BAD_REQUEST,
        Error::ConnectFailed { .. } | Error::ReconnectTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::PairingTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::SendFailed(_) => StatusCode::BAD_GATEWAY,
        Error::Persistence(Store::ContactNotFound(_) | Store::SectorNotFound(_)) => {
            StatusCode::NOT_FOUND
        },
        Error::Persistence(Store::InvalidNumber(_)) => StatusCode::BAD_REQUEST,
        Error::Persistence(Store::Sqlx(_)) | Error::Blob(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Bridge(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    warn!(status = status.as_u16(), error = %err, "request failed");
                }
                (status, err.to_string())
            },
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

// ── Request / response bodies ────────────────────────────────────────────────

/// Agent attribution shared by every send request.
#[derive(Debug, Default, Deserialize)]
pub struct Author {
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub anonymous: bool,
}

impl From<Author> for SendOptions {
    fn from(author: Author) -> Self {
        Self {
            user_id: author.user_id,
            anonymous: author.anonymous,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub to: String,
    pub text: String,
    #[serde(flatten)]
    pub author: Author,
}

/// Image, audio and document uploads carry base64 bytes.
#[derive(Debug, Deserialize)]
pub struct MediaRequest {
    pub to: String,
    pub data: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(flatten)]
    pub author: Author,
}

impl MediaRequest {
    fn bytes(&self) -> Result<Vec<u8>, ApiError> {
        let data = self.data.trim();
        // Accept data URLs as well as bare base64.
        let data = match data.split_once(";base64,") {
            Some((_, encoded)) => encoded,
            None => data,
        };
        let bytes = BASE64
            .decode(data)
            .map_err(|e| ApiError::BadRequest(format!("invalid base64 data: {e}")))?;
        if bytes.is_empty() {
            return Err(ApiError::BadRequest("data is empty".into()));
        }
        Ok(bytes)
    }
}

#[derive(Debug, Deserialize)]
pub struct TypingRequest {
    pub to: String,
    #[serde(default)]
    pub duration_secs: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub whatsapp_message_id: String,
    pub message: Option<MessageEvent>,
}

impl From<Delivery> for DeliveryResponse {
    fn from(delivery: Delivery) -> Self {
        Self {
            message: delivery.message.as_ref().map(Into::into),
            whatsapp_message_id: delivery.whatsapp_message_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub sector_id: SectorId,
    pub status: ConnectionStatus,
    pub message: &'static str,
}

// ── Handlers ─────────────────────────────────────────────────────────────────

pub async fn status_handler(
    State(state): State<Arc<GatewayState>>,
    Path(sector_id): Path<SectorId>,
) -> ApiResult<StatusResponse> {
    let status = state.registry.status(sector_id).await?;
    Ok(Json(StatusResponse {
        sector_id,
        status,
        message: status.describe(),
    }))
}

pub async fn qrcode_handler(
    State(state): State<Arc<GatewayState>>,
    Path(sector_id): Path<SectorId>,
) -> ApiResult<PairingOutcome> {
    Ok(Json(state.registry.pairing_code(sector_id).await?))
}

pub async fn send_text_handler(
    State(state): State<Arc<GatewayState>>,
    Path(sector_id): Path<SectorId>,
    Json(req): Json<TextRequest>,
) -> ApiResult<DeliveryResponse> {
    if req.text.is_empty() {
        return Err(ApiError::BadRequest("text is required".into()));
    }
    let opts = SendOptions::from(req.author);
    let delivery = state
        .registry
        .send_text(sector_id, &req.to, &req.text, &opts)
        .await?;
    Ok(Json(delivery.into()))
}

pub async fn send_image_handler(
    State(state): State<Arc<GatewayState>>,
    Path(sector_id): Path<SectorId>,
    Json(req): Json<MediaRequest>,
) -> ApiResult<DeliveryResponse> {
    let data = req.bytes()?;
    let opts = SendOptions::from(req.author);
    let delivery = state
        .registry
        .send_image(sector_id, &req.to, &data, &req.caption, &opts)
        .await?;
    Ok(Json(delivery.into()))
}

pub async fn send_audio_handler(
    State(state): State<Arc<GatewayState>>,
    Path(sector_id): Path<SectorId>,
    Json(req): Json<MediaRequest>,
) -> ApiResult<DeliveryResponse> {
    let data = req.bytes()?;
    let opts = SendOptions::from(req.author);
    let delivery = state
        .registry
        .send_audio(sector_id, &req.to, &data, &opts)
        .await?;
    Ok(Json(delivery.into()))
}

pub async fn send_document_handler(
    State(state): State<Arc<GatewayState>>,
    Path(sector_id): Path<SectorId>,
    Json(req): Json<MediaRequest>,
) -> ApiResult<DeliveryResponse> {
    let data = req.bytes()?;
    let file_name = match req.file_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Err(ApiError::BadRequest("file_name is required".into())),
    };
    let opts = SendOptions::from(req.author);
    let delivery = state
        .registry
        .send_document(sector_id, &req.to, &data, &file_name, &opts)
        .await?;
    Ok(Json(delivery.into()))
}

/// Blocks for the typing duration, like the indicator itself.
pub async fn send_typing_handler(
    State(state): State<Arc<GatewayState>>,
    Path(sector_id): Path<SectorId>,
    Json(req): Json<TypingRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .registry
        .send_typing(sector_id, &req.to, req.duration_secs)
        .await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn mark_viewed_handler(
    State(state): State<Arc<GatewayState>>,
    Path((sector_id, number)): Path<(SectorId, String)>,
) -> ApiResult<ContactEvent> {
    let contact = state.registry.mark_viewed(sector_id, &number).await?;
    Ok(Json(ContactEvent::from(&contact)))
}

pub async fn viewed_status_handler(
    State(state): State<Arc<GatewayState>>,
    Path(sector_id): Path<SectorId>,
) -> ApiResult<BTreeMap<i64, bool>> {
    Ok(Json(state.registry.viewed_status(sector_id).await?))
}

pub async fn close_session_handler(
    State(state): State<Arc<GatewayState>>,
    Path(sector_id): Path<SectorId>,
) -> Result<StatusCode, ApiError> {
    state.registry.close(sector_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use {super::*, wabridge_whatsapp::TransportError};

    #[test]
    fn error_statuses() {
        assert_eq!(status_for(&Error::UnknownSector(1)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&Error::UnsupportedTenantMode(1)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&Error::SendFailed(TransportError::NotConnected)),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&Error::Persistence(wabridge_store::Error::ContactNotFound(
                "551199".into()
            ))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&Error::PairingTimeout(1)),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn media_bytes_accept_data_urls() {
        let req = MediaRequest {
            to: "5511999998888".into(),
            data: format!("data:image/png;base64,{}", BASE64.encode(b"png")),
            caption: String::new(),
            file_name: None,
            author: Author::default(),
        };
        assert_eq!(req.bytes().unwrap(), b"png");
    }

    #[test]
    fn media_bytes_reject_garbage() {
        let req = MediaRequest {
            to: "5511999998888".into(),
            data: "not base64!".into(),
            caption: String::new(),
            file_name: None,
            author: Author::default(),
        };
        assert!(matches!(req.bytes(), Err(ApiError::BadRequest(_))));
    }
}
