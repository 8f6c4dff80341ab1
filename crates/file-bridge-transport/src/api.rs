//! Client-facing HTTP routes.
//!
//! Every route except `/ping` needs the session token in
//! [`TOKEN_HEADER`] and maps to exactly one agent call.

use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use file_bridge_core::{
    BridgeError,
    frame::{encode_put_payload, parse_json_lossy, split_envelope},
};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Map, Value};

use crate::{
    AppState,
    error::ApiError,
    protocol::{MAX_FILENAME_LEN, PingResponse, StatusResponse, TOKEN_HEADER, command},
};

/// Multipart form field carrying the uploaded file.
const UPLOAD_FIELD: &str = "file";

/// Session token from the request headers, checked against the configured
/// required token.
fn session_token(headers: &HeaderMap, state: &AppState) -> Result<String, ApiError> {
    let token = headers
        .get(TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|token| !token.is_empty())
        .ok_or(BridgeError::SessionMissing)?;

    if !state.bridge.admits(token) {
        return Err(ApiError::Unauthorized);
    }
    Ok(token.to_string())
}

/// `GET /ping`
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse::current())
}

/// `GET /status`
pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StatusResponse>, ApiError> {
    let token = session_token(&headers, &state)?;
    Ok(Json(StatusResponse {
        agent_connected: state.correlator.registry().is_connected(&token),
    }))
}

/// `GET /list`
pub async fn list_files(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let token = session_token(&headers, &state)?;
    let reply = state.correlator.call(&token, command::LIST, None).await?;
    Ok(Json(parse_json_lossy(&reply)))
}

/// `POST /upload` with a multipart `file` field.
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let token = session_token(&headers, &state)?;

    let (filename, contents) = loop {
        let field = multipart
            .next_field()
            .await?
            .ok_or_else(|| ApiError::BadRequest("missing_file".into()))?;
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| ApiError::BadRequest("missing_filename".into()))?;
        break (filename, field.bytes().await?);
    };

    if contents.len() > state.max_upload_bytes {
        return Err(BridgeError::PayloadTooLarge {
            size: contents.len(),
            max: state.max_upload_bytes,
        }
        .into());
    }

    let payload = encode_put_payload(&filename, &contents);
    let reply = state
        .correlator
        .call(&token, command::PUT, Some(payload))
        .await?;
    Ok(Json(parse_json_lossy(&reply)))
}

/// `GET /download/{filename}`
pub async fn download_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let token = session_token(&headers, &state)?;
    if filename.chars().count() > MAX_FILENAME_LEN {
        return Err(ApiError::BadRequest("bad_filename".into()));
    }

    let reply = state
        .correlator
        .call(&token, command::GET, Some(Bytes::from(filename.clone())))
        .await?;

    let (meta, body) = split_envelope(&reply);
    if !meta.ok {
        return Err(ApiError::NotFound(
            meta.error.unwrap_or_else(|| "not_found".into()),
        ));
    }
    let out_name = meta.name.unwrap_or(filename);

    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
            (header::CONTENT_DISPOSITION, content_disposition(&out_name)),
        ],
        Body::from(body),
    )
        .into_response())
}

/// `POST /execute` with a JSON object body.
pub async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<Map<String, Value>>,
) -> Result<Json<Value>, ApiError> {
    let token = session_token(&headers, &state)?;
    let payload = Bytes::from(Value::Object(request).to_string());
    let reply = state
        .correlator
        .call(&token, command::EXECUTE, Some(payload))
        .await?;
    Ok(Json(parse_json_lossy(&reply)))
}

/// Characters left as-is in an RFC 5987 `filename*` value (`attr-char`).
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// `attachment` with an ASCII `filename` fallback and, for non-ASCII names,
/// the exact name as `filename*`.
fn content_disposition(filename: &str) -> HeaderValue {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if !c.is_ascii() || c.is_ascii_control() || c == '"' || c == '\\' {
                '_'
            } else {
                c
            }
        })
        .collect();
    let value = if filename.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        format!("attachment; filename=\"{fallback}\"")
    } else {
        format!(
            "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
            utf8_percent_encode(filename, ATTR_CHAR)
        )
    };
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
